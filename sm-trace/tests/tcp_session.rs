// End-to-end sessions over a real loopback socket
use sm_trace::codec::write_frame;
use sm_trace::{
    Address, DiagramGraph, EventCatalog, Notice, NullSink, ReplayOutcome, SessionEndReason,
    SessionHandle, TraceConsole, TraceEvent, TraceListener, TraceSession, TracerConfig,
    UnknownFramePolicy, WarningKind,
};
use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

const GO: u32 = 1;
const PING: u32 = 2;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn session() -> TraceSession {
    let diagram = DiagramGraph::new("Lamp.sm")
        .with_state("S0", true)
        .with_state("S1", false)
        .with_transition("S0", "go", "S1");
    let catalog = EventCatalog::new().with_event(GO, "go").with_event(PING, "ping");
    TraceSession::new().with_diagram(diagram, catalog)
}

/// Start a session on a loopback port without connecting to it
fn listen(config: TracerConfig) -> SessionHandle {
    let listener = TraceListener::bind(config.with_bind_address("127.0.0.1").with_port(0)).unwrap();
    listener.start(session()).unwrap()
}

fn start(config: TracerConfig) -> (SessionHandle, TcpStream) {
    let handle = listen(config);
    let client = TcpStream::connect(handle.local_addr()).unwrap();
    (handle, client)
}

fn send(client: &mut TcpStream, events: &[TraceEvent]) {
    for event in events {
        write_frame(client, event).unwrap();
    }
    client.flush().unwrap();
}

/// Drain into `seen` until `done` holds or five seconds pass
fn wait_for(handle: &SessionHandle, seen: &mut Vec<Notice>, done: impl Fn(&[Notice]) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(seen) {
        assert!(Instant::now() < deadline, "timed out; notices so far: {:?}", seen);
        let (batch, _) = handle.drain();
        seen.extend(batch);
        thread::sleep(Duration::from_millis(5));
    }
}

fn ended(notices: &[Notice]) -> bool {
    notices.iter().any(|n| matches!(n, Notice::SessionEnded(_)))
}

#[test]
fn test_live_tracking_session() {
    init_logging();
    let (handle, mut client) = start(TracerConfig::new());
    let mut seen = Vec::new();

    send(
        &mut client,
        &[
            TraceEvent::OpenConnection { hash: 7, source_name: "Lamp.sm".into() },
            TraceEvent::InstanceCreated { address: Address(42), type_name: "Lamp".into() },
        ],
    );
    wait_for(&handle, &mut seen, |n| {
        n.iter().any(|x| matches!(x, Notice::InstanceAdded { .. }))
    });

    handle.track(Address(42));
    send(
        &mut client,
        &[
            TraceEvent::EventFired { address: Address(42), event_id: GO },
            TraceEvent::EventFired { address: Address(42), event_id: PING },
            TraceEvent::Heartbeat { counter: 1 },
        ],
    );
    wait_for(&handle, &mut seen, |n| {
        n.iter().filter(|x| matches!(x, Notice::Replayed { .. })).count() == 2
    });

    drop(client);
    wait_for(&handle, &mut seen, ended);

    let mut console = TraceConsole::new();
    console.apply(seen, &mut NullSink);

    assert_eq!(console.source(), Some("Lamp.sm"));
    assert!(console.identity_mismatch().is_none());
    assert_eq!(console.tracked(), Some(Address(42)));
    let history = console.history();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history[0].outcome,
        ReplayOutcome::Matched {
            from: "S0".into(),
            transition: "S0--go-->S1".into(),
            to: "S1".into(),
        }
    );
    assert_eq!(history[1].outcome, ReplayOutcome::Unmatched { state: "S1".into() });
    assert_eq!(console.live_highlight().unwrap().state, "S1");

    let end = handle.join().unwrap();
    assert_eq!(end.reason, SessionEndReason::PeerClosed);
    assert_eq!(end.stats.frames, 5);
    assert_eq!(end.stats.events_fired, 2);
    assert_eq!(end.stats.diagnostics, 1);
}

#[test]
fn test_identity_mismatch_then_abort() {
    init_logging();
    let (handle, mut client) = start(TracerConfig::new());
    let mut seen = Vec::new();

    send(&mut client, &[TraceEvent::OpenConnection { hash: 1, source_name: "Other.sm".into() }]);
    wait_for(&handle, &mut seen, |n| {
        n.iter().any(|x| matches!(x, Notice::IdentityMismatch { .. }))
    });

    handle.abort();
    wait_for(&handle, &mut seen, ended);
    assert!(handle.is_finished());

    let end = handle.join().unwrap();
    assert_eq!(end.reason, SessionEndReason::Aborted);
    assert!(!end.reason.is_error());
}

#[test]
fn test_truncated_stream_ends_session() {
    init_logging();
    let (handle, mut client) = start(TracerConfig::new());

    // EventFired header promising 8 body bytes, followed by only 3
    client.write_all(&[3, 0, 0, 0, 8, 0, 0, 0, 1, 2, 3]).unwrap();
    drop(client);

    let end = handle.join().unwrap();
    assert!(matches!(end.reason, SessionEndReason::Truncated(_)));
    assert!(end.reason.is_error());
}

#[test]
fn test_event_for_unknown_instance_is_warning_only() {
    init_logging();
    let (handle, mut client) = start(TracerConfig::new());
    send(
        &mut client,
        &[
            TraceEvent::InstanceCreated { address: Address(42), type_name: "Foo".into() },
            TraceEvent::InstanceDeleted { address: Address(42) },
            TraceEvent::EventFired { address: Address(42), event_id: 3 },
        ],
    );
    drop(client);

    let mut seen = Vec::new();
    wait_for(&handle, &mut seen, ended);
    let kinds: Vec<_> = seen
        .iter()
        .filter_map(|n| match n {
            Notice::Warning { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![WarningKind::UnknownInstance]);
    assert_eq!(handle.join().unwrap().reason, SessionEndReason::PeerClosed);
}

#[test]
fn test_skip_body_policy_over_socket() {
    init_logging();
    let config = TracerConfig::new().with_unknown_frames(UnknownFramePolicy::SkipBody);
    let (handle, mut client) = start(config);

    // Undefined type 12 carrying a 6-byte body the decoder knows nothing about
    client.write_all(&[12, 0, 0, 0, 6, 0, 0, 0, 9, 9, 9, 9, 9, 9]).unwrap();
    send(
        &mut client,
        &[TraceEvent::InstanceCreated { address: Address(3), type_name: "Fan".into() }],
    );
    drop(client);

    let mut seen = Vec::new();
    wait_for(&handle, &mut seen, ended);
    assert!(seen.contains(&Notice::InstanceAdded { address: Address(3), type_name: "Fan".into() }));
    assert_eq!(handle.join().unwrap().stats.unknown_frames, 1);
}

#[test]
fn test_read_timeout_ends_idle_session() {
    init_logging();
    let (handle, client) = start(TracerConfig::new().with_read_timeout_ms(50));

    let end = handle.join().unwrap();
    assert_eq!(end.reason, SessionEndReason::TimedOut);
    drop(client);
}

#[test]
fn test_abort_before_connect_ends_session_at_accept() {
    init_logging();
    let handle = listen(TracerConfig::new());
    handle.abort();

    let client = TcpStream::connect(handle.local_addr()).unwrap();
    let end = handle.join().unwrap();
    assert_eq!(end.reason, SessionEndReason::Aborted);
    assert_eq!(end.stats.frames, 0);
    drop(client);
}

#[test]
fn test_early_abort_waits_for_a_client() {
    init_logging();
    let handle = listen(TracerConfig::new());
    handle.abort();

    // Still parked in accept: nothing has ended yet
    thread::sleep(Duration::from_millis(100));
    assert!(!handle.is_finished());
    assert!(!handle.drain().1);

    let client = TcpStream::connect(handle.local_addr()).unwrap();
    let mut seen = Vec::new();
    wait_for(&handle, &mut seen, ended);
    assert_eq!(seen.len(), 1);

    let end = handle.join().unwrap();
    assert_eq!(end.reason, SessionEndReason::Aborted);
    assert_eq!(end.stats.frames, 0);
    drop(client);
}
