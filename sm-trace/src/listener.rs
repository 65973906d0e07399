//! Socket listener and decode loop
//!
//! [`TraceListener`] binds the trace port and, once started, accepts exactly
//! one client on a dedicated thread. That thread owns the instance registry
//! and the replay tracker for the whole session; the consumer only talks to it
//! through two mailboxes (notices out, commands in).
//!
//! ## Loop
//! 1. Apply pending consumer commands
//! 2. Read the frame header (a clean end-of-stream here ends the session)
//! 3. Decode the body for that type and dispatch it
//!
//! Commands are applied between frames. A command sent while the loop is
//! blocked on a read takes effect once the next frame has arrived.

use crate::codec;
use crate::config::{TracerConfig, UnknownFramePolicy};
use crate::console::{Notice, WarningKind};
use crate::mailbox::EventMailbox;
use crate::model::{DiagramGraph, EventCatalog, NameCatalog};
use crate::registry::InstanceRegistry;
use crate::replay::ReplayTracker;
use crate::types::{
    Address, FrameHeader, Result, SessionEnd, SessionEndReason, SessionStats, TraceError,
    TraceEvent,
};
use chrono::Utc;
use std::io::{BufReader, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Requests from the consumer, applied by the listener thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Attach the session diagram to an instance and replay its history
    Track(Address),
    /// Stop tracking and discard the replay history
    Untrack,
}

/// Models a session traces against
pub struct TraceSession {
    diagram: Option<Arc<DiagramGraph>>,
    catalog: Arc<dyn NameCatalog>,
}

impl TraceSession {
    /// Session without a diagram: instances are listed but cannot be tracked
    pub fn new() -> Self {
        Self {
            diagram: None,
            catalog: Arc::new(EventCatalog::new()),
        }
    }

    /// Builder method: load the diagram and the catalog that names its events
    pub fn with_diagram(
        mut self,
        diagram: DiagramGraph,
        catalog: impl NameCatalog + 'static,
    ) -> Self {
        self.diagram = Some(Arc::new(diagram));
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn diagram(&self) -> Option<&DiagramGraph> {
        self.diagram.as_deref()
    }
}

impl Default for TraceSession {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the listener thread and its handle
struct Shared {
    notices: EventMailbox<Notice>,
    commands: EventMailbox<Command>,
    stream: Mutex<Option<TcpStream>>,
    aborted: AtomicBool,
    finished: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            notices: EventMailbox::new(),
            commands: EventMailbox::new(),
            stream: Mutex::new(None),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    fn set_stream(&self, stream: Option<TcpStream>) {
        *self.stream.lock().unwrap_or_else(|p| p.into_inner()) = stream;
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Bound trace port, not yet serving
pub struct TraceListener {
    listener: TcpListener,
    config: TracerConfig,
}

impl TraceListener {
    /// Bind the configured address and port
    pub fn bind(config: TracerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.socket_addr())?;
        log::info!("Trace listener bound to {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawn the listener thread
    ///
    /// The thread accepts one client, decodes until the connection ends, then
    /// posts [`Notice::SessionEnded`] and drops the socket, registry and
    /// tracker.
    pub fn start(self, session: TraceSession) -> Result<SessionHandle> {
        let local_addr = self.listener.local_addr()?;
        let shared = Arc::new(Shared::new());
        let thread_shared = Arc::clone(&shared);

        let thread = thread::Builder::new()
            .name("sm-trace-listener".to_string())
            .spawn(move || serve(self.listener, self.config, session, thread_shared))?;

        Ok(SessionHandle {
            shared,
            local_addr,
            thread,
        })
    }
}

/// Consumer-side handle to a running session
pub struct SessionHandle {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    thread: JoinHandle<SessionEnd>,
}

impl SessionHandle {
    /// Take every notice posted since the last drain
    pub fn drain(&self) -> (Vec<Notice>, bool) {
        self.shared.notices.drain()
    }

    /// Ask the listener to track `address`
    pub fn track(&self, address: Address) {
        self.shared.commands.enqueue(Command::Track(address));
    }

    pub fn untrack(&self) {
        self.shared.commands.enqueue(Command::Untrack);
    }

    /// End the session by closing its socket
    ///
    /// Before a client has connected this takes effect right after accept,
    /// so [`SessionHandle::join`] still waits for one client to arrive.
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
        let guard = self.shared.stream.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(stream) = guard.as_ref() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("Socket shutdown on abort failed: {}", e);
            }
        }
        log::info!("Trace session abort requested");
    }

    /// True once the listener thread has posted its final notice
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the listener thread and return how the session ended
    pub fn join(self) -> Result<SessionEnd> {
        self.thread.join().map_err(|_| TraceError::ListenerPanicked)
    }
}

fn serve(
    listener: TcpListener,
    config: TracerConfig,
    session: TraceSession,
    shared: Arc<Shared>,
) -> SessionEnd {
    let mut session_loop = SessionLoop::new(config, session, &shared.notices);

    let accepted = listener.accept();
    // One client per session
    drop(listener);

    let reason = match accepted {
        Ok((stream, peer)) => {
            log::info!("Trace client connected from {}", peer);
            serve_stream(&mut session_loop, stream, &shared)
        }
        Err(e) => {
            log::error!("Accept failed: {}", e);
            SessionEndReason::Io(e.to_string())
        }
    };

    shared.set_stream(None);
    let end = session_loop.finish(reason);
    shared.finished.store(true, Ordering::SeqCst);
    end
}

fn serve_stream(
    session_loop: &mut SessionLoop<'_>,
    stream: TcpStream,
    shared: &Shared,
) -> SessionEndReason {
    if let Err(e) = stream.set_read_timeout(session_loop.config.read_timeout()) {
        return SessionEndReason::Io(e.to_string());
    }
    match stream.try_clone() {
        Ok(clone) => shared.set_stream(Some(clone)),
        Err(e) => log::warn!("Cannot clone client socket, abort will wait for the peer: {}", e),
    }
    if shared.is_aborted() {
        log::info!("Session aborted before decoding started");
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            log::debug!("Socket shutdown after accept failed: {}", e);
        }
        return SessionEndReason::Aborted;
    }

    let mut reader = BufReader::new(stream);
    let reason = session_loop.run(&mut reader, || shared.commands.drain().0);
    if shared.is_aborted() {
        SessionEndReason::Aborted
    } else {
        reason
    }
}

struct Tracking {
    address: Address,
    tracker: ReplayTracker,
}

/// Sequential decode-dispatch loop for one connection
struct SessionLoop<'m> {
    config: TracerConfig,
    diagram: Option<Arc<DiagramGraph>>,
    catalog: Arc<dyn NameCatalog>,
    notices: &'m EventMailbox<Notice>,
    registry: InstanceRegistry,
    tracking: Option<Tracking>,
    stats: SessionStats,
}

impl<'m> SessionLoop<'m> {
    fn new(config: TracerConfig, session: TraceSession, notices: &'m EventMailbox<Notice>) -> Self {
        Self {
            config,
            diagram: session.diagram,
            catalog: session.catalog,
            notices,
            registry: InstanceRegistry::new(),
            tracking: None,
            stats: SessionStats::default(),
        }
    }

    /// Decode frames from `reader` until the stream ends or fails
    ///
    /// `commands` is polled before every frame.
    fn run<R, C>(&mut self, reader: &mut R, mut commands: C) -> SessionEndReason
    where
        R: Read,
        C: FnMut() -> Vec<Command>,
    {
        loop {
            for command in commands() {
                self.apply(command);
            }
            match self.step(reader) {
                Ok(true) => continue,
                Ok(false) => {
                    log::info!("Trace client closed the connection");
                    return SessionEndReason::PeerClosed;
                }
                Err(e) => return Self::classify(e),
            }
        }
    }

    fn classify(error: TraceError) -> SessionEndReason {
        match error {
            TraceError::TruncatedFrame { .. } => {
                log::error!("Session ended: {}", error);
                SessionEndReason::Truncated(error.to_string())
            }
            TraceError::TimedOut => {
                log::error!("Session ended: {}", error);
                SessionEndReason::TimedOut
            }
            TraceError::IoError(e) => {
                log::error!("Session ended by socket error: {}", e);
                SessionEndReason::Io(e.to_string())
            }
            other => {
                log::error!("Session ended: {}", other);
                SessionEndReason::Io(other.to_string())
            }
        }
    }

    /// Decode and dispatch one frame; `Ok(false)` on clean end-of-stream
    fn step(&mut self, reader: &mut impl Read) -> Result<bool> {
        let result = self.read_frame(reader);
        let (header, event) = match result {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(false),
            Err(TraceError::IoError(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Err(TraceError::TimedOut)
            }
            Err(e) => return Err(e),
        };
        self.stats.frames += 1;
        match event.address() {
            Some(address) => log::debug!(
                "Frame #{}: type {} for instance {} with {} declared body bytes",
                self.stats.frames,
                header.frame_type,
                address,
                header.body_length
            ),
            None => log::debug!(
                "Frame #{}: type {} with {} declared body bytes",
                self.stats.frames,
                header.frame_type,
                header.body_length
            ),
        }
        self.dispatch(event);
        Ok(true)
    }

    fn read_frame(
        &mut self,
        reader: &mut impl Read,
    ) -> Result<Option<(FrameHeader, TraceEvent)>> {
        let Some(header) = codec::read_header(reader)? else {
            return Ok(None);
        };
        let event = codec::decode_body(header, reader)?;
        if self.config.unknown_frames == UnknownFramePolicy::SkipBody {
            self.reconcile(header, &event, reader)?;
        }
        Ok(Some((header, event)))
    }

    /// Align the stream with the declared body length
    fn reconcile(
        &mut self,
        header: FrameHeader,
        event: &TraceEvent,
        reader: &mut impl Read,
    ) -> Result<()> {
        let declared = u64::from(header.body_length);
        let consumed = codec::encoded_body_len(event) as u64;
        let is_unknown = matches!(event, TraceEvent::Unknown { .. });

        if declared > consumed {
            if !is_unknown {
                self.warn(
                    WarningKind::BodyLengthMismatch,
                    format!(
                        "Frame type {} declares {} body bytes but its fields use {}; \
                         skipping the rest",
                        header.frame_type, declared, consumed
                    ),
                );
            }
            codec::skip_body(reader, declared - consumed)?;
        } else if declared < consumed {
            self.warn(
                WarningKind::BodyLengthMismatch,
                format!(
                    "Frame type {} declares {} body bytes but its fields use {}",
                    header.frame_type, declared, consumed
                ),
            );
        }
        Ok(())
    }

    fn post(&self, notice: Notice) {
        self.notices.enqueue(notice);
    }

    fn warn(&mut self, kind: WarningKind, message: String) {
        self.stats.warnings += 1;
        log::warn!("{}", message);
        self.post(Notice::Warning { kind, message });
    }

    fn dispatch(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::OpenConnection { hash, source_name } => {
                log::info!("Target opened trace for '{}' (hash {:#010x})", source_name, hash);
                self.post(Notice::SessionOpened {
                    hash,
                    source: source_name.clone(),
                });
                self.check_identity(source_name);
            }
            TraceEvent::InstanceCreated { address, type_name } => {
                log::debug!("Instance {} created ({})", address, type_name);
                self.registry.create(address, type_name.clone());
                if self.is_tracking(address) {
                    // Address reused without a delete: follow the new instance
                    log::info!("Tracked instance {} was re-created; restarting replay", address);
                    self.start_tracking(address);
                }
                self.post(Notice::InstanceAdded { address, type_name });
            }
            TraceEvent::EventFired { address, event_id } => {
                self.stats.events_fired += 1;
                match self.registry.event(address, event_id) {
                    Ok(count) => {
                        log::debug!(
                            "Instance {} received event {} (#{})",
                            address,
                            event_id,
                            count
                        );
                        self.feed_tracker(address, event_id);
                    }
                    Err(e) => self.warn(
                        WarningKind::UnknownInstance,
                        format!("Event {} dropped: {}", event_id, e),
                    ),
                }
            }
            TraceEvent::TransitionFired { address, name } => {
                self.stats.diagnostics += 1;
                log::debug!("Instance {} fired transition '{}'", address, name);
            }
            TraceEvent::ActionFired { address, name } => {
                self.stats.diagnostics += 1;
                log::debug!("Instance {} ran action '{}'", address, name);
            }
            TraceEvent::InstanceDeleted { address } => match self.registry.delete(address) {
                Ok(record) => {
                    log::debug!(
                        "Instance {} deleted after {} events",
                        address,
                        record.event_history.len()
                    );
                    if self.is_tracking(address) {
                        self.stop_tracking();
                    }
                    self.post(Notice::InstanceRemoved { address });
                }
                Err(e) => self.warn(WarningKind::UnknownInstance, format!("Delete ignored: {}", e)),
            },
            TraceEvent::Heartbeat { counter } => {
                self.stats.diagnostics += 1;
                log::trace!("Heartbeat {}", counter);
            }
            TraceEvent::Unknown { frame_type, body_length } => {
                self.stats.unknown_frames += 1;
                let mut message = TraceError::UnknownFrameType(frame_type).to_string();
                if self.config.unknown_frames == UnknownFramePolicy::Ignore && body_length > 0 {
                    message.push_str(&format!(
                        " ({} declared body bytes left unread; stream may be out of step)",
                        body_length
                    ));
                }
                self.warn(WarningKind::UnknownFrameType, message);
            }
        }
    }

    fn check_identity(&mut self, source_name: String) {
        if !self.config.check_identity {
            return;
        }
        let Some(diagram) = &self.diagram else {
            return;
        };
        if diagram.source != source_name {
            let error = TraceError::IdentityMismatch {
                expected: diagram.source.clone(),
                actual: source_name.clone(),
            };
            log::error!("{}", error);
            self.post(Notice::IdentityMismatch {
                expected: diagram.source.clone(),
                actual: source_name,
            });
        }
    }

    fn feed_tracker(&mut self, address: Address, event_id: u32) {
        let Some(tracking) = self.tracking.as_mut() else {
            return;
        };
        if tracking.address != address {
            return;
        }
        let result = tracking.tracker.feed(event_id).map(|entry| entry.clone());
        match result {
            Ok(entry) => self.post(Notice::Replayed { address, entry }),
            Err(e) => {
                self.tracking = None;
                self.warn(
                    WarningKind::NoStartState,
                    format!("Tracking of {} stopped: {}", address, e),
                );
                self.post(Notice::TrackingCleared { address });
            }
        }
    }

    fn is_tracking(&self, address: Address) -> bool {
        self.tracking.as_ref().map(|t| t.address) == Some(address)
    }

    fn stop_tracking(&mut self) {
        if let Some(mut previous) = self.tracking.take() {
            previous.tracker.clear();
            log::info!("Stopped tracking instance {}", previous.address);
            self.post(Notice::TrackingCleared {
                address: previous.address,
            });
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Track(address) => self.start_tracking(address),
            Command::Untrack => self.stop_tracking(),
        }
    }

    fn start_tracking(&mut self, address: Address) {
        self.stop_tracking();

        let Some(diagram) = self.diagram.clone() else {
            self.warn(
                WarningKind::TrackingUnavailable,
                format!("Cannot track {}: no diagram loaded", address),
            );
            return;
        };
        let Some(history) = self.registry.history_of(address).map(<[u32]>::to_vec) else {
            self.warn(
                WarningKind::UnknownInstance,
                format!("Cannot track: {}", TraceError::UnknownInstance(address)),
            );
            return;
        };

        let mut tracker = ReplayTracker::new(diagram, Arc::clone(&self.catalog));
        match tracker.replay(&history) {
            Ok(entries) => {
                log::info!(
                    "Tracking instance {} ({} past events replayed)",
                    address,
                    entries.len()
                );
                for entry in entries {
                    self.post(Notice::Replayed { address, entry });
                }
                self.tracking = Some(Tracking { address, tracker });
            }
            Err(e) => self.warn(
                WarningKind::NoStartState,
                format!("Cannot track {}: {}", address, e),
            ),
        }
    }

    /// Reset per-session state and post the final notice
    fn finish(&mut self, reason: SessionEndReason) -> SessionEnd {
        if !self.registry.is_empty() {
            log::debug!("Dropping {} live instances at session end", self.registry.len());
        }
        self.registry.clear();
        self.tracking = None;

        let end = SessionEnd {
            reason,
            stats: self.stats.clone(),
            ended_at: Utc::now(),
        };
        log::info!(
            "Trace session ended: {} ({} frames, {} warnings)",
            end.reason,
            end.stats.frames,
            end.stats.warnings
        );
        self.post(Notice::SessionEnded(end.clone()));
        end
    }
}
