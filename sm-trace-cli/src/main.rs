//! State-Machine Trace CLI
//!
//! Command-line monitoring console for the state-machine trace protocol.
//! It uses the sm-trace library and adds:
//! - Loading a diagram (JSON) and a name catalog (TOML) from disk
//! - A poll loop draining the session mailbox on a timer
//! - Automatic tracking of one instance
//! - Text or JSON-lines output

use anyhow::{Context, Result};
use clap::Parser;
use sm_trace::{
    Address, EventCatalog, Notice, SessionHandle, TraceConsole, TraceListener, TraceSession,
    UnknownFramePolicy,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

mod config;
mod report;

use config::{AppConfig, OutputFormat};
use report::TextReport;

/// State-Machine Trace - Watch a running state machine over the trace socket
#[derive(Parser, Debug)]
#[command(name = "sm-trace-cli")]
#[command(about = "Receive and replay state-machine traces", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Diagram description (JSON) to replay events against
    #[arg(short, long, value_name = "FILE")]
    diagram: Option<PathBuf>,

    /// Event name catalog (TOML)
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Track the instance with this address
    #[arg(long, value_name = "ADDR")]
    track: Option<u32>,

    /// Track the first instance that appears
    #[arg(long)]
    track_first: bool,

    /// Print notices as JSON lines
    #[arg(long)]
    json: bool,

    /// Mailbox poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// End the session if no frame data arrives for this long
    #[arg(long, value_name = "MS")]
    read_timeout_ms: Option<u64>,

    /// Skip the declared body of unknown frame types
    #[arg(long)]
    skip_unknown_bodies: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("State-Machine Trace CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using trace library v{}", sm_trace::VERSION);

    let config = resolve_config(&args)?;
    let session = build_session(&config)?;

    let listener = TraceListener::bind(config.listener.clone())
        .with_context(|| format!("Failed to bind {}", config.listener.socket_addr()))?;
    let handle = listener.start(session)?;
    log::info!("Waiting for a trace client on {}", handle.local_addr());

    let failed = watch(&handle, &config)?;
    let end = handle.join()?;
    log::debug!("Listener thread finished: {}", end.reason);

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Merge the optional config file with command-line overrides
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    if let Some(port) = args.port {
        config.listener.port = port;
    }
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(ms) = args.read_timeout_ms {
        config.listener.read_timeout_ms = Some(ms);
    }
    if args.skip_unknown_bodies {
        config.listener.unknown_frames = UnknownFramePolicy::SkipBody;
    }
    if args.diagram.is_some() {
        config.input.diagram = args.diagram.clone();
    }
    if args.catalog.is_some() {
        config.input.catalog = args.catalog.clone();
    }
    if args.track.is_some() {
        config.console.track = args.track;
    }
    if args.track_first {
        config.console.track_first = true;
    }
    if let Some(ms) = args.poll_ms {
        config.console.poll_interval_ms = ms;
    }
    if args.json {
        config.console.format = OutputFormat::Json;
    }

    Ok(config)
}

fn build_session(config: &AppConfig) -> Result<TraceSession> {
    let Some(diagram_path) = &config.input.diagram else {
        log::info!("No diagram loaded; instances will be listed but not replayed");
        return Ok(TraceSession::new());
    };

    let diagram = config::load_diagram(diagram_path)?;
    let catalog = match &config.input.catalog {
        Some(path) => config::load_catalog(path)?,
        None => {
            log::warn!("No name catalog; every event will show as unmatched");
            EventCatalog::new()
        }
    };
    log::info!(
        "Diagram '{}' loaded: {} states, {} transitions, {} event names",
        diagram.source,
        diagram.states.len(),
        diagram.transition_count(),
        catalog.num_events()
    );

    Ok(TraceSession::new().with_diagram(diagram, catalog))
}

/// Drain the session until it ends; returns true if it ended with an error
fn watch(handle: &SessionHandle, config: &AppConfig) -> Result<bool> {
    let poll = Duration::from_millis(config.console.poll_interval_ms.max(1));
    let mut console = TraceConsole::new();
    let mut report = TextReport::new(io::stdout());
    let mut tracking_requested = false;

    while !console.is_finished() {
        let (notices, had_any) = handle.drain();
        if !had_any {
            thread::sleep(poll);
            continue;
        }

        if !tracking_requested {
            if let Some(address) = pick_instance(&notices, config) {
                log::info!("Tracking instance {}", address);
                handle.track(address);
                tracking_requested = true;
            }
        }

        if notices.iter().any(|n| matches!(n, Notice::IdentityMismatch { .. })) {
            log::error!("Trace belongs to a different model; aborting session");
            handle.abort();
        }

        match config.console.format {
            OutputFormat::Json => {
                report::write_json_lines(&mut io::stdout().lock(), &notices)?;
                console.apply(notices, &mut sm_trace::NullSink);
            }
            OutputFormat::Text => console.apply(notices, &mut report),
        }
    }

    let failed = console
        .session_end()
        .map(|end| end.reason.is_error())
        .unwrap_or(false);
    Ok(failed || console.identity_mismatch().is_some())
}

/// First announced instance that matches the tracking settings
fn pick_instance(notices: &[Notice], config: &AppConfig) -> Option<Address> {
    notices.iter().find_map(|notice| match notice {
        Notice::InstanceAdded { address, .. } => match config.console.track {
            Some(wanted) if address.0 == wanted => Some(*address),
            Some(_) => None,
            None if config.console.track_first => Some(*address),
            None => None,
        },
        _ => None,
    })
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
