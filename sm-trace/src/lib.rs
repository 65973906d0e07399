//! State-Machine Trace Library
//!
//! Receives the trace stream an instrumented state-machine runtime sends over
//! TCP, keeps per-instance event histories, and replays a tracked instance's
//! events against its diagram to work out which state and transition are live.
//!
//! # Architecture
//!
//! - [`codec`] decodes (and encodes) the little-endian frame format
//! - [`TraceListener`] accepts one client and runs the decode loop on its own
//!   thread, owning the [`InstanceRegistry`] and the [`ReplayTracker`]
//! - [`EventMailbox`] is the only shared state: notices flow out to the
//!   consumer, commands flow back in
//! - [`TraceConsole`] is the consumer-side model behind a UI or CLI
//!
//! The library does NOT:
//! - Edit, lay out or persist diagrams
//! - Serve more than one client per session
//! - Authenticate the peer
//!
//! # Example Usage
//!
//! ```no_run
//! use sm_trace::{
//!     DiagramGraph, EventCatalog, NullSink, TraceConsole, TraceListener, TraceSession,
//!     TracerConfig,
//! };
//!
//! let diagram = DiagramGraph::new("Door.sm")
//!     .with_state("Closed", true)
//!     .with_state("Open", false)
//!     .with_transition("Closed", "open", "Open");
//! let catalog = EventCatalog::new().with_event(1, "open");
//!
//! let listener = TraceListener::bind(TracerConfig::new()).unwrap();
//! let handle = listener
//!     .start(TraceSession::new().with_diagram(diagram, catalog))
//!     .unwrap();
//!
//! let mut console = TraceConsole::new();
//! while !console.is_finished() {
//!     let (notices, had_any) = handle.drain();
//!     if had_any {
//!         console.apply(notices, &mut NullSink);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! println!("{:?}", handle.join().unwrap().reason);
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod console;
pub mod listener;
pub mod mailbox;
pub mod model;
pub mod registry;
pub mod replay;
pub mod types;

// Re-export main types for convenience
pub use config::{TracerConfig, UnknownFramePolicy, DEFAULT_PORT};
pub use console::{InstanceChange, Notice, NullSink, TraceConsole, TraceSink, WarningKind};
pub use listener::{Command, SessionHandle, TraceListener, TraceSession};
pub use mailbox::EventMailbox;
pub use model::{DiagramGraph, EventCatalog, NameCatalog, State, Transition};
pub use registry::{InstanceRecord, InstanceRegistry};
pub use replay::{Highlight, ReplayEntry, ReplayOutcome, ReplayTracker};
pub use types::{
    Address, FrameHeader, FrameType, Result, SessionEnd, SessionEndReason, SessionStats,
    Timestamp, TraceError, TraceEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a fresh registry and console start empty
        let registry = InstanceRegistry::new();
        assert!(registry.is_empty());
        let console = TraceConsole::new();
        assert_eq!(console.instance_count(), 0);
        assert_eq!(DEFAULT_PORT, 34768);
    }
}
