//! Consumer-side view of a trace session
//!
//! The listener thread posts [`Notice`]s into the session mailbox. A consumer
//! (UI timer, CLI poll loop) drains them and hands the batch to a
//! [`TraceConsole`], which keeps the live instance list and the replay history
//! and forwards each change to a [`TraceSink`].

use crate::replay::{Highlight, ReplayEntry};
use crate::types::{Address, SessionEnd};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-frame problems that do not end the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UnknownFrameType,
    UnknownInstance,
    NoStartState,
    BodyLengthMismatch,
    TrackingUnavailable,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WarningKind::UnknownFrameType => "unknown frame type",
            WarningKind::UnknownInstance => "unknown instance",
            WarningKind::NoStartState => "no start state",
            WarningKind::BodyLengthMismatch => "body length mismatch",
            WarningKind::TrackingUnavailable => "tracking unavailable",
        };
        write!(f, "{}", label)
    }
}

/// Something the listener thread wants the consumer to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    /// The target announced itself
    SessionOpened { hash: u32, source: String },
    /// The target runs a different model than the loaded diagram
    IdentityMismatch { expected: String, actual: String },
    InstanceAdded { address: Address, type_name: String },
    InstanceRemoved { address: Address },
    /// The tracked instance produced a new history entry
    Replayed { address: Address, entry: ReplayEntry },
    /// Tracking stopped and the replay history was discarded
    TrackingCleared { address: Address },
    Warning { kind: WarningKind, message: String },
    /// Always the last notice of a session
    SessionEnded(SessionEnd),
}

/// Direction of a live instance list change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceChange {
    Added,
    Removed,
}

/// Callbacks for the rendering layer
///
/// Every method has an empty default so sinks implement only what they draw.
pub trait TraceSink {
    fn on_instance(&mut self, _change: InstanceChange, _address: Address, _type_name: &str) {}

    /// `None` means all highlighting was removed
    fn on_highlight(&mut self, _highlight: Option<&Highlight>) {}

    fn on_replay(&mut self, _address: Address, _entry: &ReplayEntry) {}

    fn on_session_opened(&mut self, _hash: u32, _source: &str) {}

    fn on_identity_mismatch(&mut self, _expected: &str, _actual: &str) {}

    fn on_warning(&mut self, _kind: WarningKind, _message: &str) {}

    fn on_session_end(&mut self, _end: &SessionEnd) {}
}

/// Sink that ignores everything
pub struct NullSink;

impl TraceSink for NullSink {}

/// Model of what the consumer currently shows
#[derive(Debug, Default)]
pub struct TraceConsole {
    instances: BTreeMap<Address, String>,
    source: Option<String>,
    tracked: Option<Address>,
    history: Vec<ReplayEntry>,
    selected: Option<usize>,
    mismatch: Option<(String, String)>,
    warnings: usize,
    ended: Option<SessionEnd>,
}

impl TraceConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a drained batch in order, notifying `sink` of every change
    pub fn apply(&mut self, notices: Vec<Notice>, sink: &mut dyn TraceSink) {
        for notice in notices {
            self.apply_one(notice, sink);
        }
    }

    fn apply_one(&mut self, notice: Notice, sink: &mut dyn TraceSink) {
        match notice {
            Notice::SessionOpened { hash, source } => {
                sink.on_session_opened(hash, &source);
                self.source = Some(source);
            }
            Notice::IdentityMismatch { expected, actual } => {
                sink.on_identity_mismatch(&expected, &actual);
                self.mismatch = Some((expected, actual));
            }
            Notice::InstanceAdded { address, type_name } => {
                sink.on_instance(InstanceChange::Added, address, &type_name);
                self.instances.insert(address, type_name);
            }
            Notice::InstanceRemoved { address } => {
                let type_name = self.instances.remove(&address).unwrap_or_default();
                sink.on_instance(InstanceChange::Removed, address, &type_name);
            }
            Notice::Replayed { address, entry } => {
                if self.tracked != Some(address) {
                    self.tracked = Some(address);
                    self.history.clear();
                }
                sink.on_replay(address, &entry);
                sink.on_highlight(Some(&entry.highlight));
                self.selected = None;
                self.history.push(entry);
            }
            Notice::TrackingCleared { address } => {
                if self.tracked == Some(address) {
                    self.tracked = None;
                }
                self.history.clear();
                self.selected = None;
                sink.on_highlight(None);
            }
            Notice::Warning { kind, message } => {
                self.warnings += 1;
                sink.on_warning(kind, &message);
            }
            Notice::SessionEnded(end) => {
                sink.on_session_end(&end);
                self.ended = Some(end);
            }
        }
    }

    /// Re-highlight a historical entry
    ///
    /// Returns the highlight stored for `ordinal`, or `None` if no such entry
    /// was received. The live history is unaffected.
    pub fn select(&mut self, ordinal: usize, sink: &mut dyn TraceSink) -> Option<&Highlight> {
        let index = ordinal.checked_sub(1)?;
        let entry = self.history.get(index)?;
        self.selected = Some(ordinal);
        sink.on_highlight(Some(&entry.highlight));
        Some(&entry.highlight)
    }

    /// Highlight of the newest entry
    pub fn live_highlight(&self) -> Option<&Highlight> {
        self.history.last().map(|entry| &entry.highlight)
    }

    /// Live instances as `(address, type name)`, ascending by address
    pub fn instances(&self) -> impl Iterator<Item = (Address, &str)> {
        self.instances.iter().map(|(a, n)| (*a, n.as_str()))
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn history(&self) -> &[ReplayEntry] {
        &self.history
    }

    pub fn tracked(&self) -> Option<Address> {
        self.tracked
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// `(expected, actual)` if the target announced a different model
    pub fn identity_mismatch(&self) -> Option<(&str, &str)> {
        self.mismatch
            .as_ref()
            .map(|(expected, actual)| (expected.as_str(), actual.as_str()))
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    pub fn session_end(&self) -> Option<&SessionEnd> {
        self.ended.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.ended.is_some()
    }
}
