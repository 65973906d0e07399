//! Core types for the state-machine trace protocol
//!
//! This module defines the decoded domain form of wire frames, the error
//! taxonomy shared by every component, and the values that describe how a
//! debug session ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the tracer
pub type Timestamp = DateTime<Utc>;

/// Result type for tracer operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Opaque address of a state-machine instance in the traced process
///
/// Addresses are unique among live instances, but the remote side may reuse
/// one after the instance it named was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u32);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Address {
    fn from(raw: u32) -> Self {
        Address(raw)
    }
}

/// Frame type tags defined by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FrameType {
    OpenConnection = 1,
    InstanceCreated = 2,
    EventFired = 3,
    TransitionFired = 4,
    ActionFired = 5,
    InstanceDeleted = 6,
    Heartbeat = 7,
}

impl FrameType {
    /// Map a raw wire tag to a known frame type
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(FrameType::OpenConnection),
            2 => Some(FrameType::InstanceCreated),
            3 => Some(FrameType::EventFired),
            4 => Some(FrameType::TransitionFired),
            5 => Some(FrameType::ActionFired),
            6 => Some(FrameType::InstanceDeleted),
            7 => Some(FrameType::Heartbeat),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// The two fixed-width fields that open every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw type tag
    pub frame_type: u32,
    /// Declared number of body bytes following the header
    pub body_length: u32,
}

/// Decoded domain form of one wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The traced process announces which model it runs
    OpenConnection { hash: u32, source_name: String },
    /// A state-machine instance was constructed
    InstanceCreated { address: Address, type_name: String },
    /// An event was dispatched to an instance
    EventFired { address: Address, event_id: u32 },
    /// A transition fired (diagnostic only)
    TransitionFired { address: Address, name: String },
    /// An action ran (diagnostic only)
    ActionFired { address: Address, name: String },
    /// A state-machine instance was destroyed
    InstanceDeleted { address: Address },
    /// Keep-alive counter (diagnostic only)
    Heartbeat { counter: u32 },
    /// A type tag outside the protocol table; no body bytes were consumed
    Unknown { frame_type: u32, body_length: u32 },
}

impl TraceEvent {
    /// Wire type tag for this event
    pub fn frame_type(&self) -> u32 {
        match self {
            TraceEvent::OpenConnection { .. } => FrameType::OpenConnection.as_u32(),
            TraceEvent::InstanceCreated { .. } => FrameType::InstanceCreated.as_u32(),
            TraceEvent::EventFired { .. } => FrameType::EventFired.as_u32(),
            TraceEvent::TransitionFired { .. } => FrameType::TransitionFired.as_u32(),
            TraceEvent::ActionFired { .. } => FrameType::ActionFired.as_u32(),
            TraceEvent::InstanceDeleted { .. } => FrameType::InstanceDeleted.as_u32(),
            TraceEvent::Heartbeat { .. } => FrameType::Heartbeat.as_u32(),
            TraceEvent::Unknown { frame_type, .. } => *frame_type,
        }
    }

    /// Address of the instance this event refers to, if any
    pub fn address(&self) -> Option<Address> {
        match self {
            TraceEvent::InstanceCreated { address, .. }
            | TraceEvent::EventFired { address, .. }
            | TraceEvent::TransitionFired { address, .. }
            | TraceEvent::ActionFired { address, .. }
            | TraceEvent::InstanceDeleted { address } => Some(*address),
            TraceEvent::OpenConnection { .. }
            | TraceEvent::Heartbeat { .. }
            | TraceEvent::Unknown { .. } => None,
        }
    }
}

/// Errors that can occur while tracing
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Truncated frame: needed {needed} bytes, stream ended after {got}")]
    TruncatedFrame { needed: usize, got: usize },

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u32),

    #[error("Unknown instance: {0}")]
    UnknownInstance(Address),

    #[error("Source mismatch: diagram is '{expected}', target runs '{actual}'")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Diagram has no start state")]
    NoStartState,

    #[error("Invalid diagram: {0}")]
    InvalidDiagram(String),

    #[error("String cannot be encoded byte-for-byte: {0:?}")]
    UnencodableString(String),

    #[error("Timed out waiting for frame data")]
    TimedOut,

    #[error("Listener thread panicked")]
    ListenerPanicked,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Why a debug session stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Peer closed the connection on a frame boundary
    PeerClosed,
    /// Stream ended in the middle of a frame
    Truncated(String),
    /// No frame data arrived within the configured read timeout
    TimedOut,
    /// The consumer aborted the session
    Aborted,
    /// Socket failure other than end-of-stream
    Io(String),
}

impl SessionEndReason {
    /// True when the session ended because something went wrong
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SessionEndReason::Truncated(_) | SessionEndReason::TimedOut | SessionEndReason::Io(_)
        )
    }
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEndReason::PeerClosed => write!(f, "peer closed the connection"),
            SessionEndReason::Truncated(detail) => write!(f, "truncated stream ({})", detail),
            SessionEndReason::TimedOut => write!(f, "read timed out"),
            SessionEndReason::Aborted => write!(f, "aborted by consumer"),
            SessionEndReason::Io(detail) => write!(f, "I/O error ({})", detail),
        }
    }
}

/// Per-session frame counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames: u64,
    pub events_fired: u64,
    pub diagnostics: u64,
    pub unknown_frames: u64,
    pub warnings: u64,
}

/// Final report for one debug session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub reason: SessionEndReason,
    pub stats: SessionStats,
    pub ended_at: Timestamp,
}
