//! Read-only diagram model the tracker walks
//!
//! The editor owns the real diagram; the tracer only needs states, their
//! outgoing transitions in declaration order, and which state is the start.

use crate::types::{Result, TraceError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An outgoing edge of a state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Transition name (unique within its source state)
    pub name: String,
    /// Event label that triggers this transition
    pub event: String,
    /// Name of the target state
    pub target: String,
}

/// A diagram state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    /// True for the state a fresh instance starts in
    #[serde(default)]
    pub start: bool,
    /// Outgoing transitions in declaration order
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// A loaded state-machine diagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramGraph {
    /// Identifier the traced process announces in its OpenConnection frame
    pub source: String,
    /// States in declaration order
    #[serde(default)]
    pub states: Vec<State>,
}

impl DiagramGraph {
    /// Create an empty diagram for the given source identifier
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            states: Vec::new(),
        }
    }

    /// Builder method: add a state
    pub fn with_state(mut self, name: impl Into<String>, start: bool) -> Self {
        self.states.push(State {
            name: name.into(),
            start,
            transitions: Vec::new(),
        });
        self
    }

    /// Builder method: add a transition from `from`, named `from--event-->target`
    ///
    /// Does nothing if `from` has not been added yet; `validate` catches
    /// dangling targets.
    pub fn with_transition(
        mut self,
        from: &str,
        event: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let event = event.into();
        let target = target.into();
        if let Some(state) = self.states.iter_mut().find(|s| s.name == from) {
            state.transitions.push(Transition {
                name: format!("{}--{}-->{}", from, event, target),
                event,
                target,
            });
        }
        self
    }

    /// Look up a state by name
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    /// The state marked as start, if any
    pub fn start_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.start)
    }

    /// Number of transitions across all states
    pub fn transition_count(&self) -> usize {
        self.states.iter().map(|s| s.transitions.len()).sum()
    }

    /// Check structural consistency
    ///
    /// A missing start state is accepted here; the replay tracker reports it
    /// when it first needs one.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for state in &self.states {
            if !names.insert(state.name.as_str()) {
                return Err(TraceError::InvalidDiagram(format!(
                    "duplicate state '{}'",
                    state.name
                )));
            }
        }

        let starts = self.states.iter().filter(|s| s.start).count();
        if starts > 1 {
            return Err(TraceError::InvalidDiagram(format!(
                "{} states are marked as start",
                starts
            )));
        }

        for state in &self.states {
            for transition in &state.transitions {
                if !names.contains(transition.target.as_str()) {
                    return Err(TraceError::InvalidDiagram(format!(
                        "transition '{}' targets unknown state '{}'",
                        transition.name, transition.target
                    )));
                }
            }
        }
        Ok(())
    }
}
