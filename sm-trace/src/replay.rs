//! Trace replay against a loaded diagram
//!
//! Feeds event ids through the diagram one at a time, moving an "active
//! state" pointer along matching transitions and recording one
//! [`ReplayEntry`] per id. Each entry keeps the highlight computed when it was
//! created, so selecting an old entry later is a lookup rather than a
//! re-simulation.
//!
//! ## Matching
//! Transitions of the active state are searched in declaration order and the
//! first whose event label equals the resolved name wins. Matching is
//! positional: two transitions with the same label never compete, the later
//! one is simply unreachable from that state.

use crate::model::{DiagramGraph, NameCatalog, Transition};
use crate::types::{Result, TraceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which state (and optionally which transition) is drawn as live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub state: String,
    pub transition: Option<String>,
}

/// What happened when one event id was fed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// A transition of the active state fired
    Matched {
        from: String,
        transition: String,
        to: String,
    },
    /// No transition of `state` listens for this event
    Unmatched { state: String },
}

/// One history record of the trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEntry {
    /// 1-based position since the tracker was last cleared
    pub ordinal: usize,
    pub event_id: u32,
    pub event_name: String,
    pub outcome: ReplayOutcome,
    /// Highlight as computed at ingestion time
    pub highlight: Highlight,
}

impl ReplayEntry {
    pub fn is_matched(&self) -> bool {
        matches!(self.outcome, ReplayOutcome::Matched { .. })
    }
}

/// Forward-only simulator for one tracked instance/diagram pairing
pub struct ReplayTracker {
    diagram: Arc<DiagramGraph>,
    catalog: Arc<dyn NameCatalog>,
    active_state: Option<String>,
    highlighted_transition: Option<String>,
    entries: Vec<ReplayEntry>,
}

impl ReplayTracker {
    pub fn new(diagram: Arc<DiagramGraph>, catalog: Arc<dyn NameCatalog>) -> Self {
        Self {
            diagram,
            catalog,
            active_state: None,
            highlighted_transition: None,
            entries: Vec::new(),
        }
    }

    /// Resolve an event id, falling back to a placeholder that matches nothing
    fn resolve(&self, event_id: u32) -> String {
        match self.catalog.event_name(event_id) {
            Some(name) => name.to_string(),
            None => {
                log::warn!("No name for event id {}", event_id);
                format!("event#{}", event_id)
            }
        }
    }

    fn find_transition<'d>(
        diagram: &'d DiagramGraph,
        state: &str,
        event: &str,
    ) -> Option<&'d Transition> {
        diagram
            .state(state)?
            .transitions
            .iter()
            .find(|t| t.event == event)
    }

    /// Feed one event id and record the outcome
    ///
    /// Fails with `NoStartState` if no state is active yet and the diagram has
    /// no start state; nothing is recorded in that case.
    pub fn feed(&mut self, event_id: u32) -> Result<&ReplayEntry> {
        let event_name = self.resolve(event_id);

        let current = match &self.active_state {
            Some(state) => state.clone(),
            None => {
                let start = self.diagram.start_state().ok_or(TraceError::NoStartState)?;
                log::debug!("Replay starts in '{}'", start.name);
                start.name.clone()
            }
        };

        let (outcome, highlight) =
            match Self::find_transition(&self.diagram, &current, &event_name) {
                Some(transition) => {
                    if let Some(previous) = &self.highlighted_transition {
                        log::trace!("Deactivating transition '{}'", previous);
                    }
                    if transition.target != current {
                        log::trace!("Deactivating state '{}'", current);
                    }
                    (
                        ReplayOutcome::Matched {
                            from: current.clone(),
                            transition: transition.name.clone(),
                            to: transition.target.clone(),
                        },
                        Highlight {
                            state: transition.target.clone(),
                            transition: Some(transition.name.clone()),
                        },
                    )
                }
                None => {
                    log::debug!("'{}' not handled in state '{}'", event_name, current);
                    (
                        ReplayOutcome::Unmatched {
                            state: current.clone(),
                        },
                        Highlight {
                            state: current.clone(),
                            transition: None,
                        },
                    )
                }
            };

        self.active_state = Some(highlight.state.clone());
        self.highlighted_transition = highlight.transition.clone();

        let ordinal = self.entries.len() + 1;
        self.entries.push(ReplayEntry {
            ordinal,
            event_id,
            event_name,
            outcome,
            highlight,
        });
        Ok(&self.entries[ordinal - 1])
    }

    /// Feed a batch of ids in order, returning the new entries
    pub fn replay(&mut self, event_ids: &[u32]) -> Result<Vec<ReplayEntry>> {
        let mut produced = Vec::with_capacity(event_ids.len());
        for &event_id in event_ids {
            produced.push(self.feed(event_id)?.clone());
        }
        Ok(produced)
    }

    /// Highlight that was computed when entry `ordinal` was created
    pub fn select(&self, ordinal: usize) -> Option<&Highlight> {
        ordinal
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
            .map(|entry| &entry.highlight)
    }

    /// Forget the active state and the whole history
    pub fn clear(&mut self) {
        if let Some(state) = self.active_state.take() {
            log::debug!("Clearing replay (was in '{}', {} entries)", state, self.entries.len());
        }
        self.highlighted_transition = None;
        self.entries.clear();
    }

    pub fn active_state(&self) -> Option<&str> {
        self.active_state.as_deref()
    }

    pub fn highlighted_transition(&self) -> Option<&str> {
        self.highlighted_transition.as_deref()
    }

    /// Live highlight, or `None` before the first event
    pub fn current(&self) -> Option<Highlight> {
        self.active_state.as_ref().map(|state| Highlight {
            state: state.clone(),
            transition: self.highlighted_transition.clone(),
        })
    }

    pub fn entries(&self) -> &[ReplayEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventCatalog;

    const GO: u32 = 1;
    const PING: u32 = 2;
    const BACK: u32 = 3;

    fn catalog() -> Arc<dyn NameCatalog> {
        Arc::new(
            EventCatalog::new()
                .with_event(GO, "go")
                .with_event(PING, "ping")
                .with_event(BACK, "back"),
        )
    }

    fn two_state_diagram() -> Arc<DiagramGraph> {
        Arc::new(
            DiagramGraph::new("Test.sm")
                .with_state("S0", true)
                .with_state("S1", false)
                .with_transition("S0", "go", "S1")
                .with_transition("S1", "back", "S0"),
        )
    }

    #[test]
    fn test_matched_transition_moves_active_state() {
        let mut tracker = ReplayTracker::new(two_state_diagram(), catalog());
        let entry = tracker.feed(GO).unwrap().clone();

        assert_eq!(entry.ordinal, 1);
        assert_eq!(
            entry.outcome,
            ReplayOutcome::Matched {
                from: "S0".into(),
                transition: "S0--go-->S1".into(),
                to: "S1".into(),
            }
        );
        assert_eq!(tracker.active_state(), Some("S1"));
        assert_eq!(tracker.highlighted_transition(), Some("S0--go-->S1"));
    }

    #[test]
    fn test_unmatched_event_keeps_state() {
        let mut tracker = ReplayTracker::new(two_state_diagram(), catalog());
        tracker.feed(GO).unwrap();
        let entry = tracker.feed(PING).unwrap().clone();

        assert_eq!(entry.outcome, ReplayOutcome::Unmatched { state: "S1".into() });
        assert_eq!(entry.highlight, Highlight { state: "S1".into(), transition: None });
        assert_eq!(tracker.active_state(), Some("S1"));
        assert_eq!(tracker.highlighted_transition(), None);
    }

    #[test]
    fn test_unmatched_first_event_lands_on_start() {
        let mut tracker = ReplayTracker::new(two_state_diagram(), catalog());
        let entry = tracker.feed(PING).unwrap();
        assert_eq!(entry.outcome, ReplayOutcome::Unmatched { state: "S0".into() });
    }

    #[test]
    fn test_select_is_pure_lookup() {
        let mut tracker = ReplayTracker::new(two_state_diagram(), catalog());
        let ids = [GO, PING, BACK, GO, PING];
        let entries = tracker.replay(&ids).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(tracker.select(5), Some(&entries[4].highlight));

        let before = tracker.current();
        let second = tracker.select(2).cloned().unwrap();
        assert_eq!(second, entries[1].highlight);
        assert_eq!(second, Highlight { state: "S1".into(), transition: None });
        // Selecting history leaves the live pointer alone
        assert_eq!(tracker.current(), before);

        assert_eq!(tracker.select(0), None);
        assert_eq!(tracker.select(6), None);
    }

    #[test]
    fn test_ordinals_follow_arrival() {
        let mut tracker = ReplayTracker::new(two_state_diagram(), catalog());
        let entries = tracker.replay(&[GO, BACK, GO, GO]).unwrap();
        let ordinals: Vec<_> = entries.iter().map(|e| e.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let ids = [GO, PING, BACK, 77, GO, BACK, BACK];
        let mut first = ReplayTracker::new(two_state_diagram(), catalog());
        let mut second = ReplayTracker::new(two_state_diagram(), catalog());
        assert_eq!(first.replay(&ids).unwrap(), second.replay(&ids).unwrap());
    }

    #[test]
    fn test_first_declared_transition_wins() {
        let diagram = Arc::new(
            DiagramGraph::new("dup")
                .with_state("A", true)
                .with_state("B", false)
                .with_state("C", false)
                .with_transition("A", "go", "B")
                .with_transition("A", "go", "C"),
        );
        let mut tracker = ReplayTracker::new(diagram, catalog());
        tracker.feed(GO).unwrap();
        assert_eq!(tracker.active_state(), Some("B"));
    }

    #[test]
    fn test_self_loop() {
        let diagram = Arc::new(
            DiagramGraph::new("loop")
                .with_state("A", true)
                .with_transition("A", "ping", "A"),
        );
        let mut tracker = ReplayTracker::new(diagram, catalog());
        assert!(tracker.feed(PING).unwrap().is_matched());
        assert_eq!(tracker.active_state(), Some("A"));
        assert_eq!(tracker.highlighted_transition(), Some("A--ping-->A"));
    }

    #[test]
    fn test_unknown_event_id_never_matches() {
        let mut tracker = ReplayTracker::new(two_state_diagram(), catalog());
        let entry = tracker.feed(404).unwrap();
        assert_eq!(entry.event_name, "event#404");
        assert!(!entry.is_matched());
    }

    #[test]
    fn test_no_start_state_fails_fast() {
        let diagram = Arc::new(DiagramGraph::new("x").with_state("A", false));
        let mut tracker = ReplayTracker::new(diagram, catalog());
        assert!(matches!(tracker.feed(GO), Err(TraceError::NoStartState)));
        assert!(tracker.is_empty());
        assert_eq!(tracker.active_state(), None);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut tracker = ReplayTracker::new(two_state_diagram(), catalog());
        tracker.replay(&[GO, PING]).unwrap();
        tracker.clear();

        assert!(tracker.is_empty());
        assert_eq!(tracker.current(), None);
        assert_eq!(tracker.select(1), None);

        // Ordinals restart after a clear
        assert_eq!(tracker.feed(GO).unwrap().ordinal, 1);
    }
}
