//! Event name catalog
//!
//! The wire protocol carries numeric event ids; the diagram is labelled with
//! names. The catalog bridges the two.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resolves wire event ids to human-readable names
pub trait NameCatalog: Send + Sync {
    /// Name of the event with the given id
    fn event_name(&self, id: u32) -> Option<&str>;
}

/// One `{id, name}` pair as it appears in a catalog file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: u32,
    pub name: String,
}

/// On-disk shape of a catalog: an `[[events]]` list
#[derive(Debug, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub events: Vec<CatalogEntry>,
}

/// In-memory catalog backed by a hash map
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "CatalogFile")]
pub struct EventCatalog {
    events: HashMap<u32, String>,
}

impl From<CatalogFile> for EventCatalog {
    fn from(file: CatalogFile) -> Self {
        let mut catalog = EventCatalog::new();
        for entry in file.events {
            catalog.add_event(entry.id, entry.name);
        }
        catalog
    }
}

impl EventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event name; a later entry for the same id wins
    pub fn add_event(&mut self, id: u32, name: impl Into<String>) {
        let name = name.into();
        if let Some(previous) = self.events.insert(id, name.clone()) {
            log::warn!("Event id {} renamed from '{}' to '{}'", id, previous, name);
        }
    }

    /// Builder method: add an event name
    pub fn with_event(mut self, id: u32, name: impl Into<String>) -> Self {
        self.add_event(id, name);
        self
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }
}

impl NameCatalog for EventCatalog {
    fn event_name(&self, id: u32) -> Option<&str> {
        self.events.get(&id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_lookup() {
        let catalog = EventCatalog::new().with_event(1, "go");
        assert_eq!(catalog.event_name(1), Some("go"));
        assert_eq!(catalog.event_name(2), None);
    }

    #[test]
    fn test_deserialize_entry_list() {
        let json = r#"{
            "events": [ { "id": 1, "name": "go" }, { "id": 2, "name": "ping" } ]
        }"#;
        let catalog: EventCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.num_events(), 2);
        assert_eq!(catalog.event_name(2), Some("ping"));
    }

    #[test]
    fn test_later_entry_wins() {
        let catalog = EventCatalog::new().with_event(3, "old").with_event(3, "new");
        assert_eq!(catalog.event_name(3), Some("new"));
    }
}
