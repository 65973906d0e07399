//! Registry of live state-machine instances
//!
//! Maps remote addresses to the ordered list of event ids each instance has
//! received. Owned by the listener loop and never shared across threads.

use crate::types::{Address, Result, Timestamp, TraceError};
use chrono::Utc;
use std::collections::HashMap;

/// One traced state-machine instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub address: Address,
    /// Type name announced in the creation frame
    pub type_name: String,
    /// When the creation frame was decoded
    pub created_at: Timestamp,
    /// Event ids in arrival order
    pub event_history: Vec<u32>,
}

/// Per-session instance table
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: HashMap<Address, InstanceRecord>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new instance, replacing any record left under a reused address
    pub fn create(&mut self, address: Address, type_name: impl Into<String>) {
        let record = InstanceRecord {
            address,
            type_name: type_name.into(),
            created_at: Utc::now(),
            event_history: Vec::new(),
        };
        if let Some(previous) = self.instances.insert(address, record) {
            log::debug!(
                "Address {} reused; dropping record of '{}' with {} events",
                address,
                previous.type_name,
                previous.event_history.len()
            );
        }
    }

    /// Append an event id to an instance's history
    ///
    /// Returns the new history length, or `UnknownInstance` if no record
    /// exists (e.g. the creation frame was lost). Nothing is recorded then.
    pub fn event(&mut self, address: Address, event_id: u32) -> Result<usize> {
        let record = self
            .instances
            .get_mut(&address)
            .ok_or(TraceError::UnknownInstance(address))?;
        record.event_history.push(event_id);
        Ok(record.event_history.len())
    }

    /// Remove an instance, returning its final record
    pub fn delete(&mut self, address: Address) -> Result<InstanceRecord> {
        self.instances
            .remove(&address)
            .ok_or(TraceError::UnknownInstance(address))
    }

    /// Event ids received by `address`, in arrival order
    pub fn history_of(&self, address: Address) -> Option<&[u32]> {
        self.instances
            .get(&address)
            .map(|record| record.event_history.as_slice())
    }

    pub fn get(&self, address: Address) -> Option<&InstanceRecord> {
        self.instances.get(&address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.instances.contains_key(&address)
    }

    /// Live addresses in ascending order
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<_> = self.instances.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Forget every instance (session reset)
    pub fn clear(&mut self) {
        self.instances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_follows_arrival_order() {
        let mut registry = InstanceRegistry::new();
        registry.create(Address(1), "Door");

        for (n, id) in [4u32, 2, 4, 9].iter().enumerate() {
            assert_eq!(registry.event(Address(1), *id).unwrap(), n + 1);
        }
        assert_eq!(registry.history_of(Address(1)), Some(&[4, 2, 4, 9][..]));
    }

    #[test]
    fn test_event_after_delete_is_unknown() {
        let mut registry = InstanceRegistry::new();
        registry.create(Address(42), "Foo");
        let record = registry.delete(Address(42)).unwrap();
        assert_eq!(record.type_name, "Foo");

        assert!(matches!(
            registry.event(Address(42), 3),
            Err(TraceError::UnknownInstance(Address(42)))
        ));
        assert_eq!(registry.history_of(Address(42)), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let mut registry = InstanceRegistry::new();
        registry.create(Address(1), "A");
        assert!(registry.delete(Address(2)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reused_address_starts_fresh() {
        let mut registry = InstanceRegistry::new();
        registry.create(Address(8), "Old");
        registry.event(Address(8), 1).unwrap();
        registry.create(Address(8), "New");

        let record = registry.get(Address(8)).unwrap();
        assert_eq!(record.type_name, "New");
        assert!(record.event_history.is_empty());
    }

    #[test]
    fn test_addresses_sorted() {
        let mut registry = InstanceRegistry::new();
        for raw in [30, 10, 20] {
            registry.create(Address(raw), "X");
        }
        assert_eq!(registry.addresses(), vec![Address(10), Address(20), Address(30)]);
        registry.clear();
        assert!(registry.addresses().is_empty());
    }
}
