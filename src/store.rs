//! Key-value state for the caller layer, such as remembered output names.
//!
//! The reconciliation core never sees a store; callers that want to remember
//! something between steps get one injected.

use std::collections::HashMap;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: String);
}

/// Store that lives for one process run.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites_previous_value() {
        let mut store = MemoryStore::new();
        assert!(store.get("last_output").is_none());
        store.put("last_output", "a.csv".into());
        store.put("last_output", "b.csv".into());
        assert_eq!(store.get("last_output").as_deref(), Some("b.csv"));
        assert_eq!(store.len(), 1);
    }
}
