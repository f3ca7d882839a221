use crate::error::{TraceError, TraceResult};
use std::collections::HashMap;

/// Append-only id<->name mapping. Ids are dense and handed out in
/// registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityNameRegistry {
    names: Vec<String>,
    ids: HashMap<String, usize>,
}

impl ActivityNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under `id`, which must be the next free id.
    pub fn register(&mut self, id: usize, name: &str) -> TraceResult<()> {
        if id != self.names.len() {
            return Err(TraceError::Protocol(format!(
                "activity id {} registered out of order (expected {})",
                id,
                self.names.len()
            )));
        }
        if let Some(prev) = self.ids.get(name) {
            return Err(TraceError::Protocol(format!(
                "activity name {:?} already registered as id {}",
                name, prev
            )));
        }
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        Ok(())
    }

    pub fn name_at(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Append every name of `other` not already present, in `other`'s order.
    pub fn merge(&mut self, other: &ActivityNameRegistry) {
        for name in other.names() {
            if !self.contains(name) {
                self.ids.insert(name.clone(), self.names.len());
                self.names.push(name.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_round_trip_through_names() {
        let mut reg = ActivityNameRegistry::new();
        reg.register(0, "Young GC").unwrap();
        reg.register(1, "Full GC").unwrap();

        for id in 0..reg.len() {
            assert_eq!(reg.index_of(reg.name_at(id).unwrap()), Some(id));
        }
        assert_eq!(reg.name_at(2), None);
    }

    #[test]
    fn out_of_order_and_duplicate_are_rejected() {
        let mut reg = ActivityNameRegistry::new();
        assert!(matches!(reg.register(1, "Remark"), Err(TraceError::Protocol(_))));
        reg.register(0, "Remark").unwrap();
        assert!(matches!(reg.register(1, "Remark"), Err(TraceError::Protocol(_))));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn merge_keeps_first_seen_order() {
        let mut a = ActivityNameRegistry::new();
        a.register(0, "Young GC").unwrap();
        a.register(1, "Full GC").unwrap();

        let mut b = ActivityNameRegistry::new();
        b.register(0, "Young GC").unwrap();
        b.register(1, "Initial Mark").unwrap();
        b.register(2, "Remark").unwrap();

        let mut merged = ActivityNameRegistry::new();
        merged.merge(&a);
        merged.merge(&b);
        assert_eq!(
            merged.names(),
            &["Young GC", "Full GC", "Initial Mark", "Remark"]
        );
        assert_eq!(merged.index_of("Remark"), Some(3));
    }
}
