//! Get-or-create registry of canonical entities.

use std::collections::HashMap;
use std::sync::Mutex;

use super::entity::{EntityCandidate, EntityRecord};

/// Deduplicates entity candidates by canonical id.
///
/// Passed explicitly into every extraction call; implementations must be
/// safe to share between concurrent ingestions.
pub trait EntityStore: Send + Sync {
    /// Return the canonical record for the candidate, creating it on first
    /// sight. Attributes missing on the stored record are filled from the
    /// candidate when both are the same kind.
    fn get_or_create(&self, candidate: &EntityCandidate) -> EntityRecord;

    fn get(&self, id: &str) -> Option<EntityRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    entities: Mutex<HashMap<String, EntityRecord>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, EntityRecord>> {
        self.entities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EntityStore for InMemoryEntityStore {
    fn get_or_create(&self, candidate: &EntityCandidate) -> EntityRecord {
        let id = candidate.id();
        let mut entities = self.lock();
        let record = entities.entry(id.clone()).or_insert_with(|| EntityRecord {
            id,
            name: candidate.name.split_whitespace().collect::<Vec<_>>().join(" "),
            kind: candidate.kind.clone(),
        });
        record.kind.merge_missing(&candidate.kind);
        record.clone()
    }

    fn get(&self, id: &str) -> Option<EntityRecord> {
        self.lock().get(id).cloned()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::entity::{entity_id, EntityKind};
    use std::sync::Arc;

    #[test]
    fn test_same_canonical_name_converges() {
        let store = InMemoryEntityStore::new();
        let a = store.get_or_create(&EntityCandidate::new("Germany", EntityKind::topic()));
        let b = store.get_or_create(&EntityCandidate::new(" GERMANY", EntityKind::topic()));
        assert_eq!(a.id, b.id);
        assert_eq!(b.name, "Germany");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_later_sighting_fills_attributes() {
        let store = InMemoryEntityStore::new();
        store.get_or_create(&EntityCandidate::new("Anna Weber", EntityKind::person()));
        let merged = store.get_or_create(&EntityCandidate::new(
            "anna weber",
            EntityKind::Person {
                role: Some("Trade attaché".into()),
                organization: None,
            },
        ));
        assert_eq!(
            merged.kind,
            EntityKind::Person {
                role: Some("Trade attaché".into()),
                organization: None,
            }
        );
        assert_eq!(store.get(&entity_id("Anna Weber")), Some(merged));
    }

    #[test]
    fn test_first_seen_kind_wins() {
        let store = InMemoryEntityStore::new();
        store.get_or_create(&EntityCandidate::new("Mercosur", EntityKind::topic()));
        let again = store.get_or_create(&EntityCandidate::new(
            "Mercosur",
            EntityKind::Organization {
                org_type: Some("trade bloc".into()),
            },
        ));
        assert_eq!(again.kind, EntityKind::topic());
    }

    #[test]
    fn test_shared_across_threads() {
        let store = Arc::new(InMemoryEntityStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.get_or_create(&EntityCandidate::new("Brazil", EntityKind::topic()));
                    store.get_or_create(&EntityCandidate::new(
                        format!("Topic {}", i % 2),
                        EntityKind::topic(),
                    ));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 3);
        assert!(!store.is_empty());
    }
}
