//! In-memory repository backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core::repository::{Entity, Repository};
use crate::core::RepositoryError;

/// Repository keeping entities in an ordered map for development/testing.
pub struct InMemoryRepository<E> {
    entities: RwLock<BTreeMap<u64, E>>,
    next_id: AtomicU64,
}

impl<E> InMemoryRepository<E> {
    /// Create an empty repository; identifiers start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl<E> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    fn create(&self, mut entity: E) -> Result<E, RepositoryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entity.set_id(id);
        self.entities.write().insert(id, entity.clone());
        Ok(entity)
    }

    fn update(&self, entity: &E) -> Result<(), RepositoryError> {
        let mut entities = self.entities.write();
        let slot = entities
            .get_mut(&entity.id())
            .ok_or(RepositoryError::NotFound {
                kind: E::KIND,
                id: entity.id(),
            })?;
        *slot = entity.clone();
        Ok(())
    }

    fn delete(&self, id: u64) -> Result<E, RepositoryError> {
        self.entities
            .write()
            .remove(&id)
            .ok_or(RepositoryError::NotFound { kind: E::KIND, id })
    }

    fn get(&self, id: u64) -> Option<E> {
        self.entities.read().get(&id).cloned()
    }

    fn find(&self, predicate: &dyn Fn(&E) -> bool) -> Vec<E> {
        self.entities
            .read()
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: u64,
        text: String,
    }

    impl Entity for Note {
        const KIND: &'static str = "note";

        fn id(&self) -> u64 {
            self.id
        }

        fn set_id(&mut self, id: u64) {
            self.id = id;
        }
    }

    fn note(text: &str) -> Note {
        Note {
            id: 0,
            text: text.into(),
        }
    }

    #[test]
    fn test_create_assigns_increasing_ids() {
        let repo = InMemoryRepository::new();
        let a = repo.create(note("a")).unwrap();
        let b = repo.create(note("b")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn test_update_and_delete_missing() {
        let repo = InMemoryRepository::<Note>::new();
        let missing = Note {
            id: 7,
            text: "x".into(),
        };
        assert!(matches!(
            repo.update(&missing),
            Err(RepositoryError::NotFound { kind: "note", id: 7 })
        ));
        assert!(repo.delete(7).is_err());
    }

    #[test]
    fn test_find_by_predicate_in_id_order() {
        let repo = InMemoryRepository::new();
        for text in ["keep-1", "drop", "keep-2"] {
            repo.create(note(text)).unwrap();
        }
        let kept = repo.find(&|n: &Note| n.text.starts_with("keep"));
        let texts: Vec<_> = kept.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, ["keep-1", "keep-2"]);
    }
}
