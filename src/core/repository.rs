//! Repository abstraction over stored entities.
//!
//! Only atomic single-entity writes are promised; multi-entity atomicity is
//! handled by the scheduler.

use crate::core::RepositoryError;

/// A storable entity with a repository-assigned `u64` identifier.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human readable kind used in errors.
    const KIND: &'static str;

    /// Current identifier (0 when not yet persisted).
    fn id(&self) -> u64;

    /// Assign the identifier on create.
    fn set_id(&mut self, id: u64);
}

/// Create/update/delete/find over one entity type.
pub trait Repository<E: Entity>: Send + Sync {
    /// Persist a new entity, assigning its identifier.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn create(&self, entity: E) -> Result<E, RepositoryError>;

    /// Replace a stored entity.
    ///
    /// # Errors
    ///
    /// `NotFound` when the entity does not exist.
    fn update(&self, entity: &E) -> Result<(), RepositoryError>;

    /// Remove an entity, returning it.
    ///
    /// # Errors
    ///
    /// `NotFound` when the entity does not exist.
    fn delete(&self, id: u64) -> Result<E, RepositoryError>;

    /// Load by identifier.
    fn get(&self, id: u64) -> Option<E>;

    /// All entities matching `predicate`, in identifier order.
    fn find(&self, predicate: &dyn Fn(&E) -> bool) -> Vec<E>;

    /// Load by identifier or fail with `NotFound`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the entity does not exist.
    fn load(&self, id: u64) -> Result<E, RepositoryError> {
        self.get(id).ok_or(RepositoryError::NotFound { kind: E::KIND, id })
    }
}
