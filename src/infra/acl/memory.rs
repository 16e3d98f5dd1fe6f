//! In-memory ACL with a cached per-user role index.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use crate::core::authorization::{
    AclRecord, Authorization, EntityRef, Permission, Role, SecurityToken,
};
use crate::util::UserId;

type RoleIndex = HashMap<(UserId, EntityRef), HashSet<Role>>;

/// ACL store for development/testing. Records and tokens are administered
/// here; the index used by permission checks is rebuilt after `invalidate`.
#[derive(Default)]
pub struct InMemoryAcl {
    records: RwLock<Vec<AclRecord>>,
    tokens: RwLock<HashMap<SecurityToken, UserId>>,
    administrators: RwLock<HashSet<UserId>>,
    index: RwLock<Option<RoleIndex>>,
}

impl InMemoryAcl {
    /// Empty ACL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a token to a user.
    pub fn add_token(&self, token: SecurityToken, user_id: impl Into<UserId>) {
        self.tokens.write().insert(token, user_id.into());
    }

    /// Grant a user every permission on every entity.
    pub fn add_administrator(&self, user_id: impl Into<UserId>) {
        self.administrators.write().insert(user_id.into());
    }

    /// Store a record and invalidate the cached index.
    pub fn grant(&self, record: AclRecord) {
        self.records.write().push(record);
        self.invalidate();
    }

    /// Remove all roles of a user on an entity.
    pub fn revoke(&self, user_id: &str, entity: &EntityRef) {
        self.records
            .write()
            .retain(|r| !(r.user_id == user_id && &r.entity == entity));
        self.invalidate();
    }

    /// Drop the cached role index.
    pub fn invalidate(&self) {
        *self.index.write() = None;
    }

    fn roles(&self, user_id: &str, entity: &EntityRef) -> HashSet<Role> {
        if let Some(index) = self.index.read().as_ref() {
            return index
                .get(&(user_id.to_string(), entity.clone()))
                .cloned()
                .unwrap_or_default();
        }
        let mut index = RoleIndex::new();
        for record in self.records.read().iter() {
            index
                .entry((record.user_id.clone(), record.entity.clone()))
                .or_default()
                .insert(record.role);
        }
        debug!(entries = index.len(), "acl index rebuilt");
        let roles = index
            .get(&(user_id.to_string(), entity.clone()))
            .cloned()
            .unwrap_or_default();
        *self.index.write() = Some(index);
        roles
    }
}

impl Authorization for InMemoryAcl {
    fn has_permission(
        &self,
        token: &SecurityToken,
        entity: &EntityRef,
        permission: Permission,
    ) -> bool {
        let Some(user_id) = self.user_id(token) else {
            return false;
        };
        if self.administrators.read().contains(&user_id) {
            return true;
        }
        self.roles(&user_id, entity)
            .into_iter()
            .any(|role| role.grants(permission))
    }

    fn user_id(&self, token: &SecurityToken) -> Option<UserId> {
        self.tokens.read().get(token).cloned()
    }
}
