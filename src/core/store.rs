//! Shared reservation/executable store and reservation tree operations.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::executable::Executable;
use crate::core::repository::Repository;
use crate::core::reservation::{
    Reservation, ReservationDraft, ReservationKind, ReservationRequest, ReservationSummary,
};
use crate::core::{RepositoryError, ReservationError};
use crate::infra::InMemoryRepository;
use crate::util::{RequestId, ReservationId, TimeInterval};

/// Repositories of every stored entity kind.
#[derive(Clone)]
pub struct Store {
    /// Reservation requests.
    pub requests: Arc<dyn Repository<ReservationRequest>>,
    /// Reservation tree nodes.
    pub reservations: Arc<dyn Repository<Reservation>>,
    /// Executables.
    pub executables: Arc<dyn Repository<Executable>>,
}

impl Store {
    /// Store over caller supplied repositories.
    pub fn new(
        requests: Arc<dyn Repository<ReservationRequest>>,
        reservations: Arc<dyn Repository<Reservation>>,
        executables: Arc<dyn Repository<Executable>>,
    ) -> Self {
        Self {
            requests,
            reservations,
            executables,
        }
    }

    /// Store backed by in-memory repositories.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryRepository::<ReservationRequest>::new()),
            Arc::new(InMemoryRepository::<Reservation>::new()),
            Arc::new(InMemoryRepository::<Executable>::new()),
        )
    }

    /// Persist a draft tree for `request_id`, root first.
    ///
    /// `migrate` maps a new node to the reservation of a previous tree it
    /// replaces. On failure every node created so far is removed again.
    ///
    /// # Errors
    ///
    /// The first repository failure.
    pub fn persist_tree(
        &self,
        request_id: RequestId,
        draft: &ReservationDraft,
        migrate: &dyn Fn(&ReservationKind) -> Option<ReservationId>,
    ) -> Result<ReservationId, RepositoryError> {
        let mut created = Vec::new();
        match self.persist_node(request_id, None, draft, migrate, &mut created) {
            Ok(root) => {
                debug!(request_id, root, nodes = created.len(), "reservation tree persisted");
                Ok(root)
            }
            Err(err) => {
                warn!(request_id, error = %err, "persisting reservation tree failed, rolling back");
                for id in created.into_iter().rev() {
                    if let Err(cleanup) = self.reservations.delete(id) {
                        warn!(reservation_id = id, error = %cleanup, "partial node not removed");
                    }
                }
                Err(err)
            }
        }
    }

    fn persist_node(
        &self,
        request_id: RequestId,
        parent_id: Option<ReservationId>,
        draft: &ReservationDraft,
        migrate: &dyn Fn(&ReservationKind) -> Option<ReservationId>,
        created: &mut Vec<ReservationId>,
    ) -> Result<ReservationId, RepositoryError> {
        let mut node = self.reservations.create(Reservation {
            id: 0,
            request_id,
            parent_id,
            interval: draft.interval,
            kind: draft.kind.clone(),
            children: Vec::new(),
            migrate_from: migrate(&draft.kind),
        })?;
        created.push(node.id);
        for child in &draft.children {
            let child_id = self.persist_node(request_id, Some(node.id), child, migrate, created)?;
            node.children.push(child_id);
        }
        if !node.children.is_empty() {
            self.reservations.update(&node)?;
        }
        Ok(node.id)
    }

    /// All nodes of the tree rooted at `root`, parents before children.
    ///
    /// # Errors
    ///
    /// `NotFound` when the root or a referenced child is missing.
    pub fn tree(&self, root: ReservationId) -> Result<Vec<Reservation>, RepositoryError> {
        let mut nodes = Vec::new();
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            let node = self.reservations.load(id)?;
            pending.extend(node.children.iter().rev().copied());
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Delete the tree rooted at `root`, children first.
    ///
    /// # Errors
    ///
    /// `ForeignReleasePending` if a foreign node still holds remote ids; nothing
    /// is deleted then.
    pub fn delete_tree(&self, root: ReservationId) -> Result<Vec<Reservation>, ReservationError> {
        let nodes = self.tree(root)?;
        for node in &nodes {
            if let ReservationKind::Foreign {
                remote_request_ids, ..
            } = &node.kind
            {
                if !remote_request_ids.is_empty() {
                    return Err(ReservationError::ForeignReleasePending {
                        reservation_id: node.id,
                        remaining: remote_request_ids.iter().cloned().collect(),
                    });
                }
            }
        }
        for node in nodes.iter().rev() {
            self.reservations.delete(node.id)?;
        }
        debug!(root, nodes = nodes.len(), "reservation tree deleted");
        Ok(nodes)
    }

    /// Delete the tree rooted at `root` except foreign nodes still holding
    /// remote ids, which are detached and returned.
    ///
    /// # Errors
    ///
    /// The first repository failure.
    pub fn prune_tree(&self, root: ReservationId) -> Result<Vec<Reservation>, RepositoryError> {
        let nodes = self.tree(root)?;
        let mut kept = Vec::new();
        for mut node in nodes.into_iter().rev() {
            if holds_remote_ids(&node.kind) {
                node.parent_id = None;
                node.children.clear();
                self.reservations.update(&node)?;
                kept.push(node);
            } else {
                self.reservations.delete(node.id)?;
            }
        }
        debug!(root, detached = kept.len(), "reservation tree pruned");
        Ok(kept)
    }

    /// Nested view of the tree rooted at `root`.
    ///
    /// # Errors
    ///
    /// `NotFound` when a node is missing.
    pub fn summary(&self, root: ReservationId) -> Result<ReservationSummary, RepositoryError> {
        let node = self.reservations.load(root)?;
        let children = node
            .children
            .iter()
            .map(|child| self.summary(*child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ReservationSummary {
            id: node.id,
            interval: node.interval,
            kind: node.kind,
            children,
        })
    }

    /// Committed reservations overlapping `interval`, skipping those of `exclude`.
    #[must_use]
    pub fn overlapping(
        &self,
        interval: &TimeInterval,
        exclude: Option<RequestId>,
    ) -> Vec<Reservation> {
        self.reservations.find(&|r: &Reservation| {
            Some(r.request_id) != exclude && r.interval.overlaps(interval)
        })
    }
}

/// Foreign node whose remote bookings are not all cancelled yet.
pub fn holds_remote_ids(kind: &ReservationKind) -> bool {
    matches!(
        kind,
        ReservationKind::Foreign { remote_request_ids, .. } if !remote_request_ids.is_empty()
    )
}
