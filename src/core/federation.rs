//! Delegation of bookings to cooperating foreign domains.
//!
//! Calls into a foreign domain are never retried here: a timeout or protocol
//! failure ends the current allocation attempt and the caller decides whether
//! to try again. Cancellation is per remote id so that a partial failure stays
//! visible in the reservation and can be retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DomainConfig;
use crate::core::reservation::{Reservation, ReservationKind, Specification};
use crate::core::ForeignDomainError;
use crate::util::TimeInterval;

/// A foreign domain as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignDomain {
    /// Domain identity.
    pub name: String,
    /// Administrative API address.
    pub url: String,
    /// Bound on each call.
    pub timeout: Duration,
}

impl From<&DomainConfig> for ForeignDomain {
    fn from(cfg: &DomainConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            url: cfg.url.clone(),
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }
}

/// What is asked of a foreign domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBookingRequest {
    /// Interval to book.
    pub interval: TimeInterval,
    /// Specification forwarded as-is.
    pub specification: Specification,
    /// Human readable description stored in the foreign reservation.
    pub description: String,
}

/// Answer of a foreign domain to a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteAllocation {
    /// Booked under the given remote request id.
    Allocated(String),
    /// The domain cannot satisfy the request; try the next one.
    Unavailable(String),
}

/// Administrative API of foreign domains (consumed).
#[async_trait]
pub trait ForeignDomainClient: Send + Sync {
    /// Create a remote reservation request.
    async fn allocate(
        &self,
        domain: &ForeignDomain,
        request: &RemoteBookingRequest,
    ) -> Result<RemoteAllocation, ForeignDomainError>;

    /// Cancel a remote reservation request.
    async fn cancel(&self, domain: &ForeignDomain, remote_request_id: &str)
        -> Result<(), ForeignDomainError>;
}

/// A successful remote booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBooking {
    /// Domain holding the booking.
    pub domain: String,
    /// Remote request id.
    pub remote_request_id: String,
}

/// Result of releasing a foreign reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Remote ids cancelled in this call.
    pub cancelled: Vec<String>,
    /// Remote ids still held.
    pub remaining: Vec<String>,
    /// One warning per failed cancellation.
    pub warnings: Vec<String>,
}

impl ReleaseOutcome {
    /// Whether no remote id is left.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Delegates to the configured foreign domains in order.
#[derive(Clone)]
pub struct Federation {
    domains: Vec<ForeignDomain>,
    client: Option<Arc<dyn ForeignDomainClient>>,
}

impl Federation {
    /// Federation over `domains`, tried in the given order.
    pub fn new(domains: Vec<ForeignDomain>, client: Arc<dyn ForeignDomainClient>) -> Self {
        Self {
            domains,
            client: Some(client),
        }
    }

    /// No foreign domains.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            domains: Vec::new(),
            client: None,
        }
    }

    /// Whether delegation is possible at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.client.is_some() && !self.domains.is_empty()
    }

    /// Configured domains.
    #[must_use]
    pub fn domains(&self) -> &[ForeignDomain] {
        &self.domains
    }

    /// Issue one booking to `domain`, bounded by its timeout.
    ///
    /// # Errors
    ///
    /// `ForeignDomainError` on timeout, transport or protocol failure.
    pub async fn delegate(
        &self,
        request: &RemoteBookingRequest,
        domain: &ForeignDomain,
    ) -> Result<RemoteAllocation, ForeignDomainError> {
        let client = self.client(domain)?;
        debug!(domain = %domain.name, url = %domain.url, "delegating booking");
        match tokio::time::timeout(domain.timeout, client.allocate(domain, request)).await {
            Ok(result) => result,
            Err(_) => Err(ForeignDomainError::new(
                &domain.name,
                &domain.url,
                format!("no answer within {:?}", domain.timeout),
            )),
        }
    }

    /// Book `request` on the first domain that accepts it.
    ///
    /// `Ok(None)` means every domain answered unavailable.
    ///
    /// # Errors
    ///
    /// The first `ForeignDomainError`; later domains are not tried.
    pub async fn book(
        &self,
        request: &RemoteBookingRequest,
    ) -> Result<Option<RemoteBooking>, ForeignDomainError> {
        for domain in &self.domains {
            match self.delegate(request, domain).await? {
                RemoteAllocation::Allocated(remote_request_id) => {
                    info!(domain = %domain.name, remote_request_id = %remote_request_id, "foreign booking created");
                    return Ok(Some(RemoteBooking {
                        domain: domain.name.clone(),
                        remote_request_id,
                    }));
                }
                RemoteAllocation::Unavailable(reason) => {
                    debug!(domain = %domain.name, reason = %reason, "foreign domain unavailable");
                }
            }
        }
        Ok(None)
    }

    /// Book every part or none.
    ///
    /// Bookings already created are cancelled when a later part fails or
    /// cannot be placed anywhere.
    ///
    /// # Errors
    ///
    /// The `ForeignDomainError` that stopped the delegation.
    pub async fn book_all(
        &self,
        parts: &[RemoteBookingRequest],
    ) -> Result<Option<Vec<RemoteBooking>>, ForeignDomainError> {
        let mut booked = Vec::with_capacity(parts.len());
        for part in parts {
            match self.book(part).await {
                Ok(Some(booking)) => booked.push(booking),
                Ok(None) => {
                    self.rollback(&booked).await;
                    return Ok(None);
                }
                Err(err) => {
                    self.rollback(&booked).await;
                    return Err(err);
                }
            }
        }
        Ok(Some(booked))
    }

    /// Cancel bookings that were not persisted, logging failures.
    pub async fn rollback(&self, bookings: &[RemoteBooking]) {
        for booking in bookings {
            let Some(domain) = self.domain(&booking.domain) else {
                warn!(domain = %booking.domain, "cannot roll back booking of unknown domain");
                continue;
            };
            if let Err(err) = self.cancel(domain, &booking.remote_request_id).await {
                warn!(error = %err, remote_request_id = %booking.remote_request_id, "rollback of foreign booking failed");
            }
        }
    }

    /// Cancel every remote id of a foreign reservation.
    ///
    /// Cancelled ids are removed from the reservation; failed ones stay and
    /// are reported as warnings. Non-foreign reservations are left alone.
    pub async fn release(&self, reservation: &mut Reservation) -> ReleaseOutcome {
        let mut outcome = ReleaseOutcome::default();
        let ReservationKind::Foreign {
            domain,
            remote_request_ids,
            ..
        } = &mut reservation.kind
        else {
            return outcome;
        };

        let Some(target) = self.domain(domain).cloned() else {
            outcome.remaining = remote_request_ids.iter().cloned().collect();
            outcome
                .warnings
                .push(format!("foreign domain `{domain}` is not configured"));
            return outcome;
        };

        let ids: Vec<String> = remote_request_ids.iter().cloned().collect();
        for id in ids {
            match self.cancel(&target, &id).await {
                Ok(()) => {
                    remote_request_ids.remove(&id);
                    outcome.cancelled.push(id);
                }
                Err(err) => {
                    warn!(error = %err, remote_request_id = %id, "foreign cancellation failed");
                    outcome.warnings.push(err.to_string());
                    outcome.remaining.push(id);
                }
            }
        }
        outcome
    }

    async fn cancel(&self, domain: &ForeignDomain, remote_request_id: &str) -> Result<(), ForeignDomainError> {
        let client = self.client(domain)?;
        match tokio::time::timeout(domain.timeout, client.cancel(domain, remote_request_id)).await {
            Ok(result) => result,
            Err(_) => Err(ForeignDomainError::new(
                &domain.name,
                &domain.url,
                format!("no answer within {:?}", domain.timeout),
            )),
        }
    }

    fn domain(&self, name: &str) -> Option<&ForeignDomain> {
        self.domains.iter().find(|d| d.name == name)
    }

    fn client(&self, domain: &ForeignDomain) -> Result<&Arc<dyn ForeignDomainClient>, ForeignDomainError> {
        self.client.as_ref().ok_or_else(|| {
            ForeignDomainError::new(&domain.name, &domain.url, "no foreign domain client configured")
        })
    }
}
