//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate membership checks and versioned document writes into
//!   mutation use-cases.
//! - Keep API layers decoupled from storage details.
//!
//! # Invariants
//! - Authorization is checked before any document write is attempted.
//! - Events and read-view assembly happen outside the document critical
//!   section.

use crate::model::capability::Capability;
use crate::model::document::{DocumentId, DocumentKind};
use crate::model::membership::{TripId, UserId};
use crate::repo::document_store::StoreError;
use crate::repo::membership_repo::{MembershipOracle, RepoError};
use crate::service::events::{emit_best_effort, EventSink, MutationAction, MutationEvent};
use crate::service::outcome::{log_outcome, MutationOutcome, MutationReason};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub mod basecamp_service;
pub mod events;
pub mod outcome;
pub mod poll_service;
pub mod task_service;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Infrastructure failure of a mutation service.
///
/// Rejections (not a member, closed poll, stale version...) are reported as
/// [`outcome::MutationOutcome`] values instead.
#[derive(Debug)]
pub enum ServiceError {
    Store(StoreError),
    Membership(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Membership(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Membership(err) => Some(err),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Membership(value)
    }
}

/// Returns the rejection reason for `user_id` acting with `capability`, or
/// `None` when the action is allowed.
pub(crate) fn authorize<M: MembershipOracle>(
    members: &M,
    trip_id: TripId,
    user_id: UserId,
    capability: Capability,
) -> ServiceResult<Option<MutationReason>> {
    if !members.is_active_member(trip_id, user_id)? {
        return Ok(Some(MutationReason::NotAMember));
    }
    if !members.has_capability(trip_id, user_id, capability)? {
        return Ok(Some(MutationReason::Forbidden));
    }
    Ok(None)
}

/// Bookkeeping for one mutation call: timing, logging and event emission.
pub(crate) struct MutationCall {
    event: &'static str,
    module: &'static str,
    kind: DocumentKind,
    action: MutationAction,
    document_id: DocumentId,
    actor_id: Option<UserId>,
    started_at: Instant,
}

impl MutationCall {
    pub(crate) fn start(
        event: &'static str,
        module: &'static str,
        kind: DocumentKind,
        action: MutationAction,
        document_id: DocumentId,
        actor_id: Option<UserId>,
    ) -> Self {
        Self {
            event,
            module,
            kind,
            action,
            document_id,
            actor_id,
            started_at: Instant::now(),
        }
    }

    /// Logs the outcome and, when it was applied, publishes the event.
    ///
    /// Must be called after the document write has committed.
    pub(crate) fn finish(
        self,
        sink: &dyn EventSink,
        trip_id: Option<TripId>,
        outcome: MutationOutcome,
    ) -> MutationOutcome {
        log_outcome(
            self.event,
            self.module,
            self.document_id,
            &outcome,
            self.started_at,
        );
        if let (true, Some(trip_id)) = (outcome.applied, trip_id) {
            emit_best_effort(
                sink,
                MutationEvent {
                    kind: self.kind,
                    action: self.action,
                    trip_id,
                    document_id: self.document_id,
                    actor_id: self.actor_id,
                    version: outcome.current_version,
                },
            );
        }
        outcome
    }
}
