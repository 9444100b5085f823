//! Client-facing mutation API.
//!
//! # Responsibility
//! - Expose vote, task-toggle and basecamp calls with transport-friendly
//!   response envelopes.
//! - Flatten service outcomes into `Ok` (applied or no-op) or [`ApiError`].
//!
//! # Invariants
//! - No-ops are successes.
//! - Every rejection carries its reason, class and the stored version so the
//!   client can decide whether to refetch and retry.
//! - Basecamp conflicts are reported in-band, not as errors.

use crate::clock::Clock;
use crate::model::basecamp::BasecampLocation;
use crate::model::document::DocumentId;
use crate::model::membership::{TripId, UserId};
use crate::model::poll::OptionId;
use crate::repo::document_store::{SqliteDocumentStore, StoreError};
use crate::repo::membership_repo::{RepoError, SqliteMembershipRepository};
use crate::service::basecamp_service::BasecampService;
use crate::service::events::EventSink;
use crate::service::outcome::{ErrorClass, MutationOutcome, MutationReason};
use crate::service::poll_service::PollService;
use crate::service::task_service::TaskService;
use crate::service::ServiceError;
use rusqlite::Connection;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

type Store<'conn> = SqliteDocumentStore<'conn>;
type Members<'conn> = SqliteMembershipRepository<'conn>;

/// Serializable failure envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiError {
    /// Business rejection. Nothing was written.
    Rejected {
        reason: MutationReason,
        class: ErrorClass,
        current_version: i64,
        retryable: bool,
        message: String,
    },
    /// Storage or infrastructure failure.
    Internal { message: String },
}

impl ApiError {
    fn rejected(outcome: &MutationOutcome) -> Self {
        Self::Rejected {
            reason: outcome.reason,
            class: outcome.class().unwrap_or(ErrorClass::Validation),
            current_version: outcome.current_version,
            retryable: outcome.reason.is_retryable(),
            message: format!(
                "mutation rejected: {} (version {})",
                outcome.reason.as_str(),
                outcome.current_version
            ),
        }
    }

    pub fn reason(&self) -> Option<MutationReason> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            Self::Internal { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { retryable: true, .. })
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected { message, .. } | Self::Internal { message } => write!(f, "{message}"),
        }
    }
}

impl Error for ApiError {}

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        Self::Internal {
            message: value.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        Self::from(ServiceError::from(value))
    }
}

impl From<RepoError> for ApiError {
    fn from(value: RepoError) -> Self {
        Self::from(ServiceError::from(value))
    }
}

/// Task toggle response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleTaskResponse {
    pub success: bool,
    pub new_version: i64,
    pub is_completed: bool,
}

/// Basecamp update response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BasecampUpdateResponse {
    pub success: bool,
    pub conflict: bool,
    /// Set on success.
    pub new_version: Option<i64>,
    /// Set on conflict: the version the client must refetch.
    pub current_version: Option<i64>,
}

/// Mutation API bound to one SQLite connection.
pub struct TripSyncApi<'conn> {
    polls: PollService<Store<'conn>, Members<'conn>>,
    tasks: TaskService<Store<'conn>, Members<'conn>>,
    basecamps: BasecampService<Store<'conn>, Members<'conn>>,
}

impl<'conn> TripSyncApi<'conn> {
    /// Builds the API over a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> Result<Self, ApiError> {
        let store = SqliteDocumentStore::try_new(conn)?;
        let members = SqliteMembershipRepository::try_new(conn)?;
        Ok(Self {
            polls: PollService::new(store, members),
            tasks: TaskService::new(store, members),
            basecamps: BasecampService::new(store, members),
        })
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            polls: self.polls.with_clock(Arc::clone(&clock)),
            tasks: self.tasks.with_clock(Arc::clone(&clock)),
            basecamps: self.basecamps.with_clock(clock),
        }
    }

    pub fn with_events(self, events: Arc<dyn EventSink>) -> Self {
        Self {
            polls: self.polls.with_events(Arc::clone(&events)),
            tasks: self.tasks.with_events(Arc::clone(&events)),
            basecamps: self.basecamps.with_events(events),
        }
    }

    /// Poll service for authoring and read views.
    pub fn polls(&self) -> &PollService<Store<'conn>, Members<'conn>> {
        &self.polls
    }

    pub fn tasks(&self) -> &TaskService<Store<'conn>, Members<'conn>> {
        &self.tasks
    }

    pub fn basecamps(&self) -> &BasecampService<Store<'conn>, Members<'conn>> {
        &self.basecamps
    }

    pub fn vote(
        &self,
        poll_id: DocumentId,
        option_id: &str,
        user_id: UserId,
        current_version: Option<i64>,
    ) -> Result<(), ApiError> {
        let outcome = self.polls.vote(poll_id, option_id, user_id, current_version)?;
        into_result(outcome).map(|_| ())
    }

    pub fn vote_batch(
        &self,
        poll_id: DocumentId,
        option_ids: &[OptionId],
        user_id: UserId,
        current_version: Option<i64>,
    ) -> Result<(), ApiError> {
        let outcome = self
            .polls
            .vote_batch(poll_id, option_ids, user_id, current_version)?;
        into_result(outcome).map(|_| ())
    }

    pub fn remove_vote(&self, poll_id: DocumentId, user_id: UserId) -> Result<(), ApiError> {
        let outcome = self.polls.remove_vote(poll_id, user_id)?;
        into_result(outcome).map(|_| ())
    }

    pub fn toggle_task(
        &self,
        task_id: DocumentId,
        user_id: UserId,
        completed: bool,
        current_version: i64,
    ) -> Result<ToggleTaskResponse, ApiError> {
        let toggled =
            self.tasks
                .toggle_completion(task_id, user_id, completed, Some(current_version))?;
        let outcome = into_result(toggled.outcome)?;
        Ok(ToggleTaskResponse {
            success: true,
            new_version: outcome.current_version,
            is_completed: toggled.is_completed,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_basecamp(
        &self,
        trip_id: TripId,
        current_version: i64,
        name: &str,
        address: &str,
        lat: f64,
        lng: f64,
        user_id: UserId,
    ) -> Result<BasecampUpdateResponse, ApiError> {
        let location = BasecampLocation {
            name: name.to_string(),
            address: address.to_string(),
            lat,
            lng,
        };
        let outcome =
            self.basecamps
                .update_basecamp(trip_id, Some(current_version), &location, user_id)?;
        if outcome.conflict {
            return Ok(BasecampUpdateResponse {
                success: false,
                conflict: true,
                new_version: None,
                current_version: Some(outcome.current_version),
            });
        }
        let outcome = into_result(outcome)?;
        Ok(BasecampUpdateResponse {
            success: true,
            conflict: false,
            new_version: Some(outcome.current_version),
            current_version: None,
        })
    }
}

fn into_result(outcome: MutationOutcome) -> Result<MutationOutcome, ApiError> {
    if outcome.is_success() {
        Ok(outcome)
    } else {
        Err(ApiError::rejected(&outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::{into_result, ApiError};
    use crate::service::outcome::{ErrorClass, MutationOutcome, MutationReason};

    #[test]
    fn no_op_is_ok() {
        assert!(into_result(MutationOutcome::no_op(3)).is_ok());
    }

    #[test]
    fn rejection_serializes_reason_and_class() {
        let err = into_result(MutationOutcome::rejected(MutationReason::NotAssigned, 2))
            .expect_err("rejected");
        assert_eq!(err.reason(), Some(MutationReason::NotAssigned));
        assert!(!err.is_retryable());
        let json = serde_json::to_value(&err).expect("error serializes");
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["reason"], "not-assigned");
        assert_eq!(json["class"], "authorization");
        assert_eq!(json["current_version"], 2);
    }

    #[test]
    fn conflict_is_retryable() {
        let err = into_result(MutationOutcome::conflict(7)).expect_err("conflict");
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            ApiError::Rejected {
                class: ErrorClass::VersionConflict,
                current_version: 7,
                ..
            }
        ));
    }
}
