//! Uniform result reporting for document mutations.
//!
//! # Responsibility
//! - Normalize every service outcome into `{applied, conflict,
//!   current_version, reason}`.
//! - Classify rejection reasons so clients branch on one enum.
//!
//! # Invariants
//! - `applied` implies `reason == Ok` and `current_version` is the new
//!   version.
//! - `conflict` implies `reason == VersionConflict`.
//! - Rejected and no-op outcomes report the unchanged stored version.

use crate::model::document::DocumentId;
use crate::repo::document_store::CasOutcome;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Why a mutation did or did not change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationReason {
    Ok,
    NoOp,
    NotAMember,
    NotAssigned,
    /// Active member whose role lacks the needed capability.
    Forbidden,
    NotFound,
    Closed,
    DeadlinePassed,
    AlreadyVoted,
    VoteChangeDisabled,
    VersionConflict,
    InvalidOption,
    TooManyOptions,
    InvalidLocation,
    InvalidInput,
}

/// Client handling class of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller may not perform the action. Never retried.
    Authorization,
    /// Document state forbids the action. Never retried as-is.
    State,
    /// Stale client version. Retry after refetch.
    VersionConflict,
    /// Malformed request. A client bug.
    Validation,
}

impl MutationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoOp => "no-op",
            Self::NotAMember => "not-a-member",
            Self::NotAssigned => "not-assigned",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::Closed => "closed",
            Self::DeadlinePassed => "deadline-passed",
            Self::AlreadyVoted => "already-voted",
            Self::VoteChangeDisabled => "vote-change-disabled",
            Self::VersionConflict => "version-conflict",
            Self::InvalidOption => "invalid-option",
            Self::TooManyOptions => "too-many-options",
            Self::InvalidLocation => "invalid-location",
            Self::InvalidInput => "invalid-input",
        }
    }

    /// Error class, or `None` for successful reasons.
    pub fn class(self) -> Option<ErrorClass> {
        match self {
            Self::Ok | Self::NoOp => None,
            Self::NotAMember | Self::NotAssigned | Self::Forbidden => {
                Some(ErrorClass::Authorization)
            }
            Self::Closed | Self::DeadlinePassed | Self::AlreadyVoted | Self::VoteChangeDisabled => {
                Some(ErrorClass::State)
            }
            Self::VersionConflict => Some(ErrorClass::VersionConflict),
            Self::NotFound
            | Self::InvalidOption
            | Self::TooManyOptions
            | Self::InvalidLocation
            | Self::InvalidInput => Some(ErrorClass::Validation),
        }
    }

    /// Only version conflicts are safe to retry automatically.
    pub fn is_retryable(self) -> bool {
        self == Self::VersionConflict
    }
}

/// Normalized mutation result handed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub applied: bool,
    pub conflict: bool,
    pub current_version: i64,
    pub reason: MutationReason,
}

impl MutationOutcome {
    pub fn applied(new_version: i64) -> Self {
        Self {
            applied: true,
            conflict: false,
            current_version: new_version,
            reason: MutationReason::Ok,
        }
    }

    pub fn no_op(current_version: i64) -> Self {
        Self {
            applied: false,
            conflict: false,
            current_version,
            reason: MutationReason::NoOp,
        }
    }

    pub fn conflict(current_version: i64) -> Self {
        Self {
            applied: false,
            conflict: true,
            current_version,
            reason: MutationReason::VersionConflict,
        }
    }

    /// Builds a rejection. `Ok`/`NoOp`/`VersionConflict` map to their
    /// dedicated constructors so the struct invariants hold.
    pub fn rejected(reason: MutationReason, current_version: i64) -> Self {
        match reason {
            MutationReason::NoOp => Self::no_op(current_version),
            MutationReason::VersionConflict => Self::conflict(current_version),
            MutationReason::Ok => Self::applied(current_version),
            reason => Self {
                applied: false,
                conflict: false,
                current_version,
                reason,
            },
        }
    }

    /// Converts a store outcome. `NotFound` reports version 0.
    pub fn from_cas(outcome: CasOutcome<MutationReason>) -> Self {
        match outcome {
            CasOutcome::Applied { new_version } => Self::applied(new_version),
            CasOutcome::Skipped {
                current_version,
                reason,
            } => Self::rejected(reason, current_version),
            CasOutcome::Conflict { current_version } => Self::conflict(current_version),
            CasOutcome::NotFound => Self::rejected(MutationReason::NotFound, 0),
        }
    }

    /// Applied or harmless no-op.
    pub fn is_success(&self) -> bool {
        self.applied || self.reason == MutationReason::NoOp
    }

    pub fn class(&self) -> Option<ErrorClass> {
        self.reason.class()
    }

    fn status_label(&self) -> &'static str {
        if self.applied {
            "applied"
        } else if self.conflict {
            "conflict"
        } else if self.reason == MutationReason::NoOp {
            "no_op"
        } else {
            "rejected"
        }
    }
}

/// Result of authoring a new document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub outcome: MutationOutcome,
    /// Set iff the document was stored.
    pub document_id: Option<DocumentId>,
}

impl CreateOutcome {
    pub fn rejected(reason: MutationReason) -> Self {
        Self {
            outcome: MutationOutcome::rejected(reason, 0),
            document_id: None,
        }
    }
}

/// Emits the one-line mutation log event shared by all services.
pub(crate) fn log_outcome(
    event: &str,
    module: &str,
    document_id: DocumentId,
    outcome: &MutationOutcome,
    started_at: Instant,
) {
    if outcome.applied {
        info!(
            "event={} module={} status={} document_id={} version={} duration_ms={}",
            event,
            module,
            outcome.status_label(),
            document_id,
            outcome.current_version,
            started_at.elapsed().as_millis()
        );
    } else {
        debug!(
            "event={} module={} status={} reason={} document_id={} version={} duration_ms={}",
            event,
            module,
            outcome.status_label(),
            outcome.reason.as_str(),
            document_id,
            outcome.current_version,
            started_at.elapsed().as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorClass, MutationOutcome, MutationReason};
    use crate::repo::document_store::CasOutcome;

    #[test]
    fn cas_outcomes_map_to_uniform_shape() {
        assert_eq!(
            MutationOutcome::from_cas(CasOutcome::Applied { new_version: 4 }),
            MutationOutcome::applied(4)
        );
        assert_eq!(
            MutationOutcome::from_cas(CasOutcome::Conflict { current_version: 6 }),
            MutationOutcome::conflict(6)
        );
        let skipped = MutationOutcome::from_cas(CasOutcome::Skipped {
            current_version: 2,
            reason: MutationReason::NoOp,
        });
        assert!(skipped.is_success());
        assert!(!skipped.applied);
        assert_eq!(
            MutationOutcome::from_cas(CasOutcome::NotFound).reason,
            MutationReason::NotFound
        );
    }

    #[test]
    fn rejected_keeps_flags_consistent() {
        let conflict = MutationOutcome::rejected(MutationReason::VersionConflict, 3);
        assert!(conflict.conflict);
        let closed = MutationOutcome::rejected(MutationReason::Closed, 3);
        assert!(!closed.applied && !closed.conflict);
        assert_eq!(closed.class(), Some(ErrorClass::State));
    }

    #[test]
    fn only_version_conflicts_are_retryable() {
        assert!(MutationReason::VersionConflict.is_retryable());
        assert!(!MutationReason::NotAMember.is_retryable());
        assert!(!MutationReason::DeadlinePassed.is_retryable());
    }

    #[test]
    fn reasons_serialize_as_kebab_case() {
        let json = serde_json::to_string(&MutationOutcome::rejected(
            MutationReason::NotAMember,
            1,
        ))
        .expect("outcome serializes");
        assert!(json.contains("\"reason\":\"not-a-member\""));
        assert_eq!(
            serde_json::to_string(&MutationReason::NoOp).expect("reason serializes"),
            format!("\"{}\"", MutationReason::NoOp.as_str())
        );
    }
}
