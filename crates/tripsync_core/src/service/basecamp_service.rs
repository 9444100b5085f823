//! Basecamp use-case service.
//!
//! The basecamp document of a trip shares the trip id. Updates replace the
//! whole location; concurrent editors holding the same version race and the
//! loser receives a conflict with the winner's version.

use crate::clock::{Clock, SystemClock};
use crate::model::basecamp::{Basecamp, BasecampLocation};
use crate::model::capability::Capability;
use crate::model::document::{DocumentKind, VersionedDocument};
use crate::model::membership::{TripId, UserId};
use crate::repo::document_store::{Decision, DocumentState, DocumentStore};
use crate::repo::membership_repo::MembershipOracle;
use crate::service::events::{EventSink, MutationAction, NoopEventSink};
use crate::service::outcome::{MutationOutcome, MutationReason};
use crate::service::{authorize, MutationCall, ServiceResult};
use serde::Serialize;
use std::sync::Arc;

const MODULE: &str = "basecamp_service";

/// Basecamp read projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasecampView {
    pub trip_id: TripId,
    pub version: i64,
    pub location: Option<BasecampLocation>,
    pub updated_by: Option<UserId>,
    pub updated_at: Option<i64>,
}

/// Basecamp service facade over a document store and membership oracle.
pub struct BasecampService<S: DocumentStore, M: MembershipOracle> {
    store: S,
    members: M,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl<S: DocumentStore, M: MembershipOracle> BasecampService<S, M> {
    pub fn new(store: S, members: M) -> Self {
        Self {
            store,
            members,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the trip basecamp with `location`.
    pub fn update_basecamp(
        &self,
        trip_id: TripId,
        expected_version: Option<i64>,
        location: &BasecampLocation,
        user_id: UserId,
    ) -> ServiceResult<MutationOutcome> {
        let normalized = location.normalized();
        self.write_location(
            "basecamp_update",
            trip_id,
            expected_version,
            user_id,
            Some(normalized.ok_or(MutationReason::InvalidLocation)),
        )
    }

    /// Removes the trip basecamp. `no-op` when none is set.
    pub fn clear_basecamp(
        &self,
        trip_id: TripId,
        expected_version: Option<i64>,
        user_id: UserId,
    ) -> ServiceResult<MutationOutcome> {
        self.write_location("basecamp_clear", trip_id, expected_version, user_id, None)
    }

    /// Reads the trip basecamp. Non-members see nothing.
    pub fn get_basecamp(
        &self,
        trip_id: TripId,
        viewer_id: UserId,
    ) -> ServiceResult<Option<BasecampView>> {
        let Some(basecamp) = self.store.load::<Basecamp>(trip_id)? else {
            return Ok(None);
        };
        if basecamp.trip_id != trip_id || !self.members.is_active_member(trip_id, viewer_id)? {
            return Ok(None);
        }
        Ok(Some(basecamp_view(basecamp)))
    }

    /// `replacement` is `None` to clear, `Some(Err)` for a rejected location.
    fn write_location(
        &self,
        event: &'static str,
        trip_id: TripId,
        expected_version: Option<i64>,
        user_id: UserId,
        replacement: Option<Result<BasecampLocation, MutationReason>>,
    ) -> ServiceResult<MutationOutcome> {
        let call = MutationCall::start(
            event,
            MODULE,
            DocumentKind::Basecamp,
            MutationAction::BasecampUpdated,
            trip_id,
            Some(user_id),
        );
        let Some(basecamp) = self.store.load::<Basecamp>(trip_id)? else {
            let outcome = MutationOutcome::rejected(MutationReason::NotFound, 0);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        };
        if let Some(reason) = authorize(&self.members, trip_id, user_id, Capability::EditLocation)? {
            let outcome = MutationOutcome::rejected(reason, basecamp.version);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        }
        let location = match replacement {
            Some(Ok(location)) => Some(location),
            Some(Err(reason)) => {
                let outcome = MutationOutcome::rejected(reason, basecamp.version);
                return Ok(call.finish(self.events.as_ref(), None, outcome));
            }
            None => None,
        };

        let now_ms = self.clock.now_ms();
        let cas = self.store.compare_and_swap(
            basecamp.key(),
            expected_version,
            |state: &mut DocumentState<Basecamp>| {
                if location.is_none() && state.payload.location.is_none() {
                    return Decision::Skip(MutationReason::NoOp);
                }
                state.payload = Basecamp {
                    location,
                    updated_by: Some(user_id),
                    updated_at: Some(now_ms),
                };
                Decision::Write
            },
        )?;
        let outcome = MutationOutcome::from_cas(cas);
        Ok(call.finish(self.events.as_ref(), Some(trip_id), outcome))
    }
}

fn basecamp_view(basecamp: VersionedDocument<Basecamp>) -> BasecampView {
    BasecampView {
        trip_id: basecamp.trip_id,
        version: basecamp.version,
        location: basecamp.payload.location,
        updated_by: basecamp.payload.updated_by,
        updated_at: basecamp.payload.updated_at,
    }
}
