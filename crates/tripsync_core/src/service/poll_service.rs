//! Poll use-case service.
//!
//! # Responsibility
//! - Author, publish and close polls.
//! - Cast, batch-cast and retract votes under optimistic concurrency.
//! - Assemble read views that respect anonymity.
//!
//! # Invariants
//! - Only `active` polls accept ballots, and never after their deadline.
//! - Vote counts are derived server-side; clients never supply counts.
//! - A batch either lands completely at one new version or not at all.
//! - Anonymous polls never persist or expose voter ids.

use crate::clock::{Clock, SystemClock};
use crate::model::capability::Capability;
use crate::model::document::{
    DocumentId, DocumentKind, DocumentPayload, DocumentStatus, VersionedDocument,
};
use crate::model::membership::{TripId, UserId};
use crate::model::poll::{OptionId, Poll, PollCloseReason, PollSettings};
use crate::repo::document_store::{Decision, DocumentState, DocumentStore};
use crate::repo::membership_repo::MembershipOracle;
use crate::service::events::{EventSink, MutationAction, NoopEventSink};
use crate::service::outcome::{CreateOutcome, MutationOutcome, MutationReason};
use crate::service::{authorize, MutationCall, ServiceResult};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

const MODULE: &str = "poll_service";

/// Request to author a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPoll {
    pub trip_id: TripId,
    pub question: String,
    /// `(option_id, text)` pairs in display order.
    pub options: Vec<(OptionId, String)>,
    pub settings: PollSettings,
    pub deadline_ms: Option<i64>,
    /// `true` stores the poll as `active`, `false` as `draft`.
    pub publish: bool,
}

/// Per-option read projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOptionView {
    pub id: OptionId,
    pub text: String,
    pub vote_count: u32,
    /// `None` for anonymous polls.
    pub voters: Option<Vec<UserId>>,
}

/// Poll read projection for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollView {
    pub poll_id: DocumentId,
    pub trip_id: TripId,
    pub version: i64,
    pub status: DocumentStatus,
    pub question: String,
    pub settings: PollSettings,
    pub deadline_ms: Option<i64>,
    pub closed_reason: Option<PollCloseReason>,
    /// Active and before the deadline at read time.
    pub accepting_votes: bool,
    pub total_votes: u64,
    pub options: Vec<PollOptionView>,
    /// Options the viewer currently holds.
    pub viewer_selections: Vec<OptionId>,
}

/// Poll service facade over a document store and membership oracle.
pub struct PollService<S: DocumentStore, M: MembershipOracle> {
    store: S,
    members: M,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl<S: DocumentStore, M: MembershipOracle> PollService<S, M> {
    /// Creates a service with the system clock and no event sink.
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

    /// Authors a poll as `user_id`. Any member allowed to vote may create one.
    pub fn create_poll(&self, user_id: UserId, request: NewPoll) -> ServiceResult<CreateOutcome> {
        let poll_id = Uuid::new_v4();
        let call = MutationCall::start(
            "poll_create",
            MODULE,
            DocumentKind::Poll,
            MutationAction::PollCreated,
            poll_id,
            Some(user_id),
        );

        if let Some(reason) = authorize(&self.members, request.trip_id, user_id, Capability::Vote)? {
            call.finish(self.events.as_ref(), None, MutationOutcome::rejected(reason, 0));
            return Ok(CreateOutcome::rejected(reason));
        }

        let now_ms = self.clock.now_ms();
        let options = request
            .options
            .into_iter()
            .map(|(id, text)| (id.trim().to_string(), text.trim().to_string()));
        let poll = Poll::new(
            request.question.trim(),
            options,
            request.settings,
            request.deadline_ms,
            user_id,
        );
        let deadline_in_past = request.deadline_ms.is_some_and(|deadline| deadline <= now_ms);
        if poll.options.len() < 2
            || poll.options.iter().any(|option| option.text.is_empty())
            || deadline_in_past
            || poll.validate().is_err()
        {
            let reason = MutationReason::InvalidInput;
            call.finish(self.events.as_ref(), None, MutationOutcome::rejected(reason, 0));
            return Ok(CreateOutcome::rejected(reason));
        }

        let status = if request.publish {
            DocumentStatus::Active
        } else {
            DocumentStatus::Draft
        };
        let stored = self.store.insert(request.trip_id, poll_id, status, &poll)?;
        let outcome = call.finish(
            self.events.as_ref(),
            Some(stored.trip_id),
            MutationOutcome::applied(stored.version),
        );
        Ok(CreateOutcome {
            outcome,
            document_id: Some(poll_id),
        })
    }

    /// Moves a draft poll to `active`.
    pub fn publish_poll(
        &self,
        poll_id: DocumentId,
        user_id: UserId,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        let call = MutationCall::start(
            "poll_publish",
            MODULE,
            DocumentKind::Poll,
            MutationAction::PollPublished,
            poll_id,
            Some(user_id),
        );
        let Some(poll) = self.store.load::<Poll>(poll_id)? else {
            return Ok(call.finish(self.events.as_ref(), None, not_found()));
        };
        if let Some(reason) = self.authorize_manage(&poll, user_id)? {
            let outcome = MutationOutcome::rejected(reason, poll.version);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        }

        let cas = self
            .store
            .compare_and_swap(poll.key(), expected_version, |state: &mut DocumentState<Poll>| {
                match state.status {
                    DocumentStatus::Draft => {
                        state.status = DocumentStatus::Active;
                        Decision::Write
                    }
                    DocumentStatus::Active => Decision::Skip(MutationReason::NoOp),
                    DocumentStatus::Closed => Decision::Skip(MutationReason::Closed),
                }
            })?;
        let outcome = MutationOutcome::from_cas(cas);
        Ok(call.finish(self.events.as_ref(), Some(poll.trip_id), outcome))
    }

    /// Closes a poll on behalf of its creator or a poll manager.
    pub fn close_poll(
        &self,
        poll_id: DocumentId,
        user_id: UserId,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        let call = MutationCall::start(
            "poll_close",
            MODULE,
            DocumentKind::Poll,
            MutationAction::PollClosed,
            poll_id,
            Some(user_id),
        );
        let Some(poll) = self.store.load::<Poll>(poll_id)? else {
            return Ok(call.finish(self.events.as_ref(), None, not_found()));
        };
        if let Some(reason) = self.authorize_manage(&poll, user_id)? {
            let outcome = MutationOutcome::rejected(reason, poll.version);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        }

        let cas = self.store.compare_and_swap(
            poll.key(),
            expected_version,
            |state: &mut DocumentState<Poll>| close(state, PollCloseReason::Admin),
        )?;
        let outcome = MutationOutcome::from_cas(cas);
        Ok(call.finish(self.events.as_ref(), Some(poll.trip_id), outcome))
    }

    /// System sweep: closes an active poll whose deadline has passed.
    ///
    /// Returns `no-op` when the poll is not active or still open.
    pub fn close_if_expired(&self, poll_id: DocumentId) -> ServiceResult<MutationOutcome> {
        let call = MutationCall::start(
            "poll_expire",
            MODULE,
            DocumentKind::Poll,
            MutationAction::PollClosed,
            poll_id,
            None,
        );
        let Some(poll) = self.store.load::<Poll>(poll_id)? else {
            return Ok(call.finish(self.events.as_ref(), None, not_found()));
        };

        let now_ms = self.clock.now_ms();
        let cas = self
            .store
            .compare_and_swap(poll.key(), None, |state: &mut DocumentState<Poll>| {
                if state.status != DocumentStatus::Active || !state.payload.deadline_passed(now_ms) {
                    return Decision::Skip(MutationReason::NoOp);
                }
                close(state, PollCloseReason::Deadline)
            })?;
        let outcome = MutationOutcome::from_cas(cas);
        Ok(call.finish(self.events.as_ref(), Some(poll.trip_id), outcome))
    }

    /// Casts one vote for `option_id`.
    pub fn vote(
        &self,
        poll_id: DocumentId,
        option_id: &str,
        user_id: UserId,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        self.cast_ballot(
            "poll_vote",
            poll_id,
            &[option_id.to_string()],
            user_id,
            expected_version,
        )
    }

    /// Casts several votes in one versioned write.
    pub fn vote_batch(
        &self,
        poll_id: DocumentId,
        option_ids: &[OptionId],
        user_id: UserId,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        self.cast_ballot("poll_vote_batch", poll_id, option_ids, user_id, expected_version)
    }

    /// Retracts every vote of `user_id`.
    ///
    /// Allowed in any poll status, so ballots stay retractable after a close
    /// or deadline. Last-writer-wins and idempotent.
    pub fn remove_vote(&self, poll_id: DocumentId, user_id: UserId) -> ServiceResult<MutationOutcome> {
        let call = MutationCall::start(
            "poll_remove_vote",
            MODULE,
            DocumentKind::Poll,
            MutationAction::VoteRemoved,
            poll_id,
            Some(user_id),
        );
        let Some(poll) = self.store.load::<Poll>(poll_id)? else {
            return Ok(call.finish(self.events.as_ref(), None, not_found()));
        };
        if let Some(reason) = authorize(&self.members, poll.trip_id, user_id, Capability::Vote)? {
            let outcome = MutationOutcome::rejected(reason, poll.version);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        }

        let cas = self
            .store
            .compare_and_swap(poll.key(), None, |state: &mut DocumentState<Poll>| {
                if !state.payload.settings.allow_vote_change {
                    return Decision::Skip(MutationReason::VoteChangeDisabled);
                }
                if state.payload.remove_votes(poll_id, user_id) {
                    Decision::Write
                } else {
                    Decision::Skip(MutationReason::NoOp)
                }
            })?;
        let outcome = MutationOutcome::from_cas(cas);
        Ok(call.finish(self.events.as_ref(), Some(poll.trip_id), outcome))
    }

    /// Reads a poll as `viewer_id`. Non-members see nothing.
    pub fn get_poll(&self, poll_id: DocumentId, viewer_id: UserId) -> ServiceResult<Option<PollView>> {
        let Some(poll) = self.store.load::<Poll>(poll_id)? else {
            return Ok(None);
        };
        if !self.members.is_active_member(poll.trip_id, viewer_id)? {
            return Ok(None);
        }
        Ok(Some(poll_view(&poll, viewer_id, self.clock.now_ms())))
    }

    fn cast_ballot(
        &self,
        event: &'static str,
        poll_id: DocumentId,
        option_ids: &[OptionId],
        user_id: UserId,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        let call = MutationCall::start(
            event,
            MODULE,
            DocumentKind::Poll,
            MutationAction::VoteCast,
            poll_id,
            Some(user_id),
        );
        let Some(poll) = self.store.load::<Poll>(poll_id)? else {
            return Ok(call.finish(self.events.as_ref(), None, not_found()));
        };
        let now_ms = self.clock.now_ms();
        if let Some(reason) = self.voting_gate(&poll, user_id, now_ms)? {
            let outcome = MutationOutcome::rejected(reason, poll.version);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        }

        let requested: BTreeSet<OptionId> = option_ids.iter().cloned().collect();
        let cas = self.store.compare_and_swap(
            poll.key(),
            expected_version,
            |state: &mut DocumentState<Poll>| {
                if let Some(reason) = state_gate(state, now_ms) {
                    return Decision::Skip(reason);
                }
                match apply_ballot(&mut state.payload, poll_id, user_id, &requested) {
                    MutationReason::Ok => Decision::Write,
                    reason => Decision::Skip(reason),
                }
            },
        )?;
        let outcome = MutationOutcome::from_cas(cas);
        Ok(call.finish(self.events.as_ref(), Some(poll.trip_id), outcome))
    }

    /// Membership, status and deadline checks done before taking the lock.
    fn voting_gate(
        &self,
        poll: &VersionedDocument<Poll>,
        user_id: UserId,
        now_ms: i64,
    ) -> ServiceResult<Option<MutationReason>> {
        if let Some(reason) = authorize(&self.members, poll.trip_id, user_id, Capability::Vote)? {
            return Ok(Some(reason));
        }
        Ok(status_gate(poll.status, &poll.payload, now_ms))
    }

    fn authorize_manage(
        &self,
        poll: &VersionedDocument<Poll>,
        user_id: UserId,
    ) -> ServiceResult<Option<MutationReason>> {
        if !self.members.is_active_member(poll.trip_id, user_id)? {
            return Ok(Some(MutationReason::NotAMember));
        }
        if poll.payload.created_by == user_id
            || self
                .members
                .has_capability(poll.trip_id, user_id, Capability::ManagePoll)?
        {
            return Ok(None);
        }
        Ok(Some(MutationReason::Forbidden))
    }
}

fn not_found() -> MutationOutcome {
    MutationOutcome::rejected(MutationReason::NotFound, 0)
}

fn status_gate(status: DocumentStatus, poll: &Poll, now_ms: i64) -> Option<MutationReason> {
    if status != DocumentStatus::Active {
        return Some(MutationReason::Closed);
    }
    if poll.deadline_passed(now_ms) {
        return Some(MutationReason::DeadlinePassed);
    }
    None
}

fn state_gate(state: &DocumentState<Poll>, now_ms: i64) -> Option<MutationReason> {
    status_gate(state.status, &state.payload, now_ms)
}

fn close(state: &mut DocumentState<Poll>, reason: PollCloseReason) -> Decision<MutationReason> {
    if state.status == DocumentStatus::Closed {
        return Decision::Skip(MutationReason::NoOp);
    }
    state.status = DocumentStatus::Closed;
    state.payload.closed_reason = Some(reason);
    Decision::Write
}

/// Applies ballot rules to `poll`. Returns `Ok` iff the poll was mutated.
///
/// Rule order: empty batch, batch size, unknown option, idempotent re-vote,
/// vote change, single-select. Nothing is touched unless every check
/// passes.
fn apply_ballot(
    poll: &mut Poll,
    poll_id: DocumentId,
    user_id: UserId,
    requested: &BTreeSet<OptionId>,
) -> MutationReason {
    if requested.is_empty() {
        return MutationReason::InvalidOption;
    }
    if requested.len() > 1 && !poll.settings.allow_multiple {
        return MutationReason::TooManyOptions;
    }

    if requested.iter().any(|option_id| !poll.has_option(option_id)) {
        return MutationReason::InvalidOption;
    }

    let held = poll.selections(poll_id, user_id);
    let fresh: Vec<&OptionId> = requested.difference(&held).collect();
    if fresh.is_empty() {
        return MutationReason::NoOp;
    }
    if !held.is_empty() {
        if !poll.settings.allow_vote_change {
            return MutationReason::AlreadyVoted;
        }
        if !poll.settings.allow_multiple {
            return MutationReason::AlreadyVoted;
        }
    }

    for option_id in fresh {
        poll.record_vote(poll_id, option_id, user_id);
    }
    MutationReason::Ok
}

fn poll_view(poll: &VersionedDocument<Poll>, viewer_id: UserId, now_ms: i64) -> PollView {
    let anonymous = poll.payload.settings.is_anonymous;
    let options = poll
        .payload
        .options
        .iter()
        .map(|option| PollOptionView {
            id: option.id.clone(),
            text: option.text.clone(),
            vote_count: option.vote_count(),
            voters: if anonymous {
                None
            } else {
                option.voters().map(|voters| voters.iter().copied().collect())
            },
        })
        .collect();

    PollView {
        poll_id: poll.document_id,
        trip_id: poll.trip_id,
        version: poll.version,
        status: poll.status,
        question: poll.payload.question.clone(),
        settings: poll.payload.settings,
        deadline_ms: poll.payload.deadline_ms,
        closed_reason: poll.payload.closed_reason,
        accepting_votes: status_gate(poll.status, &poll.payload, now_ms).is_none(),
        total_votes: poll.payload.total_votes(),
        options,
        viewer_selections: poll
            .payload
            .selections(poll.document_id, viewer_id)
            .into_iter()
            .collect(),
    }
}
