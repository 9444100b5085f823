//! Task use-case service.
//!
//! # Responsibility
//! - Author tasks and maintain their assignee set.
//! - Toggle per-user completion under optimistic concurrency.
//!
//! # Invariants
//! - Tasks with assignees may only be toggled by assignees or the creator.
//! - Re-applying the current completion state is a `no-op` without a version
//!   bump, but a stale `expected_version` still yields a conflict.

use crate::clock::{Clock, SystemClock};
use crate::model::capability::Capability;
use crate::model::document::{
    DocumentId, DocumentKind, DocumentPayload, DocumentStatus, VersionedDocument,
};
use crate::model::membership::{TripId, UserId};
use crate::model::task::Task;
use crate::repo::document_store::{Decision, DocumentState, DocumentStore};
use crate::repo::membership_repo::MembershipOracle;
use crate::service::events::{EventSink, MutationAction, NoopEventSink};
use crate::service::outcome::{CreateOutcome, MutationOutcome, MutationReason};
use crate::service::{authorize, MutationCall, ServiceResult};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const MODULE: &str = "task_service";

/// Request to author a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub trip_id: TripId,
    pub title: String,
    /// Empty means any member may complete the task.
    pub assignees: Vec<UserId>,
}

/// Completion toggle result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub outcome: MutationOutcome,
    /// Completion state of the caller after the call.
    pub is_completed: bool,
}

/// Task read projection for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    pub task_id: DocumentId,
    pub trip_id: TripId,
    pub version: i64,
    pub status: DocumentStatus,
    pub title: String,
    pub created_by: UserId,
    pub assignees: Vec<UserId>,
    pub completed_by: Vec<UserId>,
    pub viewer_completed: bool,
    pub viewer_may_toggle: bool,
}

/// Task service facade over a document store and membership oracle.
pub struct TaskService<S: DocumentStore, M: MembershipOracle> {
    store: S,
    members: M,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl<S: DocumentStore, M: MembershipOracle> TaskService<S, M> {
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

    /// Authors an active task. Assignees must be active trip members.
    pub fn create_task(&self, user_id: UserId, request: NewTask) -> ServiceResult<CreateOutcome> {
        let task_id = Uuid::new_v4();
        let call = MutationCall::start(
            "task_create",
            MODULE,
            DocumentKind::Task,
            MutationAction::TaskCreated,
            task_id,
            Some(user_id),
        );

        if let Some(reason) =
            authorize(&self.members, request.trip_id, user_id, Capability::ManageTask)?
        {
            call.finish(self.events.as_ref(), None, MutationOutcome::rejected(reason, 0));
            return Ok(CreateOutcome::rejected(reason));
        }

        let mut assignees_valid = true;
        for assignee in &request.assignees {
            if !self.members.is_active_member(request.trip_id, *assignee)? {
                assignees_valid = false;
                break;
            }
        }
        let task = Task::new(request.title.trim(), user_id, request.assignees);
        if !assignees_valid || task.validate().is_err() {
            let reason = MutationReason::InvalidInput;
            call.finish(self.events.as_ref(), None, MutationOutcome::rejected(reason, 0));
            return Ok(CreateOutcome::rejected(reason));
        }

        let stored = self
            .store
            .insert(request.trip_id, task_id, DocumentStatus::Active, &task)?;
        let outcome = call.finish(
            self.events.as_ref(),
            Some(stored.trip_id),
            MutationOutcome::applied(stored.version),
        );
        Ok(CreateOutcome {
            outcome,
            document_id: Some(task_id),
        })
    }

    /// Sets the caller's completion flag to `completed`.
    pub fn toggle_completion(
        &self,
        task_id: DocumentId,
        user_id: UserId,
        completed: bool,
        expected_version: Option<i64>,
    ) -> ServiceResult<ToggleOutcome> {
        let call = MutationCall::start(
            "task_toggle",
            MODULE,
            DocumentKind::Task,
            MutationAction::TaskCompletionChanged,
            task_id,
            Some(user_id),
        );
        let Some(task) = self.store.load::<Task>(task_id)? else {
            let outcome = call.finish(self.events.as_ref(), None, not_found());
            return Ok(ToggleOutcome {
                outcome,
                is_completed: false,
            });
        };
        let was_completed = task.payload.is_completed_by(user_id);

        let reason = match authorize(&self.members, task.trip_id, user_id, Capability::CompleteTask)? {
            Some(reason) => Some(reason),
            None if !task.payload.may_toggle(user_id) => Some(MutationReason::NotAssigned),
            None => None,
        };
        if let Some(reason) = reason {
            let outcome = MutationOutcome::rejected(reason, task.version);
            return Ok(ToggleOutcome {
                outcome: call.finish(self.events.as_ref(), None, outcome),
                is_completed: was_completed,
            });
        }

        let now_ms = self.clock.now_ms();
        let cas = self
            .store
            .compare_and_swap(task.key(), expected_version, |state: &mut DocumentState<Task>| {
                if !state.payload.may_toggle(user_id) {
                    return Decision::Skip(MutationReason::NotAssigned);
                }
                if state.payload.set_completion(user_id, completed, now_ms) {
                    Decision::Write
                } else {
                    Decision::Skip(MutationReason::NoOp)
                }
            })?;
        let outcome = call.finish(
            self.events.as_ref(),
            Some(task.trip_id),
            MutationOutcome::from_cas(cas),
        );
        let is_completed = if outcome.is_success() {
            completed
        } else {
            was_completed
        };
        Ok(ToggleOutcome {
            outcome,
            is_completed,
        })
    }

    /// Adds `assignee` to the task. Requires `manage_task`.
    pub fn assign_task(
        &self,
        task_id: DocumentId,
        user_id: UserId,
        assignee: UserId,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        self.change_assignment("task_assign", task_id, user_id, assignee, true, expected_version)
    }

    /// Removes `assignee` from the task. Requires `manage_task`.
    ///
    /// Completion rows of the removed assignee are kept.
    pub fn unassign_task(
        &self,
        task_id: DocumentId,
        user_id: UserId,
        assignee: UserId,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        self.change_assignment("task_unassign", task_id, user_id, assignee, false, expected_version)
    }

    /// Reads a task as `viewer_id`. Non-members see nothing.
    pub fn get_task(&self, task_id: DocumentId, viewer_id: UserId) -> ServiceResult<Option<TaskView>> {
        let Some(task) = self.store.load::<Task>(task_id)? else {
            return Ok(None);
        };
        if !self.members.is_active_member(task.trip_id, viewer_id)? {
            return Ok(None);
        }
        Ok(Some(task_view(&task, viewer_id)))
    }

    fn change_assignment(
        &self,
        event: &'static str,
        task_id: DocumentId,
        user_id: UserId,
        assignee: UserId,
        assign: bool,
        expected_version: Option<i64>,
    ) -> ServiceResult<MutationOutcome> {
        let call = MutationCall::start(
            event,
            MODULE,
            DocumentKind::Task,
            MutationAction::TaskAssignmentChanged,
            task_id,
            Some(user_id),
        );
        let Some(task) = self.store.load::<Task>(task_id)? else {
            return Ok(call.finish(self.events.as_ref(), None, not_found()));
        };
        if let Some(reason) = authorize(&self.members, task.trip_id, user_id, Capability::ManageTask)? {
            let outcome = MutationOutcome::rejected(reason, task.version);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        }
        if assign && !self.members.is_active_member(task.trip_id, assignee)? {
            let outcome = MutationOutcome::rejected(MutationReason::InvalidInput, task.version);
            return Ok(call.finish(self.events.as_ref(), None, outcome));
        }

        let cas = self
            .store
            .compare_and_swap(task.key(), expected_version, |state: &mut DocumentState<Task>| {
                let changed = if assign {
                    state.payload.assignees.insert(assignee)
                } else {
                    state.payload.assignees.remove(&assignee)
                };
                if changed {
                    Decision::Write
                } else {
                    Decision::Skip(MutationReason::NoOp)
                }
            })?;
        let outcome = MutationOutcome::from_cas(cas);
        Ok(call.finish(self.events.as_ref(), Some(task.trip_id), outcome))
    }
}

fn not_found() -> MutationOutcome {
    MutationOutcome::rejected(MutationReason::NotFound, 0)
}

fn task_view(task: &VersionedDocument<Task>, viewer_id: UserId) -> TaskView {
    TaskView {
        task_id: task.document_id,
        trip_id: task.trip_id,
        version: task.version,
        status: task.status,
        title: task.payload.title.clone(),
        created_by: task.payload.created_by,
        assignees: task.payload.assignees.iter().copied().collect(),
        completed_by: task
            .payload
            .completions
            .iter()
            .filter(|(_, completion)| completion.completed)
            .map(|(user_id, _)| *user_id)
            .collect(),
        viewer_completed: task.payload.is_completed_by(viewer_id),
        viewer_may_toggle: task.payload.may_toggle(viewer_id),
    }
}
