//! Task document payload.
//!
//! # Invariants
//! - `TaskCompletion::completed_at` is `Some` iff `completed` is `true`.
//! - When `assignees` is non-empty, only assignees and the creator may toggle
//!   completion.

use crate::model::document::{DocumentKind, DocumentPayload};
use crate::model::membership::UserId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Completion state of one task for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub completed: bool,
    /// Epoch ms.
    pub completed_at: Option<i64>,
}

impl TaskCompletion {
    pub fn completed_at(now_ms: i64) -> Self {
        Self {
            completed: true,
            completed_at: Some(now_ms),
        }
    }

    pub fn pending() -> Self {
        Self {
            completed: false,
            completed_at: None,
        }
    }

    fn is_consistent(&self) -> bool {
        self.completed == self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    pub created_by: UserId,
    #[serde(default)]
    pub assignees: BTreeSet<UserId>,
    #[serde(default)]
    pub completions: BTreeMap<UserId, TaskCompletion>,
}

impl DocumentPayload for Task {
    const KIND: DocumentKind = DocumentKind::Task;

    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("task title is blank".to_string());
        }
        match self
            .completions
            .iter()
            .find(|(_, completion)| !completion.is_consistent())
        {
            Some((user_id, _)) => Err(format!(
                "task completion for {user_id} has inconsistent completed_at"
            )),
            None => Ok(()),
        }
    }
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        created_by: UserId,
        assignees: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            title: title.into(),
            created_by,
            assignees: assignees.into_iter().collect(),
            completions: BTreeMap::new(),
        }
    }

    /// Tasks with at least one assignee restrict who may toggle completion.
    pub fn is_assignment_gated(&self) -> bool {
        !self.assignees.is_empty()
    }

    /// Whether `user_id` passes the assignment gate.
    pub fn may_toggle(&self, user_id: UserId) -> bool {
        !self.is_assignment_gated()
            || self.assignees.contains(&user_id)
            || self.created_by == user_id
    }

    pub fn is_completed_by(&self, user_id: UserId) -> bool {
        self.completions
            .get(&user_id)
            .is_some_and(|completion| completion.completed)
    }

    /// Upserts the completion row of `user_id`. Returns `false` when the
    /// stored state already equals `completed`.
    pub fn set_completion(&mut self, user_id: UserId, completed: bool, now_ms: i64) -> bool {
        if self.is_completed_by(user_id) == completed {
            return false;
        }
        let completion = if completed {
            TaskCompletion::completed_at(now_ms)
        } else {
            TaskCompletion::pending()
        };
        self.completions.insert(user_id, completion);
        true
    }
}
