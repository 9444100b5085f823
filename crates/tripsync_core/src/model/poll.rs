//! Poll document payload.
//!
//! # Responsibility
//! - Hold poll question, options, voting settings and tallies.
//! - Provide vote bookkeeping primitives used by the poll service.
//!
//! # Invariants
//! - Option ids are unique and non-empty.
//! - Named polls keep a voter set per option; the vote count is always the
//!   size of that set and is never stored separately.
//! - Anonymous polls keep an authoritative counter per option plus an opaque
//!   ballot map (token -> chosen option ids). User ids are never stored.
//! - Every option tally mode matches `settings.is_anonymous`.

use crate::model::document::{DocumentId, DocumentKind, DocumentPayload};
use crate::model::membership::UserId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Client-visible option identifier, unique within one poll.
pub type OptionId = String;

/// Opaque per-poll ballot token for anonymous polls.
pub type BallotToken = Uuid;

/// Voting rules fixed at poll creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PollSettings {
    pub allow_multiple: bool,
    pub allow_vote_change: bool,
    pub is_anonymous: bool,
}

/// Why a poll stopped accepting votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollCloseReason {
    Deadline,
    Admin,
}

/// Per-option vote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Tally {
    Named { voters: BTreeSet<UserId> },
    Anonymous { count: u32 },
}

impl Tally {
    fn empty(anonymous: bool) -> Self {
        if anonymous {
            Self::Anonymous { count: 0 }
        } else {
            Self::Named {
                voters: BTreeSet::new(),
            }
        }
    }

    fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
    pub tally: Tally,
}

impl PollOption {
    /// Server-side vote count.
    pub fn vote_count(&self) -> u32 {
        match &self.tally {
            Tally::Named { voters } => u32::try_from(voters.len()).unwrap_or(u32::MAX),
            Tally::Anonymous { count } => *count,
        }
    }

    /// Voters of a named poll option. `None` for anonymous polls.
    pub fn voters(&self) -> Option<&BTreeSet<UserId>> {
        match &self.tally {
            Tally::Named { voters } => Some(voters),
            Tally::Anonymous { .. } => None,
        }
    }
}

/// Poll payload stored in a versioned document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    pub options: Vec<PollOption>,
    pub settings: PollSettings,
    /// Epoch ms after which votes are rejected.
    pub deadline_ms: Option<i64>,
    pub created_by: UserId,
    pub closed_reason: Option<PollCloseReason>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    ballots: BTreeMap<BallotToken, BTreeSet<OptionId>>,
}

impl DocumentPayload for Poll {
    const KIND: DocumentKind = DocumentKind::Poll;

    fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("poll question is blank".to_string());
        }
        if self.options.is_empty() {
            return Err("poll has no options".to_string());
        }
        let mut seen = BTreeSet::new();
        for option in &self.options {
            if option.id.trim().is_empty() {
                return Err("poll option id is blank".to_string());
            }
            if !seen.insert(option.id.as_str()) {
                return Err(format!("duplicate poll option id `{}`", option.id));
            }
            if option.tally.is_anonymous() != self.settings.is_anonymous {
                return Err(format!(
                    "option `{}` tally mode does not match poll anonymity",
                    option.id
                ));
            }
        }
        if !self.settings.is_anonymous && !self.ballots.is_empty() {
            return Err("named poll must not carry anonymous ballots".to_string());
        }
        for chosen in self.ballots.values() {
            if chosen.len() > 1 && !self.settings.allow_multiple {
                return Err("single-select poll ballot holds several options".to_string());
            }
        }
        Ok(())
    }
}

impl Poll {
    /// Builds a poll with empty tallies. `options` is `(id, text)` pairs.
    pub fn new(
        question: impl Into<String>,
        options: impl IntoIterator<Item = (OptionId, String)>,
        settings: PollSettings,
        deadline_ms: Option<i64>,
        created_by: UserId,
    ) -> Self {
        let options = options
            .into_iter()
            .map(|(id, text)| PollOption {
                id,
                text,
                tally: Tally::empty(settings.is_anonymous),
            })
            .collect();
        Self {
            question: question.into(),
            options,
            settings,
            deadline_ms,
            created_by,
            closed_reason: None,
            ballots: BTreeMap::new(),
        }
    }

    /// Derives the ballot token of `user_id` for the poll `poll_id`.
    ///
    /// Tokens are namespaced per poll so they cannot be joined across polls.
    pub fn ballot_token(poll_id: DocumentId, user_id: UserId) -> BallotToken {
        Uuid::new_v5(&poll_id, user_id.as_bytes())
    }

    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn has_option(&self, option_id: &str) -> bool {
        self.option(option_id).is_some()
    }

    pub fn deadline_passed(&self, now_ms: i64) -> bool {
        self.deadline_ms.is_some_and(|deadline| now_ms > deadline)
    }

    /// Total votes across all options.
    pub fn total_votes(&self) -> u64 {
        self.options
            .iter()
            .map(|option| u64::from(option.vote_count()))
            .sum()
    }

    /// Option ids currently chosen by `user_id`.
    pub fn selections(&self, poll_id: DocumentId, user_id: UserId) -> BTreeSet<OptionId> {
        if self.settings.is_anonymous {
            return self
                .ballots
                .get(&Self::ballot_token(poll_id, user_id))
                .cloned()
                .unwrap_or_default();
        }

        self.options
            .iter()
            .filter(|option| {
                option
                    .voters()
                    .is_some_and(|voters| voters.contains(&user_id))
            })
            .map(|option| option.id.clone())
            .collect()
    }

    /// Records one vote. Returns `false` when the option is unknown or the
    /// user already holds it.
    pub fn record_vote(&mut self, poll_id: DocumentId, option_id: &str, user_id: UserId) -> bool {
        let anonymous = self.settings.is_anonymous;
        let Some(option) = self.options.iter_mut().find(|option| option.id == option_id) else {
            return false;
        };

        match &mut option.tally {
            Tally::Named { voters } => voters.insert(user_id),
            Tally::Anonymous { count } if anonymous => {
                let ballot = self
                    .ballots
                    .entry(Self::ballot_token(poll_id, user_id))
                    .or_default();
                if !ballot.insert(option_id.to_string()) {
                    return false;
                }
                *count = count.saturating_add(1);
                true
            }
            Tally::Anonymous { .. } => false,
        }
    }

    /// Removes every vote of `user_id`. Returns whether anything changed.
    pub fn remove_votes(&mut self, poll_id: DocumentId, user_id: UserId) -> bool {
        if self.settings.is_anonymous {
            let Some(chosen) = self.ballots.remove(&Self::ballot_token(poll_id, user_id)) else {
                return false;
            };
            for option in &mut self.options {
                if let Tally::Anonymous { count } = &mut option.tally {
                    if chosen.contains(&option.id) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
            return !chosen.is_empty();
        }

        let mut removed = false;
        for option in &mut self.options {
            if let Tally::Named { voters } = &mut option.tally {
                removed |= voters.remove(&user_id);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{Poll, PollSettings, Tally};
    use crate::model::document::DocumentPayload;
    use uuid::Uuid;

    fn options() -> Vec<(String, String)> {
        vec![
            ("a".to_string(), "Lisbon".to_string()),
            ("b".to_string(), "Porto".to_string()),
        ]
    }

    #[test]
    fn named_counts_are_derived_from_voter_sets() {
        let poll_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut poll = Poll::new("Where?", options(), PollSettings::default(), None, user);

        assert!(poll.record_vote(poll_id, "a", user));
        assert!(!poll.record_vote(poll_id, "a", user));
        assert_eq!(poll.option("a").map(|o| o.vote_count()), Some(1));
        assert_eq!(poll.selections(poll_id, user).len(), 1);

        assert!(poll.remove_votes(poll_id, user));
        assert_eq!(poll.total_votes(), 0);
        assert!(!poll.remove_votes(poll_id, user));
    }

    #[test]
    fn anonymous_polls_never_store_user_ids() {
        let poll_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let settings = PollSettings {
            is_anonymous: true,
            ..PollSettings::default()
        };
        let mut poll = Poll::new("Where?", options(), settings, None, Uuid::new_v4());

        assert!(poll.record_vote(poll_id, "b", user));
        assert!(poll.option("b").and_then(|o| o.voters()).is_none());
        assert_eq!(poll.option("b").map(|o| o.vote_count()), Some(1));

        let json = serde_json::to_string(&poll).expect("poll serializes");
        assert!(!json.contains(&user.to_string()));
        assert_eq!(
            poll.selections(poll_id, user).into_iter().collect::<Vec<_>>(),
            vec!["b".to_string()]
        );

        assert!(poll.remove_votes(poll_id, user));
        assert_eq!(poll.option("b").map(|o| o.vote_count()), Some(0));
    }

    #[test]
    fn ballot_tokens_differ_between_polls() {
        let user = Uuid::new_v4();
        assert_ne!(
            Poll::ballot_token(Uuid::new_v4(), user),
            Poll::ballot_token(Uuid::new_v4(), user)
        );
    }

    #[test]
    fn validate_rejects_duplicate_ids_and_mixed_tallies() {
        let user = Uuid::new_v4();
        let mut poll = Poll::new(
            "Where?",
            vec![
                ("a".to_string(), "x".to_string()),
                ("a".to_string(), "y".to_string()),
            ],
            PollSettings::default(),
            None,
            user,
        );
        assert!(poll.validate().is_err());

        poll.options[1].id = "b".to_string();
        assert!(poll.validate().is_ok());

        poll.options[1].tally = Tally::Anonymous { count: 3 };
        assert!(poll.validate().is_err());
    }

    #[test]
    fn deadline_is_exclusive() {
        let poll = Poll::new(
            "When?",
            options(),
            PollSettings::default(),
            Some(1_000),
            Uuid::new_v4(),
        );
        assert!(!poll.deadline_passed(1_000));
        assert!(poll.deadline_passed(1_001));
    }
}
