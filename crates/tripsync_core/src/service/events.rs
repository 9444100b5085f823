//! Post-commit mutation events for the notification subsystem.
//!
//! Events are emitted after the document write commits and outside its
//! critical section. Delivery is best-effort: a failing sink is logged and
//! never turns a committed mutation into an error.

use crate::model::document::{DocumentId, DocumentKind};
use crate::model::membership::{TripId, UserId};
use log::warn;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Sender;

/// What happened to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    PollCreated,
    PollPublished,
    PollClosed,
    VoteCast,
    VoteRemoved,
    TaskCreated,
    TaskAssignmentChanged,
    TaskCompletionChanged,
    BasecampUpdated,
}

/// Committed mutation notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationEvent {
    pub kind: DocumentKind,
    pub action: MutationAction,
    pub trip_id: TripId,
    pub document_id: DocumentId,
    /// `None` for system actions such as deadline closing.
    pub actor_id: Option<UserId>,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSinkError(pub String);

impl Display for EventSinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "event sink unavailable: {}", self.0)
    }
}

impl Error for EventSinkError {}

/// Consumer of committed mutation events. Implementations must not block on
/// downstream availability.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &MutationEvent) -> Result<(), EventSinkError>;
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: &MutationEvent) -> Result<(), EventSinkError> {
        Ok(())
    }
}

/// Forwards events to an unbounded channel drained by a worker.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: Sender<MutationEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: Sender<MutationEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: &MutationEvent) -> Result<(), EventSinkError> {
        self.sender
            .send(event.clone())
            .map_err(|_| EventSinkError("receiver dropped".to_string()))
    }
}

/// Publishes and swallows sink failures.
pub(crate) fn emit_best_effort(sink: &dyn EventSink, event: MutationEvent) {
    if let Err(err) = sink.publish(&event) {
        warn!(
            "event=mutation_event_dropped module=events status=error kind={} document_id={} version={} error={}",
            event.kind.as_str(),
            event.document_id,
            event.version,
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{emit_best_effort, ChannelEventSink, MutationAction, MutationEvent};
    use crate::model::document::DocumentKind;
    use std::sync::mpsc;
    use uuid::Uuid;

    fn event() -> MutationEvent {
        MutationEvent {
            kind: DocumentKind::Poll,
            action: MutationAction::VoteCast,
            trip_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            actor_id: Some(Uuid::new_v4()),
            version: 2,
        }
    }

    #[test]
    fn channel_sink_delivers_events() {
        let (sender, receiver) = mpsc::channel();
        let sink = ChannelEventSink::new(sender);
        let sent = event();
        emit_best_effort(&sink, sent.clone());
        assert_eq!(receiver.try_recv().expect("event delivered"), sent);
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (sender, receiver) = mpsc::channel();
        drop(receiver);
        let sink = ChannelEventSink::new(sender);
        emit_best_effort(&sink, event());
    }

    #[test]
    fn event_serializes_with_snake_case_action() {
        let json = serde_json::to_string(&event()).expect("event serializes");
        assert!(json.contains("\"action\":\"vote_cast\""));
        assert!(json.contains("\"kind\":\"poll\""));
    }
}
