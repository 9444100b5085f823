//! Core domain logic for TripSync shared trip documents.
//! This crate is the single source of truth for versioning and mutation rules.

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use api::{ApiError, BasecampUpdateResponse, ToggleTaskResponse, TripSyncApi};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use logging::{default_log_level, init_logging, LoggingActivation, LoggingError};
pub use model::basecamp::{Basecamp, BasecampLocation};
pub use model::capability::Capability;
pub use model::document::{
    DocumentId, DocumentKey, DocumentKind, DocumentPayload, DocumentStatus, VersionedDocument,
    INITIAL_VERSION,
};
pub use model::membership::{MemberRole, MembershipStatus, TripId, TripMembership, UserId};
pub use model::poll::{OptionId, Poll, PollCloseReason, PollOption, PollSettings, Tally};
pub use model::task::{Task, TaskCompletion};
pub use repo::document_store::{
    CasOutcome, Decision, DocumentState, DocumentStore, SqliteDocumentStore, StoreError,
    StoreResult,
};
pub use repo::membership_repo::{
    MembershipOracle, MembershipRepository, RepoError, RepoResult, SqliteMembershipRepository,
    TripRecord,
};
pub use repo::memory_store::MemoryDocumentStore;
pub use service::basecamp_service::{BasecampService, BasecampView};
pub use service::events::{
    ChannelEventSink, EventSink, EventSinkError, MutationAction, MutationEvent, NoopEventSink,
};
pub use service::outcome::{CreateOutcome, ErrorClass, MutationOutcome, MutationReason};
pub use service::poll_service::{NewPoll, PollOptionView, PollService, PollView};
pub use service::task_service::{NewTask, TaskService, TaskView, ToggleOutcome};
pub use service::{ServiceError, ServiceResult};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
