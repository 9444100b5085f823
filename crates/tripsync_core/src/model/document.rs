//! Versioned document envelope shared by polls, tasks and basecamps.
//!
//! # Responsibility
//! - Identify a trip-scoped document and carry its version/status metadata.
//! - Bind payload types to their storage kind.
//!
//! # Invariants
//! - `version` starts at [`INITIAL_VERSION`] and grows by exactly 1 per
//!   accepted mutation. It is never decremented.
//! - A payload must pass [`DocumentPayload::validate`] before it is stored.

use crate::model::membership::TripId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable document identifier.
pub type DocumentId = Uuid;

/// Version assigned to freshly authored documents.
pub const INITIAL_VERSION: i64 = 1;

/// Storage kind of a versioned document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Poll,
    Task,
    Basecamp,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Task => "task",
            Self::Basecamp => "basecamp",
        }
    }
}

/// Lifecycle flag stored next to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Active,
    Closed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Row identity: a document is only reachable through its owning trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub trip_id: TripId,
    pub document_id: DocumentId,
}

impl DocumentKey {
    pub fn new(trip_id: TripId, document_id: DocumentId) -> Self {
        Self {
            trip_id,
            document_id,
        }
    }
}

/// Typed payload stored inside a versioned document row.
pub trait DocumentPayload: Serialize + DeserializeOwned + Clone {
    const KIND: DocumentKind;

    /// Checks payload invariants. The message is stored-data diagnostics, not
    /// user-facing text.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Snapshot of one document as last committed.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument<D> {
    pub trip_id: TripId,
    pub document_id: DocumentId,
    pub version: i64,
    pub status: DocumentStatus,
    pub payload: D,
}

impl<D> VersionedDocument<D> {
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.trip_id, self.document_id)
    }
}
