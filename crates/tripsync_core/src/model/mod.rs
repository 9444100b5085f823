//! Domain model for trip membership and versioned trip documents.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep one versioned envelope shape for polls, tasks and basecamps.
//!
//! # Invariants
//! - Every document is identified by a stable `DocumentId` inside one trip.
//! - Memberships are soft-deleted via status, not hard-deleted.

pub mod basecamp;
pub mod capability;
pub mod document;
pub mod membership;
pub mod poll;
pub mod task;
