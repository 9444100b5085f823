//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Document writes validate payload invariants before persistence.
//! - Repository APIs return semantic errors (`TripNotFound`,
//!   `DuplicateDocument`) in addition to DB transport errors.

pub mod document_store;
pub mod membership_repo;
pub mod memory_store;
