//! In-process document store with one mutex per document.
//!
//! # Invariants
//! - The index lock is only held to find or insert a row handle; it is
//!   released before the row mutex is taken, so writers of different documents
//!   never wait on each other.
//! - Payloads are kept in their JSON form, matching what the SQLite store
//!   persists, so both stores see the same decode/validate path.

use crate::model::document::{
    DocumentId, DocumentKey, DocumentKind, DocumentPayload, DocumentStatus, VersionedDocument,
    INITIAL_VERSION,
};
use crate::model::membership::TripId;
use crate::repo::document_store::{
    check_payload, CasOutcome, Decision, DocumentState, DocumentStore, StoreError, StoreResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug)]
struct MemoryRow {
    trip_id: TripId,
    version: i64,
    status: DocumentStatus,
    payload: serde_json::Value,
}

type RowHandle = Arc<Mutex<MemoryRow>>;

/// Thread-safe in-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    rows: RwLock<HashMap<(DocumentKind, DocumentId), RowHandle>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row(&self, kind: DocumentKind, document_id: DocumentId) -> StoreResult<Option<RowHandle>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::LockPoisoned(document_id))?;
        Ok(rows.get(&(kind, document_id)).cloned())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn insert<D: DocumentPayload>(
        &self,
        trip_id: TripId,
        document_id: DocumentId,
        status: DocumentStatus,
        payload: &D,
    ) -> StoreResult<VersionedDocument<D>> {
        check_payload(DocumentKey::new(trip_id, document_id), payload)?;
        let encoded = to_value(payload)?;

        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::LockPoisoned(document_id))?;
        if rows.contains_key(&(D::KIND, document_id)) {
            return Err(StoreError::DuplicateDocument(document_id));
        }
        rows.insert(
            (D::KIND, document_id),
            Arc::new(Mutex::new(MemoryRow {
                trip_id,
                version: INITIAL_VERSION,
                status,
                payload: encoded,
            })),
        );

        Ok(VersionedDocument {
            trip_id,
            document_id,
            version: INITIAL_VERSION,
            status,
            payload: payload.clone(),
        })
    }

    fn load<D: DocumentPayload>(
        &self,
        document_id: DocumentId,
    ) -> StoreResult<Option<VersionedDocument<D>>> {
        let Some(handle) = self.row(D::KIND, document_id)? else {
            return Ok(None);
        };
        let row = handle
            .lock()
            .map_err(|_| StoreError::LockPoisoned(document_id))?;
        let payload: D = from_value(&row.payload)?;
        Ok(Some(VersionedDocument {
            trip_id: row.trip_id,
            document_id,
            version: row.version,
            status: row.status,
            payload,
        }))
    }

    fn compare_and_swap<D, R, F>(
        &self,
        key: DocumentKey,
        expected_version: Option<i64>,
        mutate: F,
    ) -> StoreResult<CasOutcome<R>>
    where
        D: DocumentPayload,
        F: FnOnce(&mut DocumentState<D>) -> Decision<R>,
    {
        let Some(handle) = self.row(D::KIND, key.document_id)? else {
            return Ok(CasOutcome::NotFound);
        };
        let mut row = handle
            .lock()
            .map_err(|_| StoreError::LockPoisoned(key.document_id))?;
        if row.trip_id != key.trip_id {
            return Ok(CasOutcome::NotFound);
        }

        if let Some(expected) = expected_version {
            if expected != row.version {
                return Ok(CasOutcome::Conflict {
                    current_version: row.version,
                });
            }
        }

        let mut state = DocumentState {
            version: row.version,
            status: row.status,
            payload: from_value::<D>(&row.payload)?,
        };
        if let Decision::Skip(reason) = mutate(&mut state) {
            return Ok(CasOutcome::Skipped {
                current_version: row.version,
                reason,
            });
        }

        check_payload(key, &state.payload)?;
        row.payload = to_value(&state.payload)?;
        row.status = state.status;
        row.version += 1;
        Ok(CasOutcome::Applied {
            new_version: row.version,
        })
    }
}

fn to_value<D: DocumentPayload>(payload: &D) -> StoreResult<serde_json::Value> {
    serde_json::to_value(payload).map_err(|err| StoreError::Payload {
        kind: D::KIND,
        message: err.to_string(),
    })
}

fn from_value<D: DocumentPayload>(value: &serde_json::Value) -> StoreResult<D> {
    D::deserialize(value).map_err(|err| StoreError::Payload {
        kind: D::KIND,
        message: err.to_string(),
    })
}
