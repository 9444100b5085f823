//! Versioned document store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist trip-scoped documents with an integer version and status flag.
//! - Provide atomic read-modify-write-if-version-matches (`compare_and_swap`).
//!
//! # Invariants
//! - Only the addressed row is touched inside the critical section: one read,
//!   at most one conditional write, no other I/O.
//! - A write always sets `version = current + 1`; skipped or conflicting calls
//!   leave the row byte-for-byte unchanged.
//! - `expected_version = None` means the caller accepts last-writer-wins.
//!
//! # See also
//! - `repo::memory_store` for the in-process implementation.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::document::{
    DocumentId, DocumentKey, DocumentKind, DocumentPayload, DocumentStatus, VersionedDocument,
    INITIAL_VERSION,
};
use crate::model::membership::TripId;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

/// Infrastructure failures of a document store.
///
/// Business rejections are not errors; they travel as [`CasOutcome`] values.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// Payload could not be encoded/decoded as JSON.
    Payload {
        kind: DocumentKind,
        message: String,
    },
    /// Payload failed its own invariant check.
    InvalidPayload {
        key: DocumentKey,
        message: String,
    },
    /// A document with the same id already exists.
    DuplicateDocument(DocumentId),
    /// Persisted row cannot be converted to a valid snapshot.
    InvalidData(String),
    /// The conditional write matched no row although the lock was held.
    LostWrite(DocumentKey),
    /// A row mutex was poisoned by a panicking writer.
    LockPoisoned(DocumentId),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Payload { kind, message } => {
                write!(f, "invalid {} payload encoding: {message}", kind.as_str())
            }
            Self::InvalidPayload { key, message } => write!(
                f,
                "document {} in trip {} violates payload invariants: {message}",
                key.document_id, key.trip_id
            ),
            Self::DuplicateDocument(id) => write!(f, "document already exists: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted document data: {message}"),
            Self::LostWrite(key) => write!(
                f,
                "conditional write on document {} matched no row",
                key.document_id
            ),
            Self::LockPoisoned(id) => write!(f, "document lock poisoned: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "document store requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Status and payload handed to a mutate function under the row lock.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState<D> {
    pub version: i64,
    pub status: DocumentStatus,
    pub payload: D,
}

/// Verdict of a mutate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<R> {
    /// Persist the mutated state at `version + 1`.
    Write,
    /// Leave the row untouched and report `R`.
    Skip(R),
}

/// Result of one `compare_and_swap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome<R> {
    Applied { new_version: i64 },
    Skipped { current_version: i64, reason: R },
    Conflict { current_version: i64 },
    NotFound,
}

/// Storage abstraction for versioned trip documents.
pub trait DocumentStore {
    /// Stores a new document at [`INITIAL_VERSION`].
    fn insert<D: DocumentPayload>(
        &self,
        trip_id: TripId,
        document_id: DocumentId,
        status: DocumentStatus,
        payload: &D,
    ) -> StoreResult<VersionedDocument<D>>;

    /// Loads the latest committed snapshot of one document.
    fn load<D: DocumentPayload>(
        &self,
        document_id: DocumentId,
    ) -> StoreResult<Option<VersionedDocument<D>>>;

    /// Atomically applies `mutate` if the stored version equals
    /// `expected_version` (or unconditionally when it is `None`).
    ///
    /// `mutate` is not invoked on version mismatch or missing documents.
    fn compare_and_swap<D, R, F>(
        &self,
        key: DocumentKey,
        expected_version: Option<i64>,
        mutate: F,
    ) -> StoreResult<CasOutcome<R>>
    where
        D: DocumentPayload,
        F: FnOnce(&mut DocumentState<D>) -> Decision<R>;
}

impl<T: DocumentStore> DocumentStore for &T {
    fn insert<D: DocumentPayload>(
        &self,
        trip_id: TripId,
        document_id: DocumentId,
        status: DocumentStatus,
        payload: &D,
    ) -> StoreResult<VersionedDocument<D>> {
        (**self).insert(trip_id, document_id, status, payload)
    }

    fn load<D: DocumentPayload>(
        &self,
        document_id: DocumentId,
    ) -> StoreResult<Option<VersionedDocument<D>>> {
        (**self).load(document_id)
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
        (**self).compare_and_swap(key, expected_version, mutate)
    }
}

/// SQLite-backed document store.
///
/// Each `compare_and_swap` runs in its own `BEGIN IMMEDIATE` transaction, so
/// the connection must not be inside another transaction.
#[derive(Debug, Clone, Copy)]
pub struct SqliteDocumentStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        let actual_version: u32 =
            conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        let expected_version = latest_version();
        if actual_version != expected_version {
            return Err(StoreError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }
}

impl DocumentStore for SqliteDocumentStore<'_> {
    fn insert<D: DocumentPayload>(
        &self,
        trip_id: TripId,
        document_id: DocumentId,
        status: DocumentStatus,
        payload: &D,
    ) -> StoreResult<VersionedDocument<D>> {
        let key = DocumentKey::new(trip_id, document_id);
        check_payload(key, payload)?;
        let encoded = encode_payload(payload)?;

        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM documents WHERE kind = ?1 AND document_id = ?2
            );",
            params![D::KIND.as_str(), document_id.to_string()],
            |row| row.get(0),
        )?;
        if exists == 1 {
            return Err(StoreError::DuplicateDocument(document_id));
        }

        self.conn.execute(
            "INSERT INTO documents (
                kind,
                document_id,
                trip_id,
                version,
                status,
                payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                D::KIND.as_str(),
                document_id.to_string(),
                trip_id.to_string(),
                INITIAL_VERSION,
                status.as_str(),
                encoded,
            ],
        )?;

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
        let row = self
            .conn
            .query_row(
                "SELECT trip_id, version, status, payload
                 FROM documents
                 WHERE kind = ?1 AND document_id = ?2;",
                params![D::KIND.as_str(), document_id.to_string()],
                |row| {
                    Ok(RawDocument {
                        trip_id: row.get(0)?,
                        version: row.get(1)?,
                        status: row.get(2)?,
                        payload: row.get(3)?,
                    })
                },
            )
            .optional()?;

        row.map(|raw| raw.decode::<D>(document_id)).transpose()
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
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let Some(current) = load_for_update::<D>(&tx, key)? else {
            return Ok(CasOutcome::NotFound);
        };

        if let Some(expected) = expected_version {
            if expected != current.version {
                return Ok(CasOutcome::Conflict {
                    current_version: current.version,
                });
            }
        }

        let mut state = current;
        let read_version = state.version;
        if let Decision::Skip(reason) = mutate(&mut state) {
            return Ok(CasOutcome::Skipped {
                current_version: read_version,
                reason,
            });
        }

        check_payload(key, &state.payload)?;
        let encoded = encode_payload(&state.payload)?;
        let new_version = read_version + 1;
        let changed = tx.execute(
            "UPDATE documents
             SET
                version = ?1,
                status = ?2,
                payload = ?3,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE kind = ?4
               AND document_id = ?5
               AND trip_id = ?6
               AND version = ?7;",
            params![
                new_version,
                state.status.as_str(),
                encoded,
                D::KIND.as_str(),
                key.document_id.to_string(),
                key.trip_id.to_string(),
                read_version,
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::LostWrite(key));
        }

        tx.commit()?;
        Ok(CasOutcome::Applied { new_version })
    }
}

struct RawDocument {
    trip_id: String,
    version: i64,
    status: String,
    payload: String,
}

impl RawDocument {
    fn decode<D: DocumentPayload>(self, document_id: DocumentId) -> StoreResult<VersionedDocument<D>> {
        let trip_id = Uuid::parse_str(&self.trip_id).map_err(|_| {
            StoreError::InvalidData(format!(
                "invalid uuid value `{}` in documents.trip_id",
                self.trip_id
            ))
        })?;
        if self.version < INITIAL_VERSION {
            return Err(StoreError::InvalidData(format!(
                "invalid version `{}` in documents.version",
                self.version
            )));
        }
        let status = DocumentStatus::parse(&self.status).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "invalid status `{}` in documents.status",
                self.status
            ))
        })?;
        let payload: D =
            serde_json::from_str(&self.payload).map_err(|err| StoreError::Payload {
                kind: D::KIND,
                message: err.to_string(),
            })?;
        check_payload(DocumentKey::new(trip_id, document_id), &payload)?;

        Ok(VersionedDocument {
            trip_id,
            document_id,
            version: self.version,
            status,
            payload,
        })
    }
}

fn load_for_update<D: DocumentPayload>(
    tx: &Transaction<'_>,
    key: DocumentKey,
) -> StoreResult<Option<DocumentState<D>>> {
    let row = tx
        .query_row(
            "SELECT trip_id, version, status, payload
             FROM documents
             WHERE kind = ?1 AND document_id = ?2 AND trip_id = ?3;",
            params![
                D::KIND.as_str(),
                key.document_id.to_string(),
                key.trip_id.to_string()
            ],
            |row| {
                Ok(RawDocument {
                    trip_id: row.get(0)?,
                    version: row.get(1)?,
                    status: row.get(2)?,
                    payload: row.get(3)?,
                })
            },
        )
        .optional()?;

    let Some(raw) = row else {
        return Ok(None);
    };
    let document = raw.decode::<D>(key.document_id)?;
    Ok(Some(DocumentState {
        version: document.version,
        status: document.status,
        payload: document.payload,
    }))
}

pub(crate) fn encode_payload<D: DocumentPayload>(payload: &D) -> StoreResult<String> {
    serde_json::to_string(payload).map_err(|err| StoreError::Payload {
        kind: D::KIND,
        message: err.to_string(),
    })
}

pub(crate) fn check_payload<D: DocumentPayload>(key: DocumentKey, payload: &D) -> StoreResult<()> {
    payload
        .validate()
        .map_err(|message| StoreError::InvalidPayload { key, message })
}
