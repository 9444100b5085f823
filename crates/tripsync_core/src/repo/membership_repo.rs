//! Trip/membership repository and membership oracle.
//!
//! # Responsibility
//! - Answer "is user U an active participant of trip T" and capability
//!   questions for the mutation services.
//! - Maintain trip and membership rows (create, join, role change, leave).
//!
//! # Invariants
//! - Oracle queries are pure reads.
//! - A missing or soft-deleted trip answers `false`, never an error.
//! - Only `status = 'active'` rows grant anything.
//! - Membership rows are never hard-deleted; re-joining reactivates the row.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::basecamp::Basecamp;
use crate::model::capability::Capability;
use crate::model::document::DocumentStatus;
use crate::model::membership::{MemberRole, MembershipStatus, TripId, TripMembership, UserId};
use crate::repo::document_store::{DocumentStore, SqliteDocumentStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const MEMBERSHIP_SELECT_SQL: &str = "SELECT
    m.trip_id,
    m.user_id,
    m.role,
    m.status,
    m.joined_at,
    m.left_at
FROM trip_members m
INNER JOIN trips t ON t.id = m.trip_id";

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from trip/membership repository operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Initial trip documents could not be stored.
    Store(StoreError),
    /// Trip does not exist or is soft-deleted.
    TripNotFound(TripId),
    /// No membership row for the pair.
    MembershipNotFound {
        trip_id: TripId,
        user_id: UserId,
    },
    /// User already holds an active membership.
    AlreadyMember {
        trip_id: TripId,
        user_id: UserId,
    },
    /// Trip name is blank after trim.
    InvalidTripName,
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::TripNotFound(id) => write!(f, "trip not found: {id}"),
            Self::MembershipNotFound { trip_id, user_id } => {
                write!(f, "membership not found: trip {trip_id} user {user_id}")
            }
            Self::AlreadyMember { trip_id, user_id } => {
                write!(f, "user {user_id} is already an active member of trip {trip_id}")
            }
            Self::InvalidTripName => write!(f, "trip name must not be blank"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "membership repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid membership data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Authorization questions asked before every document mutation.
pub trait MembershipOracle {
    fn is_active_member(&self, trip_id: TripId, user_id: UserId) -> RepoResult<bool>;
    fn has_capability(
        &self,
        trip_id: TripId,
        user_id: UserId,
        capability: Capability,
    ) -> RepoResult<bool>;
}

impl<T: MembershipOracle> MembershipOracle for &T {
    fn is_active_member(&self, trip_id: TripId, user_id: UserId) -> RepoResult<bool> {
        (**self).is_active_member(trip_id, user_id)
    }

    fn has_capability(
        &self,
        trip_id: TripId,
        user_id: UserId,
        capability: Capability,
    ) -> RepoResult<bool> {
        (**self).has_capability(trip_id, user_id, capability)
    }
}

/// Trip read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRecord {
    pub trip_id: TripId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: i64,
}

/// Repository interface for trip and membership maintenance.
pub trait MembershipRepository: MembershipOracle {
    /// Creates a trip, its owner membership and its empty basecamp document.
    fn create_trip(&self, name: &str, owner_id: UserId) -> RepoResult<TripRecord>;
    /// Soft-deletes a trip. Its documents become inert.
    fn delete_trip(&self, trip_id: TripId) -> RepoResult<()>;
    /// Inserts a membership or reactivates a left/removed one.
    fn add_member(
        &self,
        trip_id: TripId,
        user_id: UserId,
        role: MemberRole,
    ) -> RepoResult<TripMembership>;
    fn change_role(&self, trip_id: TripId, user_id: UserId, role: MemberRole) -> RepoResult<()>;
    fn leave_trip(&self, trip_id: TripId, user_id: UserId) -> RepoResult<()>;
    fn remove_member(&self, trip_id: TripId, user_id: UserId) -> RepoResult<()>;
    /// Loads one membership regardless of status. `None` for deleted trips.
    fn get_membership(
        &self,
        trip_id: TripId,
        user_id: UserId,
    ) -> RepoResult<Option<TripMembership>>;
    /// Lists active members ordered by join time.
    fn list_active_members(&self, trip_id: TripId) -> RepoResult<Vec<TripMembership>>;
}

/// SQLite-backed trip/membership repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteMembershipRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMembershipRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let actual_version: u32 =
            conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        let expected_version = latest_version();
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }

    fn active_membership(
        &self,
        trip_id: TripId,
        user_id: UserId,
    ) -> RepoResult<Option<TripMembership>> {
        Ok(self
            .get_membership(trip_id, user_id)?
            .filter(TripMembership::is_active))
    }

    fn deactivate(
        &self,
        trip_id: TripId,
        user_id: UserId,
        status: MembershipStatus,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE trip_members
             SET
                status = ?3,
                left_at = (strftime('%s', 'now') * 1000)
             WHERE trip_id = ?1
               AND user_id = ?2
               AND status = 'active';",
            params![trip_id.to_string(), user_id.to_string(), status.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::MembershipNotFound { trip_id, user_id });
        }
        Ok(())
    }
}

impl MembershipOracle for SqliteMembershipRepository<'_> {
    fn is_active_member(&self, trip_id: TripId, user_id: UserId) -> RepoResult<bool> {
        Ok(self.active_membership(trip_id, user_id)?.is_some())
    }

    fn has_capability(
        &self,
        trip_id: TripId,
        user_id: UserId,
        capability: Capability,
    ) -> RepoResult<bool> {
        Ok(self
            .active_membership(trip_id, user_id)?
            .is_some_and(|membership| membership.has_capability(capability)))
    }
}

impl MembershipRepository for SqliteMembershipRepository<'_> {
    fn create_trip(&self, name: &str, owner_id: UserId) -> RepoResult<TripRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepoError::InvalidTripName);
        }

        let trip_id = Uuid::new_v4();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO trips (id, name, created_by) VALUES (?1, ?2, ?3);",
            params![trip_id.to_string(), name, owner_id.to_string()],
        )?;
        tx.execute(
            "INSERT INTO trip_members (trip_id, user_id, role, status, joined_at, left_at)
             VALUES (?1, ?2, 'owner', 'active', (strftime('%s', 'now') * 1000), NULL);",
            params![trip_id.to_string(), owner_id.to_string()],
        )?;
        SqliteDocumentStore::try_new(&tx)?.insert(
            trip_id,
            trip_id,
            DocumentStatus::Active,
            &Basecamp::default(),
        )?;
        let created_at: i64 = tx.query_row(
            "SELECT created_at FROM trips WHERE id = ?1;",
            [trip_id.to_string()],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(TripRecord {
            trip_id,
            name: name.to_string(),
            created_by: owner_id,
            created_at,
        })
    }

    fn delete_trip(&self, trip_id: TripId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE trips SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0;",
            [trip_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::TripNotFound(trip_id));
        }
        Ok(())
    }

    fn add_member(
        &self,
        trip_id: TripId,
        user_id: UserId,
        role: MemberRole,
    ) -> RepoResult<TripMembership> {
        if !trip_exists(self.conn, trip_id)? {
            return Err(RepoError::TripNotFound(trip_id));
        }
        if let Some(existing) = self.get_membership(trip_id, user_id)? {
            if existing.is_active() {
                return Err(RepoError::AlreadyMember { trip_id, user_id });
            }
        }

        self.conn.execute(
            "INSERT INTO trip_members (trip_id, user_id, role, status, joined_at, left_at)
             VALUES (?1, ?2, ?3, 'active', (strftime('%s', 'now') * 1000), NULL)
             ON CONFLICT (trip_id, user_id) DO UPDATE SET
                role = excluded.role,
                status = 'active',
                joined_at = excluded.joined_at,
                left_at = NULL;",
            params![trip_id.to_string(), user_id.to_string(), role.as_str()],
        )?;

        self.get_membership(trip_id, user_id)?
            .ok_or(RepoError::MembershipNotFound { trip_id, user_id })
    }

    fn change_role(&self, trip_id: TripId, user_id: UserId, role: MemberRole) -> RepoResult<()> {
        if !trip_exists(self.conn, trip_id)? {
            return Err(RepoError::TripNotFound(trip_id));
        }
        let changed = self.conn.execute(
            "UPDATE trip_members
             SET role = ?3
             WHERE trip_id = ?1
               AND user_id = ?2
               AND status = 'active';",
            params![trip_id.to_string(), user_id.to_string(), role.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::MembershipNotFound { trip_id, user_id });
        }
        Ok(())
    }

    fn leave_trip(&self, trip_id: TripId, user_id: UserId) -> RepoResult<()> {
        self.deactivate(trip_id, user_id, MembershipStatus::Left)
    }

    fn remove_member(&self, trip_id: TripId, user_id: UserId) -> RepoResult<()> {
        self.deactivate(trip_id, user_id, MembershipStatus::Removed)
    }

    fn get_membership(
        &self,
        trip_id: TripId,
        user_id: UserId,
    ) -> RepoResult<Option<TripMembership>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MEMBERSHIP_SELECT_SQL}
             WHERE m.trip_id = ?1
               AND m.user_id = ?2
               AND t.is_deleted = 0;"
        ))?;
        let mut rows = stmt.query(params![trip_id.to_string(), user_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_membership_row(row)?));
        }
        Ok(None)
    }

    fn list_active_members(&self, trip_id: TripId) -> RepoResult<Vec<TripMembership>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MEMBERSHIP_SELECT_SQL}
             WHERE m.trip_id = ?1
               AND m.status = 'active'
               AND t.is_deleted = 0
             ORDER BY m.joined_at ASC, m.user_id ASC;"
        ))?;
        let mut rows = stmt.query([trip_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(parse_membership_row(row)?);
        }
        Ok(members)
    }
}

fn trip_exists(conn: &Connection, trip_id: TripId) -> RepoResult<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM trips WHERE id = ?1 AND is_deleted = 0;",
            [trip_id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn parse_membership_row(row: &Row<'_>) -> RepoResult<TripMembership> {
    let trip_id = parse_uuid(row.get::<_, String>(0)?, "trip_members.trip_id")?;
    let user_id = parse_uuid(row.get::<_, String>(1)?, "trip_members.user_id")?;

    let role_text: String = row.get(2)?;
    let role = MemberRole::parse(&role_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid role `{role_text}` in trip_members.role"))
    })?;

    let status_text: String = row.get(3)?;
    let status = MembershipStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in trip_members.status"
        ))
    })?;

    Ok(TripMembership {
        trip_id,
        user_id,
        role,
        status,
        joined_at: row.get(4)?,
        left_at: row.get(5)?,
    })
}

fn parse_uuid(value: String, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(&value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}
