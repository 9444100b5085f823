//! Trip membership model.
//!
//! # Responsibility
//! - Define trip member roles and lifecycle status.
//! - Map roles to the capabilities they grant.
//!
//! # Invariants
//! - At most one membership exists per `(trip_id, user_id)`.
//! - Only `MembershipStatus::Active` memberships grant capabilities.
//! - `left_at` is set iff status is not `Active`.

use crate::model::capability::Capability;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable trip identifier.
pub type TripId = Uuid;
/// Stable user identifier (issued by the external auth subsystem).
pub type UserId = Uuid;

/// Role of a user inside one trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
    /// Read-only participant.
    Viewer,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// Returns whether this role grants `capability`.
    pub fn grants(self, capability: Capability) -> bool {
        match self {
            Self::Owner | Self::Admin => true,
            Self::Member => !matches!(capability, Capability::ManagePoll),
            Self::Viewer => false,
        }
    }
}

/// Lifecycle state of a membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Left,
    Removed,
}

impl MembershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Left => "left",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "left" => Some(Self::Left),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// One user's membership in one trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripMembership {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub status: MembershipStatus,
    /// Epoch ms of the latest join or reactivation.
    pub joined_at: i64,
    /// Epoch ms of leave/removal. `None` while active.
    pub left_at: Option<i64>,
}

impl TripMembership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }

    /// Soft-deleted members hold no capability even though the row remains.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.is_active() && self.role.grants(capability)
    }
}
