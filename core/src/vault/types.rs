//! Vault and membership records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::{DEFAULT_MEMBER_WEIGHT, MAX_NAME_LENGTH, OWNER_WEIGHT};
use crate::error::{CoreError, CoreResult};
use crate::identity::ChainAccount;

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// What a member may do inside a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    /// Full control: membership, policies, approvals.
    Owner,
    /// Approves payments and may cancel escrows.
    Guardian,
    /// Opens escrows.
    Requester,
    /// Read-only.
    Viewer,
    /// Approves payments, nothing else.
    Approver,
}

impl MemberRole {
    /// Roles whose approval can count towards a threshold.
    pub fn can_approve(&self) -> bool {
        matches!(
            self,
            MemberRole::Owner | MemberRole::Guardian | MemberRole::Approver
        )
    }

    /// Roles allowed to open escrows.
    pub fn can_request(&self) -> bool {
        matches!(
            self,
            MemberRole::Owner | MemberRole::Guardian | MemberRole::Requester
        )
    }

    /// Weight given when the caller does not specify one.
    pub fn default_weight(&self) -> u32 {
        match self {
            MemberRole::Owner => OWNER_WEIGHT,
            _ => DEFAULT_MEMBER_WEIGHT,
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberRole::Owner => "owner",
            MemberRole::Guardian => "guardian",
            MemberRole::Requester => "requester",
            MemberRole::Viewer => "viewer",
            MemberRole::Approver => "approver",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Parameters for deterministic (CREATE2-style) vault deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentParams {
    /// Hex salt.
    pub salt: String,
    pub factory: ChainAccount,
}

/// One custody group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    pub id: u64,
    pub account: ChainAccount,
    pub uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub deployment: Option<DeploymentParams>,
    pub active_policy_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A member of one vault. `(vault_id, address)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub vault_id: u64,
    pub account: ChainAccount,
    pub role: MemberRole,
    /// Stored for display and future weighted quorums. Thresholds count
    /// members, they do not sum weights.
    pub weight: u32,
    /// Canonical identifier of whoever added the member.
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    /// Last time the member recorded an approval.
    pub last_activity_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Request to create a vault together with its first owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVault {
    pub account: ChainAccount,
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deployment: Option<DeploymentParams>,
    pub owner: ChainAccount,
}

/// Editable vault metadata. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Reject empty, whitespace-only and oversized display names.
pub(crate) fn validate_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "name exceeds {MAX_NAME_LENGTH} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_capabilities() {
        assert!(MemberRole::Approver.can_approve());
        assert!(!MemberRole::Approver.can_request());
        assert!(MemberRole::Requester.can_request());
        assert!(!MemberRole::Requester.can_approve());
        assert!(!MemberRole::Viewer.can_approve());
        assert!(!MemberRole::Viewer.can_request());
        assert!(MemberRole::Owner.can_approve() && MemberRole::Owner.can_request());
    }

    #[test]
    fn owner_weight_is_privileged() {
        assert_eq!(MemberRole::Owner.default_weight(), OWNER_WEIGHT);
        assert_eq!(MemberRole::Guardian.default_weight(), DEFAULT_MEMBER_WEIGHT);
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("Treasury").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&MemberRole::Guardian).unwrap(), "\"guardian\"");
        assert_eq!(MemberRole::Approver.to_string(), "approver");
    }
}
