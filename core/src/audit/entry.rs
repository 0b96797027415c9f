//! Audit entry types and the builder used to create them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::identity::ChainAccount;

/// Actions emitted by the core.
pub mod actions {
    pub const VAULT_CREATED: &str = "vault_created";
    pub const VAULT_UPDATED: &str = "vault_updated";
    pub const VAULT_POLICY_SET: &str = "vault_policy_set";
    pub const MEMBER_ADDED: &str = "member_added";
    pub const MEMBER_UPDATED: &str = "member_updated";
    pub const MEMBER_REMOVED: &str = "member_removed";
    pub const POLICY_CREATED: &str = "policy_created";
    pub const POLICY_UPDATED: &str = "policy_updated";
    pub const POLICY_ACTIVATED: &str = "policy_activated";
    pub const POLICY_DEACTIVATED: &str = "policy_deactivated";
    pub const POLICY_UPDATE_SCHEDULED: &str = "policy_update_scheduled";
    pub const POLICY_SCHEDULED_APPLIED: &str = "policy_scheduled_update_applied";
    pub const POLICY_EMERGENCY_UPDATE: &str = "policy_emergency_update";
    pub const ESCROW_CREATED: &str = "escrow_created";
    pub const ESCROW_SUBMITTED: &str = "escrow_submitted";
    pub const APPROVAL_RECORDED: &str = "approval_recorded";
    pub const ESCROW_APPROVED: &str = "escrow_approved";
    pub const ESCROW_ON_CHAIN: &str = "escrow_on_chain";
    pub const ESCROW_COMPLETED: &str = "escrow_completed";
    pub const ESCROW_CANCELLED: &str = "escrow_cancelled";
    pub const ESCROW_EXPIRED: &str = "escrow_expired";
    pub const PAYMENT_RECORDED: &str = "collection_payment_recorded";
}

/// The kind of record an audit entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Vault,
    Member,
    Policy,
    Escrow,
    Approval,
    Participant,
    /// Anything written by an external collaborator that fits none of the above.
    External,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceType::Vault => "vault",
            ResourceType::Member => "member",
            ResourceType::Policy => "policy",
            ResourceType::Escrow => "escrow",
            ResourceType::Approval => "approval",
            ResourceType::Participant => "participant",
            ResourceType::External => "external",
        };
        f.write_str(s)
    }
}

/// One committed ledger entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: u64,
    pub vault_id: Option<u64>,
    /// Canonical identifier of the acting account, or `"system"`.
    pub actor: String,
    pub action: String,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub tx_hash: Option<String>,
    pub user_op_hash: Option<String>,
    pub data: Value,
    pub metadata: Value,
    /// Server-assigned at write time.
    pub timestamp: DateTime<Utc>,
}

/// An audit entry that has not been written yet.
///
/// Built fluently, then handed to [`crate::storage::StoreTx::append_audit`]
/// or [`crate::audit::AuditLedger::append`], which assign the id and
/// timestamp.
///
/// ```
/// use quorum_core::audit::{NewAuditEntry, ResourceType};
///
/// let entry = NewAuditEntry::new("payout_notified", ResourceType::External)
///     .actor("notifier")
///     .vault(7)
///     .data(serde_json::json!({ "channel": "email" }));
/// assert_eq!(entry.action(), "payout_notified");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    vault_id: Option<u64>,
    actor: String,
    action: String,
    resource_type: ResourceType,
    resource_id: Option<String>,
    tx_hash: Option<String>,
    user_op_hash: Option<String>,
    data: Value,
    metadata: Value,
}

impl NewAuditEntry {
    /// Start an entry for `action` on a resource of `resource_type`.
    pub fn new(action: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            vault_id: None,
            actor: crate::config::SYSTEM_ACTOR.to_string(),
            action: action.into(),
            resource_type,
            resource_id: None,
            tx_hash: None,
            user_op_hash: None,
            data: Value::Null,
            metadata: Value::Null,
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Record `account`'s canonical identifier as the actor.
    pub fn actor_account(self, account: &ChainAccount) -> Self {
        self.actor(account.canonical())
    }

    pub fn vault(mut self, vault_id: u64) -> Self {
        self.vault_id = Some(vault_id);
        self
    }

    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn tx_hash(mut self, hash: Option<String>) -> Self {
        self.tx_hash = hash;
        self
    }

    pub fn user_op_hash(mut self, hash: Option<String>) -> Self {
        self.user_op_hash = hash;
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Stamp the entry. Called by the store at write time.
    pub(crate) fn into_entry(self, id: u64, timestamp: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id,
            vault_id: self.vault_id,
            actor: self.actor,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            tx_hash: self.tx_hash,
            user_op_hash: self.user_op_hash,
            data: self.data,
            metadata: self.metadata,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_defaults_to_system_actor() {
        let entry = NewAuditEntry::new(actions::ESCROW_EXPIRED, ResourceType::Escrow)
            .resource_id(12)
            .into_entry(1, Utc::now());
        assert_eq!(entry.actor, "system");
        assert_eq!(entry.resource_id.as_deref(), Some("12"));
        assert_eq!(entry.data, Value::Null);
    }

    #[test]
    fn entry_serializes_resource_type_snake_case() {
        let entry = NewAuditEntry::new("x", ResourceType::Participant)
            .data(json!({ "k": 1 }))
            .into_entry(3, Utc::now());
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["resource_type"], "participant");
        assert_eq!(v["data"]["k"], 1);

        let back: AuditLogEntry = serde_json::from_value(v).unwrap();
        assert_eq!(back, entry);
    }
}
