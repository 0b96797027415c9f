//! Search filter shared by [`super::AuditLedger::search`] and
//! [`super::AuditLedger::stats`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{AuditLogEntry, ResourceType};
use crate::config::{DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};

/// Conjunctive filter over audit entries. Every field that is set must match.
///
/// `from` is inclusive, `to` is exclusive. Actor matching ignores address
/// casing, so a checksummed and a lowercase identifier find the same rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub vault_id: Option<u64>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub tx_hash: Option<String>,
    pub user_op_hash: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Page size. `None` or `0` means the default; larger values are clamped.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vault(mut self, vault_id: u64) -> Self {
        self.vault_id = Some(vault_id);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn resource(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn tx_hash(mut self, hash: impl Into<String>) -> Self {
        self.tx_hash = Some(hash.into());
        self
    }

    pub fn user_op_hash(mut self, hash: impl Into<String>) -> Self {
        self.user_op_hash = Some(hash.into());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Page size after defaulting and clamping.
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None | Some(0) => DEFAULT_SEARCH_LIMIT,
            Some(n) => n.min(MAX_SEARCH_LIMIT),
        }
    }

    /// Whether `entry` satisfies every populated field except the date
    /// range, which the ledger applies as a key range instead.
    pub(crate) fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(vault_id) = self.vault_id {
            if entry.vault_id != Some(vault_id) {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if !entry.actor.eq_ignore_ascii_case(actor) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(resource_type) = self.resource_type {
            if entry.resource_type != resource_type {
                return false;
            }
        }
        if let Some(resource_id) = &self.resource_id {
            if entry.resource_id.as_ref() != Some(resource_id) {
                return false;
            }
        }
        if let Some(hash) = &self.tx_hash {
            if !entry.tx_hash.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(hash)) {
                return false;
            }
        }
        if let Some(hash) = &self.user_op_hash {
            if !entry
                .user_op_hash
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(hash))
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::NewAuditEntry;

    fn entry() -> AuditLogEntry {
        NewAuditEntry::new("escrow_created", ResourceType::Escrow)
            .actor("eip155:1:0xAbCdEf0123456789aBcDeF0123456789AbCdEf01")
            .vault(4)
            .resource_id(9)
            .tx_hash(Some("0xDEAD".into()))
            .into_entry(1, Utc::now())
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(AuditFilter::new().matches(&entry()));
    }

    #[test]
    fn fields_are_conjunctive() {
        let e = entry();
        assert!(AuditFilter::new().vault(4).action("escrow_created").matches(&e));
        assert!(!AuditFilter::new().vault(4).action("escrow_cancelled").matches(&e));
        assert!(!AuditFilter::new().vault(5).action("escrow_created").matches(&e));
        assert!(!AuditFilter::new().resource(ResourceType::Vault).matches(&e));
        assert!(AuditFilter::new().resource_id(9).matches(&e));
        assert!(!AuditFilter::new().user_op_hash("0x01").matches(&e));
    }

    #[test]
    fn actor_and_hash_ignore_case() {
        let e = entry();
        assert!(AuditFilter::new()
            .actor("eip155:1:0xabcdef0123456789abcdef0123456789abcdef01")
            .matches(&e));
        assert!(AuditFilter::new().tx_hash("0xdead").matches(&e));
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(AuditFilter::new().effective_limit(), 100);
        assert_eq!(AuditFilter::new().limit(0).effective_limit(), 100);
        assert_eq!(AuditFilter::new().limit(25).effective_limit(), 25);
        assert_eq!(AuditFilter::new().limit(50_000).effective_limit(), 1000);
    }
}
