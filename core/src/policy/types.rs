//! Policy records, rule sets and change requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::commitment::address_set_root;
use crate::config::{MAX_COMMITTED_ADDRESSES, MAX_TIMELOCK_SECS, MIN_THRESHOLD};
use crate::error::{CoreError, CoreResult};
use crate::escrow::{Amount, EscrowKind};
use crate::identity::ChainAccount;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Threshold-approval rules for payment escrows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRules {
    /// Distinct qualifying approvals required.
    pub threshold: u32,
    /// Delay between reaching the threshold and execution eligibility.
    pub timelock_secs: u64,
    /// Spending cap per escrow.
    pub max_amount: Option<Amount>,
    /// Addresses committed in `roles_root`. Deduplicated.
    pub guardians: Vec<ChainAccount>,
    /// Addresses committed in `owners_root`. Deduplicated.
    pub owners: Vec<ChainAccount>,
    pub roles_root: String,
    pub owners_root: String,
}

impl PaymentRules {
    /// Validate the parameters and derive the commitment roots.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidThreshold`] if `threshold` is zero.
    /// - [`CoreError::ThresholdExceedsGuardianCount`] if `threshold` is larger
    ///   than the number of distinct guardian addresses.
    /// - [`CoreError::Validation`] for oversized address sets or timelocks.
    /// - [`CoreError::InvalidAmount`] for a zero spending cap.
    pub fn build(
        threshold: u32,
        timelock_secs: u64,
        max_amount: Option<Amount>,
        guardians: Vec<ChainAccount>,
        owners: Vec<ChainAccount>,
    ) -> CoreResult<Self> {
        let guardians = dedup_addresses(guardians);
        let owners = dedup_addresses(owners);

        if threshold < MIN_THRESHOLD {
            return Err(CoreError::InvalidThreshold(format!(
                "threshold must be at least {MIN_THRESHOLD}, got {threshold}"
            )));
        }
        if guardians.len() > MAX_COMMITTED_ADDRESSES || owners.len() > MAX_COMMITTED_ADDRESSES {
            return Err(CoreError::Validation(format!(
                "at most {MAX_COMMITTED_ADDRESSES} addresses may be committed per set"
            )));
        }
        if threshold as usize > guardians.len() {
            return Err(CoreError::ThresholdExceedsGuardianCount {
                threshold,
                guardians: guardians.len(),
            });
        }
        if timelock_secs > MAX_TIMELOCK_SECS {
            return Err(CoreError::Validation(format!(
                "timelock of {timelock_secs}s exceeds the maximum of {MAX_TIMELOCK_SECS}s"
            )));
        }
        if max_amount.is_some_and(|cap| cap.is_zero()) {
            return Err(CoreError::InvalidAmount("spending cap must be positive".into()));
        }

        Ok(Self {
            threshold,
            timelock_secs,
            max_amount,
            roles_root: address_set_root(&guardians),
            owners_root: address_set_root(&owners),
            guardians,
            owners,
        })
    }

    /// Whether `account` appears in the guardian or owner set.
    pub fn is_committed(&self, account: &ChainAccount) -> bool {
        self.guardians
            .iter()
            .chain(self.owners.iter())
            .any(|committed| committed == account)
    }

    /// First committed account that does not live on `chain_id`.
    pub fn foreign_account(&self, chain_id: u64) -> Option<&ChainAccount> {
        self.guardians
            .iter()
            .chain(self.owners.iter())
            .find(|account| account.chain_id() != chain_id)
    }
}

/// Keeps the first occurrence of every address, compared case-insensitively.
fn dedup_addresses(accounts: Vec<ChainAccount>) -> Vec<ChainAccount> {
    let mut out: Vec<ChainAccount> = Vec::with_capacity(accounts.len());
    for account in accounts {
        if !out.iter().any(|seen| seen.same_address(account.address())) {
            out.push(account);
        }
    }
    out
}

/// Settings for collection escrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Accept payments below a participant's full allocation.
    pub allow_partial: bool,
    /// Complete the escrow once every participant has paid.
    pub auto_complete: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            allow_partial: true,
            auto_complete: true,
        }
    }
}

/// The rule set of a policy, tagged by the escrow kind it governs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyRules {
    Payment(PaymentRules),
    Collection(CollectionConfig),
}

impl PolicyRules {
    pub fn kind(&self) -> EscrowKind {
        match self {
            PolicyRules::Payment(_) => EscrowKind::Payment,
            PolicyRules::Collection(_) => EscrowKind::Collection,
        }
    }

    pub fn as_payment(&self) -> Option<&PaymentRules> {
        match self {
            PolicyRules::Payment(rules) => Some(rules),
            PolicyRules::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionConfig> {
        match self {
            PolicyRules::Collection(config) => Some(config),
            PolicyRules::Payment(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// A rule set governing one kind of escrow within a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: u64,
    pub vault_id: u64,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub rules: PolicyRules,
    /// Advisory change waiting for its effective time.
    pub pending_change: Option<PendingChange>,
    /// Starts at 1, bumped on every rule or metadata change.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn kind(&self) -> EscrowKind {
        self.rules.kind()
    }

    /// Apply `update` in place, re-validating the resulting rules.
    ///
    /// Leaves `self` untouched on error.
    pub(crate) fn apply(&mut self, update: &PolicyUpdate) -> CoreResult<()> {
        let rules = match &self.rules {
            PolicyRules::Payment(current) => {
                if update.collection.is_some() {
                    return Err(CoreError::Validation(
                        "collection settings cannot be applied to a payment policy".into(),
                    ));
                }
                let max_amount = if update.clear_max_amount {
                    None
                } else {
                    update.max_amount.or(current.max_amount)
                };
                PolicyRules::Payment(PaymentRules::build(
                    update.threshold.unwrap_or(current.threshold),
                    update.timelock_secs.unwrap_or(current.timelock_secs),
                    max_amount,
                    update.guardians.clone().unwrap_or_else(|| current.guardians.clone()),
                    update.owners.clone().unwrap_or_else(|| current.owners.clone()),
                )?)
            }
            PolicyRules::Collection(current) => {
                if update.touches_payment_rules() {
                    return Err(CoreError::Validation(
                        "payment rules cannot be applied to a collection policy".into(),
                    ));
                }
                PolicyRules::Collection(update.collection.unwrap_or(*current))
            }
        };

        if let Some(name) = &update.name {
            crate::vault::validate_name(name)?;
            self.name = name.clone();
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        self.rules = rules;
        self.version += 1;
        Ok(())
    }
}

/// A partial edit. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub timelock_secs: Option<u64>,
    #[serde(default)]
    pub max_amount: Option<Amount>,
    /// Remove the spending cap. Takes precedence over `max_amount`.
    #[serde(default)]
    pub clear_max_amount: bool,
    #[serde(default)]
    pub guardians: Option<Vec<ChainAccount>>,
    #[serde(default)]
    pub owners: Option<Vec<ChainAccount>>,
    #[serde(default)]
    pub collection: Option<CollectionConfig>,
}

impl PolicyUpdate {
    fn touches_payment_rules(&self) -> bool {
        self.threshold.is_some()
            || self.timelock_secs.is_some()
            || self.max_amount.is_some()
            || self.clear_max_amount
            || self.guardians.is_some()
            || self.owners.is_some()
    }
}

/// A change stored on the policy until its effective time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub update: PolicyUpdate,
    pub effective_at: DateTime<Utc>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

/// How a policy change should take effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PolicyChangeRequest {
    /// Record the change now, apply it once `effective_at` has passed.
    Scheduled {
        effective_at: DateTime<Utc>,
        update: PolicyUpdate,
    },
    /// Apply immediately. The reason is kept in the audit trail.
    Emergency { reason: String, update: PolicyUpdate },
}

/// Parameters of a new payment policy. Roots are derived, not supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentPolicyParams {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub threshold: u32,
    #[serde(default)]
    pub timelock_secs: u64,
    #[serde(default)]
    pub max_amount: Option<Amount>,
    pub guardians: Vec<ChainAccount>,
    #[serde(default)]
    pub owners: Vec<ChainAccount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> ChainAccount {
        ChainAccount::new(format!("0x{}", hex::encode([byte; 20])), 84532).unwrap()
    }

    fn guardians(n: u8) -> Vec<ChainAccount> {
        (1..=n).map(account).collect()
    }

    #[test]
    fn threshold_bounded_by_distinct_guardians() {
        assert!(PaymentRules::build(2, 0, None, guardians(3), vec![]).is_ok());
        assert!(matches!(
            PaymentRules::build(0, 0, None, guardians(3), vec![]),
            Err(CoreError::InvalidThreshold(_))
        ));

        let mut dupes = guardians(2);
        dupes.push(account(1));
        assert!(matches!(
            PaymentRules::build(3, 0, None, dupes, vec![]),
            Err(CoreError::ThresholdExceedsGuardianCount { threshold: 3, guardians: 2 })
        ));
    }

    #[test]
    fn rejects_zero_cap_and_long_timelock() {
        assert!(matches!(
            PaymentRules::build(1, 0, Some(Amount::ZERO), guardians(1), vec![]),
            Err(CoreError::InvalidAmount(_))
        ));
        assert!(matches!(
            PaymentRules::build(1, MAX_TIMELOCK_SECS + 1, None, guardians(1), vec![]),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn committed_accounts_ignore_case_but_not_chain() {
        let rules = PaymentRules::build(1, 0, None, vec![account(0xab)], vec![account(9)]).unwrap();
        let upper = format!("0x{}", hex::encode_upper([0xab_u8; 20]));
        let upper = ChainAccount::new(upper, account(0xab).chain_id()).unwrap();
        assert!(rules.is_committed(&upper));
        assert!(rules.is_committed(&account(9)));
        assert!(!rules.is_committed(&account(5)));

        let elsewhere = ChainAccount::new(account(0xab).address(), 1).unwrap();
        assert!(!rules.is_committed(&elsewhere));
        assert_eq!(rules.foreign_account(account(0xab).chain_id()), None);
        assert_eq!(rules.foreign_account(1), Some(&account(0xab)));
    }

    #[test]
    fn rules_serialize_with_type_tag() {
        let rules = PolicyRules::Collection(CollectionConfig::default());
        let v = serde_json::to_value(&rules).unwrap();
        assert_eq!(v["type"], "collection");
        assert_eq!(v["auto_complete"], true);
        let back: PolicyRules = serde_json::from_value(v).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn change_request_tagged_by_mode() {
        let req: PolicyChangeRequest = serde_json::from_value(serde_json::json!({
            "mode": "emergency",
            "reason": "guardian key compromised",
            "update": { "threshold": 1 }
        }))
        .unwrap();
        match req {
            PolicyChangeRequest::Emergency { reason, update } => {
                assert_eq!(reason, "guardian key compromised");
                assert_eq!(update.threshold, Some(1));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }
}
