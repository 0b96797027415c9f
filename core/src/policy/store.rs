//! [`PolicyStore`]: creation, edits, activation and scheduled changes.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use super::types::{
    CollectionConfig, PaymentPolicyParams, PaymentRules, PendingChange, Policy,
    PolicyChangeRequest, PolicyRules, PolicyUpdate,
};
use crate::audit::{actions, NewAuditEntry, ResourceType};
use crate::error::{CoreError, CoreResult};
use crate::escrow::EscrowKind;
use crate::identity::ChainAccount;
use crate::storage::{abort, keys, lift, StoreTx, TxResult, VaultDB};
use crate::vault::registry::{authorize, load_members, load_vault};
use crate::vault::{validate_name, MemberRole, Vault};

/// Load a policy inside a transaction, aborting with `PolicyNotFound`.
pub(crate) fn load_policy(tx: &StoreTx<'_>, policy_id: u64) -> TxResult<Policy> {
    match tx.get(tx.policies, &keys::policy(policy_id))? {
        Some(policy) => Ok(policy),
        None => abort(CoreError::PolicyNotFound(policy_id)),
    }
}

/// Load a policy and check that `actor` owns its vault.
fn load_owned(tx: &StoreTx<'_>, policy_id: u64, actor: &ChainAccount) -> TxResult<Policy> {
    let policy = load_policy(tx, policy_id)?;
    let members = load_members(tx, policy.vault_id)?;
    lift(authorize(&members, actor, &[MemberRole::Owner]))?;
    Ok(policy)
}

/// Committed accounts must live on the vault's chain.
fn check_chain(tx: &StoreTx<'_>, vault_id: u64, rules: &PolicyRules) -> TxResult<()> {
    let chain_id = load_vault(tx, vault_id)?.account.chain_id();
    if let Some(account) = rules.as_payment().and_then(|rules| rules.foreign_account(chain_id)) {
        return abort(CoreError::ChainMismatch {
            account: account.canonical(),
            chain_id,
        });
    }
    Ok(())
}

fn apply_update(tx: &StoreTx<'_>, policy: &mut Policy, update: &PolicyUpdate) -> TxResult<()> {
    apply_update(tx, &mut policy, update)?;
    check_chain(tx, policy.vault_id, &policy.rules)
}

/// Owns policy records. Every mutation requires an owner of the policy's
/// vault.
///
/// Escrows copy the rules they are created under, so nothing here reaches
/// escrows that already exist.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    db: VaultDB,
}

impl PolicyStore {
    pub fn new(db: VaultDB) -> Self {
        Self { db }
    }

    // -- Creation -----------------------------------------------------------

    /// Create an active payment policy.
    ///
    /// # Errors
    ///
    /// [`CoreError::ThresholdExceedsGuardianCount`] when the threshold is
    /// larger than the distinct guardian set, plus the other checks of
    /// [`PaymentRules::build`].
    pub fn create_payment_policy(
        &self,
        vault_id: u64,
        params: PaymentPolicyParams,
        actor: &ChainAccount,
    ) -> CoreResult<Policy> {
        validate_name(&params.name)?;
        let rules = PaymentRules::build(
            params.threshold,
            params.timelock_secs,
            params.max_amount,
            params.guardians,
            params.owners,
        )
        .map_err(|e| {
            warn!(vault_id, error = %e, "payment policy rejected");
            e
        })?;

        self.insert(
            vault_id,
            params.name,
            params.description,
            PolicyRules::Payment(rules),
            actor,
        )
    }

    /// Create an active collection policy.
    pub fn create_collection_policy(
        &self,
        vault_id: u64,
        name: impl Into<String>,
        description: Option<String>,
        config: CollectionConfig,
        actor: &ChainAccount,
    ) -> CoreResult<Policy> {
        let name = name.into();
        validate_name(&name)?;
        self.insert(
            vault_id,
            name,
            description,
            PolicyRules::Collection(config),
            actor,
        )
    }

    fn insert(
        &self,
        vault_id: u64,
        name: String,
        description: Option<String>,
        rules: PolicyRules,
        actor: &ChainAccount,
    ) -> CoreResult<Policy> {
        let policy = self.db.transact(|tx| {
            let members = load_members(tx, vault_id)?;
            lift(authorize(&members, actor, &[MemberRole::Owner]))?;
            check_chain(tx, vault_id, &rules)?;

            let now = tx.now();
            let policy = Policy {
                id: tx.next_id()?,
                vault_id,
                name: name.clone(),
                description: description.clone(),
                active: true,
                rules: rules.clone(),
                pending_change: None,
                version: 1,
                created_at: now,
                updated_at: now,
            };
            tx.put(tx.policies, &keys::policy(policy.id), &policy)?;
            tx.index_put(&keys::vault_policy(vault_id, policy.id), policy.id)?;

            tx.append_audit(
                NewAuditEntry::new(actions::POLICY_CREATED, ResourceType::Policy)
                    .actor_account(actor)
                    .vault(vault_id)
                    .resource_id(policy.id)
                    .data(json!({ "name": policy.name, "rules": policy.rules })),
            )?;
            Ok(policy)
        })?;

        info!(vault_id, policy_id = policy.id, kind = %policy.kind(), "policy created");
        Ok(policy)
    }

    // -- Edits --------------------------------------------------------------

    /// Apply `update` now and bump the version.
    pub fn update_policy(
        &self,
        policy_id: u64,
        update: PolicyUpdate,
        actor: &ChainAccount,
    ) -> CoreResult<Policy> {
        let policy = self.db.transact(|tx| {
            let mut policy = load_owned(tx, policy_id, actor)?;
            apply_update(tx, &mut policy, &update)?;
            policy.updated_at = tx.now();
            tx.put(tx.policies, &keys::policy(policy_id), &policy)?;

            tx.append_audit(
                NewAuditEntry::new(actions::POLICY_UPDATED, ResourceType::Policy)
                    .actor_account(actor)
                    .vault(policy.vault_id)
                    .resource_id(policy_id)
                    .data(json!({ "update": update, "version": policy.version })),
            )?;
            Ok(policy)
        })?;

        info!(policy_id, version = policy.version, "policy updated");
        Ok(policy)
    }

    /// Flip the active flag. Several policies of one kind may be active.
    pub fn set_active(&self, policy_id: u64, active: bool, actor: &ChainAccount) -> CoreResult<Policy> {
        let policy = self.db.transact(|tx| {
            let mut policy = load_owned(tx, policy_id, actor)?;
            policy.active = active;
            policy.updated_at = tx.now();
            tx.put(tx.policies, &keys::policy(policy_id), &policy)?;

            let action = if active {
                actions::POLICY_ACTIVATED
            } else {
                actions::POLICY_DEACTIVATED
            };
            tx.append_audit(
                NewAuditEntry::new(action, ResourceType::Policy)
                    .actor_account(actor)
                    .vault(policy.vault_id)
                    .resource_id(policy_id),
            )?;
            Ok(policy)
        })?;

        info!(policy_id, active, "policy activation changed");
        Ok(policy)
    }

    /// Submit a scheduled or emergency change.
    ///
    /// Scheduled changes are validated against the current rules and stored
    /// as pending metadata until [`apply_scheduled`](Self::apply_scheduled).
    /// Emergency changes apply immediately; the reason must be non-empty and
    /// is kept in the audit entry.
    pub fn request_change(
        &self,
        policy_id: u64,
        request: PolicyChangeRequest,
        actor: &ChainAccount,
    ) -> CoreResult<Policy> {
        if let PolicyChangeRequest::Emergency { reason, .. } = &request {
            if reason.trim().is_empty() {
                return Err(CoreError::Validation(
                    "emergency policy changes require a reason".into(),
                ));
            }
        }

        let result = self.db.transact(|tx| {
            let mut policy = load_owned(tx, policy_id, actor)?;
            let now = tx.now();

            let entry = match &request {
                PolicyChangeRequest::Scheduled { effective_at, update } => {
                    if *effective_at <= now {
                        return abort(CoreError::Validation(
                            "scheduled change must take effect in the future".into(),
                        ));
                    }
                    // Dry run: reject changes that could never apply.
                    apply_update(tx, &mut policy.clone(), update)?;
                    policy.pending_change = Some(PendingChange {
                        update: update.clone(),
                        effective_at: *effective_at,
                        requested_by: actor.canonical(),
                        requested_at: now,
                    });
                    NewAuditEntry::new(actions::POLICY_UPDATE_SCHEDULED, ResourceType::Policy)
                        .data(json!({ "effective_at": effective_at, "update": update }))
                }
                PolicyChangeRequest::Emergency { reason, update } => {
                    apply_update(tx, &mut policy, update)?;
                    NewAuditEntry::new(actions::POLICY_EMERGENCY_UPDATE, ResourceType::Policy)
                        .data(json!({
                            "reason": reason,
                            "update": update,
                            "version": policy.version,
                        }))
                }
            };

            policy.updated_at = now;
            tx.put(tx.policies, &keys::policy(policy_id), &policy)?;
            tx.append_audit(
                entry
                    .actor_account(actor)
                    .vault(policy.vault_id)
                    .resource_id(policy_id),
            )?;
            Ok(policy)
        });

        match &result {
            Ok(policy) => info!(policy_id, version = policy.version, "policy change accepted"),
            Err(e) => warn!(policy_id, error = %e, "policy change rejected"),
        }
        result
    }

    /// Shorthand for a [`PolicyChangeRequest::Scheduled`] request.
    pub fn schedule_update(
        &self,
        policy_id: u64,
        update: PolicyUpdate,
        effective_at: DateTime<Utc>,
        actor: &ChainAccount,
    ) -> CoreResult<Policy> {
        self.request_change(
            policy_id,
            PolicyChangeRequest::Scheduled { effective_at, update },
            actor,
        )
    }

    /// Apply the pending change once its effective time has passed.
    ///
    /// # Errors
    ///
    /// [`CoreError::NoPendingChange`] if nothing is scheduled,
    /// [`CoreError::ChangeNotDue`] if it is too early.
    pub fn apply_scheduled(&self, policy_id: u64, actor: &ChainAccount) -> CoreResult<Policy> {
        let now = self.db.now();
        let policy = self.db.transact(|tx| {
            let mut policy = load_owned(tx, policy_id, actor)?;
            let pending = match policy.pending_change.take() {
                Some(pending) => pending,
                None => return abort(CoreError::NoPendingChange(policy_id)),
            };
            if pending.effective_at > now {
                return abort(CoreError::ChangeNotDue {
                    policy_id,
                    effective_at: pending.effective_at,
                });
            }

            apply_update(tx, &mut policy, &pending.update)?;
            policy.updated_at = tx.now();
            tx.put(tx.policies, &keys::policy(policy_id), &policy)?;

            tx.append_audit(
                NewAuditEntry::new(actions::POLICY_SCHEDULED_APPLIED, ResourceType::Policy)
                    .actor_account(actor)
                    .vault(policy.vault_id)
                    .resource_id(policy_id)
                    .data(json!({
                        "update": pending.update,
                        "requested_by": pending.requested_by,
                        "effective_at": pending.effective_at,
                        "version": policy.version,
                    })),
            )?;
            Ok(policy)
        })?;

        info!(policy_id, version = policy.version, "scheduled policy change applied");
        Ok(policy)
    }

    // -- Reads --------------------------------------------------------------

    pub fn get_policy(&self, policy_id: u64) -> CoreResult<Policy> {
        self.db
            .get(&self.db.policies, &keys::policy(policy_id))?
            .ok_or(CoreError::PolicyNotFound(policy_id))
    }

    /// Every policy of a vault, oldest first.
    pub fn list_policies(&self, vault_id: u64) -> CoreResult<Vec<Policy>> {
        self.db
            .index_scan(&keys::vault_policies(vault_id))?
            .into_iter()
            .map(|id| self.get_policy(id))
            .collect()
    }

    /// The policy to use for new escrows of `kind`: the vault's referenced
    /// policy if it is active and of that kind, else the oldest active one.
    pub fn active_policy(&self, vault_id: u64, kind: EscrowKind) -> CoreResult<Option<Policy>> {
        let vault: Vault = self
            .db
            .get(&self.db.vaults, &keys::vault(vault_id))?
            .ok_or(CoreError::VaultNotFound(vault_id))?;

        let candidates: Vec<Policy> = self
            .list_policies(vault_id)?
            .into_iter()
            .filter(|p| p.active && p.kind() == kind)
            .collect();

        let preferred = vault
            .active_policy_id
            .and_then(|id| candidates.iter().find(|p| p.id == id).cloned());
        let chosen = preferred.or_else(|| candidates.into_iter().next());
        debug!(vault_id, %kind, policy_id = ?chosen.as_ref().map(|p| p.id), "active policy lookup");
        Ok(chosen)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
