//! [`VaultRegistry`]: vault records, membership, and the lookups over them.

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{validate_name, Member, MemberRole, NewVault, Vault, VaultUpdate};
use crate::audit::{actions, NewAuditEntry, ResourceType};
use crate::error::{CoreError, CoreResult};
use crate::identity::ChainAccount;
use crate::policy::Policy;
use crate::storage::{abort, keys, lift, StoreTx, TxResult, VaultDB};

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Load a vault inside a transaction, aborting with `VaultNotFound`.
pub(crate) fn load_vault(tx: &StoreTx<'_>, vault_id: u64) -> TxResult<Vault> {
    match tx.get(tx.vaults, &keys::vault(vault_id))? {
        Some(vault) => Ok(vault),
        None => abort(CoreError::VaultNotFound(vault_id)),
    }
}

/// Load a vault's membership list inside a transaction.
pub(crate) fn load_members(tx: &StoreTx<'_>, vault_id: u64) -> TxResult<Vec<Member>> {
    load_vault(tx, vault_id)?;
    Ok(tx
        .get(tx.vaults, &keys::members(vault_id))?
        .unwrap_or_default())
}

/// Find `actor` among `members` holding one of `allowed`.
pub(crate) fn authorize<'m>(
    members: &'m [Member],
    actor: &ChainAccount,
    allowed: &[MemberRole],
) -> CoreResult<&'m Member> {
    members
        .iter()
        .find(|m| m.account == *actor && allowed.contains(&m.role))
        .ok_or_else(|| CoreError::MissingRole {
            actor: actor.canonical(),
            required: allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("|"),
        })
}

/// Reject `account` unless it lives on `chain_id`.
pub(crate) fn ensure_on_chain(account: &ChainAccount, chain_id: u64) -> CoreResult<()> {
    if account.chain_id() == chain_id {
        Ok(())
    } else {
        Err(CoreError::ChainMismatch {
            account: account.canonical(),
            chain_id,
        })
    }
}

fn owner_count(members: &[Member]) -> usize {
    members.iter().filter(|m| m.role == MemberRole::Owner).count()
}

// ---------------------------------------------------------------------------
// VaultRegistry
// ---------------------------------------------------------------------------

/// Owns vault records and membership.
///
/// Invariants maintained here:
/// - `(chain_id, address)` and `uuid` are unique across vaults.
/// - every vault has at least one `owner` member, from creation onwards.
/// - `(vault_id, address)` is unique among members; re-adding updates.
#[derive(Debug, Clone)]
pub struct VaultRegistry {
    db: VaultDB,
}

impl VaultRegistry {
    pub fn new(db: VaultDB) -> Self {
        Self { db }
    }

    // -- Vaults -------------------------------------------------------------

    /// Create a vault and its owner member in one transaction.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateVault`] if the account or the uuid is taken,
    /// [`CoreError::ChainMismatch`] if the owner is on another chain.
    /// Nothing is written in either case.
    pub fn create_vault(&self, new: NewVault) -> CoreResult<Vault> {
        validate_name(&new.name)?;
        ensure_on_chain(&new.owner, new.account.chain_id())?;

        let result = self.db.transact(|tx| {
            let account_key = keys::vault_by_account(new.account.chain_id(), new.account.address());
            if tx.index_get(&account_key)?.is_some() {
                return abort(CoreError::DuplicateVault(new.account.canonical()));
            }
            let uuid_key = keys::vault_by_uuid(&new.uuid);
            if tx.index_get(&uuid_key)?.is_some() {
                return abort(CoreError::DuplicateVault(new.uuid.to_string()));
            }

            let now = tx.now();
            let vault = Vault {
                id: tx.next_id()?,
                account: new.account.clone(),
                uuid: new.uuid,
                name: new.name.clone(),
                description: new.description.clone(),
                deployment: new.deployment.clone(),
                active_policy_id: None,
                created_at: now,
                updated_at: now,
            };
            let owner = Member {
                id: tx.next_id()?,
                vault_id: vault.id,
                account: new.owner.clone(),
                role: MemberRole::Owner,
                weight: MemberRole::Owner.default_weight(),
                added_by: new.owner.canonical(),
                added_at: now,
                last_activity_at: None,
            };

            tx.put(tx.vaults, &keys::vault(vault.id), &vault)?;
            tx.put(tx.vaults, &keys::members(vault.id), &vec![owner])?;
            tx.index_put(&account_key, vault.id)?;
            tx.index_put(&uuid_key, vault.id)?;
            tx.index_put(&keys::chain_vault(vault.account.chain_id(), vault.id), vault.id)?;
            tx.index_put(&keys::member_vault(new.owner.address(), vault.id), vault.id)?;

            tx.append_audit(
                NewAuditEntry::new(actions::VAULT_CREATED, ResourceType::Vault)
                    .actor_account(&new.owner)
                    .vault(vault.id)
                    .resource_id(vault.id)
                    .data(json!({
                        "account": vault.account,
                        "uuid": vault.uuid,
                        "name": vault.name,
                        "owner": new.owner,
                    })),
            )?;
            Ok(vault)
        });

        match &result {
            Ok(vault) => info!(vault_id = vault.id, account = %vault.account, "vault created"),
            Err(e) => warn!(account = %new.account, error = %e, "vault creation rejected"),
        }
        result
    }

    /// Edit a vault's display metadata. Requires an owner.
    pub fn update_vault(
        &self,
        vault_id: u64,
        update: VaultUpdate,
        actor: &ChainAccount,
    ) -> CoreResult<Vault> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }

        let vault = self.db.transact(|tx| {
            let members = load_members(tx, vault_id)?;
            lift(authorize(&members, actor, &[MemberRole::Owner]))?;

            let mut vault = load_vault(tx, vault_id)?;
            if let Some(name) = &update.name {
                vault.name = name.clone();
            }
            if let Some(description) = &update.description {
                vault.description = Some(description.clone());
            }
            vault.updated_at = tx.now();
            tx.put(tx.vaults, &keys::vault(vault_id), &vault)?;

            tx.append_audit(
                NewAuditEntry::new(actions::VAULT_UPDATED, ResourceType::Vault)
                    .actor_account(actor)
                    .vault(vault_id)
                    .resource_id(vault_id)
                    .data(json!({ "name": update.name, "description": update.description })),
            )?;
            Ok(vault)
        })?;

        info!(vault_id, actor = %actor, "vault updated");
        Ok(vault)
    }

    /// Point the vault at one of its own policies, or clear the reference.
    pub fn set_active_policy(
        &self,
        vault_id: u64,
        policy_id: Option<u64>,
        actor: &ChainAccount,
    ) -> CoreResult<Vault> {
        let vault = self.db.transact(|tx| {
            let members = load_members(tx, vault_id)?;
            lift(authorize(&members, actor, &[MemberRole::Owner]))?;

            if let Some(policy_id) = policy_id {
                let policy: Option<Policy> = tx.get(tx.policies, &keys::policy(policy_id))?;
                match policy {
                    None => return abort(CoreError::PolicyNotFound(policy_id)),
                    Some(p) if p.vault_id != vault_id => {
                        return abort(CoreError::PolicyVaultMismatch {
                            policy_id,
                            vault_id,
                        })
                    }
                    Some(_) => {}
                }
            }

            let mut vault = load_vault(tx, vault_id)?;
            let previous = vault.active_policy_id;
            vault.active_policy_id = policy_id;
            vault.updated_at = tx.now();
            tx.put(tx.vaults, &keys::vault(vault_id), &vault)?;

            tx.append_audit(
                NewAuditEntry::new(actions::VAULT_POLICY_SET, ResourceType::Vault)
                    .actor_account(actor)
                    .vault(vault_id)
                    .resource_id(vault_id)
                    .data(json!({ "policy_id": policy_id, "previous": previous })),
            )?;
            Ok(vault)
        })?;

        info!(vault_id, policy_id = ?policy_id, "active policy set");
        Ok(vault)
    }

    pub fn get_vault(&self, vault_id: u64) -> CoreResult<Vault> {
        self.db
            .get(&self.db.vaults, &keys::vault(vault_id))?
            .ok_or(CoreError::VaultNotFound(vault_id))
    }

    /// Look a vault up by its on-chain address. Address casing is ignored.
    pub fn get_vault_by_address(&self, chain_id: u64, address: &str) -> CoreResult<Option<Vault>> {
        match self.db.index_get(&keys::vault_by_account(chain_id, address))? {
            Some(id) => self.get_vault(id).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_vault_by_uuid(&self, uuid: &Uuid) -> CoreResult<Option<Vault>> {
        match self.db.index_get(&keys::vault_by_uuid(uuid))? {
            Some(id) => self.get_vault(id).map(Some),
            None => Ok(None),
        }
    }

    /// Look a vault up by `eip155:<chain>:<address>`.
    pub fn get_vault_by_canonical(&self, canonical: &str) -> CoreResult<Option<Vault>> {
        let account = ChainAccount::parse(canonical)?;
        self.get_vault_by_address(account.chain_id(), account.address())
    }

    pub fn list_vaults_by_chain(&self, chain_id: u64) -> CoreResult<Vec<Vault>> {
        self.load_all(self.db.index_scan(&keys::chain_vaults(chain_id))?)
    }

    /// Every vault in which `address` holds any role.
    pub fn list_vaults_for_member(&self, address: &str) -> CoreResult<Vec<Vault>> {
        self.load_all(self.db.index_scan(&keys::member_vaults(address))?)
    }

    fn load_all(&self, ids: Vec<u64>) -> CoreResult<Vec<Vault>> {
        ids.into_iter().map(|id| self.get_vault(id)).collect()
    }

    // -- Membership ---------------------------------------------------------

    /// Add a member, or update role and weight if the address is already one.
    ///
    /// `weight` defaults to the role's default weight. Requires an owner.
    ///
    /// # Errors
    ///
    /// - [`CoreError::VaultNotFound`] if the vault does not exist.
    /// - [`CoreError::MissingRole`] if `actor` is not an owner.
    /// - [`CoreError::ChainMismatch`] if `account` is not on the vault's chain.
    /// - [`CoreError::CannotRemoveLastOwner`] if the update would demote the
    ///   vault's only owner.
    pub fn add_member(
        &self,
        vault_id: u64,
        account: &ChainAccount,
        role: MemberRole,
        weight: Option<u32>,
        actor: &ChainAccount,
    ) -> CoreResult<Member> {
        let weight = weight.unwrap_or_else(|| role.default_weight());
        if weight == 0 {
            return Err(CoreError::Validation("member weight must be positive".into()));
        }

        let result = self.db.transact(|tx| {
            let vault = load_vault(tx, vault_id)?;
            let mut members = load_members(tx, vault_id)?;
            lift(authorize(&members, actor, &[MemberRole::Owner]))?;
            lift(ensure_on_chain(account, vault.account.chain_id()))?;

            let existing = members
                .iter()
                .position(|m| m.account == *account);

            let (member, action, previous_role) = match existing {
                Some(idx) => {
                    let previous = members[idx].role;
                    if previous == MemberRole::Owner
                        && role != MemberRole::Owner
                        && owner_count(&members) == 1
                    {
                        return abort(CoreError::CannotRemoveLastOwner { vault_id });
                    }
                    members[idx].role = role;
                    members[idx].weight = weight;
                    (members[idx].clone(), actions::MEMBER_UPDATED, Some(previous))
                }
                None => {
                    let member = Member {
                        id: tx.next_id()?,
                        vault_id,
                        account: account.clone(),
                        role,
                        weight,
                        added_by: actor.canonical(),
                        added_at: tx.now(),
                        last_activity_at: None,
                    };
                    members.push(member.clone());
                    tx.index_put(&keys::member_vault(account.address(), vault_id), vault_id)?;
                    (member, actions::MEMBER_ADDED, None)
                }
            };

            tx.put(tx.vaults, &keys::members(vault_id), &members)?;
            tx.append_audit(
                NewAuditEntry::new(action, ResourceType::Member)
                    .actor_account(actor)
                    .vault(vault_id)
                    .resource_id(member.id)
                    .data(json!({
                        "address": member.account,
                        "role": member.role,
                        "weight": member.weight,
                        "previous_role": previous_role,
                    })),
            )?;
            Ok(member)
        });

        match &result {
            Ok(member) => info!(vault_id, member = %member.account, role = %member.role, "member saved"),
            Err(e) => warn!(vault_id, member = %account, error = %e, "member change rejected"),
        }
        result
    }

    /// Remove a member. Requires an owner.
    ///
    /// Removing an address that is not a member changes nothing but is still
    /// recorded in the audit ledger. Returns whether a member was removed.
    ///
    /// # Errors
    ///
    /// [`CoreError::CannotRemoveLastOwner`] if `account` is the only owner.
    pub fn remove_member(
        &self,
        vault_id: u64,
        account: &ChainAccount,
        actor: &ChainAccount,
    ) -> CoreResult<bool> {
        let result = self.db.transact(|tx| {
            let mut members = load_members(tx, vault_id)?;
            lift(authorize(&members, actor, &[MemberRole::Owner]))?;

            let position = members
                .iter()
                .position(|m| m.account == *account);

            let removed = match position {
                Some(idx) => {
                    if members[idx].role == MemberRole::Owner && owner_count(&members) == 1 {
                        return abort(CoreError::CannotRemoveLastOwner { vault_id });
                    }
                    members.remove(idx);
                    tx.put(tx.vaults, &keys::members(vault_id), &members)?;
                    tx.index_remove(&keys::member_vault(account.address(), vault_id))?;
                    true
                }
                None => false,
            };

            tx.append_audit(
                NewAuditEntry::new(actions::MEMBER_REMOVED, ResourceType::Member)
                    .actor_account(actor)
                    .vault(vault_id)
                    .resource_id(account.canonical())
                    .data(json!({ "address": account, "removed": removed })),
            )?;
            Ok(removed)
        });

        match &result {
            Ok(true) => info!(vault_id, member = %account, "member removed"),
            Ok(false) => debug!(vault_id, member = %account, "remove_member: not a member"),
            Err(e) => warn!(vault_id, member = %account, error = %e, "member removal rejected"),
        }
        result
    }

    /// All members of a vault, in insertion order.
    pub fn list_members(&self, vault_id: u64) -> CoreResult<Vec<Member>> {
        self.get_vault(vault_id)?;
        Ok(self
            .db
            .get(&self.db.vaults, &keys::members(vault_id))?
            .unwrap_or_default())
    }

    /// The member holding `address`. Address casing is ignored.
    pub fn get_member(&self, vault_id: u64, address: &str) -> CoreResult<Member> {
        self.find_member(vault_id, address)?
            .ok_or_else(|| CoreError::MemberNotFound {
                vault_id,
                address: address.to_string(),
            })
    }

    /// Whether `address` is a member. A missing vault has no members.
    pub fn is_member(&self, vault_id: u64, address: &str) -> CoreResult<bool> {
        Ok(self.find_member(vault_id, address)?.is_some())
    }

    pub fn get_member_role(&self, vault_id: u64, address: &str) -> CoreResult<Option<MemberRole>> {
        Ok(self.find_member(vault_id, address)?.map(|m| m.role))
    }

    fn find_member(&self, vault_id: u64, address: &str) -> CoreResult<Option<Member>> {
        let members: Vec<Member> = self
            .db
            .get(&self.db.vaults, &keys::members(vault_id))?
            .unwrap_or_default();
        Ok(members
            .into_iter()
            .find(|m| m.account.same_address(address)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditFilter, AuditLedger};

    const CHAIN: u64 = 84532;

    fn account(byte: u8) -> ChainAccount {
        ChainAccount::new(format!("0x{}", hex::encode([byte; 20])), CHAIN).unwrap()
    }

    fn setup() -> (VaultRegistry, AuditLedger) {
        let db = VaultDB::open_temporary().unwrap();
        (VaultRegistry::new(db.clone()), AuditLedger::new(db))
    }

    fn new_vault(vault: u8, owner: u8) -> NewVault {
        NewVault {
            account: account(vault),
            uuid: Uuid::new_v4(),
            name: "Treasury".into(),
            description: None,
            deployment: None,
            owner: account(owner),
        }
    }

    #[test]
    fn create_vault_adds_owner() {
        let (registry, ledger) = setup();
        let vault = registry.create_vault(new_vault(0xaa, 0x01)).unwrap();

        let members = registry.list_members(vault.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, MemberRole::Owner);
        assert_eq!(members[0].weight, crate::config::OWNER_WEIGHT);
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn duplicate_account_or_uuid_rejected_without_writes() {
        let (registry, ledger) = setup();
        let first = new_vault(0xaa, 0x01);
        let vault = registry.create_vault(first.clone()).unwrap();

        let mut same_account = new_vault(0xaa, 0x02);
        same_account.account =
            ChainAccount::new(vault.account.address().to_ascii_uppercase().replace("0X", "0x"), CHAIN)
                .unwrap();
        assert!(matches!(
            registry.create_vault(same_account),
            Err(CoreError::DuplicateVault(_))
        ));

        let mut same_uuid = new_vault(0xbb, 0x02);
        same_uuid.uuid = first.uuid;
        assert!(matches!(
            registry.create_vault(same_uuid),
            Err(CoreError::DuplicateVault(_))
        ));

        assert_eq!(ledger.count(), 1);
        assert!(registry.get_vault_by_address(CHAIN, account(0xbb).address()).unwrap().is_none());
    }

    #[test]
    fn same_address_on_another_chain_is_a_different_vault() {
        let (registry, _) = setup();
        registry.create_vault(new_vault(0xaa, 0x01)).unwrap();
        let mut other = new_vault(0xaa, 0x01);
        other.account = ChainAccount::new(account(0xaa).address(), 1).unwrap();
        other.owner = ChainAccount::new(account(0x01).address(), 1).unwrap();
        assert!(registry.create_vault(other).is_ok());
        assert_eq!(registry.list_vaults_by_chain(CHAIN).unwrap().len(), 1);
        assert_eq!(registry.list_vaults_by_chain(1).unwrap().len(), 1);
    }

    #[test]
    fn members_must_share_the_vault_chain() {
        let (registry, ledger) = setup();
        let owner = account(0x01);

        let mut foreign_owner = new_vault(0xaa, 0x01);
        foreign_owner.owner = ChainAccount::new(owner.address(), 1).unwrap();
        assert!(matches!(
            registry.create_vault(foreign_owner),
            Err(CoreError::ChainMismatch { chain_id: CHAIN, .. })
        ));

        let vault = registry.create_vault(new_vault(0xaa, 0x01)).unwrap();
        let mainnet_guardian = ChainAccount::new(account(0x02).address(), 1).unwrap();
        assert!(matches!(
            registry.add_member(vault.id, &mainnet_guardian, MemberRole::Guardian, None, &owner),
            Err(CoreError::ChainMismatch { .. })
        ));

        // The owner's address on another chain is a different account.
        let owner_elsewhere = ChainAccount::new(owner.address(), 1).unwrap();
        assert!(matches!(
            registry.add_member(vault.id, &account(0x03), MemberRole::Guardian, None, &owner_elsewhere),
            Err(CoreError::MissingRole { .. })
        ));

        assert_eq!(registry.list_members(vault.id).unwrap().len(), 1);
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn add_member_upserts() {
        let (registry, ledger) = setup();
        let owner = account(0x01);
        let vault = registry.create_vault(new_vault(0xaa, 0x01)).unwrap();

        let added = registry
            .add_member(vault.id, &account(0x02), MemberRole::Guardian, None, &owner)
            .unwrap();
        assert_eq!(added.weight, 1);

        let updated = registry
            .add_member(vault.id, &account(0x02), MemberRole::Approver, Some(5), &owner)
            .unwrap();
        assert_eq!(updated.id, added.id);
        assert_eq!(updated.role, MemberRole::Approver);
        assert_eq!(updated.weight, 5);

        assert_eq!(registry.list_members(vault.id).unwrap().len(), 2);
        assert_eq!(
            ledger
                .search(&AuditFilter::new().action(actions::MEMBER_UPDATED))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn only_owners_manage_members() {
        let (registry, _) = setup();
        let owner = account(0x01);
        let vault = registry.create_vault(new_vault(0xaa, 0x01)).unwrap();
        registry
            .add_member(vault.id, &account(0x02), MemberRole::Guardian, None, &owner)
            .unwrap();

        let err = registry
            .add_member(vault.id, &account(0x03), MemberRole::Viewer, None, &account(0x02))
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingRole { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
    }

    #[test]
    fn last_owner_cannot_be_demoted_or_removed() {
        let (registry, ledger) = setup();
        let owner = account(0x01);
        let vault = registry.create_vault(new_vault(0xaa, 0x01)).unwrap();
        let before = ledger.count();

        assert!(matches!(
            registry.add_member(vault.id, &owner, MemberRole::Guardian, None, &owner),
            Err(CoreError::CannotRemoveLastOwner { .. })
        ));
        assert!(matches!(
            registry.remove_member(vault.id, &owner, &owner),
            Err(CoreError::CannotRemoveLastOwner { .. })
        ));
        assert_eq!(ledger.count(), before);
        assert_eq!(
            registry.get_member_role(vault.id, owner.address()).unwrap(),
            Some(MemberRole::Owner)
        );

        // With a second owner the first can leave.
        registry
            .add_member(vault.id, &account(0x02), MemberRole::Owner, None, &owner)
            .unwrap();
        assert!(registry.remove_member(vault.id, &owner, &account(0x02)).unwrap());
        assert!(!registry.is_member(vault.id, owner.address()).unwrap());
    }

    #[test]
    fn removing_a_stranger_is_a_logged_noop() {
        let (registry, ledger) = setup();
        let owner = account(0x01);
        let vault = registry.create_vault(new_vault(0xaa, 0x01)).unwrap();
        let before = ledger.count();

        assert!(!registry.remove_member(vault.id, &account(0x09), &owner).unwrap());
        assert_eq!(ledger.count(), before + 1);
        assert_eq!(registry.list_members(vault.id).unwrap().len(), 1);
    }

    #[test]
    fn lookups() {
        let (registry, _) = setup();
        let new = new_vault(0xaa, 0x01);
        let uuid = new.uuid;
        let vault = registry.create_vault(new).unwrap();

        assert_eq!(registry.get_vault_by_uuid(&uuid).unwrap().unwrap().id, vault.id);
        assert_eq!(
            registry
                .get_vault_by_canonical(&vault.account.canonical())
                .unwrap()
                .unwrap()
                .id,
            vault.id
        );
        assert!(registry.get_vault_by_canonical("not-an-id").is_err());
        assert_eq!(
            registry.list_vaults_for_member(account(0x01).address()).unwrap()[0].id,
            vault.id
        );
        assert!(matches!(
            registry.get_member(vault.id, account(0x07).address()),
            Err(CoreError::MemberNotFound { .. })
        ));
        assert!(matches!(registry.get_vault(999), Err(CoreError::VaultNotFound(999))));
    }

    #[test]
    fn update_and_policy_reference() {
        let (registry, _) = setup();
        let owner = account(0x01);
        let vault = registry.create_vault(new_vault(0xaa, 0x01)).unwrap();

        let updated = registry
            .update_vault(
                vault.id,
                VaultUpdate {
                    name: Some("Ops".into()),
                    description: Some("operating budget".into()),
                },
                &owner,
            )
            .unwrap();
        assert_eq!(updated.name, "Ops");

        assert!(matches!(
            registry.set_active_policy(vault.id, Some(12345), &owner),
            Err(CoreError::PolicyNotFound(12345))
        ));
        let cleared = registry.set_active_policy(vault.id, None, &owner).unwrap();
        assert_eq!(cleared.active_policy_id, None);
    }
}
