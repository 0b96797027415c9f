//! End-to-end tests for the Quorum core.
//!
//! Each test opens its own temporary store and wires the four components
//! over it the way the node does: one `VaultDB`, cloned into each
//! component.

use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;

use quorum_core::audit::actions;
use quorum_core::escrow::{
    EscrowStatus, NewCollectionEscrow, NewParticipant, NewPaymentEscrow, OnChainSubmission,
};
use quorum_core::policy::{CollectionConfig, PaymentPolicyParams};
use quorum_core::vault::NewVault;
use quorum_core::{
    Amount, ApprovalEngine, AuditFilter, AuditLedger, ChainAccount, Clock, CoreError, ManualClock,
    MemberRole, PolicyStore, VaultDB, VaultRegistry,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const CHAIN: u64 = 84532;

struct Stack {
    registry: VaultRegistry,
    policies: PolicyStore,
    engine: ApprovalEngine,
    ledger: AuditLedger,
    clock: Arc<ManualClock>,
}

fn stack() -> Stack {
    let clock = Arc::new(ManualClock::starting_now());
    let db = VaultDB::open_temporary()
        .expect("temp db")
        .with_clock(clock.clone());
    Stack {
        registry: VaultRegistry::new(db.clone()),
        policies: PolicyStore::new(db.clone()),
        engine: ApprovalEngine::new(db.clone()),
        ledger: AuditLedger::new(db),
        clock,
    }
}

fn account(byte: u8) -> ChainAccount {
    ChainAccount::new(format!("0x{}", hex::encode([byte; 20])), CHAIN).expect("valid address")
}

fn new_vault(owner: &ChainAccount) -> NewVault {
    NewVault {
        account: account(0xaa),
        uuid: uuid::Uuid::new_v4(),
        name: "Family Treasury".into(),
        description: None,
        deployment: None,
        owner: owner.clone(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn vault_lookup_by_address_and_canonical_id() {
    let s = stack();
    let owner = account(0x01);
    let vault_account =
        ChainAccount::new(format!("0x{}", "AAAA".repeat(10)), CHAIN).expect("valid address");
    let vault = s
        .registry
        .create_vault(NewVault {
            account: vault_account.clone(),
            ..new_vault(&owner)
        })
        .expect("create vault");

    let by_address = s
        .registry
        .get_vault_by_address(CHAIN, &format!("0x{}", "aaaa".repeat(10)))
        .expect("lookup")
        .expect("vault present");
    assert_eq!(by_address.id, vault.id);

    let canonical = format!("eip155:{CHAIN}:0x{}", "AAAA".repeat(10));
    let by_canonical = s
        .registry
        .get_vault_by_canonical(&canonical)
        .expect("lookup")
        .expect("vault present");
    assert_eq!(by_canonical.id, vault.id);

    let members = s.registry.list_members(vault.id).expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, MemberRole::Owner);

    // Same account again, different uuid: rejected, nothing written.
    let before = s.ledger.count();
    let dup = s.registry.create_vault(NewVault {
        account: vault_account,
        ..new_vault(&owner)
    });
    assert!(matches!(dup, Err(CoreError::DuplicateVault(_))));
    assert_eq!(s.ledger.count(), before);
}

#[test]
fn payment_threshold_with_duplicate_approval() {
    let s = stack();
    let owner = account(0x01);
    let vault = s.registry.create_vault(new_vault(&owner)).expect("vault");
    let guardians: Vec<ChainAccount> = [0x11, 0x12, 0x13].into_iter().map(account).collect();
    for g in &guardians {
        s.registry
            .add_member(vault.id, g, MemberRole::Guardian, None, &owner)
            .expect("add guardian");
    }

    let policy = s
        .policies
        .create_payment_policy(
            vault.id,
            PaymentPolicyParams {
                name: "Two of three".into(),
                description: None,
                threshold: 2,
                timelock_secs: 0,
                max_amount: None,
                guardians: guardians.clone(),
                owners: vec![owner.clone()],
            },
            &owner,
        )
        .expect("policy");

    let escrow = s
        .engine
        .create_payment(
            NewPaymentEscrow {
                vault_id: vault.id,
                policy_id: policy.id,
                name: "Roof repair".into(),
                description: None,
                token: "USDC".into(),
                total_amount: Amount::from(2_500u64),
                deadline: None,
                recipient: account(0xee),
                target: None,
                payload: None,
                scheduled_release: None,
                metadata: Value::Null,
                submit: true,
            },
            &owner,
        )
        .expect("escrow");
    assert_eq!(escrow.status, EscrowStatus::Submitted);

    let p = s.engine.approve(escrow.id, &guardians[0], None).expect("G1");
    assert_eq!((p.status, p.current), (EscrowStatus::Submitted, 1));

    let p = s.engine.approve(escrow.id, &guardians[1], None).expect("G2");
    assert_eq!((p.status, p.current), (EscrowStatus::Approved, 2));

    let p = s.engine.approve(escrow.id, &guardians[0], None).expect("G1 again");
    assert_eq!((p.status, p.current), (EscrowStatus::Approved, 2));

    let progress = s.engine.compute_approval_progress(escrow.id).expect("progress");
    assert_eq!(progress.current, 2);
    assert!(progress.is_met());

    // Off-chain lifecycle continues through the submitter's write-back.
    let on_chain = s
        .engine
        .mark_on_chain(
            escrow.id,
            OnChainSubmission {
                tx_hash: None,
                user_op_hash: Some("0xfeed".into()),
            },
            "bundler",
        )
        .expect("on-chain");
    assert_eq!(on_chain.status, EscrowStatus::OnChain);
    let done = s.engine.complete(escrow.id, "bundler").expect("complete");
    assert_eq!(done.status, EscrowStatus::Completed);

    let trail = s.ledger.by_user_op_hash("0xfeed").expect("by user op");
    assert_eq!(trail.len(), 2);
}

#[test]
fn collection_completes_when_everyone_paid() {
    let s = stack();
    let owner = account(0x01);
    let vault = s.registry.create_vault(new_vault(&owner)).expect("vault");
    let policy = s
        .policies
        .create_collection_policy(vault.id, "Trip fund", None, CollectionConfig::default(), &owner)
        .expect("policy");

    let escrow = s
        .engine
        .create_collection(
            NewCollectionEscrow {
                vault_id: vault.id,
                policy_id: policy.id,
                name: "Ski trip".into(),
                description: None,
                token: "USDC".into(),
                total_amount: Amount::from(300u64),
                deadline: Some(s.clock.now() + Duration::days(14)),
                participants: (0..3)
                    .map(|i| NewParticipant {
                        address: Some(account(0x20 + i)),
                        name: None,
                        allocated_amount: Amount::from(100u64),
                    })
                    .collect(),
                metadata: Value::Null,
                submit: true,
            },
            &owner,
        )
        .expect("escrow");

    s.engine
        .record_collection_payment(escrow.id, 1, Amount::from(100u64), "watcher")
        .expect("P1");
    s.engine
        .record_collection_payment(escrow.id, 2, Amount::from(100u64), "watcher")
        .expect("P2");

    let progress = s.engine.collection_progress(escrow.id).expect("progress");
    assert_eq!(progress.collected, Amount::from(200u64));
    assert_eq!(progress.completion_rate, 66);
    assert_eq!(progress.status, EscrowStatus::Submitted);

    let escrow = s
        .engine
        .record_collection_payment(escrow.id, 3, Amount::from(100u64), "watcher")
        .expect("P3");
    assert_eq!(escrow.status, EscrowStatus::Completed);

    let progress = s.engine.collection_progress(escrow.id).expect("progress");
    assert_eq!(progress.completion_rate, 100);
    assert_eq!(progress.paid_participants, 3);
}

#[test]
fn retention_cleanup_keeps_recent_entries() {
    let s = stack();
    let now = s.clock.now();

    s.clock.set(now - Duration::days(100));
    s.ledger
        .append(quorum_core::NewAuditEntry::new("external_note", quorum_core::ResourceType::External))
        .expect("old entry");
    s.clock.set(now - Duration::days(1));
    s.ledger
        .append(quorum_core::NewAuditEntry::new("external_note", quorum_core::ResourceType::External))
        .expect("recent entry");
    s.clock.set(now);

    assert_eq!(s.ledger.cleanup(90).expect("cleanup"), 1);
    let remaining = s.ledger.search(&AuditFilter::new()).expect("search");
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].timestamp > now - Duration::days(2));
}

#[test]
fn sole_owner_cannot_be_removed() {
    let s = stack();
    let owner = account(0x01);
    let vault = s.registry.create_vault(new_vault(&owner)).expect("vault");
    let before_members = s.registry.list_members(vault.id).expect("members");
    let before_audit = s.ledger.count();

    let result = s.registry.remove_member(vault.id, &owner, &owner);
    assert!(matches!(result, Err(CoreError::CannotRemoveLastOwner { .. })));

    assert_eq!(s.registry.list_members(vault.id).expect("members"), before_members);
    assert_eq!(s.registry.get_vault(vault.id).expect("vault"), vault);
    assert_eq!(s.ledger.count(), before_audit);
}

// ---------------------------------------------------------------------------
// Cross-component behavior
// ---------------------------------------------------------------------------

#[test]
fn every_mutation_leaves_one_audit_entry() {
    let s = stack();
    let owner = account(0x01);
    let guardian = account(0x11);

    let vault = s.registry.create_vault(new_vault(&owner)).expect("vault");
    s.registry
        .add_member(vault.id, &guardian, MemberRole::Guardian, None, &owner)
        .expect("guardian");
    let policy = s
        .policies
        .create_payment_policy(
            vault.id,
            PaymentPolicyParams {
                name: "Solo".into(),
                description: None,
                threshold: 1,
                timelock_secs: 0,
                max_amount: None,
                guardians: vec![guardian.clone()],
                owners: vec![],
            },
            &owner,
        )
        .expect("policy");
    let escrow = s
        .engine
        .create_payment(
            NewPaymentEscrow {
                vault_id: vault.id,
                policy_id: policy.id,
                name: "Groceries".into(),
                description: None,
                token: "USDC".into(),
                total_amount: Amount::from(40u64),
                deadline: None,
                recipient: account(0xee),
                target: None,
                payload: None,
                scheduled_release: None,
                metadata: Value::Null,
                submit: false,
            },
            &owner,
        )
        .expect("escrow");
    s.engine.submit(escrow.id, &owner).expect("submit");
    s.engine.approve(escrow.id, &guardian, None).expect("approve");
    s.engine.cancel(escrow.id, &owner, None).expect("cancel");

    let trail = s
        .ledger
        .search(&AuditFilter::new().vault(vault.id))
        .expect("search");
    let actions_newest_first: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions_newest_first,
        vec![
            actions::ESCROW_CANCELLED,
            actions::ESCROW_APPROVED,
            actions::ESCROW_SUBMITTED,
            actions::ESCROW_CREATED,
            actions::POLICY_CREATED,
            actions::MEMBER_ADDED,
            actions::VAULT_CREATED,
        ]
    );

    let stats = s.ledger.stats(&AuditFilter::new()).expect("stats");
    assert_eq!(stats.total_logs, 7);
    assert_eq!(stats.top_actors[0].actor, owner.canonical());
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let owner = account(0x01);

    let vault_id = {
        let db = VaultDB::open(dir.path()).expect("open");
        let registry = VaultRegistry::new(db.clone());
        let vault = registry.create_vault(new_vault(&owner)).expect("vault");
        db.flush().expect("flush");
        vault.id
    };

    let db = VaultDB::open(dir.path()).expect("reopen");
    let registry = VaultRegistry::new(db.clone());
    let ledger = AuditLedger::new(db);
    assert_eq!(registry.get_vault(vault_id).expect("vault").name, "Family Treasury");
    assert!(registry.is_member(vault_id, owner.address()).expect("member"));
    assert_eq!(ledger.count(), 1);

    // Ids keep increasing across restarts.
    let second = registry
        .create_vault(NewVault {
            account: account(0xbb),
            ..new_vault(&owner)
        })
        .expect("second vault");
    assert!(second.id > vault_id);
}
