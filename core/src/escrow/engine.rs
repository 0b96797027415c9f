//! [`ApprovalEngine`]: the escrow lifecycle.
//!
//! Every transition is one sled transaction that reads the escrow, checks
//! the transition against the current status, writes the new state and
//! appends the audit entry. Concurrent calls on the same escrow conflict
//! inside sled and are re-run, so each one sees the committed result of the
//! other. In particular exactly one `approve` call observes the threshold
//! being crossed.

use chrono::Duration;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::amount::Amount;
use super::types::{
    Approval, ApprovalProgress, CollectionProgress, Escrow, EscrowDetails, EscrowStatus,
    NewCollectionEscrow, NewPaymentEscrow, OnChainSubmission, Participant, ParticipantStatus,
};
use crate::audit::{actions, NewAuditEntry, ResourceType};
use crate::config::{MAX_PARTICIPANTS, SYSTEM_ACTOR};
use crate::error::{CoreError, CoreResult};
use crate::identity::ChainAccount;
use crate::policy::store::load_policy;
use crate::policy::{PaymentRules, PolicyRules};
use crate::storage::{abort, keys, lift, StoreTx, TxResult, VaultDB};
use crate::vault::registry::{authorize, ensure_on_chain, load_members, load_vault};
use crate::vault::{validate_name, Member, MemberRole};

const REQUESTER_ROLES: &[MemberRole] = &[MemberRole::Owner, MemberRole::Guardian, MemberRole::Requester];
const SUPERVISOR_ROLES: &[MemberRole] = &[MemberRole::Owner, MemberRole::Guardian];

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

fn load_escrow(tx: &StoreTx<'_>, escrow_id: u64) -> TxResult<Escrow> {
    match tx.get(tx.escrows, &keys::escrow(escrow_id))? {
        Some(escrow) => Ok(escrow),
        None => abort(CoreError::EscrowNotFound(escrow_id)),
    }
}

fn load_approvals(tx: &StoreTx<'_>, escrow_id: u64) -> TxResult<Vec<Approval>> {
    Ok(tx
        .get(tx.escrows, &keys::approvals(escrow_id))?
        .unwrap_or_default())
}

fn save_escrow(tx: &StoreTx<'_>, escrow: &Escrow) -> TxResult<()> {
    tx.put(tx.escrows, &keys::escrow(escrow.id), escrow)
}

/// Fields shared by both escrow kinds, before id and policy snapshot.
struct Draft {
    vault_id: u64,
    policy_id: u64,
    name: String,
    description: Option<String>,
    token: String,
    total_amount: Amount,
    deadline: Option<chrono::DateTime<chrono::Utc>>,
    details: EscrowDetails,
    metadata: Value,
    submit: bool,
}

enum ApproveOutcome {
    Duplicate(ApprovalProgress),
    Recorded {
        progress: ApprovalProgress,
        crossed: bool,
    },
}

enum PaymentOutcome {
    Unchanged(Escrow),
    Recorded(Escrow),
}

/// Whether `account` is still a member with an approving role and is
/// committed in `rules`.
fn still_qualified(rules: &PaymentRules, members: &[Member], account: &ChainAccount) -> bool {
    rules.is_committed(account)
        && members
            .iter()
            .any(|m| m.account == *account && m.role.can_approve())
}

fn qualified_count(rules: &PaymentRules, members: &[Member], approvals: &[Approval]) -> u32 {
    approvals
        .iter()
        .filter(|a| still_qualified(rules, members, &a.approver))
        .count() as u32
}

fn progress_of(escrow: &Escrow, approvals: Vec<Approval>, members: &[Member]) -> ApprovalProgress {
    let (counted, stale): (Vec<Approval>, Vec<Approval>) = match escrow.rules.as_payment() {
        Some(rules) => approvals
            .into_iter()
            .partition(|a| still_qualified(rules, members, &a.approver)),
        None => (Vec::new(), approvals),
    };
    ApprovalProgress {
        escrow_id: escrow.id,
        status: escrow.status,
        current: counted.len() as u32,
        required: escrow.rules.as_payment().map_or(0, |rules| rules.threshold),
        approvals: counted,
        stale_approvals: stale,
        executable_after: escrow.executable_after,
    }
}

fn participants_mut(escrow: &mut Escrow) -> CoreResult<(&mut Vec<Participant>, &mut Amount)> {
    match &mut escrow.details {
        EscrowDetails::Collection {
            participants,
            collected_amount,
        } => Ok((participants, collected_amount)),
        EscrowDetails::Payment { .. } => Err(CoreError::Validation(format!(
            "escrow {} is not a collection escrow",
            escrow.id
        ))),
    }
}

// ---------------------------------------------------------------------------
// ApprovalEngine
// ---------------------------------------------------------------------------

/// Drives escrows through their lifecycle and evaluates approval thresholds.
#[derive(Debug, Clone)]
pub struct ApprovalEngine {
    db: VaultDB,
}

impl ApprovalEngine {
    pub fn new(db: VaultDB) -> Self {
        Self { db }
    }

    // -- Creation -----------------------------------------------------------

    /// Open a payment escrow requested by `actor`.
    ///
    /// The escrow enters `submitted` when `new.submit` is set, `draft`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MissingRole`] unless `actor` is an owner, guardian or
    ///   requester of the vault.
    /// - [`CoreError::PolicyVaultMismatch`], [`CoreError::PolicyInactive`],
    ///   [`CoreError::PolicyKindMismatch`] for an unusable policy.
    /// - [`CoreError::InvalidAmount`] for a zero total,
    ///   [`CoreError::ExceedsSpendingCap`] above the policy cap.
    /// - [`CoreError::ChainMismatch`] if the recipient or target is not on
    ///   the vault's chain.
    pub fn create_payment(&self, new: NewPaymentEscrow, actor: &ChainAccount) -> CoreResult<Escrow> {
        if let Some(payload) = &new.payload {
            let hex_digits = payload.strip_prefix("0x").unwrap_or(payload);
            if hex::decode(hex_digits).is_err() {
                return Err(CoreError::Validation("payload must be hex call data".into()));
            }
        }

        self.insert(Draft {
            vault_id: new.vault_id,
            policy_id: new.policy_id,
            name: new.name,
            description: new.description,
            token: new.token,
            total_amount: new.total_amount,
            deadline: new.deadline,
            details: EscrowDetails::Payment {
                requester: actor.clone(),
                recipient: new.recipient,
                target: new.target,
                payload: new.payload,
                scheduled_release: new.scheduled_release,
            },
            metadata: new.metadata,
            submit: new.submit,
        }, actor)
    }

    /// Open a collection escrow. Allocations must sum to the total.
    pub fn create_collection(
        &self,
        new: NewCollectionEscrow,
        actor: &ChainAccount,
    ) -> CoreResult<Escrow> {
        if new.participants.is_empty() {
            return Err(CoreError::Validation("a collection needs at least one participant".into()));
        }
        if new.participants.len() > MAX_PARTICIPANTS {
            return Err(CoreError::Validation(format!(
                "at most {MAX_PARTICIPANTS} participants per collection"
            )));
        }
        if new.participants.iter().any(|p| p.allocated_amount.is_zero()) {
            return Err(CoreError::InvalidAmount("participant allocations must be positive".into()));
        }

        let allocated = Amount::checked_sum(new.participants.iter().map(|p| p.allocated_amount))?;
        if allocated != new.total_amount {
            return Err(CoreError::AllocationMismatch {
                total: new.total_amount.to_string(),
                allocated: allocated.to_string(),
            });
        }

        let participants = new
            .participants
            .into_iter()
            .zip(1u32..)
            .map(|(p, id)| Participant {
                id,
                address: p.address,
                name: p.name,
                allocated_amount: p.allocated_amount,
                paid_amount: Amount::ZERO,
                status: ParticipantStatus::Pending,
                paid_at: None,
            })
            .collect();

        self.insert(Draft {
            vault_id: new.vault_id,
            policy_id: new.policy_id,
            name: new.name,
            description: new.description,
            token: new.token,
            total_amount: new.total_amount,
            deadline: new.deadline,
            details: EscrowDetails::Collection {
                participants,
                collected_amount: Amount::ZERO,
            },
            metadata: new.metadata,
            submit: new.submit,
        }, actor)
    }

    fn insert(&self, draft: Draft, actor: &ChainAccount) -> CoreResult<Escrow> {
        validate_name(&draft.name)?;
        if draft.total_amount.is_zero() {
            return Err(CoreError::InvalidAmount("total amount must be positive".into()));
        }
        if draft.deadline.is_some_and(|deadline| deadline <= self.db.now()) {
            return Err(CoreError::Validation("deadline must be in the future".into()));
        }
        let kind = draft.details.kind();

        let result = self.db.transact(|tx| {
            let chain_id = load_vault(tx, draft.vault_id)?.account.chain_id();
            let members = load_members(tx, draft.vault_id)?;
            lift(authorize(&members, actor, REQUESTER_ROLES))?;
            match &draft.details {
                EscrowDetails::Payment { recipient, target, .. } => {
                    lift(ensure_on_chain(recipient, chain_id))?;
                    if let Some(target) = target {
                        lift(ensure_on_chain(target, chain_id))?;
                    }
                }
                EscrowDetails::Collection { participants, .. } => {
                    for address in participants.iter().filter_map(|p| p.address.as_ref()) {
                        lift(ensure_on_chain(address, chain_id))?;
                    }
                }
            }

            let policy = load_policy(tx, draft.policy_id)?;
            if policy.vault_id != draft.vault_id {
                return abort(CoreError::PolicyVaultMismatch {
                    policy_id: policy.id,
                    vault_id: draft.vault_id,
                });
            }
            if !policy.active {
                return abort(CoreError::PolicyInactive(policy.id));
            }
            if policy.kind() != kind {
                return abort(CoreError::PolicyKindMismatch {
                    policy_id: policy.id,
                    expected: kind.to_string(),
                    actual: policy.kind().to_string(),
                });
            }
            if let PolicyRules::Payment(rules) = &policy.rules {
                if let Some(cap) = rules.max_amount {
                    if draft.total_amount > cap {
                        return abort(CoreError::ExceedsSpendingCap {
                            amount: draft.total_amount.to_string(),
                            cap: cap.to_string(),
                        });
                    }
                }
            }

            let now = tx.now();
            let status = if draft.submit {
                EscrowStatus::Submitted
            } else {
                EscrowStatus::Draft
            };
            let escrow = Escrow {
                id: tx.next_id()?,
                vault_id: draft.vault_id,
                policy_id: policy.id,
                policy_version: policy.version,
                rules: policy.rules.clone(),
                name: draft.name.clone(),
                description: draft.description.clone(),
                token: draft.token.clone(),
                total_amount: draft.total_amount,
                deadline: draft.deadline,
                status,
                details: draft.details.clone(),
                current_approvals: 0,
                approved_at: None,
                executable_after: None,
                tx_hash: None,
                user_op_hash: None,
                created_by: actor.canonical(),
                metadata: draft.metadata.clone(),
                created_at: now,
                updated_at: now,
            };

            save_escrow(tx, &escrow)?;
            tx.index_put(&keys::vault_escrow(escrow.vault_id, escrow.id), escrow.id)?;
            tx.append_audit(
                NewAuditEntry::new(actions::ESCROW_CREATED, ResourceType::Escrow)
                    .actor_account(actor)
                    .vault(escrow.vault_id)
                    .resource_id(escrow.id)
                    .data(json!({
                        "kind": kind,
                        "status": escrow.status,
                        "policy_id": escrow.policy_id,
                        "policy_version": escrow.policy_version,
                        "token": escrow.token,
                        "total_amount": escrow.total_amount,
                    })),
            )?;
            Ok(escrow)
        });

        match &result {
            Ok(escrow) => info!(
                vault_id = escrow.vault_id,
                escrow_id = escrow.id,
                %kind,
                status = %escrow.status,
                "escrow created"
            ),
            Err(e) => warn!(vault_id = draft.vault_id, %kind, error = %e, "escrow creation rejected"),
        }
        result
    }

    // -- Transitions --------------------------------------------------------

    /// `draft -> submitted`. Allowed for the requester and for owners and
    /// guardians.
    pub fn submit(&self, escrow_id: u64, actor: &ChainAccount) -> CoreResult<Escrow> {
        let escrow = self.db.transact(|tx| {
            let mut escrow = load_escrow(tx, escrow_id)?;
            self.authorize_supervisor(tx, &escrow, actor)?;
            if escrow.status != EscrowStatus::Draft {
                return abort(CoreError::InvalidTransition {
                    escrow_id,
                    from: escrow.status,
                    to: EscrowStatus::Submitted,
                });
            }

            escrow.status = EscrowStatus::Submitted;
            escrow.updated_at = tx.now();
            save_escrow(tx, &escrow)?;
            tx.append_audit(
                NewAuditEntry::new(actions::ESCROW_SUBMITTED, ResourceType::Escrow)
                    .actor_account(actor)
                    .vault(escrow.vault_id)
                    .resource_id(escrow_id),
            )?;
            Ok(escrow)
        })?;

        info!(escrow_id, "escrow submitted");
        Ok(escrow)
    }

    /// Record `approver`'s approval of a submitted payment escrow.
    ///
    /// Approving twice is a no-op that returns the current progress without
    /// writing anything. When the approval brings the count to the threshold
    /// the escrow moves to `approved` and, under a timelock, gets an
    /// `executable_after` stamp.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EscrowNotFound`]
    /// - [`CoreError::EscrowNotApprovable`] unless the escrow is `submitted`.
    /// - [`CoreError::NotAQualifiedApprover`] unless `approver` is a member
    ///   with an approving role and is committed in the escrow's rules.
    pub fn approve(
        &self,
        escrow_id: u64,
        approver: &ChainAccount,
        proof: Option<String>,
    ) -> CoreResult<ApprovalProgress> {
        let result = self.db.transact(|tx| {
            let mut escrow = load_escrow(tx, escrow_id)?;
            let mut approvals = load_approvals(tx, escrow_id)?;
            let mut members = load_members(tx, escrow.vault_id)?;

            if approvals.iter().any(|a| a.approver == *approver) {
                return Ok(ApproveOutcome::Duplicate(progress_of(&escrow, approvals, &members)));
            }

            let rules = match escrow.rules.as_payment() {
                Some(rules) => rules.clone(),
                None => {
                    return abort(CoreError::Validation(format!(
                        "escrow {escrow_id} is a collection and takes no approvals"
                    )))
                }
            };
            if escrow.status != EscrowStatus::Submitted {
                return abort(CoreError::EscrowNotApprovable {
                    escrow_id,
                    status: escrow.status,
                });
            }

            let member = members.iter_mut().find(|m| {
                m.account == *approver && m.role.can_approve() && rules.is_committed(approver)
            });
            let member = match member {
                Some(member) => member,
                None => return abort(CoreError::NotAQualifiedApprover(approver.canonical())),
            };

            let now = tx.now();
            member.last_activity_at = Some(now);
            approvals.push(Approval {
                escrow_id,
                member_id: member.id,
                approver: approver.clone(),
                approved_at: now,
                proof: proof.clone(),
            });

            escrow.current_approvals = qualified_count(&rules, &members, &approvals);
            let crossed = escrow.current_approvals >= rules.threshold;
            if crossed {
                escrow.status = EscrowStatus::Approved;
                escrow.approved_at = Some(now);
                if rules.timelock_secs > 0 {
                    escrow.executable_after = Some(now + Duration::seconds(rules.timelock_secs as i64));
                }
            }
            escrow.updated_at = now;

            tx.put(tx.vaults, &keys::members(escrow.vault_id), &members)?;
            tx.put(tx.escrows, &keys::approvals(escrow_id), &approvals)?;
            save_escrow(tx, &escrow)?;

            let action = if crossed {
                actions::ESCROW_APPROVED
            } else {
                actions::APPROVAL_RECORDED
            };
            tx.append_audit(
                NewAuditEntry::new(action, ResourceType::Escrow)
                    .actor_account(approver)
                    .vault(escrow.vault_id)
                    .resource_id(escrow_id)
                    .data(json!({
                        "approver": approver,
                        "current": escrow.current_approvals,
                        "required": rules.threshold,
                        "executable_after": escrow.executable_after,
                    })),
            )?;

            Ok(ApproveOutcome::Recorded {
                progress: progress_of(&escrow, approvals, &members),
                crossed,
            })
        });

        match result {
            Ok(ApproveOutcome::Duplicate(progress)) => {
                debug!(escrow_id, approver = %approver, "duplicate approval ignored");
                Ok(progress)
            }
            Ok(ApproveOutcome::Recorded { progress, crossed }) => {
                if crossed {
                    info!(
                        escrow_id,
                        approvals = progress.current,
                        executable_after = ?progress.executable_after,
                        "escrow approved"
                    );
                } else {
                    info!(
                        escrow_id,
                        approvals = progress.current,
                        required = progress.required,
                        "approval recorded"
                    );
                }
                Ok(progress)
            }
            Err(e) => {
                warn!(escrow_id, approver = %approver, error = %e, "approval rejected");
                Err(e)
            }
        }
    }

    /// Record a participant's cumulative paid amount.
    ///
    /// `paid_amount` is the total paid so far, not an increment. Values at
    /// or below the recorded amount change nothing. With `auto_complete` the
    /// escrow moves to `completed` once every participant has paid.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EscrowNotCollecting`] unless the escrow is `submitted`.
    /// - [`CoreError::ParticipantNotFound`]
    /// - [`CoreError::Overpayment`] above the allocation.
    /// - [`CoreError::PartialPaymentNotAllowed`] when the policy wants the
    ///   full allocation in one go.
    pub fn record_collection_payment(
        &self,
        escrow_id: u64,
        participant_id: u32,
        paid_amount: Amount,
        actor: &str,
    ) -> CoreResult<Escrow> {
        let result = self.db.transact(|tx| {
            let mut escrow = load_escrow(tx, escrow_id)?;
            let config = match escrow.rules.as_collection() {
                Some(config) => *config,
                None => {
                    return abort(CoreError::Validation(format!(
                        "escrow {escrow_id} is not a collection escrow"
                    )))
                }
            };
            if escrow.status != EscrowStatus::Submitted {
                return abort(CoreError::EscrowNotCollecting {
                    escrow_id,
                    status: escrow.status,
                });
            }

            let now = tx.now();
            let vault_id = escrow.vault_id;
            let (participants, collected) = lift(participants_mut(&mut escrow))?;
            let participant = match participants.iter_mut().find(|p| p.id == participant_id) {
                Some(p) => p,
                None => {
                    return abort(CoreError::ParticipantNotFound {
                        escrow_id,
                        participant_id,
                    })
                }
            };

            if paid_amount <= participant.paid_amount {
                return Ok(PaymentOutcome::Unchanged(escrow.clone()));
            }
            if paid_amount > participant.allocated_amount {
                return abort(CoreError::Overpayment {
                    paid: paid_amount.to_string(),
                    allocated: participant.allocated_amount.to_string(),
                });
            }
            if !config.allow_partial && paid_amount != participant.allocated_amount {
                return abort(CoreError::PartialPaymentNotAllowed {
                    paid: paid_amount.to_string(),
                    allocated: participant.allocated_amount.to_string(),
                });
            }

            let previous = participant.paid_amount;
            participant.paid_amount = paid_amount;
            if paid_amount == participant.allocated_amount {
                participant.status = ParticipantStatus::Paid;
                participant.paid_at = Some(now);
            } else {
                participant.status = ParticipantStatus::Partial;
            }

            *collected = lift(Amount::checked_sum(participants.iter().map(|p| p.paid_amount)))?;
            let collected_now = *collected;
            let all_paid = participants
                .iter()
                .all(|p| p.status == ParticipantStatus::Paid);

            let completed = config.auto_complete && all_paid;
            if completed {
                escrow.status = EscrowStatus::Completed;
            }
            escrow.updated_at = now;
            save_escrow(tx, &escrow)?;

            tx.append_audit(
                NewAuditEntry::new(actions::PAYMENT_RECORDED, ResourceType::Participant)
                    .actor(actor)
                    .vault(vault_id)
                    .resource_id(format!("{escrow_id}:{participant_id}"))
                    .data(json!({
                        "escrow_id": escrow_id,
                        "participant_id": participant_id,
                        "paid_amount": paid_amount,
                        "previous": previous,
                        "collected_amount": collected_now,
                        "completed": completed,
                    })),
            )?;
            Ok(PaymentOutcome::Recorded(escrow))
        });

        match result {
            Ok(PaymentOutcome::Unchanged(escrow)) => {
                debug!(escrow_id, participant_id, "payment at or below recorded amount ignored");
                Ok(escrow)
            }
            Ok(PaymentOutcome::Recorded(escrow)) => {
                info!(escrow_id, participant_id, status = %escrow.status, "collection payment recorded");
                Ok(escrow)
            }
            Err(e) => {
                warn!(escrow_id, participant_id, error = %e, "collection payment rejected");
                Err(e)
            }
        }
    }

    /// Cancel an escrow that has not left the off-chain system.
    ///
    /// Allowed from `draft`, `submitted` and `approved`, for the requester
    /// and for owners and guardians.
    pub fn cancel(
        &self,
        escrow_id: u64,
        actor: &ChainAccount,
        reason: Option<String>,
    ) -> CoreResult<Escrow> {
        let escrow = self.db.transact(|tx| {
            let mut escrow = load_escrow(tx, escrow_id)?;
            self.authorize_supervisor(tx, &escrow, actor)?;
            if !escrow.status.is_cancellable() {
                return abort(CoreError::InvalidTransition {
                    escrow_id,
                    from: escrow.status,
                    to: EscrowStatus::Cancelled,
                });
            }

            let from = escrow.status;
            escrow.status = EscrowStatus::Cancelled;
            escrow.updated_at = tx.now();
            save_escrow(tx, &escrow)?;
            tx.append_audit(
                NewAuditEntry::new(actions::ESCROW_CANCELLED, ResourceType::Escrow)
                    .actor_account(actor)
                    .vault(escrow.vault_id)
                    .resource_id(escrow_id)
                    .data(json!({ "from": from, "reason": reason })),
            )?;
            Ok(escrow)
        })?;

        info!(escrow_id, actor = %actor, "escrow cancelled");
        Ok(escrow)
    }

    /// `approved -> on-chain`, once the timelock and any scheduled release
    /// time have passed. Stores the submitter's hashes.
    pub fn mark_on_chain(
        &self,
        escrow_id: u64,
        submission: OnChainSubmission,
        actor: &str,
    ) -> CoreResult<Escrow> {
        let escrow = self.db.transact(|tx| {
            let mut escrow = load_escrow(tx, escrow_id)?;
            if escrow.status != EscrowStatus::Approved {
                return abort(CoreError::InvalidTransition {
                    escrow_id,
                    from: escrow.status,
                    to: EscrowStatus::OnChain,
                });
            }

            let now = tx.now();
            let release = match &escrow.details {
                EscrowDetails::Payment {
                    scheduled_release, ..
                } => *scheduled_release,
                EscrowDetails::Collection { .. } => None,
            };
            for until in [escrow.executable_after, release].into_iter().flatten() {
                if until > now {
                    return abort(CoreError::TimelockActive { escrow_id, until });
                }
            }

            escrow.status = EscrowStatus::OnChain;
            escrow.tx_hash = submission.tx_hash.clone();
            escrow.user_op_hash = submission.user_op_hash.clone();
            escrow.updated_at = now;
            save_escrow(tx, &escrow)?;
            tx.append_audit(
                NewAuditEntry::new(actions::ESCROW_ON_CHAIN, ResourceType::Escrow)
                    .actor(actor)
                    .vault(escrow.vault_id)
                    .resource_id(escrow_id)
                    .tx_hash(submission.tx_hash.clone())
                    .user_op_hash(submission.user_op_hash.clone()),
            )?;
            Ok(escrow)
        })?;

        info!(escrow_id, tx_hash = ?escrow.tx_hash, user_op_hash = ?escrow.user_op_hash, "escrow on-chain");
        Ok(escrow)
    }

    /// Close an escrow.
    ///
    /// Payment escrows complete from `on-chain`. Collection escrows whose
    /// policy does not auto-complete are closed here from `submitted`, once
    /// every participant has paid.
    pub fn complete(&self, escrow_id: u64, actor: &str) -> CoreResult<Escrow> {
        let escrow = self.db.transact(|tx| {
            let mut escrow = load_escrow(tx, escrow_id)?;
            let allowed = match &escrow.details {
                EscrowDetails::Payment { .. } => escrow.status == EscrowStatus::OnChain,
                EscrowDetails::Collection { participants, .. } => {
                    if escrow.status == EscrowStatus::Submitted
                        && participants.iter().any(|p| p.status != ParticipantStatus::Paid)
                    {
                        return abort(CoreError::Validation(format!(
                            "escrow {escrow_id} still has unpaid participants"
                        )));
                    }
                    escrow.status == EscrowStatus::Submitted
                }
            };
            if !allowed {
                return abort(CoreError::InvalidTransition {
                    escrow_id,
                    from: escrow.status,
                    to: EscrowStatus::Completed,
                });
            }

            let from = escrow.status;
            escrow.status = EscrowStatus::Completed;
            escrow.updated_at = tx.now();
            save_escrow(tx, &escrow)?;
            tx.append_audit(
                NewAuditEntry::new(actions::ESCROW_COMPLETED, ResourceType::Escrow)
                    .actor(actor)
                    .vault(escrow.vault_id)
                    .resource_id(escrow_id)
                    .tx_hash(escrow.tx_hash.clone())
                    .user_op_hash(escrow.user_op_hash.clone())
                    .data(json!({ "from": from })),
            )?;
            Ok(escrow)
        })?;

        info!(escrow_id, "escrow completed");
        Ok(escrow)
    }

    /// Expire an escrow whose deadline has passed. Idempotent: an escrow
    /// that is already expired is returned unchanged.
    ///
    /// Unpaid collection participants are marked `overdue`.
    ///
    /// # Errors
    ///
    /// [`CoreError::DeadlineNotReached`] before the deadline (or without
    /// one), [`CoreError::InvalidTransition`] for completed or cancelled
    /// escrows.
    pub fn mark_expired(&self, escrow_id: u64) -> CoreResult<Escrow> {
        let result = self.db.transact(|tx| {
            let mut escrow = load_escrow(tx, escrow_id)?;
            if escrow.status == EscrowStatus::Expired {
                return Ok((escrow, false));
            }
            if escrow.status.is_terminal() {
                return abort(CoreError::InvalidTransition {
                    escrow_id,
                    from: escrow.status,
                    to: EscrowStatus::Expired,
                });
            }
            let now = tx.now();
            if !escrow.is_overdue(now) {
                return abort(CoreError::DeadlineNotReached { escrow_id });
            }

            let from = escrow.status;
            escrow.status = EscrowStatus::Expired;
            escrow.updated_at = now;
            let mut overdue = 0usize;
            if let EscrowDetails::Collection { participants, .. } = &mut escrow.details {
                for p in participants.iter_mut().filter(|p| p.status != ParticipantStatus::Paid) {
                    p.status = ParticipantStatus::Overdue;
                    overdue += 1;
                }
            }
            save_escrow(tx, &escrow)?;
            tx.append_audit(
                NewAuditEntry::new(actions::ESCROW_EXPIRED, ResourceType::Escrow)
                    .actor(SYSTEM_ACTOR)
                    .vault(escrow.vault_id)
                    .resource_id(escrow_id)
                    .data(json!({
                        "from": from,
                        "deadline": escrow.deadline,
                        "overdue_participants": overdue,
                    })),
            )?;
            Ok((escrow, true))
        });

        let (escrow, changed) = result?;
        if changed {
            info!(escrow_id, "escrow expired");
        } else {
            debug!(escrow_id, "escrow already expired");
        }
        Ok(escrow)
    }

    /// Expire every non-terminal escrow whose deadline has passed.
    /// Returns the ids that were expired by this call.
    pub fn expire_overdue(&self) -> CoreResult<Vec<u64>> {
        let now = self.db.now();
        let candidates: Vec<Escrow> = self
            .db
            .scan::<Escrow>(&self.db.escrows, keys::ESCROW_PREFIX.as_bytes())?
            .into_iter()
            .filter(|e| !e.status.is_terminal() && e.is_overdue(now))
            .collect();

        let mut expired = Vec::new();
        for escrow in candidates {
            match self.mark_expired(escrow.id) {
                Ok(_) => expired.push(escrow.id),
                // Completed or cancelled by someone else since the scan.
                Err(CoreError::InvalidTransition { .. }) | Err(CoreError::DeadlineNotReached { .. }) => {
                    debug!(escrow_id = escrow.id, "escrow changed before expiry, skipped");
                }
                Err(e) => return Err(e),
            }
        }

        info!(count = expired.len(), "expiry sweep finished");
        Ok(expired)
    }

    // -- Reads --------------------------------------------------------------

    pub fn get_escrow(&self, escrow_id: u64) -> CoreResult<Escrow> {
        self.db
            .get(&self.db.escrows, &keys::escrow(escrow_id))?
            .ok_or(CoreError::EscrowNotFound(escrow_id))
    }

    /// Every escrow of a vault, oldest first.
    pub fn list_escrows(&self, vault_id: u64) -> CoreResult<Vec<Escrow>> {
        self.db
            .index_scan(&keys::vault_escrows(vault_id))?
            .into_iter()
            .map(|id| self.get_escrow(id))
            .collect()
    }

    /// Approvals recorded on an escrow, in the order they were given.
    pub fn approvals(&self, escrow_id: u64) -> CoreResult<Vec<Approval>> {
        Ok(self
            .db
            .get(&self.db.escrows, &keys::approvals(escrow_id))?
            .unwrap_or_default())
    }

    /// Current approval count against the escrow's threshold.
    ///
    /// Only approvals whose approver still qualifies are counted; the rest
    /// are reported in `stale_approvals`.
    pub fn compute_approval_progress(&self, escrow_id: u64) -> CoreResult<ApprovalProgress> {
        let escrow = self.get_escrow(escrow_id)?;
        let approvals = self.approvals(escrow_id)?;
        let members: Vec<Member> = self
            .db
            .get(&self.db.vaults, &keys::members(escrow.vault_id))?
            .unwrap_or_default();
        Ok(progress_of(&escrow, approvals, &members))
    }

    /// Collected versus total for a collection escrow.
    pub fn collection_progress(&self, escrow_id: u64) -> CoreResult<CollectionProgress> {
        let escrow = self.get_escrow(escrow_id)?;
        match &escrow.details {
            EscrowDetails::Collection {
                participants,
                collected_amount,
            } => Ok(CollectionProgress {
                escrow_id,
                status: escrow.status,
                collected: *collected_amount,
                total: escrow.total_amount,
                completion_rate: collected_amount.percent_of(escrow.total_amount),
                paid_participants: participants
                    .iter()
                    .filter(|p| p.status == ParticipantStatus::Paid)
                    .count(),
                total_participants: participants.len(),
            }),
            EscrowDetails::Payment { .. } => Err(CoreError::Validation(format!(
                "escrow {escrow_id} is not a collection escrow"
            ))),
        }
    }

    // -- Internal -----------------------------------------------------------

    /// The requester, or any owner or guardian of the escrow's vault.
    fn authorize_supervisor(
        &self,
        tx: &StoreTx<'_>,
        escrow: &Escrow,
        actor: &ChainAccount,
    ) -> TxResult<()> {
        let members = load_members(tx, escrow.vault_id)?;
        let is_requester = escrow.created_by.eq_ignore_ascii_case(&actor.canonical())
            && members.iter().any(|m| m.account == *actor);
        if is_requester {
            return Ok(());
        }
        lift(authorize(&members, actor, SUPERVISOR_ROLES))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
