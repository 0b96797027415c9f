//! Escrow, participant and approval records, plus the inputs and read
//! models of the approval engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::amount::Amount;
use crate::identity::ChainAccount;
use crate::policy::PolicyRules;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The two classes of funds movement. Policies govern exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowKind {
    /// One recipient, gated by threshold approval.
    Payment,
    /// Many payers, each owing an allocation.
    Collection,
}

impl fmt::Display for EscrowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowKind::Payment => f.write_str("payment"),
            EscrowKind::Collection => f.write_str("collection"),
        }
    }
}

/// Lifecycle status of an escrow.
///
/// ```text
/// draft -> submitted -> approved -> on-chain -> completed
///   \________\_____________\___________\______ cancelled | expired
/// ```
///
/// `cancelled` is only reachable before `on-chain`. `completed`,
/// `cancelled` and `expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscrowStatus {
    Draft,
    Submitted,
    Approved,
    OnChain,
    Completed,
    Cancelled,
    Expired,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Completed | EscrowStatus::Cancelled | EscrowStatus::Expired
        )
    }

    /// Whether the escrow can still be cancelled off-chain.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Draft | EscrowStatus::Submitted | EscrowStatus::Approved
        )
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EscrowStatus::Draft => "draft",
            EscrowStatus::Submitted => "submitted",
            EscrowStatus::Approved => "approved",
            EscrowStatus::OnChain => "on-chain",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Cancelled => "cancelled",
            EscrowStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Payment state of one collection participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One payer in a collection escrow.
///
/// `paid_amount <= allocated_amount` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Position in the escrow's participant list, starting at 1.
    pub id: u32,
    pub address: Option<ChainAccount>,
    pub name: Option<String>,
    pub allocated_amount: Amount,
    pub paid_amount: Amount,
    pub status: ParticipantStatus,
    /// When the allocation was first paid in full.
    pub paid_at: Option<DateTime<Utc>>,
}

/// Kind-specific escrow fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscrowDetails {
    Payment {
        requester: ChainAccount,
        recipient: ChainAccount,
        /// Contract to call on execution, if not a plain transfer.
        target: Option<ChainAccount>,
        /// Hex call data for `target`.
        payload: Option<String>,
        /// Earliest time the payment may leave the off-chain system.
        scheduled_release: Option<DateTime<Utc>>,
    },
    Collection {
        participants: Vec<Participant>,
        /// Always the sum of participant `paid_amount`.
        collected_amount: Amount,
    },
}

impl EscrowDetails {
    pub fn kind(&self) -> EscrowKind {
        match self {
            EscrowDetails::Payment { .. } => EscrowKind::Payment,
            EscrowDetails::Collection { .. } => EscrowKind::Collection,
        }
    }
}

/// One funds-movement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: u64,
    pub vault_id: u64,
    pub policy_id: u64,
    /// Policy version the rules were copied from.
    pub policy_version: u32,
    /// Rules in force for this escrow, frozen at creation. Later policy
    /// edits do not reach existing escrows.
    pub rules: PolicyRules,
    pub name: String,
    pub description: Option<String>,
    /// Token contract address, or a symbol for the chain's native asset.
    pub token: String,
    pub total_amount: Amount,
    pub deadline: Option<DateTime<Utc>>,
    pub status: EscrowStatus,
    pub details: EscrowDetails,
    /// Distinct qualifying approvals recorded so far.
    pub current_approvals: u32,
    pub approved_at: Option<DateTime<Utc>>,
    /// Set when the threshold is reached under a non-zero timelock.
    pub executable_after: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
    pub user_op_hash: Option<String>,
    /// Canonical identifier of the creating member.
    pub created_by: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Escrow {
    pub fn kind(&self) -> EscrowKind {
        self.details.kind()
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// One member's endorsement of a payment escrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub escrow_id: u64,
    pub member_id: u64,
    pub approver: ChainAccount,
    pub approved_at: DateTime<Utc>,
    /// Off-chain signature or other proof, stored as given.
    pub proof: Option<String>,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Request to open a payment escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentEscrow {
    pub vault_id: u64,
    pub policy_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub token: String,
    pub total_amount: Amount,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    pub recipient: ChainAccount,
    #[serde(default)]
    pub target: Option<ChainAccount>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub scheduled_release: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
    /// Enter `submitted` directly instead of `draft`.
    #[serde(default)]
    pub submit: bool,
}

/// One payer of a new collection escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewParticipant {
    #[serde(default)]
    pub address: Option<ChainAccount>,
    #[serde(default)]
    pub name: Option<String>,
    pub allocated_amount: Amount,
}

/// Request to open a collection escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCollectionEscrow {
    pub vault_id: u64,
    pub policy_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub token: String,
    pub total_amount: Amount,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    pub participants: Vec<NewParticipant>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub submit: bool,
}

/// Hashes written back by the on-chain submitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainSubmission {
    pub tx_hash: Option<String>,
    pub user_op_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Approval state of a payment escrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalProgress {
    pub escrow_id: u64,
    pub status: EscrowStatus,
    /// Approvals whose approver still qualifies.
    pub current: u32,
    pub required: u32,
    /// The approvals counted in `current`.
    pub approvals: Vec<Approval>,
    /// Approvals from accounts that have since left the vault, lost their
    /// approving role or dropped out of the committed sets.
    #[serde(default)]
    pub stale_approvals: Vec<Approval>,
    pub executable_after: Option<DateTime<Utc>>,
}

impl ApprovalProgress {
    pub fn is_met(&self) -> bool {
        self.current >= self.required
    }
}

/// Payment state of a collection escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProgress {
    pub escrow_id: u64,
    pub status: EscrowStatus,
    pub collected: Amount,
    pub total: Amount,
    /// Whole percent, rounded down.
    pub completion_rate: u8,
    pub paid_participants: usize,
    pub total_participants: usize,
}
