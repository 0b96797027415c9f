//! Crate-wide error type.
//!
//! Every operation in the core returns [`CoreResult`]. Variants are grouped
//! by [`ErrorKind`] so the request-routing layer can map them onto transport
//! status codes without matching every variant.
//!
//! Rejections of every kind except `Storage` are raised before any write, so
//! the store is left exactly as it was before the call.

use thiserror::Error;

use crate::escrow::EscrowStatus;
use crate::identity::IdentifierError;

/// Structural failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced record does not exist. Terminal.
    NotFound,
    /// The request conflicts with an invariant or the current state.
    Conflict,
    /// The actor lacks the role or qualification required.
    Unauthorized,
    /// The input violates a domain rule (amounts, identifiers, allocations).
    Validation,
    /// The store failed. The caller may retry.
    Storage,
}

/// Errors returned by the vault registry, policy store, approval engine and
/// audit ledger.
#[derive(Debug, Error)]
pub enum CoreError {
    // -- NotFound -----------------------------------------------------------
    #[error("vault not found: {0}")]
    VaultNotFound(u64),

    #[error("member {address} not found in vault {vault_id}")]
    MemberNotFound { vault_id: u64, address: String },

    #[error("policy not found: {0}")]
    PolicyNotFound(u64),

    #[error("escrow not found: {0}")]
    EscrowNotFound(u64),

    #[error("participant {participant_id} not found in escrow {escrow_id}")]
    ParticipantNotFound { escrow_id: u64, participant_id: u32 },

    // -- Conflict -----------------------------------------------------------
    #[error("duplicate vault: {0}")]
    DuplicateVault(String),

    #[error("cannot remove the last owner of vault {vault_id}")]
    CannotRemoveLastOwner { vault_id: u64 },

    #[error("threshold {threshold} exceeds guardian count {guardians}")]
    ThresholdExceedsGuardianCount { threshold: u32, guardians: usize },

    #[error("escrow {escrow_id} is {status}, not open for approval")]
    EscrowNotApprovable { escrow_id: u64, status: EscrowStatus },

    #[error("escrow {escrow_id} is {status}, not accepting payments")]
    EscrowNotCollecting { escrow_id: u64, status: EscrowStatus },

    #[error("invalid transition for escrow {escrow_id}: {from} -> {to}")]
    InvalidTransition {
        escrow_id: u64,
        from: EscrowStatus,
        to: EscrowStatus,
    },

    #[error("escrow {escrow_id} is timelocked until {until}")]
    TimelockActive {
        escrow_id: u64,
        until: chrono::DateTime<chrono::Utc>,
    },

    #[error("escrow {escrow_id} has not reached its deadline")]
    DeadlineNotReached { escrow_id: u64 },

    #[error("policy {policy_id} does not belong to vault {vault_id}")]
    PolicyVaultMismatch { policy_id: u64, vault_id: u64 },

    #[error("policy {0} is not active")]
    PolicyInactive(u64),

    #[error("policy {policy_id} governs {actual} escrows, not {expected}")]
    PolicyKindMismatch {
        policy_id: u64,
        expected: String,
        actual: String,
    },

    #[error("policy {0} has no pending change")]
    NoPendingChange(u64),

    #[error("pending change on policy {policy_id} is not due until {effective_at}")]
    ChangeNotDue {
        policy_id: u64,
        effective_at: chrono::DateTime<chrono::Utc>,
    },

    // -- Unauthorized -------------------------------------------------------
    #[error("{0} is not a qualified approver")]
    NotAQualifiedApprover(String),

    #[error("{actor} lacks the required role: {required}")]
    MissingRole { actor: String, required: String },

    // -- Validation ---------------------------------------------------------
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount overflow: value exceeds 256 bits")]
    AmountOverflow,

    #[error("allocations sum to {allocated} but total is {total}")]
    AllocationMismatch { total: String, allocated: String },

    #[error("amount {amount} exceeds the policy spending cap {cap}")]
    ExceedsSpendingCap { amount: String, cap: String },

    #[error("payment of {paid} exceeds allocation {allocated}")]
    Overpayment { paid: String, allocated: String },

    #[error("policy requires full payment of {allocated}, got {paid}")]
    PartialPaymentNotAllowed { paid: String, allocated: String },

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("{account} is not on chain {chain_id}")]
    ChainMismatch { account: String, chain_id: u64 },

    #[error("validation failed: {0}")]
    Validation(String),

    // -- Storage ------------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Structural category of this error.
    pub fn kind(&self) -> ErrorKind {
        use CoreError::*;
        match self {
            VaultNotFound(_)
            | MemberNotFound { .. }
            | PolicyNotFound(_)
            | EscrowNotFound(_)
            | ParticipantNotFound { .. } => ErrorKind::NotFound,

            DuplicateVault(_)
            | CannotRemoveLastOwner { .. }
            | ThresholdExceedsGuardianCount { .. }
            | EscrowNotApprovable { .. }
            | EscrowNotCollecting { .. }
            | InvalidTransition { .. }
            | TimelockActive { .. }
            | DeadlineNotReached { .. }
            | PolicyVaultMismatch { .. }
            | PolicyInactive(_)
            | PolicyKindMismatch { .. }
            | NoPendingChange(_)
            | ChangeNotDue { .. } => ErrorKind::Conflict,

            NotAQualifiedApprover(_) | MissingRole { .. } => ErrorKind::Unauthorized,

            Identifier(_)
            | InvalidAmount(_)
            | AmountOverflow
            | AllocationMismatch { .. }
            | ExceedsSpendingCap { .. }
            | Overpayment { .. }
            | PartialPaymentNotAllowed { .. }
            | InvalidThreshold(_)
            | ChainMismatch { .. }
            | Validation(_) => ErrorKind::Validation,

            Storage(_) | Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_categories() {
        assert_eq!(CoreError::EscrowNotFound(1).kind(), ErrorKind::NotFound);
        assert_eq!(
            CoreError::CannotRemoveLastOwner { vault_id: 1 }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CoreError::NotAQualifiedApprover("x".into()).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(CoreError::AmountOverflow.kind(), ErrorKind::Validation);
        assert_eq!(
            CoreError::Identifier(IdentifierError::InvalidChainId(0)).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CoreError::Serialization("bad".into()).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn only_storage_is_retryable() {
        assert!(!CoreError::Serialization("bad".into()).is_retryable());
        assert!(!CoreError::PolicyInactive(3).is_retryable());
    }
}
