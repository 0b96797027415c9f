//! # Protocol Configuration & Constants
//!
//! Every magic number in Quorum lives here. If you're hardcoding a constant
//! somewhere else, move it here first.
//!
//! Some of these values end up inside persisted records (owner weight, the
//! CAIP namespace). Changing them after data exists means a migration, not a
//! redeploy.

// ---------------------------------------------------------------------------
// Account Identifiers
// ---------------------------------------------------------------------------

/// CAIP-2 namespace for EVM chains. Canonical identifiers look like
/// `eip155:84532:0xAbC...`.
pub const CAIP_NAMESPACE: &str = "eip155";

/// Length of an EVM address in bytes.
pub const ADDRESS_BYTES: usize = 20;

/// Length of an EVM address as a `0x`-prefixed hex string.
pub const ADDRESS_HEX_LENGTH: usize = 2 + ADDRESS_BYTES * 2;

/// Characters kept at the front of a shortened address (includes `0x`).
pub const SHORT_FORM_PREFIX: usize = 6;

/// Characters kept at the end of a shortened address.
pub const SHORT_FORM_SUFFIX: usize = 4;

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Weight assigned to a vault's founding owner.
///
/// Deliberately distinct from [`DEFAULT_MEMBER_WEIGHT`] so the founding
/// record is recognizable in raw data. Weights are stored but do not take
/// part in threshold arithmetic, which counts distinct approvers.
pub const OWNER_WEIGHT: u32 = 100;

/// Weight assigned to members added without an explicit weight.
pub const DEFAULT_MEMBER_WEIGHT: u32 = 1;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Smallest threshold a payment policy may declare.
pub const MIN_THRESHOLD: u32 = 1;

/// Upper bound on the guardian/owner sets a policy may commit to.
/// Keeps commitment root computation and qualification checks cheap.
pub const MAX_COMMITTED_ADDRESSES: usize = 256;

/// Longest timelock a policy may declare: 30 days.
pub const MAX_TIMELOCK_SECS: u64 = 30 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Escrows
// ---------------------------------------------------------------------------

/// Maximum participants on a single collection escrow.
pub const MAX_PARTICIPANTS: usize = 500;

/// Maximum length of escrow and policy names, in bytes.
pub const MAX_NAME_LENGTH: usize = 256;

// ---------------------------------------------------------------------------
// Audit Ledger
// ---------------------------------------------------------------------------

/// Page size used when a search does not specify one.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Hard cap on a single search page. Larger requests are clamped, not rejected.
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Number of actors reported by [`crate::audit::AuditLedger::stats`].
pub const TOP_ACTORS_LIMIT: usize = 10;

/// Retention used by the maintenance sweep when none is configured.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Actor recorded for system-driven transitions (expiry sweeps).
pub const SYSTEM_ACTOR: &str = "system";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_weight_is_privileged() {
        assert!(OWNER_WEIGHT > DEFAULT_MEMBER_WEIGHT);
    }

    #[test]
    fn test_search_limits_sanity() {
        assert!(DEFAULT_SEARCH_LIMIT <= MAX_SEARCH_LIMIT);
        assert!(TOP_ACTORS_LIMIT > 0);
    }

    #[test]
    fn test_address_length() {
        assert_eq!(ADDRESS_HEX_LENGTH, 42);
        assert!(SHORT_FORM_PREFIX + SHORT_FORM_SUFFIX < ADDRESS_HEX_LENGTH);
    }
}
