//! # Policy Store
//!
//! A policy is the rule set gating one kind of escrow in a vault.
//!
//! - **Payment** policies carry a threshold of distinct approvals, a
//!   timelock, an optional spending cap, and the guardian and owner address
//!   sets, committed as keccak Merkle roots for on-chain verification.
//! - **Collection** policies control whether partial payments are accepted
//!   and whether the escrow completes itself once everyone has paid.
//!
//! ## Changes
//!
//! Edits take one of three paths, each with its own audit action:
//!
//! ```text
//! update_policy                  -> policy_updated                   (now)
//! request_change(Scheduled{..})  -> policy_update_scheduled          (stored)
//! apply_scheduled                -> policy_scheduled_update_applied  (once due)
//! request_change(Emergency{..})  -> policy_emergency_update          (now, reason kept)
//! ```
//!
//! Escrows snapshot the rules at creation, so none of these paths alter
//! what an existing escrow is evaluated against.

pub mod commitment;
pub mod store;
pub mod types;

pub use commitment::address_set_root;
pub use store::PolicyStore;
pub use types::{
    CollectionConfig, PaymentPolicyParams, PaymentRules, PendingChange, Policy,
    PolicyChangeRequest, PolicyRules, PolicyUpdate,
};
