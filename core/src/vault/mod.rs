//! # Vault Registry
//!
//! Vaults are custody groups: an on-chain account plus the set of members
//! allowed to act on it. The registry owns both records and keeps three
//! invariants:
//!
//! | Invariant                                   | Enforced by                          |
//! |---------------------------------------------|--------------------------------------|
//! | `(chain_id, address)` unique across vaults  | `vault-account` index, checked in-tx |
//! | `uuid` unique across vaults                 | `vault-uuid` index, checked in-tx    |
//! | at least one `owner` per vault              | creation, demotion and removal paths |
//!
//! Membership is an upsert on `(vault_id, address)`: adding an existing
//! address changes its role and weight instead of creating a second member.
//!
//! Member management requires the acting account to be an owner of the
//! vault.

pub mod registry;
pub mod types;

pub use registry::VaultRegistry;
pub use types::{DeploymentParams, Member, MemberRole, NewVault, Vault, VaultUpdate};

pub(crate) use types::validate_name;
