// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Quorum Core Library
//!
//! Off-chain bookkeeping for multi-party custody vaults: who is allowed to
//! agree, who has agreed, and whether that agreement is enough to move money.
//!
//! Nothing in here signs, submits, or estimates gas. Those are separate
//! collaborators that read escrow state after the fact and write back
//! transaction hashes through the ordinary update paths.
//!
//! ## Architecture
//!
//! Components, leaves first:
//!
//! - **identity**: Chain-qualified account identifiers (`eip155:<chain>:<address>`).
//! - **vault**: Vault records and membership (roles, weights, owners).
//! - **policy**: Threshold / timelock / spending-cap rules scoped to a vault.
//! - **escrow**: The approval state machine. The part that actually matters.
//! - **audit**: Append-only ledger with search, stats, and retention cleanup.
//! - **storage**: sled-backed transactional store shared by all of the above.
//! - **config**: Protocol constants.
//!
//! ## Write Discipline
//!
//! Every mutating call changes its own records AND appends exactly one audit
//! entry inside the same sled transaction. Either both land or neither does.
//! A state change without an audit trail is a bug, not a degraded mode.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod escrow;
pub mod identity;
pub mod policy;
pub mod storage;
pub mod vault;

pub use audit::{AuditFilter, AuditLedger, AuditLogEntry, AuditStats, NewAuditEntry, ResourceType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use escrow::{Amount, ApprovalEngine, Escrow, EscrowStatus};
pub use identity::ChainAccount;
pub use policy::{Policy, PolicyStore};
pub use storage::VaultDB;
pub use vault::{Member, MemberRole, Vault, VaultRegistry};
