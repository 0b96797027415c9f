//! # Audit Ledger
//!
//! Append-only record of every mutating action in the core. Entries are
//! written inside the same transaction as the state change they describe
//! (see [`crate::storage::StoreTx::append_audit`]) and are never updated.
//! The only deletion path is age-based retention via
//! [`AuditLedger::cleanup`].
//!
//! ## Action Taxonomy
//!
//! Actions are free-form namespaced strings. The ones the core itself emits
//! are listed in [`actions`]; external collaborators (notification delivery,
//! on-chain submitters) may append their own through [`AuditLedger::append`].

pub mod entry;
pub mod filter;
pub mod ledger;

pub use entry::{actions, AuditLogEntry, NewAuditEntry, ResourceType};
pub use filter::AuditFilter;
pub use ledger::{ActorCount, AuditLedger, AuditStats};
