//! # Storage Module
//!
//! The shared, durable, transactional store behind every component.
//!
//! ## Architecture
//!
//! ```text
//! db.rs  : VaultDB: sled handle, named trees, clock, typed reads
//! tx.rs  : StoreTx: typed view over one multi-tree transaction
//! keys.rs: key layout for records and secondary indexes
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! VaultRegistry ─┐
//! PolicyStore   ─┼─► VaultDB::transact(|tx| { mutate records; tx.append_audit(..) })
//! ApprovalEngine ┘                 │
//!                                  ▼
//!                    vaults · policies · escrows · indexes · audit
//! ```
//!
//! Components never hold their own database handle. The process bootstrap
//! opens one [`VaultDB`] and passes clones of it into each constructor.
//!
//! ## Design Decisions
//!
//! 1. **One transaction per call.** Record changes and the audit entry that
//!    describes them commit together. sled detects conflicting concurrent
//!    transactions and re-runs the closure, which serializes racing
//!    approvals on the same escrow without an in-memory lock.
//!
//! 2. **JSON on disk.** Audit payloads and escrow metadata are free-form
//!    `serde_json::Value`s, which self-describing JSON round-trips and
//!    compact binary formats do not.
//!
//! 3. **Time-ordered audit keys.** Ledger keys are `timestamp ‖ id`
//!    big-endian, so range scans and reverse iteration give chronological
//!    order for free.

pub mod db;
pub(crate) mod keys;
pub mod tx;

pub use db::VaultDB;
pub use tx::{abort, lift, StoreTx, TxResult};
