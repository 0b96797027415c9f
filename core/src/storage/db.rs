//! # VaultDB: Persistent Storage Engine
//!
//! The persistence layer for Quorum, built on sled's embedded key-value
//! store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees", each an independent B+ tree with
//! its own keyspace. See [`super::keys`] for the exact key formats.
//!
//! | Tree       | Contents                                     |
//! |------------|----------------------------------------------|
//! | `vaults`   | vault records and their membership lists     |
//! | `policies` | policy records                               |
//! | `escrows`  | escrow records and their approval lists      |
//! | `indexes`  | uniqueness keys and secondary lookups        |
//! | `audit`    | the append-only audit ledger                 |
//!
//! ## Atomicity
//!
//! Every mutation goes through [`VaultDB::transact`], a single sled
//! transaction spanning all five trees. Either every write in the closure
//! lands or none does. Conflicting concurrent transactions are retried by
//! sled, so read-modify-write sequences inside the closure are serialized
//! per key.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use sled::transaction::{ConflictableTransactionResult, TransactionError, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

use super::keys;
use super::tx::StoreTx;
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// VaultDB
// ---------------------------------------------------------------------------

/// Persistent storage engine shared by every component.
///
/// Cheap to clone: sled handles are reference-counted, and clones share the
/// same clock and audit timestamp watermark, so they behave as one writer.
///
/// # Thread Safety
///
/// sled supports lock-free concurrent reads and serializable transactions.
/// `VaultDB` can be cloned into as many threads as needed.
#[derive(Debug, Clone)]
pub struct VaultDB {
    /// The underlying sled database handle.
    db: Db,
    /// Vault records and membership lists.
    pub(crate) vaults: Tree,
    /// Policy records.
    pub(crate) policies: Tree,
    /// Escrow records and approval lists.
    pub(crate) escrows: Tree,
    /// Uniqueness and secondary-lookup keys.
    pub(crate) indexes: Tree,
    /// Audit ledger entries, time-ordered.
    pub(crate) audit: Tree,
    /// Source of "now" for every write.
    clock: Arc<dyn Clock>,
    /// Highest timestamp handed out so far. Keeps write timestamps
    /// monotonically non-decreasing even if the clock steps backwards.
    watermark: Arc<Mutex<DateTime<Utc>>>,
}

impl VaultDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db, Arc::new(SystemClock))
    }

    /// Create a temporary database that is removed when the last handle drops.
    ///
    /// Used by tests: nothing is left on disk.
    pub fn open_temporary() -> CoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, Arc::new(SystemClock))
    }

    /// Replace the clock. Intended for bootstrap and tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_db(db: Db, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let vaults = db.open_tree("vaults")?;
        let policies = db.open_tree("policies")?;
        let escrows = db.open_tree("escrows")?;
        let indexes = db.open_tree("indexes")?;
        let audit = db.open_tree("audit")?;

        Ok(Self {
            db,
            vaults,
            policies,
            escrows,
            indexes,
            audit,
            clock,
            watermark: Arc::new(Mutex::new(DateTime::<Utc>::MIN_UTC)),
        })
    }

    // -- Time ---------------------------------------------------------------

    /// The clock's current reading, unclamped. Used for read-side checks
    /// such as deadline and timelock comparisons.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Timestamp for the next write: the clock's reading, raised to the last
    /// handed-out value if the clock went backwards.
    pub(crate) fn next_write_timestamp(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut watermark = self.watermark.lock();
        if now > *watermark {
            *watermark = now;
        }
        *watermark
    }

    // -- Transactions -------------------------------------------------------

    /// Run `f` as one atomic transaction across every tree.
    ///
    /// `f` may be invoked more than once if sled detects a conflict, so it
    /// must not have side effects outside the transaction view. Returning
    /// `Err(ConflictableTransactionError::Abort(e))` rolls everything back
    /// and surfaces `e` to the caller.
    pub fn transact<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: Fn(&StoreTx<'_>) -> ConflictableTransactionResult<T, CoreError>,
    {
        let now = self.next_write_timestamp();
        let result = (
            &self.vaults,
            &self.policies,
            &self.escrows,
            &self.indexes,
            &self.audit,
        )
            .transaction(|(vaults, policies, escrows, indexes, audit)| {
                let tx = StoreTx::new(vaults, policies, escrows, indexes, audit, now);
                f(&tx)
            });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(CoreError::Storage(e)),
        }
    }

    // -- Typed reads --------------------------------------------------------

    /// Fetch and decode a single record.
    pub(crate) fn get<T: DeserializeOwned>(&self, tree: &Tree, key: &[u8]) -> CoreResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode every record under `prefix`, in key order.
    pub(crate) fn scan<T: DeserializeOwned>(&self, tree: &Tree, prefix: &[u8]) -> CoreResult<Vec<T>> {
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Resolve a single index key to the id it points at.
    pub(crate) fn index_get(&self, key: &[u8]) -> CoreResult<Option<u64>> {
        match self.indexes.get(key)? {
            Some(bytes) => keys::decode_id(&bytes)
                .map(Some)
                .ok_or_else(|| CoreError::Serialization("corrupt index entry".to_string())),
            None => Ok(None),
        }
    }

    /// Resolve every index key under `prefix` to the ids they point at.
    pub(crate) fn index_scan(&self, prefix: &[u8]) -> CoreResult<Vec<u64>> {
        let mut ids = Vec::new();
        for item in self.indexes.scan_prefix(prefix) {
            let (_key, value) = item?;
            let id = keys::decode_id(&value)
                .ok_or_else(|| CoreError::Serialization("corrupt index entry".to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    // -- Utility operations -------------------------------------------------

    /// Number of entries in the audit ledger.
    pub fn audit_len(&self) -> usize {
        self.audit.len()
    }

    /// Force a flush of all pending writes to disk.
    ///
    /// sled buffers writes in memory for performance. This call blocks
    /// until all data is durable on the underlying storage device.
    pub fn flush(&self) -> CoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
