//! Typed view over one multi-tree transaction.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};

use super::keys;
use crate::audit::{AuditLogEntry, NewAuditEntry};
use crate::error::{CoreError, CoreResult};

/// Shorthand for results inside a transaction closure.
pub type TxResult<T> = ConflictableTransactionResult<T, CoreError>;

/// Abort the surrounding transaction with `e`. Nothing written so far in
/// the closure is committed.
pub fn abort<T>(e: CoreError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e))
}

/// Lift a plain result into a transaction result, aborting on error.
pub fn lift<T>(result: CoreResult<T>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

/// The five trees of [`super::VaultDB`] as seen from inside a transaction,
/// plus the write timestamp shared by everything the transaction records.
pub struct StoreTx<'a> {
    pub(crate) vaults: &'a TransactionalTree,
    pub(crate) policies: &'a TransactionalTree,
    pub(crate) escrows: &'a TransactionalTree,
    pub(crate) indexes: &'a TransactionalTree,
    pub(crate) audit: &'a TransactionalTree,
    now: DateTime<Utc>,
}

impl<'a> StoreTx<'a> {
    pub(crate) fn new(
        vaults: &'a TransactionalTree,
        policies: &'a TransactionalTree,
        escrows: &'a TransactionalTree,
        indexes: &'a TransactionalTree,
        audit: &'a TransactionalTree,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            vaults,
            policies,
            escrows,
            indexes,
            audit,
            now,
        }
    }

    /// Timestamp for every record and audit entry written by this transaction.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Allocate a fresh record id from the shared sequence. Ids are unique
    /// and strictly increasing in commit order.
    pub fn next_id(&self) -> TxResult<u64> {
        let current = self.index_get(keys::SEQUENCE)?.unwrap_or(0);
        let next = current + 1;
        self.index_put(keys::SEQUENCE, next)?;
        Ok(next)
    }

    // -- Records ------------------------------------------------------------

    pub(crate) fn get<T: DeserializeOwned>(
        &self,
        tree: &TransactionalTree,
        key: &[u8],
    ) -> TxResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(e) => abort(e.into()),
            },
            None => Ok(None),
        }
    }

    pub(crate) fn put<T: Serialize>(
        &self,
        tree: &TransactionalTree,
        key: &[u8],
        value: &T,
    ) -> TxResult<()> {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => return abort(e.into()),
        };
        tree.insert(key, bytes)?;
        Ok(())
    }

    // -- Indexes ------------------------------------------------------------

    pub(crate) fn index_get(&self, key: &[u8]) -> TxResult<Option<u64>> {
        match self.indexes.get(key)? {
            Some(bytes) => match keys::decode_id(&bytes) {
                Some(id) => Ok(Some(id)),
                None => abort(CoreError::Serialization("corrupt index entry".to_string())),
            },
            None => Ok(None),
        }
    }

    pub(crate) fn index_put(&self, key: &[u8], id: u64) -> TxResult<()> {
        self.indexes.insert(key, keys::encode_id(id).to_vec())?;
        Ok(())
    }

    pub(crate) fn index_remove(&self, key: &[u8]) -> TxResult<()> {
        self.indexes.remove(key)?;
        Ok(())
    }

    // -- Audit --------------------------------------------------------------

    /// Append one audit entry as part of this transaction.
    ///
    /// The entry is stamped with the transaction's write timestamp and a
    /// fresh id; it becomes visible only if the transaction commits.
    pub fn append_audit(&self, entry: NewAuditEntry) -> TxResult<AuditLogEntry> {
        let id = self.next_id()?;
        let record = entry.into_entry(id, self.now);
        self.put(self.audit, &keys::audit(self.now, id), &record)?;
        Ok(record)
    }
}
