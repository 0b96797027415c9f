//! The ledger: writes, searches, aggregation, and retention.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::{Batch, IVec};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use super::entry::{AuditLogEntry, NewAuditEntry};
use super::filter::AuditFilter;
use crate::config::TOP_ACTORS_LIMIT;
use crate::error::{CoreError, CoreResult};
use crate::storage::keys;
use crate::storage::VaultDB;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// How many entries one actor produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorCount {
    pub actor: String,
    pub count: usize,
}

/// Aggregates over every entry matching a filter (limit and offset ignored).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_logs: usize,
    pub action_counts: BTreeMap<String, usize>,
    pub resource_counts: BTreeMap<String, usize>,
    /// Most active actors, highest count first, at most ten.
    pub top_actors: Vec<ActorCount>,
}

// ---------------------------------------------------------------------------
// AuditLedger
// ---------------------------------------------------------------------------

/// Read/write access to the audit ledger.
///
/// Components append their own entries inside their transactions; this
/// type is for standalone appends by external collaborators and for every
/// read path.
#[derive(Debug, Clone)]
pub struct AuditLedger {
    db: VaultDB,
}

impl AuditLedger {
    pub fn new(db: VaultDB) -> Self {
        Self { db }
    }

    // -- Writes -------------------------------------------------------------

    /// Append a single entry. Storage failures propagate.
    pub fn append(&self, entry: NewAuditEntry) -> CoreResult<AuditLogEntry> {
        let written = self.db.transact(|tx| tx.append_audit(entry.clone()))?;
        tracing::debug!(id = written.id, action = %written.action, "audit entry appended");
        Ok(written)
    }

    /// Append several entries atomically: all land or none do. Entries in
    /// one batch share a timestamp and keep their input order.
    pub fn append_batch(&self, entries: Vec<NewAuditEntry>) -> CoreResult<Vec<AuditLogEntry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let written = self.db.transact(|tx| {
            let mut out = Vec::with_capacity(entries.len());
            for entry in &entries {
                out.push(tx.append_audit(entry.clone())?);
            }
            Ok(out)
        })?;
        tracing::debug!(count = written.len(), "audit batch appended");
        Ok(written)
    }

    // -- Reads --------------------------------------------------------------

    /// Entries matching `filter`, newest first, paginated.
    pub fn search(&self, filter: &AuditFilter) -> CoreResult<Vec<AuditLogEntry>> {
        let limit = filter.effective_limit();
        let mut skipped = 0usize;
        let mut out = Vec::new();

        for item in self.db.audit.range(key_range(filter)).rev() {
            let (_key, value) = item?;
            let entry = decode(&value)?;
            if !filter.matches(&entry) {
                continue;
            }
            if skipped < filter.offset {
                skipped += 1;
                continue;
            }
            out.push(entry);
            if out.len() >= limit {
                break;
            }
        }

        tracing::debug!(results = out.len(), "audit search");
        Ok(out)
    }

    /// Most recent entries written by `actor`.
    pub fn by_actor(&self, actor: &str, limit: usize) -> CoreResult<Vec<AuditLogEntry>> {
        self.search(&AuditFilter::new().actor(actor).limit(limit))
    }

    /// Most recent entries about vault `vault_id`.
    pub fn by_vault(&self, vault_id: u64, limit: usize) -> CoreResult<Vec<AuditLogEntry>> {
        self.search(&AuditFilter::new().vault(vault_id).limit(limit))
    }

    /// Entries carrying an account-abstraction operation hash.
    pub fn by_user_op_hash(&self, hash: &str) -> CoreResult<Vec<AuditLogEntry>> {
        self.search(&AuditFilter::new().user_op_hash(hash))
    }

    /// Entries carrying a transaction hash.
    pub fn by_tx_hash(&self, hash: &str) -> CoreResult<Vec<AuditLogEntry>> {
        self.search(&AuditFilter::new().tx_hash(hash))
    }

    /// Aggregate counts over everything matching `filter`.
    ///
    /// Runs as a single pass over the ledger keyspace; matching entries are
    /// folded into counters rather than collected.
    pub fn stats(&self, filter: &AuditFilter) -> CoreResult<AuditStats> {
        let mut stats = AuditStats::default();
        // Keyed by lowercase actor; value keeps the first spelling seen.
        let mut actors: HashMap<String, ActorCount> = HashMap::new();

        for item in self.db.audit.range(key_range(filter)) {
            let (_key, value) = item?;
            let entry = decode(&value)?;
            if !filter.matches(&entry) {
                continue;
            }

            stats.total_logs += 1;
            *stats.action_counts.entry(entry.action.clone()).or_default() += 1;
            *stats
                .resource_counts
                .entry(entry.resource_type.to_string())
                .or_default() += 1;
            actors
                .entry(entry.actor.to_ascii_lowercase())
                .or_insert_with(|| ActorCount {
                    actor: entry.actor.clone(),
                    count: 0,
                })
                .count += 1;
        }

        let mut top: Vec<ActorCount> = actors.into_values().collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.actor.cmp(&b.actor)));
        top.truncate(TOP_ACTORS_LIMIT);
        stats.top_actors = top;

        Ok(stats)
    }

    /// Total number of entries in the ledger.
    pub fn count(&self) -> usize {
        self.db.audit_len()
    }

    // -- Retention ----------------------------------------------------------

    /// Delete every entry strictly older than `retention_days` days.
    ///
    /// Irreversible. Idempotent, and safe to run concurrently with itself.
    pub fn cleanup(&self, retention_days: u32) -> CoreResult<usize> {
        let cutoff = self.db.now() - Duration::days(i64::from(retention_days));
        self.cleanup_before(cutoff)
    }

    /// Delete every entry with a timestamp strictly before `cutoff`.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let upper = keys::audit_lower_bound(cutoff);
        let mut batch = Batch::default();
        let mut deleted = 0usize;

        for item in self.db.audit.range(..upper) {
            let (key, _value) = item?;
            batch.remove(key);
            deleted += 1;
        }

        if deleted > 0 {
            self.db.audit.apply_batch(batch)?;
        }

        tracing::info!(deleted, cutoff = %cutoff, "audit retention cleanup");
        Ok(deleted)
    }
}

fn key_range(filter: &AuditFilter) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lower = match filter.from {
        Some(from) => Bound::Included(keys::audit_lower_bound(from).to_vec()),
        None => Bound::Unbounded,
    };
    let upper = match filter.to {
        Some(to) => Bound::Excluded(keys::audit_lower_bound(to).to_vec()),
        None => Bound::Unbounded,
    };
    (lower, upper)
}

fn decode(value: &IVec) -> CoreResult<AuditLogEntry> {
    serde_json::from_slice(value).map_err(CoreError::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::ResourceType;
    use crate::clock::{Clock, ManualClock};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (AuditLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let db = VaultDB::open_temporary().unwrap().with_clock(clock.clone());
        (AuditLedger::new(db), clock)
    }

    fn entry(action: &str, actor: &str, vault: u64) -> NewAuditEntry {
        NewAuditEntry::new(action, ResourceType::Escrow)
            .actor(actor)
            .vault(vault)
    }

    #[test]
    fn append_assigns_id_and_timestamp() {
        let (ledger, clock) = setup();
        let written = ledger.append(entry("escrow_created", "alice", 1)).unwrap();
        assert!(written.id > 0);
        assert_eq!(written.timestamp, clock.now());
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let (ledger, _) = setup();
        assert!(ledger.append_batch(Vec::new()).unwrap().is_empty());
        assert_eq!(ledger.count(), 0);
    }

    #[test]
    fn batch_writes_everything() {
        let (ledger, _) = setup();
        let written = ledger
            .append_batch(vec![
                entry("a", "alice", 1),
                entry("b", "alice", 1),
                entry("c", "bob", 2),
            ])
            .unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(ledger.count(), 3);
        assert!(written.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn search_is_newest_first_and_paginates() {
        let (ledger, clock) = setup();
        for i in 0..5 {
            ledger.append(entry(&format!("step_{i}"), "alice", 1)).unwrap();
            clock.advance(Duration::seconds(1));
        }

        let page = ledger.search(&AuditFilter::new().limit(2)).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].action, "step_4");
        assert_eq!(page[1].action, "step_3");

        let next = ledger.search(&AuditFilter::new().limit(2).offset(2)).unwrap();
        assert_eq!(next[0].action, "step_2");
        assert_eq!(next[1].action, "step_1");

        let tail = ledger.search(&AuditFilter::new().limit(2).offset(4)).unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn search_date_range_is_half_open() {
        let (ledger, clock) = setup();
        let t0 = clock.now();
        ledger.append(entry("first", "alice", 1)).unwrap();
        clock.advance(Duration::hours(1));
        ledger.append(entry("second", "alice", 1)).unwrap();
        clock.advance(Duration::hours(1));
        ledger.append(entry("third", "alice", 1)).unwrap();

        let hits = ledger
            .search(&AuditFilter::new().between(t0, t0 + Duration::hours(2)))
            .unwrap();
        let actions: Vec<_> = hits.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["second", "first"]);
    }

    #[test]
    fn projections() {
        let (ledger, _) = setup();
        ledger.append(entry("a", "alice", 1)).unwrap();
        ledger.append(entry("b", "bob", 2)).unwrap();
        ledger
            .append(
                NewAuditEntry::new("escrow_on_chain", ResourceType::Escrow)
                    .tx_hash(Some("0xabc".into()))
                    .user_op_hash(Some("0xdef".into())),
            )
            .unwrap();

        assert_eq!(ledger.by_actor("alice", 10).unwrap().len(), 1);
        assert_eq!(ledger.by_vault(2, 10).unwrap()[0].action, "b");
        assert_eq!(ledger.by_tx_hash("0xABC").unwrap().len(), 1);
        assert_eq!(ledger.by_user_op_hash("0xdef").unwrap().len(), 1);
        assert!(ledger.by_tx_hash("0x999").unwrap().is_empty());
    }

    #[test]
    fn stats_aggregate() {
        let (ledger, _) = setup();
        for _ in 0..3 {
            ledger.append(entry("escrow_created", "alice", 1)).unwrap();
        }
        ledger.append(entry("escrow_created", "bob", 1)).unwrap();
        ledger
            .append(
                NewAuditEntry::new("member_added", ResourceType::Member)
                    .actor("bob")
                    .vault(1)
                    .data(json!({})),
            )
            .unwrap();
        ledger.append(entry("escrow_created", "carol", 2)).unwrap();

        let stats = ledger.stats(&AuditFilter::new().vault(1)).unwrap();
        assert_eq!(stats.total_logs, 5);
        assert_eq!(stats.action_counts["escrow_created"], 4);
        assert_eq!(stats.action_counts["member_added"], 1);
        assert_eq!(stats.resource_counts["escrow"], 4);
        assert_eq!(stats.resource_counts["member"], 1);
        assert_eq!(
            stats.top_actors,
            vec![
                ActorCount { actor: "alice".into(), count: 3 },
                ActorCount { actor: "bob".into(), count: 2 },
            ]
        );
    }

    #[test]
    fn top_actors_capped_at_ten() {
        let (ledger, _) = setup();
        let batch = (0..15)
            .map(|i| entry("x", &format!("actor-{i:02}"), 1))
            .collect();
        ledger.append_batch(batch).unwrap();

        let stats = ledger.stats(&AuditFilter::new()).unwrap();
        assert_eq!(stats.total_logs, 15);
        assert_eq!(stats.top_actors.len(), 10);
    }

    #[test]
    fn cleanup_removes_only_old_entries() {
        let (ledger, clock) = setup();
        let now = clock.now();

        clock.set(now - Duration::days(100));
        ledger.append(entry("ancient", "alice", 1)).unwrap();
        clock.set(now - Duration::days(1));
        ledger.append(entry("recent", "alice", 1)).unwrap();
        clock.set(now);

        assert_eq!(ledger.cleanup(90).unwrap(), 1);
        let remaining = ledger.search(&AuditFilter::new()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "recent");

        // Second run finds nothing left to delete.
        assert_eq!(ledger.cleanup(90).unwrap(), 0);
    }
}
