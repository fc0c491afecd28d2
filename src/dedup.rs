use crate::repository::{Database, ProcessedTxRepository};
use alloy_primitives::Address;
use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Backing store for processed-transaction records.
pub trait ProcessedTxStore: Send + Sync {
    fn contains(&self, hash: &str) -> Result<bool>;
    fn insert(&self, contract: &Address, hash: &str) -> Result<()>;
    /// Records `hash` through `conn`, so the record commits or rolls back
    /// with the caller's open transaction. Stores that do not live in the
    /// projection database insert on their own.
    fn insert_within(&self, _conn: &Connection, contract: &Address, hash: &str) -> Result<()> {
        self.insert(contract, hash)
    }
    fn remove(&self, hash: &str) -> Result<()>;
    /// Live hashes recorded for `contract`, oldest first.
    fn load(&self, contract: &Address) -> Result<Vec<String>>;
    /// Drops expired records, returning how many went away.
    fn purge_expired(&self) -> Result<usize>;
}

/// SQLite-backed store; records expire after `retention`.
#[derive(Clone)]
pub struct SqliteTxStore {
    db: Database,
    retention: Duration,
}

impl SqliteTxStore {
    pub fn new(db: Database, retention: Duration) -> Self {
        Self { db, retention }
    }

    fn cutoff(&self) -> i64 {
        Utc::now().timestamp() - self.retention.as_secs() as i64
    }
}

impl ProcessedTxStore for SqliteTxStore {
    fn contains(&self, hash: &str) -> Result<bool> {
        let cutoff = self.cutoff();
        self.db
            .with_conn(|conn| ProcessedTxRepository::new(conn).exists(hash, cutoff))
    }

    fn insert(&self, contract: &Address, hash: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        self.db
            .with_conn(|conn| ProcessedTxRepository::new(conn).insert(contract, hash, now))
    }

    fn insert_within(&self, conn: &Connection, contract: &Address, hash: &str) -> Result<()> {
        ProcessedTxRepository::new(conn).insert(contract, hash, Utc::now().timestamp())
    }

    fn remove(&self, hash: &str) -> Result<()> {
        self.db
            .with_conn(|conn| ProcessedTxRepository::new(conn).delete(hash))
    }

    fn load(&self, contract: &Address) -> Result<Vec<String>> {
        let cutoff = self.cutoff();
        self.db
            .with_conn(|conn| ProcessedTxRepository::new(conn).hashes_for(contract, cutoff))
    }

    fn purge_expired(&self) -> Result<usize> {
        let cutoff = self.cutoff();
        self.db
            .with_conn(|conn| ProcessedTxRepository::new(conn).purge_older_than(cutoff))
    }
}

/// In-process store with no expiry. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryTxStore {
    records: Mutex<HashMap<String, (Address, u64)>>,
    sequence: Mutex<u64>,
}

impl MemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcessedTxStore for MemoryTxStore {
    fn contains(&self, hash: &str) -> Result<bool> {
        let records = self.records.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        Ok(records.contains_key(hash))
    }

    fn insert(&self, contract: &Address, hash: &str) -> Result<()> {
        let mut sequence = self.sequence.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        *sequence += 1;
        let mut records = self.records.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        records.insert(hash.to_string(), (*contract, *sequence));
        Ok(())
    }

    fn remove(&self, hash: &str) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        records.remove(hash);
        Ok(())
    }

    fn load(&self, contract: &Address) -> Result<Vec<String>> {
        let records = self.records.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        let mut hashes: Vec<(u64, String)> = records
            .iter()
            .filter(|(_, (owner, _))| owner == contract)
            .map(|(hash, (_, seq))| (*seq, hash.clone()))
            .collect();
        hashes.sort();
        Ok(hashes.into_iter().map(|(_, hash)| hash).collect())
    }

    fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Two-tier "already applied?" set for one contract.
///
/// Reads hit memory first and fall back to the store. Writes go to both; once
/// memory is full the oldest hash is evicted from memory and its stored record
/// deleted with it, so the persisted footprint stays at roughly `capacity`
/// rows per contract.
pub struct TxDedupCache {
    store: Arc<dyn ProcessedTxStore>,
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl TxDedupCache {
    pub fn new(store: Arc<dyn ProcessedTxStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Primes memory with the hashes already recorded for `contract`.
    pub fn load_from_store(&mut self, contract: &Address) -> Result<usize> {
        let hashes = self.store.load(contract)?;
        let skip = hashes.len().saturating_sub(self.capacity);
        let mut loaded = 0;
        for hash in hashes.into_iter().skip(skip) {
            if self.members.insert(hash.clone()) {
                self.order.push_back(hash);
                loaded += 1;
            }
        }
        self.trim_memory();
        debug!(contract = ?contract, loaded, "Primed transaction cache");
        Ok(loaded)
    }

    pub fn has(&self, hash: &str) -> Result<bool> {
        if self.members.contains(hash) {
            return Ok(true);
        }
        self.store.contains(hash)
    }

    pub fn add(&mut self, contract: &Address, hash: &str) -> Result<()> {
        if self.members.contains(hash) {
            return Ok(());
        }
        self.remember(hash)?;
        self.store.insert(contract, hash)
    }

    /// Memory-only half of `add`, for a hash whose stored record was already
    /// written with `ProcessedTxStore::insert_within`.
    pub fn remember(&mut self, hash: &str) -> Result<()> {
        if self.members.contains(hash) {
            return Ok(());
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
                self.store.remove(&oldest)?;
            }
        }

        self.order.push_back(hash.to_string());
        self.members.insert(hash.to_string());
        Ok(())
    }

    pub fn store(&self) -> Arc<dyn ProcessedTxStore> {
        self.store.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn trim_memory(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const CONTRACT: Address = address!("0x00000000000000000000000000000000000000c1");

    #[test]
    fn add_then_has() {
        let store = Arc::new(MemoryTxStore::new());
        let mut cache = TxDedupCache::new(store.clone(), 3);
        assert!(!cache.has("0xaa").unwrap());
        cache.add(&CONTRACT, "0xaa").unwrap();
        assert!(cache.has("0xaa").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_is_fifo_and_deletes_the_stored_record() {
        let store = Arc::new(MemoryTxStore::new());
        let mut cache = TxDedupCache::new(store.clone(), 2);
        cache.add(&CONTRACT, "0x01").unwrap();
        cache.add(&CONTRACT, "0x02").unwrap();
        cache.add(&CONTRACT, "0x03").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.has("0x01").unwrap());
        assert!(cache.has("0x02").unwrap());
        assert!(cache.has("0x03").unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn store_answers_after_restart() {
        let store = Arc::new(MemoryTxStore::new());
        {
            let mut cache = TxDedupCache::new(store.clone(), 10);
            cache.add(&CONTRACT, "0xaa").unwrap();
        }

        let cold = TxDedupCache::new(store.clone(), 10);
        assert!(cold.is_empty());
        assert!(cold.has("0xaa").unwrap());

        let mut primed = TxDedupCache::new(store, 10);
        assert_eq!(primed.load_from_store(&CONTRACT).unwrap(), 1);
        assert!(primed.has("0xaa").unwrap());
    }

    #[test]
    fn priming_keeps_the_newest_entries() {
        let store = Arc::new(MemoryTxStore::new());
        for hash in ["0x01", "0x02", "0x03", "0x04"] {
            store.insert(&CONTRACT, hash).unwrap();
        }
        let other = address!("0x00000000000000000000000000000000000000c2");
        store.insert(&other, "0xff").unwrap();

        let mut cache = TxDedupCache::new(store, 2);
        assert_eq!(cache.load_from_store(&CONTRACT).unwrap(), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.members.contains("0x03"));
        assert!(cache.members.contains("0x04"));
        assert!(!cache.members.contains("0xff"));
    }

    #[test]
    fn record_written_within_a_transaction_shares_its_fate() {
        let db = Database::in_memory().unwrap();
        let store = SqliteTxStore::new(db.clone(), Duration::from_secs(60));

        let rolled_back = db.transaction(|conn| {
            store.insert_within(conn, &CONTRACT, "0xaa")?;
            Err::<(), _>(anyhow!("handler failed"))
        });
        assert!(rolled_back.is_err());
        assert!(!store.contains("0xaa").unwrap());

        db.transaction(|conn| store.insert_within(conn, &CONTRACT, "0xaa"))
            .unwrap();
        assert!(store.contains("0xaa").unwrap());
    }

    #[test]
    fn remember_evicts_like_add_without_writing() {
        let store = Arc::new(MemoryTxStore::new());
        let mut cache = TxDedupCache::new(store.clone(), 1);
        store.insert(&CONTRACT, "0x01").unwrap();
        cache.remember("0x01").unwrap();
        store.insert(&CONTRACT, "0x02").unwrap();
        cache.remember("0x02").unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(store.len(), 1);
        assert!(!cache.has("0x01").unwrap());
        assert!(cache.has("0x02").unwrap());
    }

    #[test]
    fn sqlite_store_expires_records() {
        let db = Database::new(":memory:").unwrap();
        let store = SqliteTxStore::new(db.clone(), Duration::from_secs(60));
        store.insert(&CONTRACT, "0xaa").unwrap();
        assert!(store.contains("0xaa").unwrap());

        let stale = Utc::now().timestamp() - 3600;
        db.with_conn(|conn| ProcessedTxRepository::new(conn).insert(&CONTRACT, "0xbb", stale))
            .unwrap();
        assert!(!store.contains("0xbb").unwrap());
        assert_eq!(store.load(&CONTRACT).unwrap(), vec!["0xaa".to_string()]);
        assert_eq!(store.purge_expired().unwrap(), 1);
    }
}
