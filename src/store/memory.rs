//! In-process store.
//!
//! [`MemoryStore`] keeps values and ordered indexes behind a single
//! `RwLock`. Every mutation (bounded insert, pipeline, delete) runs under
//! one write guard, which is its atomic unit. Reads take the read guard.
//!
//! Index scores are microseconds since the UNIX epoch. When the clock has
//! not moved past an index's newest score (same microsecond, or a backward
//! step), the score is bumped to `newest + 1`, so members of an index are
//! always totally ordered by insertion.
//!
//! Expired values read as absent right away and are purged at the start of
//! the next mutation. Their index members stay until evicted, as in Redis.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::stream;

use crate::store::{BoundedInsert, StoreOp, StorePipeline};
use crate::traits::{KeyStream, KvStore};
use crate::{MemoError, Result};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct OrderedIndex {
    by_score: BTreeMap<u64, String>,
    scores: HashMap<String, u64>,
}

impl OrderedIndex {
    fn upsert(&mut self, member: &str, now_micros: u64) {
        let newest = self.by_score.last_key_value().map(|(score, _)| *score);
        let score = match newest {
            Some(top) if top >= now_micros => top + 1,
            _ => now_micros,
        };
        if let Some(previous) = self.scores.insert(member.to_owned(), score) {
            self.by_score.remove(&previous);
        }
        self.by_score.insert(score, member.to_owned());
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.by_score.remove(&score);
                true
            }
            None => false,
        }
    }

    fn pop_oldest(&mut self) -> Option<String> {
        let (_, member) = self.by_score.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, Entry>,
    indexes: HashMap<String, OrderedIndex>,
    /// Deadline of every value with a TTL, soonest first.
    expiries: BTreeSet<(Instant, String)>,
}

impl MemoryState {
    fn put(&mut self, key: String, entry: Entry) {
        if let Some(at) = entry.expires_at {
            self.expiries.insert((at, key.clone()));
        }
        if let Some(previous) = self.values.insert(key.clone(), entry) {
            self.forget_expiry(key, previous.expires_at);
        }
    }

    fn take(&mut self, key: &str) -> Option<Entry> {
        let entry = self.values.remove(key)?;
        self.forget_expiry(key.to_owned(), entry.expires_at);
        Some(entry)
    }

    fn forget_expiry(&mut self, key: String, expires_at: Option<Instant>) {
        if let Some(at) = expires_at {
            let record = (at, key);
            // an overwrite with the same deadline shares the record
            if self.values.get(&record.1).and_then(|e| e.expires_at) != Some(at) {
                self.expiries.remove(&record);
            }
        }
    }

    /// Drops every value whose deadline has passed. Returns how many.
    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((at, _)) = self.expiries.first() {
            if *at > now {
                break;
            }
            if let Some((_, key)) = self.expiries.pop_first() {
                self.values.remove(&key);
                purged += 1;
            }
        }
        purged
    }

    fn bounded_insert(&mut self, insert: &BoundedInsert) -> u64 {
        let expires_at = (!insert.ttl.is_zero()).then(|| Instant::now() + insert.ttl);
        self.put(
            insert.value_key.clone(),
            Entry {
                value: insert.value.clone(),
                expires_at,
            },
        );

        if insert.limit == 0 {
            return 0;
        }

        let index = self.indexes.entry(insert.index_key.clone()).or_default();
        index.upsert(&insert.value_key, now_micros());

        let mut stale_keys = Vec::new();
        while index.len() as u64 > insert.limit {
            let Some(stale) = index.pop_oldest() else {
                break;
            };
            stale_keys.push(stale);
        }
        let mut evicted = 0;
        for stale in stale_keys {
            self.take(&stale);
            evicted += 1;
        }
        evicted
    }

    /// Removes a value or an index stored under `key`.
    fn delete(&mut self, key: &str) -> bool {
        let now = Instant::now();
        let value_existed = self.take(key).is_some_and(|entry| entry.is_live(now));
        let index_existed = self.indexes.remove(key).is_some();
        value_existed || index_existed
    }

    fn deindex(&mut self, index_key: &str, member: &str) {
        let emptied = match self.indexes.get_mut(index_key) {
            Some(index) => index.remove(member) && index.len() == 0,
            None => false,
        };
        if emptied {
            self.indexes.remove(index_key);
        }
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<Vec<u8>> {
        self.values
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }
}

/// In-process [`KvStore`] implementation.
///
/// Suitable for single-process deployments and tests. Shares nothing
/// across processes.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|e| {
            MemoError::StoreUnavailable(format!("Failed to acquire read lock: {}", e))
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|e| {
            MemoError::StoreUnavailable(format!("Failed to acquire write lock: {}", e))
        })
    }

    /// Members of an ordered index, oldest first.
    pub fn index_members(&self, index_key: &str) -> Vec<String> {
        self.read()
            .map(|state| {
                state
                    .indexes
                    .get(index_key)
                    .map(|index| index.by_score.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Whether a live (unexpired) value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.read()
            .map(|state| state.live_value(key, now).is_some())
            .unwrap_or(false)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.read()
            .map(|state| state.values.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.live_value(key, Instant::now()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let now = Instant::now();
        let state = self.read()?;
        Ok(keys.iter().map(|key| state.live_value(key, now)).collect())
    }

    async fn bounded_insert(&self, insert: &BoundedInsert) -> Result<u64> {
        let mut state = self.write()?;
        state.purge_expired(Instant::now());
        Ok(state.bounded_insert(insert))
    }

    async fn execute(&self, pipeline: StorePipeline) -> Result<u64> {
        let mut state = self.write()?;
        state.purge_expired(Instant::now());
        let mut evicted = 0;
        for op in pipeline.into_ops() {
            match op {
                StoreOp::Delete { key } => {
                    state.delete(&key);
                }
                StoreOp::Deindex { index_key, member } => state.deindex(&index_key, &member),
                StoreOp::BoundedInsert(insert) => evicted += state.bounded_insert(&insert),
            }
        }
        Ok(evicted)
    }

    fn scan_prefix(&self, prefix: &str) -> KeyStream {
        let now = Instant::now();
        let keys: Result<Vec<String>> = self.read().map(|state| {
            let values = state
                .values
                .iter()
                .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
                .map(|(key, _)| key.clone());
            let indexes = state
                .indexes
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned();
            values.chain(indexes).collect()
        });

        match keys {
            Ok(keys) => Box::pin(stream::iter(keys.into_iter().map(Ok))),
            Err(e) => Box::pin(stream::iter(vec![Err(e)])),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut state = self.write()?;
        state.purge_expired(Instant::now());
        Ok(keys.iter().filter(|key| state.delete(key)).count() as u64)
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
}
