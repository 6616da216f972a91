//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use memokv::store::{BoundedInsert, MemoryStore, StorePipeline};
use memokv::{CachedFn, CallArgs, KeyStream, KvStore, Memo, MemoError, Result};

// ============================================================================
// Failure-injecting store
// ============================================================================

/// [`MemoryStore`] wrapper that counts round trips and fails on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read_attempt(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MemoError::StoreUnavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn write_attempt(&self) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MemoError::StoreUnavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read_attempt()?;
        self.inner.get(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.read_attempt()?;
        self.inner.mget(keys).await
    }

    async fn bounded_insert(&self, insert: &BoundedInsert) -> Result<u64> {
        self.write_attempt()?;
        self.inner.bounded_insert(insert).await
    }

    async fn execute(&self, pipeline: StorePipeline) -> Result<u64> {
        self.write_attempt()?;
        self.inner.execute(pipeline).await
    }

    fn scan_prefix(&self, prefix: &str) -> KeyStream {
        self.inner.scan_prefix(prefix)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.write_attempt()?;
        self.inner.delete_many(keys).await
    }
}

// ============================================================================
// Computations
// ============================================================================

pub fn flaky_memo() -> (Memo, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    (Memo::new(store.clone()), store)
}

/// Invocation counter shared with a computation.
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// `n -> n * n`, counting invocations.
pub fn make_square(memo: &Memo, namespace: &str, limit: u64) -> (CachedFn<i64>, Calls) {
    let calls = Calls::default();
    let counter = calls.clone();
    let square = memo
        .wrap(move |args: CallArgs| {
            let counter = counter.clone();
            async move {
                counter.bump();
                let n: i64 = args.get(0)?;
                Ok::<_, MemoError>(n * n)
            }
        })
        .namespace(namespace)
        .limit(limit)
        .build()
        .unwrap();
    (square, calls)
}

/// `s -> s.len()` with a vectorised variant that records every batch it
/// receives.
pub fn make_length(memo: &Memo, namespace: &str) -> (CachedFn<u64>, Arc<Mutex<Vec<Vec<CallArgs>>>>) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let recorded = batches.clone();
    let length = memo
        .wrap(|args: CallArgs| async move {
            let text: String = args.get(0)?;
            Ok::<_, MemoError>(text.len() as u64)
        })
        .namespace(namespace)
        .batch(move |items: Vec<CallArgs>| {
            recorded.lock().unwrap().push(items.clone());
            async move {
                items
                    .iter()
                    .map(|item| Ok(item.get::<String>(0)?.len() as u64))
                    .collect::<Result<Vec<u64>>>()
            }
        })
        .build()
        .unwrap();
    (length, batches)
}

/// First positional argument of every item of every recorded batch.
pub fn batch_inputs(batches: &Mutex<Vec<Vec<CallArgs>>>) -> Vec<Vec<String>> {
    batches
        .lock()
        .unwrap()
        .iter()
        .map(|batch| batch.iter().map(|item| item.get::<String>(0).unwrap()).collect())
        .collect()
}
