//! Core KvStore trait

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::Result;
use crate::store::{BoundedInsert, StorePipeline};

/// Lazy sequence of keys produced by a cursor scan.
pub type KeyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The capabilities memokv needs from the underlying key-value store.
///
/// Every mutating method must be atomic at the store: callers may be
/// spread across processes, so there is no local lock backing any of
/// these guarantees.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store name for logs (e.g. "memory", "redis").
    fn name(&self) -> &str;

    /// Point read. `Ok(None)` means the key is absent; a present value is
    /// returned even when it is empty.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Bulk read, one slot per requested key, in request order.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Write a value and register it in its namespace's bounded index as
    /// one indivisible unit. Returns the number of entries evicted.
    async fn bounded_insert(&self, insert: &BoundedInsert) -> Result<u64>;

    /// Run queued operations together. Returns the total number of
    /// entries evicted by queued bounded inserts.
    async fn execute(&self, pipeline: StorePipeline) -> Result<u64>;

    /// Cursor-based scan of every key starting with `prefix`.
    ///
    /// Iteration is lazy and can only be restarted from the beginning.
    fn scan_prefix(&self, prefix: &str) -> KeyStream;

    /// Delete keys, returning how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;
}
