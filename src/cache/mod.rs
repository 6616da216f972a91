//! Function-result memoization.
//!
//! A [`Memo`] owns the store handle and key codec shared by every wrapped
//! computation. Two read paths sit on top of it:
//!
//! - [`CachedFn::call`]: single lookup, compute on miss, bounded write-back.
//! - [`Memo::resolve_batch`]: one bulk read for many pending calls, misses
//!   grouped per function and recomputed once per unique key, results
//!   returned in request order.
//!
//! Write-backs are best-effort. A failed store write is logged and counted
//! under [`telemetry::WRITE_FAILURES_TOTAL`](crate::telemetry::WRITE_FAILURES_TOTAL),
//! and the freshly computed value is still returned. Lookups propagate
//! store failures, so an outage never reads as an empty cache.

mod batch;
mod builder;
mod function;

pub use batch::PendingCall;
pub use builder::{DEFAULT_INVALIDATE_CHUNK_SIZE, DEFAULT_PREFIX, MemoBuilder};
pub use function::{CachedFn, WrapBuilder};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::codec::{self, KeyCodec, Serializer};
use crate::store::{BoundedInsert, StorePipeline};
use crate::telemetry;
use crate::traits::KvStore;
use crate::types::{CacheValue, CallArgs, CallDescriptor};
use crate::Result;

/// Boxed scalar computation.
pub(crate) type ScalarFn<R> = Arc<dyn Fn(CallArgs) -> BoxFuture<'static, Result<R>> + Send + Sync>;

/// Boxed vectorised computation.
pub(crate) type BatchFn<R> =
    Arc<dyn Fn(Vec<CallArgs>) -> BoxFuture<'static, Result<Vec<R>>> + Send + Sync>;

/// Memoization front end over a [`KvStore`].
///
/// Cheap to clone; clones share the store handle and codec.
///
/// ```rust
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use memokv::{CallArgs, Memo, store::MemoryStore};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> memokv::Result<()> {
/// async fn square(args: CallArgs) -> memokv::Result<i64> {
///     let n: i64 = args.get(0)?;
///     Ok(n * n)
/// }
///
/// let memo = Memo::builder(Arc::new(MemoryStore::new())).prefix("app").build()?;
///
/// let square = memo
///     .wrap(square)
///     .namespace("square")
///     .ttl(Duration::from_secs(60))
///     .limit(1_000)
///     .build()?;
///
/// assert_eq!(square.call(CallArgs::new().arg(7)).await?, 49);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Memo {
    inner: Arc<MemoInner>,
}

struct MemoInner {
    store: Arc<dyn KvStore>,
    codec: KeyCodec,
    serializer: Arc<dyn Serializer>,
    invalidate_chunk_size: usize,
}

impl Memo {
    /// Create a memo with default settings (prefix `"rc"`, JSON values).
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        MemoBuilder::new(store).assemble()
    }

    /// Start configuring a memo over `store`.
    pub fn builder(store: Arc<dyn KvStore>) -> MemoBuilder {
        MemoBuilder::new(store)
    }

    /// Wrap a computation.
    ///
    /// The namespace defaults to the computation's type name, so set one
    /// explicitly with [`WrapBuilder::namespace`] whenever keys must survive
    /// a rebuild. Closures have no usable type name: wrapping one without a
    /// namespace fails at [`WrapBuilder::build`].
    pub fn wrap<F, Fut, R>(&self, compute: F) -> WrapBuilder<R>
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: CacheValue,
    {
        WrapBuilder::new(self.clone(), std::any::type_name::<F>(), compute)
    }

    /// Key prefix shared by every namespace of this memo.
    pub fn prefix(&self) -> &str {
        self.inner.codec.prefix()
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner.store
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.inner.codec
    }

    pub(crate) fn serializer(&self) -> &dyn Serializer {
        self.inner.serializer.as_ref()
    }

    pub(crate) fn invalidate_chunk_size(&self) -> usize {
        self.inner.invalidate_chunk_size
    }

    pub(crate) fn same_instance(&self, other: &Memo) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Point lookup. A present value, even an empty one, is a hit.
    pub(crate) async fn lookup<R: CacheValue>(&self, namespace: &str, key: &str) -> Result<Option<R>> {
        match self.inner.store.get(key).await? {
            Some(bytes) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "namespace" => namespace.to_string())
                    .increment(1);
                debug!(namespace, key, "cache hit");
                Ok(Some(codec::decode_value(self.serializer(), &bytes)?))
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "namespace" => namespace.to_string())
                    .increment(1);
                debug!(namespace, key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Persist freshly computed values for one function.
    ///
    /// A single value goes through [`KvStore::bounded_insert`]; several are
    /// queued into one pipeline. Store failures are swallowed.
    pub(crate) async fn write_back(&self, descriptor: &CallDescriptor, entries: Vec<(String, Vec<u8>)>) {
        let count = entries.len();
        let mut inserts = entries.into_iter().map(|(value_key, value)| BoundedInsert {
            value_key,
            index_key: descriptor.keys_index_name().to_string(),
            value,
            ttl: descriptor.ttl(),
            limit: descriptor.limit(),
        });

        let outcome = match (count, inserts.next()) {
            (_, None) => return,
            (1, Some(insert)) => self.inner.store.bounded_insert(&insert).await,
            (_, Some(first)) => {
                let mut pipeline = StorePipeline::new();
                pipeline.bounded_insert(first);
                for insert in inserts {
                    pipeline.bounded_insert(insert);
                }
                self.inner.store.execute(pipeline).await
            }
        };

        match outcome {
            Ok(0) => {}
            Ok(evicted) => {
                metrics::counter!(telemetry::EVICTIONS_TOTAL, "namespace" => descriptor.namespace().to_string())
                    .increment(evicted);
                debug!(namespace = descriptor.namespace(), evicted, "trimmed namespace index");
            }
            Err(e) => {
                metrics::counter!(telemetry::WRITE_FAILURES_TOTAL, "namespace" => descriptor.namespace().to_string())
                    .increment(1);
                warn!(
                    namespace = descriptor.namespace(),
                    entries = count,
                    store = self.inner.store.name(),
                    error = %e,
                    "cache write-back failed, serving computed result uncached"
                );
            }
        }
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("store", &self.inner.store.name())
            .field("codec", &self.inner.codec)
            .field("invalidate_chunk_size", &self.inner.invalidate_chunk_size)
            .finish()
    }
}
