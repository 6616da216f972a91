//! Wrapped computations

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use tracing::{debug, instrument, warn};

use super::{BatchFn, Memo, PendingCall, ScalarFn};
use crate::codec;
use crate::store::StorePipeline;
use crate::telemetry;
use crate::types::{CacheValue, CallArgs, CallDescriptor};
use crate::{MemoError, Result};

/// Options for wrapping a computation, returned by [`Memo::wrap`].
///
/// ```rust
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use memokv::{CallArgs, Memo, store::MemoryStore};
/// async fn display_name(args: CallArgs) -> memokv::Result<String> {
///     Ok(args.get::<String>(0)?.to_uppercase())
/// }
///
/// async fn display_names(items: Vec<CallArgs>) -> memokv::Result<Vec<String>> {
///     items.iter().map(|item| Ok(item.get::<String>(0)?.to_uppercase())).collect()
/// }
///
/// # let memo = Memo::new(Arc::new(MemoryStore::new()));
/// let lookup = memo
///     .wrap(display_name)
///     .namespace("users.display_name")
///     .ttl(Duration::from_secs(300))
///     .limit(10_000)
///     .batch(display_names)
///     .build()
///     .unwrap();
/// assert!(lookup.descriptor().supports_batch());
/// ```
pub struct WrapBuilder<R> {
    memo: Memo,
    namespace: String,
    namespace_set: bool,
    ttl: Duration,
    limit: u64,
    compute: ScalarFn<R>,
    batch: Option<BatchFn<R>>,
}

impl<R: CacheValue> WrapBuilder<R> {
    pub(super) fn new<F, Fut>(memo: Memo, namespace: &str, compute: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Self {
            memo,
            namespace: namespace.to_string(),
            namespace_set: false,
            ttl: Duration::ZERO,
            limit: 0,
            compute: Arc::new(move |args| compute(args).boxed()),
            batch: None,
        }
    }

    /// Entry expiry. Default: zero, entries never expire.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Maximum live entries in the namespace, oldest evicted first.
    /// Default: zero, unbounded.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Override the namespace. Default: the computation's type name,
    /// which closures do not have; they must set one.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.namespace_set = true;
        self
    }

    /// Recompute misses through a vectorised computation.
    ///
    /// The batch computation receives one [`CallArgs`] per unique miss and
    /// must return one result per item, in the same order. Direct
    /// [`CachedFn::call`]s of a batch-capable function are not cached.
    pub fn batch<B, BFut>(mut self, batch: B) -> Self
    where
        B: Fn(Vec<CallArgs>) -> BFut + Send + Sync + 'static,
        BFut: Future<Output = Result<Vec<R>>> + Send + 'static,
    {
        self.batch = Some(Arc::new(move |items| batch(items).boxed()));
        self
    }

    pub fn build(self) -> Result<CachedFn<R>> {
        if self.namespace.is_empty() {
            return Err(MemoError::Configuration("namespace must not be empty".into()));
        }
        // every closure in one fn shares the type name `fn::{{closure}}`
        if !self.namespace_set && self.namespace.contains("{{closure}}") {
            return Err(MemoError::Configuration(format!(
                "closure '{}' needs an explicit namespace",
                self.namespace
            )));
        }
        let descriptor = CallDescriptor::new(
            self.namespace.clone(),
            self.ttl,
            self.limit,
            self.batch.is_some(),
            self.memo.codec().index_key(&self.namespace),
        );
        Ok(CachedFn {
            memo: self.memo,
            descriptor: Arc::new(descriptor),
            compute: self.compute,
            batch: self.batch,
        })
    }
}

/// Handle to a memoized computation.
///
/// Clones share the descriptor and computations, and count as the same
/// function when grouping batch misses.
pub struct CachedFn<R> {
    memo: Memo,
    descriptor: Arc<CallDescriptor>,
    compute: ScalarFn<R>,
    batch: Option<BatchFn<R>>,
}

impl<R> Clone for CachedFn<R> {
    fn clone(&self) -> Self {
        Self {
            memo: self.memo.clone(),
            descriptor: self.descriptor.clone(),
            compute: self.compute.clone(),
            batch: self.batch.clone(),
        }
    }
}

impl<R: CacheValue> CachedFn<R> {
    /// Look up the cached result, computing and storing it on a miss.
    ///
    /// Store failures during the lookup propagate. A failed write-back is
    /// logged and the computed value returned anyway.
    #[instrument(skip(self, args), fields(namespace = %self.descriptor.namespace()))]
    pub async fn call(&self, args: CallArgs) -> Result<R> {
        if self.descriptor.supports_batch() {
            warn!(
                namespace = self.descriptor.namespace(),
                "batch-capable function called directly, result not cached"
            );
            return self.call_uncached(args).await;
        }

        let key = self.key_for(&args)?;
        if let Some(hit) = self.memo.lookup(self.descriptor.namespace(), &key).await? {
            return Ok(hit);
        }

        metrics::counter!(
            telemetry::RECOMPUTATIONS_TOTAL,
            "namespace" => self.descriptor.namespace().to_string(),
            "mode" => "scalar"
        )
        .increment(1);
        let value = (self.compute)(args).await?;
        let bytes = codec::encode_value(self.memo.serializer(), &value)?;
        self.memo.write_back(&self.descriptor, vec![(key, bytes)]).await;
        Ok(value)
    }

    /// Invoke the raw computation, bypassing the store entirely.
    pub async fn call_uncached(&self, args: CallArgs) -> Result<R> {
        (self.compute)(args).await
    }

    /// Queue a call for [`Memo::resolve_batch`].
    pub fn pending(&self, args: CallArgs) -> PendingCall<R> {
        PendingCall::new(self.clone(), args)
    }

    /// Drop the cached result for `args` and its index entry in one
    /// pipeline. Other entries of the namespace are untouched.
    pub async fn invalidate(&self, args: &CallArgs) -> Result<()> {
        let key = self.key_for(args)?;
        let mut pipeline = StorePipeline::new();
        pipeline.delete(key.as_str());
        if self.descriptor.is_bounded() {
            pipeline.deindex(self.descriptor.keys_index_name(), key.as_str());
        }
        self.memo.store().execute(pipeline).await?;

        metrics::counter!(
            telemetry::INVALIDATIONS_TOTAL,
            "namespace" => self.descriptor.namespace().to_string(),
            "scope" => "key"
        )
        .increment(1);
        debug!(namespace = self.descriptor.namespace(), %key, "invalidated entry");
        Ok(())
    }

    /// Delete every key under the namespace, index included, in chunks.
    ///
    /// Returns the number of keys deleted. Keys of a namespace that starts
    /// with this one followed by `:` share its prefix and are deleted too.
    #[instrument(skip(self), fields(namespace = %self.descriptor.namespace()))]
    pub async fn invalidate_all(&self) -> Result<u64> {
        let prefix = self.memo.codec().namespace_prefix(self.descriptor.namespace());
        let chunk_size = self.memo.invalidate_chunk_size();
        let store = self.memo.store();

        let mut keys = store.scan_prefix(&prefix);
        let mut chunk = Vec::with_capacity(chunk_size);
        let mut deleted = 0;
        while let Some(key) = keys.next().await {
            chunk.push(key?);
            if chunk.len() >= chunk_size {
                deleted += store.delete_many(&chunk).await?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            deleted += store.delete_many(&chunk).await?;
        }

        metrics::counter!(
            telemetry::INVALIDATIONS_TOTAL,
            "namespace" => self.descriptor.namespace().to_string(),
            "scope" => "namespace"
        )
        .increment(1);
        debug!(namespace = self.descriptor.namespace(), deleted, "cleared namespace");
        Ok(deleted)
    }

    /// Storage key for `args`.
    pub fn key_for(&self, args: &CallArgs) -> Result<String> {
        self.memo.codec().derive_key(self.descriptor.namespace(), args)
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    pub(crate) fn memo(&self) -> &Memo {
        &self.memo
    }

    pub(crate) fn descriptor_arc(&self) -> &Arc<CallDescriptor> {
        &self.descriptor
    }

    pub(crate) fn scalar(&self) -> &ScalarFn<R> {
        &self.compute
    }

    pub(crate) fn vectorised(&self) -> Option<&BatchFn<R>> {
        self.batch.as_ref()
    }
}
