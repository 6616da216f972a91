//! Builder for configuring memo instances

use std::sync::Arc;

use super::{Memo, MemoInner};
use crate::codec::{JsonSerializer, KeyCodec, KeySerializer, Serializer};
use crate::traits::KvStore;
use crate::{MemoError, Result};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "rc";

/// Default number of keys deleted per round trip by
/// [`CachedFn::invalidate_all`](super::CachedFn::invalidate_all).
pub const DEFAULT_INVALIDATE_CHUNK_SIZE: usize = 500;

/// Builder for [`Memo`].
///
/// ```rust
/// # use std::sync::Arc;
/// # use memokv::{Memo, codec::JsonSerializer, store::MemoryStore};
/// let memo = Memo::builder(Arc::new(MemoryStore::new()))
///     .prefix("billing")
///     .serializer(JsonSerializer)
///     .invalidate_chunk_size(200)
///     .build()
///     .unwrap();
/// assert_eq!(memo.prefix(), "billing");
/// ```
pub struct MemoBuilder {
    store: Arc<dyn KvStore>,
    prefix: String,
    serializer: Arc<dyn Serializer>,
    key_serializer: Option<Arc<dyn KeySerializer>>,
    invalidate_chunk_size: usize,
}

impl MemoBuilder {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            serializer: Arc::new(JsonSerializer),
            key_serializer: None,
            invalidate_chunk_size: DEFAULT_INVALIDATE_CHUNK_SIZE,
        }
    }

    /// Set the key prefix. Default: `"rc"`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the value serializer. Default: [`JsonSerializer`].
    ///
    /// Also encodes key material unless a key serializer is set.
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Derive keys with a dedicated serializer instead of the value one.
    pub fn key_serializer(mut self, key_serializer: impl KeySerializer + 'static) -> Self {
        self.key_serializer = Some(Arc::new(key_serializer));
        self
    }

    /// Keys deleted per round trip when clearing a namespace. Default: 500.
    pub fn invalidate_chunk_size(mut self, size: usize) -> Self {
        self.invalidate_chunk_size = size;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Memo> {
        if self.prefix.is_empty() {
            return Err(MemoError::Configuration("prefix must not be empty".into()));
        }
        if self.invalidate_chunk_size == 0 {
            return Err(MemoError::Configuration(
                "invalidate_chunk_size must be greater than zero".into(),
            ));
        }
        Ok(self.assemble())
    }

    pub(super) fn assemble(self) -> Memo {
        let codec = KeyCodec::new(self.prefix, self.serializer.clone(), self.key_serializer);
        Memo {
            inner: Arc::new(MemoInner {
                store: self.store,
                codec,
                serializer: self.serializer,
                invalidate_chunk_size: self.invalidate_chunk_size,
            }),
        }
    }
}
