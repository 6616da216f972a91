//! Static metadata for one cached computation

use std::time::Duration;

/// Immutable per-function metadata, built once when a computation is wrapped.
///
/// Every key the function writes lives under `{prefix}:{namespace}:`, and
/// when `limit > 0` the keys are tracked in the ordered index named by
/// [`keys_index_name`](Self::keys_index_name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    namespace: String,
    ttl: Duration,
    limit: u64,
    supports_batch: bool,
    keys_index_name: String,
}

impl CallDescriptor {
    pub(crate) fn new(
        namespace: String,
        ttl: Duration,
        limit: u64,
        supports_batch: bool,
        keys_index_name: String,
    ) -> Self {
        Self {
            namespace,
            ttl,
            limit,
            supports_batch,
            keys_index_name,
        }
    }

    /// Logical grouping of this function's entries.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Entry expiry. Zero means entries never expire.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Maximum live entries in the namespace. Zero means unbounded.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether misses are recomputed through a vectorised batch computation.
    pub fn supports_batch(&self) -> bool {
        self.supports_batch
    }

    /// Store key of the namespace's ordered index.
    pub fn keys_index_name(&self) -> &str {
        &self.keys_index_name
    }

    /// Whether an ordered index is maintained for this namespace.
    pub fn is_bounded(&self) -> bool {
        self.limit > 0
    }
}
