//! memokv error types

/// memokv error types
#[derive(Debug, thiserror::Error)]
pub enum MemoError {
    // Data errors
    #[error("serialization error: {0}")]
    Serialization(String),

    // Store errors
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store's atomic primitive itself failed (bad arguments, script fault).
    #[error("store protocol error: {0}")]
    Protocol(String),

    // Internal invariant violations
    /// Request/result pairing broke inside the cache layer. Always fatal.
    #[error("consistency fault: {0}")]
    ConsistencyFault(String),

    #[error("batch computation for '{namespace}' returned {got} results for {expected} calls")]
    BatchShape {
        namespace: String,
        expected: usize,
        got: usize,
    },

    /// The wrapped computation failed; surfaced to the caller unchanged.
    #[error("computation failed: {0}")]
    Computation(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MemoError {
    /// Whether the error came from a store round trip.
    ///
    /// Write-back paths swallow these (log and count) so a freshly computed
    /// result is never lost to a failed cache write. Lookups propagate them.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            MemoError::StoreUnavailable(_) | MemoError::Protocol(_)
        )
    }

    /// Whether the error indicates a broken request/result pairing.
    pub fn is_consistency_fault(&self) -> bool {
        matches!(
            self,
            MemoError::ConsistencyFault(_) | MemoError::BatchShape { .. }
        )
    }
}

impl From<serde_json::Error> for MemoError {
    fn from(err: serde_json::Error) -> Self {
        MemoError::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for MemoError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            MemoError::StoreUnavailable(err.to_string())
        } else {
            MemoError::Protocol(err.to_string())
        }
    }
}

/// Result type alias for memokv operations
pub type Result<T> = std::result::Result<T, MemoError>;
