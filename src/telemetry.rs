//! Telemetry metric name constants.
//!
//! Centralised metric names for memokv operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `memokv_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `namespace`: the cached function's namespace
//! - `mode`: recomputation mode: "scalar" or "batch"
//! - `scope`: invalidation scope: "key" or "namespace"

/// Total lookups answered from the store.
///
/// Labels: `namespace`.
pub const CACHE_HITS_TOTAL: &str = "memokv_cache_hits_total";

/// Total lookups that found no value.
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "memokv_cache_misses_total";

/// Total invocations of a wrapped computation caused by misses.
///
/// A batch invocation counts once regardless of its size.
///
/// Labels: `namespace`, `mode` ("scalar" | "batch").
pub const RECOMPUTATIONS_TOTAL: &str = "memokv_recomputations_total";

/// Total write-backs that failed and were swallowed.
///
/// Labels: `namespace`.
pub const WRITE_FAILURES_TOTAL: &str = "memokv_write_failures_total";

/// Total entries evicted by the bounded-insert trim.
///
/// Labels: `namespace`.
pub const EVICTIONS_TOTAL: &str = "memokv_evictions_total";

/// Total explicit invalidations.
///
/// Labels: `namespace`, `scope` ("key" | "namespace").
pub const INVALIDATIONS_TOTAL: &str = "memokv_invalidations_total";

/// Number of pending calls per `resolve_batch`.
pub const BATCH_SIZE: &str = "memokv_batch_size";
