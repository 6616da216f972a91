//! Store backends
//!
//! - [`MemoryStore`]: in-process, for single-process use and tests
//! - [`RedisStore`]: Redis, shared across processes (`redis` feature)

mod memory;
mod pipeline;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
pub use pipeline::{BoundedInsert, StoreOp, StorePipeline};
#[cfg(feature = "redis")]
pub use self::redis::{
    ENV_REDIS_SCAN_COUNT, ENV_REDIS_TIMEOUT_MS, ENV_REDIS_URL, RedisConfig, RedisStore,
};
