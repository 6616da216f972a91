//! memokv - function-result memoization over a shared key-value store
//!
//! Wrap an async computation once, then call it through the returned
//! [`CachedFn`] handle: results are stored under keys derived from the
//! call's arguments, optionally expire, and optionally live in a namespace
//! bounded to the `limit` most recently inserted entries. Many pending
//! calls, across different functions, resolve together through
//! [`Memo::resolve_batch`] with one bulk read and one recomputation per
//! function's misses. Calls of one batch share a result type; functions
//! with different result types batch together by returning
//! `serde_json::Value`.
//!
//! The store is abstracted by the [`KvStore`] trait. [`store::MemoryStore`]
//! runs in-process; [`store::RedisStore`] (feature `redis`, on by default)
//! shares the cache across processes, with the bounded insert executed as a
//! server-side script.
//!
//! # Single calls
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use memokv::{CallArgs, Memo, store::MemoryStore};
//!
//! async fn exchange_rate(args: CallArgs) -> memokv::Result<f64> {
//!     let currency: String = args.get(0)?;
//!     Ok(if currency == "EUR" { 1.08 } else { 1.0 })
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> memokv::Result<()> {
//!     let memo = Memo::new(Arc::new(MemoryStore::new()));
//!     let rates = memo
//!         .wrap(exchange_rate)
//!         .namespace("fx.rate")
//!         .ttl(Duration::from_secs(30))
//!         .limit(100)
//!         .build()?;
//!
//!     let eur = rates.call(CallArgs::new().arg("EUR")).await?;
//!     assert_eq!(eur, 1.08);
//!
//!     rates.invalidate(&CallArgs::new().arg("EUR")).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Batches
//!
//! ```rust
//! use std::sync::Arc;
//! use memokv::{CallArgs, Memo, store::MemoryStore};
//!
//! async fn score(args: CallArgs) -> memokv::Result<u64> {
//!     Ok(args.get::<String>(0)?.len() as u64)
//! }
//!
//! async fn scores(items: Vec<CallArgs>) -> memokv::Result<Vec<u64>> {
//!     items.iter().map(|item| Ok(item.get::<String>(0)?.len() as u64)).collect()
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> memokv::Result<()> {
//!     let memo = Memo::new(Arc::new(MemoryStore::new()));
//!     let scorer = memo.wrap(score).namespace("score").batch(scores).build()?;
//!
//!     let results = memo
//!         .resolve_batch(vec![
//!             scorer.pending(CallArgs::new().arg("a")),
//!             scorer.pending(CallArgs::new().arg("abc")),
//!         ])
//!         .await?;
//!     assert_eq!(results, vec![1, 3]);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod error;
pub mod store;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use cache::{CachedFn, Memo, MemoBuilder, PendingCall, WrapBuilder};
pub use codec::{JsonSerializer, KeyCodec, KeySerializer, Serializer};
pub use error::{MemoError, Result};
pub use traits::{KeyStream, KvStore};
pub use types::{CacheValue, CallArgs, CallDescriptor};
