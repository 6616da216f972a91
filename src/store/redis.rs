//! Redis-backed store.
//!
//! Requires the `redis` feature (on by default).
//!
//! The bounded insert runs as a Lua [`redis::Script`] loaded once when the
//! store connects; every insert is an `EVALSHA` of its hash. A single insert
//! reloads the script by itself if the server has lost its script cache
//! (restart, `SCRIPT FLUSH`). Pipelines do not, so [`KvStore::execute`]
//! reloads and retries once.
//!
//! Evicted values are deleted from inside the script, so keys of one
//! namespace must live on the same node; Redis Cluster is not supported.

use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult, Script, ScriptInvocation};
use tracing::{debug, info, warn};

use crate::store::{BoundedInsert, StoreOp, StorePipeline};
use crate::traits::{KeyStream, KvStore};
use crate::{MemoError, Result};

/// Environment variable holding the Redis URL.
pub const ENV_REDIS_URL: &str = "MEMOKV_REDIS_URL";
/// Environment variable holding the per-operation timeout in milliseconds.
pub const ENV_REDIS_TIMEOUT_MS: &str = "MEMOKV_REDIS_TIMEOUT_MS";
/// Environment variable holding the `SCAN` page size hint.
pub const ENV_REDIS_SCAN_COUNT: &str = "MEMOKV_REDIS_SCAN_COUNT";

/// Atomic write + bounded index maintenance.
///
/// KEYS[1] value key, KEYS[2] index key.
/// ARGV[1] serialized value, ARGV[2] ttl in milliseconds (0 = none),
/// ARGV[3] limit (0 = unbounded). Returns the number of evicted entries.
const BOUNDED_INSERT_SCRIPT: &str = r"
redis.replicate_commands()
local ttl_ms = tonumber(ARGV[2])
if ttl_ms > 0 then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ttl_ms)
else
  redis.call('SET', KEYS[1], ARGV[1])
end
local limit = tonumber(ARGV[3])
if limit <= 0 then
  return 0
end
local now = redis.call('TIME')
local score = tonumber(now[1]) * 1000000 + tonumber(now[2])
local newest = redis.call('ZRANGE', KEYS[2], -1, -1, 'WITHSCORES')
if #newest > 0 then
  local top = tonumber(newest[2])
  if score <= top then
    score = top + 1
  end
end
redis.call('ZADD', KEYS[2], score, KEYS[1])
local over = redis.call('ZCARD', KEYS[2]) - limit
if over <= 0 then
  return 0
end
local popped = redis.call('ZPOPMIN', KEYS[2], over)
local stale = {}
for i = 1, #popped, 2 do
  stale[#stale + 1] = popped[i]
end
for i = 1, #stale, 1000 do
  redis.call('DEL', unpack(stale, i, math.min(i + 999, #stale)))
end
return #stale
";

/// Redis connection configuration.
///
/// ```rust
/// # use memokv::store::RedisConfig;
/// # use std::time::Duration;
/// let config = RedisConfig::new("redis://cache.internal:6379")
///     .operation_timeout(Duration::from_millis(250))
///     .scan_count(1_000);
/// assert_eq!(config.scan_count, 1_000);
/// ```
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL. Default: `redis://127.0.0.1:6379`.
    pub url: String,
    /// Deadline applied to every store round trip. Default: none.
    pub operation_timeout: Option<Duration>,
    /// `COUNT` hint for `SCAN` pages. Default: 500.
    pub scan_count: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            operation_timeout: None,
            scan_count: 500,
        }
    }
}

impl RedisConfig {
    /// Create a config for the given URL with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Read `MEMOKV_REDIS_URL`, `MEMOKV_REDIS_TIMEOUT_MS` and
    /// `MEMOKV_REDIS_SCAN_COUNT`, falling back to defaults for unset or
    /// unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var(ENV_REDIS_URL).unwrap_or(defaults.url),
            operation_timeout: std::env::var(ENV_REDIS_TIMEOUT_MS)
                .ok()
                .and_then(|ms| ms.parse::<u64>().ok())
                .map(Duration::from_millis)
                .or(defaults.operation_timeout),
            scan_count: std::env::var(ENV_REDIS_SCAN_COUNT)
                .ok()
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.scan_count),
        }
    }

    /// Set the deadline applied to every round trip.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Set the `SCAN` page size hint.
    pub fn scan_count(mut self, count: usize) -> Self {
        self.scan_count = count.max(1);
        self
    }
}

/// Redis-backed [`KvStore`].
///
/// Uses one multiplexed connection, cloned per operation.
pub struct RedisStore {
    conn: MultiplexedConnection,
    config: RedisConfig,
    script: Script,
}

impl RedisStore {
    /// Connect and register the bounded-insert script.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| MemoError::Configuration(format!("invalid redis url: {e}")))?;
        let conn = with_deadline(
            config.operation_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await?;

        let store = Self {
            conn,
            config,
            script: Script::new(BOUNDED_INSERT_SCRIPT),
        };
        store.register_script().await?;
        info!(sha = store.script.get_hash(), "registered bounded-insert script");
        Ok(store)
    }

    /// Connect using [`RedisConfig::from_env`].
    pub async fn from_env() -> Result<Self> {
        Self::connect(RedisConfig::from_env()).await
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn register_script(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let load = self.script.prepare_invoke();
        with_deadline(self.config.operation_timeout, load.load_async(&mut conn)).await?;
        Ok(())
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> RedisResult<T> {
        let mut conn = self.conn.clone();
        with_deadline(self.config.operation_timeout, cmd.query_async(&mut conn)).await
    }

    async fn query_pipeline<T: FromRedisValue>(&self, pipe: &redis::Pipeline) -> RedisResult<T> {
        let mut conn = self.conn.clone();
        with_deadline(self.config.operation_timeout, pipe.query_async(&mut conn)).await
    }

    fn invocation(&self, insert: &BoundedInsert) -> ScriptInvocation<'_> {
        let mut invocation = self.script.key(&insert.value_key);
        invocation
            .key(&insert.index_key)
            .arg(insert.value.as_slice())
            .arg(ttl_millis(insert.ttl))
            .arg(insert.limit);
        invocation
    }

    fn build_pipeline(&self, ops: &[StoreOp]) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                StoreOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                StoreOp::Deindex { index_key, member } => {
                    pipe.cmd("ZREM").arg(index_key).arg(member).ignore();
                }
                StoreOp::BoundedInsert(insert) => {
                    pipe.invoke_script(&self.invocation(insert));
                }
            }
        }
        pipe
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        Ok(self.query(&cmd).await?)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("MGET");
        cmd.arg(keys);
        let values: Vec<Option<Vec<u8>>> = self.query(&cmd).await?;
        if values.len() != keys.len() {
            return Err(MemoError::Protocol(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    async fn bounded_insert(&self, insert: &BoundedInsert) -> Result<u64> {
        let mut conn = self.conn.clone();
        let invocation = self.invocation(insert);
        let evicted: i64 =
            with_deadline(self.config.operation_timeout, invocation.invoke_async(&mut conn)).await?;
        Ok(evicted.max(0) as u64)
    }

    async fn execute(&self, pipeline: StorePipeline) -> Result<u64> {
        if pipeline.is_empty() {
            return Ok(0);
        }
        let pipe = self.build_pipeline(pipeline.ops());
        // NOSCRIPT fails every EVALSHA of the transaction; DEL/ZREM replay idempotently.
        let evicted: Vec<i64> = match self.query_pipeline(&pipe).await {
            Err(e) if e.kind() == ErrorKind::NoScriptError => {
                warn!("bounded-insert script missing on server, registering again");
                self.register_script().await?;
                self.query_pipeline(&pipe).await?
            }
            reply => reply?,
        };
        Ok(evicted.into_iter().map(|n| n.max(0) as u64).sum())
    }

    fn scan_prefix(&self, prefix: &str) -> KeyStream {
        let pattern = format!("{}*", escape_glob(prefix));
        let count = self.config.scan_count;
        let timeout = self.config.operation_timeout;
        debug!(%pattern, "scanning keys");

        let pages = stream::unfold(Some((self.conn.clone(), 0u64)), move |state| {
            let pattern = pattern.clone();
            async move {
                let Some((mut conn, cursor)) = state else {
                    return None;
                };
                let mut cmd = redis::cmd("SCAN");
                cmd.arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(count);
                let reply: RedisResult<(u64, Vec<String>)> =
                    with_deadline(timeout, cmd.query_async(&mut conn)).await;
                match reply {
                    Ok((next, keys)) => {
                        let next_state = (next != 0).then_some((conn, next));
                        Some((Ok(keys), next_state))
                    }
                    Err(e) => Some((Err(MemoError::from(e)), None)),
                }
            }
        });

        Box::pin(pages.flat_map(|page: Result<Vec<String>>| {
            let items: Vec<Result<String>> = match page {
                Ok(keys) => keys.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        }))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        let deleted: i64 = self.query(&cmd).await?;
        Ok(deleted.max(0) as u64)
    }
}

/// Bound a round trip by `timeout`, reporting an elapsed deadline as an
/// I/O timeout.
async fn with_deadline<T, F>(timeout: Option<Duration>, fut: F) -> RedisResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(reply) => reply,
            Err(_) => Err(RedisError::from(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("redis operation exceeded {limit:?}"),
            ))),
        },
        None => fut.await,
    }
}

/// TTL in whole milliseconds; a non-zero sub-millisecond TTL rounds up so
/// it never turns into "no expiry".
fn ttl_millis(ttl: Duration) -> u64 {
    if ttl.is_zero() {
        0
    } else {
        (ttl.as_millis() as u64).max(1)
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
