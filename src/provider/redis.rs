//! Redis cache provider (the `DISTRIBUTED` type).
//!
//! The connection pool is not owned by the provider: it is taken from the
//! [`ProviderContext`] as a `deadpool_redis::Pool` handle, so every manager
//! built from one context shares one pool.

use super::{resolve_ttl, CacheProvider, ProviderType};
use crate::error::{Error, Result};
use crate::key::KeyNamespace;
use crate::observability::{CacheHealth, CacheStats};
use crate::registry::{ProviderContext, ProviderDescriptor};
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, RedisError};
use deadpool_redis::{Connection, Pool, PoolError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// Resolution priority of the Redis provider; preferred first under `AUTO`.
pub const REDIS_PRIORITY: i32 = 10;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;

/// Largest expiry Redis accepts for `PX`.
const MAX_PX_MILLIS: u64 = i64::MAX as u64;

/// Redis provider over a shared deadpool connection pool.
///
/// # Example
///
/// ```no_run
/// # use cache_bridge::config::RedisSettings;
/// # use cache_bridge::provider::{CacheProvider, RedisProvider};
/// # use std::time::Duration;
/// # async fn example() -> cache_bridge::Result<()> {
/// let settings = RedisSettings::default();
/// let pool = settings.create_pool()?;
/// let provider = RedisProvider::new("sessions", "app", None, pool, settings.command_timeout);
///
/// provider.put("key", b"value".to_vec(), Some(Duration::from_secs(60))).await?;
/// let value = provider.get("key").await?;
/// # Ok(())
/// # }
/// ```
pub struct RedisProvider {
    namespace: KeyNamespace,
    pool: Pool,
    default_ttl: Option<Duration>,
    command_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    closed: AtomicBool,
}

impl RedisProvider {
    pub fn new(
        cache_name: impl Into<String>,
        key_prefix: impl Into<String>,
        default_ttl: Option<Duration>,
        pool: Pool,
        command_timeout: Duration,
    ) -> Self {
        let namespace = KeyNamespace::new(key_prefix, cache_name);
        debug!(
            "✓ Redis provider created for {}:{}",
            namespace.prefix(),
            namespace.cache_name()
        );
        RedisProvider {
            namespace,
            pool,
            default_ttl,
            command_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Descriptor registering this provider with a
    /// [`ProviderRegistry`](crate::registry::ProviderRegistry).
    ///
    /// Available when the context holds a `deadpool_redis::Pool`.
    pub fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(
            ProviderType::Distributed,
            REDIS_PRIORITY,
            |ctx: &ProviderContext| ctx.has_handle::<Pool>(),
            |cache_name, key_prefix, default_ttl, ctx: &ProviderContext| {
                let pool = ctx.handle::<Pool>().ok_or_else(|| {
                    Error::ConfigError("No Redis connection pool in provider context".to_string())
                })?;
                let provider: Box<dyn CacheProvider> = Box::new(RedisProvider::new(
                    cache_name,
                    key_prefix,
                    default_ttl,
                    Pool::clone(&pool),
                    ctx.properties().redis.command_timeout,
                ));
                Ok(provider)
            },
        )
    }

    /// Pool size and idle connections.
    pub fn pool_status(&self) -> (usize, usize) {
        let status = self.pool.status();
        (status.size, status.available)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::BackendError(format!(
                "Redis provider for {} is closed",
                self.namespace.cache_name()
            )));
        }
        Ok(())
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => {
                Error::Timeout(format!("Timed out waiting for Redis connection: {}", e))
            }
            _ => Error::BackendError(format!("Failed to get Redis connection: {}", e)),
        })
    }

    /// Run one command under the command timeout.
    async fn timed<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "⚠ Redis {} exceeded command timeout of {:?}",
                    op, self.command_timeout
                );
                Err(Error::Timeout(format!(
                    "Redis {} exceeded {:?}",
                    op, self.command_timeout
                )))
            }
        }
    }

    async fn scan_keys(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let pattern = self.namespace.scan_pattern();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut *conn)
                .await
                .map_err(|e| command_error("SCAN", &pattern, e))?;

            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(found)
    }
}

/// `PX` argument for a TTL: at least 1ms, at most what Redis accepts.
fn px_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_PX_MILLIS)
}

fn command_error(op: &str, key: &str, e: RedisError) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Redis {} timed out for key {}: {}", op, key, e))
    } else {
        Error::BackendError(format!("Redis {} failed for key {}: {}", op, key, e))
    }
}

#[async_trait]
impl CacheProvider for RedisProvider {
    fn cache_name(&self) -> &str {
        self.namespace.cache_name()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Distributed
    }

    fn key_prefix(&self) -> &str {
        self.namespace.prefix()
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);

        let value: Option<Vec<u8>> = self
            .timed("GET", async {
                let mut conn = self.connection().await?;
                conn.get(&full)
                    .await
                    .map_err(|e| command_error("GET", &full, e))
            })
            .await?;

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("✓ Redis GET {} -> HIT", full);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("✓ Redis GET {} -> MISS", full);
        }

        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);
        let ttl = resolve_ttl(ttl, self.default_ttl);

        self.timed("SET", async {
            let mut conn = self.connection().await?;
            match ttl {
                Some(duration) => {
                    let millis = px_millis(duration);
                    conn.pset_ex::<_, _, ()>(&full, value, millis)
                        .await
                        .map_err(|e| command_error("PSETEX", &full, e))?;
                    debug!("✓ Redis SET {} (TTL: {}ms)", full, millis);
                }
                None => {
                    conn.set::<_, _, ()>(&full, value)
                        .await
                        .map_err(|e| command_error("SET", &full, e))?;
                    debug!("✓ Redis SET {}", full);
                }
            }
            Ok(())
        })
        .await?;

        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);
        let ttl = resolve_ttl(ttl, self.default_ttl);

        // SET NX replies OK when written and nil when the key exists
        let inserted = self
            .timed("SET NX", async {
                let mut conn = self.connection().await?;
                let mut cmd = redis::cmd("SET");
                cmd.arg(&full).arg(value).arg("NX");
                if let Some(duration) = ttl {
                    cmd.arg("PX").arg(px_millis(duration));
                }
                let reply: Option<String> = cmd
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| command_error("SET NX", &full, e))?;
                Ok(reply.is_some())
            })
            .await?;

        if inserted {
            self.puts.fetch_add(1, Ordering::Relaxed);
        }
        debug!("✓ Redis SET NX {} -> {}", full, inserted);
        Ok(inserted)
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);

        let removed: u64 = self
            .timed("DEL", async {
                let mut conn = self.connection().await?;
                conn.del(&full)
                    .await
                    .map_err(|e| command_error("DEL", &full, e))
            })
            .await?;

        if removed > 0 {
            self.evictions.fetch_add(removed, Ordering::Relaxed);
        }
        debug!("✓ Redis DELETE {} -> {}", full, removed > 0);
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);

        self.timed("EXISTS", async {
            let mut conn = self.connection().await?;
            conn.exists(&full)
                .await
                .map_err(|e| command_error("EXISTS", &full, e))
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;

        let removed = self
            .timed("CLEAR", async {
                let mut conn = self.connection().await?;
                let keys = self.scan_keys(&mut conn).await?;
                let mut removed = 0u64;
                for chunk in keys.chunks(SCAN_BATCH) {
                    let n: u64 = conn
                        .del(chunk)
                        .await
                        .map_err(|e| command_error("DEL", &self.namespace.scan_pattern(), e))?;
                    removed += n;
                }
                Ok(removed)
            })
            .await?;

        warn!(
            "⚠ Redis CLEAR executed - {} keys under {}:{} removed",
            removed,
            self.namespace.prefix(),
            self.namespace.cache_name()
        );
        Ok(())
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        self.ensure_open()?;

        let physical = self
            .timed("SCAN", async {
                let mut conn = self.connection().await?;
                self.scan_keys(&mut conn).await
            })
            .await?;

        Ok(physical
            .iter()
            .filter_map(|k| self.namespace.strip(k).map(str::to_string))
            .collect())
    }

    async fn stats(&self) -> CacheStats {
        let entry_count = if self.closed.load(Ordering::Acquire) {
            0
        } else {
            match self.size().await {
                Ok(n) => n,
                Err(e) => {
                    warn!("⚠ Redis stats could not count entries: {}", e);
                    0
                }
            }
        };

        CacheStats {
            provider_type: ProviderType::Distributed,
            cache_name: self.namespace.cache_name().to_string(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count,
            captured_at: SystemTime::now(),
        }
    }

    async fn health(&self) -> CacheHealth {
        let name = self.namespace.cache_name();
        if self.closed.load(Ordering::Acquire) {
            return CacheHealth::down(ProviderType::Distributed, name, "provider closed");
        }

        let started = Instant::now();
        let ping = self
            .timed("PING", async {
                let mut conn = self.connection().await?;
                let pong: String = redis::cmd("PING")
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| command_error("PING", "-", e))?;
                Ok(pong)
            })
            .await;

        match ping {
            Ok(pong) if pong.contains("PONG") => {
                CacheHealth::up(ProviderType::Distributed, name, Some(started.elapsed()))
            }
            Ok(other) => CacheHealth::down(
                ProviderType::Distributed,
                name,
                format!("unexpected PING reply: {}", other),
            ),
            Err(e) => {
                warn!("⚠ Redis health check failed for {}: {}", name, e);
                CacheHealth::down(ProviderType::Distributed, name, e.to_string())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // The pool belongs to the context; other providers may still use it
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(
                "✓ Redis provider for {}:{} closed",
                self.namespace.prefix(),
                self.namespace.cache_name()
            );
        }
        Ok(())
    }
}
