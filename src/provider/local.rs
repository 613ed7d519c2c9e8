//! In-process cache provider (thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Expired entries are dropped on access; when the store is full the oldest
//! entry is dropped to make room.

use super::{resolve_ttl, CacheProvider, ProviderType};
use crate::error::{Error, Result};
use crate::key::KeyNamespace;
use crate::observability::{CacheHealth, CacheStats};
use crate::registry::{ProviderContext, ProviderDescriptor};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Resolution priority of the local provider; the last resort under `AUTO`.
pub const LOCAL_PRIORITY: i32 = 40;

/// In-memory entry with optional expiration.
struct LocalEntry {
    data: Vec<u8>,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        LocalEntry {
            data,
            inserted_at: now,
            expires_at: ttl.map(|d| now + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// Physical in-process store.
///
/// Every [`LocalProvider`] writes namespaced keys into a store. Providers
/// normally own a private store; placing one `LocalStore` in the
/// [`ProviderContext`] makes all local providers built from that context share
/// it, the way several managers share one Redis server.
pub struct LocalStore {
    entries: DashMap<String, LocalEntry>,
    max_entries: u64,
}

impl LocalStore {
    pub fn new(max_entries: u64) -> Self {
        LocalStore {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of physical entries across all namespaces, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Physical keys, for inspection.
    pub fn raw_keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Bring the store back under `max_entries` after an insert, never
    /// dropping `keep`. Returns how many entries were dropped.
    ///
    /// Expired entries go first, then the oldest inserted. Concurrent writers
    /// each trim after their own insert, so the limit holds once writes
    /// settle; mid-flight the store may briefly exceed it.
    ///
    /// Must not be called while holding a guard into `entries`.
    fn trim(&self, keep: &str) -> u64 {
        if (self.entries.len() as u64) <= self.max_entries {
            return 0;
        }

        let mut dropped = 0u64;
        self.entries.retain(|_, e| {
            let expired = e.is_expired();
            if expired {
                dropped += 1;
            }
            !expired
        });

        while (self.entries.len() as u64) > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.inserted_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(k) => {
                    // Another writer may have dropped it first
                    if self.entries.remove(&k).is_some() {
                        dropped += 1;
                        debug!("✓ Local store full, dropped oldest entry {}", k);
                    }
                }
                None => break,
            }
        }

        dropped
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        LocalStore::new(crate::config::LocalSettings::default().max_entries)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

/// Thread-safe in-process cache provider.
///
/// # Example
///
/// ```no_run
/// use cache_bridge::provider::{CacheProvider, LocalProvider};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let provider = LocalProvider::new("sessions", "app", Some(Duration::from_secs(300)));
///
///     provider.put("key1", b"value".to_vec(), None).await?;
///     assert!(provider.get("key1").await?.is_some());
///
///     // Stored under the namespaced key
///     assert!(provider.store().raw_keys().contains(&"app:sessions:key1".to_string()));
///     Ok(())
/// }
/// ```
pub struct LocalProvider {
    namespace: KeyNamespace,
    store: Arc<LocalStore>,
    default_ttl: Option<Duration>,
    counters: Counters,
    closed: AtomicBool,
}

impl LocalProvider {
    /// Create a provider over a private store with the default capacity.
    pub fn new(
        cache_name: impl Into<String>,
        key_prefix: impl Into<String>,
        default_ttl: Option<Duration>,
    ) -> Self {
        Self::with_store(
            cache_name,
            key_prefix,
            default_ttl,
            Arc::new(LocalStore::default()),
        )
    }

    /// Create a provider over an existing store.
    pub fn with_store(
        cache_name: impl Into<String>,
        key_prefix: impl Into<String>,
        default_ttl: Option<Duration>,
        store: Arc<LocalStore>,
    ) -> Self {
        let namespace = KeyNamespace::new(key_prefix, cache_name);
        debug!(
            "✓ Local provider created for {}:{} (capacity: {})",
            namespace.prefix(),
            namespace.cache_name(),
            store.max_entries()
        );
        LocalProvider {
            namespace,
            store,
            default_ttl,
            counters: Counters::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Descriptor registering this provider with a
    /// [`ProviderRegistry`](crate::registry::ProviderRegistry).
    ///
    /// Available whenever the local provider is enabled. Uses the context's
    /// shared [`LocalStore`] when one is present.
    pub fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(
            ProviderType::Local,
            LOCAL_PRIORITY,
            |_ctx: &ProviderContext| true,
            |cache_name, key_prefix, default_ttl, ctx: &ProviderContext| {
                let store = ctx.handle::<LocalStore>().unwrap_or_else(|| {
                    Arc::new(LocalStore::new(ctx.properties().local.max_entries))
                });
                let provider: Box<dyn CacheProvider> = Box::new(LocalProvider::with_store(
                    cache_name,
                    key_prefix,
                    default_ttl,
                    store,
                ));
                Ok(provider)
            },
        )
    }

    /// The physical store behind this provider.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::BackendError(format!(
                "Local provider for {} is closed",
                self.namespace.cache_name()
            )));
        }
        Ok(())
    }

    fn write(&self, full: String, value: Vec<u8>, ttl: Option<Duration>) {
        self.store
            .entries
            .insert(full.clone(), LocalEntry::new(value, ttl));
        self.counters.puts.fetch_add(1, Ordering::Relaxed);

        let dropped = self.store.trim(&full);
        self.counters.evictions.fetch_add(dropped, Ordering::Relaxed);
    }

    fn live_keys(&self) -> HashSet<String> {
        self.store
            .entries
            .iter()
            .filter(|e| !e.is_expired())
            .filter_map(|e| self.namespace.strip(e.key()).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl CacheProvider for LocalProvider {
    fn cache_name(&self) -> &str {
        self.namespace.cache_name()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Local
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

        if let Some(entry) = self.store.entries.get(&full) {
            if !entry.is_expired() {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("✓ Local GET {} -> HIT", full);
                return Ok(Some(entry.data.clone()));
            }
        }

        // Only drop the entry if it is still the expired one
        self.store.entries.remove_if(&full, |_, e| e.is_expired());
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("✓ Local GET {} -> MISS", full);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);
        let ttl = resolve_ttl(ttl, self.default_ttl);

        if let Some(d) = ttl {
            debug!("✓ Local PUT {} (TTL: {:?})", full, d);
        } else {
            debug!("✓ Local PUT {}", full);
        }

        self.write(full, value, ttl);
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

        // The entry guard holds the shard lock, so check-and-insert is atomic
        let inserted = match self.store.entries.entry(full.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(LocalEntry::new(value, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LocalEntry::new(value, ttl));
                true
            }
        };

        if inserted {
            self.counters.puts.fetch_add(1, Ordering::Relaxed);
            let dropped = self.store.trim(&full);
            self.counters.evictions.fetch_add(dropped, Ordering::Relaxed);
        }
        debug!("✓ Local PUT_IF_ABSENT {} -> {}", full, inserted);
        Ok(inserted)
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);
        let was_present = self
            .store
            .entries
            .remove(&full)
            .is_some_and(|(_, e)| !e.is_expired());

        if was_present {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        debug!("✓ Local EVICT {} -> {}", full, was_present);
        Ok(was_present)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);
        Ok(self
            .store
            .entries
            .get(&full)
            .is_some_and(|e| !e.is_expired()))
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        let namespace = &self.namespace;
        self.store.entries.retain(|k, _| !namespace.owns(k));
        warn!(
            "⚠ Local CLEAR executed - all entries under {}:{} removed",
            namespace.prefix(),
            namespace.cache_name()
        );
        Ok(())
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        self.ensure_open()?;
        Ok(self.live_keys())
    }

    async fn size(&self) -> Result<u64> {
        self.ensure_open()?;
        let count = self
            .store
            .entries
            .iter()
            .filter(|e| !e.is_expired() && self.namespace.owns(e.key()))
            .count();
        Ok(count as u64)
    }

    async fn stats(&self) -> CacheStats {
        let entry_count = if self.closed.load(Ordering::Acquire) {
            0
        } else {
            self.live_keys().len() as u64
        };

        CacheStats {
            provider_type: ProviderType::Local,
            cache_name: self.namespace.cache_name().to_string(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entry_count,
            captured_at: SystemTime::now(),
        }
    }

    async fn health(&self) -> CacheHealth {
        if self.closed.load(Ordering::Acquire) {
            return CacheHealth::down(
                ProviderType::Local,
                self.namespace.cache_name(),
                "provider closed",
            );
        }
        // In-process store is always reachable
        CacheHealth::up(
            ProviderType::Local,
            self.namespace.cache_name(),
            Some(Duration::ZERO),
        )
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(
                "✓ Local provider for {}:{} closed",
                self.namespace.prefix(),
                self.namespace.cache_name()
            );
        }
        Ok(())
    }
}
