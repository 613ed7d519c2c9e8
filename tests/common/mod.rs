//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cache_bridge::provider::{CacheProvider, LocalProvider, LocalStore, ProviderType};
use cache_bridge::registry::{ProviderContext, ProviderDescriptor};
use cache_bridge::{CacheHealth, CacheStats, Error, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Switchboard for a scripted backend outage.
///
/// Lives in the [`ProviderContext`] so a test can flip it after the manager
/// has been built by the factory.
#[derive(Default)]
pub struct Outage {
    down: AtomicBool,
    slow: AtomicBool,
    calls: AtomicU64,
}

impl Outage {
    pub fn fail(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn time_out(&self) {
        self.slow.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
        self.slow.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.load(Ordering::SeqCst) {
            return Err(Error::Timeout("scripted command timeout".to_string()));
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::BackendError("scripted connection refused".to_string()));
        }
        Ok(())
    }
}

/// In-memory "remote" store that reports itself as a non-local type and fails
/// on demand.
pub struct ScriptedProvider {
    inner: LocalProvider,
    provider_type: ProviderType,
    outage: Arc<Outage>,
}

impl ScriptedProvider {
    pub fn new(
        provider_type: ProviderType,
        cache_name: &str,
        key_prefix: &str,
        default_ttl: Option<Duration>,
        store: Arc<LocalStore>,
        outage: Arc<Outage>,
    ) -> Self {
        ScriptedProvider {
            inner: LocalProvider::with_store(cache_name, key_prefix, default_ttl, store),
            provider_type,
            outage,
        }
    }
}

/// Physical store of the scripted remote backend, kept apart from any shared
/// local store.
pub struct RemoteStore(pub Arc<LocalStore>);

/// Descriptor for a scripted remote provider of the given type.
///
/// Available when the context carries both an [`Outage`] and a [`RemoteStore`].
pub fn scripted_descriptor(provider_type: ProviderType, priority: i32) -> ProviderDescriptor {
    ProviderDescriptor::new(
        provider_type,
        priority,
        |ctx: &ProviderContext| ctx.has_handle::<Outage>() && ctx.has_handle::<RemoteStore>(),
        move |name, prefix, ttl, ctx: &ProviderContext| {
            let outage = ctx
                .handle::<Outage>()
                .ok_or_else(|| Error::ConfigError("no outage switch".to_string()))?;
            let store = ctx
                .handle::<RemoteStore>()
                .ok_or_else(|| Error::ConfigError("no remote store".to_string()))?;
            let provider: Box<dyn CacheProvider> = Box::new(ScriptedProvider::new(
                provider_type,
                name,
                prefix,
                ttl,
                Arc::clone(&store.0),
                outage,
            ));
            Ok(provider)
        },
    )
}

#[async_trait]
impl CacheProvider for ScriptedProvider {
    fn cache_name(&self) -> &str {
        self.inner.cache_name()
    }

    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn key_prefix(&self) -> &str {
        self.inner.key_prefix()
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.inner.default_ttl()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.outage.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.outage.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.outage.check()?;
        self.inner.put_if_absent(key, value, ttl).await
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.outage.check()?;
        self.inner.evict(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.outage.check()?;
        self.inner.exists(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.outage.check()?;
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        self.outage.check()?;
        self.inner.keys().await
    }

    async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats().await;
        stats.provider_type = self.provider_type;
        stats
    }

    async fn health(&self) -> CacheHealth {
        match self.outage.check() {
            Ok(()) => CacheHealth::up(self.provider_type, self.cache_name(), None),
            Err(e) => CacheHealth::down(self.provider_type, self.cache_name(), e.to_string()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
