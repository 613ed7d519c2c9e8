//! Failover example: a remote primary that goes down and the local fallback
//! that keeps serving.
//!
//! The "remote" provider here is an in-memory stand-in that can be switched
//! off, so the example runs without any server.

use async_trait::async_trait;
use cache_bridge::provider::{CacheProvider, LocalProvider};
use cache_bridge::{
    config::CacheProperties, error::Result, CacheHealth, CacheManagerFactory, CacheStats, Error,
    ProviderContext, ProviderDescriptor, ProviderRegistry, ProviderType,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Switch shared through the provider context.
#[derive(Default)]
struct Power(AtomicBool);

impl Power {
    fn check(&self) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            Err(Error::BackendError("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

struct FlakyRemote {
    inner: LocalProvider,
    power: Arc<Power>,
}

#[async_trait]
impl CacheProvider for FlakyRemote {
    fn cache_name(&self) -> &str {
        self.inner.cache_name()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Distributed
    }

    fn key_prefix(&self) -> &str {
        self.inner.key_prefix()
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.inner.default_ttl()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.power.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.power.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        self.power.check()?;
        self.inner.put_if_absent(key, value, ttl).await
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.power.check()?;
        self.inner.evict(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.power.check()?;
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        self.power.check()?;
        self.inner.keys().await
    }

    async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats().await;
        stats.provider_type = ProviderType::Distributed;
        stats
    }

    async fn health(&self) -> CacheHealth {
        match self.power.check() {
            Ok(()) => CacheHealth::up(ProviderType::Distributed, self.cache_name(), None),
            Err(e) => CacheHealth::down(ProviderType::Distributed, self.cache_name(), e.to_string()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

fn remote_descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderType::Distributed,
        10,
        |ctx: &ProviderContext| ctx.has_handle::<Power>(),
        |cache_name, key_prefix, ttl, ctx: &ProviderContext| {
            let power = ctx
                .handle::<Power>()
                .ok_or_else(|| Error::ConfigError("no remote connection".to_string()))?;
            let provider: Box<dyn CacheProvider> = Box::new(FlakyRemote {
                inner: LocalProvider::new(cache_name, key_prefix, ttl),
                power,
            });
            Ok(provider)
        },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .ok();

    println!("\n=== Cache Bridge - Failover Example ===\n");

    let registry = ProviderRegistry::new()
        .with(remote_descriptor())?
        .with(LocalProvider::descriptor())?;
    let power = Arc::new(Power::default());
    let mut context = ProviderContext::new(CacheProperties::default());
    context.insert_shared(Arc::clone(&power));

    let factory = CacheManagerFactory::new(Arc::new(registry), Arc::new(context));
    let prices = factory.create_cache_manager("prices", ProviderType::Auto, "shop", None)?;
    println!(
        "1. Primary: {}, fallback: {:?}\n",
        prices.cache_type(),
        prices.fallback_type()
    );

    prices.put("sku:1", &999u32).await?;
    println!("2. Stored sku:1 on the primary");
    println!("   health: {}\n", prices.health().await.status_str());

    println!("3. Primary goes down...");
    power.0.store(true, Ordering::SeqCst);
    let cached: Option<u32> = prices.get_as("sku:1").await?;
    println!("   ✓ get sku:1 -> {:?} (fallback never saw it)", cached);
    prices.put("sku:2", &450u32).await?;
    let cached: Option<u32> = prices.get_as("sku:2").await?;
    println!("   ✓ get sku:2 -> {:?} (served by fallback)", cached);
    println!("   health: {}", prices.health().await.status_str());
    println!("   failovers so far: {}\n", prices.failover_count());

    println!("4. Primary recovers...");
    power.0.store(false, Ordering::SeqCst);
    let cached: Option<u32> = prices.get_as("sku:1").await?;
    println!("   ✓ get sku:1 -> {:?} (primary again)", cached);
    println!("   health: {}\n", prices.health().await.status_str());

    prices.close().await;
    println!("=== Example Complete ===\n");
    Ok(())
}
