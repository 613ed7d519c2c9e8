//! Memcached Provider Integration Tests
//!
//! These tests require a running Memcached instance and skip themselves when
//! none is reachable.
//!
//! ```bash
//! docker run -d -p 11211:11211 memcached:1.6
//! cargo test --features memcached --test memcached_integration_test
//! ```
//!
//! ## Environment Variables
//!
//! - `TEST_MEMCACHED_URL`: server address (default: "localhost:11211")

#![cfg(feature = "memcached")]

use cache_bridge::config::{CacheProperties, MemcachedSettings};
use cache_bridge::provider::{CacheProvider, LocalStore, MemcachedProvider};
use cache_bridge::{
    CacheManager, CacheManagerFactory, HealthStatus, ProviderContext, ProviderRegistry,
    ProviderType,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> MemcachedSettings {
    let addr = env::var("TEST_MEMCACHED_URL").unwrap_or_else(|_| "localhost:11211".to_string());
    MemcachedSettings {
        servers: vec![addr],
        ..Default::default()
    }
}

fn create_pool() -> deadpool_memcached::Pool {
    settings().create_pool().expect("Failed to create Memcached pool")
}

/// Helper: Check if Memcached is available
async fn is_memcached_available() -> bool {
    let probe =
        MemcachedProvider::new("probe", "it", None, create_pool(), Duration::from_secs(1));
    probe.health().await.available
}

fn factory() -> CacheManagerFactory {
    let ctx = ProviderContext::new(CacheProperties::default()).with_handle(create_pool());
    CacheManagerFactory::new(Arc::new(ProviderRegistry::with_defaults()), Arc::new(ctx))
}

fn manager(cache_name: &str) -> CacheManager {
    let prefix = format!("it-{}", uuid::Uuid::now_v7().simple());
    factory()
        .create_cache_manager(cache_name, ProviderType::Grid, &prefix, None)
        .expect("Failed to create manager")
}

#[tokio::test]
async fn test_memcached_connection() {
    if !is_memcached_available().await {
        println!("⚠️  Memcached not available, skipping test");
        return;
    }

    let cache = manager("health");
    assert_eq!(cache.health().await.status, HealthStatus::Up);
    assert_eq!(cache.fallback_type(), Some(ProviderType::Local));
}

#[tokio::test]
async fn test_memcached_typed_roundtrip() {
    if !is_memcached_available().await {
        println!("⚠️  Memcached not available, skipping test");
        return;
    }

    let cache = manager("products");
    cache.put("p1", &vec![1u32, 2, 3]).await.unwrap();

    let cached: Option<Vec<u32>> = cache.get_as("p1").await.unwrap();
    assert_eq!(cached, Some(vec![1, 2, 3]));
    assert!(cache.evict("p1").await.unwrap());
    assert!(!cache.evict("p1").await.unwrap());
}

#[tokio::test]
async fn test_memcached_put_if_absent() {
    if !is_memcached_available().await {
        println!("⚠️  Memcached not available, skipping test");
        return;
    }

    let cache = manager("locks");
    assert!(cache.put_if_absent("job", "first").await.unwrap());
    assert!(!cache.put_if_absent("job", "second").await.unwrap());
    assert_eq!(
        cache.get_as::<String>("job").await.unwrap().as_deref(),
        Some("first")
    );
}

#[tokio::test]
async fn test_memcached_ttl_expiration() {
    if !is_memcached_available().await {
        println!("⚠️  Memcached not available, skipping test");
        return;
    }

    let cache = manager("sessions");
    cache
        .put_with_ttl("short", "bye", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(cache.exists("short").await.unwrap());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(!cache.exists("short").await.unwrap());
}

#[tokio::test]
async fn test_memcached_clear_removes_written_keys() {
    if !is_memcached_available().await {
        println!("⚠️  Memcached not available, skipping test");
        return;
    }

    let cache = manager("bulk");
    for i in 0..5 {
        cache.put(&format!("k{}", i), &i).await.unwrap();
    }
    assert_eq!(cache.size().await.unwrap(), 5);

    cache.clear().await.unwrap();
    assert_eq!(cache.size().await.unwrap(), 0);
    assert!(!cache.exists("k0").await.unwrap());
}

#[tokio::test]
async fn test_unreachable_memcached_fails_over_to_local() {
    let settings = MemcachedSettings {
        servers: vec!["127.0.0.1:1".to_string()],
        command_timeout: Duration::from_millis(500),
        ..Default::default()
    };
    let pool = settings.create_pool().unwrap();
    let props = CacheProperties {
        memcached: settings,
        ..Default::default()
    };
    let local = Arc::new(LocalStore::new(100));
    let mut ctx = ProviderContext::new(props).with_handle(pool);
    ctx.insert_shared(Arc::clone(&local));

    let factory = CacheManagerFactory::new(Arc::new(ProviderRegistry::with_defaults()), Arc::new(ctx));
    let cache = factory
        .create_cache_manager("sessions", ProviderType::Grid, "app", None)
        .unwrap();

    cache.put("s1", "kept locally").await.unwrap();
    assert!(cache.exists("s1").await.unwrap());
    assert_eq!(local.raw_keys(), vec!["app:sessions:s1".to_string()]);
    assert_eq!(cache.health().await.status, HealthStatus::Degraded);
}
