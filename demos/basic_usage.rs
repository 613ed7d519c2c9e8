//! Basic usage example of cache-bridge.

use cache_bridge::{
    config::CacheProperties, error::Result, CacheManagerFactory, ManagerOptions, ProviderContext,
    ProviderRegistry, ProviderType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Example value: Employment
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Employment {
    id: String,
    employer_name: String,
    salary: f64,
}

/// Simulates a slow database lookup.
async fn fetch_employment(id: &str) -> Result<Employment> {
    println!("  [DB] Fetching employment: {}", id);
    Ok(Employment {
        id: id.to_string(),
        employer_name: "Acme Corp".to_string(),
        salary: 75000.0,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Cache Bridge - Basic Example ===\n");

    // 1. Registry and context
    println!("1. Registering providers...");
    let registry = Arc::new(ProviderRegistry::with_defaults());
    let context = Arc::new(ProviderContext::new(CacheProperties::default()));
    println!("   ✓ Registered: {:?}\n", registry.provider_types());

    // 2. Factory resolves AUTO to the best available provider
    println!("2. Creating a cache manager (AUTO):");
    let factory = CacheManagerFactory::new(registry, context);
    let employments = factory.create_cache_manager("employments", ProviderType::Auto, "hr", None)?;
    println!(
        "   ✓ Resolved to {} (fallback: {:?})\n",
        employments.cache_type(),
        employments.fallback_type()
    );

    // 3. First request - miss, load from the database
    println!("3. First request for emp_001:");
    let emp: Employment = employments
        .get_or_insert_with("emp_001", || fetch_employment("emp_001"))
        .await?;
    println!("   ✓ Loaded: {} (${:.2})\n", emp.employer_name, emp.salary);

    // 4. Second request - hit
    println!("4. Second request for emp_001:");
    let emp: Employment = employments
        .get_or_insert_with("emp_001", || fetch_employment("emp_001"))
        .await?;
    println!("   ✓ From cache: {} (${:.2})\n", emp.employer_name, emp.salary);

    // 5. Conditional write
    println!("5. put_if_absent:");
    let first = employments.put_if_absent("lock:payroll", "worker-1").await?;
    let second = employments.put_if_absent("lock:payroll", "worker-2").await?;
    println!("   ✓ first: {}, second: {}\n", first, second);

    // 6. Options with an explicit TTL
    println!("6. Manager with options:");
    let sessions = factory.create_cache_manager_with(
        ManagerOptions::new("sessions")
            .provider_type(ProviderType::Local)
            .key_prefix("hr")
            .default_ttl(Duration::from_millis(200))
            .description("short-lived login sessions"),
    )?;
    sessions.put("s1", &emp.id).await?;
    println!("   ✓ s1 present: {}", sessions.exists("s1").await?);
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("   ✓ s1 after TTL: {}\n", sessions.exists("s1").await?);

    // 7. Inspect
    println!("7. Stats and health:");
    let stats = employments.stats().await;
    println!(
        "   ✓ hits: {}, misses: {}, hit rate: {:.0}%",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );
    println!("   ✓ health: {}\n", employments.health().await.status_str());

    // 8. Shutdown
    employments.close().await;
    sessions.close().await;
    println!("8. Closed: {}", employments.is_closed());

    println!("\n=== Example Complete ===\n");
    Ok(())
}
