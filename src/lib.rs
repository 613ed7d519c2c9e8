//! # cache-bridge
//!
//! Provider-neutral async cache access for Rust.
//!
//! Application code talks to a [`CacheManager`]; which backend sits behind it
//! (an in-process map, Redis, Memcached, or a provider of your own) is decided
//! once, when the manager is built.
//!
//! ## Features
//!
//! - **One contract:** every backend implements [`CacheProvider`]
//! - **Priority resolution:** ask for [`ProviderType::Auto`] and get the
//!   highest-priority backend that is registered, enabled and reachable
//! - **Local failover:** a remote primary gets an in-process fallback that
//!   takes over when the primary fails
//! - **Isolation:** every key is stored as `prefix:cacheName:key`, so many
//!   managers can share one backend
//! - **Typed values:** values travel in a versioned postcard envelope that
//!   records their type
//!
//! ## Quick Start
//!
//! ```
//! use cache_bridge::{
//!     config::CacheProperties, CacheManagerFactory, ProviderContext, ProviderRegistry,
//!     ProviderType,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cache_bridge::Result<()> {
//! // 1. Register the providers compiled into this build
//! let registry = Arc::new(ProviderRegistry::with_defaults());
//!
//! // 2. Describe what is configured and which connections exist
//! let context = Arc::new(ProviderContext::new(CacheProperties::default()));
//!
//! // 3. Build managers
//! let factory = CacheManagerFactory::new(registry, context);
//! let users = factory.create_cache_manager("users", ProviderType::Auto, "app", None)?;
//!
//! // 4. Use them
//! users.put("user:1", "Alice").await?;
//! let name: Option<String> = users.get_as("user:1").await?;
//! assert_eq!(name.as_deref(), Some("Alice"));
//!
//! users.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! The in-process provider is always compiled. Enable `redis` and/or
//! `memcached` for the networked providers; they become available once their
//! connection pool is placed in the [`ProviderContext`].

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod factory;
pub mod key;
pub mod manager;
pub mod observability;
pub mod provider;
pub mod registry;
pub mod serialization;

// Re-exports for convenience
pub use config::CacheProperties;
pub use error::{Error, Result};
pub use factory::{CacheManagerFactory, ManagerOptions};
pub use key::KeyNamespace;
pub use manager::CacheManager;
pub use observability::{CacheHealth, CacheStats, HealthStatus};
pub use provider::{CacheProvider, ProviderType};
pub use registry::{ProviderContext, ProviderDescriptor, ProviderRegistry};
pub use serialization::CachedValue;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
