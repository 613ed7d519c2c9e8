//! Builds independent [`CacheManager`] instances from shared infrastructure.
//!
//! The factory holds the registry and the provider context and nothing else.
//! Every call resolves providers afresh and builds new provider instances, so
//! two managers never share a provider. The caller owns each manager it gets
//! back, including closing it.
//!
//! # Example
//!
//! ```
//! use cache_bridge::config::CacheProperties;
//! use cache_bridge::factory::CacheManagerFactory;
//! use cache_bridge::provider::ProviderType;
//! use cache_bridge::registry::{ProviderContext, ProviderRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> cache_bridge::Result<()> {
//! let factory = CacheManagerFactory::new(
//!     Arc::new(ProviderRegistry::with_defaults()),
//!     Arc::new(ProviderContext::new(CacheProperties::default())),
//! );
//!
//! let sessions = factory.create_cache_manager(
//!     "sessions",
//!     ProviderType::Auto,
//!     "app",
//!     Some(Duration::from_secs(900)),
//! )?;
//! assert_eq!(sessions.cache_name(), "sessions");
//! # Ok(())
//! # }
//! ```

use crate::config::validate_cache_name;
use crate::error::{Error, Result};
use crate::manager::CacheManager;
use crate::provider::{CacheProvider, ProviderType};
use crate::registry::{ProviderContext, ProviderDescriptor, ProviderRegistry};
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

/// Everything needed to build one manager.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerOptions {
    pub cache_name: String,
    /// Requested type; `Auto` picks by priority.
    pub provider_type: ProviderType,
    /// Falls back to `properties.key_prefix` when unset.
    pub key_prefix: Option<String>,
    /// Falls back to the resolved provider's configured TTL when unset.
    pub default_ttl: Option<Duration>,
    /// Free text shown in the creation log.
    pub description: Option<String>,
    /// Who asked for the manager; the caller's source location when unset.
    pub requested_by: Option<String>,
}

impl ManagerOptions {
    pub fn new(cache_name: impl Into<String>) -> Self {
        ManagerOptions {
            cache_name: cache_name.into(),
            provider_type: ProviderType::Auto,
            key_prefix: None,
            default_ttl: None,
            description: None,
            requested_by: None,
        }
    }

    pub fn provider_type(mut self, provider_type: ProviderType) -> Self {
        self.provider_type = provider_type;
        self
    }

    pub fn key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(key_prefix.into());
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn requested_by(mut self, requested_by: impl Into<String>) -> Self {
        self.requested_by = Some(requested_by.into());
        self
    }
}

/// Creates cache managers.
///
/// Cloning is cheap; clones share the registry and context.
#[derive(Clone, Debug)]
pub struct CacheManagerFactory {
    registry: Arc<ProviderRegistry>,
    context: Arc<ProviderContext>,
}

impl CacheManagerFactory {
    pub fn new(registry: Arc<ProviderRegistry>, context: Arc<ProviderContext>) -> Self {
        CacheManagerFactory { registry, context }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Same factory over another context, e.g. once a connection pool exists.
    pub fn with_context(&self, context: Arc<ProviderContext>) -> Self {
        CacheManagerFactory {
            registry: Arc::clone(&self.registry),
            context,
        }
    }

    /// Build a manager for `cache_name`.
    ///
    /// A non-local primary gets a local fallback when one is available and
    /// `fallback_enabled` is set. A local primary never has a fallback.
    ///
    /// # Errors
    /// - `Error::ConfigError` - blank or over-long cache name
    /// - `Error::ProviderUnavailable` / `Error::NoProviderAvailable` - resolution failed
    /// - `Error::CacheManagerCreation` - a provider could not be built
    #[track_caller]
    pub fn create_cache_manager(
        &self,
        cache_name: &str,
        provider_type: ProviderType,
        key_prefix: &str,
        default_ttl: Option<Duration>,
    ) -> Result<CacheManager> {
        let mut options = ManagerOptions::new(cache_name)
            .provider_type(provider_type)
            .key_prefix(key_prefix);
        options.default_ttl = default_ttl;
        self.create_cache_manager_with(options)
    }

    /// Build a manager with the configured default type and key prefix.
    #[track_caller]
    pub fn create_default_cache_manager(&self, cache_name: &str) -> Result<CacheManager> {
        let options = ManagerOptions::new(cache_name)
            .provider_type(self.context.properties().default_cache_type);
        self.create_cache_manager_with(options)
    }

    /// Build a manager from full options.
    #[track_caller]
    pub fn create_cache_manager_with(&self, options: ManagerOptions) -> Result<CacheManager> {
        let requested_by = match &options.requested_by {
            Some(who) => who.clone(),
            None => caller_location(Location::caller()),
        };

        validate_cache_name(&options.cache_name)?;

        let properties = self.context.properties();
        let key_prefix = options
            .key_prefix
            .clone()
            .unwrap_or_else(|| properties.key_prefix.clone());

        info!(
            "» Creating cache manager '{}' (requested: {}, prefix: {}, by: {})",
            options.cache_name, options.provider_type, key_prefix, requested_by
        );
        if let Some(description) = &options.description {
            info!("  description: {}", description);
        }

        let primary = self.registry.resolve(options.provider_type, &self.context)?;
        let primary_type = primary.provider_type();
        let fallback = self.resolve_fallback(primary_type);

        let primary_ttl = options
            .default_ttl
            .or_else(|| properties.default_ttl_for(primary_type));
        let primary_provider = build(primary, &options.cache_name, &key_prefix, primary_ttl, &self.context)?;

        let fallback_provider = match fallback {
            Some(descriptor) => {
                let ttl = options
                    .default_ttl
                    .or_else(|| properties.default_ttl_for(descriptor.provider_type()));
                Some(build(descriptor, &options.cache_name, &key_prefix, ttl, &self.context)?)
            }
            None => None,
        };

        let manager = CacheManager::new(primary_provider, fallback_provider)?;

        match manager.fallback_type() {
            Some(fb) => info!(
                "✓ Cache manager '{}' ready: {} primary, {} fallback",
                options.cache_name, primary_type, fb
            ),
            None => info!(
                "✓ Cache manager '{}' ready: {} (no fallback)",
                options.cache_name, primary_type
            ),
        }

        Ok(manager)
    }

    /// Whether managers built now would get a local fallback.
    pub fn fallback_enabled(&self) -> bool {
        self.context.properties().fallback_enabled
            && self.registry.is_available(ProviderType::Local, &self.context)
    }

    fn resolve_fallback(&self, primary_type: ProviderType) -> Option<&ProviderDescriptor> {
        if primary_type.is_local() {
            return None;
        }
        if !self.context.properties().fallback_enabled {
            debug!("Local fallback disabled by configuration");
            return None;
        }

        match self.registry.resolve(ProviderType::Local, &self.context) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(
                    "⚠ No local fallback for {} primary: {}",
                    primary_type, e
                );
                None
            }
        }
    }
}

fn build(
    descriptor: &ProviderDescriptor,
    cache_name: &str,
    key_prefix: &str,
    default_ttl: Option<Duration>,
    ctx: &ProviderContext,
) -> Result<Box<dyn CacheProvider>> {
    let provider_type = descriptor.provider_type();
    descriptor
        .create(cache_name, key_prefix, default_ttl, ctx)
        .map_err(|e| {
            error!(
                "Failed to build {} provider for '{}': {}",
                provider_type, cache_name, e
            );
            Error::CacheManagerCreation {
                provider: provider_type,
                reason: e.to_string(),
            }
        })
}

fn caller_location(location: &Location<'_>) -> String {
    format!("{}:{}", location.file(), location.line())
}
