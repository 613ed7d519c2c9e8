//! Provider registration and priority-based resolution.
//!
//! The registry is an explicit value: it holds one [`ProviderDescriptor`] per
//! concrete provider type and answers "which provider should serve this
//! request?" against a [`ProviderContext`]. Nothing is discovered implicitly;
//! a provider exists only if its descriptor was registered.
//!
//! Availability is evaluated on every call, so a connection pool added to a
//! later context (or a flag switched off) changes the answer without
//! rebuilding the registry.

use crate::config::CacheProperties;
use crate::error::{Error, Result};
use crate::provider::{CacheProvider, LocalProvider, ProviderType};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type AvailabilityFn = dyn Fn(&ProviderContext) -> bool + Send + Sync;
type ProviderFactoryFn = dyn Fn(&str, &str, Option<Duration>, &ProviderContext) -> Result<Box<dyn CacheProvider>>
    + Send
    + Sync;

/// Configuration and optional dependencies handed to descriptors.
///
/// Handles are stored by type: a Redis provider looks for a
/// `deadpool_redis::Pool`, the local provider for a shared
/// [`LocalStore`](crate::provider::LocalStore). A missing handle makes the
/// provider that needs it unavailable.
///
/// ```
/// use cache_bridge::config::CacheProperties;
/// use cache_bridge::provider::{LocalStore, ProviderType};
/// use cache_bridge::registry::ProviderContext;
///
/// let ctx = ProviderContext::new(CacheProperties::default())
///     .with_handle(LocalStore::new(500))
///     .with_enabled(ProviderType::Grid, false);
///
/// assert!(ctx.handle::<LocalStore>().is_some());
/// assert!(!ctx.is_enabled(ProviderType::Grid));
/// ```
#[derive(Clone, Default)]
pub struct ProviderContext {
    properties: CacheProperties,
    handles: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    overrides: HashMap<ProviderType, bool>,
}

impl ProviderContext {
    pub fn new(properties: CacheProperties) -> Self {
        ProviderContext {
            properties,
            handles: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn properties(&self) -> &CacheProperties {
        &self.properties
    }

    /// Add a dependency handle, replacing any handle of the same type.
    pub fn with_handle<T: Any + Send + Sync>(mut self, handle: T) -> Self {
        self.insert_handle(handle);
        self
    }

    pub fn insert_handle<T: Any + Send + Sync>(&mut self, handle: T) {
        self.handles.insert(TypeId::of::<T>(), Arc::new(handle));
    }

    /// Add a handle that is already shared elsewhere.
    pub fn insert_shared<T: Any + Send + Sync>(&mut self, handle: Arc<T>) {
        self.handles.insert(TypeId::of::<T>(), handle);
    }

    pub fn remove_handle<T: Any + Send + Sync>(&mut self) -> bool {
        self.handles.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn handle<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.handles
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|h| h.downcast::<T>().ok())
    }

    pub fn has_handle<T: Any + Send + Sync>(&self) -> bool {
        self.handles.contains_key(&TypeId::of::<T>())
    }

    /// Switch a provider type on or off regardless of its settings.
    pub fn with_enabled(mut self, provider_type: ProviderType, enabled: bool) -> Self {
        self.overrides.insert(provider_type, enabled);
        self
    }

    /// Whether a provider type is administratively enabled.
    ///
    /// The master `enabled` switch wins over everything. After that an explicit
    /// override wins over the per-provider settings flag. `Standard` has no
    /// settings section and is enabled unless overridden.
    pub fn is_enabled(&self, provider_type: ProviderType) -> bool {
        if !self.properties.enabled || provider_type.is_auto() {
            return false;
        }
        if let Some(&enabled) = self.overrides.get(&provider_type) {
            return enabled;
        }
        match provider_type {
            ProviderType::Local => self.properties.local.enabled,
            ProviderType::Distributed => self.properties.redis.enabled,
            ProviderType::Grid => self.properties.memcached.enabled,
            ProviderType::Standard => true,
            ProviderType::Auto => false,
        }
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("properties", &self.properties)
            .field("handles", &self.handles.len())
            .field("overrides", &self.overrides)
            .finish()
    }
}

/// Describes one provider type: its priority, how to tell whether it can be
/// used right now, and how to build an instance.
///
/// Lower priority values are preferred under `AUTO`.
///
/// ```
/// use cache_bridge::provider::{CacheProvider, LocalProvider, ProviderType};
/// use cache_bridge::registry::{ProviderContext, ProviderDescriptor};
///
/// let descriptor = ProviderDescriptor::new(
///     ProviderType::Standard,
///     30,
///     |_ctx: &ProviderContext| true,
///     |name, prefix, ttl, _ctx: &ProviderContext| {
///         let provider: Box<dyn CacheProvider> = Box::new(LocalProvider::new(name, prefix, ttl));
///         Ok(provider)
///     },
/// );
/// assert_eq!(descriptor.priority(), 30);
/// ```
#[derive(Clone)]
pub struct ProviderDescriptor {
    provider_type: ProviderType,
    priority: i32,
    availability: Arc<AvailabilityFn>,
    factory: Arc<ProviderFactoryFn>,
}

impl ProviderDescriptor {
    pub fn new<A, F>(provider_type: ProviderType, priority: i32, availability: A, factory: F) -> Self
    where
        A: Fn(&ProviderContext) -> bool + Send + Sync + 'static,
        F: Fn(&str, &str, Option<Duration>, &ProviderContext) -> Result<Box<dyn CacheProvider>>
            + Send
            + Sync
            + 'static,
    {
        ProviderDescriptor {
            provider_type,
            priority,
            availability: Arc::new(availability),
            factory: Arc::new(factory),
        }
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether the provider's dependencies are present, ignoring flags.
    pub fn is_reachable(&self, ctx: &ProviderContext) -> bool {
        (self.availability)(ctx)
    }

    /// Whether the provider can serve requests: enabled and reachable.
    pub fn is_available(&self, ctx: &ProviderContext) -> bool {
        ctx.is_enabled(self.provider_type) && self.is_reachable(ctx)
    }

    /// Build a provider instance bound to one cache name and key prefix.
    pub fn create(
        &self,
        cache_name: &str,
        key_prefix: &str,
        default_ttl: Option<Duration>,
        ctx: &ProviderContext,
    ) -> Result<Box<dyn CacheProvider>> {
        (self.factory)(cache_name, key_prefix, default_ttl, ctx)
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("provider_type", &self.provider_type)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Registered provider descriptors, in registration order.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        ProviderRegistry::default()
    }

    /// Registry holding every built-in provider compiled into this crate.
    pub fn with_defaults() -> Self {
        let mut descriptors = Vec::new();
        #[cfg(feature = "redis")]
        descriptors.push(crate::provider::RedisProvider::descriptor());
        #[cfg(feature = "memcached")]
        descriptors.push(crate::provider::MemcachedProvider::descriptor());
        descriptors.push(LocalProvider::descriptor());

        ProviderRegistry { descriptors }
    }

    /// Register a descriptor.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for `AUTO` or for a type that already has
    /// a descriptor.
    pub fn register(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        let provider_type = descriptor.provider_type();
        if provider_type.is_auto() {
            return Err(Error::ConfigError(
                "AUTO is a resolution request and cannot be registered".to_string(),
            ));
        }
        if self.descriptor(provider_type).is_some() {
            return Err(Error::ConfigError(format!(
                "A provider for {} is already registered",
                provider_type
            )));
        }

        info!(
            "✓ Registered cache provider {} (priority: {})",
            provider_type,
            descriptor.priority()
        );
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, descriptor: ProviderDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn descriptor(&self, provider_type: ProviderType) -> Option<&ProviderDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.provider_type() == provider_type)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Registered descriptors in resolution order: ascending priority, ties
    /// kept in registration order.
    pub fn ordered(&self) -> Vec<&ProviderDescriptor> {
        let mut ordered: Vec<&ProviderDescriptor> = self.descriptors.iter().collect();
        // Stable sort keeps registration order among equal priorities
        ordered.sort_by_key(|d| d.priority());
        ordered
    }

    /// Registered provider types in resolution order.
    pub fn provider_types(&self) -> Vec<ProviderType> {
        self.ordered().iter().map(|d| d.provider_type()).collect()
    }

    /// Descriptors that are available right now, in resolution order.
    pub fn available(&self, ctx: &ProviderContext) -> Vec<&ProviderDescriptor> {
        self.ordered()
            .into_iter()
            .filter(|d| d.is_available(ctx))
            .collect()
    }

    /// Whether a provider type is registered, enabled and reachable.
    pub fn is_available(&self, provider_type: ProviderType, ctx: &ProviderContext) -> bool {
        self.descriptor(provider_type)
            .is_some_and(|d| d.is_available(ctx))
    }

    /// Resolve a requested type to the descriptor that will serve it.
    ///
    /// A concrete type resolves to its own descriptor or fails; it is never
    /// swapped for another type. `AUTO` resolves to the available descriptor
    /// with the lowest priority value.
    ///
    /// # Errors
    /// - `Error::ProviderUnavailable` - concrete type not registered, disabled
    ///   or unreachable
    /// - `Error::NoProviderAvailable` - `AUTO` and nothing is available
    pub fn resolve(
        &self,
        requested: ProviderType,
        ctx: &ProviderContext,
    ) -> Result<&ProviderDescriptor> {
        if requested.is_auto() {
            return match self.available(ctx).into_iter().next() {
                Some(descriptor) => {
                    debug!(
                        "✓ AUTO resolved to {} (priority: {})",
                        descriptor.provider_type(),
                        descriptor.priority()
                    );
                    Ok(descriptor)
                }
                None => {
                    warn!(
                        "⚠ AUTO resolution failed: none of {:?} is available",
                        self.provider_types()
                    );
                    Err(Error::NoProviderAvailable)
                }
            };
        }

        match self.descriptor(requested) {
            Some(descriptor) if descriptor.is_available(ctx) => {
                debug!("✓ Resolved requested provider {}", requested);
                Ok(descriptor)
            }
            Some(_) => {
                warn!(
                    "⚠ Requested provider {} is registered but not available",
                    requested
                );
                Err(Error::ProviderUnavailable(requested))
            }
            None => {
                warn!("⚠ Requested provider {} is not registered", requested);
                Err(Error::ProviderUnavailable(requested))
            }
        }
    }
}
