//! Primary/fallback cache manager.
//!
//! A [`CacheManager`] owns one primary provider and at most one fallback. Every
//! operation runs on the primary; only when the primary fails with a provider
//! error (see [`Error::is_provider_failure`]) is the identical operation retried
//! on the fallback. A miss is a successful result and never reaches the
//! fallback. Writes are not mirrored: after an outage the fallback may hold
//! entries the primary never saw, and nothing reconciles them.
//!
//! The manager is `OPEN` from construction until [`close`](CacheManager::close),
//! after which every operation fails with [`Error::ManagerClosed`].
//!
//! # Example
//!
//! ```
//! use cache_bridge::manager::CacheManager;
//! use cache_bridge::provider::LocalProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cache_bridge::Result<()> {
//! let manager = CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None)?;
//!
//! manager.put("user:1", &"Alice".to_string()).await?;
//! let name: Option<String> = manager.get_as("user:1").await?;
//! assert_eq!(name.as_deref(), Some("Alice"));
//!
//! manager.close().await;
//! assert!(manager.get("user:1").await.is_err());
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::observability::{CacheHealth, CacheStats};
use crate::provider::{CacheProvider, ProviderType};
use crate::serialization::{self, CachedValue};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Cache access point composing a primary provider with an optional fallback.
///
/// The typed methods (`get`, `get_as`, `put`, ...) encode values through the
/// [`serialization`] envelope. The manager also implements [`CacheProvider`]
/// over raw bytes; since inherent methods take precedence, call the raw form
/// as `CacheProvider::put(&manager, ...)`.
pub struct CacheManager {
    primary: Box<dyn CacheProvider>,
    fallback: Option<Box<dyn CacheProvider>>,
    closed: AtomicBool,
    failovers: AtomicU64,
}

impl CacheManager {
    /// Compose a manager.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when the fallback has the same provider
    /// type as the primary.
    pub fn new(
        primary: Box<dyn CacheProvider>,
        fallback: Option<Box<dyn CacheProvider>>,
    ) -> Result<Self> {
        if let Some(fb) = &fallback {
            if fb.provider_type() == primary.provider_type() {
                return Err(Error::ConfigError(format!(
                    "Fallback provider must differ from primary (both {})",
                    primary.provider_type()
                )));
            }
        }

        Ok(CacheManager {
            primary,
            fallback,
            closed: AtomicBool::new(false),
            failovers: AtomicU64::new(0),
        })
    }

    pub fn cache_name(&self) -> &str {
        self.primary.cache_name()
    }

    /// Type of the primary provider.
    pub fn cache_type(&self) -> ProviderType {
        self.primary.provider_type()
    }

    pub fn fallback_type(&self) -> Option<ProviderType> {
        self.fallback.as_ref().map(|fb| fb.provider_type())
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn key_prefix(&self) -> &str {
        self.primary.key_prefix()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of operations served by the fallback after a primary failure.
    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ManagerClosed);
        }
        Ok(())
    }

    /// Run `call` on the primary, and on the fallback if the primary fails
    /// with a provider error.
    async fn delegate<'a, T, F>(&'a self, op: &'static str, call: F) -> Result<T>
    where
        F: Fn(&'a dyn CacheProvider) -> BoxFuture<'a, Result<T>>,
    {
        self.ensure_open()?;

        let primary_err = match call(self.primary.as_ref()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let fallback = match &self.fallback {
            Some(fb) if primary_err.is_provider_failure() => fb,
            _ => return Err(primary_err),
        };

        let failovers = self.failovers.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "⚠ Cache '{}' {} failed on {}: {} - retrying on {} fallback (failovers: {})",
            self.cache_name(),
            op,
            self.primary.provider_type(),
            primary_err,
            fallback.provider_type(),
            failovers
        );

        match call(fallback.as_ref()).await {
            Ok(value) => Ok(value),
            Err(fallback_err) => {
                warn!(
                    "⚠ Cache '{}' {} also failed on {} fallback: {}",
                    self.cache_name(),
                    op,
                    fallback.provider_type(),
                    fallback_err
                );
                Err(primary_err)
            }
        }
    }

    /// Read raw bytes, with failover.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.delegate("GET", |p| p.get(key)).await
    }

    /// Write raw bytes, with failover.
    pub async fn put_bytes(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.delegate("PUT", |p| p.put(key, value.clone(), ttl))
            .await
    }

    async fn put_if_absent_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.delegate("PUT_IF_ABSENT", |p| p.put_if_absent(key, value.clone(), ttl))
            .await
    }

    /// Read and validate a stored value without fixing its type.
    ///
    /// # Errors
    /// `Error::SerializationError` if the stored bytes are not a valid envelope.
    pub async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(serialization::decode_envelope(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a stored value as `T`.
    ///
    /// # Errors
    /// - `Error::TypeMismatch` if the value was written as another type
    /// - `Error::SerializationError` if the stored bytes cannot be decoded
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(value.decode()?)),
            None => Ok(None),
        }
    }

    /// Store a value with the provider's default TTL.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serialization::encode(value)?;
        self.put_bytes(key, bytes, None).await
    }

    /// Store a value with an explicit TTL. A zero TTL uses the default.
    pub async fn put_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let bytes = serialization::encode(value)?;
        self.put_bytes(key, bytes, Some(ttl)).await
    }

    /// Store a value only if the key is absent. Returns whether it was stored.
    ///
    /// Atomic within the provider that serves the call. If the primary fails
    /// and the fallback serves it, the fallback alone decides.
    pub async fn put_if_absent<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        let bytes = serialization::encode(value)?;
        self.put_if_absent_bytes(key, bytes, None).await
    }

    pub async fn put_if_absent_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool> {
        let bytes = serialization::encode(value)?;
        self.put_if_absent_bytes(key, bytes, Some(ttl)).await
    }

    /// Return the cached `T`, or run `loader`, cache its result with the
    /// default TTL and return it.
    ///
    /// Not atomic across callers: concurrent misses each run the loader and
    /// the last write wins. Loader errors are returned and nothing is cached.
    pub async fn get_or_insert_with<T, F, Fut>(&self, key: &str, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get_as::<T>(key).await? {
            return Ok(cached);
        }

        debug!("Cache '{}' miss for {}, loading", self.cache_name(), key);
        let value = loader().await?;
        self.put(key, &value).await?;
        Ok(value)
    }

    /// Remove a key. Returns whether a live entry was present.
    pub async fn evict(&self, key: &str) -> Result<bool> {
        self.delegate("EVICT", |p| p.evict(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.delegate("EXISTS", |p| p.exists(key)).await
    }

    /// Remove every entry under this manager's namespace.
    pub async fn clear(&self) -> Result<()> {
        self.delegate("CLEAR", |p| p.clear()).await
    }

    /// Logical keys under this manager's namespace (best-effort).
    pub async fn keys(&self) -> Result<HashSet<String>> {
        self.delegate("KEYS", |p| p.keys()).await
    }

    /// Approximate entry count under this manager's namespace.
    pub async fn size(&self) -> Result<u64> {
        self.delegate("SIZE", |p| p.size()).await
    }

    /// Statistics of the primary provider. Empty once closed.
    pub async fn stats(&self) -> CacheStats {
        if self.is_closed() {
            return CacheStats::empty(self.cache_type(), self.cache_name());
        }
        self.primary.stats().await
    }

    /// Health of the primary provider.
    ///
    /// `Degraded` when the primary is down but the fallback is serving;
    /// `Down` once closed.
    pub async fn health(&self) -> CacheHealth {
        if self.is_closed() {
            return CacheHealth::down(self.cache_type(), self.cache_name(), "cache manager closed");
        }

        let health = self.primary.health().await;
        if health.available {
            return health;
        }

        match &self.fallback {
            Some(fb) => {
                let fallback_health = fb.health().await;
                if fallback_health.available {
                    let reason = health.message.clone().unwrap_or_default();
                    health.degraded(format!(
                        "primary {} unavailable ({}), serving from {} fallback",
                        self.cache_type(),
                        reason,
                        fb.provider_type()
                    ))
                } else {
                    health
                }
            }
            None => health,
        }
    }

    /// Close primary, then fallback, and move to `CLOSED`.
    ///
    /// Close errors are logged, never returned. Only the first call closes the
    /// providers; later calls do nothing.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Cache manager '{}' already closed", self.cache_name());
            return;
        }

        info!("Closing cache manager '{}'", self.cache_name());

        if let Err(e) = self.primary.close().await {
            warn!(
                "⚠ Closing {} primary of '{}' failed: {}",
                self.primary.provider_type(),
                self.cache_name(),
                e
            );
        }
        if let Some(fb) = &self.fallback {
            if let Err(e) = fb.close().await {
                warn!(
                    "⚠ Closing {} fallback of '{}' failed: {}",
                    fb.provider_type(),
                    self.cache_name(),
                    e
                );
            }
        }

        info!("✓ Cache manager '{}' closed", self.cache_name());
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("cache_name", &self.cache_name())
            .field("key_prefix", &self.key_prefix())
            .field("primary", &self.cache_type())
            .field("fallback", &self.fallback_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl CacheProvider for CacheManager {
    fn cache_name(&self) -> &str {
        CacheManager::cache_name(self)
    }

    fn provider_type(&self) -> ProviderType {
        self.cache_type()
    }

    fn key_prefix(&self) -> &str {
        CacheManager::key_prefix(self)
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.primary.default_ttl()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_bytes(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.put_bytes(key, value, ttl).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.put_if_absent_bytes(key, value, ttl).await
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        CacheManager::evict(self, key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        CacheManager::exists(self, key).await
    }

    async fn clear(&self) -> Result<()> {
        CacheManager::clear(self).await
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        CacheManager::keys(self).await
    }

    async fn size(&self) -> Result<u64> {
        CacheManager::size(self).await
    }

    async fn stats(&self) -> CacheStats {
        CacheManager::stats(self).await
    }

    async fn health(&self) -> CacheHealth {
        CacheManager::health(self).await
    }

    async fn close(&self) -> Result<()> {
        CacheManager::close(self).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::HealthStatus;
    use crate::provider::{LocalProvider, LocalStore};
    use serde::Deserialize;
    use std::sync::Arc;

    /// Provider that fails every call while `failing` is set.
    struct FlakyProvider {
        inner: LocalProvider,
        provider_type: ProviderType,
        failing: AtomicBool,
        calls: AtomicU64,
        closes: AtomicU64,
        error: Error,
    }

    impl FlakyProvider {
        fn new(provider_type: ProviderType, error: Error) -> Self {
            FlakyProvider {
                inner: LocalProvider::new("users", "app", None),
                provider_type,
                failing: AtomicBool::new(false),
                calls: AtomicU64::new(0),
                closes: AtomicU64::new(0),
                error,
            }
        }

        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(self.error.clone());
            }
            Ok(())
        }
    }

    /// Shares a FlakyProvider between the manager and the test body.
    struct Shared(Arc<FlakyProvider>);

    #[async_trait]
    impl CacheProvider for Shared {
        fn cache_name(&self) -> &str {
            self.0.inner.cache_name()
        }
        fn provider_type(&self) -> ProviderType {
            self.0.provider_type
        }
        fn key_prefix(&self) -> &str {
            self.0.inner.key_prefix()
        }
        fn default_ttl(&self) -> Option<Duration> {
            None
        }
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.check()?;
            self.0.inner.get(key).await
        }
        async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            self.0.check()?;
            self.0.inner.put(key, value, ttl).await
        }
        async fn put_if_absent(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> Result<bool> {
            self.0.check()?;
            self.0.inner.put_if_absent(key, value, ttl).await
        }
        async fn evict(&self, key: &str) -> Result<bool> {
            self.0.check()?;
            self.0.inner.evict(key).await
        }
        async fn clear(&self) -> Result<()> {
            self.0.check()?;
            self.0.inner.clear().await
        }
        async fn keys(&self) -> Result<HashSet<String>> {
            self.0.check()?;
            self.0.inner.keys().await
        }
        async fn stats(&self) -> CacheStats {
            self.0.inner.stats().await
        }
        async fn health(&self) -> CacheHealth {
            if self.0.failing.load(Ordering::SeqCst) {
                CacheHealth::down(self.0.provider_type, self.cache_name(), "scripted outage")
            } else {
                self.0.inner.health().await
            }
        }
        async fn close(&self) -> Result<()> {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            Err(Error::BackendError("close failed".to_string()))
        }
    }

    fn flaky(provider_type: ProviderType) -> Arc<FlakyProvider> {
        Arc::new(FlakyProvider::new(
            provider_type,
            Error::BackendError("connection refused".to_string()),
        ))
    }

    fn manager_with(primary: &Arc<FlakyProvider>, fallback: Option<&Arc<FlakyProvider>>) -> CacheManager {
        CacheManager::new(
            Box::new(Shared(Arc::clone(primary))),
            fallback.map(|f| Box::new(Shared(Arc::clone(f))) as Box<dyn CacheProvider>),
        )
        .unwrap()
    }

    /// Bumps its counter when dropped.
    struct DropFlag(Arc<AtomicU64>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Provider whose `get` either fails at once or never completes.
    struct Hanging {
        provider_type: ProviderType,
        failing: bool,
        started: Arc<AtomicU64>,
        dropped: Arc<AtomicU64>,
        closes: Arc<AtomicU64>,
    }

    impl Hanging {
        fn new(provider_type: ProviderType, failing: bool) -> Self {
            Hanging {
                provider_type,
                failing,
                started: Arc::new(AtomicU64::new(0)),
                dropped: Arc::new(AtomicU64::new(0)),
                closes: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    #[async_trait]
    impl CacheProvider for Hanging {
        fn cache_name(&self) -> &str {
            "users"
        }
        fn provider_type(&self) -> ProviderType {
            self.provider_type
        }
        fn key_prefix(&self) -> &str {
            "app"
        }
        fn default_ttl(&self) -> Option<Duration> {
            None
        }
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            if self.failing {
                return Err(Error::BackendError("connection refused".to_string()));
            }
            let _flag = DropFlag(Arc::clone(&self.dropped));
            self.started.fetch_add(1, Ordering::SeqCst);
            futures::future::pending::<()>().await;
            Ok(None)
        }
        async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            Ok(())
        }
        async fn put_if_absent(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> Result<bool> {
            Ok(true)
        }
        async fn evict(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
        async fn keys(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }
        async fn stats(&self) -> CacheStats {
            CacheStats::empty(self.provider_type, "users")
        }
        async fn health(&self) -> CacheHealth {
            CacheHealth::up(self.provider_type, "users", None)
        }
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    struct User {
        id: u64,
        name: String,
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();
        let user = User {
            id: 1,
            name: "Alice".to_string(),
        };

        manager.put("u1", &user).await.unwrap();

        let value = manager.get("u1").await.unwrap().unwrap();
        assert!(value.is::<User>());
        assert_eq!(manager.get_as::<User>("u1").await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_type_mismatch_surfaces() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();
        manager.put("n", &42u32).await.unwrap();

        let err = manager.get_as::<String>("n").await.unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_bytes_are_serialization_errors() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();
        CacheProvider::put(&manager, "raw", b"not an envelope".to_vec(), None)
            .await
            .unwrap();

        let err = manager.get("raw").await.unwrap_err();
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_miss_does_not_consult_fallback() {
        let primary = flaky(ProviderType::Distributed);
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));

        assert_eq!(manager.get("absent").await.unwrap(), None);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.failover_count(), 0);
    }

    #[tokio::test]
    async fn test_primary_failure_served_by_fallback() {
        let primary = flaky(ProviderType::Distributed);
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));

        fallback.inner.put("k", serialization::encode("from fallback").unwrap(), None)
            .await
            .unwrap();
        primary.failing.store(true, Ordering::SeqCst);

        let value: Option<String> = manager.get_as("k").await.unwrap();
        assert_eq!(value.as_deref(), Some("from fallback"));
        assert_eq!(manager.failover_count(), 1);
    }

    #[tokio::test]
    async fn test_recovered_primary_serves_again() {
        let primary = flaky(ProviderType::Distributed);
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));

        primary.failing.store(true, Ordering::SeqCst);
        manager.put("k", "written during outage").await.unwrap();
        assert!(fallback.inner.exists("k").await.unwrap());
        assert!(!primary.inner.exists("k").await.unwrap());

        primary.failing.store(false, Ordering::SeqCst);
        let fallback_calls = fallback.calls.load(Ordering::SeqCst);

        // The primary never saw the write; the miss is its answer
        assert_eq!(manager.get("k").await.unwrap(), None);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), fallback_calls);
    }

    #[tokio::test]
    async fn test_writes_are_not_mirrored() {
        let primary = flaky(ProviderType::Distributed);
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));

        manager.put("k", &1u8).await.unwrap();
        assert!(manager.evict("k").await.unwrap());
        manager.clear().await.unwrap();

        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_fallback_propagates_error() {
        let primary = flaky(ProviderType::Distributed);
        let manager = manager_with(&primary, None);
        primary.failing.store(true, Ordering::SeqCst);

        let err = manager.get("k").await.unwrap_err();
        assert_eq!(err, Error::BackendError("connection refused".to_string()));
    }

    #[tokio::test]
    async fn test_both_failing_returns_primary_error() {
        let primary = Arc::new(FlakyProvider::new(
            ProviderType::Distributed,
            Error::Timeout("primary slow".to_string()),
        ));
        let fallback = Arc::new(FlakyProvider::new(
            ProviderType::Local,
            Error::BackendError("fallback broken".to_string()),
        ));
        let manager = manager_with(&primary, Some(&fallback));
        primary.failing.store(true, Ordering::SeqCst);
        fallback.failing.store(true, Ordering::SeqCst);

        let err = manager.exists("k").await.unwrap_err();
        assert_eq!(err, Error::Timeout("primary slow".to_string()));
    }

    #[tokio::test]
    async fn test_non_provider_errors_do_not_fail_over() {
        let primary = Arc::new(FlakyProvider::new(
            ProviderType::Distributed,
            Error::NotImplemented("keys".to_string()),
        ));
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));
        primary.failing.store(true, Ordering::SeqCst);

        assert!(matches!(
            manager.keys().await,
            Err(Error::NotImplemented(_))
        ));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_put_if_absent_semantics() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();

        assert!(manager.put_if_absent("k", "v1").await.unwrap());
        assert!(!manager.put_if_absent("k", "v2").await.unwrap());
        assert_eq!(
            manager.get_as::<String>("k").await.unwrap().as_deref(),
            Some("v1")
        );
    }

    #[tokio::test]
    async fn test_put_with_zero_ttl_uses_default() {
        let provider = LocalProvider::new("users", "app", Some(Duration::from_secs(60)));
        let manager = CacheManager::new(Box::new(provider), None).unwrap();

        manager
            .put_with_ttl("k", "v", Duration::ZERO)
            .await
            .unwrap();
        assert!(manager.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_insert_with_loads_once() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();
        let loads = AtomicU64::new(0);

        for _ in 0..3 {
            let user: User = manager
                .get_or_insert_with("u7", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(User {
                        id: 7,
                        name: "Grace".to_string(),
                    })
                })
                .await
                .unwrap();
            assert_eq!(user.id, 7);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_insert_with_loader_error_caches_nothing() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();

        let result: Result<User> = manager
            .get_or_insert_with("u8", || async { Err(Error::Other("db down".to_string())) })
            .await;

        assert!(result.is_err());
        assert!(!manager.exists("u8").await.unwrap());
    }

    #[tokio::test]
    async fn test_same_type_fallback_rejected() {
        let err = CacheManager::new(
            Box::new(LocalProvider::new("c", "a", None)),
            Some(Box::new(LocalProvider::new("c", "b", None))),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_close_twice_and_operations_after_close() {
        let primary = flaky(ProviderType::Distributed);
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));

        manager.close().await;
        manager.close().await;

        assert!(manager.is_closed());
        assert_eq!(primary.closes.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.closes.load(Ordering::SeqCst), 1);

        assert_eq!(manager.get("k").await.unwrap_err(), Error::ManagerClosed);
        assert_eq!(manager.put("k", &1u8).await.unwrap_err(), Error::ManagerClosed);
        assert_eq!(manager.evict("k").await.unwrap_err(), Error::ManagerClosed);
        assert_eq!(manager.clear().await.unwrap_err(), Error::ManagerClosed);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stats_and_health_after_close() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();
        manager.put("k", &1u8).await.unwrap();
        manager.close().await;

        let stats = manager.stats().await;
        assert_eq!(stats.puts, 0);
        assert_eq!(stats.entry_count, 0);

        let health = manager.health().await;
        assert_eq!(health.status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_health_degraded_when_fallback_serves() {
        let primary = flaky(ProviderType::Distributed);
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));

        assert_eq!(manager.health().await.status, HealthStatus::Up);

        primary.failing.store(true, Ordering::SeqCst);
        let health = manager.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.available);
        assert_eq!(health.provider_type, ProviderType::Distributed);

        fallback.failing.store(true, Ordering::SeqCst);
        assert_eq!(manager.health().await.status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_accessors() {
        let primary = flaky(ProviderType::Grid);
        let fallback = flaky(ProviderType::Local);
        let manager = manager_with(&primary, Some(&fallback));

        assert_eq!(manager.cache_name(), "users");
        assert_eq!(manager.cache_type(), ProviderType::Grid);
        assert_eq!(manager.fallback_type(), Some(ProviderType::Local));
        assert!(manager.has_fallback());
        assert!(!manager.is_closed());
    }

    #[tokio::test]
    async fn test_prefixes_isolate_managers_on_shared_store() {
        let store = Arc::new(LocalStore::new(100));
        let a = CacheManager::new(
            Box::new(LocalProvider::with_store("users", "a", None, Arc::clone(&store))),
            None,
        )
        .unwrap();
        let b = CacheManager::new(
            Box::new(LocalProvider::with_store("users", "b", None, Arc::clone(&store))),
            None,
        )
        .unwrap();

        a.put("k", "from a").await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), None);

        b.put("k", "from b").await.unwrap();
        assert_eq!(a.get_as::<String>("k").await.unwrap().as_deref(), Some("from a"));
        assert_eq!(b.get_as::<String>("k").await.unwrap().as_deref(), Some("from b"));
    }

    #[tokio::test]
    async fn test_manager_usable_as_provider() {
        let manager =
            CacheManager::new(Box::new(LocalProvider::new("users", "app", None)), None).unwrap();
        let provider: &dyn CacheProvider = &manager;

        provider.put("k", vec![1, 2, 3], None).await.unwrap();
        assert_eq!(provider.get("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(provider.provider_type(), ProviderType::Local);
        assert_eq!(provider.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropping_get_cancels_hung_primary() {
        let primary = Hanging::new(ProviderType::Distributed, false);
        let (started, dropped) = (Arc::clone(&primary.started), Arc::clone(&primary.dropped));
        let manager = CacheManager::new(
            Box::new(primary),
            Some(Box::new(Hanging::new(ProviderType::Local, true))),
        )
        .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), manager.get("k")).await;

        assert!(result.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(manager.failover_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_get_cancels_started_fallback() {
        let fallback = Hanging::new(ProviderType::Local, false);
        let (started, dropped) = (Arc::clone(&fallback.started), Arc::clone(&fallback.dropped));
        let manager = CacheManager::new(
            Box::new(Hanging::new(ProviderType::Distributed, true)),
            Some(Box::new(fallback)),
        )
        .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), manager.get("k")).await;

        assert!(result.is_err());
        assert_eq!(manager.failover_count(), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_closes_providers_once() {
        for _ in 0..20 {
            let primary = Hanging::new(ProviderType::Distributed, false);
            let fallback = Hanging::new(ProviderType::Local, false);
            let (primary_closes, fallback_closes) =
                (Arc::clone(&primary.closes), Arc::clone(&fallback.closes));
            let manager = Arc::new(
                CacheManager::new(Box::new(primary), Some(Box::new(fallback))).unwrap(),
            );
            let barrier = Arc::new(tokio::sync::Barrier::new(4));

            let mut handles = Vec::new();
            for _ in 0..4 {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                handles.push(tokio::spawn(async move {
                    barrier.wait().await;
                    manager.close().await;
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert!(manager.is_closed());
            assert_eq!(primary_closes.load(Ordering::SeqCst), 1);
            assert_eq!(fallback_closes.load(Ordering::SeqCst), 1);
        }
    }
}
