//! Error types for cache access, provider resolution and manager construction.

use crate::provider::ProviderType;
use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache layer.
///
/// Every operation returns `Result<T>`. The variants identify which layer
/// failed: resolution, construction, the manager lifecycle, decoding, or the
/// provider itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A value could not be encoded for storage, or a stored entry could not be
    /// decoded.
    ///
    /// Raised on decode when:
    /// - The magic header is not `b"CKIT"`
    /// - The schema version does not match `CURRENT_SCHEMA_VERSION`
    /// - The postcard payload is truncated or corrupt
    ///
    /// **Recovery:** Evict the entry and write it again.
    SerializationError(String),

    /// The stored value was written as a different type than the one requested.
    TypeMismatch {
        /// Type requested by the caller
        expected: String,
        /// Type tag recorded when the entry was written
        found: String,
    },

    /// Provider storage error (connection lost, protocol error, pool exhausted).
    ///
    /// The manager treats this as a failover trigger.
    BackendError(String),

    /// A provider call exceeded its command timeout.
    ///
    /// The manager treats this as a failover trigger.
    Timeout(String),

    /// Invalid configuration or an invalid composition of providers.
    ConfigError(String),

    /// Operation not supported by this provider.
    NotImplemented(String),

    /// A concrete provider type was requested but is not registered, not
    /// reachable, or administratively disabled.
    ProviderUnavailable(ProviderType),

    /// `AUTO` resolution found no available provider.
    NoProviderAvailable,

    /// Operation attempted on a manager after `close()`.
    ManagerClosed,

    /// A provider instance could not be built while assembling a manager.
    CacheManagerCreation {
        /// Provider type whose factory failed
        provider: ProviderType,
        /// Underlying failure
        reason: String,
    },

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether this error came from the provider itself (connectivity, timeout)
    /// rather than from the data or the caller. Only these errors engage the
    /// fallback provider.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Error::BackendError(_) | Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::ProviderUnavailable(provider) => {
                write!(f, "Cache provider {} is not available", provider)
            }
            Error::NoProviderAvailable => write!(f, "No cache provider available"),
            Error::ManagerClosed => write!(f, "Cache manager is closed"),
            Error::CacheManagerCreation { provider, reason } => {
                write!(
                    f,
                    "Failed to create cache manager: {} provider failed: {}",
                    provider, reason
                )
            }
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            Error::Timeout(format!("Redis error: {}", e))
        } else {
            Error::BackendError(format!("Redis error: {}", e))
        }
    }
}
