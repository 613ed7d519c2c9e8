//! Point-in-time statistics and health snapshots.
//!
//! Providers produce these on demand. They are plain values: nothing in the
//! crate stores or mutates a snapshot after it is built, and producing one
//! never fails. A provider that cannot reach its backend reports a degraded
//! snapshot instead of an error, so monitoring never becomes a failure source.
//!
//! ```
//! use cache_bridge::observability::{CacheHealth, CacheStats, HealthStatus};
//! use cache_bridge::provider::ProviderType;
//!
//! let stats = CacheStats::empty(ProviderType::Local, "sessions");
//! assert_eq!(stats.hit_rate(), 0.0);
//!
//! let health = CacheHealth::down(ProviderType::Distributed, "sessions", "connection refused");
//! assert_eq!(health.status, HealthStatus::Down);
//! assert!(!health.available);
//! ```

use crate::provider::ProviderType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Cache statistics snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub provider_type: ProviderType,
    pub cache_name: String,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    /// Approximate number of live entries in this cache's namespace.
    pub entry_count: u64,
    pub captured_at: SystemTime,
}

impl CacheStats {
    /// Zero snapshot, used when stats cannot be collected.
    pub fn empty(provider_type: ProviderType, cache_name: impl Into<String>) -> Self {
        CacheStats {
            provider_type,
            cache_name: cache_name.into(),
            hits: 0,
            misses: 0,
            puts: 0,
            evictions: 0,
            entry_count: 0,
            captured_at: SystemTime::now(),
        }
    }

    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of reads that hit, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            0.0
        } else {
            self.hits as f64 / requests as f64
        }
    }
}

/// Coarse health state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Backend reachable.
    Up,
    /// Primary unreachable, serving from a fallback.
    Degraded,
    /// Not serving.
    Down,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Up => write!(f, "UP"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Cache health snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheHealth {
    pub provider_type: ProviderType,
    pub cache_name: String,
    pub status: HealthStatus,
    /// Whether operations are currently being served.
    pub available: bool,
    /// Round-trip time of the probe, when one was made.
    pub response_time: Option<Duration>,
    pub message: Option<String>,
    pub checked_at: SystemTime,
}

impl CacheHealth {
    pub fn up(
        provider_type: ProviderType,
        cache_name: impl Into<String>,
        response_time: Option<Duration>,
    ) -> Self {
        CacheHealth {
            provider_type,
            cache_name: cache_name.into(),
            status: HealthStatus::Up,
            available: true,
            response_time,
            message: None,
            checked_at: SystemTime::now(),
        }
    }

    pub fn down(
        provider_type: ProviderType,
        cache_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheHealth {
            provider_type,
            cache_name: cache_name.into(),
            status: HealthStatus::Down,
            available: false,
            response_time: None,
            message: Some(message.into()),
            checked_at: SystemTime::now(),
        }
    }

    /// Mark a failed primary as still serving through its fallback.
    pub fn degraded(mut self, message: impl Into<String>) -> Self {
        self.status = HealthStatus::Degraded;
        self.available = true;
        self.message = Some(message.into());
        self
    }

    /// Status as the upper-case string exposed to health endpoints.
    pub fn status_str(&self) -> String {
        self.status.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::empty(ProviderType::Local, "c");
        stats.hits = 3;
        stats.misses = 1;
        assert_eq!(stats.requests(), 4);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_stats() {
        let stats = CacheStats::empty(ProviderType::Grid, "c");
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.provider_type, ProviderType::Grid);
    }

    #[test]
    fn test_degraded_health_is_available() {
        let health = CacheHealth::down(ProviderType::Distributed, "c", "refused")
            .degraded("serving from LOCAL fallback");
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.available);
        assert_eq!(health.status_str(), "DEGRADED");
    }

    #[test]
    fn test_health_status_serializes_upper_case() {
        let json = serde_json::to_string(&HealthStatus::Up).unwrap();
        assert_eq!(json, "\"UP\"");
    }
}
