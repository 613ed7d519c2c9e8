//! Cache key namespacing.
//!
//! Every provider stores entries under `"{prefix}:{cache_name}:{key}"`. This is
//! the one format visible to anyone inspecting the raw backend, so it is built
//! in exactly one place.
//!
//! Prefixes and logical keys may contain `:`, so a physical key cannot be
//! split back into its parts. Ownership is decided by the leading
//! `"{prefix}:{cache_name}:"` alone. Cache names are kept free of `:`
//! ([`validate_cache_name`](crate::config::validate_cache_name)), which keeps
//! caches under one prefix apart. Across prefixes, one prefix must not extend
//! another's `"{prefix}:{cache_name}"` on a shared backend: prefix `a` with
//! cache `b` owns every key of prefix `a:b`, and its `clear` and `keys` reach
//! them.

/// Separator between namespace parts.
pub const KEY_SEPARATOR: char = ':';

/// Namespace bound to one provider instance.
///
/// # Example
///
/// ```
/// use cache_bridge::key::KeyNamespace;
///
/// let ns = KeyNamespace::new("app", "sessions");
/// assert_eq!(ns.namespaced("user_1"), "app:sessions:user_1");
/// assert_eq!(ns.strip("app:sessions:user_1"), Some("user_1"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyNamespace {
    prefix: String,
    cache_name: String,
    // "{prefix}:{cache_name}:" precomputed for every operation
    head: String,
}

impl KeyNamespace {
    pub fn new(prefix: impl Into<String>, cache_name: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let cache_name = cache_name.into();
        let head = format!(
            "{}{}{}{}",
            prefix, KEY_SEPARATOR, cache_name, KEY_SEPARATOR
        );
        KeyNamespace {
            prefix,
            cache_name,
            head,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Build the physical key for a logical key.
    pub fn namespaced(&self, key: &str) -> String {
        let mut full = String::with_capacity(self.head.len() + key.len());
        full.push_str(&self.head);
        full.push_str(key);
        full
    }

    /// Recover the logical key from a physical key, if it belongs to this namespace.
    pub fn strip<'a>(&self, physical: &'a str) -> Option<&'a str> {
        physical.strip_prefix(self.head.as_str())
    }

    /// Whether a physical key belongs to this namespace.
    pub fn owns(&self, physical: &str) -> bool {
        physical.starts_with(self.head.as_str())
    }

    /// Glob pattern matching every key in this namespace (Redis `SCAN MATCH`).
    ///
    /// Glob metacharacters in the prefix or cache name are escaped.
    pub fn scan_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.head.len() + 1);
        for c in self.head.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('*');
        pattern
    }
}
