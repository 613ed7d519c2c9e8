//! Postcard-based value encoding with versioned, type-tagged envelopes.
//!
//! Providers only ever see bytes. The manager encodes every value with
//! [`encode`] before handing it to a provider and decodes what comes back with
//! [`decode_envelope`], so every provider stores the identical format.
//!
//! # Format
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (varint)│ TYPE TAG (string)│ POSTCARD PAYLOAD (bytes) │
//! └─────────────────┴─────────────────┴──────────────────┴──────────────────────────┘
//!   "CKIT"             u32                type_tag::<T>()    postcard::to_allocvec(T)
//! ```
//!
//! The type tag lets an untyped read succeed (the envelope is self-describing
//! enough to validate) while a typed read can detect that the caller asked for
//! a different type than was written.
//!
//! # Example
//!
//! ```rust
//! use cache_bridge::serialization::{encode, decode_envelope};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Session {
//!     user_id: u64,
//!     token: String,
//! }
//!
//! # fn main() -> cache_bridge::Result<()> {
//! let session = Session { user_id: 1, token: "abc".to_string() };
//! let bytes = encode(&session)?;
//!
//! let value = decode_envelope(&bytes)?;
//! assert!(value.is::<Session>());
//! let decoded: Session = value.decode()?;
//! assert_eq!(session, decoded);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header for cache entries: b"CKIT"
pub const CACHE_MAGIC: [u8; 4] = *b"CKIT";

/// Current envelope schema version.
///
/// Increment when the envelope layout or the encoding of cached types changes
/// incompatibly. Entries written under another version fail to decode and must
/// be rewritten.
///
/// The version does not cover type tags. Tags come from
/// [`std::any::type_name`], whose output is only stable within one compiler
/// version. Services built with different rustc releases that share a
/// networked backend can see a false `TypeMismatch`; pin the toolchain, or read
/// such entries through [`CachedValue::payload`], which skips the tag check.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Type tag recorded for values of type `T`.
///
/// Leading references are dropped and `str` is tagged as `String`, so a value
/// written from `&str` can be read back as `String`. See
/// [`CURRENT_SCHEMA_VERSION`] for the stability of tags across compilers.
pub fn type_tag<T: ?Sized>() -> &'static str {
    let name = std::any::type_name::<T>().trim_start_matches('&');
    match name {
        "str" => std::any::type_name::<String>(),
        other => other,
    }
}

/// Versioned envelope wrapped around every stored value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope {
    /// Magic header: must be b"CKIT"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// Type the payload was encoded from
    pub type_tag: String,
    /// Postcard-encoded value
    pub payload: Vec<u8>,
}

impl CacheEnvelope {
    /// Create an envelope with the current magic and version.
    pub fn new(type_tag: impl Into<String>, payload: Vec<u8>) -> Self {
        CacheEnvelope {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            type_tag: type_tag.into(),
            payload,
        }
    }
}

/// A decoded, validated entry whose payload type is not yet fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    type_tag: String,
    payload: Vec<u8>,
}

impl CachedValue {
    /// Type tag recorded when the value was written.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Raw postcard payload, without the envelope.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this value was written as a `T`.
    pub fn is<T: ?Sized>(&self) -> bool {
        self.type_tag == type_tag::<T>()
    }

    /// Decode the payload as `T`.
    ///
    /// # Errors
    ///
    /// - `Error::TypeMismatch`: the value was written as a different type
    /// - `Error::SerializationError`: the payload is corrupt
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let expected = type_tag::<T>();
        if self.type_tag != expected {
            return Err(Error::TypeMismatch {
                expected: expected.to_string(),
                found: self.type_tag.clone(),
            });
        }

        postcard::from_bytes(&self.payload).map_err(|e| {
            error!("Cache payload decoding failed for {}: {}", expected, e);
            Error::SerializationError(e.to_string())
        })
    }
}

/// Encode a value with its envelope for storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if postcard cannot encode the value.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(value).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })?;

    let envelope = CacheEnvelope::new(type_tag::<T>(), payload);
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Cache envelope serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode and validate an envelope.
///
/// # Errors
///
/// Returns `Error::SerializationError` when the bytes are not an envelope, the
/// magic header is wrong, or the schema version differs.
pub fn decode_envelope(bytes: &[u8]) -> Result<CachedValue> {
    let envelope: CacheEnvelope = postcard::from_bytes(bytes).map_err(|e| {
        error!("Cache envelope deserialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        );
        return Err(Error::SerializationError(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::SerializationError(format!(
            "Schema version mismatch: expected {}, found {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        )));
    }

    Ok(CachedValue {
        type_tag: envelope.type_tag,
        payload: envelope.payload,
    })
}

/// Decode and validate an envelope, then its payload as `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    decode_envelope(bytes)?.decode()
}
