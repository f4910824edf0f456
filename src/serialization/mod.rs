//! Versioned envelopes for cached values.
//!
//! The result cache holds values of many types side by side, so each value is
//! stored as bytes. The envelope is postcard; the payload inside it is JSON,
//! because cached rows carry `serde_json::Value` columns and postcard cannot
//! decode a self-describing type.
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────┬─────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │TYPE TAG (string) │JSON PAYLOAD (bytes) │
//! └─────────────────┴─────────────────┴──────────────────┴─────────────────────┘
//!   "DLKT"              u32             type_name::<T>()    serde_json::to_vec(T)
//! ```
//!
//! The type tag makes a read as the wrong type fail with
//! [`CodecError::TypeMismatch`] even when the payload would happen to parse.
//! A decode failure never reaches callers of the cache: the entry is evicted
//! and the lookup counts as a miss.
//!
//! ```rust
//! use datalayer_kit::serialization::{decode_cached, encode_for_cache};
//!
//! let bytes = encode_for_cache(&vec![1u64, 2, 3]).unwrap();
//! let ids: Vec<u64> = decode_cached(&bytes).unwrap();
//! assert_eq!(ids, vec![1, 2, 3]);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::fmt;

/// Magic header for cached values: b"DLKT"
pub const CACHE_MAGIC: [u8; 4] = *b"DLKT";

/// Current schema version.
///
/// Bump when a cached type changes shape; older entries are then evicted on
/// first read instead of being misread.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Failure encoding or decoding a cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    Encode(String),
    Decode(String),
    InvalidMagic([u8; 4]),
    VersionMismatch { expected: u32, found: u32 },
    TypeMismatch { expected: String, found: String },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(msg) => write!(f, "Encode error: {}", msg),
            CodecError::Decode(msg) => write!(f, "Decode error: {}", msg),
            CodecError::InvalidMagic(found) => {
                write!(f, "Invalid magic: expected {:?}, got {:?}", CACHE_MAGIC, found)
            }
            CodecError::VersionMismatch { expected, found } => {
                write!(f, "Version mismatch: expected {}, found {}", expected, found)
            }
            CodecError::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Versioned, type-tagged envelope around an encoded payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope {
    pub magic: [u8; 4],
    pub version: u32,
    pub type_tag: String,
    pub payload: Vec<u8>,
}

impl CacheEnvelope {
    pub fn new<T: ?Sized>(payload: Vec<u8>) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            type_tag: type_name::<T>().to_string(),
            payload,
        }
    }
}

/// Encode a value with its envelope for cache storage.
///
/// # Errors
///
/// Returns `CodecError::Encode` if either serialization step fails.
pub fn encode_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(value).map_err(|e| {
        log::error!("Cache payload encoding failed: {}", e);
        CodecError::Encode(e.to_string())
    })?;

    postcard::to_allocvec(&CacheEnvelope::new::<T>(payload)).map_err(|e| {
        log::error!("Cache envelope encoding failed: {}", e);
        CodecError::Encode(e.to_string())
    })
}

/// Decode a cached value, validating magic, schema version and type tag.
///
/// # Errors
///
/// - `CodecError::Decode`: corrupted envelope or payload
/// - `CodecError::InvalidMagic`: bytes were not written by this crate
/// - `CodecError::VersionMismatch`: written under another schema version
/// - `CodecError::TypeMismatch`: written as a different type
pub fn decode_cached<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let envelope: CacheEnvelope =
        postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;

    if envelope.magic != CACHE_MAGIC {
        return Err(CodecError::InvalidMagic(envelope.magic));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        return Err(CodecError::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    let expected = type_name::<T>();
    if envelope.type_tag != expected {
        return Err(CodecError::TypeMismatch {
            expected: expected.to_string(),
            found: envelope.type_tag,
        });
    }

    serde_json::from_slice(&envelope.payload).map_err(|e| CodecError::Decode(e.to_string()))
}
