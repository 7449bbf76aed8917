//! Serialization Adapter
//!
//! Converts domain values to and from the text stored in the remote tier.
//! `decode` must be the exact left inverse of `encode`.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Failure to turn a value into wire text or back
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Wire codec for values held by a remote store
pub trait Codec<T>: Send + Sync {
    /// Encode a value into its stored text form
    fn encode(&self, value: &T) -> Result<String, CodecError>;

    /// Decode stored text back into a value
    fn decode(&self, text: &str) -> Result<T, CodecError>;

    /// Short name used in log fields
    fn name(&self) -> &'static str;
}

/// JSON codec backed by serde_json
pub struct JsonCodec<T = serde_json::Value> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError(e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<T, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Identity codec for plain strings
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl Codec<String> for TextCodec {
    fn encode(&self, value: &String) -> Result<String, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, text: &str) -> Result<String, CodecError> {
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

// =============================================================================
// Tests
// =============================================================================
