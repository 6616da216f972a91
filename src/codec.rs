//! Value serialization and cache-key derivation.
//!
//! Values are serialized through a pluggable [`Serializer`] operating on
//! `serde_json::Value`, so any `Serialize` result type can be stored with
//! any byte encoding. Keys are derived by [`KeyCodec`] as
//! `{prefix}:{namespace}:{encoded-args}`, where the encoded arguments are
//! the serializer's output for `[positional, named]` (or the output of a
//! dedicated [`KeySerializer`]), base64-encoded when it is not valid UTF-8.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::types::CallArgs;
use crate::{MemoError, Result};

/// Suffix of a namespace's ordered index key.
pub const INDEX_SUFFIX: &str = "keys";

/// Byte encoding for cached values.
pub trait Serializer: Send + Sync {
    /// Encode a value for storage.
    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode a stored value.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// Default serializer: compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Dedicated key encoding, used instead of the value serializer when keys
/// must differ from values (compact keys, hashing, ...).
///
/// Implemented for any `Fn(&CallArgs) -> Result<Vec<u8>>`:
///
/// ```rust
/// # use memokv::{CallArgs, codec::KeySerializer};
/// let by_first_arg = |args: &CallArgs| -> memokv::Result<Vec<u8>> {
///     Ok(args.positional.first().map(|v| v.to_string()).unwrap_or_default().into_bytes())
/// };
/// assert_eq!(by_first_arg.serialize_key(&CallArgs::new().arg(9)).unwrap(), b"9");
/// ```
pub trait KeySerializer: Send + Sync {
    fn serialize_key(&self, args: &CallArgs) -> Result<Vec<u8>>;
}

impl<F> KeySerializer for F
where
    F: Fn(&CallArgs) -> Result<Vec<u8>> + Send + Sync,
{
    fn serialize_key(&self, args: &CallArgs) -> Result<Vec<u8>> {
        self(args)
    }
}

/// Derives deterministic store keys from `(prefix, namespace, args)`.
#[derive(Clone)]
pub struct KeyCodec {
    prefix: String,
    serializer: Arc<dyn Serializer>,
    key_serializer: Option<Arc<dyn KeySerializer>>,
}

impl KeyCodec {
    pub fn new(
        prefix: impl Into<String>,
        serializer: Arc<dyn Serializer>,
        key_serializer: Option<Arc<dyn KeySerializer>>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            serializer,
            key_serializer,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Store key for one call.
    pub fn derive_key(&self, namespace: &str, args: &CallArgs) -> Result<String> {
        let material = match &self.key_serializer {
            Some(key_serializer) => key_serializer.serialize_key(args)?,
            None => self.serializer.serialize(&args.key_material())?,
        };
        Ok(format!(
            "{}{}",
            self.namespace_prefix(namespace),
            encode_key_material(material)
        ))
    }

    /// Store key of the namespace's ordered index.
    pub fn index_key(&self, namespace: &str) -> String {
        format!("{}{INDEX_SUFFIX}", self.namespace_prefix(namespace))
    }

    /// Prefix shared by every key of the namespace, index included.
    pub fn namespace_prefix(&self, namespace: &str) -> String {
        format!("{}:{namespace}:", self.prefix)
    }
}

impl fmt::Debug for KeyCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCodec")
            .field("prefix", &self.prefix)
            .field("custom_key_serializer", &self.key_serializer.is_some())
            .finish()
    }
}

/// Text key material is used as-is; anything else is base64-encoded.
fn encode_key_material(material: Vec<u8>) -> String {
    match String::from_utf8(material) {
        Ok(text) => text,
        Err(err) => STANDARD.encode(err.into_bytes()),
    }
}

/// Serialize a typed value through `serializer`.
pub(crate) fn encode_value<R: Serialize>(serializer: &dyn Serializer, value: &R) -> Result<Vec<u8>> {
    serializer.serialize(&serde_json::to_value(value)?)
}

/// Deserialize stored bytes into a typed value through `serializer`.
pub(crate) fn decode_value<R: DeserializeOwned>(
    serializer: &dyn Serializer,
    bytes: &[u8],
) -> Result<R> {
    let value = serializer.deserialize(bytes)?;
    serde_json::from_value(value)
        .map_err(|e| MemoError::Serialization(format!("cached value has unexpected shape: {e}")))
}
