//! Call arguments for cached computations

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Arguments of one call to a cached computation.
///
/// Mirrors a positional + keyword calling convention. Named arguments are
/// kept in a `BTreeMap`, so their insertion order never affects the
/// derived cache key.
///
/// ```rust
/// # use memokv::CallArgs;
/// let args = CallArgs::new().arg(42).arg("eu-west").named("verbose", true);
/// assert_eq!(args.positional.len(), 2);
/// assert_eq!(args.named["verbose"], serde_json::json!(true));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub named: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from positional arguments only.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: BTreeMap::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named argument.
    pub fn named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Append any serializable value as a positional argument.
    pub fn try_arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.positional.push(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Set any serializable value as a named argument.
    pub fn try_named<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        self.named.insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Whether there are no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Positional argument at `index`, decoded into `T`.
    pub fn get<T: serde::de::DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.positional.get(index).cloned().ok_or_else(|| {
            crate::MemoError::Serialization(format!("missing positional argument {index}"))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Named argument `name`, decoded into `T`.
    pub fn get_named<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.named.get(name).cloned().ok_or_else(|| {
            crate::MemoError::Serialization(format!("missing named argument '{name}'"))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// The shape handed to a batch computation for this call.
    ///
    /// Positional arguments win when present; named arguments are only
    /// forwarded for calls made purely by name.
    pub fn into_batch_item(self) -> Self {
        if self.positional.is_empty() {
            Self {
                positional: Vec::new(),
                named: self.named,
            }
        } else {
            Self {
                positional: self.positional,
                named: BTreeMap::new(),
            }
        }
    }

    /// The `[positional, named]` pair fed to the value serializer when
    /// deriving a key.
    pub(crate) fn key_material(&self) -> Value {
        Value::Array(vec![
            Value::Array(self.positional.clone()),
            Value::Object(
                self.named
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        ])
    }
}
