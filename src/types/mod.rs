//! Public types for the memokv API.

mod args;
mod descriptor;

pub use args::CallArgs;
pub use descriptor::CallDescriptor;

use serde::{Serialize, de::DeserializeOwned};

/// Values a cached computation may return.
///
/// Blanket-implemented for every `Serialize + DeserializeOwned` type that
/// can cross an await point.
pub trait CacheValue: Serialize + DeserializeOwned + Send + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Send + 'static {}
