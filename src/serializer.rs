use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{QuorumError, Result};

/// Serializer boundary for primitive values.
///
/// Every typed primitive handle encodes its values to bytes before they enter
/// the replicated log and decodes them on the way back out. The codec is
/// pluggable per primitive instance.
pub trait Serializer: Clone + Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Reference serializer backed by bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| QuorumError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| QuorumError::Serialization(e.to_string()))
    }
}
