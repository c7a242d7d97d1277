use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::machine::PrimitiveOp;
use crate::protocol::messages::ConsistencyLevel;
use crate::serializer::{BincodeSerializer, Serializer};

use super::{expect_bool, expect_bytes, expect_keys, expect_long, PrimitiveHandle};

/// A replicated key-value map with typed values.
///
/// Values are serialized on the way in and deserialized on the way out; the
/// state machine only ever sees opaque bytes.
pub struct ConsistentMap<V, S: Serializer = BincodeSerializer> {
    handle: PrimitiveHandle,
    serializer: S,
    _value: PhantomData<fn() -> V>,
}

// Derived Clone would demand V: Clone, but V only marks the value type.
impl<V, S: Serializer> Clone for ConsistentMap<V, S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            serializer: self.serializer.clone(),
            _value: PhantomData,
        }
    }
}

impl<V, S> ConsistentMap<V, S>
where
    V: Serialize + DeserializeOwned + Send + Sync,
    S: Serializer,
{
    pub(crate) fn new(handle: PrimitiveHandle, serializer: S) -> Self {
        Self {
            handle,
            serializer,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        self.get_with(key, ConsistencyLevel::Linearizable).await
    }

    pub async fn get_with(&self, key: &str, level: ConsistencyLevel) -> Result<Option<V>> {
        let bytes = expect_bytes(
            self.handle
                .read(PrimitiveOp::MapGet(key.to_string()), level)
                .await?,
        )?;
        self.decode(bytes)
    }

    /// Insert a value, returning the previous value for the key if any.
    pub async fn put(&self, key: &str, value: &V) -> Result<Option<V>> {
        let encoded = self.serializer.encode(value)?;
        let previous = expect_bytes(
            self.handle
                .submit(PrimitiveOp::MapPut {
                    key: key.to_string(),
                    value: encoded,
                })
                .await?,
        )?;
        self.decode(previous)
    }

    pub async fn remove(&self, key: &str) -> Result<Option<V>> {
        let previous = expect_bytes(
            self.handle
                .submit(PrimitiveOp::MapRemove(key.to_string()))
                .await?,
        )?;
        self.decode(previous)
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        expect_keys(
            self.handle
                .read(PrimitiveOp::MapKeys, ConsistencyLevel::Linearizable)
                .await?,
        )
    }

    pub async fn len(&self) -> Result<usize> {
        let size = expect_long(
            self.handle
                .read(PrimitiveOp::MapSize, ConsistencyLevel::Linearizable)
                .await?,
        )?;
        Ok(size as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    fn decode(&self, bytes: Option<Vec<u8>>) -> Result<Option<V>> {
        bytes.map(|b| self.serializer.decode(&b)).transpose()
    }
}

/// A replicated multimap: each key maps to a list of distinct byte values.
#[derive(Clone)]
pub struct ConsistentMultimap {
    handle: PrimitiveHandle,
}

impl ConsistentMultimap {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Associate a value with a key. Returns false if the association
    /// already existed.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        expect_bool(
            self.handle
                .submit(PrimitiveOp::MultimapPut {
                    key: key.to_string(),
                    value,
                })
                .await?,
        )
    }

    pub async fn get(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        match self
            .handle
            .read(
                PrimitiveOp::MultimapGet(key.to_string()),
                ConsistencyLevel::Linearizable,
            )
            .await?
        {
            crate::machine::OpResult::Values(values) => Ok(values),
            other => Err(crate::error::QuorumError::Internal(format!(
                "unexpected operation result: {other:?}"
            ))),
        }
    }

    pub async fn remove(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        expect_bool(
            self.handle
                .submit(PrimitiveOp::MultimapRemove {
                    key: key.to_string(),
                    value,
                })
                .await?,
        )
    }
}
