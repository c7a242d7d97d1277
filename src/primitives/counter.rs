use crate::error::Result;
use crate::machine::PrimitiveOp;
use crate::protocol::messages::ConsistencyLevel;

use super::{expect_bool, expect_long, PrimitiveHandle};

/// A replicated 64-bit counter.
///
/// Reads default to linearizable so a `get` after a successful mutation
/// always observes it, even across clients.
#[derive(Clone)]
pub struct AtomicCounter {
    handle: PrimitiveHandle,
}

impl AtomicCounter {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub async fn get(&self) -> Result<i64> {
        expect_long(
            self.handle
                .read(PrimitiveOp::CounterGet, ConsistencyLevel::Linearizable)
                .await?,
        )
    }

    /// Read at an explicit consistency level.
    pub async fn get_with(&self, level: ConsistencyLevel) -> Result<i64> {
        expect_long(self.handle.read(PrimitiveOp::CounterGet, level).await?)
    }

    pub async fn set(&self, value: i64) -> Result<()> {
        self.handle.submit(PrimitiveOp::CounterSet(value)).await?;
        Ok(())
    }

    /// Atomically add `delta`, returning the value before the addition.
    pub async fn get_and_add(&self, delta: i64) -> Result<i64> {
        expect_long(self.handle.submit(PrimitiveOp::CounterAdd(delta)).await?)
    }

    pub async fn increment_and_get(&self) -> Result<i64> {
        Ok(self.get_and_add(1).await? + 1)
    }

    pub async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        expect_bool(
            self.handle
                .submit(PrimitiveOp::CounterCompareAndSet { expect, update })
                .await?,
        )
    }
}

/// A replicated map of independent 64-bit counters, keyed by string.
///
/// Keys that were never written read as zero, so callers can add to a key
/// without creating it first.
#[derive(Clone)]
pub struct AtomicCounterMap {
    handle: PrimitiveHandle,
}

impl AtomicCounterMap {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub async fn get(&self, key: &str) -> Result<i64> {
        expect_long(
            self.handle
                .read(
                    PrimitiveOp::CounterMapGet(key.to_string()),
                    ConsistencyLevel::Linearizable,
                )
                .await?,
        )
    }

    /// Read a key at an explicit consistency level.
    pub async fn get_with(&self, key: &str, level: ConsistencyLevel) -> Result<i64> {
        expect_long(
            self.handle
                .read(PrimitiveOp::CounterMapGet(key.to_string()), level)
                .await?,
        )
    }

    /// Atomically add `delta` to `key`, returning the value before the
    /// addition.
    pub async fn get_and_add(&self, key: &str, delta: i64) -> Result<i64> {
        expect_long(
            self.handle
                .submit(PrimitiveOp::CounterMapAdd {
                    key: key.to_string(),
                    delta,
                })
                .await?,
        )
    }

    pub async fn increment_and_get(&self, key: &str) -> Result<i64> {
        Ok(self.get_and_add(key, 1).await? + 1)
    }

    /// Set `key` to `value`, returning the previous value.
    pub async fn put(&self, key: &str, value: i64) -> Result<i64> {
        expect_long(
            self.handle
                .submit(PrimitiveOp::CounterMapPut {
                    key: key.to_string(),
                    value,
                })
                .await?,
        )
    }

    /// Remove `key`, returning the value it held.
    pub async fn remove(&self, key: &str) -> Result<i64> {
        expect_long(
            self.handle
                .submit(PrimitiveOp::CounterMapRemove(key.to_string()))
                .await?,
        )
    }

    /// Number of keys with an explicit entry.
    pub async fn size(&self) -> Result<usize> {
        let size = expect_long(
            self.handle
                .read(PrimitiveOp::CounterMapSize, ConsistencyLevel::Linearizable)
                .await?,
        )?;
        Ok(size as usize)
    }
}
