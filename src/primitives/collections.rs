//! Smaller replicated collections: set, register value, and work queue.

use crate::error::Result;
use crate::machine::PrimitiveOp;
use crate::protocol::messages::ConsistencyLevel;

use super::{expect_bool, expect_bytes, expect_long, PrimitiveHandle};

/// A replicated set of opaque byte values.
#[derive(Clone)]
pub struct DistributedSet {
    handle: PrimitiveHandle,
}

impl DistributedSet {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Returns false if the value was already present.
    pub async fn add(&self, value: Vec<u8>) -> Result<bool> {
        expect_bool(self.handle.submit(PrimitiveOp::SetAdd(value)).await?)
    }

    pub async fn remove(&self, value: Vec<u8>) -> Result<bool> {
        expect_bool(self.handle.submit(PrimitiveOp::SetRemove(value)).await?)
    }

    pub async fn contains(&self, value: Vec<u8>) -> Result<bool> {
        expect_bool(
            self.handle
                .read(PrimitiveOp::SetContains(value), ConsistencyLevel::Linearizable)
                .await?,
        )
    }

    pub async fn len(&self) -> Result<usize> {
        let size = expect_long(
            self.handle
                .read(PrimitiveOp::SetSize, ConsistencyLevel::Linearizable)
                .await?,
        )?;
        Ok(size as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// A replicated single-value register.
#[derive(Clone)]
pub struct AtomicValue {
    handle: PrimitiveHandle,
}

impl AtomicValue {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub async fn get(&self) -> Result<Option<Vec<u8>>> {
        expect_bytes(
            self.handle
                .read(PrimitiveOp::ValueGet, ConsistencyLevel::Linearizable)
                .await?,
        )
    }

    /// Set the value, returning the previous one.
    pub async fn set(&self, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        expect_bytes(self.handle.submit(PrimitiveOp::ValueSet(value)).await?)
    }
}

/// A replicated FIFO work queue.
///
/// `poll` is a mutating operation: it removes the item it returns, so two
/// workers never receive the same task.
#[derive(Clone)]
pub struct WorkQueue {
    handle: PrimitiveHandle,
}

impl WorkQueue {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub async fn add(&self, task: Vec<u8>) -> Result<()> {
        self.handle.submit(PrimitiveOp::QueueAdd(task)).await?;
        Ok(())
    }

    /// Take the oldest task off the queue, if any.
    pub async fn poll(&self) -> Result<Option<Vec<u8>>> {
        expect_bytes(self.handle.submit(PrimitiveOp::QueuePoll).await?)
    }

    pub async fn len(&self) -> Result<usize> {
        let size = expect_long(
            self.handle
                .read(PrimitiveOp::QueueSize, ConsistencyLevel::Linearizable)
                .await?,
        )?;
        Ok(size as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
