//! Blocking facades over the asynchronous primitive handles.
//!
//! Each facade captures a runtime handle at construction and runs the
//! underlying async operation to completion, blocking only the calling
//! thread. Must not be called from within the runtime's own worker threads.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::error::{QuorumError, Result};
use crate::serializer::Serializer;

use super::collections::{AtomicValue, DistributedSet, WorkQueue};
use super::counter::{AtomicCounter, AtomicCounterMap};
use super::id_generator::AtomicIdGenerator;
use super::lock::{DistributedLock, LeaderElector};
use super::map::ConsistentMap;
use super::tree::DocumentTree;

/// Run an async operation on the captured runtime and wait for it.
///
/// The operation runs as a spawned task, so a dropped runtime surfaces as
/// `Interrupted` ("outcome unknown") rather than a hang or panic.
fn wait<T, F>(handle: &Handle, operation: F) -> Result<T>
where
    T: Send + 'static,
    F: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    handle.spawn(async move {
        let _ = tx.send(operation.await);
    });
    rx.recv()
        .map_err(|_| QuorumError::Interrupted("runtime stopped before completion".to_string()))?
}

pub struct BlockingCounter {
    inner: AtomicCounter,
    handle: Handle,
}

impl AtomicCounter {
    /// A blocking view sharing this handle. Captures the current runtime.
    pub fn blocking(&self) -> BlockingCounter {
        BlockingCounter {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingCounter {
    pub fn get(&self) -> Result<i64> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.get().await })
    }

    pub fn set(&self, value: i64) -> Result<()> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.set(value).await })
    }

    pub fn get_and_add(&self, delta: i64) -> Result<i64> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.get_and_add(delta).await })
    }

    pub fn increment_and_get(&self) -> Result<i64> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.increment_and_get().await })
    }

    pub fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        let inner = self.inner.clone();
        wait(&self.handle, async move {
            inner.compare_and_set(expect, update).await
        })
    }
}

pub struct BlockingCounterMap {
    inner: AtomicCounterMap,
    handle: Handle,
}

impl AtomicCounterMap {
    pub fn blocking(&self) -> BlockingCounterMap {
        BlockingCounterMap {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingCounterMap {
    pub fn get(&self, key: &str) -> Result<i64> {
        let inner = self.inner.clone();
        let key = key.to_string();
        wait(&self.handle, async move { inner.get(&key).await })
    }

    pub fn get_and_add(&self, key: &str, delta: i64) -> Result<i64> {
        let inner = self.inner.clone();
        let key = key.to_string();
        wait(&self.handle, async move {
            inner.get_and_add(&key, delta).await
        })
    }

    pub fn put(&self, key: &str, value: i64) -> Result<i64> {
        let inner = self.inner.clone();
        let key = key.to_string();
        wait(&self.handle, async move { inner.put(&key, value).await })
    }

    pub fn remove(&self, key: &str) -> Result<i64> {
        let inner = self.inner.clone();
        let key = key.to_string();
        wait(&self.handle, async move { inner.remove(&key).await })
    }

    pub fn size(&self) -> Result<usize> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.size().await })
    }
}

pub struct BlockingIdGenerator {
    inner: Arc<AtomicIdGenerator>,
    handle: Handle,
}

impl AtomicIdGenerator {
    /// A blocking view over this generator. The generator moves behind an
    /// `Arc` so the facade and any async users share one window state.
    pub fn into_blocking(self) -> BlockingIdGenerator {
        BlockingIdGenerator {
            inner: Arc::new(self),
            handle: Handle::current(),
        }
    }
}

impl BlockingIdGenerator {
    pub fn next_id(&self) -> Result<u64> {
        let inner = Arc::clone(&self.inner);
        wait(&self.handle, async move { inner.next_id().await })
    }
}

pub struct BlockingMap<V, S: Serializer> {
    inner: ConsistentMap<V, S>,
    handle: Handle,
}

impl<V, S> ConsistentMap<V, S>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Serializer,
{
    pub fn blocking(&self) -> BlockingMap<V, S> {
        BlockingMap {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl<V, S> BlockingMap<V, S>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Serializer,
{
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        wait(&self.handle, async move { inner.get(&key).await })
    }

    pub fn put(&self, key: &str, value: V) -> Result<Option<V>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        wait(&self.handle, async move { inner.put(&key, &value).await })
    }

    pub fn remove(&self, key: &str) -> Result<Option<V>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        wait(&self.handle, async move { inner.remove(&key).await })
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.keys().await })
    }

    pub fn len(&self) -> Result<usize> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.len().await })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

pub struct BlockingSet {
    inner: DistributedSet,
    handle: Handle,
}

impl DistributedSet {
    pub fn blocking(&self) -> BlockingSet {
        BlockingSet {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingSet {
    pub fn add(&self, value: Vec<u8>) -> Result<bool> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.add(value).await })
    }

    pub fn remove(&self, value: Vec<u8>) -> Result<bool> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.remove(value).await })
    }

    pub fn contains(&self, value: Vec<u8>) -> Result<bool> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.contains(value).await })
    }

    pub fn len(&self) -> Result<usize> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.len().await })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

pub struct BlockingValue {
    inner: AtomicValue,
    handle: Handle,
}

impl AtomicValue {
    pub fn blocking(&self) -> BlockingValue {
        BlockingValue {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingValue {
    pub fn get(&self) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.get().await })
    }

    pub fn set(&self, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.set(value).await })
    }
}

pub struct BlockingWorkQueue {
    inner: WorkQueue,
    handle: Handle,
}

impl WorkQueue {
    pub fn blocking(&self) -> BlockingWorkQueue {
        BlockingWorkQueue {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingWorkQueue {
    pub fn add(&self, task: Vec<u8>) -> Result<()> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.add(task).await })
    }

    pub fn poll(&self) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.poll().await })
    }

    pub fn len(&self) -> Result<usize> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.len().await })
    }
}

pub struct BlockingLock {
    inner: DistributedLock,
    handle: Handle,
}

impl DistributedLock {
    /// A blocking view sharing this handle's session.
    pub fn blocking(&self) -> BlockingLock {
        BlockingLock {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingLock {
    pub fn try_acquire(&self) -> Result<bool> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.try_acquire().await })
    }

    pub fn acquire(&self, deadline: Duration) -> Result<()> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.acquire(deadline).await })
    }

    pub fn release(&self) -> Result<()> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.release().await })
    }

    pub fn is_locked(&self) -> Result<bool> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.is_locked().await })
    }
}

pub struct BlockingElector {
    inner: LeaderElector,
    handle: Handle,
}

impl LeaderElector {
    pub fn blocking(&self) -> BlockingElector {
        BlockingElector {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingElector {
    pub fn run(&self, candidate: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.run(candidate).await })
    }

    pub fn withdraw(&self) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.withdraw().await })
    }

    pub fn leadership(&self) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        wait(&self.handle, async move { inner.leadership().await })
    }
}

pub struct BlockingTree {
    inner: DocumentTree,
    handle: Handle,
}

impl DocumentTree {
    pub fn blocking(&self) -> BlockingTree {
        BlockingTree {
            inner: self.clone(),
            handle: Handle::current(),
        }
    }
}

impl BlockingTree {
    pub fn set(&self, path: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        wait(&self.handle, async move { inner.set(&path, value).await })
    }

    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        wait(&self.handle, async move { inner.get(&path).await })
    }

    pub fn remove(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        wait(&self.handle, async move { inner.remove(&path).await })
    }

    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        let inner = self.inner.clone();
        let path = path.to_string();
        wait(&self.handle, async move { inner.children(&path).await })
    }
}
