//! Client-facing distributed primitives.
//!
//! Every handle talks to the cluster through the dispatcher; none of them
//! hold primitive state locally. Creation is idempotent per name, so any
//! number of clients can build a handle for the same name and share the
//! underlying replicated instance.

pub mod blocking;
pub mod collections;
pub mod counter;
pub mod id_generator;
pub mod lock;
pub mod map;
pub mod tree;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatch::Dispatcher;
use crate::error::{QuorumError, Result};
use crate::machine::{OpResult, PrimitiveOp};
use crate::protocol::messages::{ConsistencyLevel, QueryOp};
use crate::raft::state::LogCommand;
use crate::serializer::{BincodeSerializer, Serializer};

pub use blocking::{
    BlockingCounter, BlockingCounterMap, BlockingElector, BlockingIdGenerator, BlockingLock,
    BlockingMap, BlockingSet, BlockingTree, BlockingValue, BlockingWorkQueue,
};
pub use collections::{AtomicValue, DistributedSet, WorkQueue};
pub use counter::{AtomicCounter, AtomicCounterMap};
pub use id_generator::AtomicIdGenerator;
pub use lock::{DistributedLock, LeaderElector};
pub use map::{ConsistentMap, ConsistentMultimap};
pub use tree::DocumentTree;

/// The kinds of replicated primitives the cluster can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Counter,
    CounterMap,
    IdGenerator,
    Map,
    Multimap,
    Set,
    Value,
    Lock,
    Elector,
    Queue,
    Tree,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Counter => "counter",
            PrimitiveType::CounterMap => "counter-map",
            PrimitiveType::IdGenerator => "id-generator",
            PrimitiveType::Map => "map",
            PrimitiveType::Multimap => "multimap",
            PrimitiveType::Set => "set",
            PrimitiveType::Value => "value",
            PrimitiveType::Lock => "lock",
            PrimitiveType::Elector => "elector",
            PrimitiveType::Queue => "queue",
            PrimitiveType::Tree => "tree",
        };
        f.write_str(name)
    }
}

/// Child ordering for document trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ordering {
    /// Lexicographic by path segment.
    #[default]
    Natural,
    /// Order of first insertion.
    Insertion,
}

/// Shared plumbing between primitive handles: the dispatcher, the resolved
/// resource id, and the name the resource was created under.
#[derive(Clone)]
pub(crate) struct PrimitiveHandle {
    dispatcher: Arc<Dispatcher>,
    resource: u64,
    name: String,
}

impl PrimitiveHandle {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Replicate a mutating operation through the log.
    pub(crate) async fn submit(&self, op: PrimitiveOp) -> Result<OpResult> {
        let outcome = self
            .dispatcher
            .command(LogCommand::Apply {
                resource: self.resource,
                op,
            })
            .await?;
        outcome.value.map_err(QuorumError::from)
    }

    /// Serve a read-only operation at the given consistency level.
    pub(crate) async fn read(&self, op: PrimitiveOp, level: ConsistencyLevel) -> Result<OpResult> {
        self.dispatcher
            .query(
                QueryOp::Primitive {
                    resource: self.resource,
                    op,
                },
                level,
            )
            .await
    }
}

pub(crate) fn expect_long(result: OpResult) -> Result<i64> {
    match result {
        OpResult::Long(v) => Ok(v),
        other => Err(unexpected(other)),
    }
}

pub(crate) fn expect_bool(result: OpResult) -> Result<bool> {
    match result {
        OpResult::Bool(v) => Ok(v),
        other => Err(unexpected(other)),
    }
}

pub(crate) fn expect_bytes(result: OpResult) -> Result<Option<Vec<u8>>> {
    match result {
        OpResult::Bytes(v) => Ok(v),
        other => Err(unexpected(other)),
    }
}

pub(crate) fn expect_keys(result: OpResult) -> Result<Vec<String>> {
    match result {
        OpResult::Keys(v) => Ok(v),
        other => Err(unexpected(other)),
    }
}

fn unexpected(result: OpResult) -> QuorumError {
    QuorumError::Internal(format!("unexpected operation result: {result:?}"))
}

/// Entry point for building primitive handles against a cluster.
#[derive(Clone)]
pub struct PrimitiveCreator {
    dispatcher: Arc<Dispatcher>,
}

impl PrimitiveCreator {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn counter(&self, name: impl Into<String>) -> CounterBuilder {
        CounterBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn counter_map(&self, name: impl Into<String>) -> CounterMapBuilder {
        CounterMapBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn id_generator(&self, name: impl Into<String>) -> IdGeneratorBuilder {
        IdGeneratorBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
            batch_size: id_generator::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn map<V>(&self, name: impl Into<String>) -> MapBuilder<V> {
        MapBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
            serializer: BincodeSerializer,
            _value: std::marker::PhantomData,
        }
    }

    pub fn multimap(&self, name: impl Into<String>) -> MultimapBuilder {
        MultimapBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn set(&self, name: impl Into<String>) -> SetBuilder {
        SetBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn value(&self, name: impl Into<String>) -> ValueBuilder {
        ValueBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn lock(&self, name: impl Into<String>) -> LockBuilder {
        LockBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn elector(&self, name: impl Into<String>) -> ElectorBuilder {
        ElectorBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn work_queue(&self, name: impl Into<String>) -> WorkQueueBuilder {
        WorkQueueBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
        }
    }

    pub fn tree(&self, name: impl Into<String>) -> TreeBuilder {
        TreeBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.into(),
            ordering: Ordering::Natural,
        }
    }

    /// Names of every primitive of the given type, sorted.
    pub async fn primitive_names(&self, ty: PrimitiveType) -> Result<Vec<String>> {
        let result = self
            .dispatcher
            .query(QueryOp::PrimitiveNames { ty }, ConsistencyLevel::Linearizable)
            .await?;
        match result {
            OpResult::Names(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }

    /// Delete a primitive by name. Returns whether it existed.
    pub async fn delete(&self, name: impl Into<String>) -> Result<bool> {
        let outcome = self
            .dispatcher
            .command(LogCommand::DeleteResource { name: name.into() })
            .await?;
        expect_bool(outcome.value.map_err(QuorumError::from)?)
    }
}

async fn create_handle(
    dispatcher: Arc<Dispatcher>,
    name: String,
    ty: PrimitiveType,
    ordering: Ordering,
) -> Result<PrimitiveHandle> {
    let outcome = dispatcher
        .command(LogCommand::CreateResource {
            name: name.clone(),
            ty,
            ordering,
        })
        .await?;
    match outcome.value.map_err(QuorumError::from)? {
        OpResult::Resource(resource) => {
            tracing::debug!(%name, %ty, resource, "Primitive resolved");
            Ok(PrimitiveHandle {
                dispatcher,
                resource,
                name,
            })
        }
        other => Err(unexpected(other)),
    }
}

pub struct CounterBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl CounterBuilder {
    pub async fn build(self) -> Result<AtomicCounter> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Counter,
            Ordering::Natural,
        )
        .await?;
        Ok(AtomicCounter::new(handle))
    }
}

pub struct CounterMapBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl CounterMapBuilder {
    pub async fn build(self) -> Result<AtomicCounterMap> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::CounterMap,
            Ordering::Natural,
        )
        .await?;
        Ok(AtomicCounterMap::new(handle))
    }
}

pub struct IdGeneratorBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
    batch_size: u64,
}

impl IdGeneratorBuilder {
    /// How many ids each replicated reservation covers. Clamped to the range
    /// the backing counter's signed delta can express.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.clamp(1, i64::MAX as u64);
        self
    }

    pub async fn build(self) -> Result<AtomicIdGenerator> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::IdGenerator,
            Ordering::Natural,
        )
        .await?;
        Ok(AtomicIdGenerator::new(handle, self.batch_size))
    }
}

pub struct MapBuilder<V, S: Serializer = BincodeSerializer> {
    dispatcher: Arc<Dispatcher>,
    name: String,
    serializer: S,
    _value: std::marker::PhantomData<V>,
}

impl<V, S> MapBuilder<V, S>
where
    V: Serialize + serde::de::DeserializeOwned + Send + Sync,
    S: Serializer,
{
    /// Swap the value serializer; bincode is the default.
    pub fn with_serializer<S2: Serializer>(self, serializer: S2) -> MapBuilder<V, S2> {
        MapBuilder {
            dispatcher: self.dispatcher,
            name: self.name,
            serializer,
            _value: std::marker::PhantomData,
        }
    }

    pub async fn build(self) -> Result<ConsistentMap<V, S>> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Map,
            Ordering::Natural,
        )
        .await?;
        Ok(ConsistentMap::new(handle, self.serializer))
    }
}

pub struct MultimapBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl MultimapBuilder {
    pub async fn build(self) -> Result<ConsistentMultimap> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Multimap,
            Ordering::Natural,
        )
        .await?;
        Ok(ConsistentMultimap::new(handle))
    }
}

pub struct SetBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl SetBuilder {
    pub async fn build(self) -> Result<DistributedSet> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Set,
            Ordering::Natural,
        )
        .await?;
        Ok(DistributedSet::new(handle))
    }
}

pub struct ValueBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl ValueBuilder {
    pub async fn build(self) -> Result<AtomicValue> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Value,
            Ordering::Natural,
        )
        .await?;
        Ok(AtomicValue::new(handle))
    }
}

pub struct LockBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl LockBuilder {
    pub async fn build(self) -> Result<DistributedLock> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Lock,
            Ordering::Natural,
        )
        .await?;
        Ok(DistributedLock::new(handle))
    }
}

pub struct ElectorBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl ElectorBuilder {
    pub async fn build(self) -> Result<LeaderElector> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Elector,
            Ordering::Natural,
        )
        .await?;
        Ok(LeaderElector::new(handle))
    }
}

pub struct WorkQueueBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
}

impl WorkQueueBuilder {
    pub async fn build(self) -> Result<WorkQueue> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Queue,
            Ordering::Natural,
        )
        .await?;
        Ok(WorkQueue::new(handle))
    }
}

pub struct TreeBuilder {
    dispatcher: Arc<Dispatcher>,
    name: String,
    ordering: Ordering,
}

impl TreeBuilder {
    /// Child ordering is fixed at creation time and must match on every
    /// subsequent build of the same name.
    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    pub async fn build(self) -> Result<DocumentTree> {
        let handle = create_handle(
            self.dispatcher,
            self.name,
            PrimitiveType::Tree,
            self.ordering,
        )
        .await?;
        Ok(DocumentTree::new(handle))
    }
}
