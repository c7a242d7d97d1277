//! Replicated resource state machine.
//!
//! Holds every primitive instance created in the cluster, keyed by resource
//! id, plus the name registry that makes creation idempotent. Application is
//! deterministic: the same command sequence produces identical state on every
//! node, which is what makes the log-ordering guarantee meaningful.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PrimitiveError;
use crate::primitives::{Ordering, PrimitiveType};
use crate::raft::state::LogCommand;

/// An operation scoped to a single primitive instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveOp {
    // Counter (also backs the id generator).
    CounterGet,
    CounterSet(i64),
    /// Atomic get-and-add: returns the value before the addition.
    CounterAdd(i64),
    CounterCompareAndSet { expect: i64, update: i64 },

    // Counter map. Absent keys read as zero.
    CounterMapGet(String),
    /// Atomic get-and-add per key: returns the value before the addition.
    CounterMapAdd { key: String, delta: i64 },
    CounterMapPut { key: String, value: i64 },
    CounterMapRemove(String),
    CounterMapSize,

    // Map.
    MapGet(String),
    MapPut { key: String, value: Vec<u8> },
    MapRemove(String),
    MapKeys,
    MapSize,

    // Multimap.
    MultimapPut { key: String, value: Vec<u8> },
    MultimapGet(String),
    MultimapRemove { key: String, value: Vec<u8> },

    // Set.
    SetAdd(Vec<u8>),
    SetRemove(Vec<u8>),
    SetContains(Vec<u8>),
    SetSize,

    // Value.
    ValueGet,
    ValueSet(Vec<u8>),

    // Work queue.
    QueueAdd(Vec<u8>),
    QueuePoll,
    QueueSize,

    // Lock. Sessions identify holders across handle clones.
    LockAcquire { session: Uuid },
    LockRelease { session: Uuid },
    LockIsLocked,

    // Leader elector.
    ElectorRun { session: Uuid, candidate: Vec<u8> },
    ElectorWithdraw { session: Uuid },
    ElectorLeadership,

    // Document tree.
    TreeSet { path: String, value: Vec<u8> },
    TreeGet(String),
    TreeRemove(String),
    TreeChildren(String),
}

impl PrimitiveOp {
    /// Whether the operation is read-only and may bypass the log.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            PrimitiveOp::CounterGet
                | PrimitiveOp::CounterMapGet(_)
                | PrimitiveOp::CounterMapSize
                | PrimitiveOp::MapGet(_)
                | PrimitiveOp::MapKeys
                | PrimitiveOp::MapSize
                | PrimitiveOp::MultimapGet(_)
                | PrimitiveOp::SetContains(_)
                | PrimitiveOp::SetSize
                | PrimitiveOp::ValueGet
                | PrimitiveOp::QueueSize
                | PrimitiveOp::LockIsLocked
                | PrimitiveOp::ElectorLeadership
                | PrimitiveOp::TreeGet(_)
                | PrimitiveOp::TreeChildren(_)
        )
    }
}

/// Typed result of a primitive operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpResult {
    None,
    Long(i64),
    Bool(bool),
    Bytes(Option<Vec<u8>>),
    Values(Vec<Vec<u8>>),
    Keys(Vec<String>),
    Names(Vec<String>),
    /// Resource id allocated or resolved by a creation command.
    Resource(u64),
    /// A node identity, e.g. the current consensus leader.
    Node(Option<u64>),
}

#[derive(Debug)]
struct TreeNode {
    value: Vec<u8>,
    seq: u64,
}

#[derive(Debug)]
enum PrimitiveState {
    Counter(i64),
    CounterMap(HashMap<String, i64>),
    Map(HashMap<String, Vec<u8>>),
    Multimap(HashMap<String, Vec<Vec<u8>>>),
    Set(HashSet<Vec<u8>>),
    Value(Option<Vec<u8>>),
    Queue(VecDeque<Vec<u8>>),
    Lock { holder: Option<Uuid> },
    /// Front of the candidate list is the current leader.
    Elector { candidates: Vec<(Uuid, Vec<u8>)> },
    Tree {
        nodes: BTreeMap<String, TreeNode>,
        next_seq: u64,
        ordering: Ordering,
    },
}

impl PrimitiveState {
    fn new(ty: PrimitiveType, ordering: Ordering) -> Self {
        match ty {
            PrimitiveType::Counter | PrimitiveType::IdGenerator => PrimitiveState::Counter(0),
            PrimitiveType::CounterMap => PrimitiveState::CounterMap(HashMap::new()),
            PrimitiveType::Map => PrimitiveState::Map(HashMap::new()),
            PrimitiveType::Multimap => PrimitiveState::Multimap(HashMap::new()),
            PrimitiveType::Set => PrimitiveState::Set(HashSet::new()),
            PrimitiveType::Value => PrimitiveState::Value(None),
            PrimitiveType::Queue => PrimitiveState::Queue(VecDeque::new()),
            PrimitiveType::Lock => PrimitiveState::Lock { holder: None },
            PrimitiveType::Elector => PrimitiveState::Elector {
                candidates: Vec::new(),
            },
            PrimitiveType::Tree => PrimitiveState::Tree {
                nodes: BTreeMap::new(),
                next_seq: 0,
                ordering,
            },
        }
    }
}

#[derive(Debug)]
struct Resource {
    name: String,
    ty: PrimitiveType,
    state: PrimitiveState,
}

/// The state machine every node applies committed log entries to, in strict
/// index order.
#[derive(Debug, Default)]
pub struct StateMachine {
    next_resource_id: u64,
    by_name: HashMap<String, u64>,
    resources: HashMap<u64, Resource>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed command. Membership commands are handled by the
    /// consensus node itself and are no-ops here.
    pub fn apply(&mut self, command: &LogCommand) -> Result<OpResult, PrimitiveError> {
        match command {
            LogCommand::Noop | LogCommand::AddMember(_) | LogCommand::RemoveMember(_) => {
                Ok(OpResult::None)
            }
            LogCommand::CreateResource { name, ty, ordering } => {
                self.create(name, *ty, *ordering)
            }
            LogCommand::DeleteResource { name } => {
                let existed = match self.by_name.remove(name) {
                    Some(id) => self.resources.remove(&id).is_some(),
                    None => false,
                };
                Ok(OpResult::Bool(existed))
            }
            LogCommand::Apply { resource, op } => {
                let res = self
                    .resources
                    .get_mut(resource)
                    .ok_or(PrimitiveError::UnknownResource(*resource))?;
                apply_op(&mut res.state, op)
            }
        }
    }

    /// Serve a read-only operation against local state.
    pub fn query(&self, resource: u64, op: &PrimitiveOp) -> Result<OpResult, PrimitiveError> {
        let res = self
            .resources
            .get(&resource)
            .ok_or(PrimitiveError::UnknownResource(resource))?;
        query_op(&res.state, op)
    }

    /// Names of all resources of the given primitive type, sorted.
    pub fn names_of(&self, ty: PrimitiveType) -> Vec<String> {
        let mut names: Vec<String> = self
            .resources
            .values()
            .filter(|r| r.ty == ty)
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Resolve a name to its resource id and type.
    pub fn lookup(&self, name: &str) -> Option<(u64, PrimitiveType)> {
        let id = *self.by_name.get(name)?;
        self.resources.get(&id).map(|r| (id, r.ty))
    }

    fn create(
        &mut self,
        name: &str,
        ty: PrimitiveType,
        ordering: Ordering,
    ) -> Result<OpResult, PrimitiveError> {
        if let Some(&id) = self.by_name.get(name) {
            let existing = self.resources[&id].ty;
            if existing == ty {
                return Ok(OpResult::Resource(id));
            }
            return Err(PrimitiveError::TypeConflict {
                name: name.to_string(),
                existing,
                requested: ty,
            });
        }
        self.next_resource_id += 1;
        let id = self.next_resource_id;
        self.by_name.insert(name.to_string(), id);
        self.resources.insert(
            id,
            Resource {
                name: name.to_string(),
                ty,
                state: PrimitiveState::new(ty, ordering),
            },
        );
        Ok(OpResult::Resource(id))
    }
}

fn invalid(op: &PrimitiveOp) -> PrimitiveError {
    PrimitiveError::InvalidOperation(format!("{op:?}"))
}

fn apply_op(state: &mut PrimitiveState, op: &PrimitiveOp) -> Result<OpResult, PrimitiveError> {
    match (state, op) {
        (PrimitiveState::Counter(v), PrimitiveOp::CounterSet(n)) => {
            *v = *n;
            Ok(OpResult::None)
        }
        (PrimitiveState::Counter(v), PrimitiveOp::CounterAdd(delta)) => {
            let previous = *v;
            *v += delta;
            Ok(OpResult::Long(previous))
        }
        (PrimitiveState::Counter(v), PrimitiveOp::CounterCompareAndSet { expect, update }) => {
            if *v == *expect {
                *v = *update;
                Ok(OpResult::Bool(true))
            } else {
                Ok(OpResult::Bool(false))
            }
        }
        (PrimitiveState::CounterMap(m), PrimitiveOp::CounterMapAdd { key, delta }) => {
            let slot = m.entry(key.clone()).or_insert(0);
            let previous = *slot;
            *slot += delta;
            Ok(OpResult::Long(previous))
        }
        (PrimitiveState::CounterMap(m), PrimitiveOp::CounterMapPut { key, value }) => {
            Ok(OpResult::Long(m.insert(key.clone(), *value).unwrap_or(0)))
        }
        (PrimitiveState::CounterMap(m), PrimitiveOp::CounterMapRemove(key)) => {
            Ok(OpResult::Long(m.remove(key).unwrap_or(0)))
        }
        (PrimitiveState::Map(m), PrimitiveOp::MapPut { key, value }) => {
            Ok(OpResult::Bytes(m.insert(key.clone(), value.clone())))
        }
        (PrimitiveState::Map(m), PrimitiveOp::MapRemove(key)) => {
            Ok(OpResult::Bytes(m.remove(key)))
        }
        (PrimitiveState::Multimap(m), PrimitiveOp::MultimapPut { key, value }) => {
            let values = m.entry(key.clone()).or_default();
            if values.contains(value) {
                Ok(OpResult::Bool(false))
            } else {
                values.push(value.clone());
                Ok(OpResult::Bool(true))
            }
        }
        (PrimitiveState::Multimap(m), PrimitiveOp::MultimapRemove { key, value }) => {
            let removed = match m.get_mut(key) {
                Some(values) => {
                    let before = values.len();
                    values.retain(|v| v != value);
                    if values.is_empty() {
                        m.remove(key);
                    }
                    before > 0 && m.get(key).map_or(true, |v| v.len() < before)
                }
                None => false,
            };
            Ok(OpResult::Bool(removed))
        }
        (PrimitiveState::Set(s), PrimitiveOp::SetAdd(value)) => {
            Ok(OpResult::Bool(s.insert(value.clone())))
        }
        (PrimitiveState::Set(s), PrimitiveOp::SetRemove(value)) => {
            Ok(OpResult::Bool(s.remove(value)))
        }
        (PrimitiveState::Value(v), PrimitiveOp::ValueSet(bytes)) => {
            Ok(OpResult::Bytes(v.replace(bytes.clone())))
        }
        (PrimitiveState::Queue(q), PrimitiveOp::QueueAdd(bytes)) => {
            q.push_back(bytes.clone());
            Ok(OpResult::None)
        }
        (PrimitiveState::Queue(q), PrimitiveOp::QueuePoll) => Ok(OpResult::Bytes(q.pop_front())),
        (PrimitiveState::Lock { holder }, PrimitiveOp::LockAcquire { session }) => {
            match holder {
                Some(current) if current != session => Ok(OpResult::Bool(false)),
                _ => {
                    *holder = Some(*session);
                    Ok(OpResult::Bool(true))
                }
            }
        }
        (PrimitiveState::Lock { holder }, PrimitiveOp::LockRelease { session }) => {
            if *holder == Some(*session) {
                *holder = None;
                Ok(OpResult::None)
            } else {
                Err(PrimitiveError::NotLockHolder)
            }
        }
        (PrimitiveState::Elector { candidates }, PrimitiveOp::ElectorRun { session, candidate }) => {
            if !candidates.iter().any(|(s, _)| s == session) {
                candidates.push((*session, candidate.clone()));
            }
            Ok(OpResult::Bytes(
                candidates.first().map(|(_, c)| c.clone()),
            ))
        }
        (PrimitiveState::Elector { candidates }, PrimitiveOp::ElectorWithdraw { session }) => {
            candidates.retain(|(s, _)| s != session);
            Ok(OpResult::Bytes(
                candidates.first().map(|(_, c)| c.clone()),
            ))
        }
        (
            PrimitiveState::Tree {
                nodes, next_seq, ..
            },
            PrimitiveOp::TreeSet { path, value },
        ) => {
            let seq = *next_seq;
            *next_seq += 1;
            let previous = nodes.insert(
                path.clone(),
                TreeNode {
                    value: value.clone(),
                    seq,
                },
            );
            Ok(OpResult::Bytes(previous.map(|n| n.value)))
        }
        (PrimitiveState::Tree { nodes, .. }, PrimitiveOp::TreeRemove(path)) => {
            Ok(OpResult::Bytes(nodes.remove(path).map(|n| n.value)))
        }
        // Read-only ops arriving through the log are served the same way a
        // local query would be.
        (state, op) if op.is_query() => query_op(state, op),
        (_, op) => Err(invalid(op)),
    }
}

fn query_op(state: &PrimitiveState, op: &PrimitiveOp) -> Result<OpResult, PrimitiveError> {
    match (state, op) {
        (PrimitiveState::Counter(v), PrimitiveOp::CounterGet) => Ok(OpResult::Long(*v)),
        (PrimitiveState::CounterMap(m), PrimitiveOp::CounterMapGet(key)) => {
            Ok(OpResult::Long(m.get(key).copied().unwrap_or(0)))
        }
        (PrimitiveState::CounterMap(m), PrimitiveOp::CounterMapSize) => {
            Ok(OpResult::Long(m.len() as i64))
        }
        (PrimitiveState::Map(m), PrimitiveOp::MapGet(key)) => {
            Ok(OpResult::Bytes(m.get(key).cloned()))
        }
        (PrimitiveState::Map(m), PrimitiveOp::MapKeys) => {
            let mut keys: Vec<String> = m.keys().cloned().collect();
            keys.sort();
            Ok(OpResult::Keys(keys))
        }
        (PrimitiveState::Map(m), PrimitiveOp::MapSize) => Ok(OpResult::Long(m.len() as i64)),
        (PrimitiveState::Multimap(m), PrimitiveOp::MultimapGet(key)) => {
            Ok(OpResult::Values(m.get(key).cloned().unwrap_or_default()))
        }
        (PrimitiveState::Set(s), PrimitiveOp::SetContains(value)) => {
            Ok(OpResult::Bool(s.contains(value)))
        }
        (PrimitiveState::Set(s), PrimitiveOp::SetSize) => Ok(OpResult::Long(s.len() as i64)),
        (PrimitiveState::Value(v), PrimitiveOp::ValueGet) => Ok(OpResult::Bytes(v.clone())),
        (PrimitiveState::Queue(q), PrimitiveOp::QueueSize) => Ok(OpResult::Long(q.len() as i64)),
        (PrimitiveState::Lock { holder }, PrimitiveOp::LockIsLocked) => {
            Ok(OpResult::Bool(holder.is_some()))
        }
        (PrimitiveState::Elector { candidates }, PrimitiveOp::ElectorLeadership) => Ok(
            OpResult::Bytes(candidates.first().map(|(_, c)| c.clone())),
        ),
        (PrimitiveState::Tree { nodes, .. }, PrimitiveOp::TreeGet(path)) => {
            Ok(OpResult::Bytes(nodes.get(path).map(|n| n.value.clone())))
        }
        (
            PrimitiveState::Tree {
                nodes, ordering, ..
            },
            PrimitiveOp::TreeChildren(path),
        ) => {
            let prefix = if path.ends_with('/') {
                path.clone()
            } else {
                format!("{path}/")
            };
            let mut children: Vec<(&String, u64)> = nodes
                .iter()
                .filter(|(p, _)| {
                    p.starts_with(&prefix) && !p[prefix.len()..].contains('/')
                })
                .map(|(p, n)| (p, n.seq))
                .collect();
            if *ordering == Ordering::Insertion {
                children.sort_by_key(|(_, seq)| *seq);
            }
            Ok(OpResult::Keys(
                children
                    .into_iter()
                    .map(|(p, _)| p[prefix.len()..].to_string())
                    .collect(),
            ))
        }
        (_, op) => Err(invalid(op)),
    }
}
