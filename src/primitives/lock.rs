use std::time::Duration;

use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{QuorumError, Result};
use crate::machine::PrimitiveOp;
use crate::protocol::messages::ConsistencyLevel;

use super::{expect_bool, expect_bytes, PrimitiveHandle};

/// Delay between acquisition attempts while the lock is contended.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A replicated mutual-exclusion lock.
///
/// Each handle owns a session identity; clones of a handle share it, so a
/// clone can release what the original acquired. Handles built separately
/// get distinct sessions and contend with each other.
#[derive(Clone)]
pub struct DistributedLock {
    handle: PrimitiveHandle,
    session: Uuid,
}

impl DistributedLock {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self {
            handle,
            session: Uuid::new_v4(),
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Attempt to take the lock without waiting. Re-acquiring a lock this
    /// session already holds succeeds.
    pub async fn try_acquire(&self) -> Result<bool> {
        expect_bool(
            self.handle
                .submit(PrimitiveOp::LockAcquire {
                    session: self.session,
                })
                .await?,
        )
    }

    /// Take the lock, polling until the holder releases it or the deadline
    /// passes.
    pub async fn acquire(&self, deadline: Duration) -> Result<()> {
        let give_up = tokio::time::Instant::now() + deadline;
        loop {
            if self.try_acquire().await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= give_up {
                return Err(QuorumError::Timeout);
            }
            sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// Release the lock. Fails with `NotLockHolder` if this session does not
    /// hold it.
    pub async fn release(&self) -> Result<()> {
        self.handle
            .submit(PrimitiveOp::LockRelease {
                session: self.session,
            })
            .await?;
        Ok(())
    }

    pub async fn is_locked(&self) -> Result<bool> {
        expect_bool(
            self.handle
                .read(PrimitiveOp::LockIsLocked, ConsistencyLevel::Linearizable)
                .await?,
        )
    }
}

/// First-come-first-served leader election over an opaque candidate
/// identity.
///
/// The earliest candidate still enrolled is the leader; withdrawing promotes
/// the next in line.
#[derive(Clone)]
pub struct LeaderElector {
    handle: PrimitiveHandle,
    session: Uuid,
}

impl LeaderElector {
    pub(crate) fn new(handle: PrimitiveHandle) -> Self {
        Self {
            handle,
            session: Uuid::new_v4(),
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Enroll as a candidate. Returns the current leader's identity after
    /// enrollment; if no one was enrolled before, that is this candidate.
    pub async fn run(&self, candidate: Vec<u8>) -> Result<Option<Vec<u8>>> {
        expect_bytes(
            self.handle
                .submit(PrimitiveOp::ElectorRun {
                    session: self.session,
                    candidate,
                })
                .await?,
        )
    }

    /// Leave the candidate pool. Returns the leader after withdrawal.
    pub async fn withdraw(&self) -> Result<Option<Vec<u8>>> {
        expect_bytes(
            self.handle
                .submit(PrimitiveOp::ElectorWithdraw {
                    session: self.session,
                })
                .await?,
        )
    }

    /// The current leader's identity, if any candidate is enrolled.
    pub async fn leadership(&self) -> Result<Option<Vec<u8>>> {
        expect_bytes(
            self.handle
                .read(PrimitiveOp::ElectorLeadership, ConsistencyLevel::Linearizable)
                .await?,
        )
    }
}
