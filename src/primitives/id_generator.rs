//! Cluster-wide unique id generation.
//!
//! Ids are handed out from locally cached windows backed by a replicated
//! counter. Each window costs one consensus round (a single get-and-add of
//! the batch size); the ids inside it are then served without further
//! replication. Concurrent callers that exhaust a window all attach to the
//! same in-flight reservation, so a burst never issues more than one
//! replicated operation per window boundary.

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::error::{QuorumError, Result};
use crate::machine::PrimitiveOp;

use super::{expect_long, PrimitiveHandle};

pub const DEFAULT_BATCH_SIZE: u64 = 1000;

type Reservation = Shared<BoxFuture<'static, std::result::Result<u64, QuorumError>>>;

struct GeneratorState {
    /// Whether any window has ever been reserved. Distinguishes a fresh
    /// generator from one whose first window legitimately started at zero.
    initialized: bool,
    /// Offset of the next id within the current window, 1-based.
    delta: u64,
    /// Bumped every time a new reservation is installed; lets a failed
    /// caller tell whether its window is still the current one.
    epoch: u64,
    reservation: Option<Reservation>,
}

pub struct AtomicIdGenerator {
    handle: PrimitiveHandle,
    batch_size: u64,
    state: Mutex<GeneratorState>,
}

impl AtomicIdGenerator {
    pub(crate) fn new(handle: PrimitiveHandle, batch_size: u64) -> Self {
        Self {
            handle,
            batch_size,
            state: Mutex::new(GeneratorState {
                initialized: false,
                delta: 0,
                epoch: 0,
                reservation: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// The next cluster-wide unique id.
    ///
    /// Ids are unique across every client of the same generator name but not
    /// contiguous: ids cached by a client that goes away are never reused.
    pub async fn next_id(&self) -> Result<u64> {
        let (reservation, delta, epoch) = {
            let mut state = self.state.lock().await;
            state.delta += 1;

            if !state.initialized || state.delta > self.batch_size {
                state.initialized = true;
                state.delta = 1;
                state.epoch += 1;
                state.reservation = Some(self.reserve(state.reservation.take()));
            }

            let reservation = match &state.reservation {
                Some(r) => r.clone(),
                None => return Err(QuorumError::Internal("id window missing".to_string())),
            };
            (reservation, state.delta, state.epoch)
        };

        match reservation.await {
            Ok(base) => Ok(base + delta),
            Err(e) => {
                // Discard the failed window so the next caller reserves a
                // fresh one, unless a newer window already replaced it.
                let mut state = self.state.lock().await;
                if state.epoch == epoch {
                    state.initialized = false;
                    state.delta = 0;
                    state.reservation = None;
                }
                Err(e)
            }
        }
    }

    /// Start reserving the next window. Waits for the previous in-flight
    /// reservation first so windows are claimed in order.
    fn reserve(&self, previous: Option<Reservation>) -> Reservation {
        let handle = self.handle.clone();
        let batch = self.batch_size as i64;

        async move {
            if let Some(previous) = previous {
                // Its own waiters observe its result; here only completion
                // order matters.
                let _ = previous.await;
            }
            let base = expect_long(handle.submit(PrimitiveOp::CounterAdd(batch)).await?)?;
            if base < 0 {
                return Err(QuorumError::Internal(format!(
                    "id counter underflow: {base}"
                )));
            }
            Ok(base as u64)
        }
        .boxed()
        .shared()
    }
}
