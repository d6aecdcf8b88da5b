//! Admission control: queue limit plus a resizable generation semaphore.
//!
//! Two independent budgets bound the work the broker takes on:
//!
//! - the **queue** counts requests that are waiting for or holding a
//!   generation slot. [`try_admit_queue`](AdmissionController::try_admit_queue)
//!   never waits; a full queue is reported immediately so the caller can
//!   answer "busy".
//! - **generation slots** bound concurrent upstream calls. Acquiring a slot
//!   suspends until one is free.
//!
//! The slot count can change at runtime. Growing adds permits immediately.
//! Shrinking forgets idle permits right away and records the remainder as
//! debt; slots returned by running generations pay the debt instead of going
//! back to the pool. Running work is never interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{BragiError, Result};

#[derive(Debug)]
struct SlotState {
    /// Configured number of generation slots.
    limit: usize,
    /// Permits still to be retired because of a shrink.
    debt: usize,
}

#[derive(Debug)]
struct Slots {
    semaphore: Arc<Semaphore>,
    state: Mutex<SlotState>,
}

impl Slots {
    fn state(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return one permit, or retire it if a shrink is still owed.
    fn release(&self, permit: OwnedSemaphorePermit) {
        let mut state = self.state();
        if state.debt > 0 {
            state.debt -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}

/// Gatekeeper for queued requests and concurrent generations.
#[derive(Debug)]
pub struct AdmissionController {
    queued: AtomicUsize,
    max_queued: AtomicUsize,
    slots: Arc<Slots>,
}

impl AdmissionController {
    /// Create a controller with `generation_slots` concurrent generations and
    /// at most `max_queued` outstanding requests.
    pub fn new(generation_slots: usize, max_queued: usize) -> Self {
        Self {
            queued: AtomicUsize::new(0),
            max_queued: AtomicUsize::new(max_queued),
            slots: Arc::new(Slots {
                semaphore: Arc::new(Semaphore::new(generation_slots)),
                state: Mutex::new(SlotState {
                    limit: generation_slots,
                    debt: 0,
                }),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Take a queue place if one is free. Never blocks; on `false` nothing
    /// was changed.
    pub fn try_admit_queue(&self) -> bool {
        let max = self.max_queued.load(Ordering::Acquire);
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < max).then_some(queued + 1)
            })
            .is_ok()
    }

    /// Give back a queue place taken by [`try_admit_queue`](Self::try_admit_queue).
    pub fn release_queue(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                queued.checked_sub(1)
            });
    }

    /// RAII form of [`try_admit_queue`](Self::try_admit_queue): the place is
    /// released when the ticket drops.
    pub fn admit(self: &Arc<Self>) -> Option<QueueTicket> {
        self.try_admit_queue().then(|| QueueTicket {
            controller: Arc::clone(self),
        })
    }

    /// Requests currently queued or generating.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn max_queued(&self) -> usize {
        self.max_queued.load(Ordering::Acquire)
    }

    /// Change the queue limit. Requests already admitted are unaffected.
    pub fn set_max_queued(&self, max: usize) {
        self.max_queued.store(max, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Generation slots
    // ------------------------------------------------------------------

    /// Wait for a free generation slot. The slot is released when the
    /// returned guard drops.
    pub async fn acquire_generation(&self) -> Result<GenerationSlot> {
        let permit = Arc::clone(&self.slots.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| BragiError::ShuttingDown)?;
        Ok(GenerationSlot {
            permit: Some(permit),
            slots: Arc::clone(&self.slots),
        })
    }

    /// Explicitly release a slot. Same as dropping it.
    pub fn release_generation(&self, slot: GenerationSlot) {
        drop(slot);
    }

    /// Configured number of generation slots.
    pub fn generation_limit(&self) -> usize {
        self.slots.state().limit
    }

    /// Slots free right now.
    pub fn available_generations(&self) -> usize {
        self.slots.semaphore.available_permits()
    }

    /// Resize the generation pool.
    ///
    /// Growing frees the difference at once (first cancelling any shrink
    /// still owed). Shrinking retires idle permits now and the rest as
    /// running generations finish.
    pub fn set_generation_limit(&self, limit: usize) {
        let mut state = self.slots.state();
        if limit > state.limit {
            let mut grow = limit - state.limit;
            let repaid = grow.min(state.debt);
            state.debt -= repaid;
            grow -= repaid;
            if grow > 0 {
                self.slots.semaphore.add_permits(grow);
            }
        } else if limit < state.limit {
            let shrink = state.limit - limit;
            let retired = self.slots.semaphore.forget_permits(shrink);
            state.debt += shrink - retired;
        }
        state.limit = limit;
    }

    /// Stop handing out slots; pending and future acquisitions fail.
    pub fn close(&self) {
        self.slots.semaphore.close();
    }
}

/// A held queue place.
#[derive(Debug)]
pub struct QueueTicket {
    controller: Arc<AdmissionController>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.controller.release_queue();
    }
}

/// A held generation slot.
#[derive(Debug)]
pub struct GenerationSlot {
    permit: Option<OwnedSemaphorePermit>,
    slots: Arc<Slots>,
}

impl Drop for GenerationSlot {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.slots.release(permit);
        }
    }
}
