//! Fixed-capacity buffer pool
//!
//! An arena of reusable buffers addressed by slot index. Each slot is in
//! exactly one state at a time:
//!
//! ```text
//! Free → InUse(Producer|Worker) → Queued → InUse(Worker|Consumer) → Free
//! ```
//!
//! Buffers leave the pool inside a move-only [`Slot`] handle. Whoever holds
//! the handle owns the buffer; handing it on means moving the handle, and
//! returning it means passing it by value to [`BufferPool::release`], so a
//! handle cannot be released twice. A handle dropped without being released
//! (an error path, a slot offered to the wrong pool) goes back to the pool it
//! came from. The pool keeps a state table and a per-slot generation so that
//! handles from another pool, and transitions that skip a state, are rejected
//! with `InvalidState`.
//!
//! Acquiring from an exhausted pool blocks the caller. Each release wakes at
//! most one waiter. `interrupt()` cancels current waiters, `destroy()` fails
//! current and future waiters.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Buffers that can be cleared for reuse without giving up their allocation
pub trait Recycle: Default {
    fn recycle(&mut self);
}

/// Actor currently holding a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Caller filling an input unit
    Producer,
    /// Decode worker
    Worker,
    /// Caller rendering or dropping an output unit
    Consumer,
}

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    InUse(Owner),
    Queued,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::Free => write!(f, "FREE"),
            SlotState::InUse(owner) => write!(f, "IN_USE({owner:?})"),
            SlotState::Queued => write!(f, "QUEUED"),
        }
    }
}

/// Exclusive handle to one pool buffer
///
/// Not `Clone`: the handle is the ownership token.
pub struct Slot<T: Recycle> {
    pool_id: u64,
    index: usize,
    generation: u64,
    buffer: T,
    /// Pool to return to on drop; empty once released
    home: Weak<PoolShared<T>>,
}

impl<T: Recycle> Slot<T> {
    /// Index of this slot inside its pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Take the buffer out, leaving nothing for `Drop` to return
    fn disarm(mut self) -> (usize, u64, T) {
        self.home = Weak::new();
        (self.index, self.generation, std::mem::take(&mut self.buffer))
    }
}

impl<T: Recycle> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.home.upgrade() {
            warn!(
                "{} slot {} dropped without release, returning it",
                pool.label, self.index
            );
            let buffer = std::mem::take(&mut self.buffer);
            if let Err(e) = pool.put_back(self.index, self.generation, buffer) {
                warn!("Dropped slot not returned: {}", e);
            }
        }
    }
}

impl<T: Recycle> Deref for Slot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.buffer
    }
}

impl<T: Recycle> DerefMut for Slot<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.buffer
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("pool_id", &self.pool_id)
            .field("index", &self.index)
            .field("generation", &self.generation)
            .field("buffer", &self.buffer)
            .finish()
    }
}

struct PoolInner<T> {
    /// Parked buffers of free slots, in release order
    free: VecDeque<(usize, T)>,
    states: Vec<SlotState>,
    generations: Vec<u64>,
    destroyed: bool,
    /// Bumped by `interrupt()`; waiters that saw an older value give up
    interrupt_epoch: u64,
}

/// Pool state reachable from outstanding slot handles
struct PoolShared<T> {
    id: u64,
    label: &'static str,
    inner: Mutex<PoolInner<T>>,
    available: Condvar,
}

impl<T: Recycle> PoolShared<T> {
    fn lock(&self) -> MutexGuard<'_, PoolInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park a buffer taken out of a handle of this pool
    fn put_back(&self, index: usize, generation: u64, mut buffer: T) -> Result<()> {
        let mut inner = self.lock();
        if inner.destroyed {
            trace!("{} slot {} returned after pool destroyed", self.label, index);
            return Ok(());
        }
        if inner.generations[index] != generation {
            return Err(Error::InvalidState(format!(
                "{} slot {} handle is stale (generation {} != {})",
                self.label, index, generation, inner.generations[index]
            )));
        }
        let state = inner.states[index];
        if state == SlotState::Free {
            return Err(Error::InvalidState(format!(
                "{} slot {} is already free",
                self.label, index
            )));
        }

        buffer.recycle();
        inner.states[index] = SlotState::Free;
        inner.generations[index] += 1;
        inner.free.push_back((index, buffer));
        trace!("{} slot {} released (was {})", self.label, index, state);
        drop(inner);

        self.available.notify_one();
        Ok(())
    }
}

/// Bounded pool of reusable buffers
pub struct BufferPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Recycle> BufferPool<T> {
    /// Create a pool with `capacity` buffers built by `make`
    ///
    /// # Errors
    /// `Error::Config` if capacity is zero.
    pub fn new(label: &'static str, capacity: usize, mut make: impl FnMut() -> T) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(format!(
                "{label} pool capacity must be positive"
            )));
        }

        let free = (0..capacity).map(|index| (index, make())).collect();

        debug!("Created {} pool: capacity={}", label, capacity);

        Ok(Self {
            shared: Arc::new(PoolShared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                label,
                inner: Mutex::new(PoolInner {
                    free,
                    states: vec![SlotState::Free; capacity],
                    generations: vec![0; capacity],
                    destroyed: false,
                    interrupt_epoch: 0,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Acquire a free slot, blocking until one is released
    ///
    /// # Errors
    /// - `Error::Cancelled` if `interrupt()` is called while waiting
    /// - `Error::PoolDestroyed` if the pool is destroyed before or while waiting
    pub fn acquire(&self, owner: Owner) -> Result<Slot<T>> {
        match self.wait_for_slot(owner, None)? {
            Some(slot) => Ok(slot),
            // No deadline means the wait only ends with a slot or an error
            None => Err(Error::InvalidState(format!(
                "{} pool wait ended without a slot",
                self.shared.label
            ))),
        }
    }

    /// Acquire a free slot without blocking
    pub fn try_acquire(&self, owner: Owner) -> Result<Option<Slot<T>>> {
        self.wait_for_slot(owner, Some(Instant::now()))
    }

    /// Acquire a free slot, giving up after `timeout`
    ///
    /// A timeout too large to represent as a deadline waits without one.
    pub fn acquire_timeout(&self, owner: Owner, timeout: Duration) -> Result<Option<Slot<T>>> {
        self.wait_for_slot(owner, Instant::now().checked_add(timeout))
    }

    fn wait_for_slot(&self, owner: Owner, deadline: Option<Instant>) -> Result<Option<Slot<T>>> {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let epoch = inner.interrupt_epoch;

        loop {
            if inner.destroyed {
                return Err(Error::PoolDestroyed(shared.label.to_string()));
            }
            if inner.interrupt_epoch != epoch {
                return Err(Error::Cancelled(format!(
                    "{} buffer wait interrupted",
                    shared.label
                )));
            }
            if let Some((index, buffer)) = inner.free.pop_front() {
                inner.states[index] = SlotState::InUse(owner);
                trace!("{} slot {} acquired by {:?}", shared.label, index, owner);
                return Ok(Some(Slot {
                    pool_id: shared.id,
                    index,
                    generation: inner.generations[index],
                    buffer,
                    home: Arc::downgrade(shared),
                }));
            }

            inner = match deadline {
                None => shared
                    .available
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    shared
                        .available
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Mark a held slot as queued for its next owner
    pub fn enqueue(&self, slot: &Slot<T>) -> Result<()> {
        let mut inner = self.shared.lock();
        let state = self.check_slot(&inner, slot)?;
        match state {
            SlotState::InUse(_) => {
                inner.states[slot.index] = SlotState::Queued;
                Ok(())
            }
            other => Err(self.bad_transition(slot, other, SlotState::Queued)),
        }
    }

    /// Hand a queued slot to its next owner
    pub fn hand_to(&self, slot: &Slot<T>, owner: Owner) -> Result<()> {
        let mut inner = self.shared.lock();
        let state = self.check_slot(&inner, slot)?;
        match state {
            SlotState::Queued => {
                inner.states[slot.index] = SlotState::InUse(owner);
                Ok(())
            }
            other => Err(self.bad_transition(slot, other, SlotState::InUse(owner))),
        }
    }

    /// Return a slot to the pool
    ///
    /// The buffer is recycled and one blocked acquirer (if any) is woken.
    /// Releasing into a destroyed pool just drops the buffer.
    ///
    /// # Errors
    /// `Error::InvalidState` if the slot belongs to another pool (it goes
    /// back to its own pool instead) or is not currently out of the pool.
    pub fn release(&self, slot: Slot<T>) -> Result<()> {
        if slot.pool_id != self.shared.id {
            let err = Error::InvalidState(format!(
                "slot {} does not belong to the {} pool",
                slot.index, self.shared.label
            ));
            drop(slot);
            return Err(err);
        }

        let (index, generation, buffer) = slot.disarm();
        self.shared.put_back(index, generation, buffer)
    }

    /// Cancel every acquirer currently blocked on this pool
    pub fn interrupt(&self) {
        let mut inner = self.shared.lock();
        inner.interrupt_epoch += 1;
        drop(inner);
        self.shared.available.notify_all();
    }

    /// Tear the pool down; current and future acquirers fail
    pub fn destroy(&self) {
        let mut inner = self.shared.lock();
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        inner.free.clear();
        debug!("{} pool destroyed", self.shared.label);
        drop(inner);
        self.shared.available.notify_all();
    }

    /// Number of slots currently in `Free` state
    pub fn free_count(&self) -> usize {
        self.shared
            .lock()
            .states
            .iter()
            .filter(|s| **s == SlotState::Free)
            .count()
    }

    /// State of one slot (None if out of range)
    #[cfg(test)]
    pub(crate) fn state_of(&self, index: usize) -> Option<SlotState> {
        self.shared.lock().states.get(index).copied()
    }

    fn check_slot(&self, inner: &PoolInner<T>, slot: &Slot<T>) -> Result<SlotState> {
        if slot.pool_id != self.shared.id {
            return Err(Error::InvalidState(format!(
                "slot {} does not belong to the {} pool",
                slot.index, self.shared.label
            )));
        }
        if inner.generations[slot.index] != slot.generation {
            return Err(Error::InvalidState(format!(
                "{} slot {} handle is stale (generation {} != {})",
                self.shared.label, slot.index, slot.generation, inner.generations[slot.index]
            )));
        }
        Ok(inner.states[slot.index])
    }

    fn bad_transition(&self, slot: &Slot<T>, from: SlotState, to: SlotState) -> Error {
        Error::InvalidState(format!(
            "{} slot {} cannot move from {} to {}",
            self.shared.label, slot.index, from, to
        ))
    }
}
