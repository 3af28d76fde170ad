//! Single-assignment completion slots.
//!
//! A [`CompletionSlot`] is the cell a waiter parks on and the dispatch hook
//! fills. It starts `Pending` and leaves that state exactly once: either a
//! matching message fulfils it or the wait's deadline cancels it. Whichever
//! transition happens first wins; the loser is told so by a `false` return
//! and has no effect.
//!
//! Both waiting flavors read the same state:
//! - [`CompletionSlot::wait`] parks the calling thread on a `Condvar`
//! - [`CompletionSlot::wait_async`] suspends the task on a `tokio::sync::Notify`

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::Notify;
use tracing::warn;

/// Lifecycle of a completion slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState<M> {
    /// Nobody has fulfilled or cancelled the slot yet.
    Pending,
    /// A matching message arrived first.
    Fulfilled(M),
    /// The deadline elapsed first.
    Cancelled,
}

/// Returned by a wait whose slot was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "completion slot was cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// A single-assignment, observable result cell.
pub struct CompletionSlot<M> {
    state: Mutex<SlotState<M>>,
    /// Wakes threads parked in `wait`.
    ready: Condvar,
    /// Wakes tasks suspended in `wait_async`.
    notify: Notify,
}

impl<M: Clone> CompletionSlot<M> {
    /// Create a pending slot.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Fulfil the slot with `value` if it is still pending.
    ///
    /// Returns whether this call won the race.
    pub fn try_fulfill(&self, value: M) -> bool {
        self.transition(SlotState::Fulfilled(value))
    }

    /// Cancel the slot if it is still pending.
    ///
    /// Returns whether this call won the race.
    pub fn try_cancel(&self) -> bool {
        self.transition(SlotState::Cancelled)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SlotState<M> {
        self.lock().clone()
    }

    /// Returns true while neither fulfilment nor cancellation has happened.
    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), SlotState::Pending)
    }

    /// Block the calling thread until the slot is fulfilled or cancelled.
    ///
    /// When `deadline` passes while still pending, the slot is cancelled.
    /// A fulfilment that raced ahead of that cancellation still wins and is
    /// returned.
    pub fn wait(&self, deadline: Option<Instant>) -> Result<M, Cancelled> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = Self::outcome(&state) {
                return outcome;
            }

            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        // Cancel under the lock we already hold
                        *state = SlotState::Cancelled;
                        drop(state);
                        self.wake();
                        return Err(Cancelled);
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }

    /// Suspend the current task until the slot is fulfilled or cancelled.
    ///
    /// Same semantics as [`wait`](Self::wait), without occupying a thread.
    /// The deadline is armed with `tokio::time`, so this must run inside a
    /// Tokio runtime with the time driver enabled when a deadline is given.
    pub async fn wait_async(&self, deadline: Option<Instant>) -> Result<M, Cancelled> {
        loop {
            // Register for notification BEFORE checking the state.
            // This prevents the race where a fulfilment lands between the
            // check and the await.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outcome = Self::outcome(&self.lock());
            if let Some(outcome) = outcome {
                return outcome;
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let deadline = tokio::time::Instant::from_std(deadline);
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        self.try_cancel();
                    }
                }
            }
            // Loop back to re-read the state (Notify may wake spuriously)
        }
    }

    fn outcome(state: &SlotState<M>) -> Option<Result<M, Cancelled>> {
        match state {
            SlotState::Pending => None,
            SlotState::Fulfilled(value) => Some(Ok(value.clone())),
            SlotState::Cancelled => Some(Err(Cancelled)),
        }
    }

    fn transition(&self, next: SlotState<M>) -> bool {
        let mut state = self.lock();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = next;
        drop(state);
        self.wake();
        true
    }

    fn wake(&self) {
        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<M>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("completion slot mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl<M: Clone> Default for CompletionSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: fmt::Debug> fmt::Debug for CompletionSlot<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CompletionSlot");
        match self.state.try_lock() {
            Ok(state) => s.field("state", &*state),
            Err(_) => s.field("state", &"<locked>"),
        };
        s.finish()
    }
}

// =============================================================================
// Slot Reference
// =============================================================================

/// Shared handle to a completion slot carrying message replies.
///
/// Equality is *identity*: two handles are equal only if they point at the
/// same slot. This is what lets the registry remove one waiter's entry
/// without disturbing another waiter that registered an equal pattern.
pub struct SlotRef<T>(Arc<CompletionSlot<Vec<T>>>);

impl<T: Clone> SlotRef<T> {
    /// Allocate a fresh pending slot.
    pub fn new() -> Self {
        Self(Arc::new(CompletionSlot::new()))
    }
}

impl<T: Clone> Default for SlotRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SlotRef<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> PartialEq for SlotRef<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for SlotRef<T> {}

impl<T> std::ops::Deref for SlotRef<T> {
    type Target = CompletionSlot<Vec<T>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SlotRef").field(&Arc::as_ptr(&self.0)).finish()
    }
}
