//! In-process loopback message bus.
//!
//! # Guarantees
//!
//! - **Synchronous delivery**: `send` invokes every attached hook on the
//!   caller's thread before returning
//! - **Loopback**: every sent message is also an inbound message for every
//!   attached hook, including the sender's own
//! - **Re-entrant**: hooks may call `send` while being invoked
//! - **In-memory only**: messages are not buffered or replayed; a hook
//!   attached after a send never sees it
//!
//! This is the transport the command-line harness and the tests run on. A
//! hook that answers requests by sending a reply from inside its own
//! invocation models a peer that responds instantly, which is exactly the
//! race that register-before-send must survive.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use tracing::{trace, warn};

use crate::transport::{DispatchHook, HookId, Transport};

struct BusInner<T> {
    hooks: RwLock<Vec<(HookId, DispatchHook<T>)>>,
    next_id: AtomicU64,
    fail_sends: AtomicBool,
}

/// Loopback [`Transport`] delivering every sent message to every hook.
///
/// Cloning is cheap; clones share the same set of hooks.
///
/// # Example
///
/// ```ignore
/// let bus = MessageBus::<char>::new();
///
/// // Observe traffic
/// bus.attach(Arc::new(|msg: &[char]| println!("{}", msg.iter().collect::<String>())));
///
/// bus.send(&"hello".chars().collect::<Vec<_>>())?;
/// ```
pub struct MessageBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> MessageBus<T> {
    /// Create a bus with no hooks attached.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                hooks: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                fail_sends: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver `message` to every attached hook.
    ///
    /// Returns the number of hooks that received it.
    pub fn publish(&self, message: &[T]) -> usize {
        // Snapshot, then release the lock: hooks may re-enter `send`,
        // `attach` or `detach`.
        let hooks: Vec<DispatchHook<T>> = self
            .read_hooks()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();

        trace!(hooks = hooks.len(), len = message.len(), "delivering message");
        for hook in &hooks {
            hook(message);
        }
        hooks.len()
    }

    /// Make every subsequent `send` fail (or succeed again).
    ///
    /// Simulates a broken link for exercising transport-failure paths.
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of attached hooks.
    pub fn hook_count(&self) -> usize {
        self.read_hooks().len()
    }

    fn read_hooks(&self) -> std::sync::RwLockReadGuard<'_, Vec<(HookId, DispatchHook<T>)>> {
        self.inner
            .hooks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_hooks(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(HookId, DispatchHook<T>)>> {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Transport<T> for MessageBus<T> {
    fn send(&self, message: &[T]) -> Result<()> {
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            bail!("message bus is refusing sends");
        }
        self.publish(message);
        Ok(())
    }

    fn attach(&self, hook: DispatchHook<T>) -> HookId {
        let id = HookId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.write_hooks().push((id, hook));
        id
    }

    fn detach(&self, id: HookId) -> bool {
        let mut hooks = self.write_hooks();
        match hooks.iter().position(|(hook_id, _)| *hook_id == id) {
            Some(index) => {
                hooks.remove(index);
                true
            }
            None => {
                warn!(%id, "detach requested for a hook that is not attached");
                false
            }
        }
    }
}

impl<T> Clone for MessageBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for MessageBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MessageBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("hook_count", &self.hook_count())
            .finish()
    }
}
