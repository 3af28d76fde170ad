//! The transport contract the waiters depend on.
//!
//! A transport does two things for the correlation engine: it sends outbound
//! messages, and it invokes attached hooks for every inbound message. Each
//! waiter attaches exactly one [`DispatchHook`] when it is built and detaches
//! it when it is dropped.
//!
//! Hooks may be invoked from any thread, concurrently with each other and
//! re-entrantly (a hook may cause another `send` whose reply re-enters the
//! hook before the first invocation returns).

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

/// Callback invoked once per inbound message.
pub type DispatchHook<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

/// Identifies an attached hook so it can be detached later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

impl HookId {
    /// Wrap a transport-assigned identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook-{}", self.0)
    }
}

/// Message transport consumed by the waiters.
///
/// # Example
///
/// ```ignore
/// struct SerialPort { /* ... */ }
///
/// impl Transport<u8> for SerialPort {
///     fn send(&self, message: &[u8]) -> anyhow::Result<()> {
///         self.write_frame(message).context("serial write failed")
///     }
///
///     fn attach(&self, hook: DispatchHook<u8>) -> HookId {
///         self.readers.lock().unwrap().insert(hook)
///     }
///
///     fn detach(&self, id: HookId) -> bool {
///         self.readers.lock().unwrap().remove(id)
///     }
/// }
/// ```
pub trait Transport<T>: Send + Sync {
    /// Send `message`. Called synchronously by the send-and-wait operations;
    /// errors are returned to their caller unchanged.
    fn send(&self, message: &[T]) -> Result<()>;

    /// Start invoking `hook` for every inbound message.
    fn attach(&self, hook: DispatchHook<T>) -> HookId;

    /// Stop invoking the hook identified by `id`. Returns false if it was not
    /// attached.
    fn detach(&self, id: HookId) -> bool;
}

impl<T, Tr> Transport<T> for Arc<Tr>
where
    Tr: Transport<T> + ?Sized,
{
    fn send(&self, message: &[T]) -> Result<()> {
        (**self).send(message)
    }

    fn attach(&self, hook: DispatchHook<T>) -> HookId {
        (**self).attach(hook)
    }

    fn detach(&self, id: HookId) -> bool {
        (**self).detach(id)
    }
}
