//! Async correlation waiter.
//!
//! [`AsyncReplyHandler`] has the same operations and outcomes as
//! [`BlockingReplyHandler`](crate::BlockingReplyHandler) but suspends the
//! calling task instead of parking a thread.
//!
//! # Cancellation
//!
//! Dropping a pending wait future (for example when it loses a
//! `tokio::select!`) drops its registration scope, so every pattern it
//! registered is removed immediately. No reply delivered afterwards can reach
//! it.
//!
//! # Runtime
//!
//! Deadlines are armed with `tokio::time`; waits with a finite [`Timeout`]
//! must be polled inside a Tokio runtime with the time driver enabled.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::try_join_all;
use tracing::debug;

use crate::blocking::owned;
use crate::dispatch::Correlator;
use crate::error::{ReplyError, Result};
use crate::pattern::Sentinels;
use crate::slot::Cancelled;
use crate::timeout::Timeout;
use crate::transport::{HookId, Transport};
use crate::{describe_patterns, Content};

/// Asynchronously awaits replies matching wildcard patterns.
///
/// # Example
///
/// ```ignore
/// let bus = MessageBus::<char>::new();
/// let handler = AsyncReplyHandler::new(bus.clone(), Sentinels::new('?', '*'));
///
/// let reply = handler
///     .send_and_match_any(&chars("AT"), Timeout::millis(500), &[chars("OK*")])
///     .await?;
/// ```
pub struct AsyncReplyHandler<T: Content> {
    correlator: Arc<Correlator<T>>,
    transport: Arc<dyn Transport<T>>,
    hook: HookId,
}

impl<T: Content> AsyncReplyHandler<T> {
    /// Build a handler over `transport`, interpreting patterns with
    /// `sentinels`.
    pub fn new<Tr>(transport: Tr, sentinels: Sentinels<T>) -> Self
    where
        Tr: Transport<T> + 'static,
    {
        let transport: Arc<dyn Transport<T>> = Arc::new(transport);
        let correlator = Arc::new(Correlator::new(sentinels));

        let weak: Weak<Correlator<T>> = Arc::downgrade(&correlator);
        let hook = transport.attach(Arc::new(move |message: &[T]| {
            if let Some(correlator) = weak.upgrade() {
                correlator.dispatch(message);
            }
        }));
        debug!(%hook, "async reply handler attached");

        Self {
            correlator,
            transport,
            hook,
        }
    }

    /// Wait for the first inbound message matching any of `patterns`.
    pub async fn match_any<P: AsRef<[T]>>(
        &self,
        timeout: Timeout,
        patterns: &[P],
    ) -> Result<Vec<T>> {
        self.await_any(None, timeout, owned(patterns)).await
    }

    /// Wait until every pattern has been matched. Results are in pattern
    /// order.
    pub async fn match_all<P: AsRef<[T]>>(
        &self,
        timeout: Timeout,
        patterns: &[P],
    ) -> Result<Vec<Vec<T>>> {
        self.await_all(None, timeout, owned(patterns)).await
    }

    /// Send `message`, then wait for the first reply matching any of
    /// `patterns`.
    pub async fn send_and_match_any<P: AsRef<[T]>>(
        &self,
        message: &[T],
        timeout: Timeout,
        patterns: &[P],
    ) -> Result<Vec<T>> {
        self.await_any(Some(message), timeout, owned(patterns)).await
    }

    /// Send `message`, then wait for replies matching every pattern.
    pub async fn send_and_match_all<P: AsRef<[T]>>(
        &self,
        message: &[T],
        timeout: Timeout,
        patterns: &[P],
    ) -> Result<Vec<Vec<T>>> {
        self.await_all(Some(message), timeout, owned(patterns)).await
    }

    /// Number of pattern registrations currently held by in-flight waits.
    pub fn pending_registrations(&self) -> usize {
        self.correlator.pending_registrations()
    }

    /// The wildcard values patterns are interpreted with.
    pub fn sentinels(&self) -> Sentinels<T> {
        self.correlator.sentinels()
    }

    async fn await_any(
        &self,
        message: Option<&[T]>,
        timeout: Timeout,
        patterns: Vec<Vec<T>>,
    ) -> Result<Vec<T>> {
        if patterns.is_empty() {
            return Err(ReplyError::NoPatterns);
        }

        let deadline = timeout.deadline();
        let (slot, _scope) = self.correlator.register_any(&patterns);

        if let Some(message) = message {
            self.transport.send(message).map_err(ReplyError::Transport)?;
        }

        slot.wait_async(deadline).await.map_err(|Cancelled| {
            let patterns = describe_patterns(&patterns);
            debug!(%timeout, %patterns, "match_any timed out");
            ReplyError::timeout(patterns)
        })
    }

    async fn await_all(
        &self,
        message: Option<&[T]>,
        timeout: Timeout,
        patterns: Vec<Vec<T>>,
    ) -> Result<Vec<Vec<T>>> {
        let deadline = timeout.deadline();
        let (slots, _scope) = self.correlator.register_all(&patterns);

        if let Some(message) = message {
            self.transport.send(message).map_err(ReplyError::Transport)?;
        }

        let waits = slots.iter().map(|slot| slot.wait_async(deadline));
        match try_join_all(waits).await {
            Ok(results) => Ok(results),
            Err(Cancelled) => {
                for slot in &slots {
                    slot.try_cancel();
                }
                let patterns = describe_patterns(&patterns);
                debug!(%timeout, %patterns, "match_all timed out");
                Err(ReplyError::timeout(patterns))
            }
        }
    }
}

impl<T: Content> Drop for AsyncReplyHandler<T> {
    fn drop(&mut self) {
        if self.transport.detach(self.hook) {
            debug!(hook = %self.hook, "async reply handler detached");
        }
    }
}

impl<T: Content> fmt::Debug for AsyncReplyHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncReplyHandler")
            .field("hook", &self.hook)
            .field("pending_registrations", &self.pending_registrations())
            .finish()
    }
}
