//! Blocking correlation waiter.
//!
//! [`BlockingReplyHandler`] parks the calling thread until a reply matching
//! the requested pattern(s) arrives or the deadline elapses. It is the
//! flavor for worker threads and synchronous code; async code should use
//! [`AsyncReplyHandler`](crate::AsyncReplyHandler), which has the same
//! semantics without occupying a thread.
//!
//! # Flow
//!
//! ```text
//! send_and_match_any(msg, timeout, [p1, p2])
//!  → one slot, registered under p1 and p2       (ScopedRegistration)
//!  → transport.send(msg)                        (failure: Transport error)
//!  → slot.wait(deadline)                        (thread parks)
//!       ← dispatch hook fulfils the slot        (any thread)
//!  → drop scope: p1 and p2 unregistered         (every exit path)
//! ```
//!
//! Standing [`Subscription`]s are only offered by this flavor. Their callbacks
//! run synchronously inside the dispatch hook.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::dispatch::Correlator;
use crate::error::{ReplyError, Result};
use crate::pattern::Sentinels;
use crate::slot::Cancelled;
use crate::subscription::{Subscription, SubscriptionSet};
use crate::timeout::Timeout;
use crate::transport::{HookId, Transport};
use crate::{describe_patterns, Content};

/// State reachable from the dispatch hook.
struct Shared<T: Content> {
    correlator: Correlator<T>,
    subscriptions: Arc<SubscriptionSet<T>>,
}

impl<T: Content> Shared<T> {
    fn on_received(&self, message: &[T]) {
        self.correlator.dispatch(message);
        self.subscriptions.dispatch(message);
    }
}

/// Synchronously awaits replies matching wildcard patterns.
///
/// The handler attaches one dispatch hook to its transport when built and
/// detaches it when dropped.
///
/// # Example
///
/// ```ignore
/// let bus = MessageBus::<char>::new();
/// let handler = BlockingReplyHandler::new(bus.clone(), Sentinels::new('?', '*'));
///
/// let replies = handler.send_and_match_all(
///     &chars("Hi there!"),
///     Timeout::millis(1000),
///     &[chars("*"), chars("?? ?????!"), chars("Hi there!")],
/// )?;
/// assert_eq!(replies.len(), 3);
/// ```
pub struct BlockingReplyHandler<T: Content> {
    shared: Arc<Shared<T>>,
    transport: Arc<dyn Transport<T>>,
    hook: HookId,
}

impl<T: Content> BlockingReplyHandler<T> {
    /// Build a handler over `transport`, interpreting patterns with
    /// `sentinels`.
    pub fn new<Tr>(transport: Tr, sentinels: Sentinels<T>) -> Self
    where
        Tr: Transport<T> + 'static,
    {
        let transport: Arc<dyn Transport<T>> = Arc::new(transport);
        let shared = Arc::new(Shared {
            correlator: Correlator::new(sentinels.clone()),
            subscriptions: Arc::new(SubscriptionSet::new(sentinels)),
        });

        let weak: Weak<Shared<T>> = Arc::downgrade(&shared);
        let hook = transport.attach(Arc::new(move |message: &[T]| {
            if let Some(shared) = weak.upgrade() {
                shared.on_received(message);
            }
        }));
        debug!(%hook, "blocking reply handler attached");

        Self {
            shared,
            transport,
            hook,
        }
    }

    /// Wait for the first inbound message matching any of `patterns`.
    ///
    /// Returns [`ReplyError::Timeout`] if nothing matched before the
    /// deadline and [`ReplyError::NoPatterns`] if `patterns` is empty.
    pub fn match_any<P: AsRef<[T]>>(&self, timeout: Timeout, patterns: &[P]) -> Result<Vec<T>> {
        self.await_any(None, timeout, owned(patterns))
    }

    /// Wait until every pattern has been matched by some inbound message.
    ///
    /// Results are in pattern order. If any pattern is still unmatched at
    /// the deadline the whole call times out and the matches already
    /// collected are discarded.
    pub fn match_all<P: AsRef<[T]>>(
        &self,
        timeout: Timeout,
        patterns: &[P],
    ) -> Result<Vec<Vec<T>>> {
        self.await_all(None, timeout, owned(patterns))
    }

    /// Send `message`, then wait for the first reply matching any of
    /// `patterns`.
    ///
    /// Patterns are registered before the send, so a reply delivered while
    /// `send` is still running is not missed.
    pub fn send_and_match_any<P: AsRef<[T]>>(
        &self,
        message: &[T],
        timeout: Timeout,
        patterns: &[P],
    ) -> Result<Vec<T>> {
        self.await_any(Some(message), timeout, owned(patterns))
    }

    /// Send `message`, then wait for replies matching every pattern.
    pub fn send_and_match_all<P: AsRef<[T]>>(
        &self,
        message: &[T],
        timeout: Timeout,
        patterns: &[P],
    ) -> Result<Vec<Vec<T>>> {
        self.await_all(Some(message), timeout, owned(patterns))
    }

    /// Invoke `callback` for every inbound message matching `pattern` until
    /// the returned handle is dropped.
    ///
    /// The callback runs on whichever thread delivers the message and may run
    /// concurrently with itself.
    pub fn subscribe<P, F>(&self, pattern: P, callback: F) -> Subscription<T>
    where
        P: AsRef<[T]>,
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        self.shared
            .subscriptions
            .subscribe(pattern.as_ref().to_vec(), Arc::new(callback))
    }

    /// Number of pattern registrations currently held by in-flight waits.
    pub fn pending_registrations(&self) -> usize {
        self.shared.correlator.pending_registrations()
    }

    /// Number of attached subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    /// The wildcard values patterns are interpreted with.
    pub fn sentinels(&self) -> Sentinels<T> {
        self.shared.correlator.sentinels()
    }

    fn await_any(
        &self,
        message: Option<&[T]>,
        timeout: Timeout,
        patterns: Vec<Vec<T>>,
    ) -> Result<Vec<T>> {
        if patterns.is_empty() {
            return Err(ReplyError::NoPatterns);
        }

        let deadline = timeout.deadline();
        let (slot, _scope) = self.shared.correlator.register_any(&patterns);

        if let Some(message) = message {
            self.transport.send(message).map_err(ReplyError::Transport)?;
        }

        slot.wait(deadline).map_err(|Cancelled| {
            let patterns = describe_patterns(&patterns);
            debug!(%timeout, %patterns, "match_any timed out");
            ReplyError::timeout(patterns)
        })
    }

    fn await_all(
        &self,
        message: Option<&[T]>,
        timeout: Timeout,
        patterns: Vec<Vec<T>>,
    ) -> Result<Vec<Vec<T>>> {
        let deadline = timeout.deadline();
        let (slots, _scope) = self.shared.correlator.register_all(&patterns);

        if let Some(message) = message {
            self.transport.send(message).map_err(ReplyError::Transport)?;
        }

        // Every slot shares one absolute deadline, so waiting on them in turn
        // never extends the clock of a later slot.
        let mut results = Vec::with_capacity(slots.len());
        for slot in &slots {
            match slot.wait(deadline) {
                Ok(reply) => results.push(reply),
                Err(Cancelled) => {
                    for slot in &slots {
                        slot.try_cancel();
                    }
                    let patterns = describe_patterns(&patterns);
                    debug!(%timeout, %patterns, "match_all timed out");
                    return Err(ReplyError::timeout(patterns));
                }
            }
        }
        Ok(results)
    }
}

impl<T: Content> Drop for BlockingReplyHandler<T> {
    fn drop(&mut self) {
        if self.transport.detach(self.hook) {
            debug!(hook = %self.hook, "blocking reply handler detached");
        }
    }
}

impl<T: Content> fmt::Debug for BlockingReplyHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingReplyHandler")
            .field("hook", &self.hook)
            .field("pending_registrations", &self.pending_registrations())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

pub(crate) fn owned<T: Clone, P: AsRef<[T]>>(patterns: &[P]) -> Vec<Vec<T>> {
    patterns.iter().map(|p| p.as_ref().to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn text(message: &[char]) -> String {
        message.iter().collect()
    }

    /// Loopback setup: every sent message is immediately received.
    fn setup() -> (MessageBus<char>, BlockingReplyHandler<char>) {
        let bus = MessageBus::new();
        let handler = BlockingReplyHandler::new(bus.clone(), Sentinels::new('?', '*'));
        (bus, handler)
    }

    #[test]
    fn test_match_any_series_and_instance_wildcards() {
        let (_bus, brh) = setup();

        let test = chars("Hello, world!");
        let result = brh
            .send_and_match_any(&test, Timeout::millis(100), &[chars("*world?")])
            .unwrap();

        assert_eq!(result, test);
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_any_times_out() {
        let (_bus, brh) = setup();

        let start = Instant::now();
        let err = brh
            .send_and_match_any(
                &chars("Hello, world!"),
                Timeout::millis(50),
                &[chars("Not Hello world?")],
            )
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("Not Hello world?"));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_any_times_out_on_every_near_miss() {
        let (_bus, brh) = setup();

        let err = brh
            .send_and_match_any(
                &chars("Hello, world!"),
                Timeout::millis(50),
                &[
                    chars("Not Hello world?"),
                    chars("Some other random pattern"),
                    chars("Hello, world! (really close) XD"),
                ],
            )
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Some other random pattern"));
        assert!(message.contains("Hello, world! (really close) XD"));
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_any_one_of_many() {
        let (_bus, brh) = setup();

        let test = chars("Hello, world!");
        let result = brh
            .send_and_match_any(
                &test,
                Timeout::millis(50),
                &[
                    chars("Not Hello world?"),
                    chars("Some other random pattern"),
                    chars("Hello, world! (really close) XD"),
                    chars("Hello*"),
                ],
            )
            .unwrap();

        assert_eq!(result, test);
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_any_requires_patterns() {
        let (_bus, brh) = setup();
        let none: [Vec<char>; 0] = [];
        let err = brh.match_any(Timeout::Infinite, &none).unwrap_err();
        assert!(matches!(err, ReplyError::NoPatterns));
    }

    #[test]
    fn test_match_all_single_pattern() {
        let (_bus, brh) = setup();

        let test = chars("Hi there!");
        let result = brh
            .send_and_match_all(&test, Timeout::millis(1000), &[test.clone()])
            .unwrap();

        assert_eq!(result, vec![test]);
    }

    #[test]
    fn test_match_all_every_pattern_gets_the_message() {
        let (_bus, brh) = setup();

        let test = chars("Hi there!");
        let result = brh
            .send_and_match_all(
                &test,
                Timeout::millis(1000),
                &[chars("*"), chars("?? ?????!"), chars("**"), test.clone()],
            )
            .unwrap();

        assert_eq!(result.len(), 4);
        for r in &result {
            assert_eq!(*r, test);
        }
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_all_repeated() {
        let (_bus, brh) = setup();
        let test = chars("Hi there!");
        let patterns = [chars("*"), chars("?? ?????!"), chars("**"), test.clone()];

        for _ in 0..1000 {
            let result = brh
                .send_and_match_all(&test, Timeout::millis(1000), &patterns)
                .unwrap();
            assert_eq!(result.len(), 4);
            assert!(result.iter().all(|r| *r == test));
        }
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_all_preserves_pattern_order() {
        let (bus, brh) = setup();

        // Replies arrive in the reverse order of the patterns
        let sender = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            for reply in ["third", "second", "first"] {
                sender.publish(&chars(reply));
                thread::sleep(Duration::from_millis(5));
            }
        });

        let result = brh
            .match_all(
                Timeout::millis(2000),
                &[chars("fir*"), chars("sec*"), chars("thi*")],
            )
            .unwrap();
        handle.join().unwrap();

        let result: Vec<String> = result.iter().map(|r| text(r)).collect();
        assert_eq!(result, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_match_all_partial_is_timeout() {
        let (_bus, brh) = setup();

        let err = brh
            .send_and_match_all(
                &chars("Hi there!"),
                Timeout::millis(50),
                &[chars("Hi*"), chars("never")],
            )
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("Hi*, never"));
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_all_shares_one_deadline() {
        let (_bus, brh) = setup();

        let start = Instant::now();
        let err = brh
            .match_all(
                Timeout::millis(50),
                &[chars("never a"), chars("never b"), chars("never c")],
            )
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(120), "took {:?}", elapsed);
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_all_late_first_match_keeps_clock() {
        let (bus, brh) = setup();

        let sender = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            sender.publish(&chars("slow first"));
        });

        let start = Instant::now();
        let err = brh
            .match_all(Timeout::millis(60), &[chars("slow*"), chars("never")])
            .unwrap_err();
        let elapsed = start.elapsed();
        handle.join().unwrap();

        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(130), "took {:?}", elapsed);
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_all_without_patterns_returns_empty() {
        let (_bus, brh) = setup();
        let none: [Vec<char>; 0] = [];
        assert!(brh.match_all(Timeout::Infinite, &none).unwrap().is_empty());
    }

    #[test]
    fn test_reply_from_another_peer() {
        let (bus, brh) = setup();

        // A peer that answers "ping" with "pong" from inside the send
        let peer = bus.clone();
        bus.attach(Arc::new(move |msg: &[char]| {
            if msg == chars("ping").as_slice() {
                peer.publish(&chars("pong"));
            }
        }));

        let reply = brh
            .send_and_match_any(&chars("ping"), Timeout::millis(100), &[chars("po??")])
            .unwrap();
        assert_eq!(text(&reply), "pong");
    }

    #[test]
    fn test_transport_failure_propagates_and_cleans_up() {
        let (bus, brh) = setup();
        bus.set_fail_sends(true);

        let err = brh
            .send_and_match_any(&chars("lost"), Timeout::Infinite, &[chars("*")])
            .unwrap_err();
        assert!(matches!(err, ReplyError::Transport(_)));
        assert_eq!(brh.pending_registrations(), 0);

        let err = brh
            .send_and_match_all(&chars("lost"), Timeout::Infinite, &[chars("*"), chars("?")])
            .unwrap_err();
        assert!(matches!(err, ReplyError::Transport(_)));
        assert_eq!(brh.pending_registrations(), 0);
    }

    #[test]
    fn test_match_any_without_send_waits_for_other_thread() {
        let (bus, brh) = setup();

        let sender = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.publish(&chars("status: ready"));
        });

        let reply = brh
            .match_any(Timeout::Infinite, &[chars("status: *")])
            .unwrap();
        handle.join().unwrap();
        assert_eq!(text(&reply), "status: ready");
    }

    #[test]
    fn test_subscribe_counts_every_match() {
        let (_bus, brh) = setup();
        let received = Arc::new(Mutex::new(Vec::new()));

        let test = chars("Hi there!");
        let count = 100;

        let sink = Arc::clone(&received);
        let subscription = brh.subscribe(chars("*"), move |msg: &[char]| {
            sink.lock().unwrap().push(text(msg));
        });
        assert_eq!(brh.subscription_count(), 1);

        for _ in 0..count {
            brh.send_and_match_any(&test, Timeout::Infinite, &[test.clone()])
                .unwrap();
        }
        drop(subscription);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), count);
        assert!(received.iter().all(|r| r == "Hi there!"));
        assert_eq!(brh.subscription_count(), 0);
    }

    #[test]
    fn test_subscribe_from_another_thread_then_close() {
        let (bus, brh) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let subscription = brh.subscribe(chars("*"), move |_msg: &[char]| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let sender = bus.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                thread::sleep(Duration::from_millis(1));
                sender.send(&chars("blah blah blah blah")).unwrap();
            }
        })
        .join()
        .unwrap();

        subscription.cancel();
        bus.send(&chars("after close")).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_drop_detaches_hook() {
        let (bus, brh) = setup();
        assert_eq!(bus.hook_count(), 1);
        drop(brh);
        assert_eq!(bus.hook_count(), 0);
    }
}
