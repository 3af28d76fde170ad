//! Standing pattern subscriptions.
//!
//! A wait is single-shot: one slot, one fulfilment, then the registration is
//! gone. A [`Subscription`] is the opposite. It stays attached until its
//! handle is dropped and invokes its callback for *every* inbound message
//! that matches its pattern.
//!
//! Each subscription keeps its own `PatternDictionary<T, bool>` holding the
//! single entry `pattern → true`; the dictionary is only used to test whether
//! a message belongs to the pattern.
//!
//! # Callback Rules
//!
//! - Invoked synchronously from the dispatch hook's calling context
//! - One invocation per matching message
//! - Invocations may run concurrently with each other; the callback owns the
//!   synchronisation of any state it touches
//! - Never invoked for a message dispatched after the handle was dropped

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::guard::RegistryGuard;
use crate::pattern::{PatternDictionary, PatternRegistry, Sentinels};
use crate::Content;

/// Callback invoked with every message matching a subscription's pattern.
pub type SubscriptionCallback<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct SubscriptionEntry<T: Content> {
    matcher: PatternDictionary<T, bool>,
    callback: SubscriptionCallback<T>,
}

/// The live subscriptions of one blocking waiter.
pub(crate) struct SubscriptionSet<T: Content> {
    sentinels: Sentinels<T>,
    entries: RegistryGuard<HashMap<u64, SubscriptionEntry<T>>>,
    next_id: AtomicU64,
}

impl<T: Content> SubscriptionSet<T> {
    pub(crate) fn new(sentinels: Sentinels<T>) -> Self {
        Self {
            sentinels,
            entries: RegistryGuard::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Attach `callback` to `pattern` and return the owning handle.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        pattern: Vec<T>,
        callback: SubscriptionCallback<T>,
    ) -> Subscription<T> {
        let mut matcher = PatternDictionary::new(self.sentinels.clone());
        matcher.add(&pattern, true);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .with_write(|entries| entries.insert(id, SubscriptionEntry { matcher, callback }));
        debug!(id, "subscription attached");

        Subscription {
            set: Arc::downgrade(self),
            id,
            pattern,
        }
    }

    /// Invoke every subscription whose pattern matches `message`.
    ///
    /// Returns the number of callbacks invoked.
    pub(crate) fn dispatch(&self, message: &[T]) -> usize {
        let callbacks: Vec<SubscriptionCallback<T>> = self.entries.with_read(|entries| {
            entries
                .values()
                .filter(|entry| entry.matcher.matches(message))
                .map(|entry| Arc::clone(&entry.callback))
                .collect()
        });

        // Invoke outside the lock so callbacks may subscribe or unsubscribe
        for callback in &callbacks {
            callback(message);
        }
        callbacks.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.with_read(|entries| entries.len())
    }

    fn remove(&self, id: u64) -> bool {
        self.entries
            .with_write(|entries| entries.remove(&id))
            .is_some()
    }
}

/// Handle keeping a standing subscription attached.
///
/// Dropping the handle detaches the callback.
///
/// # Example
///
/// ```ignore
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = seen.clone();
///
/// let subscription = handler.subscribe(pattern, move |_msg: &[char]| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// // ... messages arrive ...
///
/// drop(subscription); // no further callbacks
/// ```
#[must_use = "the subscription is detached as soon as the handle is dropped"]
pub struct Subscription<T: Content> {
    set: Weak<SubscriptionSet<T>>,
    id: u64,
    pattern: Vec<T>,
}

impl<T: Content> Subscription<T> {
    /// The pattern this subscription listens for.
    pub fn pattern(&self) -> &[T] {
        &self.pattern
    }

    /// Returns true while the owning waiter is alive and this handle is
    /// still attached.
    pub fn is_active(&self) -> bool {
        self.set
            .upgrade()
            .map(|set| set.entries.with_read(|entries| entries.contains_key(&self.id)))
            .unwrap_or(false)
    }

    /// Detach the callback now. Equivalent to dropping the handle.
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T: Content> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            if set.remove(self.id) {
                debug!(id = self.id, "subscription detached");
            }
        }
    }
}

impl<T: Content> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &crate::describe_sequence(&self.pattern))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn counting(counter: &Arc<AtomicUsize>) -> SubscriptionCallback<char> {
        let counter = Arc::clone(counter);
        Arc::new(move |_msg: &[char]| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_on_every_match_until_dropped() {
        let set = Arc::new(SubscriptionSet::new(Sentinels::new('?', '*')));
        let count = Arc::new(AtomicUsize::new(0));

        let subscription = set.subscribe(chars("Hi*"), counting(&count));
        assert!(subscription.is_active());

        assert_eq!(set.dispatch(&chars("Hi there!")), 1);
        assert_eq!(set.dispatch(&chars("Hi again")), 1);
        assert_eq!(set.dispatch(&chars("Bye")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(subscription);
        assert_eq!(set.dispatch(&chars("Hi there!")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_independent_subscriptions() {
        let set = Arc::new(SubscriptionSet::new(Sentinels::new('?', '*')));
        let all = Arc::new(AtomicUsize::new(0));
        let short = Arc::new(AtomicUsize::new(0));

        let _all = set.subscribe(chars("*"), counting(&all));
        let short_sub = set.subscribe(chars("??"), counting(&short));

        set.dispatch(&chars("ok"));
        set.dispatch(&chars("long"));
        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(short.load(Ordering::SeqCst), 1);

        short_sub.cancel();
        set.dispatch(&chars("ok"));
        assert_eq!(all.load(Ordering::SeqCst), 3);
        assert_eq!(short.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_outliving_set() {
        let set = Arc::new(SubscriptionSet::new(Sentinels::new('?', '*')));
        let count = Arc::new(AtomicUsize::new(0));
        let subscription = set.subscribe(chars("*"), counting(&count));

        drop(set);
        assert!(!subscription.is_active());
        assert_eq!(subscription.pattern(), chars("*").as_slice());
        // Dropping after the set is gone is a no-op
        drop(subscription);
    }

    #[test]
    fn test_callback_may_subscribe_reentrantly() {
        let set = Arc::new(SubscriptionSet::new(Sentinels::new('?', '*')));
        let inner = Arc::new(std::sync::Mutex::new(Vec::new()));

        let nested_set = Arc::clone(&set);
        let nested = Arc::clone(&inner);
        let _outer = set.subscribe(
            chars("go"),
            Arc::new(move |_msg: &[char]| {
                let sub = nested_set.subscribe(chars("*"), Arc::new(|_msg: &[char]| {}));
                nested.lock().unwrap().push(sub);
            }),
        );

        set.dispatch(&chars("go"));
        assert_eq!(set.len(), 2);
    }
}
