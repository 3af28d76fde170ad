//! Matching inbound messages against registered waits.
//!
//! [`Correlator`] owns the guarded pattern registry shared by every wait a
//! waiter has in flight. Its [`dispatch`](Correlator::dispatch) is the body of
//! the hook each waiter attaches to its transport:
//!
//! ```text
//! inbound message
//!  → with_read(collect)   ← shared lock, concurrent with other dispatches
//!  → release lock
//!  → try_fulfill(message) for every collected slot
//! ```
//!
//! Fulfilment happens after the lock is released. A fulfilled waiter may
//! resume immediately and register its next wait, which needs the write lock.

use tracing::trace;

use crate::guard::RegistryGuard;
use crate::pattern::{PatternDictionary, PatternRegistry, Sentinels};
use crate::registration::ScopedRegistration;
use crate::slot::SlotRef;
use crate::Content;

/// Registry of reply slots keyed by pattern.
pub type SlotRegistry<T> = PatternDictionary<T, SlotRef<T>>;

/// Registration scope over a [`SlotRegistry`].
pub type SlotScope<'g, T> = ScopedRegistration<'g, T, SlotRef<T>, SlotRegistry<T>>;

/// Guarded slot registry plus the dispatch algorithm over it.
pub struct Correlator<T: Content> {
    registry: RegistryGuard<SlotRegistry<T>>,
}

impl<T: Content> Correlator<T> {
    /// Create a correlator whose patterns use `sentinels` as wildcards.
    pub fn new(sentinels: Sentinels<T>) -> Self {
        Self {
            registry: RegistryGuard::new(PatternDictionary::new(sentinels)),
        }
    }

    /// Register every (pattern, slot) pair for the lifetime of the returned
    /// scope.
    pub fn register(&self, entries: Vec<(Vec<T>, SlotRef<T>)>) -> SlotScope<'_, T> {
        ScopedRegistration::register(&self.registry, entries)
    }

    /// Register every pattern against one shared slot: the first message
    /// matching any of them fulfils it.
    pub fn register_any(&self, patterns: &[Vec<T>]) -> (SlotRef<T>, SlotScope<'_, T>) {
        let slot = SlotRef::new();
        let entries = patterns
            .iter()
            .map(|pattern| (pattern.clone(), slot.clone()))
            .collect();
        (slot, self.register(entries))
    }

    /// Register each pattern against its own slot. Slots are returned in
    /// pattern order.
    pub fn register_all(&self, patterns: &[Vec<T>]) -> (Vec<SlotRef<T>>, SlotScope<'_, T>) {
        let slots: Vec<SlotRef<T>> = patterns.iter().map(|_| SlotRef::new()).collect();
        let entries = patterns
            .iter()
            .cloned()
            .zip(slots.iter().cloned())
            .collect();
        (slots, self.register(entries))
    }

    /// Offer an inbound message to every registered wait.
    ///
    /// Returns the number of slots this message fulfilled. Slots that were
    /// already fulfilled or cancelled, and slots reached through more than
    /// one matching pattern, are not counted twice.
    pub fn dispatch(&self, message: &[T]) -> usize {
        let slots = self.registry.with_read(|registry| registry.collect(message));
        if slots.is_empty() {
            return 0;
        }

        let fulfilled = slots
            .iter()
            .filter(|slot| slot.try_fulfill(message.to_vec()))
            .count();
        trace!(
            matched = slots.len(),
            fulfilled,
            "dispatched inbound message"
        );
        fulfilled
    }

    /// Number of live registrations.
    pub fn pending_registrations(&self) -> usize {
        self.registry.with_read(|registry| registry.len())
    }

    /// The wildcard values patterns are interpreted with.
    pub fn sentinels(&self) -> Sentinels<T> {
        self.registry.with_read(|registry| registry.sentinels().clone())
    }
}

impl<T: Content> std::fmt::Debug for Correlator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending_registrations", &self.pending_registrations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotState;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn correlator() -> Correlator<char> {
        Correlator::new(Sentinels::new('?', '*'))
    }

    #[test]
    fn test_dispatch_fulfils_matching_slot() {
        let correlator = correlator();
        let slot = SlotRef::new();
        let _scope = correlator.register(vec![(chars("*world?"), slot.clone())]);

        assert_eq!(correlator.dispatch(&chars("Hello, world!")), 1);
        assert_eq!(slot.state(), SlotState::Fulfilled(chars("Hello, world!")));
    }

    #[test]
    fn test_dispatch_ignores_non_matching() {
        let correlator = correlator();
        let slot = SlotRef::new();
        let _scope = correlator.register(vec![(chars("Not Hello world?"), slot.clone())]);

        assert_eq!(correlator.dispatch(&chars("Hello, world!")), 0);
        assert!(slot.is_pending());
    }

    #[test]
    fn test_shared_slot_fulfilled_once() {
        let correlator = correlator();
        let slot = SlotRef::new();
        let _scope = correlator.register(vec![
            (chars("Hello*"), slot.clone()),
            (chars("*"), slot.clone()),
        ]);

        // Both patterns match; only one fulfilment is counted
        assert_eq!(correlator.dispatch(&chars("Hello, world!")), 1);
        // A later message cannot overwrite the first
        assert_eq!(correlator.dispatch(&chars("Hello again")), 0);
        assert_eq!(slot.state(), SlotState::Fulfilled(chars("Hello, world!")));
    }

    #[test]
    fn test_independent_waiters_on_equal_patterns() {
        let correlator = correlator();
        let first = SlotRef::new();
        let second = SlotRef::new();
        let _a = correlator.register(vec![(chars("ack"), first.clone())]);
        let _b = correlator.register(vec![(chars("ack"), second.clone())]);

        assert_eq!(correlator.dispatch(&chars("ack")), 2);
        assert!(!first.is_pending());
        assert!(!second.is_pending());
    }

    #[test]
    fn test_cancelled_slot_is_not_fulfilled() {
        let correlator = correlator();
        let slot = SlotRef::new();
        let _scope = correlator.register(vec![(chars("*"), slot.clone())]);

        assert!(slot.try_cancel());
        assert_eq!(correlator.dispatch(&chars("late")), 0);
        assert_eq!(slot.state(), SlotState::Cancelled);
    }

    #[test]
    fn test_register_any_shares_one_slot() {
        let correlator = correlator();
        let (slot, scope) = correlator.register_any(&[chars("a?"), chars("?b")]);
        assert_eq!(scope.len(), 2);
        assert!(scope.entries().iter().all(|(_, s)| *s == slot));

        assert_eq!(correlator.dispatch(&chars("zb")), 1);
        assert_eq!(slot.state(), SlotState::Fulfilled(chars("zb")));
    }

    #[test]
    fn test_register_all_one_slot_per_pattern() {
        let correlator = correlator();
        let (slots, _scope) = correlator.register_all(&[chars("a*"), chars("*b"), chars("c")]);
        assert_eq!(slots.len(), 3);
        assert_ne!(slots[0], slots[1]);

        // "ab" matches the first two patterns only
        assert_eq!(correlator.dispatch(&chars("ab")), 2);
        assert!(!slots[0].is_pending());
        assert!(!slots[1].is_pending());
        assert!(slots[2].is_pending());
    }

    #[test]
    fn test_pending_registrations_tracks_scope() {
        let correlator = correlator();
        assert_eq!(correlator.pending_registrations(), 0);
        {
            let slot = SlotRef::new();
            let _scope = correlator.register(vec![
                (chars("a"), slot.clone()),
                (chars("b"), slot.clone()),
            ]);
            assert_eq!(correlator.pending_registrations(), 2);
        }
        assert_eq!(correlator.pending_registrations(), 0);
        assert_eq!(correlator.sentinels(), Sentinels::new('?', '*'));
    }
}
