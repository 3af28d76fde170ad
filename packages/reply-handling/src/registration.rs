//! RAII registration of patterns for the duration of a wait.

use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::guard::RegistryGuard;
use crate::pattern::PatternRegistry;

/// RAII guard that keeps (pattern, value) pairs registered while it lives.
///
/// Every pair is added under a single write-lock acquisition in
/// [`register`](Self::register), and every pair is removed under a single
/// write-lock acquisition when the guard is dropped. Drop runs on a normal
/// return, on `?` propagation, during unwinding, and when an async wait
/// holding the guard is dropped mid-flight, so no registration outlives the
/// call that made it.
///
/// Removal tolerates entries that are already gone.
#[must_use = "patterns are unregistered as soon as the registration is dropped"]
pub struct ScopedRegistration<'g, T, V, R>
where
    R: PatternRegistry<T, V>,
{
    guard: &'g RegistryGuard<R>,
    entries: Vec<(Vec<T>, V)>,
    _registry: PhantomData<fn(&R)>,
}

impl<'g, T, V, R> ScopedRegistration<'g, T, V, R>
where
    R: PatternRegistry<T, V>,
    V: Clone,
{
    /// Register every entry in `guard`'s registry.
    pub fn register(guard: &'g RegistryGuard<R>, entries: Vec<(Vec<T>, V)>) -> Self {
        guard.with_write(|registry| {
            for (pattern, value) in &entries {
                registry.add(pattern, value.clone());
            }
        });
        debug!(entries = entries.len(), "registered patterns");

        Self {
            guard,
            entries,
            _registry: PhantomData,
        }
    }

    /// Number of entries this scope registered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if this scope registered nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The registered entries, in registration order.
    pub fn entries(&self) -> &[(Vec<T>, V)] {
        &self.entries
    }
}

impl<T, V, R> Drop for ScopedRegistration<'_, T, V, R>
where
    R: PatternRegistry<T, V>,
{
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        let entries = std::mem::take(&mut self.entries);
        let missing = self.guard.with_write(|registry| {
            entries
                .iter()
                .filter(|(pattern, value)| !registry.remove(pattern, value))
                .count()
        });

        if missing > 0 {
            warn!(missing, "some registrations were already removed");
        }
        debug!(entries = entries.len(), "released patterns");
    }
}
