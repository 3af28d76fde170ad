//! Reader/writer exclusion around a pattern registry.
//!
//! Matches are collected for every inbound message, while patterns are only
//! added and removed when a wait starts or ends. [`RegistryGuard`] lets any
//! number of dispatches collect concurrently and serialises mutation against
//! everything else. The registry itself is never reachable except through
//! [`with_read`](RegistryGuard::with_read) and
//! [`with_write`](RegistryGuard::with_write), so the lock discipline cannot be
//! skipped by accident.

use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Exclusive owner of a registry, handing out scoped access.
pub struct RegistryGuard<R> {
    inner: RwLock<R>,
}

impl<R> RegistryGuard<R> {
    /// Wrap `registry`.
    pub fn new(registry: R) -> Self {
        Self {
            inner: RwLock::new(registry),
        }
    }

    /// Run `f` under the shared lock. Many readers may run at once.
    pub fn with_read<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&R) -> U,
    {
        let guard = self.read();
        f(&guard)
    }

    /// Run `f` under the exclusive lock.
    pub fn with_write<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&mut R) -> U,
    {
        let mut guard = self.write();
        f(&mut guard)
    }

    /// Consume the guard and return the registry.
    pub fn into_inner(self) -> R {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // A panic inside a closure poisons the lock. The registry operations
    // leave it structurally valid at every step, so recover and keep going.
    fn read(&self) -> RwLockReadGuard<'_, R> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("registry lock was poisoned, recovering for read");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, R> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("registry lock was poisoned, recovering for write");
            poisoned.into_inner()
        })
    }
}

impl<R: Default> Default for RegistryGuard<R> {
    fn default() -> Self {
        Self::new(R::default())
    }
}

impl<R: fmt::Debug> fmt::Debug for RegistryGuard<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RegistryGuard");
        match self.inner.try_read() {
            Ok(registry) => s.field("registry", &*registry),
            Err(_) => s.field("registry", &"<locked>"),
        };
        s.finish()
    }
}
