//! # Reply Handling
//!
//! Pattern-correlated request/reply waiting over an asynchronous message bus.
//!
//! Instead of tagging requests with correlation IDs, a caller describes what
//! a matching reply *looks like*: a sequence of content items that may contain
//! two reserved sentinel values, one standing for "any single item" and one for
//! "any run of items". The caller is released exactly when an inbound message
//! satisfies that pattern, or when its deadline elapses.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!   │ match_any / match_all / send_and_match_*
//!   ▼
//! Waiter (blocking or async)
//!   │ ScopedRegistration::register ──► RegistryGuard<PatternDictionary>
//!   │ transport.send()                          ▲
//!   │                                           │ with_read(collect)
//!   ▼                                           │
//! CompletionSlot::wait ◄── try_fulfill ── Correlator::dispatch ◄── Transport hook
//!   │
//!   ▼ drop(ScopedRegistration) removes every entry it added
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Single delivery** - a slot leaves `Pending` exactly once, to either
//!    `Fulfilled` or `Cancelled`
//! 2. **No leak** - every registration is removed when the call that created
//!    it returns, fails, times out or (async) is dropped
//! 3. **Register before send** - a reply produced synchronously by the
//!    transport in response to `send` is never missed
//! 4. **Fulfil outside the lock** - dispatch collects under the read lock and
//!    fulfils after releasing it, so woken waiters may re-enter the registry
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reply_handling::{BlockingReplyHandler, MessageBus, Sentinels, Timeout};
//!
//! let bus = Arc::new(MessageBus::<char>::new());
//! let handler = BlockingReplyHandler::new(bus.clone(), Sentinels::new('?', '*'));
//!
//! let hello: Vec<char> = "Hello, world!".chars().collect();
//! let pattern: Vec<char> = "*world?".chars().collect();
//!
//! let reply = handler.send_and_match_any(&hello, Timeout::millis(100), &[pattern])?;
//! assert_eq!(reply, hello);
//! ```

// Core modules
mod blocking;
mod dispatch;
mod error;
mod guard;
mod registration;
mod slot;
mod subscription;
mod suspending;
mod timeout;

// Collaborator contracts and their in-process implementations
mod bus;
mod pattern;
mod transport;

// CAN frame content type
pub mod can;


use std::any::Any;
use std::fmt;

// Re-export the waiters (primary entry points)
pub use blocking::BlockingReplyHandler;
pub use suspending::AsyncReplyHandler;

// Re-export subscription types
pub use subscription::{Subscription, SubscriptionCallback};

// Re-export correlation building blocks
pub use dispatch::{Correlator, SlotRegistry, SlotScope};
pub use guard::RegistryGuard;
pub use registration::ScopedRegistration;
pub use slot::{Cancelled, CompletionSlot, SlotRef, SlotState};
pub use timeout::Timeout;

// Re-export error types
pub use error::{ReplyError, Result};

// Re-export collaborator contracts
pub use bus::MessageBus;
pub use pattern::{PatternDictionary, PatternRegistry, Sentinels};
pub use transport::{DispatchHook, HookId, Transport};

/// Marker trait for the items messages and patterns are made of.
///
/// Items are compared by total order when matched against a pattern, cloned
/// into every reply handed to a waiter, and shared across the threads that
/// deliver inbound messages.
///
/// This trait is automatically implemented for every type that satisfies
/// its bounds, so `char`, `u8` and domain enums work out of the box.
pub trait Content: Ord + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Content for T where T: Ord + Clone + fmt::Debug + Send + Sync + 'static {}

/// Render a list of patterns for diagnostics: `p1, p2, p3`.
pub(crate) fn describe_patterns<T: Content>(patterns: &[Vec<T>]) -> String {
    patterns
        .iter()
        .map(|pattern| describe_sequence(pattern))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a single sequence. `char` content is written back to back as text;
/// anything else is a bracketed list of `Debug` renderings.
pub(crate) fn describe_sequence<T: Content>(sequence: &[T]) -> String {
    let text: Option<String> = sequence
        .iter()
        .map(|item| (item as &dyn Any).downcast_ref::<char>().copied())
        .collect();
    match text {
        Some(text) => text,
        None => {
            let rendered: Vec<String> = sequence.iter().map(|item| format!("{item:?}")).collect();
            format!("[{}]", rendered.join(" "))
        }
    }
}
