//! Structured error types for reply handling.
//!
//! `ReplyError` provides pattern-matchable errors instead of a generic
//! `anyhow::Error`, so callers can tell a timeout (recoverable, re-issue the
//! wait) from a failed send (the transport's own error, preserved as the
//! source).
//!
//! # The Cleanup Rule
//!
//! > **No error path skips deregistration.**
//!
//! Every registration is owned by a [`ScopedRegistration`](crate::ScopedRegistration)
//! whose `Drop` removes it, so returning any of these errors through `?`
//! already leaves the registry clean.
//!
//! # Example
//!
//! ```ignore
//! use reply_handling::ReplyError;
//!
//! match handler.send_and_match_any(&request, Timeout::millis(50), &[pattern]) {
//!     Ok(reply) => println!("reply: {:?}", reply),
//!     Err(ReplyError::Timeout { patterns }) => eprintln!("no reply for {}", patterns),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use thiserror::Error;

/// Errors returned by the correlation waiters.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The deadline elapsed before any (or, for `match_all`, every) pattern
    /// matched. Carries the rendered list of awaited patterns.
    #[error("the wait action has timed out for the pattern(s): <{patterns}>")]
    Timeout { patterns: String },

    /// The transport's `send` failed. The original error is the source.
    #[error("failed to send message: {0}")]
    Transport(#[source] anyhow::Error),

    /// `match_any` was called without any pattern to wait for.
    #[error("at least one pattern is required to wait for a match")]
    NoPatterns,
}

impl ReplyError {
    /// Build a timeout error naming the awaited patterns.
    pub(crate) fn timeout(patterns: impl Into<String>) -> Self {
        Self::Timeout {
            patterns: patterns.into(),
        }
    }

    /// Returns true if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReplyError>;
