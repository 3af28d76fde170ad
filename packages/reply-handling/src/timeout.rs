//! Wait deadlines.

use std::fmt;
use std::time::{Duration, Instant};

/// How long a wait may last before its slots are cancelled.
///
/// `Infinite` arms no timer at all: the wait ends only when a matching
/// message arrives (or, for the async flavor, when the future is dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeout {
    /// Wait until a match arrives.
    #[default]
    Infinite,
    /// Cancel the wait once this much time has elapsed.
    After(Duration),
}

impl Timeout {
    /// Build a timeout from a millisecond count.
    ///
    /// Negative counts mean "no timeout", so the conventional `-1` maps to
    /// [`Timeout::Infinite`].
    pub fn millis(ms: i64) -> Self {
        match u64::try_from(ms) {
            Ok(ms) => Self::After(Duration::from_millis(ms)),
            Err(_) => Self::Infinite,
        }
    }

    /// Returns true if no deadline is armed.
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }

    /// The absolute deadline for a wait starting at `start`.
    ///
    /// Returns `None` for `Infinite` and for durations too large to represent.
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::After(duration) => start.checked_add(*duration),
        }
    }

    /// The absolute deadline for a wait starting now.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline_from(Instant::now())
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        match duration {
            Some(duration) => Self::After(duration),
            None => Self::Infinite,
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => write!(f, "infinite"),
            Self::After(duration) => write!(f, "{}ms", duration.as_millis()),
        }
    }
}
