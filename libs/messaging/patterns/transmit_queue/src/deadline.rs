//! Monotonic expiry values for transmits and drain windows

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

/// A point in monotonic time after which work should be abandoned.
///
/// A deadline created without a duration never expires ("forever").
/// Only [`Instant`] is consulted, so wall-clock adjustments have no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Create a deadline `duration` from now, or a forever deadline for `None`
    pub fn new(duration: Option<Duration>) -> Self {
        match duration {
            Some(duration) => Self::after(duration),
            None => Self::never(),
        }
    }

    /// Deadline that expires `duration` from now
    pub fn after(duration: Duration) -> Self {
        let now = Instant::now();
        Self {
            // Saturate absurdly large durations to "forever"
            expires_at: now.checked_add(duration),
        }
    }

    /// Deadline that never expires
    pub const fn never() -> Self {
        Self { expires_at: None }
    }

    pub fn is_forever(&self) -> bool {
        self.expires_at.is_none()
    }

    /// True once the deadline instant has been reached
    pub fn expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left before expiry; `None` for a forever deadline and zero once expired
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The earlier of two deadlines
    pub fn earliest(self, other: Deadline) -> Deadline {
        std::cmp::min(self, other)
    }

    /// This deadline, but never later than `max` from now
    pub fn capped(self, max: Duration) -> Deadline {
        self.earliest(Deadline::after(max))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.expires_at, other.expires_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expires_at {
            None => write!(f, "forever"),
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    write!(f, "expired {:?} ago", now - at)
                } else {
                    write!(f, "expires in {:?}", at - now)
                }
            }
        }
    }
}
