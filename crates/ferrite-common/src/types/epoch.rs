//! The engine's logical clock.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonically increasing logical clock tick.
///
/// Epochs are the unit of durability and of snapshot boundaries: the log
/// manager advances the durable epoch once the write-ahead log is synced,
/// and every snapshot covers exactly the logs with
/// `epoch <= valid_until_epoch`.
///
/// Epoch zero is the invalid sentinel; the clock starts ticking at one.
///
/// # Example
///
/// ```rust
/// use ferrite_common::types::Epoch;
///
/// let epoch = Epoch::new(42);
/// assert!(epoch.is_valid());
/// assert_eq!(epoch.next().as_u64(), 43);
/// assert!(!Epoch::INVALID.is_valid());
/// ```
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// Invalid epoch, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First valid epoch.
    pub const FIRST: Self = Self(1);

    /// Creates an epoch from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next epoch.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid epoch.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Epoch(INVALID)")
        } else {
            write!(f, "Epoch({})", self.0)
        }
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Epoch {
    #[inline]
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<Epoch> for u64 {
    #[inline]
    fn from(epoch: Epoch) -> Self {
        epoch.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_basics() {
        let epoch = Epoch::new(42);
        assert_eq!(epoch.as_u64(), 42);
        assert!(epoch.is_valid());
        assert!(!Epoch::INVALID.is_valid());
        assert_eq!(epoch.next().as_u64(), 43);
    }

    #[test]
    fn test_epoch_ordering() {
        assert!(Epoch::new(1) < Epoch::new(2));
        assert!(Epoch::INVALID < Epoch::FIRST);
    }

    #[test]
    fn test_epoch_default_is_invalid() {
        assert_eq!(Epoch::default(), Epoch::INVALID);
    }
}
