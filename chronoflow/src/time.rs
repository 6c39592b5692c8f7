//! Engine time: the logical clock every node firing is ordered by.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A monotonically non-decreasing engine timestamp with nanosecond resolution.
///
/// The distinguished [`EngineTime::MIN_DT`] sentinel means "never set": a
/// freshly constructed time-series carries it until its first modification.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EngineTime(i64);

/// A duration in engine-time resolution. May be negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EngineTimeDelta(i64);

impl EngineTime {
    /// The "never set" sentinel, ordered before every real time.
    pub const MIN_DT: EngineTime = EngineTime(i64::MIN);
    /// The earliest real engine time.
    pub const MIN: EngineTime = EngineTime(i64::MIN + 1);
    /// The latest representable engine time.
    pub const MAX: EngineTime = EngineTime(i64::MAX);

    /// A time from nanoseconds since the Unix epoch.
    pub const fn from_nanos(nanos: i64) -> Self {
        EngineTime(nanos)
    }

    /// Nanoseconds since the Unix epoch.
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// A time from whole seconds since the Unix epoch.
    pub const fn from_secs(secs: i64) -> Self {
        EngineTime(secs * 1_000_000_000)
    }

    /// The current wall-clock instant as an engine time.
    pub fn wall_clock() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        EngineTime(since_epoch.as_nanos().min(i64::MAX as u128) as i64)
    }

    /// True unless this is the [`EngineTime::MIN_DT`] sentinel.
    pub const fn is_set(self) -> bool {
        self.0 != i64::MIN
    }

    /// The wall-clock `Duration` from `self` until `later`, `None` if `later`
    /// is not actually later.
    pub fn until(self, later: EngineTime) -> Option<Duration> {
        let gap = later.0.checked_sub(self.0)?;
        (gap > 0).then(|| Duration::from_nanos(gap as u64))
    }

    /// The immediately following engine time. Saturates at [`EngineTime::MAX`].
    pub const fn next(self) -> Self {
        EngineTime(self.0.saturating_add(1))
    }
}

impl EngineTimeDelta {
    /// Zero duration.
    pub const ZERO: EngineTimeDelta = EngineTimeDelta(0);

    /// A delta from nanoseconds.
    pub const fn from_nanos(nanos: i64) -> Self {
        EngineTimeDelta(nanos)
    }

    /// A delta from whole seconds.
    pub const fn from_secs(secs: i64) -> Self {
        EngineTimeDelta(secs * 1_000_000_000)
    }

    /// A delta from milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        EngineTimeDelta(millis * 1_000_000)
    }

    /// Nanoseconds in this delta.
    pub const fn nanos(self) -> i64 {
        self.0
    }
}

impl Add<EngineTimeDelta> for EngineTime {
    type Output = EngineTime;
    fn add(self, rhs: EngineTimeDelta) -> EngineTime {
        debug_assert!(self.is_set(), "arithmetic on the MIN_DT sentinel");
        EngineTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<EngineTimeDelta> for EngineTime {
    fn add_assign(&mut self, rhs: EngineTimeDelta) {
        *self = *self + rhs;
    }
}

impl Sub<EngineTime> for EngineTime {
    type Output = EngineTimeDelta;
    fn sub(self, rhs: EngineTime) -> EngineTimeDelta {
        EngineTimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_set() {
            write!(f, "MIN_DT")
        } else {
            write!(
                f,
                "{}.{:09}",
                self.0.div_euclid(1_000_000_000),
                self.0.rem_euclid(1_000_000_000)
            )
        }
    }
}

impl fmt::Debug for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_orders_first() {
        assert!(EngineTime::MIN_DT < EngineTime::MIN);
        assert!(EngineTime::MIN_DT < EngineTime::from_nanos(0));
        assert!(!EngineTime::MIN_DT.is_set());
        assert!(EngineTime::from_nanos(0).is_set());
    }

    #[test]
    fn arithmetic() {
        let t = EngineTime::from_secs(10);
        assert_eq!(t + EngineTimeDelta::from_secs(2), EngineTime::from_secs(12));
        assert_eq!(EngineTime::from_secs(12) - t, EngineTimeDelta::from_secs(2));
        assert_eq!(t.until(EngineTime::from_secs(11)), Some(Duration::from_secs(1)));
        assert_eq!(t.until(t), None);
    }
}
