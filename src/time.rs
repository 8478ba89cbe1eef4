//! Time values for the scheduling engines.
//!
//! Three kinds of time live here:
//!
//! - [`Time`]: an absolute instant in nanoseconds since the Unix epoch.
//!   The wall-clock engines read it from the system clock; the replay
//!   engine treats it as a virtual clock value.
//! - [`TimeDelta`]: a *signed* span in nanoseconds. Relative scheduling
//!   takes a `TimeDelta` so that a negative delay is representable and can
//!   be rejected at the call site instead of silently wrapping.
//! - [`VirtualInstant`]: the pluggable clock-value trait of the
//!   virtual-time engine. Any ordered, offsettable scalar works; `u64`
//!   ticks and [`Time`] are provided.

use core::fmt;
use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An absolute instant, in nanoseconds since the Unix epoch.
///
/// For the wall-clock engines this corresponds to system time. For the
/// replay engine it is a virtual clock value that only moves when advanced
/// explicitly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new time from nanoseconds since epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a new time from milliseconds since epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a new time from seconds since epoch.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Reads the current wall-clock time from the system clock.
    #[must_use]
    pub fn wall() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        Self(nanos)
    }

    /// Returns the time as nanoseconds since epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time as milliseconds since epoch (truncated).
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Returns the time as seconds since epoch (truncated).
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Adds a duration in nanoseconds, saturating on overflow.
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Subtracts a duration in nanoseconds, saturating at zero.
    #[must_use]
    pub const fn saturating_sub_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_sub(nanos))
    }

    /// Shifts this instant by a signed delta, saturating at both ends.
    #[must_use]
    pub const fn offset_by(self, delta: TimeDelta) -> Self {
        if delta.0 >= 0 {
            self.saturating_add_nanos(delta.0 as u64)
        } else {
            self.saturating_sub_nanos(delta.0.unsigned_abs())
        }
    }

    /// Returns the duration between two times in nanoseconds.
    ///
    /// Returns 0 if `self` is before `earlier`.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl core::ops::Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add_nanos(u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

/// A signed span of time, in nanoseconds.
///
/// Relative scheduling operations take a `TimeDelta` rather than a
/// `std::time::Duration` so callers can express a negative delay and the
/// engine can reject it with a range error instead of wrapping.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeDelta(i64);

impl TimeDelta {
    /// The empty span.
    pub const ZERO: Self = Self(0);

    /// The maximum representable span.
    pub const MAX: Self = Self(i64::MAX);

    /// Creates a span from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Creates a span from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a span from seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Creates a span from a `std::time::Duration`, saturating on overflow.
    #[must_use]
    pub fn from_duration(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX))
    }

    /// Returns the span as nanoseconds.
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Returns the span as milliseconds (truncated).
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0 / 1_000_000
    }

    /// Returns true if the span is strictly negative.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Returns true if the span is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Converts to a `std::time::Duration`, clamping negatives to zero.
    #[must_use]
    pub const fn to_duration(self) -> Duration {
        if self.0 <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.0 as u64)
        }
    }
}

impl From<Duration> for TimeDelta {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}

impl fmt::Debug for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeDelta({}ns)", self.0)
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        if abs >= 1_000_000_000 {
            write!(f, "{sign}{}.{:03}s", abs / 1_000_000_000, (abs / 1_000_000) % 1000)
        } else if abs >= 1_000_000 {
            write!(f, "{sign}{}ms", abs / 1_000_000)
        } else if abs >= 1_000 {
            write!(f, "{sign}{}us", abs / 1_000)
        } else {
            write!(f, "{sign}{}ns", abs)
        }
    }
}

/// Clock values the virtual-time engine can run on.
///
/// An implementation is an ordered scalar that can be shifted by a signed
/// delta. The natural [`Ord`] is the default queue ordering; engines may
/// override it with an injected comparer.
pub trait VirtualInstant: Copy + Ord + fmt::Debug + 'static {
    /// The signed span type paired with this instant.
    type Delta: Copy + fmt::Debug + 'static;

    /// The minimum sentinel used as the initial clock value.
    const ORIGIN: Self;

    /// Shifts this instant by a delta, saturating at the representable
    /// bounds.
    #[must_use]
    fn offset(self, delta: Self::Delta) -> Self;

    /// Returns true if the delta is strictly negative.
    fn delta_is_negative(delta: &Self::Delta) -> bool;
}

/// Plain tick counter. The simplest virtual clock.
impl VirtualInstant for u64 {
    type Delta = i64;

    const ORIGIN: Self = 0;

    fn offset(self, delta: Self::Delta) -> Self {
        self.saturating_add_signed(delta)
    }

    fn delta_is_negative(delta: &Self::Delta) -> bool {
        *delta < 0
    }
}

impl VirtualInstant for Time {
    type Delta = TimeDelta;

    const ORIGIN: Self = Self::ZERO;

    fn offset(self, delta: Self::Delta) -> Self {
        self.offset_by(delta)
    }

    fn delta_is_negative(delta: &Self::Delta) -> bool {
        delta.is_negative()
    }
}

/// Compares two instants with the natural order. The default comparer for
/// schedule queues.
#[must_use]
pub fn natural_order<V: Ord>(a: &V, b: &V) -> Ordering {
    a.cmp(b)
}
