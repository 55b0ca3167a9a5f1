// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic host time, durations and timebase conversion.
//!
//! [`HostTime`] is a point in time in the ticks of whatever clock backs a
//! driver or timer host (`performance.now()` microseconds on the web,
//! `Instant`-derived nanoseconds natively, virtual ticks in tests).
//!
//! [`Timebase`] carries the rational ticks → nanoseconds factor. Schedulers
//! are configured in milliseconds and hertz; those values are converted into
//! tick [`Duration`]s through the timebase of the clock that will measure them.
//!
//! All multiplicative arithmetic uses `u128` intermediates to avoid overflow.

use core::fmt;
use core::ops::{Add, Sub};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// A point in time expressed as clock ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the duration between `self` and an earlier time, or zero if
    /// `earlier` is after `self`.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Saturating addition of a duration.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }

    /// Checked addition of a duration.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, duration: Duration) -> Option<Self> {
        match self.0.checked_add(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for HostTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// Rational conversion factor from ticks to nanoseconds.
///
/// `nanoseconds = ticks * numer / denom`
///
/// Every [`TimingDriver`](crate::driver::TimingDriver) and
/// [`TimerHost`](crate::timer::TimerHost) reports the timebase of its clock.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    /// Numerator of the ticks-to-nanoseconds ratio.
    pub numer: u32,
    /// Denominator of the ticks-to-nanoseconds ratio.
    pub denom: u32,
}

impl Timebase {
    /// A timebase where ticks are already nanoseconds (1:1).
    pub const NANOS: Self = Self { numer: 1, denom: 1 };

    /// A timebase where one tick is one microsecond.
    pub const MICROS: Self = Self {
        numer: 1000,
        denom: 1,
    };

    /// Creates a new timebase with the given numerator and denominator.
    ///
    /// # Panics
    ///
    /// Panics if `denom` is zero.
    #[inline]
    #[must_use]
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(denom != 0, "timebase denominator must not be zero");
        Self { numer, denom }
    }

    /// Converts a tick count to nanoseconds.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn ticks_to_nanos(self, ticks: u64) -> u64 {
        let wide = ticks as u128 * self.numer as u128 / self.denom as u128;
        wide as u64
    }

    /// Converts nanoseconds to a tick count.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn nanos_to_ticks(self, nanos: u64) -> u64 {
        let wide = nanos as u128 * self.denom as u128 / self.numer as u128;
        wide as u64
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timebase({}/{})", self.numer, self.denom)
    }
}

/// A duration in clock ticks.
///
/// Arithmetic uses the same tick units as [`HostTime`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Converts this duration to nanoseconds using the given timebase.
    #[inline]
    #[must_use]
    pub const fn to_nanos(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0)
    }

    /// Creates a duration from a nanosecond value and timebase.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(nanos))
    }

    /// Creates a duration from fractional milliseconds.
    ///
    /// Negative, NaN and infinite inputs clamp to [`Duration::ZERO`]; values
    /// beyond the `u64` nanosecond range saturate.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "input is clamped to a finite non-negative value; `as` saturates"
    )]
    pub fn from_millis_f64(millis: f64, timebase: Timebase) -> Self {
        if !millis.is_finite() || millis <= 0.0 {
            return Self::ZERO;
        }
        let nanos = (millis * NANOS_PER_MILLI) as u64;
        Self::from_nanos(nanos, timebase)
    }

    /// Returns the period of a frequency in hertz, or `None` for zero,
    /// negative or non-finite frequencies.
    #[must_use]
    pub fn from_hz(hz: f64, timebase: Timebase) -> Option<Self> {
        if !hz.is_finite() || hz <= 0.0 {
            return None;
        }
        Some(Self::from_millis_f64(1000.0 / hz, timebase))
    }

    /// Converts this duration to fractional milliseconds.
    #[must_use]
    pub fn to_millis_f64(self, timebase: Timebase) -> f64 {
        self.to_nanos(timebase) as f64 / NANOS_PER_MILLI
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_in_microsecond_timebase() {
        let d = Duration::from_millis_f64(16.5, Timebase::MICROS);
        assert_eq!(d, Duration(16_500), "16.5ms is 16500µs");
        assert!(
            (d.to_millis_f64(Timebase::MICROS) - 16.5).abs() < 1e-9,
            "conversion back to millis"
        );
    }

    #[test]
    fn invalid_millis_clamp_to_zero() {
        let tb = Timebase::NANOS;
        assert_eq!(Duration::from_millis_f64(-5.0, tb), Duration::ZERO);
        assert_eq!(Duration::from_millis_f64(f64::NAN, tb), Duration::ZERO);
        assert_eq!(Duration::from_millis_f64(f64::INFINITY, tb), Duration::ZERO);
    }

    #[test]
    fn hz_period() {
        let tb = Timebase::MICROS;
        assert_eq!(Duration::from_hz(10.0, tb), Some(Duration(100_000)));
        assert_eq!(Duration::from_hz(0.0, tb), None);
        assert_eq!(Duration::from_hz(-1.0, tb), None);
        assert_eq!(Duration::from_hz(f64::NAN, tb), None);
    }

    #[test]
    fn timebase_round_trip_macos_style() {
        // 24 MHz tick rate.
        let tb = Timebase::new(125, 3);
        assert_eq!(tb.ticks_to_nanos(24_000_000), 1_000_000_000, "24 MHz → 1s");
        assert_eq!(tb.nanos_to_ticks(1_000_000_000), 24_000_000);
    }

    #[test]
    fn host_time_duration_ops() {
        let t = HostTime(1000);
        let d = Duration(200);
        assert_eq!((t + d).ticks(), 1200);
        assert_eq!(t - HostTime(400), Duration(600));
        assert_eq!(t.saturating_duration_since(HostTime(1500)), Duration::ZERO);
        assert_eq!(HostTime(u64::MAX).saturating_add(d), HostTime(u64::MAX));
        assert_eq!(HostTime(u64::MAX).checked_add(d), None);
    }
}
