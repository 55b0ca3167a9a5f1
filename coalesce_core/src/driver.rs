// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timing drivers: one interface over "next frame" and "elapsed interval"
//! tick sources.
//!
//! A [`TimingDriver`] can request a callback at its next tick, cancel an
//! outstanding request, and read the current time. Three families exist:
//!
//! - frame drivers, backed by the platform's next-paint primitive (for
//!   example the web backend's `RafDriver`);
//! - timer-emulated frame drivers, see
//!   [`EmulatedFrameDriver`](crate::hub::EmulatedFrameDriver);
//! - [`NoopDriver`], which can never arm a request.
//!
//! Drivers are shared as `Rc<dyn TimingDriver>` and carry no per-scheduler
//! state.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::fmt;

use crate::time::{HostTime, Timebase};

/// Callback delivered at a tick with the tick's timestamp.
pub type TickCallback = Box<dyn FnOnce(HostTime)>;

/// Token identifying an outstanding [`TimingDriver::request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// Diagnostic tag describing what backs a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriverKind {
    /// Native next-frame primitive.
    Frame,
    /// Plain timers emulating frames.
    Timer,
    /// Nothing; requests always fail.
    None,
}

impl DriverKind {
    /// Returns the short diagnostic tag (`"frame"`, `"timer"` or `"none"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::Timer => "timer",
            Self::None => "none",
        }
    }

    /// Returns `true` for drivers whose tick timestamps are frame times.
    #[must_use]
    pub const fn is_frame_like(self) -> bool {
        matches!(self, Self::Frame)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source of ticks.
///
/// # Contract
///
/// - Each successful [`request`](Self::request) results in at most one
///   invocation of its callback, at the driver's next tick, never
///   synchronously from within `request`.
/// - `request` returns `None` when nothing could be armed. Callers must treat
///   that as an immediate failure.
/// - [`cancel`](Self::cancel) of an id that already fired or was already
///   cancelled is a no-op.
pub trait TimingDriver {
    /// What backs this driver.
    fn kind(&self) -> DriverKind;

    /// Current time on the driver's clock.
    fn now(&self) -> HostTime;

    /// Tick-to-nanosecond factor of [`now`](Self::now) and of tick
    /// timestamps.
    fn timebase(&self) -> Timebase;

    /// Requests `callback` to run at the next tick.
    fn request(&self, callback: TickCallback) -> Option<RequestId>;

    /// Revokes an outstanding request.
    fn cancel(&self, id: RequestId);
}

/// A driver that never arms anything.
///
/// Used as the last-resort fallback where no frame or timer primitive exists.
#[derive(Clone, Copy)]
pub struct NoopDriver {
    clock: fn() -> HostTime,
    timebase: Timebase,
}

impl NoopDriver {
    /// Creates a no-op driver that still reports time from `clock`.
    #[must_use]
    pub const fn new(clock: fn() -> HostTime, timebase: Timebase) -> Self {
        Self { clock, timebase }
    }
}

impl Default for NoopDriver {
    fn default() -> Self {
        Self::new(|| HostTime(0), Timebase::NANOS)
    }
}

impl fmt::Debug for NoopDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoopDriver")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl TimingDriver for NoopDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::None
    }

    fn now(&self) -> HostTime {
        (self.clock)()
    }

    fn timebase(&self) -> Timebase {
        self.timebase
    }

    fn request(&self, callback: TickCallback) -> Option<RequestId> {
        drop(callback);
        None
    }

    fn cancel(&self, id: RequestId) {
        _ = id;
    }
}

/// Picks the best available driver.
///
/// Prefers `frame`, then `fallback`, and finally a default [`NoopDriver`].
/// Backends pass whatever they could construct on the current platform.
#[must_use]
pub fn select(
    frame: Option<Rc<dyn TimingDriver>>,
    fallback: Option<Rc<dyn TimingDriver>>,
) -> Rc<dyn TimingDriver> {
    frame
        .or(fallback)
        .unwrap_or_else(|| Rc::new(NoopDriver::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, ManualFrameDriver};

    #[test]
    fn noop_driver_never_arms() {
        let driver = NoopDriver::default();
        assert_eq!(driver.kind(), DriverKind::None);
        assert!(driver.request(Box::new(|_| {})).is_none(), "noop must not arm");
        driver.cancel(RequestId(1));
    }

    #[test]
    fn kind_tags() {
        assert_eq!(DriverKind::Frame.as_str(), "frame");
        assert_eq!(DriverKind::Timer.as_str(), "timer");
        assert_eq!(DriverKind::None.as_str(), "none");
        assert!(DriverKind::Frame.is_frame_like());
        assert!(!DriverKind::Timer.is_frame_like());
    }

    #[test]
    fn select_prefers_frame_then_fallback() {
        let clock = ManualClock::new();
        let frame: Rc<dyn TimingDriver> = Rc::new(ManualFrameDriver::new(clock.clone()));
        let fallback: Rc<dyn TimingDriver> = Rc::new(NoopDriver::default());

        let chosen = select(Some(Rc::clone(&frame)), Some(Rc::clone(&fallback)));
        assert_eq!(chosen.kind(), DriverKind::Frame);

        let chosen = select(None, Some(fallback));
        assert_eq!(chosen.kind(), DriverKind::None);

        let chosen = select(None, None);
        assert_eq!(chosen.kind(), DriverKind::None, "falls back to noop");
    }
}
