// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plain one-shot timers.
//!
//! [`TimerHost`] is the platform's `setTimeout`: it runs a callback once after
//! a delay. The debounce controller owns timers on a host directly, and the
//! timer-emulated frame driver builds frame semantics on top of one.

use alloc::boxed::Box;

use crate::time::{Duration, HostTime, Timebase};

/// Callback run when a timer expires.
pub type TimerCallback = Box<dyn FnOnce()>;

/// Token identifying an armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// A one-shot timer primitive.
///
/// Callbacks never run synchronously from within
/// [`set_timeout`](Self::set_timeout). Clearing an id that already fired is a
/// no-op.
pub trait TimerHost {
    /// Current time on the host clock.
    fn now(&self) -> HostTime;

    /// Tick-to-nanosecond factor of [`now`](Self::now).
    fn timebase(&self) -> Timebase;

    /// Runs `callback` once, `delay` after now. Returns `None` if the timer
    /// could not be armed.
    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> Option<TimerId>;

    /// Disarms a timer.
    fn clear_timeout(&self, id: TimerId);
}
