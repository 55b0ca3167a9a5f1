// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Web backend for coalesce.
//!
//! This crate provides integration with browser APIs:
//!
//! - [`RafDriver`]: `requestAnimationFrame` frame driver
//! - [`WebTimerHost`]: `setTimeout` timer host
//! - [`now`] / [`timebase`]: `performance.now()` in microsecond ticks
//! - [`best_available`]: rAF when a `Window` exists, emulated frames otherwise

#![no_std]

extern crate alloc;

mod bindings;
mod raf;
mod timeout;

use alloc::rc::Rc;

use coalesce_core::driver::{NoopDriver, TimingDriver, select};
use coalesce_core::hub::HubRegistry;
use coalesce_core::time::{Duration, HostTime, Timebase};
use coalesce_core::timer::TimerHost;

pub use raf::RafDriver;
pub use timeout::WebTimerHost;

/// Returns the current host time from `performance.now()`.
///
/// The returned [`HostTime`] is in microsecond ticks. Use [`timebase`] to
/// convert to nanoseconds.
#[must_use]
pub fn now() -> HostTime {
    host_time_from_millis(bindings::performance_now())
}

/// Returns the web [`Timebase`]: 1 tick = 1 µs = 1000 ns.
#[must_use]
pub fn timebase() -> Timebase {
    Timebase::MICROS
}

/// A [`NoopDriver`] that still reports time from `performance.now()`.
#[must_use]
pub fn noop_driver() -> NoopDriver {
    NoopDriver::new(now, Timebase::MICROS)
}

/// Picks the best driver available in this context.
///
/// With a `Window` the result is a fresh [`RafDriver`]. Elsewhere (workers,
/// non-browser hosts) it is the emulated frame hub for `host`, pooled in
/// `registry`.
pub fn best_available(
    registry: &mut HubRegistry,
    host: &Rc<dyn TimerHost>,
) -> Rc<dyn TimingDriver> {
    let frame = web_sys::window().map(|_| RafDriver::new() as Rc<dyn TimingDriver>);
    let fallback = frame
        .is_none()
        .then(|| registry.frame_hub(host) as Rc<dyn TimingDriver>);
    select(frame, fallback)
}

/// Converts a `DOMHighResTimeStamp` (milliseconds) to microsecond ticks.
///
/// Negative and non-finite inputs map to zero.
pub(crate) fn host_time_from_millis(ms: f64) -> HostTime {
    HostTime(Duration::from_millis_f64(ms, Timebase::MICROS).ticks())
}
