// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Native backend for coalesce.
//!
//! This crate provides the pieces a native, single-threaded event loop needs:
//!
//! - [`StdTimerLoop`]: a [`TimerHost`] on [`std::time::Instant`], serviced by
//!   the thread that owns it
//! - [`now`] / [`timebase`]: the process clock in nanosecond ticks
//! - [`best_available`]: timer-emulated frames from a [`HubRegistry`]
//!
//! Native targets have no portable next-frame primitive, so frame-style
//! scheduling always goes through the emulated hub.

mod clock;
mod timer_loop;

use std::rc::Rc;

use coalesce_core::driver::{NoopDriver, TimingDriver};
use coalesce_core::hub::HubRegistry;
use coalesce_core::time::{HostTime, Timebase};
use coalesce_core::timer::TimerHost;

pub use timer_loop::StdTimerLoop;

/// Returns the current host time: nanoseconds since the process clock was
/// first read.
#[must_use]
pub fn now() -> HostTime {
    clock::now()
}

/// Returns the native [`Timebase`]: 1 tick = 1 ns.
#[must_use]
pub fn timebase() -> Timebase {
    Timebase::NANOS
}

/// A [`NoopDriver`] that still reports time from the process clock.
#[must_use]
pub fn noop_driver() -> NoopDriver {
    NoopDriver::new(now, Timebase::NANOS)
}

/// Picks the best driver available natively: the emulated frame hub for
/// `host`, pooled in `registry`.
pub fn best_available(
    registry: &mut HubRegistry,
    host: &Rc<dyn TimerHost>,
) -> Rc<dyn TimingDriver> {
    let hub: Rc<dyn TimingDriver> = registry.frame_hub(host);
    coalesce_core::driver::select(None, Some(hub))
}
