// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic drivers for tests and simulations.
//!
//! - [`ManualClock`]: a shared virtual clock in microsecond ticks.
//! - [`ManualTimerHost`]: a [`TimerHost`] whose timers fire only when the
//!   clock is advanced through it.
//! - [`ManualFrameDriver`]: a frame-kind [`TimingDriver`] whose frames fire
//!   only on [`fire_frame`](ManualFrameDriver::fire_frame).
//!
//! Several hosts and drivers may share one clock.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use core::fmt;

use crate::driver::{DriverKind, RequestId, TickCallback, TimingDriver};
use crate::queue::FrameQueue;
use crate::time::{Duration, HostTime, Timebase};
use crate::timer::{TimerCallback, TimerHost, TimerId};

/// A cloneable handle to a virtual clock. Ticks are microseconds.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Rc<Cell<HostTime>>,
}

impl ManualClock {
    /// Creates a clock at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The clock's timebase: one tick is one microsecond.
    #[must_use]
    pub const fn timebase(&self) -> Timebase {
        Timebase::MICROS
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> HostTime {
        self.now.get()
    }

    /// Current virtual time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> f64 {
        Duration(self.now.get().ticks()).to_millis_f64(self.timebase())
    }

    /// Moves the clock to `t`. Never moves it backwards.
    pub fn set(&self, t: HostTime) {
        if t > self.now.get() {
            self.now.set(t);
        }
    }

    /// Moves the clock forward without firing anything.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }

    /// Moves the clock forward by fractional milliseconds without firing
    /// anything.
    pub fn advance_ms(&self, ms: f64) {
        self.advance(Duration::from_millis_f64(ms, self.timebase()));
    }
}

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    // Keyed by (deadline, arm order) so equal deadlines fire in arm order.
    timers: BTreeMap<(HostTime, u64), (TimerId, TimerCallback)>,
}

/// A [`TimerHost`] driven by a [`ManualClock`].
pub struct ManualTimerHost {
    clock: ManualClock,
    table: RefCell<TimerTable>,
}

impl fmt::Debug for ManualTimerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimerHost")
            .field("now", &self.clock.now())
            .field("armed", &self.armed_count())
            .finish()
    }
}

impl ManualTimerHost {
    /// Creates a host on `clock`.
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            table: RefCell::default(),
        }
    }

    /// The clock this host reads.
    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of timers armed and not yet fired or cleared.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.table.borrow().timers.len()
    }

    /// Deadline of the earliest armed timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<HostTime> {
        self.table
            .borrow()
            .timers
            .first_key_value()
            .map(|((deadline, _), _)| *deadline)
    }

    /// Advances the clock by `by`, firing every timer that comes due in
    /// deadline order. The clock reads each timer's deadline while it runs.
    ///
    /// Timers armed by callbacks fire within the same call if they come due
    /// before the target time.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now().saturating_add(by);
        loop {
            let due = {
                let mut table = self.table.borrow_mut();
                let earliest = table.timers.first_key_value().map(|((deadline, _), _)| *deadline);
                match earliest {
                    Some(deadline) if deadline <= target => table.timers.pop_first(),
                    _ => None,
                }
            };
            let Some(((deadline, _), (_, callback))) = due else {
                break;
            };
            self.clock.set(deadline);
            callback();
        }
        self.clock.set(target);
    }

    /// Advances the clock by fractional milliseconds, firing due timers.
    pub fn advance_ms(&self, ms: f64) {
        self.advance(Duration::from_millis_f64(ms, self.clock.timebase()));
    }
}

impl TimerHost for ManualTimerHost {
    fn now(&self) -> HostTime {
        self.clock.now()
    }

    fn timebase(&self) -> Timebase {
        self.clock.timebase()
    }

    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> Option<TimerId> {
        let mut table = self.table.borrow_mut();
        table.next_id += 1;
        let id = TimerId(table.next_id);
        let deadline = self.clock.now().saturating_add(delay);
        let order = table.next_id;
        table.timers.insert((deadline, order), (id, callback));
        Some(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        let removed = {
            let mut table = self.table.borrow_mut();
            let key = table
                .timers
                .iter()
                .find(|(_, (armed, _))| *armed == id)
                .map(|(key, _)| *key);
            key.and_then(|key| table.timers.remove(&key))
        };
        drop(removed);
    }
}

/// A frame-kind [`TimingDriver`] whose frames are fired by hand.
pub struct ManualFrameDriver {
    clock: ManualClock,
    queue: RefCell<FrameQueue>,
    frames: Cell<u64>,
}

impl fmt::Debug for ManualFrameDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualFrameDriver")
            .field("now", &self.clock.now())
            .field("queue", &self.queue.borrow())
            .field("frames", &self.frames.get())
            .finish()
    }
}

impl ManualFrameDriver {
    /// Creates a driver on `clock`.
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: RefCell::new(FrameQueue::new()),
            frames: Cell::new(0),
        }
    }

    /// The clock this driver reads.
    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of requests waiting for the next frame.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.borrow().open_len()
    }

    /// Number of frames fired so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.get()
    }

    /// Fires one frame stamped with the current clock time and returns the
    /// number of callbacks delivered.
    pub fn fire_frame(&self) -> usize {
        let stamp = self.clock.now();
        self.frames.set(self.frames.get() + 1);
        self.queue.borrow_mut().close_window();
        let mut delivered = 0;
        loop {
            let next = self.queue.borrow_mut().next_delivery();
            let Some(callback) = next else {
                break;
            };
            callback(stamp);
            delivered += 1;
        }
        delivered
    }

    /// Advances the clock by fractional milliseconds, then fires a frame.
    pub fn advance_and_fire(&self, ms: f64) -> usize {
        self.clock.advance_ms(ms);
        self.fire_frame()
    }
}

impl TimingDriver for ManualFrameDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Frame
    }

    fn now(&self) -> HostTime {
        self.clock.now()
    }

    fn timebase(&self) -> Timebase {
        self.clock.timebase()
    }

    fn request(&self, callback: TickCallback) -> Option<RequestId> {
        let (id, _) = self.queue.borrow_mut().push(callback);
        Some(id)
    }

    fn cancel(&self, id: RequestId) {
        let _ = self.queue.borrow_mut().cancel(id);
    }
}
