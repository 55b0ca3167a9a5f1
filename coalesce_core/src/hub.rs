// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timer-emulated frame driver and the registry that pools it.
//!
//! [`EmulatedFrameDriver`] gives plain timers frame semantics:
//!
//! 1. Every request made before the timer fires joins the same window; the
//!    window shares one timer and is delivered in FIFO order with one
//!    timestamp.
//! 2. Once the timer fires the window is closed. Requests issued while it is
//!    being delivered go to the next window and arm a fresh timer.
//! 3. Cancelling the last request of an otherwise empty window clears the
//!    timer, so an empty window never fires.
//!
//! Drivers on the same [`TimerHost`] with the same delay must share one
//! coalescing hub. [`HubRegistry`] provides that pooling explicitly: the
//! component that owns process lifetime creates one registry, hands out hubs
//! keyed by `(host identity, delay)`, and calls
//! [`teardown`](HubRegistry::teardown) when it shuts down.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::fmt;

use crate::driver::{DriverKind, RequestId, TickCallback, TimingDriver};
use crate::queue::{Cancelled, FrameQueue};
use crate::time::{Duration, HostTime, Timebase};
use crate::timer::{TimerHost, TimerId};

/// Default emulated frame interval, roughly one 60 Hz frame.
pub const EMULATED_FRAME_DELAY_MS: f64 = 16.0;

struct HubState {
    queue: FrameQueue,
    timer: Option<TimerId>,
}

/// A frame-style [`TimingDriver`] built on a [`TimerHost`] and a fixed delay.
///
/// Obtain shared instances from a [`HubRegistry`]; [`new`](Self::new) creates
/// an unpooled hub.
pub struct EmulatedFrameDriver {
    host: Rc<dyn TimerHost>,
    delay: Duration,
    this: Weak<Self>,
    state: RefCell<HubState>,
}

impl fmt::Debug for EmulatedFrameDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EmulatedFrameDriver")
            .field("delay", &self.delay)
            .field("queue", &state.queue)
            .field("timer", &state.timer)
            .finish_non_exhaustive()
    }
}

impl EmulatedFrameDriver {
    /// Creates a hub that fires `delay` after the first request of each
    /// window.
    #[must_use]
    pub fn new(host: Rc<dyn TimerHost>, delay: Duration) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            host,
            delay,
            this: this.clone(),
            state: RefCell::new(HubState {
                queue: FrameQueue::new(),
                timer: None,
            }),
        })
    }

    /// The window length.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of requests waiting for the next fire.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.borrow().queue.open_len()
    }

    /// Returns `true` while the underlying timer is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.borrow().timer.is_some()
    }

    /// Clears the timer and drops every queued callback without running it.
    pub fn shutdown(&self) {
        let (timer, dropped) = {
            let mut state = self.state.borrow_mut();
            (state.timer.take(), state.queue.drain_all())
        };
        if let Some(timer) = timer {
            self.host.clear_timeout(timer);
        }
        drop(dropped);
    }

    fn arm(&self) -> Option<TimerId> {
        let this = self.this.clone();
        self.host.set_timeout(
            self.delay,
            Box::new(move || {
                if let Some(hub) = this.upgrade() {
                    hub.fire();
                }
            }),
        )
    }

    fn fire(&self) {
        let stamp = self.host.now();
        {
            let mut state = self.state.borrow_mut();
            state.timer = None;
            state.queue.close_window();
        }
        // The borrow is released around each callback so callbacks can
        // request (next window) or cancel (rest of this window).
        loop {
            let next = self.state.borrow_mut().queue.next_delivery();
            let Some(callback) = next else {
                break;
            };
            callback(stamp);
        }
    }
}

impl TimingDriver for EmulatedFrameDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Timer
    }

    fn now(&self) -> HostTime {
        self.host.now()
    }

    fn timebase(&self) -> Timebase {
        self.host.timebase()
    }

    fn request(&self, callback: TickCallback) -> Option<RequestId> {
        let (id, needs_timer) = {
            let mut state = self.state.borrow_mut();
            let (id, opened) = state.queue.push(callback);
            (id, opened && state.timer.is_none())
        };
        if needs_timer {
            let Some(timer) = self.arm() else {
                let retracted = self.state.borrow_mut().queue.retract(id);
                drop(retracted);
                return None;
            };
            self.state.borrow_mut().timer = Some(timer);
        }
        Some(id)
    }

    fn cancel(&self, id: RequestId) {
        let timer = {
            let mut state = self.state.borrow_mut();
            match state.queue.cancel(id) {
                Cancelled::Open { window_empty: true } => state.timer.take(),
                _ => None,
            }
        };
        if let Some(timer) = timer {
            self.host.clear_timeout(timer);
        }
    }
}

/// Registry key: identity of the timer host plus the window length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HubKey {
    host: usize,
    delay: Duration,
}

impl HubKey {
    /// Builds the key for `host` and `delay`.
    ///
    /// Two keys are equal only for the same host allocation and the same
    /// delay in ticks.
    #[must_use]
    pub fn new(host: &Rc<dyn TimerHost>, delay: Duration) -> Self {
        Self {
            host: Rc::as_ptr(host).cast::<()>().addr(),
            delay,
        }
    }
}

/// Pools [`EmulatedFrameDriver`]s by [`HubKey`].
///
/// A pooled hub keeps its host alive, so a key's host identity cannot be
/// reused while the key is registered.
#[derive(Default)]
pub struct HubRegistry {
    hubs: BTreeMap<HubKey, Rc<EmulatedFrameDriver>>,
}

impl fmt::Debug for HubRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubRegistry")
            .field("hubs", &self.hubs.len())
            .finish()
    }
}

impl HubRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hub for `host` and `delay`, creating it on first use.
    pub fn hub(&mut self, host: &Rc<dyn TimerHost>, delay: Duration) -> Rc<EmulatedFrameDriver> {
        let key = HubKey::new(host, delay);
        let hub = self
            .hubs
            .entry(key)
            .or_insert_with(|| EmulatedFrameDriver::new(Rc::clone(host), delay));
        Rc::clone(hub)
    }

    /// Like [`hub`](Self::hub) with the delay given in milliseconds on the
    /// host's timebase.
    pub fn hub_millis(&mut self, host: &Rc<dyn TimerHost>, delay_ms: f64) -> Rc<EmulatedFrameDriver> {
        let delay = Duration::from_millis_f64(delay_ms, host.timebase());
        self.hub(host, delay)
    }

    /// The hub for `host` at [`EMULATED_FRAME_DELAY_MS`].
    pub fn frame_hub(&mut self, host: &Rc<dyn TimerHost>) -> Rc<EmulatedFrameDriver> {
        self.hub_millis(host, EMULATED_FRAME_DELAY_MS)
    }

    /// Number of pooled hubs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    /// Returns `true` if no hub is pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }

    /// Shuts every hub down and empties the registry.
    ///
    /// Hubs still referenced elsewhere keep working as unpooled drivers for
    /// new requests; everything queued at teardown is dropped.
    pub fn teardown(&mut self) {
        for hub in core::mem::take(&mut self.hubs).into_values() {
            hub.shutdown();
        }
    }
}
