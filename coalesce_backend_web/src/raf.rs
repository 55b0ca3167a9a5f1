// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `requestAnimationFrame` driver.
//!
//! [`RafDriver`] keeps one JS closure for its whole life and at most one
//! outstanding `requestAnimationFrame` registration. Requests made before the
//! frame fires share that registration and are delivered in request order
//! with the frame's [`DOMHighResTimeStamp`][mdn], converted to microsecond
//! [`HostTime`] ticks. Requests made while a frame is being delivered land in
//! the next frame.
//!
//! [mdn]: https://developer.mozilla.org/en-US/docs/Web/API/DOMHighResTimeStamp

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cell::{Cell, RefCell};
use core::fmt;

use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;

use coalesce_core::driver::{DriverKind, RequestId, TickCallback, TimingDriver};
use coalesce_core::queue::{Cancelled, FrameQueue};
use coalesce_core::time::{HostTime, Timebase};

use crate::bindings::{cancel_animation_frame, request_animation_frame};

type FrameClosure = Closure<dyn FnMut(f64)>;

/// A frame-kind [`TimingDriver`] on `requestAnimationFrame`.
pub struct RafDriver {
    /// Registered with every `requestAnimationFrame` call. Holds only a weak
    /// reference back to the driver.
    closure: FrameClosure,

    queue: RefCell<FrameQueue>,

    /// The id of the outstanding registration, if any.
    raf_id: Cell<Option<i32>>,

    /// Frames delivered so far.
    frames: Cell<u64>,
}

impl RafDriver {
    /// Creates a driver with nothing registered.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            let closure = Closure::wrap(Box::new(move |timestamp_ms: f64| {
                if let Some(driver) = this.upgrade() {
                    driver.on_frame(timestamp_ms);
                }
            }) as Box<dyn FnMut(f64)>);
            Self {
                closure,
                queue: RefCell::new(FrameQueue::new()),
                raf_id: Cell::new(None),
                frames: Cell::new(0),
            }
        })
    }

    /// Number of frames delivered so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.get()
    }

    /// Number of requests waiting for the next frame.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.borrow().open_len()
    }

    /// Returns `true` while a `requestAnimationFrame` registration is
    /// outstanding.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.raf_id.get().is_some()
    }

    fn arm(&self) -> bool {
        match request_animation_frame(self.closure.as_ref().unchecked_ref()) {
            Ok(id) => {
                self.raf_id.set(Some(id));
                true
            }
            Err(_) => false,
        }
    }

    fn on_frame(&self, timestamp_ms: f64) {
        let stamp = crate::host_time_from_millis(timestamp_ms);
        self.raf_id.set(None);
        self.frames.set(self.frames.get() + 1);
        self.queue.borrow_mut().close_window();
        // No borrow is held while a callback runs.
        loop {
            let next = self.queue.borrow_mut().next_delivery();
            let Some(callback) = next else {
                break;
            };
            callback(stamp);
        }
    }
}

impl TimingDriver for RafDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Frame
    }

    fn now(&self) -> HostTime {
        crate::now()
    }

    fn timebase(&self) -> Timebase {
        crate::timebase()
    }

    fn request(&self, callback: TickCallback) -> Option<RequestId> {
        let (id, needs_frame) = {
            let mut queue = self.queue.borrow_mut();
            let (id, opened) = queue.push(callback);
            (id, opened && self.raf_id.get().is_none())
        };
        if needs_frame && !self.arm() {
            let retracted = self.queue.borrow_mut().retract(id);
            drop(retracted);
            return None;
        }
        Some(id)
    }

    fn cancel(&self, id: RequestId) {
        let cancelled = self.queue.borrow_mut().cancel(id);
        if cancelled == (Cancelled::Open { window_empty: true })
            && let Some(raf_id) = self.raf_id.take()
        {
            cancel_animation_frame(raf_id);
        }
    }
}

impl Drop for RafDriver {
    fn drop(&mut self) {
        if let Some(raf_id) = self.raf_id.take() {
            cancel_animation_frame(raf_id);
        }
    }
}

impl fmt::Debug for RafDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RafDriver")
            .field("queue", &self.queue.borrow())
            .field("raf_id", &self.raf_id.get())
            .field("frames", &self.frames.get())
            .finish_non_exhaustive()
    }
}
