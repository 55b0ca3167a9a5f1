// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! FIFO window bookkeeping for frame-style drivers.
//!
//! A [`FrameQueue`] holds two windows:
//!
//! ```text
//!   request() ──► open window ──close_window()──► delivering ──► callback(ts)
//!                     ▲                                │
//!                     └──── requests made while ───────┘
//!                           delivering land here
//! ```
//!
//! The driver arms its platform primitive when [`push`](FrameQueue::push)
//! reports that the open window just became non-empty, and disarms it when a
//! [`cancel`](FrameQueue::cancel) empties the open window. When the primitive
//! fires the driver closes the window and drains it with one shared
//! timestamp. Requests made during that drain go into the (new) open window,
//! so they can never join the window being delivered.
//!
//! The queue never calls callbacks itself and never holds user code, which
//! lets drivers keep it inside a `RefCell` and release the borrow before each
//! callback runs.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::driver::{RequestId, TickCallback};

/// Result of [`FrameQueue::cancel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cancelled {
    /// No queued request had this id (already delivered or cancelled).
    NotFound,
    /// Removed from the open window.
    Open {
        /// Whether the open window is now empty, so the platform primitive
        /// should be disarmed.
        window_empty: bool,
    },
    /// Removed from the window currently being delivered, before it ran.
    Delivering,
}

/// Two-window FIFO of tick callbacks.
pub struct FrameQueue {
    next_id: u64,
    open: VecDeque<(RequestId, TickCallback)>,
    delivering: VecDeque<(RequestId, TickCallback)>,
}

impl core::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("next_id", &self.next_id)
            .field("open", &self.open.len())
            .field("delivering", &self.delivering.len())
            .finish()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    /// Creates an empty queue. Request ids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: 1,
            open: VecDeque::new(),
            delivering: VecDeque::new(),
        }
    }

    /// Appends a callback to the open window.
    ///
    /// Returns its id and whether the open window was empty before, i.e.
    /// whether the caller has to arm the underlying primitive.
    pub fn push(&mut self, callback: TickCallback) -> (RequestId, bool) {
        let id = RequestId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let opened = self.open.is_empty();
        self.open.push_back((id, callback));
        (id, opened)
    }

    /// Removes a request from the open window without reporting it as a
    /// cancel; used when arming the primitive failed right after
    /// [`push`](Self::push).
    pub fn retract(&mut self, id: RequestId) -> Option<TickCallback> {
        let pos = self.open.iter().position(|(queued, _)| *queued == id)?;
        self.open.remove(pos).map(|(_, callback)| callback)
    }

    /// Removes a queued request from whichever window holds it.
    pub fn cancel(&mut self, id: RequestId) -> Cancelled {
        if let Some(pos) = self.open.iter().position(|(queued, _)| *queued == id) {
            drop(self.open.remove(pos));
            return Cancelled::Open {
                window_empty: self.open.is_empty(),
            };
        }
        if let Some(pos) = self.delivering.iter().position(|(queued, _)| *queued == id) {
            drop(self.delivering.remove(pos));
            return Cancelled::Delivering;
        }
        Cancelled::NotFound
    }

    /// Moves the open window behind anything still being delivered and
    /// returns how many callbacks it held.
    pub fn close_window(&mut self) -> usize {
        let closed = self.open.len();
        self.delivering.append(&mut self.open);
        closed
    }

    /// Pops the next callback of the closed window, in request order.
    pub fn next_delivery(&mut self) -> Option<TickCallback> {
        self.delivering.pop_front().map(|(_, callback)| callback)
    }

    /// Number of requests waiting in the open window.
    #[must_use]
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    /// Number of requests in the window being delivered.
    #[must_use]
    pub fn delivering_len(&self) -> usize {
        self.delivering.len()
    }

    /// Returns `true` if neither window holds a request.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.open.is_empty() && self.delivering.is_empty()
    }

    /// Removes every queued callback. The caller drops them after releasing
    /// any borrow on the queue.
    pub fn drain_all(&mut self) -> Vec<TickCallback> {
        self.delivering
            .drain(..)
            .chain(self.open.drain(..))
            .map(|(_, callback)| callback)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use super::*;
    use crate::time::HostTime;

    fn recorder(log: &Rc<RefCell<Vec<u32>>>, tag: u32) -> TickCallback {
        let log = Rc::clone(log);
        Box::new(move |_| log.borrow_mut().push(tag))
    }

    #[test]
    fn push_reports_when_window_opens() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = FrameQueue::new();

        let (a, opened) = queue.push(recorder(&log, 1));
        assert!(opened, "first push opens the window");
        let (b, opened) = queue.push(recorder(&log, 2));
        assert!(!opened, "second push joins the open window");
        assert_ne!(a, b, "ids are distinct");
        assert_eq!(queue.open_len(), 2);
    }

    #[test]
    fn drains_in_fifo_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = FrameQueue::new();
        for tag in 1..=3 {
            let _ = queue.push(recorder(&log, tag));
        }

        assert_eq!(queue.close_window(), 3);
        while let Some(callback) = queue.next_delivery() {
            callback(HostTime(0));
        }
        assert_eq!(*log.borrow(), [1, 2, 3]);
        assert!(queue.is_idle());
    }

    #[test]
    fn requests_after_close_wait_for_next_window() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = FrameQueue::new();
        let _ = queue.push(recorder(&log, 1));
        queue.close_window();

        let (_, opened) = queue.push(recorder(&log, 2));
        assert!(opened, "new window opens while the old one is delivering");
        assert_eq!(queue.delivering_len(), 1);
        assert_eq!(queue.open_len(), 1);
    }

    #[test]
    fn cancel_reports_window_state() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = FrameQueue::new();
        let (a, _) = queue.push(recorder(&log, 1));
        let (b, _) = queue.push(recorder(&log, 2));

        assert_eq!(queue.cancel(a), Cancelled::Open { window_empty: false });
        assert_eq!(queue.cancel(b), Cancelled::Open { window_empty: true });
        assert_eq!(queue.cancel(b), Cancelled::NotFound);
    }

    #[test]
    fn cancel_reaches_delivering_window() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = FrameQueue::new();
        let _ = queue.push(recorder(&log, 1));
        let (b, _) = queue.push(recorder(&log, 2));
        queue.close_window();

        assert_eq!(queue.cancel(b), Cancelled::Delivering);
        while let Some(callback) = queue.next_delivery() {
            callback(HostTime(0));
        }
        assert_eq!(*log.borrow(), [1], "cancelled request must not run");
    }

    #[test]
    fn retract_and_drain() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = FrameQueue::new();
        let (a, _) = queue.push(recorder(&log, 1));
        assert!(queue.retract(a).is_some());
        assert!(queue.is_idle());

        let _ = queue.push(recorder(&log, 2));
        queue.close_window();
        let _ = queue.push(recorder(&log, 3));
        assert_eq!(queue.drain_all().len(), 2);
        assert!(queue.is_idle());
        assert!(log.borrow().is_empty(), "drained callbacks are not run");
    }
}
