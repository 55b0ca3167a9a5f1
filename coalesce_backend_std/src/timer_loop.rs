// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-threaded timer loop.
//!
//! [`StdTimerLoop`] implements [`TimerHost`] on the process clock. Timers are
//! kept in a deadline-ordered table and fire only while the owning thread
//! drives the loop with [`run_due`](StdTimerLoop::run_due),
//! [`run_for`](StdTimerLoop::run_for) or
//! [`run_until_idle`](StdTimerLoop::run_until_idle). Between deadlines the
//! thread sleeps.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::Instant;

use coalesce_core::time::{Duration, HostTime, Timebase};
use coalesce_core::timer::{TimerCallback, TimerHost, TimerId};

use crate::clock;

// (deadline, arm order): equal deadlines fire in arm order.
type Slot = (HostTime, u64);

#[derive(Default)]
struct Table {
    next_id: u64,
    timers: BTreeMap<Slot, (TimerId, TimerCallback)>,
    index: BTreeMap<TimerId, Slot>,
}

impl Table {
    fn pop_due(&mut self, now: HostTime) -> Option<TimerCallback> {
        let (&(deadline, _), _) = self.timers.first_key_value()?;
        if deadline > now {
            return None;
        }
        let (_, (id, callback)) = self.timers.pop_first()?;
        self.index.remove(&id);
        Some(callback)
    }
}

/// A [`TimerHost`] serviced by the thread that owns it.
///
/// The loop is `!Send`: timers, drivers and controllers built on it all live
/// on one thread, like the browser's event loop.
#[derive(Default)]
pub struct StdTimerLoop {
    table: RefCell<Table>,
}

impl fmt::Debug for StdTimerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.borrow();
        f.debug_struct("StdTimerLoop")
            .field("armed", &table.timers.len())
            .field("next_id", &table.next_id)
            .finish()
    }
}

impl StdTimerLoop {
    /// Creates a loop with no timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of armed timers.
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

    /// Fires every timer whose deadline has passed and returns how many ran.
    ///
    /// Timers armed by these callbacks run in a later call, even with a zero
    /// delay.
    pub fn run_due(&self) -> usize {
        let now = clock::now();
        let mut fired = 0;
        loop {
            let due = self.table.borrow_mut().pop_due(now);
            let Some(callback) = due else {
                break;
            };
            callback();
            fired += 1;
        }
        fired
    }

    /// Services timers until `limit` has elapsed, sleeping between
    /// deadlines. Returns the number of callbacks that ran.
    pub fn run_for(&self, limit: std::time::Duration) -> usize {
        let end = Instant::now() + limit;
        let mut fired = 0;
        loop {
            fired += self.run_due();
            let now = Instant::now();
            if now >= end {
                return fired;
            }
            let wake = self
                .next_deadline()
                .map_or(end, |deadline| clock::instant_at(deadline).min(end));
            thread::sleep(wake.saturating_duration_since(now));
        }
    }

    /// Services timers until none is armed. Returns the number of callbacks
    /// that ran.
    ///
    /// Never returns while something keeps re-arming, for example a debounce
    /// controller fed from its own consumer.
    pub fn run_until_idle(&self) -> usize {
        let mut fired = 0;
        while let Some(deadline) = self.next_deadline() {
            thread::sleep(clock::instant_at(deadline).saturating_duration_since(Instant::now()));
            fired += self.run_due();
        }
        fired
    }

    /// Drops every armed timer without running it.
    pub fn clear_all(&self) {
        let dropped = {
            let mut table = self.table.borrow_mut();
            table.index.clear();
            std::mem::take(&mut table.timers)
        };
        drop(dropped);
    }
}

impl TimerHost for StdTimerLoop {
    fn now(&self) -> HostTime {
        clock::now()
    }

    fn timebase(&self) -> Timebase {
        Timebase::NANOS
    }

    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> Option<TimerId> {
        let mut table = self.table.borrow_mut();
        table.next_id = table.next_id.checked_add(1)?;
        let id = TimerId(table.next_id);
        let slot = (clock::now().checked_add(delay)?, table.next_id);
        table.timers.insert(slot, (id, callback));
        table.index.insert(id, slot);
        Some(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        let removed = {
            let mut table = self.table.borrow_mut();
            table
                .index
                .remove(&id)
                .and_then(|slot| table.timers.remove(&slot))
        };
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::vec::Vec;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration(n * 1_000_000)
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let host = StdTimerLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (label, delay) in [(1_u32, 6), (2, 2), (3, 4)] {
            let log = Rc::clone(&log);
            host.set_timeout(ms(delay), Box::new(move || log.borrow_mut().push(label)))
                .unwrap();
        }

        let fired = host.run_until_idle();
        assert_eq!(fired, 3, "all timers ran");
        assert_eq!(*log.borrow(), [2, 3, 1], "earliest deadline first");
        assert_eq!(host.armed_count(), 0, "loop is idle");
    }

    #[test]
    fn cleared_timer_never_fires() {
        let host = StdTimerLoop::new();
        let hit = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&hit);
        let id = host
            .set_timeout(ms(1), Box::new(move || *flag.borrow_mut() = true))
            .unwrap();
        host.clear_timeout(id);
        host.clear_timeout(id);

        assert_eq!(host.armed_count(), 0, "cleared timer removed");
        assert_eq!(host.run_for(std::time::Duration::from_millis(5)), 0, "nothing ran");
        assert!(!*hit.borrow(), "cleared callback must not run");
    }

    #[test]
    fn timer_waits_for_its_deadline() {
        let host = StdTimerLoop::new();
        let start = Instant::now();
        host.set_timeout(ms(5), Box::new(|| {})).unwrap();

        assert_eq!(host.run_due(), 0, "not due yet");
        host.run_until_idle();
        assert!(
            start.elapsed() >= std::time::Duration::from_millis(5),
            "timer fired early"
        );
    }

    #[test]
    fn callbacks_can_rearm() {
        let host = Rc::new(StdTimerLoop::new());
        let count = Rc::new(RefCell::new(0_u32));

        fn tick(host: Rc<StdTimerLoop>, count: Rc<RefCell<u32>>) {
            *count.borrow_mut() += 1;
            if *count.borrow() < 3 {
                let next = Rc::clone(&host);
                host.set_timeout(Duration(0), Box::new(move || tick(next, count)))
                    .unwrap();
            }
        }

        let (h, c) = (Rc::clone(&host), Rc::clone(&count));
        host.set_timeout(ms(1), Box::new(move || tick(h, c))).unwrap();
        host.run_until_idle();
        assert_eq!(*count.borrow(), 3, "re-armed timers ran in later passes");
    }

    #[test]
    fn fired_timer_leaves_the_index() {
        let host = StdTimerLoop::new();
        let fired = host.set_timeout(Duration(0), Box::new(|| {})).unwrap();
        let later = host.set_timeout(ms(50), Box::new(|| {})).unwrap();

        assert_eq!(host.run_due(), 1, "zero delay is due at once");
        assert_eq!(host.table.borrow().index.len(), 1, "only the armed timer is indexed");

        host.clear_timeout(fired);
        assert_eq!(host.armed_count(), 1, "clearing a fired id touches nothing");
        host.clear_timeout(later);
        assert_eq!(host.armed_count(), 0);
        assert!(host.table.borrow().index.is_empty());
    }

    #[test]
    fn clear_all_drops_everything() {
        let host = StdTimerLoop::new();
        host.set_timeout(ms(1), Box::new(|| {})).unwrap();
        host.set_timeout(ms(2), Box::new(|| {})).unwrap();
        host.clear_all();
        assert_eq!(host.next_deadline(), None, "no deadline left");
        assert_eq!(host.run_until_idle(), 0, "nothing to run");
    }
}
