// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `setTimeout` timer host.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::fmt;

use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;

use coalesce_core::time::{Duration, HostTime, Timebase};
use coalesce_core::timer::{TimerCallback, TimerHost, TimerId};

use crate::bindings::{clear_timeout, set_timeout};

type TimeoutClosure = Closure<dyn FnMut(u32)>;

#[derive(Default)]
struct Timers {
    next_key: u32,
    // key -> (browser handle, callback)
    armed: BTreeMap<u32, (i32, TimerCallback)>,
}

impl Timers {
    fn allocate_key(&mut self) -> u32 {
        loop {
            self.next_key = self.next_key.wrapping_add(1);
            if !self.armed.contains_key(&self.next_key) {
                return self.next_key;
            }
        }
    }
}

/// A [`TimerHost`] on the browser's `setTimeout`.
///
/// Every timer goes through one shared JS closure; the key passed as the
/// extra `setTimeout` argument selects the Rust callback.
pub struct WebTimerHost {
    closure: TimeoutClosure,
    timers: RefCell<Timers>,
}

impl WebTimerHost {
    /// Creates a host with no armed timers.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            let closure = Closure::wrap(Box::new(move |key: u32| {
                if let Some(host) = this.upgrade() {
                    host.fire(key);
                }
            }) as Box<dyn FnMut(u32)>);
            Self {
                closure,
                timers: RefCell::default(),
            }
        })
    }

    /// Number of armed timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.timers.borrow().armed.len()
    }

    fn fire(&self, key: u32) {
        let due = self.timers.borrow_mut().armed.remove(&key);
        if let Some((_, callback)) = due {
            callback();
        }
    }
}

impl TimerHost for WebTimerHost {
    fn now(&self) -> HostTime {
        crate::now()
    }

    fn timebase(&self) -> Timebase {
        crate::timebase()
    }

    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> Option<TimerId> {
        let key = self.timers.borrow_mut().allocate_key();
        let ms = delay.to_millis_f64(self.timebase());
        let handle = set_timeout(self.closure.as_ref().unchecked_ref(), ms, key).ok()?;
        self.timers.borrow_mut().armed.insert(key, (handle, callback));
        Some(TimerId(u64::from(key)))
    }

    fn clear_timeout(&self, id: TimerId) {
        let Ok(key) = u32::try_from(id.0) else {
            return;
        };
        let removed = self.timers.borrow_mut().armed.remove(&key);
        if let Some((handle, callback)) = removed {
            clear_timeout(handle);
            drop(callback);
        }
    }
}

impl Drop for WebTimerHost {
    fn drop(&mut self) {
        for (handle, _) in core::mem::take(&mut self.timers.get_mut().armed).into_values() {
            clear_timeout(handle);
        }
    }
}

impl fmt::Debug for WebTimerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timers = self.timers.borrow();
        f.debug_struct("WebTimerHost")
            .field("armed", &timers.armed.len())
            .field("next_key", &timers.next_key)
            .finish_non_exhaustive()
    }
}
