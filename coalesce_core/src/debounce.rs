// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Debounce and throttle on plain timers.
//!
//! A [`DebounceController`] runs a cycle state machine around one consumer.
//! A cycle opens with the first accepted [`emit`](DebounceController::emit)
//! of a burst and closes when the trailing timer fires, or on
//! [`flush`](DebounceController::flush) or
//! [`cancel`](DebounceController::cancel).
//!
//! ```text
//!            emit                 emit (resets trailing)
//!   Idle ───────────► Pending ◄──────────┐
//!    ▲   leading?       │ │  │           │
//!    │                  │ │  └───────────┘
//!    │   trailing fire  │ │ max-wait fire: deliver if unconsumed,
//!    └──────────────────┘ │ re-arm, stay pending
//!    ▲  flush / cancel    │
//!    └────────────────────┘
//! ```
//!
//! The trailing timer is re-armed by every emit. The max-wait timer is armed
//! once per cycle and is not reset by later emits, which bounds how long a
//! continuously retriggered cycle goes without a delivery.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::fmt;

use crate::driver::DriverKind;
use crate::invoke::{
    BoxError, Consumer, DeliveryError, InvokeMeta, InvokeReason, Slot, call_consumer,
};
use crate::tick::ErrorHook;
use crate::time::{Duration, HostTime};
use crate::timer::{TimerHost, TimerId};
use crate::trace::{
    ArmFailedEvent, CancelEvent, CycleEnd, CycleEndEvent, CycleStartEvent, DeliveryErrorEvent,
    DeliveryEvent, ScheduleEvent, Source, TraceSink, Tracer,
};

/// Policy of a [`DebounceController`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebounceConfig {
    /// Quiet period after the last emit before the trailing delivery, in
    /// milliseconds. Negative values count as zero.
    pub delay_ms: f64,
    /// Deliver the first emit of a cycle immediately.
    pub leading: bool,
    /// Deliver the last payload when the cycle ends.
    pub trailing: bool,
    /// Ignore the very first emit of the controller's lifetime.
    pub skip_initial: bool,
    /// Longest stretch within a cycle without a delivery, in milliseconds.
    /// Values that convert to a zero duration disable it.
    pub max_wait_ms: Option<f64>,
    /// Make [`cancel`](DebounceController::cancel) flush instead of
    /// discarding.
    pub flush_on_cancel: bool,
}

impl DebounceConfig {
    /// Trailing-only debounce with the given quiet period.
    #[must_use]
    pub const fn new(delay_ms: f64) -> Self {
        Self {
            delay_ms,
            leading: false,
            trailing: true,
            skip_initial: false,
            max_wait_ms: None,
            flush_on_cancel: false,
        }
    }

    /// Throttle: deliver at the start of a burst, then at most once per
    /// `interval_ms` while it lasts, and once more at its end.
    #[must_use]
    pub const fn throttle(interval_ms: f64) -> Self {
        Self {
            leading: true,
            max_wait_ms: Some(interval_ms),
            ..Self::new(interval_ms)
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[derive(Clone, Copy)]
struct ArmedTimer {
    id: TimerId,
    token: u64,
}

#[derive(Clone, Copy)]
enum TimerKind {
    Trailing,
    MaxWait,
}

struct DebounceState<P> {
    pending: bool,
    last_payload: Option<P>,
    unconsumed: bool,
    did_skip_initial: bool,
    cycle_start_at: Option<HostTime>,
    trailing: Option<ArmedTimer>,
    max_wait: Option<ArmedTimer>,
    next_token: u64,
}

struct DebounceShared<P> {
    this: Weak<Self>,
    host: Rc<dyn TimerHost>,
    config: DebounceConfig,
    delay: Duration,
    max_wait: Option<Duration>,
    state: RefCell<DebounceState<P>>,
    consumer: Slot<Consumer<P>>,
    on_error: Option<Slot<ErrorHook<P>>>,
    tracer: RefCell<Tracer>,
}

impl<P: 'static> DebounceShared<P> {
    fn with_tracer(&self, f: impl FnOnce(&mut Tracer)) {
        if let Ok(mut tracer) = self.tracer.try_borrow_mut() {
            f(&mut tracer);
        }
    }

    fn emit(&self, payload: P) {
        let now = self.host.now();
        let (new_cycle, replaced) = {
            let mut state = self.state.borrow_mut();
            if self.config.skip_initial && !state.did_skip_initial {
                state.did_skip_initial = true;
                drop(state);
                drop(payload);
                return;
            }
            let replaced = state.last_payload.replace(payload);
            state.unconsumed = true;
            let new_cycle = !state.pending;
            if new_cycle {
                state.pending = true;
                state.cycle_start_at = Some(now);
            }
            (new_cycle, replaced)
        };
        drop(replaced);

        self.with_tracer(|t| {
            t.schedule(&ScheduleEvent {
                source: Source::Debounce,
                at: now,
                coalesced: !new_cycle,
            });
            if new_cycle {
                t.cycle_start(&CycleStartEvent { at: now });
            }
        });

        if new_cycle && self.config.leading {
            self.state.borrow_mut().unconsumed = false;
            if !self.invoke(InvokeReason::Leading) {
                self.state.borrow_mut().unconsumed = true;
            }
        }

        // The leading consumer may have closed the cycle.
        if !self.state.borrow().pending {
            return;
        }
        if !self.arm(TimerKind::Trailing) {
            self.end_cycle(CycleEnd::ArmFailed);
            return;
        }
        if new_cycle && self.state.borrow().max_wait.is_none() {
            let _ = self.arm(TimerKind::MaxWait);
        }
    }

    /// (Re)arms a timer, clearing the previous one of the same kind. Returns
    /// `false` if the host refused; a missing max-wait setting counts as
    /// success.
    fn arm(&self, kind: TimerKind) -> bool {
        let delay = match kind {
            TimerKind::Trailing => self.delay,
            TimerKind::MaxWait => match self.max_wait {
                Some(max_wait) => max_wait,
                None => return true,
            },
        };
        let (previous, token) = {
            let mut state = self.state.borrow_mut();
            state.next_token = state.next_token.wrapping_add(1);
            let token = state.next_token;
            let slot = match kind {
                TimerKind::Trailing => &mut state.trailing,
                TimerKind::MaxWait => &mut state.max_wait,
            };
            (slot.take(), token)
        };
        if let Some(previous) = previous {
            self.host.clear_timeout(previous.id);
        }

        let this = self.this.clone();
        let armed = self.host.set_timeout(
            delay,
            Box::new(move || {
                if let Some(shared) = this.upgrade() {
                    shared.on_timer(kind, token);
                }
            }),
        );
        match armed {
            Some(id) => {
                let mut state = self.state.borrow_mut();
                let slot = match kind {
                    TimerKind::Trailing => &mut state.trailing,
                    TimerKind::MaxWait => &mut state.max_wait,
                };
                *slot = Some(ArmedTimer { id, token });
                true
            }
            None => {
                let event = ArmFailedEvent {
                    source: Source::Debounce,
                    at: self.host.now(),
                    driver: DriverKind::Timer,
                };
                self.with_tracer(|t| t.arm_failed(&event));
                false
            }
        }
    }

    fn on_timer(&self, kind: TimerKind, token: u64) {
        {
            let mut state = self.state.borrow_mut();
            let slot = match kind {
                TimerKind::Trailing => &mut state.trailing,
                TimerKind::MaxWait => &mut state.max_wait,
            };
            if !slot.is_some_and(|armed| armed.token == token) {
                return;
            }
            *slot = None;
        }
        match kind {
            TimerKind::Trailing => self.on_trailing(),
            TimerKind::MaxWait => self.on_max_wait(),
        }
    }

    fn on_trailing(&self) {
        let deliver = self.config.trailing && self.state.borrow().unconsumed;
        self.end_cycle(CycleEnd::Trailing);
        if deliver {
            self.invoke(InvokeReason::Trailing);
        }
    }

    fn on_max_wait(&self) {
        let deliver = self.config.trailing && self.state.borrow().unconsumed;
        if deliver {
            self.state.borrow_mut().unconsumed = false;
            if !self.invoke(InvokeReason::MaxWait) {
                self.state.borrow_mut().unconsumed = true;
            }
        }
        let rearm = {
            let state = self.state.borrow();
            state.pending && state.max_wait.is_none()
        };
        if rearm {
            let _ = self.arm(TimerKind::MaxWait);
        }
    }

    fn end_cycle(&self, cause: CycleEnd) {
        let (trailing, max_wait, started_at) = {
            let mut state = self.state.borrow_mut();
            state.pending = false;
            state.unconsumed = false;
            (
                state.trailing.take(),
                state.max_wait.take(),
                state.cycle_start_at.take(),
            )
        };
        for timer in [trailing, max_wait].into_iter().flatten() {
            self.host.clear_timeout(timer.id);
        }
        let at = self.host.now();
        self.with_tracer(|t| {
            t.cycle_end(&CycleEndEvent {
                at,
                started_at,
                cause,
            });
        });
    }

    /// Delivers the last payload. Returns `false` if nothing ran because the
    /// consumer is already on the stack.
    fn invoke(&self, reason: InvokeReason) -> bool {
        let Some(mut consumer) = self.consumer.take() else {
            return false;
        };
        let Some(payload) = self.state.borrow_mut().last_payload.take() else {
            self.consumer.restore(consumer);
            return false;
        };
        let meta = InvokeMeta::new(reason, self.host.now());
        let result = call_consumer(&mut consumer, &payload, &meta);
        self.consumer.restore(consumer);

        self.with_tracer(|t| {
            t.delivery(&DeliveryEvent {
                source: Source::Debounce,
                reason,
                at: meta.at,
                tick_timestamp: None,
                cost: None,
                failed: result.is_err(),
            });
        });
        if let Err(error) = result {
            self.report(&error, &payload, &meta);
        }

        let superseded = {
            let mut state = self.state.borrow_mut();
            if state.last_payload.is_none() {
                state.last_payload = Some(payload);
                None
            } else {
                Some(payload)
            }
        };
        drop(superseded);
        true
    }

    fn report(&self, error: &DeliveryError, payload: &P, meta: &InvokeMeta) {
        if let Some(slot) = &self.on_error
            && let Some(mut hook) = slot.take()
        {
            hook(error, payload, meta);
            slot.restore(hook);
            return;
        }
        let event = DeliveryErrorEvent {
            source: Source::Debounce,
            reason: meta.reason,
            at: meta.at,
        };
        self.with_tracer(|t| t.delivery_error(&event, error));
    }

    fn flush(&self) {
        if self.consumer.is_busy() {
            // Re-entrant flush; the open cycle delivers on its own timers.
            return;
        }
        let deliver = {
            let state = self.state.borrow();
            if !state.pending {
                return;
            }
            state.unconsumed && self.config.trailing
        };
        self.end_cycle(CycleEnd::Flush);
        if deliver {
            self.invoke(InvokeReason::Flush);
        }
    }

    fn cancel(&self) {
        if self.config.flush_on_cancel {
            self.flush();
        }
        if !self.state.borrow().pending {
            return;
        }
        let at = self.host.now();
        self.with_tracer(|t| {
            t.cancel(&CancelEvent {
                source: Source::Debounce,
                at,
            });
        });
        self.end_cycle(CycleEnd::Cancel);
    }
}

/// Debounces emitted payloads into leading, trailing and max-wait
/// deliveries.
///
/// Created with [`DebounceController::builder`] or
/// [`new`](DebounceController::new). Dropping the controller cancels the open
/// cycle.
pub struct DebounceController<P: 'static> {
    shared: Rc<DebounceShared<P>>,
}

impl<P: 'static> fmt::Debug for DebounceController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceController")
            .field("config", &self.shared.config)
            .field("pending", &self.is_pending())
            .field("cycle_started_at", &self.cycle_started_at())
            .finish_non_exhaustive()
    }
}

impl<P: 'static> DebounceController<P> {
    /// Starts building a controller on `host` delivering to `consumer`.
    pub fn builder(
        host: Rc<dyn TimerHost>,
        config: DebounceConfig,
        consumer: impl FnMut(&P, &InvokeMeta) -> Result<(), BoxError> + 'static,
    ) -> DebounceControllerBuilder<P> {
        DebounceControllerBuilder {
            host,
            config,
            consumer: Box::new(consumer),
            on_error: None,
            tracer: Tracer::fallback(),
        }
    }

    /// Creates a controller with default error handling.
    pub fn new(
        host: Rc<dyn TimerHost>,
        config: DebounceConfig,
        consumer: impl FnMut(&P, &InvokeMeta) -> Result<(), BoxError> + 'static,
    ) -> Self {
        Self::builder(host, config, consumer).build()
    }

    /// Feeds a payload into the current cycle, opening one if needed.
    pub fn emit(&self, payload: P) {
        self.shared.emit(payload);
    }

    /// Ends the open cycle, delivering the unconsumed payload with
    /// [`InvokeReason::Flush`] when trailing delivery is enabled.
    ///
    /// Does nothing when called from inside the consumer.
    pub fn flush(&self) {
        self.shared.flush();
    }

    /// Ends the open cycle without delivering. The last payload stays
    /// readable.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Same as [`cancel`](Self::cancel); for teardown paths.
    pub fn dispose(&self) {
        self.shared.cancel();
    }

    /// Returns `true` while a cycle is open.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.state.borrow().pending
    }

    /// A copy of the most recently emitted payload, delivered or not.
    #[must_use]
    pub fn last_payload(&self) -> Option<P>
    where
        P: Clone,
    {
        self.shared.state.borrow().last_payload.clone()
    }

    /// Runs `f` with the most recently emitted payload.
    pub fn with_last_payload<R>(&self, f: impl FnOnce(Option<&P>) -> R) -> R {
        let payload = self.shared.state.borrow_mut().last_payload.take();
        let out = f(payload.as_ref());
        let superseded = {
            let mut state = self.shared.state.borrow_mut();
            if state.last_payload.is_none() {
                state.last_payload = payload;
                None
            } else {
                payload
            }
        };
        drop(superseded);
        out
    }

    /// When the open cycle started.
    #[must_use]
    pub fn cycle_started_at(&self) -> Option<HostTime> {
        self.shared.state.borrow().cycle_start_at
    }

    /// The policy this controller runs.
    #[must_use]
    pub fn config(&self) -> &DebounceConfig {
        &self.shared.config
    }

    /// Replaces the consumer. Takes effect at the next delivery.
    pub fn set_consumer(
        &self,
        consumer: impl FnMut(&P, &InvokeMeta) -> Result<(), BoxError> + 'static,
    ) {
        self.shared.consumer.replace(Box::new(consumer));
    }
}

impl<P: 'static> Drop for DebounceController<P> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

/// Builder for [`DebounceController`].
pub struct DebounceControllerBuilder<P> {
    host: Rc<dyn TimerHost>,
    config: DebounceConfig,
    consumer: Consumer<P>,
    on_error: Option<ErrorHook<P>>,
    tracer: Tracer,
}

impl<P> fmt::Debug for DebounceControllerBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceControllerBuilder")
            .field("config", &self.config)
            .field("on_error", &self.on_error.is_some())
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}

impl<P: 'static> DebounceControllerBuilder<P> {
    /// Receives consumer failures. Default: the trace sink, which is an
    /// `ErrorLog` on stderr under `std`.
    #[must_use]
    pub fn on_error(
        mut self,
        hook: impl FnMut(&DeliveryError, &P, &InvokeMeta) + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Sends diagnostics to `sink`.
    #[must_use]
    pub fn trace_sink(mut self, sink: impl TraceSink + 'static) -> Self {
        self.tracer = Tracer::new(Box::new(sink));
        self
    }

    /// Builds the controller. Delays are converted on the host's timebase.
    #[must_use]
    pub fn build(self) -> DebounceController<P> {
        let timebase = self.host.timebase();
        let delay = Duration::from_millis_f64(self.config.delay_ms, timebase);
        let max_wait = self
            .config
            .max_wait_ms
            .map(|ms| Duration::from_millis_f64(ms, timebase))
            .filter(|max_wait| *max_wait > Duration::ZERO);
        let shared = Rc::new_cyclic(|this| DebounceShared {
            this: this.clone(),
            host: self.host,
            config: self.config,
            delay,
            max_wait,
            state: RefCell::new(DebounceState {
                pending: false,
                last_payload: None,
                unconsumed: false,
                did_skip_initial: false,
                cycle_start_at: None,
                trailing: None,
                max_wait: None,
                next_token: 0,
            }),
            consumer: Slot::new(self.consumer),
            on_error: self.on_error.map(Slot::new),
            tracer: RefCell::new(self.tracer),
        });
        DebounceController { shared }
    }
}
