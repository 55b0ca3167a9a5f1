// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tick scheduler: merge bursts of payloads into one delivery per tick.
//!
//! A [`TickScheduler`] sits on one [`TimingDriver`]. Every
//! [`schedule`](TickScheduler::schedule) before the next tick is folded into
//! a single pending payload with the merge function (take-latest by default),
//! and the consumer runs once when the tick fires:
//!
//! ```text
//!   schedule(p) ──► should_schedule? ──► merge(prev, p) ──► arm (once)
//!                                                             │
//!                         ┌───────────────────────────────────┘
//!                         ▼
//!   tick ──► rate limit ──► should_invoke? ──► consumer(&p, &meta)
//!              │ too soon                          │ Err / panic
//!              ▼                                   ▼
//!           re-arm, keep pending               on_error, carry on
//! ```
//!
//! At most one driver request is outstanding per scheduler. The request is
//! pinned together with the driver that issued it, so
//! [`set_driver`](TickScheduler::set_driver) never orphans a cancel.
//!
//! No internal borrow is held while user code runs: the consumer and hooks
//! may call back into the scheduler.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::fmt;

use crate::driver::{DriverKind, RequestId, TimingDriver};
use crate::invoke::{
    BoxError, Consumer, CostWarning, DeliveryError, InvokeMeta, InvokeReason, Slot, call_consumer,
};
use crate::time::{Duration, HostTime};
use crate::trace::{
    ArmFailedEvent, CancelEvent, DeliveryErrorEvent, DeliveryEvent, DiscardEvent, ScheduleEvent,
    Source, TickSkippedEvent, TraceSink, Tracer,
};

/// Folds a newly scheduled payload into the pending one.
pub type MergeFn<P> = Box<dyn FnMut(P, P) -> P>;

/// Decides whether a `schedule` call is accepted, given the pending payload.
pub type ScheduleGuard<P> = Box<dyn FnMut(Option<&P>, &P) -> bool>;

/// Decides at delivery time whether the payload reaches the consumer.
pub type InvokeGuard<P> = Box<dyn FnMut(&P, &InvokeMeta) -> bool>;

/// Receives consumer failures.
pub type ErrorHook<P> = Box<dyn FnMut(&DeliveryError, &P, &InvokeMeta)>;

/// Receives cost warnings.
pub type WarnHook = Box<dyn FnMut(&CostWarning)>;

/// Wraps a delivery; must call `run` exactly once for the consumer to run.
pub type BatchFn = Box<dyn FnMut(&mut dyn FnMut())>;

/// Numeric options of a [`TickScheduler`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickOptions {
    /// Measure consumer cost on the driver clock.
    pub monitor: bool,
    /// Cost above which a [`CostWarning`] is reported, in milliseconds.
    pub warn_threshold_ms: f64,
    /// Upper bound on deliveries per second. Ticks arriving sooner are
    /// skipped.
    pub max_frequency: Option<f64>,
    /// Make [`cancel`](TickScheduler::cancel) flush instead of discarding.
    pub flush_on_cancel: bool,
}

impl TickOptions {
    /// Defaults with cost monitoring enabled.
    #[must_use]
    pub const fn monitored() -> Self {
        Self {
            monitor: true,
            ..Self::DEFAULT
        }
    }

    const DEFAULT: Self = Self {
        monitor: false,
        warn_threshold_ms: 16.0,
        max_frequency: None,
        flush_on_cancel: false,
    };
}

impl Default for TickOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

struct Armed {
    driver: Rc<dyn TimingDriver>,
    id: RequestId,
    generation: u64,
}

struct TickState<P> {
    payload: Option<P>,
    armed: Option<Armed>,
    generation: u64,
    last_invoke_at: Option<HostTime>,
}

struct TickShared<P> {
    this: Weak<Self>,
    driver: RefCell<Rc<dyn TimingDriver>>,
    state: RefCell<TickState<P>>,
    consumer: Slot<Consumer<P>>,
    merge: Option<Slot<MergeFn<P>>>,
    should_schedule: Option<Slot<ScheduleGuard<P>>>,
    should_invoke: Option<Slot<InvokeGuard<P>>>,
    on_error: Option<Slot<ErrorHook<P>>>,
    on_warn: Option<Slot<WarnHook>>,
    batch: Option<Slot<BatchFn>>,
    tracer: RefCell<Tracer>,
    options: TickOptions,
}

impl<P: 'static> TickShared<P> {
    fn driver(&self) -> Rc<dyn TimingDriver> {
        Rc::clone(&self.driver.borrow())
    }

    fn with_tracer(&self, f: impl FnOnce(&mut Tracer)) {
        // A sink that re-enters the scheduler loses the nested event.
        if let Ok(mut tracer) = self.tracer.try_borrow_mut() {
            f(&mut tracer);
        }
    }

    fn fold(&self, prev: Option<P>, next: P) -> P {
        let Some(prev) = prev else {
            return next;
        };
        let Some(slot) = &self.merge else {
            return next;
        };
        let Some(mut merge) = slot.take() else {
            // Re-entered from inside the merge function.
            return next;
        };
        let merged = merge(prev, next);
        slot.restore(merge);
        merged
    }

    fn accepts(&self, pending: Option<&P>, next: &P) -> bool {
        let Some(slot) = &self.should_schedule else {
            return true;
        };
        let Some(mut guard) = slot.take() else {
            return true;
        };
        let accepted = guard(pending, next);
        slot.restore(guard);
        accepted
    }

    /// Stores `payload` as pending, folding in anything a hook scheduled
    /// while it was out of the state.
    fn store(&self, mut payload: P) {
        loop {
            let nested = self.state.borrow_mut().payload.take();
            match nested {
                Some(nested) => payload = self.fold(Some(payload), nested),
                None => break,
            }
        }
        self.state.borrow_mut().payload = Some(payload);
    }

    fn schedule(&self, next: P) {
        let prev = self.state.borrow_mut().payload.take();
        if !self.accepts(prev.as_ref(), &next) {
            if let Some(prev) = prev
                && self.state.borrow().armed.is_some()
            {
                self.store(prev);
            }
            return;
        }
        let coalesced = prev.is_some();
        let merged = self.fold(prev, next);
        self.store(merged);

        let driver = self.driver();
        self.with_tracer(|t| {
            t.schedule(&ScheduleEvent {
                source: Source::Tick,
                at: driver.now(),
                coalesced,
            });
        });
        if self.state.borrow().armed.is_none() {
            self.arm();
        }
    }

    /// Requests a tick from the current driver. On failure the scheduler goes
    /// back to idle.
    fn arm(&self) {
        let driver = self.driver();
        let generation = {
            let mut state = self.state.borrow_mut();
            state.generation = state.generation.wrapping_add(1);
            state.generation
        };
        let this = self.this.clone();
        let requested = driver.request(Box::new(move |ts| {
            if let Some(shared) = this.upgrade() {
                shared.on_tick(generation, ts);
            }
        }));
        match requested {
            Some(id) => {
                self.state.borrow_mut().armed = Some(Armed {
                    driver,
                    id,
                    generation,
                });
            }
            None => {
                let dropped = {
                    let mut state = self.state.borrow_mut();
                    state.armed = None;
                    state.payload.take()
                };
                drop(dropped);
                let event = ArmFailedEvent {
                    source: Source::Tick,
                    at: driver.now(),
                    driver: driver.kind(),
                };
                self.with_tracer(|t| t.arm_failed(&event));
            }
        }
    }

    fn on_tick(&self, generation: u64, ts: HostTime) {
        let armed = {
            let mut state = self.state.borrow_mut();
            if state
                .armed
                .as_ref()
                .is_some_and(|armed| armed.generation == generation)
            {
                state.armed.take()
            } else {
                None
            }
        };
        let Some(Armed { driver, .. }) = armed else {
            return;
        };
        // `last_invoke_at` is a clock reading, so the limit compares clock
        // readings too; the frame stamp may lag the clock.
        let now = driver.now();

        if let Some(hz) = self.options.max_frequency {
            let last = self.state.borrow().last_invoke_at;
            if let (Some(min_interval), Some(last)) = (Duration::from_hz(hz, driver.timebase()), last)
            {
                let since_last = now.saturating_duration_since(last);
                if since_last < min_interval {
                    self.with_tracer(|t| {
                        t.tick_skipped(&TickSkippedEvent {
                            at: now,
                            since_last,
                            min_interval,
                        });
                    });
                    self.arm();
                    return;
                }
            }
        }

        let Some(payload) = self.state.borrow_mut().payload.take() else {
            return;
        };
        let frame_like = driver.kind().is_frame_like();
        let meta = InvokeMeta {
            reason: if frame_like {
                InvokeReason::Frame
            } else {
                InvokeReason::Tick
            },
            at: now,
            tick_timestamp: frame_like.then_some(ts),
            cost: None,
        };
        self.deliver(payload, meta, &driver);
    }

    /// Puts a payload that could not be delivered back as pending.
    fn requeue(&self, payload: P) {
        self.store(payload);
        if self.state.borrow().armed.is_none() {
            self.arm();
        }
    }

    fn deliver(&self, payload: P, mut meta: InvokeMeta, driver: &Rc<dyn TimingDriver>) {
        let Some(mut consumer) = self.consumer.take() else {
            // The consumer is on the stack; try again next tick.
            self.requeue(payload);
            return;
        };

        if let Some(slot) = &self.should_invoke
            && let Some(mut guard) = slot.take()
        {
            let proceed = guard(&payload, &meta);
            slot.restore(guard);
            if !proceed {
                self.consumer.restore(consumer);
                self.with_tracer(|t| {
                    t.discard(&DiscardEvent {
                        source: Source::Tick,
                        reason: meta.reason,
                        at: meta.at,
                    });
                });
                return;
            }
        }

        self.state.borrow_mut().last_invoke_at = Some(meta.at);
        let started = driver.now();
        let mut result = Ok(());
        match self.batch.as_ref().and_then(|slot| slot.take().map(|b| (slot, b))) {
            Some((slot, mut batch)) => {
                let mut run = || result = call_consumer(&mut consumer, &payload, &meta);
                batch(&mut run);
                slot.restore(batch);
            }
            None => result = call_consumer(&mut consumer, &payload, &meta),
        }
        self.consumer.restore(consumer);

        if self.options.monitor {
            let cost = driver.now().saturating_duration_since(started);
            meta.cost = Some(cost);
            let threshold = Duration::from_millis_f64(self.options.warn_threshold_ms, driver.timebase());
            if cost > threshold {
                self.warn(&CostWarning {
                    message: "tick delivery exceeded its cost threshold",
                    reason: meta.reason,
                    at: meta.at,
                    cost,
                    threshold,
                });
            }
        }

        self.with_tracer(|t| {
            t.delivery(&DeliveryEvent {
                source: Source::Tick,
                reason: meta.reason,
                at: meta.at,
                tick_timestamp: meta.tick_timestamp,
                cost: meta.cost,
                failed: result.is_err(),
            });
        });
        if let Err(error) = result {
            self.report(&error, &payload, &meta);
        }
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
            source: Source::Tick,
            reason: meta.reason,
            at: meta.at,
        };
        self.with_tracer(|t| t.delivery_error(&event, error));
    }

    fn warn(&self, warning: &CostWarning) {
        if let Some(slot) = &self.on_warn
            && let Some(mut hook) = slot.take()
        {
            hook(warning);
            slot.restore(hook);
            return;
        }
        self.with_tracer(|t| t.cost_warning(warning));
    }

    fn flush(&self) {
        if self.consumer.is_busy() {
            // Re-entrant flush; the payload waits for the next tick.
            return;
        }
        let (payload, armed) = {
            let mut state = self.state.borrow_mut();
            let Some(payload) = state.payload.take() else {
                return;
            };
            (payload, state.armed.take())
        };
        if let Some(armed) = armed {
            armed.driver.cancel(armed.id);
        }
        let driver = self.driver();
        let meta = InvokeMeta::new(InvokeReason::Flush, driver.now());
        self.deliver(payload, meta, &driver);
    }

    fn cancel(&self) {
        if self.options.flush_on_cancel {
            self.flush();
        }
        let (payload, armed) = {
            let mut state = self.state.borrow_mut();
            (state.payload.take(), state.armed.take())
        };
        if let Some(armed) = &armed {
            armed.driver.cancel(armed.id);
        }
        if payload.is_some() || armed.is_some() {
            let at = self.driver().now();
            self.with_tracer(|t| {
                t.cancel(&CancelEvent {
                    source: Source::Tick,
                    at,
                });
            });
        }
        drop(payload);
    }
}

/// Coalesces scheduled payloads into one consumer call per driver tick.
///
/// Created with [`TickScheduler::builder`]. Dropping the scheduler cancels
/// any pending delivery.
pub struct TickScheduler<P: 'static> {
    shared: Rc<TickShared<P>>,
}

impl<P: 'static> fmt::Debug for TickScheduler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickScheduler")
            .field("driver", &self.driver_kind())
            .field("pending", &self.is_pending())
            .field("last_invoked_at", &self.last_invoked_at())
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl<P: 'static> TickScheduler<P> {
    /// Starts building a scheduler on `driver` delivering to `consumer`.
    pub fn builder(
        driver: Rc<dyn TimingDriver>,
        consumer: impl FnMut(&P, &InvokeMeta) -> Result<(), BoxError> + 'static,
    ) -> TickSchedulerBuilder<P> {
        TickSchedulerBuilder {
            driver,
            consumer: Box::new(consumer),
            merge: None,
            should_schedule: None,
            should_invoke: None,
            on_error: None,
            on_warn: None,
            batch: None,
            tracer: Tracer::fallback(),
            options: TickOptions::default(),
        }
    }

    /// Creates a take-latest scheduler with default options.
    pub fn new(
        driver: Rc<dyn TimingDriver>,
        consumer: impl FnMut(&P, &InvokeMeta) -> Result<(), BoxError> + 'static,
    ) -> Self {
        Self::builder(driver, consumer).build()
    }

    /// Merges `payload` into the pending one and arms a tick if none is
    /// outstanding.
    pub fn schedule(&self, payload: P) {
        self.shared.schedule(payload);
    }

    /// Drops the pending payload and revokes the outstanding tick.
    ///
    /// With [`TickOptions::flush_on_cancel`] the payload is delivered first.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Delivers the pending payload now with [`InvokeReason::Flush`].
    ///
    /// Does nothing when idle, and nothing when called from inside the
    /// consumer.
    pub fn flush(&self) {
        self.shared.flush();
    }

    /// Same as [`cancel`](Self::cancel); for teardown paths.
    pub fn dispose(&self) {
        self.shared.cancel();
    }

    /// Returns `true` while a payload waits for delivery.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.state.borrow().payload.is_some()
    }

    /// A copy of the pending payload.
    #[must_use]
    pub fn latest_payload(&self) -> Option<P>
    where
        P: Clone,
    {
        self.shared.state.borrow().payload.clone()
    }

    /// Runs `f` with the pending payload.
    pub fn with_latest_payload<R>(&self, f: impl FnOnce(Option<&P>) -> R) -> R {
        let payload = self.shared.state.borrow_mut().payload.take();
        let out = f(payload.as_ref());
        // `f` may have cancelled; only an armed scheduler keeps a payload.
        if let Some(payload) = payload
            && self.shared.state.borrow().armed.is_some()
        {
            self.shared.store(payload);
        }
        out
    }

    /// When the consumer last started a delivery.
    #[must_use]
    pub fn last_invoked_at(&self) -> Option<HostTime> {
        self.shared.state.borrow().last_invoke_at
    }

    /// Kind of the driver used for new requests.
    #[must_use]
    pub fn driver_kind(&self) -> DriverKind {
        self.shared.driver.borrow().kind()
    }

    /// Switches to `driver` for future requests. An outstanding request
    /// stays with the driver that issued it.
    pub fn set_driver(&self, driver: Rc<dyn TimingDriver>) {
        let old = self.shared.driver.replace(driver);
        drop(old);
    }

    /// Replaces the consumer. Takes effect at the next delivery, also when
    /// called from inside the current consumer.
    pub fn set_consumer(
        &self,
        consumer: impl FnMut(&P, &InvokeMeta) -> Result<(), BoxError> + 'static,
    ) {
        self.shared.consumer.replace(Box::new(consumer));
    }
}

impl<P: 'static> Drop for TickScheduler<P> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

/// Builder for [`TickScheduler`].
pub struct TickSchedulerBuilder<P> {
    driver: Rc<dyn TimingDriver>,
    consumer: Consumer<P>,
    merge: Option<MergeFn<P>>,
    should_schedule: Option<ScheduleGuard<P>>,
    should_invoke: Option<InvokeGuard<P>>,
    on_error: Option<ErrorHook<P>>,
    on_warn: Option<WarnHook>,
    batch: Option<BatchFn>,
    tracer: Tracer,
    options: TickOptions,
}

impl<P> fmt::Debug for TickSchedulerBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickSchedulerBuilder")
            .field("driver", &self.driver.kind())
            .field("merge", &self.merge.is_some())
            .field("tracer", &self.tracer)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<P: 'static> TickSchedulerBuilder<P> {
    /// Folds a new payload into the pending one. Default: replace.
    #[must_use]
    pub fn merge(mut self, merge: impl FnMut(P, P) -> P + 'static) -> Self {
        self.merge = Some(Box::new(merge));
        self
    }

    /// Rejects `schedule` calls for which `guard(pending, next)` is `false`.
    #[must_use]
    pub fn should_schedule(mut self, guard: impl FnMut(Option<&P>, &P) -> bool + 'static) -> Self {
        self.should_schedule = Some(Box::new(guard));
        self
    }

    /// Discards a due payload when `guard(payload, meta)` is `false`.
    #[must_use]
    pub fn should_invoke(mut self, guard: impl FnMut(&P, &InvokeMeta) -> bool + 'static) -> Self {
        self.should_invoke = Some(Box::new(guard));
        self
    }

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

    /// Receives cost warnings. Default: the trace sink.
    #[must_use]
    pub fn on_warn(mut self, hook: impl FnMut(&CostWarning) + 'static) -> Self {
        self.on_warn = Some(Box::new(hook));
        self
    }

    /// Wraps every delivery in `batch`.
    #[must_use]
    pub fn batch(mut self, batch: impl FnMut(&mut dyn FnMut()) + 'static) -> Self {
        self.batch = Some(Box::new(batch));
        self
    }

    /// Sends diagnostics to `sink`.
    #[must_use]
    pub fn trace_sink(mut self, sink: impl TraceSink + 'static) -> Self {
        self.tracer = Tracer::new(Box::new(sink));
        self
    }

    /// Sets the numeric options.
    #[must_use]
    pub fn options(mut self, options: TickOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the scheduler.
    #[must_use]
    pub fn build(self) -> TickScheduler<P> {
        let shared = Rc::new_cyclic(|this| TickShared {
            this: this.clone(),
            driver: RefCell::new(self.driver),
            state: RefCell::new(TickState {
                payload: None,
                armed: None,
                generation: 0,
                last_invoke_at: None,
            }),
            consumer: Slot::new(self.consumer),
            merge: self.merge.map(Slot::new),
            should_schedule: self.should_schedule.map(Slot::new),
            should_invoke: self.should_invoke.map(Slot::new),
            on_error: self.on_error.map(Slot::new),
            on_warn: self.on_warn.map(Slot::new),
            batch: self.batch.map(Slot::new),
            tracer: RefCell::new(self.tracer),
            options: self.options,
        });
        TickScheduler { shared }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use core::cell::{Cell, OnceCell};

    use super::*;
    use crate::driver::NoopDriver;
    use crate::hub::EmulatedFrameDriver;
    use crate::testing::{ManualClock, ManualFrameDriver, ManualTimerHost};
    use crate::timer::TimerHost;

    type Log = Rc<RefCell<Vec<(u32, InvokeMeta)>>>;

    fn recorder(log: &Log) -> impl FnMut(&u32, &InvokeMeta) -> Result<(), BoxError> + 'static {
        let log = Rc::clone(log);
        move |p, meta| {
            log.borrow_mut().push((*p, *meta));
            Ok(())
        }
    }

    fn payloads(log: &Log) -> Vec<u32> {
        log.borrow().iter().map(|(p, _)| *p).collect()
    }

    fn frame_setup() -> (ManualClock, Rc<ManualFrameDriver>, Rc<dyn TimingDriver>) {
        let clock = ManualClock::new();
        let frames = Rc::new(ManualFrameDriver::new(clock.clone()));
        let driver: Rc<dyn TimingDriver> = frames.clone();
        (clock, frames, driver)
    }

    fn hub_setup() -> (Rc<ManualTimerHost>, Rc<dyn TimingDriver>) {
        let clock = ManualClock::new();
        let host = Rc::new(ManualTimerHost::new(clock.clone()));
        let dyn_host: Rc<dyn TimerHost> = host.clone();
        let hub = EmulatedFrameDriver::new(
            dyn_host,
            Duration::from_millis_f64(16.0, clock.timebase()),
        );
        (host, hub)
    }

    #[test]
    fn burst_before_tick_delivers_latest_once() {
        let (clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&log));

        for p in 1..=3 {
            scheduler.schedule(p);
        }
        assert!(scheduler.is_pending());
        assert_eq!(frames.queued(), 1, "one request for the whole burst");

        frames.advance_and_fire(16.0);
        assert_eq!(payloads(&log), [3]);
        let meta = log.borrow()[0].1;
        assert_eq!(meta.reason, InvokeReason::Frame);
        assert_eq!(meta.tick_timestamp, Some(clock.now()));
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn merge_folds_in_call_order() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::builder(driver, recorder(&log))
            .merge(|prev, next| prev * 10 + next)
            .build();

        scheduler.schedule(1);
        scheduler.schedule(2);
        scheduler.schedule(3);
        assert_eq!(scheduler.latest_payload(), Some(123));
        frames.fire_frame();
        assert_eq!(payloads(&log), [123]);
    }

    #[test]
    fn flush_when_idle_is_a_no_op() {
        let (_clock, _frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::<u32>::new(driver, recorder(&log));

        scheduler.flush();
        scheduler.flush();
        assert!(log.borrow().is_empty(), "nothing to flush");
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn flush_delivers_now_and_revokes_tick() {
        let (clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&log));

        clock.advance_ms(5.0);
        scheduler.schedule(7);
        scheduler.flush();

        assert_eq!(payloads(&log), [7]);
        let meta = log.borrow()[0].1;
        assert_eq!(meta.reason, InvokeReason::Flush);
        assert_eq!(meta.at, clock.now(), "flush uses the current clock");
        assert_eq!(meta.tick_timestamp, None);
        assert_eq!(frames.queued(), 0, "request revoked");

        frames.fire_frame();
        assert_eq!(log.borrow().len(), 1, "no double delivery");
    }

    #[test]
    fn cancel_prevents_delivery_and_clears_hub_timer() {
        let (host, driver) = hub_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&log));

        scheduler.schedule(1);
        assert_eq!(host.armed_count(), 1);
        scheduler.cancel();
        assert!(!scheduler.is_pending(), "cancel is synchronous");
        assert_eq!(host.armed_count(), 0, "empty window must not fire");

        host.advance_ms(100.0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn emulated_ticks_carry_no_frame_timestamp() {
        let (host, driver) = hub_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&log));

        scheduler.schedule(4);
        host.advance_ms(16.0);
        assert_eq!(payloads(&log), [4]);
        let meta = log.borrow()[0].1;
        assert_eq!(meta.reason, InvokeReason::Tick);
        assert_eq!(meta.tick_timestamp, None);
        assert_eq!(scheduler.driver_kind(), DriverKind::Timer);
    }

    #[test]
    fn should_schedule_sees_pending_payload() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::builder(driver, recorder(&log))
            .should_schedule(|pending, next| pending.is_none() && *next != 0)
            .build();

        scheduler.schedule(0);
        assert!(!scheduler.is_pending(), "rejected call is a no-op");
        assert_eq!(frames.queued(), 0);

        scheduler.schedule(1);
        scheduler.schedule(2);
        frames.fire_frame();
        assert_eq!(payloads(&log), [1], "first accepted payload kept");
    }

    #[test]
    fn should_invoke_discards_without_retry() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::builder(driver, recorder(&log))
            .should_invoke(|p, _| p % 2 == 0)
            .build();

        scheduler.schedule(1);
        frames.fire_frame();
        assert!(log.borrow().is_empty(), "odd payload discarded");
        assert!(!scheduler.is_pending());
        assert_eq!(frames.queued(), 0, "no retry");

        scheduler.schedule(2);
        frames.fire_frame();
        assert_eq!(payloads(&log), [2]);
    }

    #[test]
    fn max_frequency_skips_ticks_until_interval_passes() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::builder(driver, recorder(&log))
            .options(TickOptions {
                max_frequency: Some(10.0),
                ..TickOptions::default()
            })
            .build();

        scheduler.schedule(1);
        frames.advance_and_fire(16.0);
        assert_eq!(payloads(&log), [1], "first delivery is never limited");

        scheduler.schedule(2);
        frames.advance_and_fire(16.0);
        assert_eq!(log.borrow().len(), 1, "16 ms after last delivery: skipped");
        assert!(scheduler.is_pending(), "payload kept");
        assert_eq!(frames.queued(), 1, "re-armed for the next tick");

        frames.advance_and_fire(50.0);
        assert_eq!(log.borrow().len(), 1, "66 ms: still skipped");

        frames.advance_and_fire(40.0);
        assert_eq!(payloads(&log), [1, 2], "106 ms: delivered");
        assert!(!scheduler.is_pending());
    }

    /// Frame driver whose clock reads `lag` past each frame stamp, like rAF
    /// callbacks that run some time after vsync.
    struct LateFrames {
        frames: Rc<ManualFrameDriver>,
        lag: Duration,
    }

    impl TimingDriver for LateFrames {
        fn kind(&self) -> DriverKind {
            DriverKind::Frame
        }

        fn now(&self) -> HostTime {
            self.frames.now().saturating_add(self.lag)
        }

        fn timebase(&self) -> crate::time::Timebase {
            self.frames.timebase()
        }

        fn request(&self, callback: crate::driver::TickCallback) -> Option<RequestId> {
            self.frames.request(callback)
        }

        fn cancel(&self, id: RequestId) {
            self.frames.cancel(id);
        }
    }

    #[test]
    fn max_frequency_measures_on_the_delivery_clock() {
        let (clock, frames, _driver) = frame_setup();
        let late = Rc::new(LateFrames {
            frames: Rc::clone(&frames),
            lag: Duration::from_millis_f64(2.0, clock.timebase()),
        });
        let log: Log = Rc::default();
        let scheduler = TickScheduler::builder(late, recorder(&log))
            .options(TickOptions {
                max_frequency: Some(50.0),
                ..TickOptions::default()
            })
            .build();

        for p in 0..10 {
            scheduler.schedule(p);
            frames.advance_and_fire(20.0);
        }
        assert_eq!(
            payloads(&log),
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
            "frames exactly one interval apart are never skipped"
        );
        let meta = log.borrow()[0].1;
        assert_eq!(meta.tick_timestamp, Some(HostTime(20_000)), "frame stamp");
        assert_eq!(meta.at, HostTime(22_000), "clock reading");
    }

    #[test]
    fn failing_consumer_does_not_block_next_delivery() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let errors = Rc::new(RefCell::new(Vec::new()));

        let inner_log = Rc::clone(&log);
        let inner_errors = Rc::clone(&errors);
        let scheduler = TickScheduler::builder(driver, move |p: &u32, meta: &InvokeMeta| {
            inner_log.borrow_mut().push((*p, *meta));
            if *p == 1 {
                return Err("first delivery fails".into());
            }
            Ok(())
        })
        .on_error(move |_error, p, meta| inner_errors.borrow_mut().push((*p, meta.reason)))
        .build();

        scheduler.schedule(1);
        frames.fire_frame();
        assert!(!scheduler.is_pending(), "bookkeeping intact after failure");

        scheduler.schedule(2);
        frames.fire_frame();
        assert_eq!(payloads(&log), [1, 2]);
        assert_eq!(*errors.borrow(), [(1, InvokeReason::Frame)]);
    }

    #[derive(Default)]
    struct FailureSink {
        errors: Rc<Cell<u32>>,
        arm_failures: Rc<Cell<u32>>,
    }

    impl TraceSink for FailureSink {
        fn on_delivery_error(&mut self, _e: &DeliveryErrorEvent, _error: &DeliveryError) {
            self.errors.set(self.errors.get() + 1);
        }

        fn on_arm_failed(&mut self, e: &ArmFailedEvent) {
            assert_eq!(e.source, Source::Tick);
            self.arm_failures.set(self.arm_failures.get() + 1);
        }
    }

    #[test]
    fn errors_reach_trace_sink_without_hook() {
        let (_clock, frames, driver) = frame_setup();
        let sink = FailureSink::default();
        let errors = Rc::clone(&sink.errors);
        let scheduler = TickScheduler::builder(driver, |_: &u32, _: &InvokeMeta| Err("nope".into()))
            .trace_sink(sink)
            .build();

        scheduler.schedule(1);
        frames.fire_frame();
        assert_eq!(errors.get(), 1);
    }

    #[test]
    fn unconfigured_scheduler_reports_to_fallback_sink() {
        let (_clock, _frames, driver) = frame_setup();
        let builder = TickScheduler::<u32>::builder(driver, |_, _| Err("unhandled".into()));
        assert_eq!(
            builder.tracer.has_sink(),
            cfg!(feature = "std"),
            "failures are logged under std"
        );
    }

    #[cfg(feature = "std")]
    #[test]
    fn panicking_consumer_is_isolated() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let panics = Rc::new(Cell::new(0_u32));

        let inner_log = Rc::clone(&log);
        let inner_panics = Rc::clone(&panics);
        let scheduler = TickScheduler::builder(driver, move |p: &u32, meta: &InvokeMeta| {
            assert!(*p != 1, "payload one panics");
            inner_log.borrow_mut().push((*p, *meta));
            Ok(())
        })
        .on_error(move |error, _, _| {
            if matches!(error, DeliveryError::Panicked(_)) {
                inner_panics.set(inner_panics.get() + 1);
            }
        })
        .build();

        scheduler.schedule(1);
        frames.fire_frame();
        scheduler.schedule(2);
        frames.fire_frame();
        assert_eq!(panics.get(), 1);
        assert_eq!(payloads(&log), [2]);
    }

    #[test]
    fn slow_delivery_reports_cost_warning() {
        let (clock, frames, driver) = frame_setup();
        let warnings = Rc::new(RefCell::new(Vec::new()));

        let inner_clock = clock.clone();
        let inner_warnings = Rc::clone(&warnings);
        let scheduler = TickScheduler::builder(driver, move |_: &u32, _: &InvokeMeta| {
            inner_clock.advance_ms(20.0);
            Ok(())
        })
        .on_warn(move |w| inner_warnings.borrow_mut().push(*w))
        .options(TickOptions::monitored())
        .build();

        scheduler.schedule(1);
        frames.fire_frame();
        let warnings = warnings.borrow();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].cost, Duration::from_millis_f64(20.0, clock.timebase()));
        assert_eq!(warnings[0].threshold, Duration::from_millis_f64(16.0, clock.timebase()));
    }

    #[test]
    fn fast_delivery_does_not_warn() {
        let (_clock, frames, driver) = frame_setup();
        let warned = Rc::new(Cell::new(false));
        let inner = Rc::clone(&warned);
        let scheduler = TickScheduler::builder(driver, |_: &u32, _: &InvokeMeta| Ok(()))
            .on_warn(move |_| inner.set(true))
            .options(TickOptions::monitored())
            .build();

        scheduler.schedule(1);
        frames.fire_frame();
        assert!(!warned.get());
    }

    #[test]
    fn batch_wraps_delivery() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let batches = Rc::new(Cell::new(0_u32));
        let inner = Rc::clone(&batches);
        let scheduler = TickScheduler::builder(driver, recorder(&log))
            .batch(move |run| {
                inner.set(inner.get() + 1);
                run();
            })
            .build();

        scheduler.schedule(9);
        frames.fire_frame();
        assert_eq!(batches.get(), 1);
        assert_eq!(payloads(&log), [9]);
    }

    #[test]
    fn arm_failure_resets_to_idle() {
        let sink = FailureSink::default();
        let arm_failures = Rc::clone(&sink.arm_failures);
        let log: Log = Rc::default();
        let scheduler = TickScheduler::builder(Rc::new(NoopDriver::default()), recorder(&log))
            .trace_sink(sink)
            .build();

        scheduler.schedule(1);
        assert!(!scheduler.is_pending(), "no way to fire, so not pending");
        assert_eq!(scheduler.latest_payload(), None);
        assert_eq!(arm_failures.get(), 1);
    }

    #[test]
    fn driver_swap_keeps_outstanding_request_pinned() {
        let (clock, first, driver) = frame_setup();
        let second = Rc::new(ManualFrameDriver::new(clock.clone()));
        let log: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&log));

        scheduler.schedule(1);
        scheduler.set_driver(second.clone());
        scheduler.schedule(2);
        assert_eq!(first.queued(), 1, "coalesced into the pinned request");
        assert_eq!(second.queued(), 0);

        first.fire_frame();
        assert_eq!(payloads(&log), [2]);

        scheduler.schedule(3);
        assert_eq!(second.queued(), 1, "new requests use the new driver");
        scheduler.cancel();
        assert_eq!(second.queued(), 0, "cancel goes through the pinned driver");
    }

    #[test]
    fn consumer_can_reschedule_from_delivery() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let handle: Rc<OnceCell<Weak<TickScheduler<u32>>>> = Rc::default();

        let inner_log = Rc::clone(&log);
        let inner_handle = Rc::clone(&handle);
        let scheduler = Rc::new(TickScheduler::new(driver, move |p: &u32, meta: &InvokeMeta| {
            inner_log.borrow_mut().push((*p, *meta));
            if let Some(scheduler) = inner_handle.get().and_then(Weak::upgrade)
                && *p < 3
            {
                scheduler.schedule(p + 1);
                scheduler.flush();
                assert!(scheduler.is_pending(), "nested flush waits for the tick");
            }
            Ok(())
        }));
        assert!(handle.set(Rc::downgrade(&scheduler)).is_ok(), "handle set once");

        scheduler.schedule(1);
        frames.fire_frame();
        assert_eq!(payloads(&log), [1], "nested schedule lands in the next frame");
        frames.fire_frame();
        frames.fire_frame();
        assert_eq!(payloads(&log), [1, 2, 3]);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn dropping_scheduler_cancels() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&log));

        scheduler.schedule(1);
        drop(scheduler);
        assert_eq!(frames.queued(), 0);
        frames.fire_frame();
        assert!(log.borrow().is_empty(), "nothing fires after teardown");
    }

    #[test]
    fn flush_on_cancel_delivers() {
        let (_clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::builder(driver, recorder(&log))
            .options(TickOptions {
                flush_on_cancel: true,
                ..TickOptions::default()
            })
            .build();

        scheduler.schedule(5);
        scheduler.dispose();
        assert_eq!(payloads(&log), [5]);
        assert_eq!(log.borrow()[0].1.reason, InvokeReason::Flush);
        assert!(!scheduler.is_pending());
        assert_eq!(frames.queued(), 0);
    }

    #[test]
    fn set_consumer_takes_effect_at_next_delivery() {
        let (_clock, frames, driver) = frame_setup();
        let old: Log = Rc::default();
        let new: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&old));

        scheduler.schedule(1);
        scheduler.set_consumer(recorder(&new));
        frames.fire_frame();
        assert!(old.borrow().is_empty());
        assert_eq!(payloads(&new), [1]);
    }

    #[test]
    fn payload_accessors() {
        let (clock, frames, driver) = frame_setup();
        let log: Log = Rc::default();
        let scheduler = TickScheduler::new(driver, recorder(&log));
        assert_eq!(scheduler.last_invoked_at(), None);

        scheduler.schedule(8);
        assert_eq!(scheduler.with_latest_payload(|p| p.copied()), Some(8));
        assert!(scheduler.is_pending(), "reading does not consume");

        frames.advance_and_fire(16.0);
        assert_eq!(scheduler.last_invoked_at(), Some(clock.now()));
        assert_eq!(scheduler.with_latest_payload(|p| p.copied()), None);
    }
}
