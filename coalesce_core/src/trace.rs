// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Diagnostics for schedulers and debounce controllers.
//!
//! This module provides a [`TraceSink`] trait with one method per event. All
//! method bodies default to no-ops, so implementing only the events you care
//! about is fine.
//!
//! [`Tracer`] owns an optional boxed sink and is what schedulers hold.
//! Failure reports ([`DeliveryErrorEvent`], [`CostWarning`],
//! [`ArmFailedEvent`]) are always dispatched; they are how the default
//! "report and continue" policy surfaces problems. Every other event is a
//! hot-path event: when the `trace` feature is **off**, those `Tracer`
//! methods compile to nothing.
//!
//! # Crate features
//!
//! - `trace`: enables the hot-path `Tracer` method bodies (one branch per
//!   call).
//! - `std`: adds `ErrorLog`, which [`Tracer::fallback`] installs so that
//!   failures without a hook or sink still reach stderr.

use alloc::boxed::Box;
#[cfg(feature = "std")]
use std::io::Write;

use crate::driver::DriverKind;
use crate::invoke::{CostWarning, DeliveryError, InvokeReason};
use crate::time::{Duration, HostTime};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which kind of owner emitted an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// A [`TickScheduler`](crate::tick::TickScheduler).
    Tick,
    /// A [`DebounceController`](crate::debounce::DebounceController).
    Debounce,
}

/// How a debounce cycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleEnd {
    /// The trailing timer fired.
    Trailing,
    /// `flush()` was called.
    Flush,
    /// `cancel()` was called.
    Cancel,
    /// The trailing timer could not be armed.
    ArmFailed,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted for every accepted `schedule`/`emit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleEvent {
    /// Emitting owner.
    pub source: Source,
    /// Clock reading at the call.
    pub at: HostTime,
    /// Whether the payload was merged into an already pending one.
    pub coalesced: bool,
}

/// Emitted when a driver or timer host refused to arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmFailedEvent {
    /// Emitting owner.
    pub source: Source,
    /// Clock reading at the failure.
    pub at: HostTime,
    /// Kind of the refusing driver; [`DriverKind::Timer`] for timer hosts.
    pub driver: DriverKind,
}

/// Emitted when a rate-limited tick is skipped and re-armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickSkippedEvent {
    /// Clock reading when the tick arrived.
    pub at: HostTime,
    /// Time since the last delivery.
    pub since_last: Duration,
    /// Required interval between deliveries.
    pub min_interval: Duration,
}

/// Emitted when an execution guard discards a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscardEvent {
    /// Emitting owner.
    pub source: Source,
    /// Reason the delivery would have had.
    pub reason: InvokeReason,
    /// Clock reading at the discard.
    pub at: HostTime,
}

/// Emitted after each consumer invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryEvent {
    /// Emitting owner.
    pub source: Source,
    /// Why the consumer ran.
    pub reason: InvokeReason,
    /// When delivery started.
    pub at: HostTime,
    /// Frame timestamp, for frame drivers.
    pub tick_timestamp: Option<HostTime>,
    /// Measured cost, when monitoring.
    pub cost: Option<Duration>,
    /// Whether the consumer failed.
    pub failed: bool,
}

/// Emitted when a consumer fails and no error hook handled it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryErrorEvent {
    /// Emitting owner.
    pub source: Source,
    /// Why the consumer ran.
    pub reason: InvokeReason,
    /// When delivery started.
    pub at: HostTime,
}

/// Emitted when pending work is cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CancelEvent {
    /// Emitting owner.
    pub source: Source,
    /// Clock reading at the cancel.
    pub at: HostTime,
}

/// Emitted when a debounce cycle opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleStartEvent {
    /// Time of the emit that opened the cycle.
    pub at: HostTime,
}

/// Emitted when a debounce cycle closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleEndEvent {
    /// When the cycle closed.
    pub at: HostTime,
    /// When it opened.
    pub started_at: Option<HostTime>,
    /// What closed it.
    pub cause: CycleEnd,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from schedulers and debounce controllers.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called for each accepted `schedule`/`emit`.
    fn on_schedule(&mut self, e: &ScheduleEvent) {
        _ = e;
    }

    /// Called when arming a tick or timer failed.
    fn on_arm_failed(&mut self, e: &ArmFailedEvent) {
        _ = e;
    }

    /// Called when a rate-limited tick is skipped.
    fn on_tick_skipped(&mut self, e: &TickSkippedEvent) {
        _ = e;
    }

    /// Called when a guard discards a payload.
    fn on_discard(&mut self, e: &DiscardEvent) {
        _ = e;
    }

    /// Called after each consumer invocation.
    fn on_delivery(&mut self, e: &DeliveryEvent) {
        _ = e;
    }

    /// Called when a consumer fails and no error hook is installed.
    fn on_delivery_error(&mut self, e: &DeliveryErrorEvent, error: &DeliveryError) {
        _ = (e, error);
    }

    /// Called when a monitored delivery exceeds its threshold and no warning
    /// hook is installed.
    fn on_cost_warning(&mut self, w: &CostWarning) {
        _ = w;
    }

    /// Called when pending work is cancelled.
    fn on_cancel(&mut self, e: &CancelEvent) {
        _ = e;
    }

    /// Called when a debounce cycle opens.
    fn on_cycle_start(&mut self, e: &CycleStartEvent) {
        _ = e;
    }

    /// Called when a debounce cycle closes.
    fn on_cycle_end(&mut self, e: &CycleEndEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// ErrorLog
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that writes failure reports as single lines and ignores
/// everything else.
///
/// [`Tracer::fallback`] uses one on stderr.
#[cfg(feature = "std")]
pub struct ErrorLog<W: Write = std::io::Stderr> {
    writer: W,
}

#[cfg(feature = "std")]
impl<W: Write> core::fmt::Debug for ErrorLog<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ErrorLog").finish_non_exhaustive()
    }
}

#[cfg(feature = "std")]
impl ErrorLog {
    /// Creates a log that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: std::io::stderr(),
        }
    }
}

#[cfg(feature = "std")]
impl<W: Write> ErrorLog<W> {
    /// Creates a log that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the destination, consuming the log.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(feature = "std")]
fn source_name(source: Source) -> &'static str {
    match source {
        Source::Tick => "tick",
        Source::Debounce => "debounce",
    }
}

#[cfg(feature = "std")]
impl<W: Write> TraceSink for ErrorLog<W> {
    fn on_arm_failed(&mut self, e: &ArmFailedEvent) {
        let _ = writeln!(
            self.writer,
            "coalesce: {} could not arm its {} driver",
            source_name(e.source),
            e.driver.as_str()
        );
    }

    fn on_delivery_error(&mut self, e: &DeliveryErrorEvent, error: &DeliveryError) {
        let _ = writeln!(
            self.writer,
            "coalesce: {} {} delivery: {error}",
            source_name(e.source),
            e.reason
        );
    }

    fn on_cost_warning(&mut self, w: &CostWarning) {
        let _ = writeln!(
            self.writer,
            "coalesce: {} ({}: cost {} ticks, threshold {} ticks)",
            w.message,
            w.reason,
            w.cost.ticks(),
            w.threshold.ticks()
        );
    }
}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Owner of an optional [`TraceSink`].
///
/// Failure reports always reach the sink. With the `trace` feature **off**,
/// every other method compiles to nothing.
#[derive(Default)]
pub struct Tracer {
    sink: Option<Box<dyn TraceSink>>,
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer")
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Tracer {
    /// Creates a tracer that dispatches to `sink`.
    #[inline]
    #[must_use]
    pub fn new(sink: Box<dyn TraceSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self { sink: None }
    }

    /// The tracer used when no sink is configured.
    ///
    /// With the `std` feature, failure reports go to an `ErrorLog` on
    /// stderr. Without it, this is [`Tracer::none`].
    #[must_use]
    pub fn fallback() -> Self {
        #[cfg(feature = "std")]
        {
            Self::new(Box::new(ErrorLog::stderr()))
        }
        #[cfg(not(feature = "std"))]
        {
            Self::none()
        }
    }

    /// Returns `true` if a sink is installed.
    #[inline]
    #[must_use]
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Returns `true` if hot-path events would reach a sink.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        cfg!(feature = "trace") && self.sink.is_some()
    }

    /// Emits a [`ScheduleEvent`].
    #[inline]
    pub fn schedule(&mut self, e: &ScheduleEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_schedule(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits an [`ArmFailedEvent`]. Always dispatched.
    #[inline]
    pub fn arm_failed(&mut self, e: &ArmFailedEvent) {
        if let Some(s) = &mut self.sink {
            s.on_arm_failed(e);
        }
    }

    /// Emits a [`TickSkippedEvent`].
    #[inline]
    pub fn tick_skipped(&mut self, e: &TickSkippedEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_tick_skipped(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`DiscardEvent`].
    #[inline]
    pub fn discard(&mut self, e: &DiscardEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_discard(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`DeliveryEvent`].
    #[inline]
    pub fn delivery(&mut self, e: &DeliveryEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_delivery(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`DeliveryErrorEvent`]. Always dispatched.
    #[inline]
    pub fn delivery_error(&mut self, e: &DeliveryErrorEvent, error: &DeliveryError) {
        if let Some(s) = &mut self.sink {
            s.on_delivery_error(e, error);
        }
    }

    /// Emits a [`CostWarning`]. Always dispatched.
    #[inline]
    pub fn cost_warning(&mut self, w: &CostWarning) {
        if let Some(s) = &mut self.sink {
            s.on_cost_warning(w);
        }
    }

    /// Emits a [`CancelEvent`].
    #[inline]
    pub fn cancel(&mut self, e: &CancelEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_cancel(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CycleStartEvent`].
    #[inline]
    pub fn cycle_start(&mut self, e: &CycleStartEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_cycle_start(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CycleEndEvent`].
    #[inline]
    pub fn cycle_end(&mut self, e: &CycleEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_cycle_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use super::*;
    use crate::invoke::{BoxError, InvokeReason};

    #[derive(Default)]
    struct RecordingSink {
        names: Rc<RefCell<Vec<&'static str>>>,
    }

    impl TraceSink for RecordingSink {
        fn on_schedule(&mut self, _e: &ScheduleEvent) {
            self.names.borrow_mut().push("schedule");
        }

        fn on_delivery_error(&mut self, _e: &DeliveryErrorEvent, _error: &DeliveryError) {
            self.names.borrow_mut().push("error");
        }

        fn on_cost_warning(&mut self, _w: &CostWarning) {
            self.names.borrow_mut().push("warning");
        }
    }

    fn schedule_event() -> ScheduleEvent {
        ScheduleEvent {
            source: Source::Tick,
            at: HostTime(10),
            coalesced: false,
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_schedule(&schedule_event());
        sink.on_cycle_end(&CycleEndEvent {
            at: HostTime(5),
            started_at: None,
            cause: CycleEnd::Cancel,
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        assert!(!tracer.is_active());
        tracer.schedule(&schedule_event());
        tracer.cost_warning(&CostWarning {
            message: "slow",
            reason: InvokeReason::Tick,
            at: HostTime(0),
            cost: Duration(20),
            threshold: Duration(16),
        });
    }

    #[test]
    fn failure_reports_always_dispatch() {
        let names = Rc::new(RefCell::new(Vec::new()));
        let mut tracer = Tracer::new(Box::new(RecordingSink {
            names: Rc::clone(&names),
        }));

        let error: BoxError = "boom".into();
        tracer.delivery_error(
            &DeliveryErrorEvent {
                source: Source::Debounce,
                reason: InvokeReason::Trailing,
                at: HostTime(1),
            },
            &DeliveryError::Failed(error),
        );
        tracer.cost_warning(&CostWarning {
            message: "slow",
            reason: InvokeReason::Frame,
            at: HostTime(0),
            cost: Duration(20),
            threshold: Duration(16),
        });
        assert_eq!(*names.borrow(), ["error", "warning"]);
    }

    #[cfg(feature = "std")]
    #[test]
    fn error_log_writes_failures_only() {
        let mut log = ErrorLog::with_writer(Vec::new());
        log.on_schedule(&schedule_event());
        log.on_delivery_error(
            &DeliveryErrorEvent {
                source: Source::Debounce,
                reason: InvokeReason::Trailing,
                at: HostTime(1),
            },
            &DeliveryError::Failed("boom".into()),
        );
        log.on_arm_failed(&ArmFailedEvent {
            source: Source::Tick,
            at: HostTime(2),
            driver: DriverKind::None,
        });

        let text = std::string::String::from_utf8(log.into_inner()).unwrap();
        assert_eq!(
            text,
            "coalesce: debounce trailing delivery: consumer failed: boom\n\
             coalesce: tick could not arm its none driver\n"
        );
    }

    #[test]
    fn fallback_tracer_has_a_sink_with_std() {
        assert_eq!(Tracer::fallback().has_sink(), cfg!(feature = "std"));
        assert!(!Tracer::none().has_sink());
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_hot_path_events() {
        let names = Rc::new(RefCell::new(Vec::new()));
        let mut tracer = Tracer::new(Box::new(RecordingSink {
            names: Rc::clone(&names),
        }));
        assert!(tracer.is_active());
        tracer.schedule(&schedule_event());
        assert_eq!(*names.borrow(), ["schedule"]);
    }
}
