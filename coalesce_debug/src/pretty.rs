// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are converted to milliseconds using a [`Timebase`].

use std::io::Write;

use coalesce_core::invoke::{CostWarning, DeliveryError};
use coalesce_core::time::{Duration, HostTime, Timebase};
use coalesce_core::trace::{
    ArmFailedEvent, CancelEvent, CycleEnd, CycleEndEvent, CycleStartEvent, DeliveryErrorEvent,
    DeliveryEvent, DiscardEvent, ScheduleEvent, Source, TickSkippedEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            timebase,
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }

    /// Returns the destination, consuming the sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ms(&self, t: HostTime) -> f64 {
        Duration(t.ticks()).to_millis_f64(self.timebase)
    }

    fn span_ms(&self, d: Duration) -> f64 {
        d.to_millis_f64(self.timebase)
    }
}

fn source_name(source: Source) -> &'static str {
    match source {
        Source::Tick => "tick",
        Source::Debounce => "debounce",
    }
}

fn cycle_end_name(cause: CycleEnd) -> &'static str {
    match cause {
        CycleEnd::Trailing => "trailing",
        CycleEnd::Flush => "flush",
        CycleEnd::Cancel => "cancel",
        CycleEnd::ArmFailed => "arm-failed",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_schedule(&mut self, e: &ScheduleEvent) {
        let _ = writeln!(
            self.writer,
            "[{}:schedule] at {:.3}ms{}",
            source_name(e.source),
            self.ms(e.at),
            if e.coalesced { " (coalesced)" } else { "" },
        );
    }

    fn on_arm_failed(&mut self, e: &ArmFailedEvent) {
        let _ = writeln!(
            self.writer,
            "[{}:arm-failed] at {:.3}ms driver={}",
            source_name(e.source),
            self.ms(e.at),
            e.driver,
        );
    }

    fn on_tick_skipped(&mut self, e: &TickSkippedEvent) {
        let _ = writeln!(
            self.writer,
            "[tick:skipped] at {:.3}ms since_last={:.3}ms min={:.3}ms",
            self.ms(e.at),
            self.span_ms(e.since_last),
            self.span_ms(e.min_interval),
        );
    }

    fn on_discard(&mut self, e: &DiscardEvent) {
        let _ = writeln!(
            self.writer,
            "[{}:discard] {} at {:.3}ms",
            source_name(e.source),
            e.reason,
            self.ms(e.at),
        );
    }

    fn on_delivery(&mut self, e: &DeliveryEvent) {
        let status = if e.failed { "FAILED" } else { "ok" };
        let _ = write!(
            self.writer,
            "[{}:deliver] {} at {:.3}ms {status}",
            source_name(e.source),
            e.reason,
            self.ms(e.at),
        );
        if let Some(ts) = e.tick_timestamp {
            let _ = write!(self.writer, " frame={:.3}ms", self.ms(ts));
        }
        if let Some(cost) = e.cost {
            let _ = write!(self.writer, " cost={:.3}ms", self.span_ms(cost));
        }
        let _ = writeln!(self.writer);
    }

    fn on_delivery_error(&mut self, e: &DeliveryErrorEvent, error: &DeliveryError) {
        let _ = writeln!(
            self.writer,
            "[{}:error] {} at {:.3}ms: {error}",
            source_name(e.source),
            e.reason,
            self.ms(e.at),
        );
    }

    fn on_cost_warning(&mut self, w: &CostWarning) {
        let _ = writeln!(
            self.writer,
            "[warn] {} ({} at {:.3}ms cost={:.3}ms threshold={:.3}ms)",
            w.message,
            w.reason,
            self.ms(w.at),
            self.span_ms(w.cost),
            self.span_ms(w.threshold),
        );
    }

    fn on_cancel(&mut self, e: &CancelEvent) {
        let _ = writeln!(
            self.writer,
            "[{}:cancel] at {:.3}ms",
            source_name(e.source),
            self.ms(e.at),
        );
    }

    fn on_cycle_start(&mut self, e: &CycleStartEvent) {
        let _ = writeln!(self.writer, "[cycle:start] at {:.3}ms", self.ms(e.at));
    }

    fn on_cycle_end(&mut self, e: &CycleEndEvent) {
        let _ = write!(
            self.writer,
            "[cycle:end] {} at {:.3}ms",
            cycle_end_name(e.cause),
            self.ms(e.at),
        );
        if let Some(started) = e.started_at {
            let _ = write!(
                self.writer,
                " lasted={:.3}ms",
                self.span_ms(e.at.saturating_duration_since(started)),
            );
        }
        let _ = writeln!(self.writer);
    }
}
