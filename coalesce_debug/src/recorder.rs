// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events as
//! little-endian records into a buffer shared between all clones of the
//! sink. [`decode`] reads them back as an iterator of [`RecordedEvent`].
//!
//! Delivery errors are stored as their display string.

use std::cell::RefCell;
use std::rc::Rc;

use coalesce_core::driver::DriverKind;
use coalesce_core::invoke::{CostWarning, DeliveryError, InvokeReason};
use coalesce_core::time::{Duration, HostTime};
use coalesce_core::trace::{
    ArmFailedEvent, CancelEvent, CycleEnd, CycleEndEvent, CycleStartEvent, DeliveryErrorEvent,
    DeliveryEvent, DiscardEvent, ScheduleEvent, Source, TickSkippedEvent, TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_SCHEDULE: u8 = 1;
const TAG_ARM_FAILED: u8 = 2;
const TAG_TICK_SKIPPED: u8 = 3;
const TAG_DISCARD: u8 = 4;
const TAG_DELIVERY: u8 = 5;
const TAG_DELIVERY_ERROR: u8 = 6;
const TAG_COST_WARNING: u8 = 7;
const TAG_CANCEL: u8 = 8;
const TAG_CYCLE_START: u8 = 9;
const TAG_CYCLE_END: u8 = 10;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
///
/// Clones share the buffer.
#[derive(Clone, Debug, Default)]
pub struct RecorderSink {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.borrow().clone()
    }

    /// Decodes everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        decode(&self.buf.borrow()).collect()
    }

    /// Number of recorded bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.borrow().len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.borrow().is_empty()
    }

    /// Discards the recording.
    pub fn clear(&self) {
        self.buf.borrow_mut().clear();
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&self, v: u8) {
        self.buf.borrow_mut().push(v);
    }

    fn write_u32(&self, v: u32) {
        self.buf.borrow_mut().extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&self, v: u64) {
        self.buf.borrow_mut().extend_from_slice(&v.to_le_bytes());
    }

    fn write_option_u64(&self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_str(&self, s: &str) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "messages are capped at u32::MAX bytes for recording"
        )]
        let len = s.len().min(u32::MAX as usize) as u32;
        self.write_u32(len);
        self.buf
            .borrow_mut()
            .extend_from_slice(&s.as_bytes()[..len as usize]);
    }

    fn write_source(&self, s: Source) {
        self.write_u8(match s {
            Source::Tick => 0,
            Source::Debounce => 1,
        });
    }

    fn write_reason(&self, r: InvokeReason) {
        self.write_u8(match r {
            InvokeReason::Frame => 0,
            InvokeReason::Tick => 1,
            InvokeReason::Flush => 2,
            InvokeReason::Leading => 3,
            InvokeReason::Trailing => 4,
            InvokeReason::MaxWait => 5,
        });
    }

    fn write_driver(&self, d: DriverKind) {
        self.write_u8(match d {
            DriverKind::Frame => 0,
            DriverKind::Timer => 1,
            DriverKind::None => 2,
        });
    }

    fn write_cycle_end(&self, c: CycleEnd) {
        self.write_u8(match c {
            CycleEnd::Trailing => 0,
            CycleEnd::Flush => 1,
            CycleEnd::Cancel => 2,
            CycleEnd::ArmFailed => 3,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_schedule(&mut self, e: &ScheduleEvent) {
        self.write_u8(TAG_SCHEDULE);
        self.write_source(e.source);
        self.write_u64(e.at.ticks());
        self.write_u8(u8::from(e.coalesced));
    }

    fn on_arm_failed(&mut self, e: &ArmFailedEvent) {
        self.write_u8(TAG_ARM_FAILED);
        self.write_source(e.source);
        self.write_u64(e.at.ticks());
        self.write_driver(e.driver);
    }

    fn on_tick_skipped(&mut self, e: &TickSkippedEvent) {
        self.write_u8(TAG_TICK_SKIPPED);
        self.write_u64(e.at.ticks());
        self.write_u64(e.since_last.ticks());
        self.write_u64(e.min_interval.ticks());
    }

    fn on_discard(&mut self, e: &DiscardEvent) {
        self.write_u8(TAG_DISCARD);
        self.write_source(e.source);
        self.write_reason(e.reason);
        self.write_u64(e.at.ticks());
    }

    fn on_delivery(&mut self, e: &DeliveryEvent) {
        self.write_u8(TAG_DELIVERY);
        self.write_source(e.source);
        self.write_reason(e.reason);
        self.write_u64(e.at.ticks());
        self.write_option_u64(e.tick_timestamp.map(HostTime::ticks));
        self.write_option_u64(e.cost.map(Duration::ticks));
        self.write_u8(u8::from(e.failed));
    }

    fn on_delivery_error(&mut self, e: &DeliveryErrorEvent, error: &DeliveryError) {
        self.write_u8(TAG_DELIVERY_ERROR);
        self.write_source(e.source);
        self.write_reason(e.reason);
        self.write_u64(e.at.ticks());
        self.write_str(&error.to_string());
    }

    fn on_cost_warning(&mut self, w: &CostWarning) {
        self.write_u8(TAG_COST_WARNING);
        self.write_reason(w.reason);
        self.write_u64(w.at.ticks());
        self.write_u64(w.cost.ticks());
        self.write_u64(w.threshold.ticks());
    }

    fn on_cancel(&mut self, e: &CancelEvent) {
        self.write_u8(TAG_CANCEL);
        self.write_source(e.source);
        self.write_u64(e.at.ticks());
    }

    fn on_cycle_start(&mut self, e: &CycleStartEvent) {
        self.write_u8(TAG_CYCLE_START);
        self.write_u64(e.at.ticks());
    }

    fn on_cycle_end(&mut self, e: &CycleEndEvent) {
        self.write_u8(TAG_CYCLE_END);
        self.write_u64(e.at.ticks());
        self.write_option_u64(e.started_at.map(HostTime::ticks));
        self.write_cycle_end(e.cause);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    /// A [`ScheduleEvent`].
    Schedule(ScheduleEvent),
    /// An [`ArmFailedEvent`].
    ArmFailed(ArmFailedEvent),
    /// A [`TickSkippedEvent`].
    TickSkipped(TickSkippedEvent),
    /// A [`DiscardEvent`].
    Discard(DiscardEvent),
    /// A [`DeliveryEvent`].
    Delivery(DeliveryEvent),
    /// A [`DeliveryErrorEvent`] with the error's display string.
    DeliveryError {
        /// The event.
        event: DeliveryErrorEvent,
        /// `error.to_string()` at recording time.
        message: String,
    },
    /// A [`CostWarning`], without its message.
    CostWarning {
        /// Reason of the slow delivery.
        reason: InvokeReason,
        /// When the slow delivery started.
        at: HostTime,
        /// Measured cost.
        cost: Duration,
        /// Configured threshold.
        threshold: Duration,
    },
    /// A [`CancelEvent`].
    Cancel(CancelEvent),
    /// A [`CycleStartEvent`].
    CycleStart(CycleStartEvent),
    /// A [`CycleEndEvent`].
    CycleEnd(CycleEndEvent),
}

/// Decodes a binary recording produced by [`RecorderSink`].
///
/// Iteration stops at the first truncated record or unknown tag.
#[must_use]
pub fn decode(data: &[u8]) -> DecodeIter<'_> {
    DecodeIter { data, pos: 0 }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn read_u64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some(if present != 0 { Some(val) } else { None })
    }

    fn read_string(&mut self) -> Option<String> {
        let len = usize::try_from(self.read_u32()?).ok()?;
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_source(&mut self) -> Option<Source> {
        Some(match self.read_u8()? {
            0 => Source::Tick,
            _ => Source::Debounce,
        })
    }

    fn read_reason(&mut self) -> Option<InvokeReason> {
        Some(match self.read_u8()? {
            0 => InvokeReason::Frame,
            1 => InvokeReason::Tick,
            2 => InvokeReason::Flush,
            3 => InvokeReason::Leading,
            4 => InvokeReason::Trailing,
            _ => InvokeReason::MaxWait,
        })
    }

    fn read_driver(&mut self) -> Option<DriverKind> {
        Some(match self.read_u8()? {
            0 => DriverKind::Frame,
            1 => DriverKind::Timer,
            _ => DriverKind::None,
        })
    }

    fn read_cycle_end(&mut self) -> Option<CycleEnd> {
        Some(match self.read_u8()? {
            0 => CycleEnd::Trailing,
            1 => CycleEnd::Flush,
            2 => CycleEnd::Cancel,
            _ => CycleEnd::ArmFailed,
        })
    }

    fn decode_schedule(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Schedule(ScheduleEvent {
            source: self.read_source()?,
            at: HostTime(self.read_u64()?),
            coalesced: self.read_u8()? != 0,
        }))
    }

    fn decode_arm_failed(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ArmFailed(ArmFailedEvent {
            source: self.read_source()?,
            at: HostTime(self.read_u64()?),
            driver: self.read_driver()?,
        }))
    }

    fn decode_tick_skipped(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::TickSkipped(TickSkippedEvent {
            at: HostTime(self.read_u64()?),
            since_last: Duration(self.read_u64()?),
            min_interval: Duration(self.read_u64()?),
        }))
    }

    fn decode_discard(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Discard(DiscardEvent {
            source: self.read_source()?,
            reason: self.read_reason()?,
            at: HostTime(self.read_u64()?),
        }))
    }

    fn decode_delivery(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Delivery(DeliveryEvent {
            source: self.read_source()?,
            reason: self.read_reason()?,
            at: HostTime(self.read_u64()?),
            tick_timestamp: self.read_option_u64()?.map(HostTime),
            cost: self.read_option_u64()?.map(Duration),
            failed: self.read_u8()? != 0,
        }))
    }

    fn decode_delivery_error(&mut self) -> Option<RecordedEvent> {
        let event = DeliveryErrorEvent {
            source: self.read_source()?,
            reason: self.read_reason()?,
            at: HostTime(self.read_u64()?),
        };
        let message = self.read_string()?;
        Some(RecordedEvent::DeliveryError { event, message })
    }

    fn decode_cost_warning(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CostWarning {
            reason: self.read_reason()?,
            at: HostTime(self.read_u64()?),
            cost: Duration(self.read_u64()?),
            threshold: Duration(self.read_u64()?),
        })
    }

    fn decode_cancel(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Cancel(CancelEvent {
            source: self.read_source()?,
            at: HostTime(self.read_u64()?),
        }))
    }

    fn decode_cycle_start(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CycleStart(CycleStartEvent {
            at: HostTime(self.read_u64()?),
        }))
    }

    fn decode_cycle_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CycleEnd(CycleEndEvent {
            at: HostTime(self.read_u64()?),
            started_at: self.read_option_u64()?.map(HostTime),
            cause: self.read_cycle_end()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_SCHEDULE => self.decode_schedule(),
            TAG_ARM_FAILED => self.decode_arm_failed(),
            TAG_TICK_SKIPPED => self.decode_tick_skipped(),
            TAG_DISCARD => self.decode_discard(),
            TAG_DELIVERY => self.decode_delivery(),
            TAG_DELIVERY_ERROR => self.decode_delivery_error(),
            TAG_COST_WARNING => self.decode_cost_warning(),
            TAG_CANCEL => self.decode_cancel(),
            TAG_CYCLE_START => self.decode_cycle_start(),
            TAG_CYCLE_END => self.decode_cycle_end(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use coalesce_core::debounce::{DebounceConfig, DebounceController};
    use coalesce_core::invoke::InvokeMeta;
    use coalesce_core::testing::{ManualClock, ManualTimerHost};
    use coalesce_core::timer::TimerHost;

    #[test]
    fn clones_share_one_buffer() {
        let rec = RecorderSink::new();
        let mut handle = rec.clone();
        handle.on_cycle_start(&CycleStartEvent { at: HostTime(3) });
        assert!(!rec.is_empty(), "write through the clone is visible");
        assert_eq!(
            rec.events(),
            [RecordedEvent::CycleStart(CycleStartEvent { at: HostTime(3) })]
        );
        rec.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn delivery_error_keeps_message() {
        let mut rec = RecorderSink::new();
        let event = DeliveryErrorEvent {
            source: Source::Tick,
            reason: InvokeReason::Frame,
            at: HostTime(42),
        };
        rec.on_delivery_error(&event, &DeliveryError::Failed("disk full".into()));

        match &rec.events()[..] {
            [RecordedEvent::DeliveryError { event: e, message }] => {
                assert_eq!(*e, event);
                assert_eq!(message, "consumer failed: disk full");
            }
            other => panic!("expected one DeliveryError, got {other:?}"),
        }
    }

    #[test]
    fn records_a_debounce_cycle() {
        let clock = ManualClock::new();
        let host = Rc::new(ManualTimerHost::new(clock.clone()));
        let dyn_host: Rc<dyn TimerHost> = host.clone();
        let rec = RecorderSink::new();

        let debounce = DebounceController::builder(
            dyn_host,
            DebounceConfig::new(100.0),
            |_: &u32, _: &InvokeMeta| Ok(()),
        )
        .trace_sink(rec.clone())
        .build();

        debounce.emit(1);
        debounce.emit(2);
        host.advance_ms(100.0);

        let events = rec.events();
        let schedules = events
            .iter()
            .filter(|e| matches!(e, RecordedEvent::Schedule(_)))
            .count();
        assert_eq!(schedules, 2);
        assert!(
            events.iter().any(|e| matches!(
                e,
                RecordedEvent::CycleEnd(CycleEndEvent {
                    cause: CycleEnd::Trailing,
                    started_at: Some(HostTime(0)),
                    ..
                })
            )),
            "cycle end recorded: {events:?}"
        );
        assert!(
            events.iter().any(|e| matches!(
                e,
                RecordedEvent::Delivery(DeliveryEvent {
                    reason: InvokeReason::Trailing,
                    failed: false,
                    ..
                })
            )),
            "trailing delivery recorded"
        );
    }

    #[test]
    fn truncated_record_stops_iteration() {
        let mut rec = RecorderSink::new();
        rec.on_tick_skipped(&TickSkippedEvent {
            at: HostTime(10),
            since_last: Duration(5),
            min_interval: Duration(100),
        });
        let bytes = rec.to_bytes();
        assert_eq!(decode(&bytes).count(), 1);
        assert_eq!(decode(&bytes[..bytes.len() - 1]).count(), 0);
    }
}
