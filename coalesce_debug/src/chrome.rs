// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//!
//! Tick schedulers and debounce controllers land on separate tracks
//! (`tid` 0 and 1). Debounce cycles become duration events, so a burst
//! shows up as one bar from its first emit to its resolution.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use coalesce_core::time::{Duration, HostTime, Timebase};
use coalesce_core::trace::Source;

use crate::recorder::{RecordedEvent, decode};

const TICK_TRACK: u32 = 0;
const DEBOUNCE_TRACK: u32 = 1;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let us = |t: HostTime| ticks_to_us(t.ticks(), timebase);
    let span_us = |d: Duration| ticks_to_us(d.ticks(), timebase);

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Schedule(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Schedule",
                    "cat": "Input",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": track(e.source),
                    "s": "t",
                    "args": {
                        "coalesced": e.coalesced,
                    }
                }));
            }
            RecordedEvent::ArmFailed(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "ArmFailed",
                    "cat": "Error",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": track(e.source),
                    "s": "g",
                    "args": {
                        "driver": e.driver.as_str(),
                    }
                }));
            }
            RecordedEvent::TickSkipped(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "TickSkipped",
                    "cat": "RateLimit",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": TICK_TRACK,
                    "s": "t",
                    "args": {
                        "since_last_us": span_us(e.since_last),
                        "min_interval_us": span_us(e.min_interval),
                    }
                }));
            }
            RecordedEvent::Discard(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Discard",
                    "cat": "Delivery",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": track(e.source),
                    "s": "t",
                    "args": {
                        "reason": e.reason.as_str(),
                    }
                }));
            }
            RecordedEvent::Delivery(e) => {
                // Complete event when the cost is known, instant otherwise.
                let mut event = json!({
                    "ph": "i",
                    "name": e.reason.as_str(),
                    "cat": "Delivery",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": track(e.source),
                    "s": "t",
                    "args": {
                        "failed": e.failed,
                        "tick_timestamp_us": e.tick_timestamp.map(us),
                    }
                });
                if let Some(cost) = e.cost {
                    event["ph"] = json!("X");
                    event["dur"] = json!(span_us(cost));
                    if let Some(obj) = event.as_object_mut() {
                        obj.remove("s");
                    }
                }
                events.push(event);
            }
            RecordedEvent::DeliveryError { event, message } => {
                events.push(json!({
                    "ph": "i",
                    "name": "DeliveryError",
                    "cat": "Error",
                    "ts": us(event.at),
                    "pid": 0,
                    "tid": track(event.source),
                    "s": "g",
                    "args": {
                        "reason": event.reason.as_str(),
                        "message": message,
                    }
                }));
            }
            RecordedEvent::CostWarning {
                reason,
                at,
                cost,
                threshold,
            } => {
                events.push(json!({
                    "ph": "i",
                    "name": "CostWarning",
                    "cat": "Error",
                    "ts": us(at),
                    "pid": 0,
                    "tid": TICK_TRACK,
                    "s": "g",
                    "args": {
                        "reason": reason.as_str(),
                        "cost_us": span_us(cost),
                        "threshold_us": span_us(threshold),
                    }
                }));
            }
            RecordedEvent::Cancel(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Cancel",
                    "cat": "Input",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": track(e.source),
                    "s": "t",
                }));
            }
            RecordedEvent::CycleStart(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": "Cycle",
                    "cat": "Debounce",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": DEBOUNCE_TRACK,
                }));
            }
            RecordedEvent::CycleEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": "Cycle",
                    "cat": "Debounce",
                    "ts": us(e.at),
                    "pid": 0,
                    "tid": DEBOUNCE_TRACK,
                    "args": {
                        "cause": format!("{:?}", e.cause),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn track(source: Source) -> u32 {
    match source {
        Source::Tick => TICK_TRACK,
        Source::Debounce => DEBOUNCE_TRACK,
    }
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use coalesce_core::invoke::InvokeReason;
    use coalesce_core::trace::{CycleEnd, CycleEndEvent, CycleStartEvent, DeliveryEvent, TraceSink};

    fn export_to_value(rec: &RecorderSink, timebase: Timebase) -> Value {
        let mut out = Vec::new();
        export(&rec.to_bytes(), timebase, &mut out).unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_cycle_start(&CycleStartEvent {
            at: HostTime(1_000),
        });
        rec.on_cycle_end(&CycleEndEvent {
            at: HostTime(101_000),
            started_at: Some(HostTime(1_000)),
            cause: CycleEnd::Trailing,
        });

        let parsed = export_to_value(&rec, Timebase::MICROS);
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["ph"], "B");
        assert_eq!(arr[1]["ph"], "E");
        assert_eq!(arr[0]["ts"], 1_000.0);
        assert_eq!(arr[1]["tid"], DEBOUNCE_TRACK);
        assert_eq!(arr[1]["args"]["cause"], "Trailing");
    }

    #[test]
    fn monitored_delivery_becomes_complete_event() {
        let mut rec = RecorderSink::new();
        rec.on_delivery(&DeliveryEvent {
            source: Source::Tick,
            reason: InvokeReason::Frame,
            at: HostTime(16_000),
            tick_timestamp: Some(HostTime(16_000)),
            cost: Some(Duration(3_000)),
            failed: false,
        });
        rec.on_delivery(&DeliveryEvent {
            source: Source::Tick,
            reason: InvokeReason::Flush,
            at: HostTime(20_000),
            tick_timestamp: None,
            cost: None,
            failed: true,
        });

        let parsed = export_to_value(&rec, Timebase::MICROS);
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr[0]["ph"], "X");
        assert_eq!(arr[0]["dur"], 3_000.0);
        assert!(arr[0].get("s").is_none(), "complete events carry no scope");
        assert_eq!(arr[1]["ph"], "i");
        assert_eq!(arr[1]["name"], "flush");
        assert_eq!(arr[1]["args"]["failed"], true);
        assert!(arr[1]["args"]["tick_timestamp_us"].is_null());
    }

    #[test]
    fn empty_recording_exports_empty_array() {
        let rec = RecorderSink::new();
        let parsed = export_to_value(&rec, Timebase::NANOS);
        assert_eq!(parsed, json!([]));
    }
}
