// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timing drivers, tick scheduler and debounce controller for coalescing
//! bursts of events.
//!
//! `coalesce_core` turns a stream of trigger calls, arriving at any rate, into
//! at most one consumer call per clock tick or per time window, while the
//! consumer still sees the most relevant accumulated payload. It is `no_std`
//! compatible (with `alloc`) and single-threaded: everything is `Rc`-shared
//! and driven from one event loop.
//!
//! # Architecture
//!
//! ```text
//!   TimerHost (setTimeout-like)          native frame source
//!       │                                       │
//!       ├──► EmulatedFrameDriver ──┐            │
//!       │      (pooled by          ├──► dyn TimingDriver
//!       │       HubRegistry)       │            ▲
//!       │                    NoopDriver ────────┘
//!       │                                       │
//!       ▼                                       ▼
//!   DebounceController                     TickScheduler
//!       │ leading / trailing / maxWait          │ frame / tick / flush
//!       └──────────────► consumer(&P, &InvokeMeta) ◄──┘
//! ```
//!
//! **[`time`]**: Tick-based `HostTime`, `Duration` and `Timebase`, with
//! conversions from the millisecond and hertz values used in configuration.
//!
//! **[`driver`]**: The [`TimingDriver`](driver::TimingDriver) trait, the
//! [`NoopDriver`](driver::NoopDriver) fallback and best-available
//! [`select`](driver::select)ion.
//!
//! **[`timer`]**: The [`TimerHost`](timer::TimerHost) trait over plain
//! one-shot timers.
//!
//! **[`queue`]**: Two-window FIFO bookkeeping shared by frame-style drivers.
//!
//! **[`hub`]**: Timer-emulated frame driver and the explicit registry that
//! pools it by `(host, delay)`.
//!
//! **[`tick`]**: [`TickScheduler`](tick::TickScheduler): merge, guards, rate
//! limiting, cost monitoring and error isolation on top of a driver.
//!
//! **[`debounce`]**: [`DebounceController`](debounce::DebounceController):
//! the leading/trailing/max-wait/skip-initial cycle state machine.
//!
//! **[`invoke`]**: What consumers receive and how their failures are
//! reported.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types,
//! with the [`Tracer`](trace::Tracer) wrapper.
//!
//! **`testing`** (feature `testing`): Virtual-time clock, timer host and
//! frame driver for deterministic tests.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Catches consumer panics and reports them
//!   like returned errors. Failures with no hook or sink are written to
//!   stderr by `trace::ErrorLog`.
//! - `trace` (disabled by default): Enables hot-path `Tracer` method bodies
//!   (one branch per call site). Failure reports are dispatched regardless.
//! - `testing` (disabled by default): Exposes the `testing` module.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

pub mod debounce;
pub mod driver;
pub mod hub;
pub mod invoke;
pub mod queue;
#[cfg(any(feature = "testing", test))]
pub mod testing;
pub mod tick;
pub mod time;
pub mod timer;
pub mod trace;
