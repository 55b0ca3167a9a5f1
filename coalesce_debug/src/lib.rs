// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, and Chrome trace export for coalesce
//! diagnostics.
//!
//! This crate provides [`TraceSink`](coalesce_core::trace::TraceSink)
//! implementations for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: human-readable one-line-per-event output.
//! - [`recorder::RecorderSink`]: compact binary recording into a shared
//!   buffer, with [`recorder::decode`] for playback.
//! - [`chrome::export`]: writes Chrome Trace Event Format JSON from
//!   recorded bytes.
//!
//! Schedulers take ownership of their sink, so the recorder is a cheap
//! cloneable handle: keep one clone, hand the other to the builder.

pub mod chrome;
pub mod pretty;
pub mod recorder;
