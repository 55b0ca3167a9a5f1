// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide monotonic clock on [`Instant`].

use std::sync::OnceLock;
use std::time::Instant;

use coalesce_core::time::HostTime;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds elapsed since the first clock read in this process.
pub(crate) fn now() -> HostTime {
    HostTime(nanos(epoch().elapsed()))
}

/// Converts a [`HostTime`] back to the [`Instant`] it denotes.
pub(crate) fn instant_at(t: HostTime) -> Instant {
    epoch() + std::time::Duration::from_nanos(t.ticks())
}

fn nanos(elapsed: std::time::Duration) -> u64 {
    // Saturates after roughly 584 years of uptime.
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}
