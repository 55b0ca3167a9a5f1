// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! What consumers receive, and what happens when they fail.
//!
//! Both the [`TickScheduler`](crate::tick::TickScheduler) and the
//! [`DebounceController`](crate::debounce::DebounceController) call a
//! [`Consumer`] with the payload and an [`InvokeMeta`]. A consumer that
//! returns `Err` (or panics, with the `std` feature) produces a
//! [`DeliveryError`] that is reported through the owner's error hook; it
//! never reaches the caller of `schedule`/`emit` and never disturbs the
//! owner's bookkeeping.

use alloc::boxed::Box;
#[cfg(feature = "std")]
use alloc::string::String;
use core::cell::RefCell;
use core::fmt;

use crate::time::{Duration, HostTime};

/// Boxed error returned by consumers.
pub type BoxError = Box<dyn core::error::Error + 'static>;

/// A consumer callback.
pub type Consumer<P> = Box<dyn FnMut(&P, &InvokeMeta) -> Result<(), BoxError>>;

/// Why a consumer is being invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvokeReason {
    /// A native frame fired.
    Frame,
    /// A non-frame tick (emulated frame) fired.
    Tick,
    /// Explicit flush.
    Flush,
    /// Start of a debounce cycle.
    Leading,
    /// End of a debounce cycle.
    Trailing,
    /// Forced delivery inside a long debounce cycle.
    MaxWait,
}

impl InvokeReason {
    /// Returns the short diagnostic name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::Tick => "tick",
            Self::Flush => "flush",
            Self::Leading => "leading",
            Self::Trailing => "trailing",
            Self::MaxWait => "maxWait",
        }
    }
}

impl fmt::Display for InvokeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata passed alongside each payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvokeMeta {
    /// Why the consumer runs.
    pub reason: InvokeReason,
    /// Clock reading when delivery started.
    pub at: HostTime,
    /// Timestamp handed out by a frame driver. `None` for timer-backed
    /// ticks, flushes and debounce deliveries.
    pub tick_timestamp: Option<HostTime>,
    /// Measured consumer cost. Only filled in for the hooks that run after
    /// the consumer, and only when monitoring is enabled.
    pub cost: Option<Duration>,
}

impl InvokeMeta {
    /// Metadata with no tick timestamp and no cost.
    #[must_use]
    pub const fn new(reason: InvokeReason, at: HostTime) -> Self {
        Self {
            reason,
            at,
            tick_timestamp: None,
            cost: None,
        }
    }
}

/// A consumer failure.
#[derive(Debug)]
pub enum DeliveryError {
    /// The consumer returned an error.
    Failed(BoxError),
    /// The consumer panicked; holds the panic message when it was a string.
    #[cfg(feature = "std")]
    Panicked(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(error) => write!(f, "consumer failed: {error}"),
            #[cfg(feature = "std")]
            Self::Panicked(message) => write!(f, "consumer panicked: {message}"),
        }
    }
}

impl core::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Failed(error) => Some(&**error),
            #[cfg(feature = "std")]
            Self::Panicked(_) => None,
        }
    }
}

/// Reported when a monitored delivery exceeds its cost threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CostWarning {
    /// Human-readable summary.
    pub message: &'static str,
    /// Reason of the slow delivery.
    pub reason: InvokeReason,
    /// When the slow delivery started.
    pub at: HostTime,
    /// Measured cost.
    pub cost: Duration,
    /// Configured threshold.
    pub threshold: Duration,
}

/// Runs `consumer`, converting a returned error (and, with `std`, a panic)
/// into a [`DeliveryError`].
pub(crate) fn call_consumer<P>(
    consumer: &mut Consumer<P>,
    payload: &P,
    meta: &InvokeMeta,
) -> Result<(), DeliveryError> {
    #[cfg(feature = "std")]
    {
        use std::panic::{AssertUnwindSafe, catch_unwind};

        match catch_unwind(AssertUnwindSafe(|| consumer(payload, meta))) {
            Ok(result) => result.map_err(DeliveryError::Failed),
            Err(panic) => Err(DeliveryError::Panicked(panic_message(&*panic))),
        }
    }
    #[cfg(not(feature = "std"))]
    {
        consumer(payload, meta).map_err(DeliveryError::Failed)
    }
}

#[cfg(feature = "std")]
fn panic_message(panic: &(dyn core::any::Any + Send)) -> String {
    use alloc::string::ToString;

    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A single-slot indirection cell for user callbacks.
///
/// The callback is moved out while it runs, so no `RefCell` borrow is held
/// across user code. While it is out the slot reports busy, which is how
/// re-entrant calls detect that the same callback is already on the stack.
/// [`replace`](Self::replace) installs a new callback at any time, including
/// while the old one runs; the old one is then dropped when it returns.
pub(crate) struct Slot<T> {
    cell: RefCell<Option<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            cell: RefCell::new(Some(value)),
        }
    }

    /// Takes the value out; `None` while it is already out.
    pub(crate) fn take(&self) -> Option<T> {
        self.cell.borrow_mut().take()
    }

    /// Puts a taken value back unless a replacement was installed meanwhile.
    pub(crate) fn restore(&self, value: T) {
        let mut cell = self.cell.borrow_mut();
        if cell.is_none() {
            *cell = Some(value);
        }
    }

    pub(crate) fn replace(&self, value: T) {
        let old = self.cell.borrow_mut().replace(value);
        drop(old);
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.cell.borrow().is_none()
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_busy() { "Slot(busy)" } else { "Slot" })
    }
}
