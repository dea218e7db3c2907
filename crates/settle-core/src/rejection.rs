#![forbid(unsafe_code)]

//! Unhandled-rejection bookkeeping.
//!
//! A cell that becomes `Rejected` while nothing handles its rejection is
//! recorded here. The record disappears as soon as a rejection handler is
//! attached, and is flagged `discarded` when the last handle to the cell is
//! dropped while still unhandled.
//!
//! The tracker never raises. Surfacing the reports (logging, crashing,
//! emitting a host event) belongs to whoever owns the queue, via
//! [`Microtasks::unhandled_rejections`](crate::Microtasks::unhandled_rejections).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

use crate::promise::PromiseId;

/// One rejected cell with no rejection handler.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UnhandledRejection {
    pub promise: PromiseId,
    /// `Debug` rendering of the rejection reason.
    pub reason: String,
    /// The cell was dropped without ever being handled.
    pub discarded: bool,
}

#[derive(Debug)]
pub(crate) struct RejectionTracker {
    enabled: bool,
    entries: RefCell<BTreeMap<PromiseId, UnhandledRejection>>,
}

impl RejectionTracker {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RefCell::new(BTreeMap::new()),
        }
    }

    pub(crate) fn rejected(&self, promise: PromiseId, reason: &dyn fmt::Debug) {
        if !self.enabled {
            return;
        }
        tracing::trace!(message = "promise.unhandled_rejection", promise = %promise);
        self.entries.borrow_mut().insert(
            promise,
            UnhandledRejection {
                promise,
                reason: format!("{reason:?}"),
                discarded: false,
            },
        );
    }

    pub(crate) fn handled(&self, promise: PromiseId) {
        if !self.enabled {
            return;
        }
        if self.entries.borrow_mut().remove(&promise).is_some() {
            tracing::debug!(message = "promise.rejection_handled_late", promise = %promise);
        }
    }

    pub(crate) fn discarded(&self, promise: PromiseId) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.borrow_mut();
        if let Some(entry) = entries.get_mut(&promise) {
            entry.discarded = true;
            tracing::warn!(
                message = "promise.unhandled_rejection_discarded",
                promise = %promise,
                reason = %entry.reason
            );
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<UnhandledRejection> {
        self.entries.borrow().values().cloned().collect()
    }

    pub(crate) fn take(&self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut *self.entries.borrow_mut())
            .into_values()
            .collect()
    }
}
