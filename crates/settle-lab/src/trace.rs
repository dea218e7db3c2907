#![forbid(unsafe_code)]

//! Ordered event trace with JSONL export.
//!
//! Two runs of the same deterministic scenario produce byte-identical JSONL,
//! which makes traces usable as golden files.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::error::LabError;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    /// Position in the trace, starting at 0.
    pub seq: u64,
    /// Virtual time of the event in microseconds.
    pub at_us: u64,
    pub label: String,
}

/// Shared, append-only event log. Clones append to the same log.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl Trace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at `at_us`.
    pub fn push(&self, at_us: u64, label: impl Into<String>) {
        let mut events = self.events.borrow_mut();
        let seq = events.len() as u64;
        events.push(TraceEvent {
            seq,
            at_us,
            label: label.into(),
        });
    }

    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    /// Labels in recording order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.events.borrow().iter().map(|e| e.label.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// One JSON object per line, in recording order.
    pub fn to_jsonl(&self) -> Result<String, LabError> {
        let mut out = String::new();
        for event in self.events.borrow().iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}
