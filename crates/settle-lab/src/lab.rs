#![forbid(unsafe_code)]

//! A deterministic host loop over virtual time.
//!
//! # Design
//!
//! [`Lab`] plays the role of the host environment around a
//! [`Microtasks`] queue. Timers stand in for external event sources (I/O
//! completions, network replies). Each turn follows the host contract:
//!
//! 1. Run the microtask checkpoint left by the current synchronous code.
//! 2. Take the earliest due timer, move the clock to its due time, run it.
//! 3. Run the microtask checkpoint again before the next timer.
//!
//! Timers due at the same instant run in registration order, so a scenario
//! always replays the same way.
//!
//! # Failure Modes
//!
//! - **Timer that re-arms itself forever**: [`Lab::run`] never returns. Use
//!   [`Lab::run_turns`] or [`Lab::advance`] to bound the run.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use settle_core::{Microtasks, Promise, Reason, SchedulerConfig};
use web_time::Duration;

use crate::clock::{LabClock, duration_us};
use crate::trace::Trace;

/// Handle to a scheduled timer. Orders by due time, then registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId {
    due_us: u64,
    seq: u64,
}

impl TimerId {
    /// Virtual time at which the timer fires.
    #[must_use]
    pub fn due_us(self) -> u64 {
        self.due_us
    }

    /// Registration order.
    #[must_use]
    pub fn seq(self) -> u64 {
        self.seq
    }
}

/// Summary of one host turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn {
    pub timer: TimerId,
    /// Virtual time at which the timer ran.
    pub at_us: u64,
    /// Microtasks run during the turn, both checkpoints included.
    pub microtasks: usize,
}

type Job = Box<dyn FnOnce()>;

struct LabInner {
    queue: Microtasks,
    clock: LabClock,
    trace: Trace,
    timers: RefCell<BTreeMap<TimerId, Job>>,
    next_seq: Cell<u64>,
    turns: Cell<u64>,
}

/// Virtual-time host harness. Clones share the same lab.
#[derive(Clone)]
pub struct Lab {
    inner: Rc<LabInner>,
}

impl Default for Lab {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lab")
            .field("now_us", &self.now_us())
            .field("pending_timers", &self.pending_timers())
            .field("turns", &self.inner.turns.get())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

impl Lab {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// A lab whose microtask queue uses `config`.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(LabInner {
                queue: Microtasks::with_config(config),
                clock: LabClock::new(),
                trace: Trace::new(),
                timers: RefCell::new(BTreeMap::new()),
                next_seq: Cell::new(0),
                turns: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Microtasks {
        &self.inner.queue
    }

    #[must_use]
    pub fn clock(&self) -> &LabClock {
        &self.inner.clock
    }

    #[must_use]
    pub fn trace(&self) -> &Trace {
        &self.inner.trace
    }

    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.inner.clock.now_us()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Turns run so far.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.inner.turns.get()
    }

    /// Schedule `job` to run `delay` after the current virtual time.
    pub fn set_timeout(&self, delay: Duration, job: impl FnOnce() + 'static) -> TimerId {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        let id = TimerId {
            due_us: self.now_us().saturating_add(duration_us(delay)),
            seq,
        };
        self.inner.timers.borrow_mut().insert(id, Box::new(job));
        tracing::trace!(message = "lab.timer_set", seq, due_us = id.due_us);
        id
    }

    /// Cancel a timer that has not run yet. Returns `false` if it already
    /// ran or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.inner.timers.borrow_mut().remove(&id).is_some()
    }

    /// A promise fulfilled with `value` by a timer after `delay`.
    pub fn delay<T, E>(&self, delay: Duration, value: T) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Reason,
    {
        let (promise, settler) = Promise::new(&self.inner.queue);
        self.set_timeout(delay, move || {
            settler.fulfill(value);
        });
        promise
    }

    /// A promise rejected with `error` by a timer after `delay`.
    pub fn delay_reject<T, E>(&self, delay: Duration, error: E) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Reason,
    {
        let (promise, settler) = Promise::new(&self.inner.queue);
        self.set_timeout(delay, move || {
            settler.reject(error);
        });
        promise
    }

    /// Append `label` to the trace at the current virtual time.
    pub fn record(&self, label: impl Into<String>) {
        self.inner.trace.push(self.now_us(), label);
    }

    /// Run microtasks and deliver remote settlements until both stall.
    pub fn checkpoint(&self) -> usize {
        self.inner.queue.run_until_stalled()
    }

    /// Run one host turn. Returns `None` when no timer is scheduled.
    pub fn turn(&self) -> Option<Turn> {
        let mut microtasks = self.checkpoint();
        let next = self.inner.timers.borrow_mut().pop_first();
        let (timer, job) = next?;

        self.inner.clock.advance_to_us(timer.due_us);
        let at_us = self.now_us();
        job();
        microtasks += self.checkpoint();

        self.inner.turns.set(self.inner.turns.get() + 1);
        tracing::trace!(message = "lab.turn", seq = timer.seq, at_us, microtasks);
        Some(Turn {
            timer,
            at_us,
            microtasks,
        })
    }

    /// Run every timer due within `by` of the current time, then move the
    /// clock to the end of that window. Returns the number of turns run.
    pub fn advance(&self, by: Duration) -> usize {
        let end = self.now_us().saturating_add(duration_us(by));
        let mut turns = 0;
        loop {
            self.checkpoint();
            let due = self
                .inner
                .timers
                .borrow()
                .first_key_value()
                .map(|(id, _)| id.due_us);
            match due {
                Some(due) if due <= end => {
                    if self.turn().is_some() {
                        turns += 1;
                    }
                }
                _ => break,
            }
        }
        self.inner.clock.advance_to_us(end);
        turns
    }

    /// Run turns until no timer is left. Returns the number of turns run.
    pub fn run(&self) -> usize {
        let mut turns = 0;
        while self.turn().is_some() {
            turns += 1;
        }
        turns
    }

    /// Run at most `limit` turns. Returns the number of turns run.
    pub fn run_turns(&self, limit: usize) -> usize {
        let mut turns = 0;
        while turns < limit && self.turn().is_some() {
            turns += 1;
        }
        turns
    }
}
