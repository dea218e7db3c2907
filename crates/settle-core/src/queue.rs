#![forbid(unsafe_code)]

//! The microtask queue: the only scheduling primitive in the crate.
//!
//! # Design
//!
//! [`Microtasks`] is a cheaply cloneable handle (`Rc` inside) to one FIFO of
//! boxed `FnOnce()` jobs. Every promise is bound to the queue it was created
//! on and schedules all of its work there; nothing runs until the owner calls
//! [`drain`](Microtasks::drain). Tests therefore drive the whole system
//! deterministically without an event loop.
//!
//! # Invariants
//!
//! 1. Jobs run in exactly the order they were enqueued.
//! 2. A job enqueued while draining runs in the same drain, after every job
//!    that was already queued.
//! 3. Only one drain is active at a time. A drain requested from inside a
//!    running job returns immediately with `ran == 0`.
//! 4. Draining never blocks; an empty queue returns at once.
//!
//! # Failure Modes
//!
//! - **Self-perpetuating chains**: a job that always enqueues another keeps
//!   `drain()` busy forever. Set
//!   [`SchedulerConfig::drain_budget`](crate::SchedulerConfig::drain_budget)
//!   to hand control back to the host periodically.
//! - **Panicking job**: the panic propagates to the caller of `drain()`. The
//!   queue stays usable and the remaining jobs stay queued.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::config::SchedulerConfig;
use crate::promise::PromiseId;
use crate::rejection::{RejectionTracker, UnhandledRejection};
use crate::remote::Inbox;

/// A deferred zero-argument job.
pub struct Microtask {
    seq: u64,
    job: Box<dyn FnOnce()>,
}

impl Microtask {
    /// Position of this job in the queue's global enqueue order.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    fn run(self) {
        (self.job)();
    }
}

impl fmt::Debug for Microtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Microtask").field("seq", &self.seq).finish()
    }
}

/// Outcome of one drain call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Jobs run by this call.
    pub ran: usize,
    /// Jobs still queued when the call returned.
    pub remaining: usize,
}

impl DrainReport {
    /// Whether the queue was empty when the drain returned.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Lifetime counters for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub ran: u64,
    /// Largest number of jobs queued at once.
    pub high_water: usize,
}

struct QueueInner {
    jobs: RefCell<VecDeque<Microtask>>,
    next_seq: Cell<u64>,
    next_promise: Cell<u64>,
    draining: Cell<bool>,
    stats: Cell<QueueStats>,
    config: SchedulerConfig,
    rejections: Rc<RejectionTracker>,
    inbox: Inbox,
}

/// Resets the draining flag even if a job panics.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Handle to a FIFO microtask queue.
///
/// Cloning a `Microtasks` creates a new handle to the **same** queue.
#[derive(Clone)]
pub struct Microtasks {
    inner: Rc<QueueInner>,
}

impl Default for Microtasks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Microtasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Microtasks")
            .field("pending", &self.pending_count())
            .field("draining", &self.inner.draining.get())
            .field("stats", &self.inner.stats.get())
            .finish()
    }
}

impl Microtasks {
    /// Create an empty queue with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create an empty queue with the given configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        let rejections = Rc::new(RejectionTracker::new(config.track_unhandled));
        Self {
            inner: Rc::new(QueueInner {
                jobs: RefCell::new(VecDeque::new()),
                next_seq: Cell::new(0),
                next_promise: Cell::new(0),
                draining: Cell::new(false),
                stats: Cell::new(QueueStats::default()),
                config,
                rejections,
                inbox: Inbox::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Append a job. It runs after every job already queued.
    pub fn enqueue(&self, job: impl FnOnce() + 'static) {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);

        let pending = {
            let mut jobs = self.inner.jobs.borrow_mut();
            jobs.push_back(Microtask {
                seq,
                job: Box::new(job),
            });
            jobs.len()
        };

        let mut stats = self.inner.stats.get();
        stats.enqueued += 1;
        stats.high_water = stats.high_water.max(pending);
        self.inner.stats.set(stats);
        tracing::trace!(message = "microtask.enqueued", seq, pending);
    }

    /// Run queued jobs in FIFO order until the queue is empty or the
    /// configured drain budget is spent.
    pub fn drain(&self) -> DrainReport {
        self.drain_limited(self.inner.config.drain_budget)
    }

    /// Run at most `max` queued jobs.
    pub fn drain_budget(&self, max: usize) -> DrainReport {
        self.drain_limited(Some(max))
    }

    fn drain_limited(&self, budget: Option<usize>) -> DrainReport {
        if self.inner.draining.replace(true) {
            return DrainReport {
                ran: 0,
                remaining: self.pending_count(),
            };
        }
        let _guard = DrainGuard(&self.inner.draining);
        let span = tracing::debug_span!("microtasks.drain", ran = tracing::field::Empty);
        let _enter = span.enter();

        let mut ran = 0usize;
        while budget.is_none_or(|max| ran < max) {
            let next = self.inner.jobs.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task.run();
            ran += 1;

            let mut stats = self.inner.stats.get();
            stats.ran += 1;
            self.inner.stats.set(stats);
        }

        span.record("ran", ran as u64);
        DrainReport {
            ran,
            remaining: self.pending_count(),
        }
    }

    /// Apply settlements posted by [`RemoteSettler`](crate::RemoteSettler)s,
    /// in arrival order. Returns the number of settlements delivered.
    ///
    /// Delivered settlements schedule microtasks; call
    /// [`drain`](Self::drain) afterwards, or use
    /// [`run_until_stalled`](Self::run_until_stalled).
    pub fn pump_remote(&self) -> usize {
        self.inner.inbox.pump(self)
    }

    /// Alternate draining and remote delivery until neither makes progress.
    ///
    /// Returns early, with jobs still queued, when a drain exhausts the
    /// configured budget and no remote settlement is waiting.
    pub fn run_until_stalled(&self) -> usize {
        let mut total = 0;
        loop {
            total += self.drain().ran;
            if self.pump_remote() == 0 {
                break;
            }
        }
        total
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.jobs.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.jobs.borrow().is_empty()
    }

    /// Whether a drain is currently running on this queue.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.get()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.inner.stats.get()
    }

    /// Number of remote settlers whose settlement has not arrived yet.
    #[must_use]
    pub fn remote_outstanding(&self) -> usize {
        self.inner.inbox.outstanding()
    }

    /// Rejected promises that currently have no rejection handler.
    #[must_use]
    pub fn unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        self.inner.rejections.snapshot()
    }

    /// Like [`unhandled_rejections`](Self::unhandled_rejections), but clears
    /// the records so each one is reported once.
    pub fn take_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        self.inner.rejections.take()
    }

    /// Whether both handles refer to the same queue.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn next_promise_id(&self) -> PromiseId {
        let id = self.inner.next_promise.get();
        self.inner.next_promise.set(id + 1);
        PromiseId(id)
    }

    pub(crate) fn rejections(&self) -> &Rc<RejectionTracker> {
        &self.inner.rejections
    }

    pub(crate) fn inbox(&self) -> &Inbox {
        &self.inner.inbox
    }
}
