#![forbid(unsafe_code)]

//! Cross-thread producers.
//!
//! Cells and queues are single-threaded (`Rc` inside). A producer running on
//! another thread converts its [`Settler`] into a [`RemoteSettler`], which is
//! `Send`, and settles through it. The settlement travels as an envelope over
//! an `mpsc` channel owned by the queue and is applied on the owning thread
//! when the owner calls [`Microtasks::pump_remote`](crate::Microtasks::pump_remote).
//! Every concrete state transition therefore still happens on one thread,
//! and "first settlement wins" holds no matter how many threads race.
//!
//! # Invariants
//!
//! 1. Envelopes are applied in arrival order, one per `pump_remote` delivery.
//! 2. A `RemoteSettler` settles at most once; every settle method consumes it.
//! 3. Dropping an unused `RemoteSettler` releases its registration. The cell
//!    stays pending (there is no cancellation).
//! 4. The inbox holds the target cell weakly and borrows the queue only while
//!    pumping. Outstanding remotes keep neither alive: the owning thread keeps
//!    a handle to the cell until the settlement lands, and once the queue is
//!    dropped every remote reports `false`.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::mpsc;

use crate::error::Reason;
use crate::promise::Settler;
use crate::queue::Microtasks;

type Payload = Box<dyn Any + Send>;
type Delivery = Box<dyn FnOnce(Payload, &Microtasks)>;

pub(crate) struct Envelope {
    slot: u64,
    /// `None` releases the slot without settling.
    payload: Option<Payload>,
}

/// Owner-side half of the remote channel, embedded in every queue.
pub(crate) struct Inbox {
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    slots: RefCell<HashMap<u64, Delivery>>,
    next_slot: Cell<u64>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            slots: RefCell::new(HashMap::new()),
            next_slot: Cell::new(0),
        }
    }

    fn register(&self, deliver: Delivery) -> (u64, mpsc::Sender<Envelope>) {
        let slot = self.next_slot.get();
        self.next_slot.set(slot + 1);
        self.slots.borrow_mut().insert(slot, deliver);
        (slot, self.tx.clone())
    }

    pub(crate) fn pump(&self, queue: &Microtasks) -> usize {
        let mut delivered = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            let deliver = self.slots.borrow_mut().remove(&envelope.slot);
            match (deliver, envelope.payload) {
                (Some(deliver), Some(payload)) => {
                    deliver(payload, queue);
                    delivered += 1;
                }
                (Some(_), None) => {
                    tracing::debug!(message = "remote.released", slot = envelope.slot);
                }
                (None, _) => {}
            }
        }
        delivered
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.slots.borrow().len()
    }
}

/// `Send` capability that settles a cell from another thread.
///
/// Obtained from [`Settler::into_remote`]. The settlement takes effect when
/// the queue owner pumps its inbox.
pub struct RemoteSettler<T, E> {
    slot: u64,
    tx: Option<mpsc::Sender<Envelope>>,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<T, E> fmt::Debug for RemoteSettler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSettler")
            .field("slot", &self.slot)
            .field("used", &self.tx.is_none())
            .finish()
    }
}

impl<T: Send + 'static, E: Send + 'static> RemoteSettler<T, E> {
    /// Post a fulfillment. Returns `false` if the owning queue is gone.
    pub fn fulfill(self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Post a rejection. Returns `false` if the owning queue is gone.
    pub fn reject(self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Post an outcome. Returns `false` if the owning queue is gone.
    pub fn settle(mut self, outcome: Result<T, E>) -> bool {
        let Some(tx) = self.tx.take() else {
            return false;
        };
        tx.send(Envelope {
            slot: self.slot,
            payload: Some(Box::new(outcome)),
        })
        .is_ok()
    }
}

impl<T, E> Drop for RemoteSettler<T, E> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Envelope {
                slot: self.slot,
                payload: None,
            });
        }
    }
}

impl<T, E> Settler<T, E>
where
    T: Clone + Send + 'static,
    E: Reason + Send,
{
    /// Convert into a [`RemoteSettler`] that can be moved to another thread.
    ///
    /// The remote does not keep the cell alive. If every handle to the cell
    /// is gone by the time the settlement arrives, it is discarded.
    #[must_use]
    pub fn into_remote(self) -> RemoteSettler<T, E> {
        let target = self.downgrade();
        let id = self.promise().id();
        let (slot, tx) = self.promise().queue().inbox().register(Box::new(
            move |payload: Payload, queue: &Microtasks| {
                let Some(settler) = target.upgrade(queue) else {
                    tracing::debug!(message = "remote.target_dropped", promise = %id);
                    return;
                };
                match payload.downcast::<Result<T, E>>() {
                    Ok(outcome) => {
                        settler.settle(*outcome);
                    }
                    Err(_) => {
                        tracing::debug!(message = "remote.payload_mismatch", promise = %id);
                    }
                }
            },
        ));
        RemoteSettler {
            slot,
            tx: Some(tx),
            _marker: PhantomData,
        }
    }
}
