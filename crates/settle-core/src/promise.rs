#![forbid(unsafe_code)]

//! Settlement cells: the state machine behind one asynchronous result.
//!
//! # Design
//!
//! [`Promise<T, E>`] wraps its state in shared, reference-counted storage
//! (`Rc<RefCell<..>>`), like every other single-threaded primitive in the
//! crate. The only way to change that state from outside is a [`Settler`],
//! handed out once by [`Promise::new`]. Consumers chain work with
//! [`Promise::attach`] and the sugar built on it; every chained continuation
//! runs as a microtask on the promise's [`Microtasks`] queue.
//!
//! # Invariants
//!
//! 1. The only transitions are `Pending -> Fulfilled` and
//!    `Pending -> Rejected`. Settled states are terminal.
//! 2. Reactions are stored only while pending and are taken out, all at
//!    once, by the settling transition.
//! 3. Reactions attached to one cell run in attachment order.
//! 4. `attach` always returns a fresh pending cell and never runs a handler
//!    synchronously, even when the parent is already settled.
//! 5. The first settle call through a settler wins; later calls are silent
//!    no-ops.
//!
//! # Failure Modes
//!
//! - **Handler returns `Err`**: the derived cell rejects with that error.
//! - **Nobody handles a rejection**: recorded for the host, see
//!   [`Microtasks::unhandled_rejections`].
//! - **Settler dropped unused**: the cell stays pending forever. This is not
//!   an error. Once the last handle goes, the cell and every pending cell
//!   chained off it are freed without recursing per link.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{ProtocolError, Reason};
use crate::queue::Microtasks;
use crate::reaction::{Observer, OnFulfilled, OnRejected, Reaction, ReactionRecord};
use crate::rejection::RejectionTracker;
use crate::resolve::{self, Resolution};
use crate::teardown;

/// Identifier of a cell, unique within its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PromiseId(pub u64);

impl PromiseId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

/// State of a settlement cell.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled(_) => "fulfilled",
            Self::Rejected(_) => "rejected",
        }
    }

    /// The settled outcome, or `None` while pending.
    #[must_use]
    pub fn into_settled(self) -> Option<Settled<T, E>> {
        match self {
            Self::Pending => None,
            Self::Fulfilled(value) => Some(Settled::Fulfilled(value)),
            Self::Rejected(error) => Some(Settled::Rejected(error)),
        }
    }
}

/// Outcome record of a settled cell, as reported by
/// [`all_settled`](crate::all_settled).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Settled<T, E> {
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> Settled<T, E> {
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn into_result(self) -> Result<T, E> {
        self.into()
    }
}

impl<T, E> From<Result<T, E>> for Settled<T, E> {
    fn from(outcome: Result<T, E>) -> Self {
        match outcome {
            Ok(value) => Self::Fulfilled(value),
            Err(error) => Self::Rejected(error),
        }
    }
}

impl<T, E> From<Settled<T, E>> for Result<T, E> {
    fn from(settled: Settled<T, E>) -> Self {
        match settled {
            Settled::Fulfilled(value) => Ok(value),
            Settled::Rejected(error) => Err(error),
        }
    }
}

struct Inner<T, E> {
    id: PromiseId,
    state: State<T, E>,
    reactions: Vec<Box<dyn Reaction<T, E>>>,
    /// A rejection-handling reaction has been attached at some point.
    handled: bool,
    /// The cell this one has adopted while still pending.
    following: Option<Weak<RefCell<Inner<T, E>>>>,
    rejections: Rc<RejectionTracker>,
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        if !self.handled && self.state.is_rejected() {
            self.rejections.discarded(self.id);
        }
        if !self.reactions.is_empty() {
            let reactions = std::mem::take(&mut self.reactions);
            teardown::release(reactions.into_iter().map(|reaction| reaction.into_any()));
        }
    }
}

/// Handle to a settlement cell.
///
/// Cloning a `Promise` creates a new handle to the **same** cell.
pub struct Promise<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
    queue: Microtasks,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            queue: self.queue.clone(),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Promise")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .field("reactions", &inner.reactions.len())
            .finish()
    }
}

impl<T, E> Promise<T, E> {
    #[must_use]
    pub fn id(&self) -> PromiseId {
        self.inner.borrow().id
    }

    /// The queue this cell schedules its reactions on.
    #[must_use]
    pub fn queue(&self) -> &Microtasks {
        &self.queue
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.borrow().state.is_pending()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// Whether both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of reactions waiting for settlement.
    #[must_use]
    pub fn pending_reactions(&self) -> usize {
        self.inner.borrow().reactions.len()
    }
}

impl<T: Clone + 'static, E: Reason> Promise<T, E> {
    /// Create a pending cell and the settler that controls it.
    #[must_use]
    pub fn new(queue: &Microtasks) -> (Self, Settler<T, E>) {
        let promise = Self {
            inner: Rc::new(RefCell::new(Inner {
                id: queue.next_promise_id(),
                state: State::Pending,
                reactions: Vec::new(),
                handled: false,
                following: None,
                rejections: Rc::clone(queue.rejections()),
            })),
            queue: queue.clone(),
        };
        let settler = Settler {
            promise: promise.clone(),
            resolved: Rc::new(Cell::new(false)),
            depth: 0,
        };
        (promise, settler)
    }

    /// Create a cell and run `executor` synchronously with its settler.
    ///
    /// An `Err` from the executor rejects the cell, unless the executor
    /// already resolved it.
    pub fn with_executor<F>(queue: &Microtasks, executor: F) -> Self
    where
        F: FnOnce(Settler<T, E>) -> Result<(), E>,
    {
        let (promise, settler) = Self::new(queue);
        if let Err(error) = executor(settler.clone()) {
            settler.reject(error);
        }
        promise
    }

    /// A cell that fulfills with `value` on the next microtask checkpoint.
    #[must_use]
    pub fn fulfilled(queue: &Microtasks, value: T) -> Self {
        let (promise, settler) = Self::new(queue);
        settler.fulfill(value);
        promise
    }

    /// A cell that is already rejected with `error`.
    #[must_use]
    pub fn rejected(queue: &Microtasks, error: E) -> Self {
        let (promise, settler) = Self::new(queue);
        settler.reject(error);
        promise
    }

    /// Turn any resolution into a cell. A promise is returned as is.
    #[must_use]
    pub fn from_resolution(queue: &Microtasks, resolution: Resolution<T, E>) -> Self {
        match resolution {
            Resolution::Promise(promise) => promise,
            other => {
                let (promise, settler) = Self::new(queue);
                settler.resolve(other);
                promise
            }
        }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> State<T, E> {
        self.inner.borrow().state.clone()
    }

    /// The fulfillment value, if fulfilled.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &self.inner.borrow().state {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub fn reason(&self) -> Option<E> {
        match &self.inner.borrow().state {
            State::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Attach a reaction record and return the cell it settles.
    ///
    /// If this cell is pending the record is queued; otherwise the matching
    /// branch is scheduled as a microtask right away. Either way the
    /// returned cell starts out pending.
    pub fn attach<U: Clone + 'static>(
        &self,
        on_fulfilled: OnFulfilled<T, U, E>,
        on_rejected: OnRejected<U, E>,
    ) -> Promise<U, E> {
        let (child, downstream) = Promise::new(&self.queue);
        self.push_reaction(Box::new(ReactionRecord::chain(
            on_fulfilled,
            on_rejected,
            downstream,
        )));
        child
    }

    /// Chain a fallible transformation of the fulfillment value. Rejections
    /// pass through unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
    {
        self.attach(OnFulfilled::map(on_fulfilled), OnRejected::PassThrough)
    }

    /// Chain handlers for both outcomes.
    pub fn then_or_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, E> + 'static,
        R: FnOnce(E) -> Result<U, E> + 'static,
    {
        self.attach(OnFulfilled::map(on_fulfilled), OnRejected::map(on_rejected))
    }

    /// Chain a continuation that produces another promise; the derived cell
    /// adopts its outcome.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Promise<U, E> + 'static,
    {
        self.attach(
            OnFulfilled::handler(move |value| Ok(Resolution::Promise(on_fulfilled(value)))),
            OnRejected::PassThrough,
        )
    }

    /// Chain a continuation returning any [`Resolution`].
    pub fn then_resolve<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.attach(OnFulfilled::handler(on_fulfilled), OnRejected::PassThrough)
    }

    /// Recover from a rejection. Fulfillments pass through unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<T, E> + 'static,
    {
        self.attach(OnFulfilled::pass_through(), OnRejected::map(on_rejected))
    }

    /// Recover from a rejection with another promise.
    pub fn or_else<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Promise<T, E> + 'static,
    {
        self.attach(
            OnFulfilled::pass_through(),
            OnRejected::handler(move |error| Ok(Resolution::Promise(on_rejected(error)))),
        )
    }

    /// Run `on_settled` on either outcome, then pass the original outcome
    /// through. If `on_settled` fails, the derived cell rejects with its
    /// error instead.
    pub fn finally<F>(&self, on_settled: F) -> Promise<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let slot = Rc::new(Cell::new(Some(on_settled)));
        let on_ok = Rc::clone(&slot);
        self.attach(
            OnFulfilled::map(move |value| {
                if let Some(callback) = on_ok.take() {
                    callback()?;
                }
                Ok(value)
            }),
            OnRejected::handler(move |error| {
                if let Some(callback) = slot.take() {
                    callback()?;
                }
                Err(error)
            }),
        )
    }

    /// Like [`finally`](Self::finally), but waits for the promise returned
    /// by `on_settled` before passing the original outcome through. A
    /// rejection of that promise replaces the original outcome.
    pub fn finally_await<F>(&self, on_settled: F) -> Promise<T, E>
    where
        F: FnOnce() -> Promise<(), E> + 'static,
    {
        let slot = Rc::new(Cell::new(Some(on_settled)));
        let on_ok = Rc::clone(&slot);
        self.attach(
            OnFulfilled::handler(move |value: T| {
                let Some(callback) = on_ok.take() else {
                    return Ok(Resolution::Value(value));
                };
                Ok(Resolution::Promise(callback().then(move |()| Ok(value))))
            }),
            OnRejected::handler(move |error: E| {
                let Some(callback) = slot.take() else {
                    return Err(error);
                };
                Ok(Resolution::Promise(
                    callback().then(move |()| Err::<T, E>(error)),
                ))
            }),
        )
    }

    /// Register a bare observer. Counts as handling a rejection.
    pub(crate) fn observe<F>(&self, observer: F)
    where
        F: FnOnce(Result<T, E>) + 'static,
    {
        self.push_reaction(Box::new(Observer::new(observer)));
    }

    pub(crate) fn push_reaction(&self, reaction: Box<dyn Reaction<T, E>>) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        if reaction.handles_rejection() && !inner.handled {
            inner.handled = true;
            if inner.state.is_rejected() {
                inner.rejections.handled(inner.id);
            }
        }
        let outcome = match &inner.state {
            State::Pending => {
                inner.reactions.push(reaction);
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
        };
        drop(guard);
        self.queue.enqueue(move || reaction.react(outcome));
    }

    /// Perform the terminal transition and schedule every queued reaction.
    /// Returns `false` if the cell was already settled.
    pub(crate) fn settle_now(&self, outcome: Result<T, E>) -> bool {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        if inner.state.is_settled() {
            return false;
        }
        inner.following = None;
        let reactions = std::mem::take(&mut inner.reactions);
        let id = inner.id;
        match &outcome {
            Ok(value) => {
                inner.state = State::Fulfilled(value.clone());
                tracing::trace!(message = "promise.fulfilled", promise = %id, reactions = reactions.len());
            }
            Err(error) => {
                inner.state = State::Rejected(error.clone());
                tracing::trace!(message = "promise.rejected", promise = %id, reactions = reactions.len());
                if !inner.handled {
                    inner.rejections.rejected(id, error);
                }
            }
        }
        drop(guard);

        for reaction in reactions {
            let outcome = outcome.clone();
            self.queue.enqueue(move || reaction.react(outcome));
        }
        true
    }

    /// Record that this pending cell now follows `source`.
    pub(crate) fn follow(&self, source: &Promise<T, E>) {
        self.inner.borrow_mut().following = Some(Rc::downgrade(&source.inner));
    }

    /// Whether `target` is this cell or is reached by walking the chain of
    /// adopted cells starting here.
    pub(crate) fn reaches(&self, target: &Promise<T, E>, limit: usize) -> Result<bool, ProtocolError> {
        let mut cursor = Some(Rc::clone(&self.inner));
        let mut hops = 0usize;
        while let Some(node) = cursor {
            if Rc::ptr_eq(&node, &target.inner) {
                return Ok(true);
            }
            hops += 1;
            if hops > limit {
                return Err(ProtocolError::ChainTooDeep { limit });
            }
            cursor = node.borrow().following.as_ref().and_then(Weak::upgrade);
        }
        Ok(false)
    }
}

/// The capability to settle one cell.
///
/// Cloning a settler shares its "already resolved" flag: whichever clone
/// settles first wins.
pub struct Settler<T, E> {
    promise: Promise<T, E>,
    resolved: Rc<Cell<bool>>,
    /// Number of thenables this settler is nested under.
    depth: usize,
}

impl<T, E> Clone for Settler<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            resolved: Rc::clone(&self.resolved),
            depth: self.depth,
        }
    }
}

impl<T, E> fmt::Debug for Settler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("promise", &self.promise.id())
            .field("resolved", &self.resolved.get())
            .field("depth", &self.depth)
            .finish()
    }
}

impl<T, E> Settler<T, E> {
    /// The cell this settler controls.
    #[must_use]
    pub fn promise(&self) -> &Promise<T, E> {
        &self.promise
    }

    /// Whether a settle call already took effect, or the cell is settled.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.get() || self.promise.is_settled()
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// A settler for the same cell with its own flag, one thenable deeper.
    pub(crate) fn nested(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            resolved: Rc::new(Cell::new(false)),
            depth: self.depth + 1,
        }
    }

    /// A handle that does not keep the cell or its queue alive.
    pub(crate) fn downgrade(&self) -> WeakSettler<T, E> {
        WeakSettler {
            inner: Rc::downgrade(&self.promise.inner),
            resolved: Rc::clone(&self.resolved),
            depth: self.depth,
        }
    }

    fn claim(&self, op: &'static str) -> bool {
        if self.is_resolved() {
            if self.promise.queue.config().trace_redundant_settles {
                tracing::debug!(message = "promise.redundant_settle", promise = %self.promise.id(), op);
            }
            return false;
        }
        self.resolved.set(true);
        true
    }
}

/// Non-owning settler, upgraded against the queue that delivers to it.
pub(crate) struct WeakSettler<T, E> {
    inner: Weak<RefCell<Inner<T, E>>>,
    resolved: Rc<Cell<bool>>,
    depth: usize,
}

impl<T, E> WeakSettler<T, E> {
    /// `None` once every handle to the cell is gone.
    pub(crate) fn upgrade(&self, queue: &Microtasks) -> Option<Settler<T, E>> {
        let inner = self.inner.upgrade()?;
        Some(Settler {
            promise: Promise {
                inner,
                queue: queue.clone(),
            },
            resolved: Rc::clone(&self.resolved),
            depth: self.depth,
        })
    }
}

impl<T: Clone + 'static, E: Reason> Settler<T, E> {
    /// Fulfill with a plain value. The transition happens on the next
    /// microtask checkpoint. Returns `false` if already resolved.
    pub fn fulfill(&self, value: T) -> bool {
        self.resolve(Resolution::Value(value))
    }

    /// Reject immediately and schedule the queued reactions. Returns `false`
    /// if already resolved.
    pub fn reject(&self, error: E) -> bool {
        if !self.claim("reject") {
            return false;
        }
        self.promise.settle_now(Err(error));
        true
    }

    /// Resolve with a value, a promise to adopt, or a thenable. Returns
    /// `false` if already resolved.
    pub fn resolve(&self, resolution: impl Into<Resolution<T, E>>) -> bool {
        if !self.claim("resolve") {
            return false;
        }
        resolve::resolve_into(self, resolution.into());
        true
    }

    /// `Ok` fulfills, `Err` rejects.
    pub fn settle(&self, outcome: Result<T, E>) -> bool {
        match outcome {
            Ok(value) => self.fulfill(value),
            Err(error) => self.reject(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    type P = Promise<i32, Error>;

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn new_cell_is_pending() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        assert!(promise.is_pending());
        assert_eq!(promise.state(), State::Pending);
        assert!(!settler.is_resolved());
        assert!(settler.promise().ptr_eq(&promise));
    }

    #[test]
    fn fulfill_is_deferred_to_microtask() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        assert!(settler.fulfill(5));
        assert!(promise.is_pending());
        assert!(settler.is_resolved());

        queue.drain();
        assert_eq!(promise.state(), State::Fulfilled(5));
        assert_eq!(promise.value(), Some(5));
        assert_eq!(promise.reason(), None);
    }

    #[test]
    fn reject_is_immediate() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        assert!(settler.reject(Error::msg("bad")));
        assert_eq!(promise.state(), State::Rejected(Error::msg("bad")));
        assert_eq!(promise.reason(), Some(Error::msg("bad")));
    }

    #[test]
    fn first_settlement_wins() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        assert!(settler.fulfill(1));
        assert!(!settler.reject(Error::msg("late")));
        assert!(!settler.fulfill(2));
        queue.drain();
        assert_eq!(promise.state(), State::Fulfilled(1));

        let (promise, settler) = P::new(&queue);
        let twin = settler.clone();
        assert!(twin.reject(Error::msg("first")));
        assert!(!settler.fulfill(9));
        queue.drain();
        assert_eq!(promise.state(), State::Rejected(Error::msg("first")));
    }

    #[test]
    fn settle_now_refuses_terminal_states() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        settler.reject(Error::msg("x"));
        assert!(!promise.settle_now(Ok(3)));
        assert!(promise.state().is_rejected());
    }

    #[test]
    fn reactions_run_in_attachment_order_with_same_value() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        let seen = recorder();
        for name in ["r1", "r2", "r3"] {
            let seen = Rc::clone(&seen);
            promise.then(move |v| {
                seen.borrow_mut().push(format!("{name}:{v}"));
                Ok(v)
            });
        }
        assert_eq!(promise.pending_reactions(), 3);

        settler.fulfill(5);
        queue.drain();
        assert_eq!(*seen.borrow(), vec!["r1:5", "r2:5", "r3:5"]);
        assert_eq!(promise.pending_reactions(), 0);
    }

    #[test]
    fn attach_on_settled_parent_is_still_async() {
        let queue = Microtasks::new();
        let parent = P::rejected(&queue, Error::msg("e"));
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let child = parent.catch(move |_| {
            flag.set(true);
            Ok(0)
        });
        assert!(child.is_pending());
        assert!(!ran.get());
        queue.drain();
        assert!(ran.get());
        assert_eq!(child.state(), State::Fulfilled(0));
    }

    #[test]
    fn immediate_chaining_runs_in_order() {
        let queue = Microtasks::new();
        let parent = P::fulfilled(&queue, 1);
        queue.drain();

        let seen = recorder();
        let (s1, s2) = (Rc::clone(&seen), Rc::clone(&seen));
        let tail = parent
            .then(move |v| {
                s1.borrow_mut().push("f".into());
                Ok(v + 1)
            })
            .then(move |v| {
                s2.borrow_mut().push("g".into());
                Ok(v * 10)
            });
        assert!(seen.borrow().is_empty());
        queue.drain();
        assert_eq!(*seen.borrow(), vec!["f", "g"]);
        assert_eq!(tail.value(), Some(20));
    }

    #[test]
    fn rejection_passes_through_missing_handler() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        let derived = promise.then(|v| Ok(v + 1));
        settler.reject(Error::msg("err"));
        queue.drain();
        assert_eq!(derived.state(), State::Rejected(Error::msg("err")));
    }

    #[test]
    fn fulfillment_passes_through_catch() {
        let queue = Microtasks::new();
        let derived = P::fulfilled(&queue, 4).catch(|_| Ok(-1));
        queue.drain();
        assert_eq!(derived.value(), Some(4));
    }

    #[test]
    fn throwing_rejection_handler_uses_new_error() {
        let queue = Microtasks::new();
        let derived = P::rejected(&queue, Error::msg("old")).catch(|_| Err(Error::msg("new")));
        queue.drain();
        assert_eq!(derived.reason(), Some(Error::msg("new")));
    }

    #[test]
    fn then_or_else_picks_branch() {
        let queue = Microtasks::new();
        let ok = P::fulfilled(&queue, 2).then_or_else(|v| Ok(v * 2), |_| Ok(-1));
        let err = P::rejected(&queue, Error::msg("x")).then_or_else(|v| Ok(v * 2), |_| Ok(-1));
        queue.drain();
        assert_eq!(ok.value(), Some(4));
        assert_eq!(err.value(), Some(-1));
    }

    #[test]
    fn and_then_adopts_returned_promise() {
        let queue = Microtasks::new();
        let (inner, inner_settler) = P::new(&queue);
        let inner_for_handler = inner.clone();
        let derived = P::fulfilled(&queue, 1).and_then(move |_| inner_for_handler);
        queue.drain();
        assert!(derived.is_pending());

        inner_settler.fulfill(42);
        queue.drain();
        assert_eq!(derived.value(), Some(42));
    }

    #[test]
    fn or_else_recovers_with_promise() {
        let queue = Microtasks::new();
        let q = queue.clone();
        let derived = P::rejected(&queue, Error::msg("x")).or_else(move |_| P::fulfilled(&q, 7));
        queue.drain();
        assert_eq!(derived.value(), Some(7));
    }

    #[test]
    fn then_changes_value_type() {
        let queue = Microtasks::new();
        let derived: Promise<String, Error> = P::fulfilled(&queue, 3).then(|v| Ok(format!("n={v}")));
        queue.drain();
        assert_eq!(derived.value().as_deref(), Some("n=3"));
    }

    #[test]
    fn finally_runs_and_passes_outcome_through() {
        let queue = Microtasks::new();
        let count = Rc::new(Cell::new(0));
        let (c1, c2) = (Rc::clone(&count), Rc::clone(&count));
        let ok = P::fulfilled(&queue, 1).finally(move || {
            c1.set(c1.get() + 1);
            Ok(())
        });
        let err = P::rejected(&queue, Error::msg("e")).finally(move || {
            c2.set(c2.get() + 1);
            Ok(())
        });
        queue.drain();
        assert_eq!(count.get(), 2);
        assert_eq!(ok.value(), Some(1));
        assert_eq!(err.reason(), Some(Error::msg("e")));
    }

    #[test]
    fn failing_finally_overrides_outcome() {
        let queue = Microtasks::new();
        let derived = P::fulfilled(&queue, 1).finally(|| Err(Error::msg("cleanup")));
        queue.drain();
        assert_eq!(derived.reason(), Some(Error::msg("cleanup")));
    }

    #[test]
    fn finally_await_waits_for_cleanup() {
        let queue = Microtasks::new();
        let (cleanup, cleanup_settler) = Promise::<(), Error>::new(&queue);
        let cleanup_for_handler = cleanup.clone();
        let derived = P::fulfilled(&queue, 8).finally_await(move || cleanup_for_handler);
        queue.drain();
        assert!(derived.is_pending());

        cleanup_settler.fulfill(());
        queue.drain();
        assert_eq!(derived.value(), Some(8));
    }

    #[test]
    fn finally_await_rejection_replaces_outcome() {
        let queue = Microtasks::new();
        let q = queue.clone();
        let derived = P::rejected(&queue, Error::msg("original"))
            .finally_await(move || Promise::rejected(&q, Error::msg("cleanup")));
        queue.drain();
        assert_eq!(derived.reason(), Some(Error::msg("cleanup")));
    }

    #[test]
    fn executor_error_rejects() {
        let queue = Microtasks::new();
        let promise = P::with_executor(&queue, |_| Err(Error::msg("exec")));
        assert_eq!(promise.reason(), Some(Error::msg("exec")));
    }

    #[test]
    fn executor_error_after_resolve_is_ignored() {
        let queue = Microtasks::new();
        let promise = P::with_executor(&queue, |settler| {
            settler.fulfill(3);
            Err(Error::msg("ignored"))
        });
        queue.drain();
        assert_eq!(promise.value(), Some(3));
    }

    #[test]
    fn from_resolution_returns_same_promise() {
        let queue = Microtasks::new();
        let original = P::fulfilled(&queue, 1);
        let same = P::from_resolution(&queue, Resolution::Promise(original.clone()));
        assert!(same.ptr_eq(&original));

        let fresh = P::from_resolution(&queue, Resolution::Value(2));
        queue.drain();
        assert_eq!(fresh.value(), Some(2));
    }

    #[test]
    fn resolving_with_pending_promise_waits() {
        let queue = Microtasks::new();
        let (source, source_settler) = P::new(&queue);
        let (target, target_settler) = P::new(&queue);
        assert!(target_settler.resolve(source.clone()));
        assert!(!target_settler.fulfill(1));
        queue.drain();
        assert!(target.is_pending());

        source_settler.reject(Error::msg("src"));
        queue.drain();
        assert_eq!(target.reason(), Some(Error::msg("src")));
    }

    #[test]
    fn state_helpers() {
        let pending: State<i32, Error> = State::Pending;
        assert!(pending.is_pending() && !pending.is_settled());
        assert_eq!(pending.label(), "pending");
        assert_eq!(pending.into_settled(), None);

        let done: State<i32, Error> = State::Fulfilled(1);
        assert!(done.is_fulfilled() && done.is_settled());
        assert_eq!(done.label(), "fulfilled");
        assert_eq!(done.into_settled(), Some(Settled::Fulfilled(1)));

        let failed: State<i32, Error> = State::Rejected(Error::msg("e"));
        assert!(failed.is_rejected());
        assert_eq!(failed.label(), "rejected");
    }

    #[test]
    fn settled_result_conversions() {
        let s: Settled<i32, Error> = Ok(1).into();
        assert!(s.is_fulfilled());
        assert_eq!(s.into_result(), Ok(1));
        let s: Settled<i32, Error> = Err(Error::msg("e")).into();
        assert!(s.is_rejected());
    }

    #[test]
    fn debug_and_display() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        assert_eq!(promise.id().to_string(), "promise#0");
        assert_eq!(promise.id().raw(), 0);
        let dbg = format!("{promise:?}");
        assert!(dbg.contains("Promise") && dbg.contains("Pending"));
        let dbg = format!("{settler:?}");
        assert!(dbg.contains("Settler") && dbg.contains("resolved: false"));
    }

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn dropping_long_pending_chain_does_not_recurse() {
        const LINKS: usize = 100_000;
        let queue = Microtasks::new();
        let dropped = Rc::new(Cell::new(0));
        let (head, settler) = P::new(&queue);
        let mut tail = head.clone();
        for _ in 0..LINKS {
            let counter = DropCounter(Rc::clone(&dropped));
            tail = tail.then(move |v| {
                let _keep = &counter;
                Ok(v + 1)
            });
        }
        drop(tail);
        drop(settler);
        drop(head);
        assert_eq!(dropped.get(), LINKS);
        assert!(queue.is_empty());
    }

    #[test]
    fn dropping_long_mixed_type_chain_does_not_recurse() {
        let queue = Microtasks::new();
        let (head, settler) = P::new(&queue);
        let mut tail = head.clone();
        for _ in 0..50_000 {
            tail = tail
                .then(|v| Ok(v.to_string()))
                .catch(|_| Ok(String::new()))
                .then(|s| Ok(s.len() as i32));
        }
        drop(head);
        drop(tail);
        drop(settler);
        assert!(queue.is_empty());
    }
}
