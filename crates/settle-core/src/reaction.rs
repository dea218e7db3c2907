#![forbid(unsafe_code)]

//! Reaction records: what a cell does for a consumer once it settles.
//!
//! A record pairs two continuations, one per outcome, with the settler of
//! the cell that receives the continuation's result. Cells store records as
//! `Box<dyn Reaction<T, E>>` so that records with different output types can
//! sit in the same list.

use std::any::Any;
use std::fmt;

use crate::error::Reason;
use crate::promise::Settler;
use crate::resolve::Resolution;

/// Boxed continuation: consumes the settled value and either produces a
/// resolution for the downstream cell or fails with a reason.
pub type Continuation<A, U, E> = Box<dyn FnOnce(A) -> Result<Resolution<U, E>, E>>;

/// Fulfillment branch of a reaction record.
pub enum OnFulfilled<T, U, E> {
    Handler(Continuation<T, U, E>),
    /// No handler: forward the value unchanged.
    PassThrough(Forward<T, U>),
}

/// Identity forwarding from `T` to `U == T`.
///
/// Built only by [`OnFulfilled::pass_through`]; a pass-through branch can
/// never change the value it forwards.
///
/// ```compile_fail
/// use settle_core::{Error, Forward, OnFulfilled};
///
/// let _: OnFulfilled<i32, String, Error> =
///     OnFulfilled::PassThrough(Forward(|v: i32| v.to_string()));
/// ```
pub struct Forward<T, U>(fn(T) -> U);

impl<T, U> Forward<T, U> {
    fn apply(self, value: T) -> U {
        (self.0)(value)
    }
}

impl<T: 'static, U: 'static, E: 'static> OnFulfilled<T, U, E> {
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        Self::Handler(Box::new(f))
    }

    /// Handler producing a plain value.
    pub fn map<F>(f: F) -> Self
    where
        F: FnOnce(T) -> Result<U, E> + 'static,
    {
        Self::Handler(Box::new(move |value| f(value).map(Resolution::Value)))
    }
}

impl<T, E> OnFulfilled<T, T, E> {
    #[must_use]
    pub fn pass_through() -> Self {
        Self::PassThrough(Forward(std::convert::identity))
    }
}

impl<T, U, E> fmt::Debug for OnFulfilled<T, U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::PassThrough(_) => f.write_str("PassThrough"),
        }
    }
}

/// Rejection branch of a reaction record.
pub enum OnRejected<U, E> {
    Handler(Continuation<E, U, E>),
    /// No handler: forward the reason unchanged.
    PassThrough,
}

impl<U: 'static, E: 'static> OnRejected<U, E> {
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        Self::Handler(Box::new(f))
    }

    /// Handler producing a plain value.
    pub fn map<F>(f: F) -> Self
    where
        F: FnOnce(E) -> Result<U, E> + 'static,
    {
        Self::Handler(Box::new(move |error| f(error).map(Resolution::Value)))
    }
}

impl<U, E> fmt::Debug for OnRejected<U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::PassThrough => f.write_str("PassThrough"),
        }
    }
}

/// Why a record was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    /// Consumer chaining through [`Promise::attach`](crate::Promise::attach).
    Chain,
    /// A pending cell following the outcome of another promise.
    Adopt,
}

/// One consumer's interest in a cell's outcome.
pub struct ReactionRecord<T, U, E> {
    on_fulfilled: OnFulfilled<T, U, E>,
    on_rejected: OnRejected<U, E>,
    downstream: Settler<U, E>,
    kind: ReactionKind,
}

impl<T, U, E> fmt::Debug for ReactionRecord<T, U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionRecord")
            .field("on_fulfilled", &self.on_fulfilled)
            .field("on_rejected", &self.on_rejected)
            .field("downstream", &self.downstream)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<T, U, E> ReactionRecord<T, U, E> {
    #[must_use]
    pub fn chain(
        on_fulfilled: OnFulfilled<T, U, E>,
        on_rejected: OnRejected<U, E>,
        downstream: Settler<U, E>,
    ) -> Self {
        Self {
            on_fulfilled,
            on_rejected,
            downstream,
            kind: ReactionKind::Chain,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ReactionKind {
        self.kind
    }
}

impl<T, E> ReactionRecord<T, T, E> {
    /// Record that copies the outcome verbatim into `downstream`.
    #[must_use]
    pub fn adopt(downstream: Settler<T, E>) -> Self {
        Self {
            on_fulfilled: OnFulfilled::pass_through(),
            on_rejected: OnRejected::PassThrough,
            downstream,
            kind: ReactionKind::Adopt,
        }
    }
}

impl<T, U, E> ReactionRecord<T, U, E>
where
    T: Clone + 'static,
    U: Clone + 'static,
    E: Reason,
{
    /// Run the branch matching `outcome` and settle the downstream cell.
    ///
    /// Pass-through branches settle downstream directly. Handler results go
    /// through the resolution procedure; a handler `Err` rejects downstream
    /// with that error.
    pub fn invoke(self, outcome: Result<T, E>) {
        let Self {
            on_fulfilled,
            on_rejected,
            downstream,
            kind,
        } = self;
        tracing::trace!(
            message = "reaction.invoke",
            downstream = %downstream.promise().id(),
            ?kind,
            fulfilled = outcome.is_ok()
        );

        let produced = match outcome {
            Ok(value) => match on_fulfilled {
                OnFulfilled::Handler(handler) => handler(value),
                OnFulfilled::PassThrough(forward) => {
                    downstream.promise().settle_now(Ok(forward.apply(value)));
                    return;
                }
            },
            Err(error) => match on_rejected {
                OnRejected::Handler(handler) => handler(error),
                OnRejected::PassThrough => {
                    downstream.promise().settle_now(Err(error));
                    return;
                }
            },
        };

        match produced {
            Ok(resolution) => {
                downstream.resolve(resolution);
            }
            Err(error) => {
                downstream.reject(error);
            }
        }
    }
}

/// Type-erased reaction stored on a cell.
pub(crate) trait Reaction<T, E> {
    /// Whether attaching this reaction counts as handling a rejection.
    fn handles_rejection(&self) -> bool;

    fn react(self: Box<Self>, outcome: Result<T, E>);

    /// Erase the record so it can be dropped from the teardown list.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T, U, E> Reaction<T, E> for ReactionRecord<T, U, E>
where
    T: Clone + 'static,
    U: Clone + 'static,
    E: Reason,
{
    fn handles_rejection(&self) -> bool {
        self.kind == ReactionKind::Adopt || matches!(self.on_rejected, OnRejected::Handler(_))
    }

    fn react(self: Box<Self>, outcome: Result<T, E>) {
        self.invoke(outcome);
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Bare callback on the outcome, used by the combinators.
pub(crate) struct Observer<F>(F);

impl<F> Observer<F> {
    pub(crate) fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<T, E, F> Reaction<T, E> for Observer<F>
where
    F: FnOnce(Result<T, E>) + 'static,
{
    fn handles_rejection(&self) -> bool {
        true
    }

    fn react(self: Box<Self>, outcome: Result<T, E>) {
        (self.0)(outcome);
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
