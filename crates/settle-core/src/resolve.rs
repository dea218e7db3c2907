#![forbid(unsafe_code)]

//! The resolution procedure: what offering a value to a cell does.
//!
//! The offered value is a closed sum, [`Resolution`], so there is no
//! runtime shape sniffing:
//!
//! - `Value(v)`: the cell fulfills with `v` on the next microtask.
//! - `Promise(p)`: the cell stays pending and adopts `p`'s eventual outcome.
//!   Resolving a cell with itself, directly or through a cycle of adoptions,
//!   rejects it with [`ProtocolError::SelfResolution`].
//! - `Thenable(t)`: on the next microtask, `t` is handed a fresh settler for
//!   the cell. An `Err` from `t` rejects the cell unless `t` already
//!   resolved it.
//!
//! Nested thenables and adoption-chain walks are bounded by
//! [`SchedulerConfig::max_resolution_depth`](crate::SchedulerConfig::max_resolution_depth).
//! Past the bound the cell rejects with [`ProtocolError::ChainTooDeep`].

use std::fmt;

use crate::error::{ProtocolError, Reason};
use crate::promise::{Promise, Settler};
use crate::reaction::ReactionRecord;

/// Anything that can register for a deferred outcome and report it through a
/// settler.
///
/// Implemented for every `FnOnce(Settler<T, E>) -> Result<(), E>`.
pub trait Thenable<T, E> {
    /// Register `settler` for the eventual outcome. Returning `Err` rejects
    /// the target unless the settler was already used.
    fn subscribe(self: Box<Self>, settler: Settler<T, E>) -> Result<(), E>;
}

impl<T, E, F> Thenable<T, E> for F
where
    F: FnOnce(Settler<T, E>) -> Result<(), E>,
{
    fn subscribe(self: Box<Self>, settler: Settler<T, E>) -> Result<(), E> {
        (*self)(settler)
    }
}

/// A value offered to a cell.
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Self::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Self::Promise(promise)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Self::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// Apply `resolution` to the cell behind `settler`. The settler has already
/// been claimed by the caller.
pub(crate) fn resolve_into<T, E>(settler: &Settler<T, E>, resolution: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Reason,
{
    let target = settler.promise();
    let limit = target.queue().config().max_resolution_depth;

    match resolution {
        Resolution::Value(value) => {
            let cell = target.clone();
            target.queue().enqueue(move || {
                cell.settle_now(Ok(value));
            });
        }
        Resolution::Promise(source) => match source.reaches(target, limit) {
            Ok(false) => {
                tracing::trace!(message = "promise.adopt", promise = %target.id(), source = %source.id());
                target.follow(&source);
                source.push_reaction(Box::new(ReactionRecord::adopt(settler.clone())));
            }
            Ok(true) => reject_protocol(target, ProtocolError::SelfResolution),
            Err(err) => reject_protocol(target, err),
        },
        Resolution::Thenable(thenable) => {
            if settler.depth() >= limit {
                reject_protocol(target, ProtocolError::ChainTooDeep { limit });
                return;
            }
            let nested = settler.nested();
            target.queue().enqueue(move || {
                let fallback = nested.clone();
                if let Err(error) = thenable.subscribe(nested) {
                    if !fallback.reject(error) {
                        tracing::debug!(
                            message = "promise.thenable_error_ignored",
                            promise = %fallback.promise().id()
                        );
                    }
                }
            });
        }
    }
}

fn reject_protocol<T, E>(target: &Promise<T, E>, err: ProtocolError)
where
    T: Clone + 'static,
    E: Reason,
{
    tracing::debug!(message = "promise.protocol_error", promise = %target.id(), error = %err);
    target.settle_now(Err(E::from(err)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Microtasks, SchedulerConfig, State};
    use std::cell::RefCell;
    use std::rc::Rc;

    type P = Promise<i32, Error>;

    fn self_resolution() -> Error {
        Error::Protocol(ProtocolError::SelfResolution)
    }

    #[test]
    fn resolving_with_itself_rejects() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        assert!(settler.resolve(promise.clone()));
        assert_eq!(promise.reason(), Some(self_resolution()));
    }

    #[test]
    fn handler_returning_own_child_rejects() {
        let queue = Microtasks::new();
        let slot: Rc<RefCell<Option<P>>> = Rc::new(RefCell::new(None));
        let captured = Rc::clone(&slot);
        let child = P::fulfilled(&queue, 1).and_then(move |_| {
            captured
                .borrow_mut()
                .take()
                .unwrap_or_else(|| panic!("child not stored"))
        });
        *slot.borrow_mut() = Some(child.clone());
        queue.drain();
        assert_eq!(child.reason(), Some(self_resolution()));
    }

    #[test]
    fn mutual_adoption_rejects_instead_of_hanging() {
        let queue = Microtasks::new();
        let (a, settle_a) = P::new(&queue);
        let (b, settle_b) = P::new(&queue);
        settle_a.resolve(b.clone());
        settle_b.resolve(a.clone());
        assert_eq!(b.reason(), Some(self_resolution()));

        queue.drain();
        assert_eq!(a.reason(), Some(self_resolution()));
    }

    #[test]
    fn adopting_settled_promise_takes_its_outcome() {
        let queue = Microtasks::new();
        let source = P::rejected(&queue, Error::msg("src"));
        let (target, settler) = P::new(&queue);
        settler.resolve(source);
        assert!(target.is_pending());
        queue.drain();
        assert_eq!(target.reason(), Some(Error::msg("src")));
    }

    #[test]
    fn long_adoption_chain_settles() {
        let queue = Microtasks::new();
        let (head, head_settler) = P::new(&queue);
        let mut tail = head.clone();
        for _ in 0..50 {
            let (next, settler) = P::new(&queue);
            settler.resolve(tail);
            tail = next;
        }
        head_settler.fulfill(9);
        queue.drain();
        assert_eq!(tail.value(), Some(9));
    }

    #[test]
    fn adoption_chain_past_depth_bound_rejects() {
        let queue = Microtasks::with_config(SchedulerConfig::default().with_max_resolution_depth(4));
        let (head, _head_settler) = P::new(&queue);
        let mut tail = head;
        for _ in 0..4 {
            let (next, settler) = P::new(&queue);
            settler.resolve(tail);
            tail = next;
        }
        let (last, settler) = P::new(&queue);
        settler.resolve(tail);
        assert_eq!(
            last.reason(),
            Some(Error::Protocol(ProtocolError::ChainTooDeep { limit: 4 }))
        );
    }

    #[test]
    fn synchronous_thenable_fulfills() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        settler.resolve(Resolution::thenable(|s: Settler<i32, Error>| {
            s.fulfill(4);
            Ok(())
        }));
        assert!(promise.is_pending());
        queue.drain();
        assert_eq!(promise.value(), Some(4));
    }

    #[test]
    fn thenable_is_invoked_in_microtask() {
        let queue = Microtasks::new();
        let called = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&called);
        let (_promise, settler) = P::new(&queue);
        settler.resolve(Resolution::thenable(move |_s: Settler<i32, Error>| {
            *flag.borrow_mut() = true;
            Ok(())
        }));
        assert!(!*called.borrow());
        queue.drain();
        assert!(*called.borrow());
    }

    #[test]
    fn deferred_thenable_settles_later() {
        let queue = Microtasks::new();
        let stash: Rc<RefCell<Option<Settler<i32, Error>>>> = Rc::new(RefCell::new(None));
        let keep = Rc::clone(&stash);
        let (promise, settler) = P::new(&queue);
        settler.resolve(Resolution::thenable(move |s: Settler<i32, Error>| {
            *keep.borrow_mut() = Some(s);
            Ok(())
        }));
        queue.drain();
        assert!(promise.is_pending());

        let held = stash.borrow_mut().take();
        if let Some(s) = held {
            s.reject(Error::msg("later"));
        }
        assert_eq!(promise.reason(), Some(Error::msg("later")));
    }

    #[test]
    fn malformed_thenable_error_rejects_target() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        settler.resolve(Resolution::thenable(|_s: Settler<i32, Error>| {
            Err(Error::msg("then threw"))
        }));
        queue.drain();
        assert_eq!(promise.reason(), Some(Error::msg("then threw")));
    }

    #[test]
    fn thenable_error_after_resolving_is_ignored() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        settler.resolve(Resolution::thenable(|s: Settler<i32, Error>| {
            s.fulfill(1);
            s.reject(Error::msg("second"));
            Err(Error::msg("third"))
        }));
        queue.drain();
        assert_eq!(promise.state(), State::Fulfilled(1));
    }

    #[test]
    fn thenable_resolving_with_target_rejects() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        let me = promise.clone();
        settler.resolve(Resolution::thenable(move |s: Settler<i32, Error>| {
            s.resolve(me);
            Ok(())
        }));
        queue.drain();
        assert_eq!(promise.reason(), Some(self_resolution()));
    }

    fn nest(levels: usize) -> Resolution<i32, Error> {
        if levels == 0 {
            return Resolution::Value(7);
        }
        Resolution::thenable(move |s: Settler<i32, Error>| {
            s.resolve(nest(levels - 1));
            Ok(())
        })
    }

    #[test]
    fn nested_thenables_unwrap_within_bound() {
        let queue = Microtasks::with_config(SchedulerConfig::default().with_max_resolution_depth(3));
        let (promise, settler) = P::new(&queue);
        settler.resolve(nest(3));
        queue.drain();
        assert_eq!(promise.value(), Some(7));
    }

    #[test]
    fn nested_thenables_past_bound_reject() {
        let queue = Microtasks::with_config(SchedulerConfig::default().with_max_resolution_depth(3));
        let (promise, settler) = P::new(&queue);
        settler.resolve(nest(4));
        queue.drain();
        assert_eq!(
            promise.reason(),
            Some(Error::Protocol(ProtocolError::ChainTooDeep { limit: 3 }))
        );
    }

    struct Ready(i32);

    impl Thenable<i32, Error> for Ready {
        fn subscribe(self: Box<Self>, settler: Settler<i32, Error>) -> Result<(), Error> {
            settler.fulfill(self.0);
            Ok(())
        }
    }

    #[test]
    fn struct_thenable() {
        let queue = Microtasks::new();
        let (promise, settler) = P::new(&queue);
        settler.resolve(Resolution::thenable(Ready(11)));
        queue.drain();
        assert_eq!(promise.value(), Some(11));
    }

    #[test]
    fn resolution_debug() {
        let queue = Microtasks::new();
        let value: Resolution<i32, Error> = Resolution::Value(1);
        assert_eq!(format!("{value:?}"), "Value(1)");
        let thenable = nest(1);
        assert_eq!(format!("{thenable:?}"), "Thenable(..)");
        let promise: Resolution<i32, Error> = P::fulfilled(&queue, 1).into();
        assert!(format!("{promise:?}").starts_with("Promise("));
    }
}
