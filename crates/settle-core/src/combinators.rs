#![forbid(unsafe_code)]

//! Combinators over many cells.
//!
//! Each combinator returns one result cell on the given queue and registers
//! an observer on every input. Observers count as rejection handlers, so an
//! input that rejects is never reported as unhandled once it has been passed
//! to a combinator. Inputs are never cancelled; once the result has settled,
//! later input outcomes are ignored.
//!
//! | Combinator      | Fulfills with                 | Rejects with                  | Empty input            |
//! |-----------------|-------------------------------|-------------------------------|------------------------|
//! | [`all`]         | every value, in input order   | first rejection observed      | fulfills with `[]`     |
//! | [`all_settled`] | every outcome, in input order | never                         | fulfills with `[]`     |
//! | [`race`]        | first settlement observed     | first settlement observed     | stays pending forever  |
//! | [`any`]         | first fulfillment observed    | every reason, in input order  | rejects with `[]`      |

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{AggregateError, Reason};
use crate::promise::{Promise, Settled, Settler};
use crate::queue::Microtasks;

/// Slots filled out of order, released once all are present.
struct Gather<V> {
    slots: Vec<Option<V>>,
    remaining: usize,
}

impl<V> Gather<V> {
    fn new(len: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(len).collect(),
            remaining: len,
        }
    }

    /// Store `value` at `index`; return every value once the last slot fills.
    fn fill(&mut self, index: usize, value: V) -> Option<Vec<V>> {
        let slot = self.slots.get_mut(index)?;
        if slot.replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        Some(std::mem::take(&mut self.slots).into_iter().flatten().collect())
    }
}

/// Fulfill with every input value in input order, or reject with the first
/// rejection observed.
pub fn all<T, E, I>(queue: &Microtasks, promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + 'static,
    E: Reason,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let inputs: Vec<Promise<T, E>> = promises.into_iter().collect();
    let (result, settler) = Promise::new(queue);
    tracing::trace!(message = "combinator.all", result = %result.id(), inputs = inputs.len());
    if inputs.is_empty() {
        settler.fulfill(Vec::new());
        return result;
    }

    let gather = Rc::new(RefCell::new(Gather::new(inputs.len())));
    for (index, input) in inputs.iter().enumerate() {
        let gather = Rc::clone(&gather);
        let settler = settler.clone();
        input.observe(move |outcome| {
            if settler.is_resolved() {
                return;
            }
            match outcome {
                Ok(value) => {
                    let done = gather.borrow_mut().fill(index, value);
                    if let Some(values) = done {
                        settler.fulfill(values);
                    }
                }
                Err(error) => {
                    settler.reject(error);
                }
            }
        });
    }
    result
}

/// Fulfill with every input's outcome in input order, once all have settled.
/// Never rejects.
pub fn all_settled<T, E, I>(queue: &Microtasks, promises: I) -> Promise<Vec<Settled<T, E>>, E>
where
    T: Clone + 'static,
    E: Reason,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let inputs: Vec<Promise<T, E>> = promises.into_iter().collect();
    let (result, settler) = Promise::new(queue);
    tracing::trace!(message = "combinator.all_settled", result = %result.id(), inputs = inputs.len());
    if inputs.is_empty() {
        settler.fulfill(Vec::new());
        return result;
    }

    let gather = Rc::new(RefCell::new(Gather::new(inputs.len())));
    for (index, input) in inputs.iter().enumerate() {
        let gather = Rc::clone(&gather);
        let settler = settler.clone();
        input.observe(move |outcome| {
            let done = gather.borrow_mut().fill(index, Settled::from(outcome));
            if let Some(outcomes) = done {
                settler.fulfill(outcomes);
            }
        });
    }
    result
}

/// Settle like the first input to settle.
///
/// With no inputs the result stays pending forever.
pub fn race<T, E, I>(queue: &Microtasks, promises: I) -> Promise<T, E>
where
    T: Clone + 'static,
    E: Reason,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let (result, settler) = Promise::new(queue);
    let mut inputs = 0usize;
    for input in promises {
        inputs += 1;
        let settler = settler.clone();
        input.observe(move |outcome| {
            if !settler.is_resolved() {
                settler.settle(outcome);
            }
        });
    }
    tracing::trace!(message = "combinator.race", result = %result.id(), inputs);
    result
}

/// Fulfill with the first input to fulfill, or reject with every reason in
/// input order when all inputs reject.
pub fn any<T, E, I>(queue: &Microtasks, promises: I) -> Promise<T, AggregateError<E>>
where
    T: Clone + 'static,
    E: Reason,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let inputs: Vec<Promise<T, E>> = promises.into_iter().collect();
    let (result, settler): (_, Settler<T, AggregateError<E>>) = Promise::new(queue);
    tracing::trace!(message = "combinator.any", result = %result.id(), inputs = inputs.len());
    if inputs.is_empty() {
        settler.reject(AggregateError::new(Vec::new()));
        return result;
    }

    let gather = Rc::new(RefCell::new(Gather::new(inputs.len())));
    for (index, input) in inputs.iter().enumerate() {
        let gather = Rc::clone(&gather);
        let settler = settler.clone();
        input.observe(move |outcome| {
            if settler.is_resolved() {
                return;
            }
            match outcome {
                Ok(value) => {
                    settler.fulfill(value);
                }
                Err(error) => {
                    let done = gather.borrow_mut().fill(index, error);
                    if let Some(errors) = done {
                        settler.reject(AggregateError::new(errors));
                    }
                }
            }
        });
    }
    result
}

/// Run promise factories one after another, each starting once the
/// previous one fulfilled. Stops at the first rejection; later factories are
/// never called.
pub fn sequence<T, E, I, F>(queue: &Microtasks, tasks: I) -> Promise<Vec<T>, E>
where
    T: Clone + 'static,
    E: Reason,
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Promise<T, E> + 'static,
{
    tasks
        .into_iter()
        .fold(Promise::fulfilled(queue, Vec::new()), |acc, task| {
            acc.and_then(move |mut values: Vec<T>| {
                task().then(move |value| {
                    values.push(value);
                    Ok(values)
                })
            })
        })
}
