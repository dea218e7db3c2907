#![forbid(unsafe_code)]

//! Iterative teardown of reaction lists.
//!
//! A pending cell owns its reactions, each reaction owns the settler of the
//! cell downstream, and that cell owns its own reactions. Dropping the head
//! of a long chain would recurse once per link. Instead, a dropped cell hands
//! its reactions to a per-thread list and only the outermost drop empties
//! it, one item at a time, so stack depth stays constant however long the
//! chain is.

use std::any::Any;
use std::cell::{Cell, RefCell};

thread_local! {
    static DEFERRED: RefCell<Vec<Box<dyn Any>>> = const { RefCell::new(Vec::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Resets the draining flag even if a dropped item panics.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = DRAINING.try_with(|flag| flag.set(false));
    }
}

/// Drop `items` without growing the stack per nested cell.
pub(crate) fn release<I>(items: I)
where
    I: IntoIterator<Item = Box<dyn Any>>,
{
    let mut items = items.into_iter();
    // During thread-local destruction the list may be gone; drop in place.
    let queued = DEFERRED.try_with(|list| list.borrow_mut().extend(&mut items));
    if queued.is_err() {
        drop(items);
        return;
    }
    // A drain further up the stack picks these up.
    if !matches!(DRAINING.try_with(|flag| flag.replace(true)), Ok(false)) {
        return;
    }
    let _guard = DrainGuard;
    loop {
        let next = DEFERRED.try_with(|list| list.borrow_mut().pop()).ok().flatten();
        match next {
            Some(item) => drop(item),
            None => break,
        }
    }
}

#[cfg(test)]
fn deferred_len() -> usize {
    DEFERRED.with(|list| list.borrow().len())
}
