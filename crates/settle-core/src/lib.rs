#![forbid(unsafe_code)]

//! Core settlement primitives for settle.
//!
//! A [`Promise`] is a single-assignment cell for the eventual outcome of an
//! asynchronous computation. Producers settle it through its [`Settler`];
//! consumers chain continuations onto it. Every continuation runs as a job on
//! an explicit [`Microtasks`] queue that the host drains, so ordering is fully
//! deterministic and testable without an event loop.
//!
//! # Example
//!
//! ```
//! use settle_core::{Error, Microtasks, Promise, all};
//!
//! let queue = Microtasks::new();
//! let (a, settle_a) = Promise::<u32, Error>::new(&queue);
//! let b = Promise::fulfilled(&queue, 2);
//!
//! let sum = all(&queue, [a, b]).then(|values| Ok(values.iter().sum::<u32>()));
//! settle_a.fulfill(40);
//! queue.drain();
//!
//! assert_eq!(sum.value(), Some(42));
//! ```
//!
//! # Modules
//!
//! - [`queue`]: the FIFO microtask queue.
//! - [`promise`]: settlement cells and settlers.
//! - [`reaction`]: reaction records attached by chaining.
//! - [`resolve`]: the resolution procedure, thenables, self-resolution.
//! - [`combinators`]: `all`, `all_settled`, `race`, `any`, `sequence`.
//! - [`rejection`]: unhandled-rejection reports.
//! - [`remote`]: settling from other threads.

pub mod combinators;
pub mod config;
pub mod error;
pub mod promise;
pub mod queue;
pub mod reaction;
pub mod rejection;
pub mod remote;
pub mod resolve;
mod teardown;

pub use combinators::{all, all_settled, any, race, sequence};
pub use config::{DEFAULT_MAX_RESOLUTION_DEPTH, SchedulerConfig};
pub use error::{AggregateError, Error, ProtocolError, Reason};
pub use promise::{Promise, PromiseId, Settled, Settler, State};
pub use queue::{DrainReport, Microtask, Microtasks, QueueStats};
pub use reaction::{Continuation, Forward, OnFulfilled, OnRejected, ReactionKind, ReactionRecord};
pub use rejection::UnhandledRejection;
pub use remote::RemoteSettler;
pub use resolve::{Resolution, Thenable};
