#![forbid(unsafe_code)]

//! Deterministic host harness for settle.
//!
//! [`Lab`] wraps a [`Microtasks`](settle_core::Microtasks) queue with a
//! virtual clock and timers, so scenarios that involve external producers
//! (timeouts, I/O completions) replay identically on every run. Events
//! recorded with [`Lab::record`] form a [`Trace`] that exports to JSONL.
//!
//! ```
//! use settle_core::{Error, race};
//! use settle_lab::Lab;
//! use web_time::Duration;
//!
//! let lab = Lab::new();
//! let slow = lab.delay::<_, Error>(Duration::from_millis(30), "slow");
//! let fast = lab.delay::<_, Error>(Duration::from_millis(10), "fast");
//! let winner = race(lab.queue(), [slow, fast]);
//!
//! lab.run();
//! assert_eq!(winner.value(), Some("fast"));
//! assert_eq!(lab.now_us(), 30_000);
//! ```

pub mod clock;
pub mod error;
pub mod lab;
pub mod subscriber;
pub mod trace;

pub use clock::LabClock;
pub use error::LabError;
pub use lab::{Lab, TimerId, Turn};
pub use subscriber::{init_json_tracing, init_tracing};
pub use trace::{Trace, TraceEvent};
