#![forbid(unsafe_code)]

//! settle public facade crate.
//!
//! Re-exports the core primitives at the root and groups the commonly used
//! names in [`prelude`].

pub use settle_core::*;

#[cfg(feature = "lab")]
pub use settle_lab as lab;

pub mod prelude {
    pub use settle_core::{
        AggregateError, Error, Microtasks, Promise, Resolution, Settled, Settler, State, all,
        all_settled, any, race, sequence,
    };

    #[cfg(feature = "lab")]
    pub use settle_lab::Lab;
}
