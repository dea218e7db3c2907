#![forbid(unsafe_code)]

//! Rejection reasons produced or carried by the core.
//!
//! Application errors are opaque: whatever a producer passes to
//! [`Settler::reject`](crate::Settler::reject) or a handler returns as `Err`
//! is propagated verbatim. The core only ever manufactures a
//! [`ProtocolError`], so every reason type must be able to absorb one. That
//! requirement, together with `Clone` (one rejection fans out to every
//! reaction) and `Debug` (unhandled-rejection reports), is the [`Reason`]
//! bound.

use std::fmt;

use thiserror::Error;

/// Violations of the resolution protocol detected by the core itself.
///
/// These never escape as panics; they always become the rejection reason of
/// the cell being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProtocolError {
    /// A cell was resolved with itself, directly or through a chain of
    /// adopted promises that leads back to it.
    #[error("promise cannot be resolved with itself")]
    SelfResolution,

    /// Nested thenables or an adoption chain went deeper than the configured
    /// [`max_resolution_depth`](crate::SchedulerConfig::max_resolution_depth).
    #[error("resolution chain exceeded the depth limit of {limit}")]
    ChainTooDeep { limit: usize },
}

/// Bound satisfied by every rejection reason type.
pub trait Reason: Clone + fmt::Debug + From<ProtocolError> + 'static {}

impl<E> Reason for E where E: Clone + fmt::Debug + From<ProtocolError> + 'static {}

/// Rejection of [`any`](crate::any) when no input fulfilled.
///
/// `errors` holds one reason per input, in input order. Empty input yields an
/// empty list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("all {} promises were rejected", errors.len())]
pub struct AggregateError<E> {
    pub errors: Vec<E>,
}

impl<E> AggregateError<E> {
    #[must_use]
    pub fn new(errors: Vec<E>) -> Self {
        Self { errors }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

// Protocol errors raised while resolving an `any` result are reported as a
// single-entry aggregate.
impl<E: From<ProtocolError>> From<ProtocolError> for AggregateError<E> {
    fn from(err: ProtocolError) -> Self {
        Self {
            errors: vec![E::from(err)],
        }
    }
}

/// Ready-made reason type for hosts that do not bring their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum Error {
    /// Application-level rejection carrying a message.
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl Error {
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// The protocol violation behind this error, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<ProtocolError> {
        match self {
            Self::Protocol(err) => Some(*err),
            Self::Message(_) => None,
        }
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}
