#![forbid(unsafe_code)]

//! Scheduler configuration.

/// Default bound on nested thenables and adoption-chain hops.
pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 512;

/// Configuration for a [`Microtasks`](crate::Microtasks) queue and every
/// promise created on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum nesting of thenables, and maximum length of an adoption chain
    /// walked during the self-resolution check. Deeper chains reject with
    /// [`ProtocolError::ChainTooDeep`](crate::ProtocolError::ChainTooDeep).
    /// Default: 512.
    pub max_resolution_depth: usize,

    /// Maximum number of jobs a single `drain()` runs. `None` drains until
    /// the queue is empty.
    /// Default: `None`.
    pub drain_budget: Option<usize>,

    /// Record rejections that have no rejection handler.
    /// Default: true.
    pub track_unhandled: bool,

    /// Emit a DEBUG event for every ignored settle attempt on an already
    /// resolved cell. Such attempts are always no-ops.
    /// Default: false.
    pub trace_redundant_settles: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            drain_budget: None,
            track_unhandled: true,
            trace_redundant_settles: false,
        }
    }
}

impl SchedulerConfig {
    /// Set the resolution depth bound. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_resolution_depth(mut self, depth: usize) -> Self {
        self.max_resolution_depth = depth.max(1);
        self
    }

    /// Cap the jobs run per drain. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_drain_budget(mut self, budget: usize) -> Self {
        self.drain_budget = Some(budget.max(1));
        self
    }

    /// Toggle unhandled-rejection tracking.
    #[must_use]
    pub fn with_track_unhandled(mut self, enabled: bool) -> Self {
        self.track_unhandled = enabled;
        self
    }

    /// Toggle DEBUG events for redundant settle attempts.
    #[must_use]
    pub fn with_trace_redundant_settles(mut self, enabled: bool) -> Self {
        self.trace_redundant_settles = enabled;
        self
    }
}
