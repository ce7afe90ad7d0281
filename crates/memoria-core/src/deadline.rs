//! Optional per-operation deadline for the long-running operations spec §5
//! calls out by name (cleanup, bulk insert): "Each public operation accepts
//! an optional deadline. Exceeding the deadline causes the operation to
//! fail with a timeout error."
//!
//! The core never reads the wall clock for business timestamps — callers
//! thread `now_ms` through explicitly (see `persona::PersonaMemoryManager`)
//! — but a deadline is a different kind of time: wall-clock elapsed budget
//! for a single call, not a timestamp recorded on a record. `Instant` is the
//! right tool for that and doesn't entangle with the explicit-clock
//! discipline used elsewhere. Grounded on `velesdb-core::config`'s
//! `query_timeout_ms`, generalized here to an explicit per-call value
//! instead of one global config knob.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A wall-clock budget for one public operation. `Deadline::none()` (the
/// default) never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline: `check` always succeeds.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// A deadline `duration` from now.
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    /// Returns `Err(Error::Timeout)` if this deadline has passed.
    ///
    /// # Errors
    /// Returns `Error::Timeout` once the deadline has elapsed.
    pub fn check(&self) -> Result<()> {
        match self.0 {
            Some(at) if Instant::now() >= at => {
                Err(Error::Timeout("operation exceeded its deadline".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
