//! Error types for `memoria`.
//!
//! A single unified error type covers the buffer, index, and persona layers
//! so callers at the wire boundary can map one taxonomy to HTTP status codes.

use thiserror::Error;

/// Result type alias for `memoria` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `memoria` operations.
///
/// Each variant carries a stable code (`MEM-XXX`) for log correlation.
#[derive(Error, Debug)]
pub enum Error {
    /// Input failed shape or range validation (MEM-001).
    #[error("[MEM-001] validation failed: {0}")]
    Validation(String),

    /// No such vector id / persona / conversation (MEM-002).
    #[error("[MEM-002] not found: {0}")]
    NotFound(String),

    /// Buffer full, or persona over cap and cleanup could not free enough (MEM-003).
    #[error("[MEM-003] capacity exceeded: {0}")]
    Capacity(String),

    /// Vector length did not match the store's declared dimensionality (MEM-004).
    #[error("[MEM-004] dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Actual length supplied.
        actual: usize,
    },

    /// API key lacks the needed scope (MEM-005).
    #[error("[MEM-005] permission denied: {0}")]
    Permission(String),

    /// Caller exceeded their request quota (MEM-006).
    #[error("[MEM-006] rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested backoff before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// An external collaborator (embedding provider, metadata store) failed (MEM-007).
    #[error("[MEM-007] dependency failed: {0}")]
    Dependency(String),

    /// Invariant violation or otherwise unexpected state (MEM-008).
    #[error("[MEM-008] internal error: {0}")]
    Internal(String),

    /// A caller-supplied deadline elapsed mid-operation (MEM-009, spec §5).
    #[error("[MEM-009] {0}")]
    Timeout(String),
}

impl Error {
    /// Returns the stable error code (e.g. `"MEM-001"`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "MEM-001",
            Self::NotFound(_) => "MEM-002",
            Self::Capacity(_) => "MEM-003",
            Self::DimensionMismatch { .. } => "MEM-004",
            Self::Permission(_) => "MEM-005",
            Self::RateLimited { .. } => "MEM-006",
            Self::Dependency(_) => "MEM-007",
            Self::Internal(_) => "MEM-008",
            Self::Timeout(_) => "MEM-009",
        }
    }

    /// Returns true if a caller may reasonably retry this operation.
    ///
    /// Dependency failures and capacity pressure are retryable once the
    /// caller has backed off or triggered cleanup; a timeout is retryable
    /// with a longer deadline or a smaller unit of work; the rest are not.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Capacity(_) | Self::RateLimited { .. } | Self::Dependency(_) | Self::Timeout(_)
        )
    }
}
