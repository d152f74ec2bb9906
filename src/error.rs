//! Error taxonomy for the run orchestration pipeline.
//!
//! Each variant maps to a distinct failure phase so callers can tell a bad
//! selection from a platform rejection from a deadline miss without parsing
//! message text:
//!
//! - **Never retried**: `InvalidSelection`, `Protocol`
//! - **Retried at most once**: `Submission` (session expiry only), `NoResults`
//! - **Deadline**: `Timeout`, meaning "the run did not finish in time", not
//!   a hard platform failure; the run may still complete on the platform
//!   afterwards.

use crate::id::RunId;

/// Result type for run orchestration operations.
pub type RunResult<T> = Result<T, RunError>;

/// Errors surfaced by the orchestration pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The caller's test selection failed validation.
    ///
    /// Raised before any network call; never retried.
    #[error("Invalid test selection: {0}")]
    InvalidSelection(String),

    /// The platform rejected the run submission.
    ///
    /// A submission that fails with a session-expiry signal is retried once
    /// after a credential refresh; this error means the retry budget is spent
    /// or the failure was of a non-retryable kind.
    #[error("Test run submission failed: {0}")]
    Submission(String),

    /// The platform returned a response the client cannot interpret.
    ///
    /// Indicates a contract break (e.g. a missing run identifier in a
    /// submission response). Never retried.
    #[error("Unexpected platform response: {0}")]
    Protocol(String),

    /// The run did not reach a terminal state before the deadline.
    #[error("Test run {run_id} did not complete within {waited_secs}s")]
    Timeout { run_id: RunId, waited_secs: u64 },

    /// A run believed terminal produced zero retrievable rows.
    ///
    /// One grace retry with delay is attempted before this surfaces, to
    /// distinguish "no tests ran" from "results not yet visible".
    #[error("No results found for test run {run_id}: {reason}")]
    NoResults { run_id: RunId, reason: String },

    /// Failure in the underlying platform connection.
    #[error(transparent)]
    Platform(#[from] crate::platform::PlatformError),
}
