//! Run submission.
//!
//! [`RunSubmitter`] performs the one network call that starts a run. The
//! only retryable failure is session expiry: the submitter refreshes the
//! credential and repeats the call exactly once. A second expiry means the
//! platform is not accepting the refreshed credential, and retrying further
//! would loop forever.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::RunError;
use crate::id::RunId;
use crate::platform::{Connection, PlatformError};
use crate::report::{CoverageRecord, TestCaseResult, TestOutcome, TestReport};
use crate::selection::RunSubmission;

/// Handle to an accepted asynchronous run.
///
/// Owned by the orchestrator for the lifetime of the run. Synchronous
/// submissions never produce a handle; their results come back inline.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: RunId,
    pub submitted_at: DateTime<Utc>,
}

/// Submits validated payloads to the platform.
pub struct RunSubmitter<'a, C: Connection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: Connection + ?Sized> RunSubmitter<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Submits an asynchronous run and returns its platform-assigned id.
    ///
    /// # Errors
    ///
    /// [`RunError::Submission`] when the platform rejects the run (after
    /// the single refresh retry, for session expiry), and
    /// [`RunError::Protocol`] when the response carries no usable run id.
    pub async fn submit(&self, submission: &RunSubmission) -> Result<RunHandle, RunError> {
        debug_assert!(!submission.is_synchronous());
        let response = self
            .post_with_refresh(submission.endpoint(), submission.payload())
            .await?;

        // The platform answers an async submission with a bare JSON string.
        let raw = response.as_str().ok_or_else(|| {
            RunError::Protocol(format!(
                "submission response did not contain a run id: {response}"
            ))
        })?;
        let run_id = RunId::parse(raw)?;
        info!(%run_id, "test run accepted");

        Ok(RunHandle {
            run_id,
            submitted_at: Utc::now(),
        })
    }

    /// Submits a synchronous run and parses the inline result.
    ///
    /// Completion detection is bypassed entirely: the response body is the
    /// full run result.
    pub async fn submit_sync(&self, submission: &RunSubmission) -> Result<TestReport, RunError> {
        debug_assert!(submission.is_synchronous());
        let started = std::time::Instant::now();
        let response = self
            .post_with_refresh(submission.endpoint(), submission.payload())
            .await?;

        let result: SyncRunResult = serde_json::from_value(response)
            .map_err(|e| RunError::Protocol(format!("malformed synchronous run result: {e}")))?;
        Ok(result.into_report(started.elapsed()))
    }

    /// One POST, plus at most one refresh-and-retry on session expiry.
    async fn post_with_refresh(&self, endpoint: &str, payload: &Value) -> Result<Value, RunError> {
        match self.conn.post(endpoint, payload).await {
            Ok(response) => Ok(response),
            Err(PlatformError::SessionExpired) => {
                info!("session expired, refreshing credential and retrying submission");
                self.conn
                    .refresh_session()
                    .await
                    .map_err(|e| RunError::Submission(format!("credential refresh failed: {e}")))?;
                match self.conn.post(endpoint, payload).await {
                    Ok(response) => Ok(response),
                    Err(PlatformError::SessionExpired) => Err(RunError::Submission(
                        "session still invalid after credential refresh".to_string(),
                    )),
                    Err(e) => Err(RunError::Submission(e.to_string())),
                }
            }
            Err(e) => Err(RunError::Submission(e.to_string())),
        }
    }
}

/// Wire shape of a synchronous run response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRunResult {
    #[serde(default)]
    successes: Vec<SyncSuccess>,
    #[serde(default)]
    failures: Vec<SyncFailure>,
    #[serde(default)]
    code_coverage: Vec<SyncCoverage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncSuccess {
    name: String,
    method_name: String,
    #[serde(default)]
    time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncFailure {
    name: String,
    method_name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stack_trace: Option<String>,
    #[serde(default)]
    time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncCoverage {
    name: String,
    #[serde(default)]
    num_locations: u64,
    #[serde(default)]
    num_locations_not_covered: u64,
}

impl SyncRunResult {
    fn into_report(self, wait_time: std::time::Duration) -> TestReport {
        let mut tests = Vec::with_capacity(self.successes.len() + self.failures.len());
        for s in self.successes {
            tests.push(TestCaseResult {
                class_name: s.name,
                method_name: s.method_name,
                outcome: TestOutcome::Pass,
                message: None,
                stack_trace: None,
                run_time_ms: s.time as u64,
            });
        }
        for f in self.failures {
            tests.push(TestCaseResult {
                class_name: f.name,
                method_name: f.method_name,
                outcome: TestOutcome::Fail,
                message: f.message,
                stack_trace: f.stack_trace,
                run_time_ms: f.time as u64,
            });
        }

        let coverage: Vec<CoverageRecord> = self
            .code_coverage
            .into_iter()
            .map(|c| CoverageRecord {
                class_name: c.name,
                lines_covered: c.num_locations.saturating_sub(c.num_locations_not_covered),
                lines_uncovered: c.num_locations_not_covered,
            })
            .collect();
        let coverage = if coverage.is_empty() {
            None
        } else {
            Some(coverage)
        };

        TestReport::from_tests(None, tests, coverage, wait_time)
    }
}
