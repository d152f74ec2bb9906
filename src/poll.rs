//! Queue polling fallback for completion detection.
//!
//! [`QueuePoller`] repeatedly reads the run's queue items until every one
//! of them reaches a terminal status or the deadline passes. It is the
//! always-available counterpart to the streaming subscriber: slower to
//! notice completion, but immune to broker availability.
//!
//! The first status check happens before the first sleep, so a run that is
//! already terminal resolves without waiting a poll interval. Cancellation
//! is by dropping the returned future; the in-flight sleep timer goes with
//! it and no further queries are issued.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RunError;
use crate::id::RunId;
use crate::platform::Connection;

/// Default pause between status reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Consecutive empty polls tolerated before the run id is declared to have
/// no results.
pub const MAX_CONSECUTIVE_EMPTY_POLLS: u32 = 3;

/// Execution status of one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum QueueStatus {
    Queued,
    Processing,
    Aborted,
    Completed,
    Failed,
    Preparing,
    Holding,
}

impl QueueStatus {
    /// Statuses from which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Completed | Self::Failed)
    }
}

/// Read-only snapshot of the platform's per-class execution record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueItem {
    pub id: String,
    pub status: QueueStatus,
    #[serde(default)]
    pub apex_class_id: Option<String>,
}

/// Polls queue items for a run until all are terminal.
pub struct QueuePoller<'a, C: Connection + ?Sized> {
    conn: &'a C,
    interval: Duration,
}

impl<'a, C: Connection + ?Sized> QueuePoller<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            conn,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Resolves once every queue item for `run_id` is terminal.
    ///
    /// # Errors
    ///
    /// [`RunError::Timeout`] when the deadline passes first,
    /// [`RunError::NoResults`] after [`MAX_CONSECUTIVE_EMPTY_POLLS`] reads
    /// that return zero items, and [`RunError::Platform`] /
    /// [`RunError::Protocol`] for query failures.
    pub async fn wait_for_completion(
        &self,
        run_id: &RunId,
        deadline: Instant,
    ) -> Result<(), RunError> {
        let started = Instant::now();
        let mut consecutive_empty = 0u32;

        loop {
            let items = self.fetch_items(run_id).await?;

            if items.is_empty() {
                // Queue items can lag the run id becoming visible, so an
                // empty read is transient until it repeats.
                consecutive_empty += 1;
                warn!(
                    %run_id,
                    consecutive_empty, "poll returned no queue items"
                );
                if consecutive_empty >= MAX_CONSECUTIVE_EMPTY_POLLS {
                    return Err(RunError::NoResults {
                        run_id: run_id.clone(),
                        reason: format!(
                            "{consecutive_empty} consecutive polls returned no queue items"
                        ),
                    });
                }
            } else {
                consecutive_empty = 0;
                let done = items.iter().filter(|i| i.status.is_terminal()).count();
                debug!(%run_id, done, total = items.len(), "queue poll");
                if done == items.len() {
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RunError::Timeout {
                    run_id: run_id.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep_until(deadline.min(now + self.jittered_interval())).await;
        }
    }

    async fn fetch_items(&self, run_id: &RunId) -> Result<Vec<QueueItem>, RunError> {
        let soql = format!(
            "SELECT Id, Status, ApexClassId FROM ApexTestQueueItem WHERE ParentJobId = '{run_id}'"
        );
        let records = self.conn.query(&soql).await?;
        records
            .into_iter()
            .map(parse_item)
            .collect::<Result<Vec<_>, _>>()
    }

    /// Interval with ±20% jitter so many concurrent runs do not poll in
    /// lockstep.
    fn jittered_interval(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(0.8..1.2);
        self.interval.mul_f64(factor)
    }
}

fn parse_item(record: Value) -> Result<QueueItem, RunError> {
    serde_json::from_value(record)
        .map_err(|e| RunError::Protocol(format!("malformed queue item record: {e}")))
}
