//! Run orchestration.
//!
//! [`Orchestrator::run`] is the one entry point: build the payload, submit
//! it, detect completion, aggregate results.
//!
//! ```text
//!   RequestBuilder ──► RunSubmitter ──► ┌ StreamingSubscriber ┐
//!                                       │        (race)       ├──► ResultAggregator
//!                                       └ QueuePoller ────────┘
//! ```
//!
//! For asynchronous submissions both detection mechanisms start together
//! under a single wall-clock deadline, set once and never extended. The
//! orchestrator commits to whichever yields a signal first and tears the
//! loser down: the broker subscription is disconnected through a
//! cancellation token, the poller's timer goes away with its dropped
//! future. Streaming failures are recoverable: handshake rejection and
//! subscriber timeout both hand detection over to the poller instead of
//! failing the run.
//!
//! Dropping the future returned by `run` is the caller's abort: a drop
//! guard cancels the subscriber task, and nothing further is sent on this
//! run's behalf.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::ResultAggregator;
use crate::error::RunError;
use crate::platform::Connection;
use crate::poll::{DEFAULT_POLL_INTERVAL, QueuePoller};
use crate::report::TestReport;
use crate::selection::{RequestBuilder, SubmitMode, TestSelection};
use crate::stream::{Broker, DEFAULT_STREAM_TIMEOUT, StreamOutcome, StreamingSubscriber};
use crate::submit::RunSubmitter;

/// Knobs for one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: SubmitMode,
    /// Overall ceiling on waiting for completion.
    pub wait: Duration,
    pub poll_interval: Duration,
    /// Streaming wait ceiling; effective value is capped at `wait`.
    pub stream_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: SubmitMode::Asynchronous,
            wait: DEFAULT_STREAM_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }
}

/// Composes submission, completion detection, and aggregation.
pub struct Orchestrator<C: Connection + ?Sized> {
    conn: Arc<C>,
    options: RunOptions,
}

impl<C: Connection + ?Sized> Orchestrator<C> {
    pub fn new(conn: Arc<C>, options: RunOptions) -> Self {
        Self { conn, options }
    }

    /// Runs the selection to completion and returns the final report.
    ///
    /// `broker` is a fresh, exclusively-owned broker connection for this
    /// run; it is never shared and is released before this returns.
    ///
    /// # Errors
    ///
    /// The full taxonomy: [`RunError::InvalidSelection`] before any
    /// network call, [`RunError::Submission`] / [`RunError::Protocol`]
    /// at submission time, [`RunError::Timeout`] /
    /// [`RunError::NoResults`] from detection and aggregation.
    pub async fn run<B>(&self, selection: &TestSelection, broker: B) -> Result<TestReport, RunError>
    where
        B: Broker + 'static,
    {
        let submission = RequestBuilder::build(selection, self.options.mode)?;
        let submitter = RunSubmitter::new(self.conn.as_ref());

        if submission.is_synchronous() {
            // Results come back inline; no completion detection at all.
            return submitter.submit_sync(&submission).await;
        }

        let started = Instant::now();
        let handle = submitter.submit(&submission).await?;
        let run_id = handle.run_id;
        // One deadline for both detection paths, fixed at start.
        let deadline = started + self.options.wait;

        let cancel = CancellationToken::new();
        let _teardown = cancel.clone().drop_guard();

        let subscriber = StreamingSubscriber::new(broker)
            .with_timeout(self.options.stream_timeout.min(self.options.wait));
        let mut stream_task =
            tokio::spawn(subscriber.wait_for_completion(run_id.clone(), cancel.child_token()));

        let poller = QueuePoller::new(self.conn.as_ref()).with_interval(self.options.poll_interval);
        let poll_fut = poller.wait_for_completion(&run_id, deadline);
        tokio::pin!(poll_fut);

        let detection: Result<(), RunError> = tokio::select! {
            stream = &mut stream_task => match stream {
                Ok(StreamOutcome::Completed(_)) => {
                    info!(%run_id, "completion detected by streaming");
                    Ok(())
                }
                Ok(StreamOutcome::Unavailable(reason)) => {
                    info!(%run_id, "streaming unavailable ({reason}), relying on queue polling");
                    (&mut poll_fut).await
                }
                Ok(StreamOutcome::TimedOut | StreamOutcome::Cancelled) => {
                    info!(%run_id, "streaming yielded no signal, relying on queue polling");
                    (&mut poll_fut).await
                }
                Err(join_err) => {
                    warn!(%run_id, "streaming task failed ({join_err}), relying on queue polling");
                    (&mut poll_fut).await
                }
            },
            poll = &mut poll_fut => {
                // The poller settled first; with a result or an error,
                // the subscription comes down before we return.
                cancel.cancel();
                let _ = (&mut stream_task).await;
                if poll.is_ok() {
                    info!(%run_id, "completion detected by queue polling");
                }
                poll
            }
        };
        detection?;

        // Exactly one aggregation, whichever path won.
        ResultAggregator::new(self.conn.as_ref())
            .aggregate(&run_id, !selection.skip_code_coverage, started.elapsed())
            .await
    }
}
