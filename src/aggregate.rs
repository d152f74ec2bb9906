//! Result aggregation for terminal runs.
//!
//! Once completion detection says the run is done, [`ResultAggregator`]
//! fetches the per-test outcome rows (and coverage, unless skipped) and
//! folds them into one [`TestReport`]. Called exactly once per run,
//! whichever detection path won.
//!
//! Result rows should always be visible once the run is terminal. If a
//! read still comes back empty, one delayed retry distinguishes "results
//! not yet visible" from "this run genuinely produced no tests"; a second
//! empty read surfaces as [`RunError::NoResults`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RunError;
use crate::id::RunId;
use crate::platform::Connection;
use crate::report::{CoverageRecord, TestCaseResult, TestOutcome, TestReport};

/// Pause before the single grace retry on an empty result read.
pub const RESULT_GRACE_DELAY: Duration = Duration::from_secs(1);

/// Fetches and merges final run results.
pub struct ResultAggregator<'a, C: Connection + ?Sized> {
    conn: &'a C,
    grace_delay: Duration,
}

impl<'a, C: Connection + ?Sized> ResultAggregator<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            conn,
            grace_delay: RESULT_GRACE_DELAY,
        }
    }

    #[cfg(test)]
    fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    /// Builds the final report for a terminal run.
    ///
    /// `wait_time` is the client-observed time spent waiting for the run;
    /// it is recorded in the summary, not used for control flow.
    pub async fn aggregate(
        &self,
        run_id: &RunId,
        include_coverage: bool,
        wait_time: Duration,
    ) -> Result<TestReport, RunError> {
        let mut rows = self.fetch_result_rows(run_id).await?;
        if rows.is_empty() {
            warn!(%run_id, "terminal run returned zero result rows, retrying once");
            tokio::time::sleep(self.grace_delay).await;
            rows = self.fetch_result_rows(run_id).await?;
            if rows.is_empty() {
                return Err(RunError::NoResults {
                    run_id: run_id.clone(),
                    reason: "run reached a terminal state but produced no result rows".to_string(),
                });
            }
        }

        let tests = rows
            .into_iter()
            .map(ResultRow::into_case)
            .collect::<Result<Vec<_>, _>>()?;

        let coverage = if include_coverage {
            Some(self.fetch_coverage().await?)
        } else {
            None
        };

        debug!(%run_id, tests = tests.len(), "aggregated run results");
        Ok(TestReport::from_tests(
            Some(run_id.clone()),
            tests,
            coverage,
            wait_time,
        ))
    }

    async fn fetch_result_rows(&self, run_id: &RunId) -> Result<Vec<ResultRow>, RunError> {
        let soql = format!(
            "SELECT ApexClass.Name, MethodName, Outcome, Message, StackTrace, RunTime \
             FROM ApexTestResult WHERE AsyncApexJobId = '{run_id}'"
        );
        let records = self.conn.query(&soql).await?;
        records.into_iter().map(parse_row).collect()
    }

    async fn fetch_coverage(&self) -> Result<Vec<CoverageRecord>, RunError> {
        let soql = "SELECT ApexClassOrTrigger.Name, NumLinesCovered, NumLinesUncovered \
                    FROM ApexCodeCoverageAggregate";
        let records = self.conn.query(soql).await?;
        records
            .into_iter()
            .map(|record| {
                let row: CoverageRow = serde_json::from_value(record)
                    .map_err(|e| RunError::Protocol(format!("malformed coverage record: {e}")))?;
                Ok(CoverageRecord {
                    class_name: row.apex_class_or_trigger.name,
                    lines_covered: row.num_lines_covered,
                    lines_uncovered: row.num_lines_uncovered,
                })
            })
            .collect()
    }
}

fn parse_row(record: Value) -> Result<ResultRow, RunError> {
    serde_json::from_value(record)
        .map_err(|e| RunError::Protocol(format!("malformed test result record: {e}")))
}

/// Wire shape of one per-test outcome row.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultRow {
    #[serde(default)]
    apex_class: Option<ClassRef>,
    method_name: String,
    outcome: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stack_trace: Option<String>,
    #[serde(default)]
    run_time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ClassRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CoverageRow {
    apex_class_or_trigger: ClassRef,
    #[serde(default)]
    num_lines_covered: u64,
    #[serde(default)]
    num_lines_uncovered: u64,
}

impl ResultRow {
    fn into_case(self) -> Result<TestCaseResult, RunError> {
        let outcome = match self.outcome.as_str() {
            "Pass" => TestOutcome::Pass,
            "Fail" => TestOutcome::Fail,
            "CompileFail" => TestOutcome::CompileFail,
            "Skip" => TestOutcome::Skip,
            other => {
                return Err(RunError::Protocol(format!(
                    "unknown test outcome '{other}'"
                )));
            }
        };
        Ok(TestCaseResult {
            class_name: self
                .apex_class
                .map(|c| c.name)
                .unwrap_or_else(|| "<unknown class>".to_string()),
            method_name: self.method_name,
            outcome,
            message: self.message,
            stack_trace: self.stack_trace,
            run_time_ms: self.run_time as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::platform::PlatformResult;
    use crate::report::RunOutcome;

    struct ScriptedQueries {
        responses: Mutex<Vec<Vec<Value>>>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedQueries {
        fn new(mut responses: Vec<Vec<Value>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Connection for ScriptedQueries {
        async fn post(&self, _endpoint: &str, _body: &Value) -> PlatformResult<Value> {
            unreachable!("aggregator never posts")
        }

        async fn query(&self, soql: &str) -> PlatformResult<Vec<Value>> {
            self.queries.lock().unwrap().push(soql.to_string());
            Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
        }

        async fn refresh_session(&self) -> PlatformResult<()> {
            Ok(())
        }

        fn instance_url(&self) -> &str {
            "https://org.example.com"
        }

        async fn access_token(&self) -> String {
            "token".to_string()
        }

        fn api_version(&self) -> &str {
            "61.0"
        }
    }

    fn run_id() -> RunId {
        RunId::parse("707xx0000AGQ3jbAAI").unwrap()
    }

    fn result_row(class: &str, method: &str, outcome: &str) -> Value {
        json!({
            "ApexClass": { "Name": class },
            "MethodName": method,
            "Outcome": outcome,
            "Message": null,
            "StackTrace": null,
            "RunTime": 42.0
        })
    }

    #[tokio::test]
    async fn aggregates_results_and_coverage() {
        let conn = ScriptedQueries::new(vec![
            vec![
                result_row("Foo", "testA", "Pass"),
                result_row("Foo", "testB", "Fail"),
            ],
            vec![json!({
                "ApexClassOrTrigger": { "Name": "Foo" },
                "NumLinesCovered": 8,
                "NumLinesUncovered": 2
            })],
        ]);
        let report = ResultAggregator::new(&conn)
            .aggregate(&run_id(), true, Duration::from_secs(9))
            .await
            .unwrap();

        assert_eq!(report.summary.tests_ran, 2);
        assert_eq!(report.summary.outcome, RunOutcome::Failed);
        assert_eq!(report.summary.run_id.as_ref().unwrap(), &run_id());
        assert_eq!(report.coverage.as_ref().unwrap()[0].lines_covered, 8);
        assert_eq!(conn.query_count(), 2);
    }

    #[tokio::test]
    async fn skipping_coverage_issues_no_coverage_query() {
        let conn = ScriptedQueries::new(vec![vec![result_row("Foo", "testA", "Pass")]]);
        let report = ResultAggregator::new(&conn)
            .aggregate(&run_id(), false, Duration::ZERO)
            .await
            .unwrap();
        assert!(report.coverage.is_none());
        assert_eq!(conn.query_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_results_get_one_grace_retry() {
        let conn = ScriptedQueries::new(vec![
            Vec::new(),
            vec![result_row("Foo", "testA", "Pass")],
        ]);
        let report = ResultAggregator::new(&conn)
            .with_grace_delay(Duration::from_millis(10))
            .aggregate(&run_id(), false, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(report.summary.tests_ran, 1);
        assert_eq!(conn.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_emptiness_is_no_results() {
        let conn = ScriptedQueries::new(vec![]);
        let err = ResultAggregator::new(&conn)
            .with_grace_delay(Duration::from_millis(10))
            .aggregate(&run_id(), false, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::NoResults { .. }));
        assert_eq!(conn.query_count(), 2);
    }

    #[tokio::test]
    async fn unknown_outcome_is_a_protocol_error() {
        let conn = ScriptedQueries::new(vec![vec![result_row("Foo", "testA", "Exploded")]]);
        let err = ResultAggregator::new(&conn)
            .aggregate(&run_id(), false, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Protocol(_)));
    }
}
