//! Final report types and output rendering.
//!
//! [`TestReport`] is the single aggregate produced once per run, either
//! inline from a synchronous submission or by the aggregator after
//! completion detection. It is built once and never mutated afterwards.
//!
//! Rendering is behind the [`Reporter`] trait so the orchestration core
//! never knows whether output is a human table or machine JSON.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use console::style;
use serde::{Deserialize, Serialize};

use crate::id::RunId;

/// Outcome of a single test method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    Pass,
    Fail,
    CompileFail,
    Skip,
}

/// Result of one executed test method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    /// Class the method belongs to.
    pub class_name: String,
    /// Test method name.
    pub method_name: String,
    pub outcome: TestOutcome,
    /// Failure message, if the test did not pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Platform-reported execution time in milliseconds.
    pub run_time_ms: u64,
}

impl TestCaseResult {
    /// `"Class.method"` display name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

/// Aggregated line coverage for one class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRecord {
    pub class_name: String,
    pub lines_covered: u64,
    pub lines_uncovered: u64,
}

impl CoverageRecord {
    /// Covered percentage, 100 for a class with no coverable lines.
    pub fn percent(&self) -> f64 {
        let total = self.lines_covered + self.lines_uncovered;
        if total == 0 {
            100.0
        } else {
            self.lines_covered as f64 * 100.0 / total as f64
        }
    }
}

/// Overall run verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Passed,
    Failed,
}

/// Summary counts for a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub tests_ran: usize,
    pub passing: usize,
    pub failing: usize,
    pub skipped: usize,
    /// Run identifier; absent for synchronous submissions, which never get
    /// a platform-assigned run id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock time spent waiting for the run, as observed client-side.
    #[serde(default, with = "duration_secs")]
    pub wait_time: Duration,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs_f64(f64::deserialize(d)?))
    }
}

/// The final aggregate handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub summary: RunSummary,
    pub tests: Vec<TestCaseResult>,
    /// Per-class coverage; `None` when coverage collection was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<Vec<CoverageRecord>>,
}

impl TestReport {
    /// Builds the report from test rows, deriving the summary counts.
    pub fn from_tests(
        run_id: Option<RunId>,
        tests: Vec<TestCaseResult>,
        coverage: Option<Vec<CoverageRecord>>,
        wait_time: Duration,
    ) -> Self {
        let passing = tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::Pass)
            .count();
        let failing = tests
            .iter()
            .filter(|t| matches!(t.outcome, TestOutcome::Fail | TestOutcome::CompileFail))
            .count();
        let skipped = tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::Skip)
            .count();
        let outcome = if failing == 0 {
            RunOutcome::Passed
        } else {
            RunOutcome::Failed
        };
        Self {
            summary: RunSummary {
                outcome,
                tests_ran: tests.len(),
                passing,
                failing,
                skipped,
                run_id,
                finished_at: Some(Utc::now()),
                wait_time,
            },
            tests,
            coverage,
        }
    }

    /// Returns `true` if no test failed.
    pub fn success(&self) -> bool {
        self.summary.outcome == RunOutcome::Passed
    }

    /// Conventional process exit code: 0 on success, 1 on failure.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Renders a finished run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once with the final report.
    async fn on_run_complete(&self, report: &TestReport);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_complete(&self, _report: &TestReport) {}
}

/// Human-readable console output.
pub struct HumanReporter {
    /// Print every test row, not just failures.
    pub show_passing: bool,
}

#[async_trait]
impl Reporter for HumanReporter {
    async fn on_run_complete(&self, report: &TestReport) {
        for test in &report.tests {
            match test.outcome {
                TestOutcome::Pass if self.show_passing => {
                    println!("{} {}", style("PASS").green(), test.full_name());
                }
                TestOutcome::Pass => {}
                TestOutcome::Skip => {
                    println!("{} {}", style("SKIP").yellow(), test.full_name());
                }
                TestOutcome::Fail | TestOutcome::CompileFail => {
                    println!("{} {}", style("FAIL").red().bold(), test.full_name());
                    if let Some(message) = &test.message {
                        println!("     {message}");
                    }
                    if let Some(trace) = &test.stack_trace {
                        for line in trace.lines() {
                            println!("     {line}");
                        }
                    }
                }
            }
        }

        if let Some(coverage) = &report.coverage {
            println!();
            println!("{}", style("Coverage").bold());
            for record in coverage {
                println!("  {:>5.1}%  {}", record.percent(), record.class_name);
            }
        }

        let s = &report.summary;
        println!();
        println!(
            "{}: {} ran, {} passed, {} failed, {} skipped ({:.1}s)",
            match s.outcome {
                RunOutcome::Passed => style("Passed").green().bold(),
                RunOutcome::Failed => style("Failed").red().bold(),
            },
            s.tests_ran,
            s.passing,
            s.failing,
            s.skipped,
            s.wait_time.as_secs_f64(),
        );
    }
}

/// Machine-readable JSON on stdout.
pub struct JsonReporter;

#[async_trait]
impl Reporter for JsonReporter {
    async fn on_run_complete(&self, report: &TestReport) {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!("Failed to serialize report: {e}"),
        }
    }
}
