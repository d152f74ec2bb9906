//! Test selection and run submission payloads.
//!
//! A [`TestSelection`] is caller input and may be inconsistent; the
//! [`RequestBuilder`] is the single validation point that turns it into a
//! [`RunSubmission`], the wire payload the submitter sends exactly once.
//! Selections are immutable after submission: nothing downstream ever
//! writes back into them.

use serde_json::{Value, json};

use crate::error::RunError;
use crate::id::has_id_shape;

/// Upper bound the platform accepts for `maxFailedTests`.
pub const MAX_FAILED_TESTS_CEILING: u32 = 1_000_000;

/// Key prefix for test class identifiers.
const CLASS_ID_PREFIX: &str = "01p";

/// Key prefix for test suite identifiers.
const SUITE_ID_PREFIX: &str = "05F";

/// Whole-org selection scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunScope {
    /// Every test outside managed packages.
    AllLocal,
    /// Every test, managed packages included.
    AllOrg,
}

/// How the run is submitted to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Queued run, completion detected out of band.
    Asynchronous,
    /// Single-class run whose response carries the results inline.
    Synchronous,
}

/// What the caller wants to run.
///
/// Exactly one of `classes`, `suites`, or `scope` must be populated;
/// [`RequestBuilder::build`] enforces this.
#[derive(Debug, Clone, Default)]
pub struct TestSelection {
    /// Class names or class identifiers.
    pub classes: Vec<String>,
    /// Suite names or suite identifiers.
    pub suites: Vec<String>,
    pub scope: Option<RunScope>,
    /// Abort the run once this many tests have failed. Unset means
    /// unbounded.
    pub max_failed_tests: Option<u32>,
    pub skip_code_coverage: bool,
}

impl TestSelection {
    pub fn classes<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn suites<I, S>(suites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suites: suites.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn all(scope: RunScope) -> Self {
        Self {
            scope: Some(scope),
            ..Self::default()
        }
    }

    pub fn with_max_failed_tests(mut self, max: u32) -> Self {
        self.max_failed_tests = Some(max);
        self
    }

    pub fn with_skip_code_coverage(mut self, skip: bool) -> Self {
        self.skip_code_coverage = skip;
        self
    }

    fn populated_modes(&self) -> usize {
        usize::from(!self.classes.is_empty())
            + usize::from(!self.suites.is_empty())
            + usize::from(self.scope.is_some())
    }
}

/// A validated wire payload, consumed once by the submitter.
#[derive(Debug, Clone)]
pub enum RunSubmission {
    Asynchronous(Value),
    Synchronous(Value),
}

impl RunSubmission {
    /// Tooling endpoint this payload posts to.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Asynchronous(_) => "runTestsAsynchronous",
            Self::Synchronous(_) => "runTestsSynchronous",
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::Asynchronous(p) | Self::Synchronous(p) => p,
        }
    }

    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::Synchronous(_))
    }
}

/// Validates a [`TestSelection`] and shapes the submission payload.
///
/// Stateless; no side effects.
pub struct RequestBuilder;

impl RequestBuilder {
    /// Builds the wire payload for the given selection and submit mode.
    ///
    /// # Errors
    ///
    /// [`RunError::InvalidSelection`] when zero or more than one selection
    /// mode is populated, when `maxFailedTests` exceeds the platform
    /// ceiling, or when a synchronous submission names anything other than
    /// exactly one class. The platform serializes one class per synchronous
    /// call, so multi-class synchronous requests are rejected here instead
    /// of being silently merged; callers wanting several classes
    /// synchronously must sequence them.
    pub fn build(selection: &TestSelection, mode: SubmitMode) -> Result<RunSubmission, RunError> {
        match selection.populated_modes() {
            0 => {
                return Err(RunError::InvalidSelection(
                    "no test targets: specify classes, suites, or an all-tests scope".to_string(),
                ));
            }
            1 => {}
            n => {
                return Err(RunError::InvalidSelection(format!(
                    "{n} selection modes populated; classes, suites, and scope are mutually \
                     exclusive"
                )));
            }
        }

        if let Some(max) = selection.max_failed_tests
            && max > MAX_FAILED_TESTS_CEILING
        {
            return Err(RunError::InvalidSelection(format!(
                "maxFailedTests {max} exceeds the platform ceiling of {MAX_FAILED_TESTS_CEILING}"
            )));
        }

        match mode {
            SubmitMode::Asynchronous => Self::build_async(selection),
            SubmitMode::Synchronous => Self::build_sync(selection),
        }
    }

    fn build_async(selection: &TestSelection) -> Result<RunSubmission, RunError> {
        let mut payload = json!({
            "skipCodeCoverage": selection.skip_code_coverage,
        });
        let body = payload.as_object_mut().unwrap();

        if !selection.classes.is_empty() {
            body.insert("testLevel".into(), json!("RunSpecifiedTests"));
            let (key, joined) =
                Self::target_field(&selection.classes, CLASS_ID_PREFIX, "classids", "classNames");
            body.insert(key.into(), json!(joined));
        } else if !selection.suites.is_empty() {
            body.insert("testLevel".into(), json!("RunSpecifiedTests"));
            let (key, joined) =
                Self::target_field(&selection.suites, SUITE_ID_PREFIX, "suiteids", "suiteNames");
            body.insert(key.into(), json!(joined));
        } else {
            let level = match selection.scope {
                Some(RunScope::AllLocal) => "RunLocalTests",
                Some(RunScope::AllOrg) => "RunAllTestsInOrg",
                // populated_modes() == 1 guarantees scope is set here
                None => unreachable!(),
            };
            body.insert("testLevel".into(), json!(level));
        }

        if let Some(max) = selection.max_failed_tests {
            body.insert("maxFailedTests".into(), json!(max));
        }

        Ok(RunSubmission::Asynchronous(payload))
    }

    fn build_sync(selection: &TestSelection) -> Result<RunSubmission, RunError> {
        let [class] = selection.classes.as_slice() else {
            return Err(RunError::InvalidSelection(
                "synchronous runs execute exactly one test class".to_string(),
            ));
        };

        // The caller's class is forwarded as-is.
        let test = if has_id_shape(class, CLASS_ID_PREFIX) {
            json!({ "classId": class })
        } else {
            json!({ "className": class })
        };

        let mut payload = json!({
            "tests": [test],
            "skipCodeCoverage": selection.skip_code_coverage,
        });
        if let Some(max) = selection.max_failed_tests {
            payload
                .as_object_mut()
                .unwrap()
                .insert("maxFailedTests".into(), json!(max));
        }

        Ok(RunSubmission::Synchronous(payload))
    }

    /// Picks the id-keyed field when every target has the id shape,
    /// otherwise the name-keyed field. Mixed input goes by name; the
    /// platform resolves names itself.
    fn target_field(
        targets: &[String],
        prefix: &str,
        id_key: &'static str,
        name_key: &'static str,
    ) -> (&'static str, String) {
        let joined = targets.join(",");
        if targets.iter().all(|t| has_id_shape(t, prefix)) {
            (id_key, joined)
        } else {
            (name_key, joined)
        }
    }
}
