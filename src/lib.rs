//! remotest: asynchronous remote test run orchestration.
//!
//! This crate submits a batch of tests to a remote execution platform,
//! detects completion as soon as possible, and retrieves structured
//! pass/fail/coverage results.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **RequestBuilder**: validate a test selection into a wire payload
//! - **RunSubmitter**: submit the run, obtain the run identifier
//! - **StreamingSubscriber**: push-based completion detection over a
//!   publish/subscribe broker, with replay-cursor reconnect
//! - **QueuePoller**: polling fallback with a bounded wait
//! - **ResultAggregator**: fetch outcomes and coverage into a report
//! - **Orchestrator**: compose the above, racing push against poll under
//!   one deadline
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use remotest::orchestrator::{Orchestrator, RunOptions};
//! use remotest::platform::HttpConnection;
//! use remotest::selection::TestSelection;
//! use remotest::stream::CometdBroker;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let conn = Arc::new(HttpConnection::new(
//!         "https://org.example.com",
//!         std::env::var("REMOTEST_ACCESS_TOKEN")?,
//!         "61.0",
//!     ));
//!     let orchestrator = Orchestrator::new(Arc::clone(&conn), RunOptions::default());
//!     let broker = CometdBroker::new(conn);
//!
//!     let selection = TestSelection::classes(["FooTest", "BarTest"]);
//!     let report = orchestrator.run(&selection, broker).await?;
//!     println!("{} tests ran", report.summary.tests_ran);
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod id;
pub mod orchestrator;
pub mod platform;
pub mod poll;
pub mod report;
pub mod selection;
pub mod stream;
pub mod submit;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use error::{RunError, RunResult};
pub use id::RunId;
pub use orchestrator::{Orchestrator, RunOptions};
pub use report::{Reporter, TestReport};
pub use selection::{RunScope, SubmitMode, TestSelection};
