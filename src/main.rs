//! remotest CLI - remote test run orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use remotest::config::{self, Config};
use remotest::orchestrator::Orchestrator;
use remotest::platform::{Connection, HttpConnection};
use remotest::report::{HumanReporter, JsonReporter, Reporter};
use remotest::selection::{RunScope, SubmitMode, TestSelection};
use remotest::stream::CometdBroker;

#[derive(Parser)]
#[command(name = "remotest")]
#[command(about = "Remote test run orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "remotest.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a test run and wait for its results
    Run {
        /// Test class name or id (repeatable, comma lists accepted)
        #[arg(long = "class")]
        classes: Vec<String>,

        /// Test suite name or id (repeatable, comma lists accepted)
        #[arg(long = "suite")]
        suites: Vec<String>,

        /// Run every test outside managed packages
        #[arg(long, conflicts_with = "all_org")]
        all_local: bool,

        /// Run every test, managed packages included
        #[arg(long)]
        all_org: bool,

        /// Submit synchronously (single class, inline results)
        #[arg(long)]
        sync: bool,

        /// Overall wait ceiling in seconds
        #[arg(short, long)]
        wait: Option<u64>,

        /// Abort the run after this many test failures
        #[arg(long)]
        max_failed: Option<u32>,

        /// Skip code coverage collection
        #[arg(long)]
        skip_coverage: bool,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Write a starter configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            classes,
            suites,
            all_local,
            all_org,
            sync,
            wait,
            max_failed,
            skip_coverage,
            json,
        } => {
            let selection = build_selection(
                &classes,
                &suites,
                all_local,
                all_org,
                max_failed,
                skip_coverage,
            );
            run_tests(&cli.config, selection, sync, wait, json, cli.verbose).await
        }
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

/// Assembles the selection from CLI flags. Consistency (exactly one mode)
/// is the request builder's job, so conflicts surface as typed errors.
fn build_selection(
    classes: &[String],
    suites: &[String],
    all_local: bool,
    all_org: bool,
    max_failed: Option<u32>,
    skip_coverage: bool,
) -> TestSelection {
    TestSelection {
        classes: split_targets(classes),
        suites: split_targets(suites),
        scope: match (all_local, all_org) {
            (_, true) => Some(RunScope::AllOrg),
            (true, false) => Some(RunScope::AllLocal),
            (false, false) => None,
        },
        max_failed_tests: max_failed,
        skip_code_coverage: skip_coverage,
    }
}

fn split_targets(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn run_tests(
    config_path: &Path,
    selection: TestSelection,
    sync: bool,
    wait_override: Option<u64>,
    json: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if let Some(wait) = wait_override {
        config.run.wait_secs = wait;
    }

    let conn = Arc::new(connect(&config)?);
    let mode = if sync {
        SubmitMode::Synchronous
    } else {
        SubmitMode::Asynchronous
    };
    let options = config.run.to_options(mode);

    info!(
        instance = %config.org.instance_url,
        wait_secs = config.run.wait_secs,
        "starting test run"
    );

    let orchestrator =
        Orchestrator::new(Arc::clone(&conn) as Arc<dyn Connection>, options);
    let broker = CometdBroker::new(conn as Arc<dyn Connection>);
    let report = orchestrator.run(&selection, broker).await?;

    let reporter: Box<dyn Reporter> = if json {
        Box::new(JsonReporter)
    } else {
        Box::new(HumanReporter {
            show_passing: verbose,
        })
    };
    reporter.on_run_complete(&report).await;

    std::process::exit(report.exit_code());
}

fn connect(config: &Config) -> Result<HttpConnection> {
    let token = std::env::var(&config.org.access_token_env).with_context(|| {
        format!(
            "Access token environment variable {} is not set",
            config.org.access_token_env
        )
    })?;
    Ok(HttpConnection::new(
        &config.org.instance_url,
        token,
        &config.org.api_version,
    ))
}

fn validate_config(config_path: &Path) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    println!("Configuration is valid");
    println!("  Instance: {}", config.org.instance_url);
    println!("  API version: {}", config.org.api_version);
    println!("  Wait ceiling: {}s", config.run.wait_secs);
    Ok(())
}

fn init_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let starter = r#"[org]
instance_url = "https://org.example.com"
api_version = "61.0"
# Name of the environment variable holding the bearer token.
access_token_env = "REMOTEST_ACCESS_TOKEN"

[run]
# Overall ceiling on waiting for a run, in seconds.
wait_secs = 14400
poll_interval_secs = 3
stream_timeout_secs = 14400
"#;
    std::fs::write(config_path, starter)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Wrote {}", config_path.display());
    Ok(())
}
