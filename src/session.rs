//! Session orchestration: setup, then the experiment run
//!
//! Setup (provisioning every environment, then fetching every repository)
//! runs to completion before the results store is opened. A setup failure
//! therefore leaves no session directory and zero results behind.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BenchConfig;
use crate::experiment::{FsResultsStore, Schedule};
use crate::fetch::{FetchReport, Fetcher};
use crate::process::CommandExecutor;
use crate::provision::{ProvisionReport, Provisioner};
use crate::runner::{ExperimentRunner, RunSummary};
use crate::Result;

/// What setup produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// One entry per configured environment, in config order
    pub environments: Vec<ProvisionReport>,
    /// One entry per configured repository, in config order
    pub repositories: Vec<FetchReport>,
}

/// Provision all environments, then fetch and patch all repositories.
///
/// Stops at the first failure.
///
/// # Errors
///
/// Returns the first setup error, naming the failing step.
pub async fn run_setup(
    config: &BenchConfig,
    executor: Arc<dyn CommandExecutor>,
) -> Result<SetupReport> {
    let provisioner = Provisioner::new(Arc::clone(&executor));
    let fetcher = Fetcher::new(executor);
    let mut report = SetupReport::default();

    for env in &config.environments {
        report.environments.push(provisioner.provision(env, config).await?);
    }
    for repo in &config.repositories {
        report.repositories.push(fetcher.fetch(repo, config).await?);
    }

    info!(
        environments = report.environments.len(),
        repositories = report.repositories.len(),
        "setup complete"
    );
    Ok(report)
}

/// Default session name: `run-<UTC timestamp>`, sortable chronologically.
#[must_use]
pub fn default_session_name() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// Options for [`run_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Session directory name under `results_dir`; generated when `None`
    pub session: Option<String>,
    /// Skip provisioning and fetching
    pub skip_setup: bool,
}

/// Outcome of a full session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Session directory, `None` if interrupted before it was opened
    pub session_dir: Option<PathBuf>,
    /// Setup report, `None` when skipped or interrupted
    pub setup: Option<SetupReport>,
    /// Runner tally
    pub summary: RunSummary,
}

/// Run setup and every scheduled experiment, persisting results under
/// `results_dir/<session>`.
///
/// # Errors
///
/// Returns setup errors before any result is written, config errors from
/// building the adapters, and storage errors from the store.
pub async fn run_session(
    config: &BenchConfig,
    executor: Arc<dyn CommandExecutor>,
    options: SessionOptions,
    cancel: CancellationToken,
) -> Result<SessionReport> {
    let schedule = Schedule::from_config(config);
    let runner = ExperimentRunner::from_config(config, &executor)?.with_cancellation(cancel.clone());

    let setup = if options.skip_setup {
        info!("skipping setup");
        None
    } else {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!("interrupted during setup");
                return Ok(SessionReport {
                    session_dir: None,
                    setup: None,
                    summary: RunSummary {
                        scheduled: schedule.len(),
                        interrupted: true,
                        ..RunSummary::default()
                    },
                });
            }
            report = run_setup(config, Arc::clone(&executor)) => Some(report?),
        }
    };

    let session = options.session.unwrap_or_else(default_session_name);
    let session_dir = config.resolve(&config.results_dir).join(&session);
    let mut store = FsResultsStore::open(&session_dir)?;
    info!(session = %session, dir = %session_dir.display(), "results session opened");

    let summary = runner.run(&schedule, &mut store).await?;
    Ok(SessionReport {
        session_dir: Some(session_dir),
        setup,
        summary,
    })
}
