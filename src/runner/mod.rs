//! Experiment runner
//!
//! Walks a [`Schedule`] in order, invoking one tool at a time as an isolated
//! subprocess and appending exactly one [`RunResult`] per configuration.
//!
//! - Failures of a single invocation (non-zero exit, signal, spawn error,
//!   timeout) become failed results and the schedule continues.
//! - Cancellation kills the running child, records nothing for it, and stops.
//! - A storage failure stops the run and is returned to the caller.

mod adapters;
mod evaluator;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use adapters::{
    evaluator_for, evaluators_from_config, DeapEvaluator, OperonEvaluator, TensorGpEvaluator,
    ToolInvocation,
};
pub use evaluator::{evaluate, unattempted, EvaluationError, Evaluator, ToolOutput};

use crate::config::BenchConfig;
use crate::experiment::{ResultsStore, RunConfiguration, RunResult, RunStatus, Schedule};
use crate::process::CommandExecutor;
use crate::{Error, Result};

/// Tally of one runner pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Configurations in the schedule
    pub scheduled: usize,
    /// Results appended
    pub recorded: usize,
    /// Results with status `success`
    pub succeeded: usize,
    /// Results with status `failed`
    pub failed: usize,
    /// Results with status `timed_out`
    pub timed_out: usize,
    /// True when cancellation stopped the run early
    pub interrupted: bool,
}

impl RunSummary {
    /// True when every scheduled configuration has a result.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !self.interrupted && self.recorded == self.scheduled
    }

    fn record(&mut self, status: RunStatus) {
        self.recorded += 1;
        match status {
            RunStatus::Success => self.succeeded += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::TimedOut => self.timed_out += 1,
        }
    }
}

/// Sequential experiment runner.
pub struct ExperimentRunner {
    evaluators: HashMap<String, Arc<dyn Evaluator>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ExperimentRunner {
    /// Runner with no evaluators and the given per-invocation timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            evaluators: HashMap::new(),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Runner with an adapter for every configured tool.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if a tool references an unknown
    /// environment.
    pub fn from_config(config: &BenchConfig, executor: &Arc<dyn CommandExecutor>) -> Result<Self> {
        Ok(Self {
            evaluators: evaluators_from_config(config, executor)?,
            timeout: config.timeout(),
            cancel: CancellationToken::new(),
        })
    }

    /// Register (or replace) the evaluator for a tool.
    #[must_use]
    pub fn with_evaluator(mut self, tool: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.insert(tool.into(), evaluator);
        self
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that interrupts this runner.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Per-invocation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every configuration in `schedule`, appending results to `store`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a result or artifact cannot be written.
    /// Results appended before the failure stay in the store.
    pub async fn run<S>(&self, schedule: &Schedule, store: &mut S) -> Result<RunSummary>
    where
        S: ResultsStore + ?Sized,
    {
        let mut summary = RunSummary {
            scheduled: schedule.len(),
            ..RunSummary::default()
        };
        info!(
            scheduled = summary.scheduled,
            timeout_secs = self.timeout.as_secs(),
            "starting experiments"
        );

        for (index, configuration) in schedule.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            info!(
                run = %configuration,
                progress = %format!("{}/{}", index + 1, summary.scheduled),
                "running"
            );

            let Some(result) = self.run_one(configuration, &mut *store).await? else {
                warn!(run = %configuration, "interrupted, no result recorded");
                summary.interrupted = true;
                break;
            };

            let status = result.status();
            match status {
                RunStatus::Success => info!(
                    run = %configuration,
                    duration_secs = result.duration_secs(),
                    metrics = result.metrics().len(),
                    "finished"
                ),
                _ => warn!(
                    run = %configuration,
                    status = ?status,
                    error = result.error().unwrap_or_default(),
                    "run failed"
                ),
            }
            store.append(result)?;
            summary.record(status);
        }

        info!(
            recorded = summary.recorded,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            interrupted = summary.interrupted,
            "experiments finished"
        );
        Ok(summary)
    }

    /// `Ok(None)` when cancelled mid-invocation.
    ///
    /// A configuration the store already holds is refused before the tool is
    /// started.
    async fn run_one<S>(
        &self,
        configuration: &RunConfiguration,
        store: &mut S,
    ) -> Result<Option<RunResult>>
    where
        S: ResultsStore + ?Sized,
    {
        let run_id = configuration.run_id();
        if store.contains(&run_id) {
            return Err(Error::AlreadyRecorded(PathBuf::from(run_id)));
        }

        let Some(evaluator) = self.evaluators.get(configuration.tool()) else {
            let err = EvaluationError::NoEvaluator(configuration.tool().to_string());
            return Ok(Some(unattempted(configuration, &err)));
        };

        let outputs: Vec<(PathBuf, Option<OutputStamp>)> = evaluator
            .outputs()
            .into_iter()
            .map(|path| {
                let before = OutputStamp::of(&path);
                (path, before)
            })
            .collect();

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(None),
            result = evaluate(evaluator.as_ref(), configuration, self.timeout) => result,
        };

        let mut artifacts = Vec::new();
        for (output, before) in outputs {
            if OutputStamp::written_since(&output, before) {
                artifacts.push(store.attach_artifact(configuration, &output)?);
            } else {
                debug!(run = %configuration, output = %output.display(), "no fresh output");
            }
        }
        Ok(Some(result.with_artifacts(artifacts)))
    }
}

impl std::fmt::Debug for ExperimentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&String> = self.evaluators.keys().collect();
        tools.sort();
        f.debug_struct("ExperimentRunner")
            .field("tools", &tools)
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Modification time and size of an output file.
///
/// Tools write to fixed paths, so an output belongs to an invocation only if
/// its stamp changed across it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl OutputStamp {
    fn of(path: &Path) -> Option<Self> {
        std::fs::metadata(path)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|m| Self {
                modified: m.modified().ok(),
                len: m.len(),
            })
    }

    /// True when `path` exists now and differs from `before`.
    fn written_since(path: &Path, before: Option<Self>) -> bool {
        Self::of(path).is_some_and(|now| before != Some(now))
    }
}
