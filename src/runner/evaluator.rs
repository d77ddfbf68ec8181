//! Evaluator capability and the timing/classification wrapper

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::experiment::{RunConfiguration, RunResult, RunStatus};
use crate::process::CommandOutput;

/// Raw output of one tool invocation.
pub type ToolOutput = CommandOutput;

/// Why an invocation did not succeed.
///
/// Never returned to the caller of the runner: each variant becomes a failed
/// [`RunResult`] with the message as its error description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The process could not be started
    #[error("failed to start `{program}`: {message}")]
    Spawn {
        /// Program that was launched
        program: String,
        /// OS error text
        message: String,
    },

    /// The process exited with a non-zero status
    #[error("exited with code {code}: {diagnostic}")]
    NonZeroExit {
        /// Exit code
        code: i32,
        /// Last line of stderr or stdout
        diagnostic: String,
    },

    /// The process was terminated by a signal
    #[error("terminated by signal: {diagnostic}")]
    Signaled {
        /// Last line of stderr or stdout
        diagnostic: String,
    },

    /// The process exceeded the per-invocation timeout and was killed
    #[error("timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    /// Nothing is registered to run this tool
    #[error("no evaluator registered for tool `{0}`")]
    NoEvaluator(String),
}

/// Runs one configuration of one GP tool.
///
/// Implementations must release the underlying process when the returned
/// future is dropped; the runner relies on this for timeouts and
/// cancellation.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Invoke the tool and capture its output.
    ///
    /// A non-zero exit is not an error at this level: the output is returned
    /// and [`evaluate`] classifies it.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::Spawn`] if the tool cannot be started.
    async fn invoke(&self, configuration: &RunConfiguration)
        -> Result<ToolOutput, EvaluationError>;

    /// Files the tool writes that should be kept as artifacts.
    fn outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Invoke `evaluator` with a timeout and turn the outcome into a result.
///
/// Never fails: spawn errors, non-zero exits, signals, and timeouts all
/// produce a [`RunResult`] with `success() == false`.
pub async fn evaluate(
    evaluator: &dyn Evaluator,
    configuration: &RunConfiguration,
    timeout: Duration,
) -> RunResult {
    let started_at = Utc::now();
    let clock = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(timeout, evaluator.invoke(configuration))
        .await
        .unwrap_or(Err(EvaluationError::TimedOut(timeout)));
    let builder = RunResult::builder(configuration.clone()).timing(started_at, clock.elapsed());

    match outcome {
        Ok(output) => {
            let failure = match output.code {
                Some(0) => None,
                Some(code) => Some(EvaluationError::NonZeroExit {
                    code,
                    diagnostic: output.diagnostic(),
                }),
                None => Some(EvaluationError::Signaled {
                    diagnostic: output.diagnostic(),
                }),
            };
            let builder = builder
                .exit_code(output.code)
                .stdout(output.stdout)
                .stderr(output.stderr);
            match failure {
                None => builder.build(RunStatus::Success),
                Some(err) => builder.error(err.to_string()).build(RunStatus::Failed),
            }
        }
        Err(err @ EvaluationError::TimedOut(_)) => {
            debug!(run = %configuration, "invocation timed out");
            builder.error(err.to_string()).build(RunStatus::TimedOut)
        }
        Err(err) => builder.error(err.to_string()).build(RunStatus::Failed),
    }
}

/// Failed result for a configuration that could not be attempted.
#[must_use]
pub fn unattempted(configuration: &RunConfiguration, error: &EvaluationError) -> RunResult {
    RunResult::builder(configuration.clone())
        .error(error.to_string())
        .build(RunStatus::Failed)
}
