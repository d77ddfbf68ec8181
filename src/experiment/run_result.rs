//! Run Result - recorded outcome of one invocation

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ArtifactRecord, MetricRecord, RunConfiguration};

/// Upper bound on captured bytes kept per stream.
pub const MAX_CAPTURED_OUTPUT_BYTES: usize = 1 << 20;

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Tool exited with status 0.
    Success,
    /// Tool exited non-zero, was killed by a signal, or could not start.
    Failed,
    /// Tool exceeded the per-invocation timeout and was killed.
    TimedOut,
}

/// Run Result records what happened when a configuration was executed.
///
/// Failures are results too: a failed or timed-out invocation is recorded
/// like a successful one, with `success() == false` and an error description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    configuration: RunConfiguration,
    status: RunStatus,
    success: bool,
    exit_code: Option<i32>,
    duration_secs: f64,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    error: Option<String>,
    stdout: String,
    stderr: String,
    #[serde(default)]
    metrics: Vec<MetricRecord>,
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
}

impl RunResult {
    /// Create a builder for the given configuration.
    #[must_use]
    pub fn builder(configuration: RunConfiguration) -> RunResultBuilder {
        RunResultBuilder::new(configuration)
    }

    /// The configuration that was executed.
    #[must_use]
    pub const fn configuration(&self) -> &RunConfiguration {
        &self.configuration
    }

    /// Shorthand for `configuration().run_id()`.
    #[must_use]
    pub fn run_id(&self) -> String {
        self.configuration.run_id()
    }

    /// Final status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// True only for [`RunStatus::Success`].
    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// Exit code, if the process exited normally.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Wall-clock duration of the invocation.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }

    /// Wall-clock duration in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End timestamp.
    #[must_use]
    pub const fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    /// Failure description, if the run did not succeed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Captured standard output (possibly truncated).
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured standard error (possibly truncated).
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Tool-reported metrics.
    #[must_use]
    pub fn metrics(&self) -> &[MetricRecord] {
        &self.metrics
    }

    /// Output files kept with this run.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// Attach artifact records before the result is appended to a store.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactRecord>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Builder for `RunResult`.
#[derive(Debug)]
pub struct RunResultBuilder {
    configuration: RunConfiguration,
    started_at: DateTime<Utc>,
    duration: Duration,
    exit_code: Option<i32>,
    error: Option<String>,
    stdout: String,
    stderr: String,
    metrics: Vec<MetricRecord>,
}

impl RunResultBuilder {
    /// Create a new builder; the start time defaults to now.
    #[must_use]
    pub fn new(configuration: RunConfiguration) -> Self {
        Self {
            configuration,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            exit_code: None,
            error: None,
            stdout: String::new(),
            stderr: String::new(),
            metrics: Vec::new(),
        }
    }

    /// Set start time and wall-clock duration.
    #[must_use]
    pub const fn timing(mut self, started_at: DateTime<Utc>, duration: Duration) -> Self {
        self.started_at = started_at;
        self.duration = duration;
        self
    }

    /// Set the exit code.
    #[must_use]
    pub const fn exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Set the failure description.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set captured stdout, parsing metric lines and capping the kept text.
    #[must_use]
    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        self.metrics = MetricRecord::parse_output(&self.configuration.run_id(), &stdout);
        self.stdout = cap_output(stdout);
        self
    }

    /// Set captured stderr, capping the kept text.
    #[must_use]
    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = cap_output(stderr.into());
        self
    }

    /// Build the `RunResult` with its final status.
    #[must_use]
    pub fn build(self, status: RunStatus) -> RunResult {
        let ended_at = self.started_at
            + chrono::Duration::from_std(self.duration).unwrap_or_else(|_| chrono::Duration::zero());
        RunResult {
            configuration: self.configuration,
            status,
            success: status == RunStatus::Success,
            exit_code: self.exit_code,
            duration_secs: self.duration.as_secs_f64(),
            started_at: self.started_at,
            ended_at,
            error: self.error,
            stdout: self.stdout,
            stderr: self.stderr,
            metrics: self.metrics,
            artifacts: Vec::new(),
        }
    }
}

/// Keep at most [`MAX_CAPTURED_OUTPUT_BYTES`], preferring the tail.
fn cap_output(text: String) -> String {
    if text.len() <= MAX_CAPTURED_OUTPUT_BYTES {
        return text;
    }
    let mut cut = text.len() - MAX_CAPTURED_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    format!("[... {cut} bytes truncated ...]\n{}", &text[cut..])
}
