//! Metric Record - measurements reported by a tool on stdout
//!
//! The profiling scripts time their own evaluation loops (minimum average
//! runtime per size bin, per fitness-case count). They report those numbers
//! with marker lines that the runner picks out of captured stdout:
//!
//! ```text
//! @metric min_avg_runtime 0.00124
//! @metric min_avg_runtime 3 0.00311
//! ```
//!
//! The two-argument form has no step; the three-argument form carries a step
//! (for example the size-bin index).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Prefix marking a metric line in tool output.
pub const METRIC_PREFIX: &str = "@metric";

/// Metric Record represents a single tool-reported data point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    run_id: String,
    key: String,
    step: Option<u64>,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Create a new metric record.
    ///
    /// # Arguments
    ///
    /// * `run_id` - ID of the run that reported it
    /// * `key` - Metric name (e.g., `min_avg_runtime`)
    /// * `step` - Optional ordering index (size bin, epoch)
    /// * `value` - Metric value
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        key: impl Into<String>,
        step: Option<u64>,
        value: f64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            step,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Parse one `@metric` line. Returns `None` for any other line.
    #[must_use]
    pub fn parse_line(run_id: &str, line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix(METRIC_PREFIX)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let parsed = match fields.as_slice() {
            [key, value] => value
                .parse::<f64>()
                .ok()
                .map(|v| Self::new(run_id, *key, None, v)),
            [key, step, value] => match (step.parse::<u64>(), value.parse::<f64>()) {
                (Ok(s), Ok(v)) => Some(Self::new(run_id, *key, Some(s), v)),
                _ => None,
            },
            _ => None,
        };
        if parsed.is_none() {
            debug!(run_id, line, "ignoring malformed metric line");
        }
        parsed.filter(|m| m.value.is_finite())
    }

    /// Collect every metric line from captured output, in order.
    #[must_use]
    pub fn parse_output(run_id: &str, output: &str) -> Vec<Self> {
        output
            .lines()
            .filter_map(|line| Self::parse_line(run_id, line))
            .collect()
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the metric key/name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the step, if one was reported.
    #[must_use]
    pub const fn step(&self) -> Option<u64> {
        self.step
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the timestamp when the metric was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
