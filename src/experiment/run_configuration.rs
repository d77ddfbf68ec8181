//! Run Configuration - one fully specified benchmarking trial

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named parameters for a problem (population size, depth, fitness cases...).
///
/// Ordered so that command lines and record files are deterministic.
pub type ParameterSet = BTreeMap<String, serde_json::Value>;

/// The GP tool family, which selects the invocation adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// DEAP (Python)
    Deap,
    /// TensorGP (Python, TensorFlow)
    TensorGp,
    /// Operon (C++)
    Operon,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deap => "deap",
            Self::TensorGp => "tensorgp",
            Self::Operon => "operon",
        })
    }
}

/// Run Configuration identifies one invocation of one tool.
///
/// Immutable once built: fields are private and only exposed through
/// accessors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfiguration {
    tool: String,
    kind: ToolKind,
    problem: String,
    params: ParameterSet,
    trial: u32,
}

impl RunConfiguration {
    /// Create a configuration with an empty parameter set.
    #[must_use]
    pub fn new(
        tool: impl Into<String>,
        kind: ToolKind,
        problem: impl Into<String>,
        trial: u32,
    ) -> Self {
        Self::builder(tool, kind, problem).trial(trial).build()
    }

    /// Create a builder for a configuration with parameters.
    #[must_use]
    pub fn builder(
        tool: impl Into<String>,
        kind: ToolKind,
        problem: impl Into<String>,
    ) -> RunConfigurationBuilder {
        RunConfigurationBuilder::new(tool, kind, problem)
    }

    /// Tool name (results subtree).
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Tool family.
    #[must_use]
    pub const fn kind(&self) -> ToolKind {
        self.kind
    }

    /// Problem identifier.
    #[must_use]
    pub fn problem(&self) -> &str {
        &self.problem
    }

    /// All parameters.
    #[must_use]
    pub const fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// A single parameter rendered as command-line text.
    ///
    /// Strings are returned without quotes.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<String> {
        self.params.get(key).map(render_value)
    }

    /// Zero-based trial index.
    #[must_use]
    pub const fn trial(&self) -> u32 {
        self.trial
    }

    /// Stable identifier: `<tool>/<problem>/trial-<NNNN>`.
    #[must_use]
    pub fn run_id(&self) -> String {
        format!("{}/{}/trial-{:04}", self.tool, self.problem, self.trial)
    }
}

impl fmt::Display for RunConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.run_id())
    }
}

/// Render a scalar parameter the way a command line expects it.
#[must_use]
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builder for `RunConfiguration`.
#[derive(Debug)]
pub struct RunConfigurationBuilder {
    tool: String,
    kind: ToolKind,
    problem: String,
    params: ParameterSet,
    trial: u32,
}

impl RunConfigurationBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(tool: impl Into<String>, kind: ToolKind, problem: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            kind,
            problem: problem.into(),
            params: ParameterSet::new(),
            trial: 0,
        }
    }

    /// Set one parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Replace the parameter set.
    #[must_use]
    pub fn params(mut self, params: ParameterSet) -> Self {
        self.params = params;
        self
    }

    /// Set the trial index.
    #[must_use]
    pub const fn trial(mut self, trial: u32) -> Self {
        self.trial = trial;
        self
    }

    /// Build the `RunConfiguration`.
    #[must_use]
    pub fn build(self) -> RunConfiguration {
        RunConfiguration {
            tool: self.tool,
            kind: self.kind,
            problem: self.problem,
            params: self.params,
            trial: self.trial,
        }
    }
}
