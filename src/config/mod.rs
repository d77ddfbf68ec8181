//! Declarative bench configuration
//!
//! One YAML file describes everything a session needs: the isolated
//! environments, the pinned third-party checkouts, the GP tools and how to
//! invoke them, and the problem/parameter grid.
//!
//! ```yaml
//! results_dir: results
//! timeout_secs: 3600
//! trials: 1
//! tools:
//!   - name: deap
//!     kind: deap
//!     program: python
//!     args: [profile.py]
//!     working_dir: tools/deap
//! problems:
//!   - name: nicolau_a
//!     params: { function_set: nicolau_a, max_depth: 7, fitness_cases: 1000 }
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

mod validate;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::experiment::{ParameterSet, ToolKind};
use crate::{Error, Result};

/// Default per-invocation timeout (one hour).
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "bench.yaml";

/// Root of the bench configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    /// Directory holding one subdirectory per session
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Per-invocation timeout in seconds; no retries
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Trials per (tool, problem) pair
    #[serde(default = "default_trials")]
    pub trials: u32,
    /// Environments to provision before fetching
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    /// Third-party checkouts to fetch and patch
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    /// Tools to benchmark, in schedule order
    pub tools: Vec<ToolConfig>,
    /// Problem instances, in schedule order
    pub problems: Vec<ProblemConfig>,
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_trials() -> u32 {
    1
}

/// Package manager used for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    /// Named conda environment
    Conda,
    /// `python3 -m venv` directory
    Venv,
}

/// What to do when the environment already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnExisting {
    /// Keep it as is and install nothing
    #[default]
    Reuse,
    /// Abort setup
    Fail,
    /// Remove and create again
    Recreate,
}

/// A pinned package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
    /// Package name
    pub name: String,
    /// Exact version
    pub version: String,
}

/// An isolated execution environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Environment name, referenced by tools
    pub name: String,
    /// Package manager
    pub manager: ManagerKind,
    /// Python version for the environment (conda only)
    #[serde(default)]
    pub python: Option<String>,
    /// Directory for venv environments; defaults to `.venvs/<name>`
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Policy for an environment that already exists
    #[serde(default)]
    pub on_existing: OnExisting,
    /// Packages installed when the environment is created
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
    /// Supplementary command-line tools installed with pip afterwards
    #[serde(default)]
    pub tools: Vec<PackageSpec>,
}

/// One file copied over a file in a checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileReplacement {
    /// Locally maintained file
    pub source: PathBuf,
    /// Destination, relative to the checkout root
    pub dest: PathBuf,
}

/// A third-party repository pinned to an exact revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Short name, used in step names and logs
    pub name: String,
    /// Clone URL
    pub url: String,
    /// Checkout directory; removed before every fetch
    pub target_dir: PathBuf,
    /// Commit hash or tag
    pub revision: String,
    /// Files replaced after checkout
    #[serde(default)]
    pub patches: Vec<FileReplacement>,
}

/// A GP tool and its evaluation entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    /// Unique tool name; becomes the results subtree
    pub name: String,
    /// Which adapter invokes it
    pub kind: ToolKind,
    /// Program to run (`python`, or a binary path)
    pub program: String,
    /// Fixed leading arguments, e.g. the profiling script
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the invocation
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Environment (by name) to run inside
    #[serde(default)]
    pub environment: Option<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Files the tool writes, relative to `working_dir`, kept as artifacts
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    /// Restrict the tool to these problems; all problems when absent
    #[serde(default)]
    pub problems: Option<Vec<String>>,
}

/// A problem instance and its parameter set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProblemConfig {
    /// Unique problem identifier; becomes a results subdirectory
    pub name: String,
    /// Parameters passed to every tool
    #[serde(default)]
    pub params: ParameterSet,
}

impl BenchConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML for
    /// this schema, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let config = Self::from_yaml_str(&text)?.with_base_dir(base_dir);
        debug!(
            path = %path.display(),
            tools = config.tools.len(),
            problems = config.problems.len(),
            "loaded bench config"
        );
        Ok(config)
    }

    /// Parse and validate config text. Relative paths resolve against `.`.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed YAML or failed validation.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(text)?;
        config.base_dir = PathBuf::from(".");
        config.validate()?;
        Ok(config)
    }

    /// Set the directory relative paths resolve against.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Directory relative paths resolve against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a config path against the base directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Per-invocation timeout.
    #[must_use]
    pub const fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Look up an environment by name.
    #[must_use]
    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Problems a tool runs, in config order.
    #[must_use]
    pub fn problems_for(&self, tool: &ToolConfig) -> Vec<&ProblemConfig> {
        self.problems
            .iter()
            .filter(|p| {
                tool.problems
                    .as_ref()
                    .map_or(true, |only| only.iter().any(|name| name == &p.name))
            })
            .collect()
    }
}

impl EnvironmentConfig {
    /// Directory of a venv environment.
    #[must_use]
    pub fn venv_dir(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".venvs").join(&self.name))
    }
}
