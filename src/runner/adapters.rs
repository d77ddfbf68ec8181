//! Invocation adapters for the supported GP tools
//!
//! Each adapter turns a [`RunConfiguration`] into a command line in the style
//! the tool's entry point expects, places it inside the tool's environment,
//! and hands it to a [`CommandExecutor`].
//!
//! | Adapter | Flags | Seed | Extra environment |
//! |---------|-------|------|-------------------|
//! | [`DeapEvaluator`] | `--max-depth 7` | `--seed <trial>` | |
//! | [`TensorGpEvaluator`] | `--max-depth 7` | `--seed <trial>` | `TF_CPP_MIN_LOG_LEVEL`, `CUDA_VISIBLE_DEVICES` |
//! | [`OperonEvaluator`] | `--max-depth=7` | `--seed=<trial>` | `OMP_NUM_THREADS` |

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{EvaluationError, Evaluator, ToolOutput};
use crate::config::{BenchConfig, ToolConfig};
use crate::experiment::{RunConfiguration, ToolKind};
use crate::process::{CommandExecutor, CommandSpec};
use crate::provision::Activation;
use crate::{Error, Result};

/// Everything about a tool that does not depend on the configuration.
#[derive(Clone)]
pub struct ToolInvocation {
    name: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    outputs: Vec<PathBuf>,
    activation: Activation,
    executor: Arc<dyn CommandExecutor>,
}

impl ToolInvocation {
    /// Resolve a tool's paths and environment from the config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the tool names an unknown environment.
    pub fn from_tool(
        tool: &ToolConfig,
        config: &BenchConfig,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self> {
        let activation = match &tool.environment {
            None => Activation::Inherit,
            Some(name) => {
                let env = config.environment(name).ok_or_else(|| {
                    Error::Config(format!(
                        "tool `{}` references unknown environment `{name}`",
                        tool.name
                    ))
                })?;
                Activation::for_environment(env, config)
            }
        };
        let working_dir = tool.working_dir.as_deref().map(|d| config.resolve(d));
        let root = working_dir
            .clone()
            .unwrap_or_else(|| config.base_dir().to_path_buf());

        let program = if is_relative_path(&tool.program) {
            root.join(&tool.program).to_string_lossy().into_owned()
        } else {
            tool.program.clone()
        };
        let outputs = tool.outputs.iter().map(|o| root.join(o)).collect();

        Ok(Self {
            name: tool.name.clone(),
            program,
            args: tool.args.clone(),
            working_dir,
            env: tool.env.clone(),
            outputs,
            activation,
            executor,
        })
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn base_command(&self) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.program).args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd = cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd = cmd.env(key, value);
        }
        cmd
    }

    async fn run(&self, command: CommandSpec) -> std::result::Result<ToolOutput, EvaluationError> {
        let command = self.activation.apply(command);
        self.executor
            .execute(&command)
            .await
            .map_err(|e| EvaluationError::Spawn {
                program: command.program().to_string(),
                message: e.to_string(),
            })
    }
}

impl std::fmt::Debug for ToolInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvocation")
            .field("name", &self.name)
            .field("program", &self.program)
            .field("working_dir", &self.working_dir)
            .field("activation", &self.activation)
            .finish_non_exhaustive()
    }
}

fn is_relative_path(program: &str) -> bool {
    program.contains(['/', '\\']) && Path::new(program).is_relative()
}

fn flag_name(key: &str) -> String {
    format!("--{}", key.replace('_', "-"))
}

/// `--key value` pairs, in parameter order.
fn spaced_flags(mut cmd: CommandSpec, configuration: &RunConfiguration) -> CommandSpec {
    for key in configuration.params().keys() {
        if let Some(value) = configuration.param(key) {
            cmd = cmd.arg(flag_name(key)).arg(value);
        }
    }
    cmd.arg("--seed").arg(configuration.trial().to_string())
}

/// Evaluator for DEAP profiling scripts.
#[derive(Debug, Clone)]
pub struct DeapEvaluator {
    invocation: ToolInvocation,
}

impl DeapEvaluator {
    /// Create the adapter.
    #[must_use]
    pub const fn new(invocation: ToolInvocation) -> Self {
        Self { invocation }
    }

    /// Command line for a configuration, before environment activation.
    #[must_use]
    pub fn command(&self, configuration: &RunConfiguration) -> CommandSpec {
        spaced_flags(self.invocation.base_command(), configuration)
    }
}

#[async_trait]
impl Evaluator for DeapEvaluator {
    async fn invoke(
        &self,
        configuration: &RunConfiguration,
    ) -> std::result::Result<ToolOutput, EvaluationError> {
        self.invocation.run(self.command(configuration)).await
    }

    fn outputs(&self) -> Vec<PathBuf> {
        self.invocation.outputs.clone()
    }
}

/// Evaluator for TensorGP (TensorFlow) profiling scripts.
#[derive(Debug, Clone)]
pub struct TensorGpEvaluator {
    invocation: ToolInvocation,
}

impl TensorGpEvaluator {
    /// Create the adapter.
    #[must_use]
    pub const fn new(invocation: ToolInvocation) -> Self {
        Self { invocation }
    }

    /// Command line for a configuration, before environment activation.
    #[must_use]
    pub fn command(&self, configuration: &RunConfiguration) -> CommandSpec {
        let mut cmd = spaced_flags(self.invocation.base_command(), configuration)
            .env("TF_CPP_MIN_LOG_LEVEL", "2");
        if let Some(device) = configuration.param("device") {
            cmd = cmd.env("CUDA_VISIBLE_DEVICES", cuda_devices(&device));
        }
        cmd
    }
}

/// Map a TensorFlow device string (`/gpu:1`, `gpu`, `cpu`, `0,1`) to
/// `CUDA_VISIBLE_DEVICES`.
fn cuda_devices(device: &str) -> String {
    let lower = device.trim().trim_start_matches('/').to_ascii_lowercase();
    if lower.starts_with("cpu") {
        return "-1".to_string();
    }
    match lower.rsplit_once(':') {
        Some((_, index)) => index.to_string(),
        None if lower == "gpu" => "0".to_string(),
        None => lower,
    }
}

#[async_trait]
impl Evaluator for TensorGpEvaluator {
    async fn invoke(
        &self,
        configuration: &RunConfiguration,
    ) -> std::result::Result<ToolOutput, EvaluationError> {
        self.invocation.run(self.command(configuration)).await
    }

    fn outputs(&self) -> Vec<PathBuf> {
        self.invocation.outputs.clone()
    }
}

/// Evaluator for the native Operon benchmark binary.
#[derive(Debug, Clone)]
pub struct OperonEvaluator {
    invocation: ToolInvocation,
}

impl OperonEvaluator {
    /// Create the adapter.
    #[must_use]
    pub const fn new(invocation: ToolInvocation) -> Self {
        Self { invocation }
    }

    /// Command line for a configuration, before environment activation.
    #[must_use]
    pub fn command(&self, configuration: &RunConfiguration) -> CommandSpec {
        let mut cmd = self.invocation.base_command();
        for key in configuration.params().keys() {
            if let Some(value) = configuration.param(key) {
                cmd = cmd.arg(format!("{}={value}", flag_name(key)));
            }
        }
        if let Some(threads) = configuration.param("threads") {
            cmd = cmd.env("OMP_NUM_THREADS", threads);
        }
        cmd.arg(format!("--seed={}", configuration.trial()))
    }
}

#[async_trait]
impl Evaluator for OperonEvaluator {
    async fn invoke(
        &self,
        configuration: &RunConfiguration,
    ) -> std::result::Result<ToolOutput, EvaluationError> {
        self.invocation.run(self.command(configuration)).await
    }

    fn outputs(&self) -> Vec<PathBuf> {
        self.invocation.outputs.clone()
    }
}

/// Build the adapter matching a tool's kind.
///
/// # Errors
///
/// Returns [`Error::Config`] if the tool references an unknown environment.
pub fn evaluator_for(
    tool: &ToolConfig,
    config: &BenchConfig,
    executor: Arc<dyn CommandExecutor>,
) -> Result<Arc<dyn Evaluator>> {
    let invocation = ToolInvocation::from_tool(tool, config, executor)?;
    Ok(match tool.kind {
        ToolKind::Deap => Arc::new(DeapEvaluator::new(invocation)),
        ToolKind::TensorGp => Arc::new(TensorGpEvaluator::new(invocation)),
        ToolKind::Operon => Arc::new(OperonEvaluator::new(invocation)),
    })
}

/// Adapters for every tool in the config, keyed by tool name.
///
/// # Errors
///
/// Returns [`Error::Config`] if any tool references an unknown environment.
pub fn evaluators_from_config(
    config: &BenchConfig,
    executor: &Arc<dyn CommandExecutor>,
) -> Result<HashMap<String, Arc<dyn Evaluator>>> {
    config
        .tools
        .iter()
        .map(|tool| Ok((tool.name.clone(), evaluator_for(tool, config, Arc::clone(executor))?)))
        .collect()
}
