//! Environment provisioning
//!
//! Creates the isolated Python environment the GP tools run in and installs
//! pinned packages and supplementary command-line tools into it. Any failure
//! is fatal: a half-installed environment is never considered usable.
//!
//! Re-running is governed by [`OnExisting`]: an existing environment is
//! reused untouched, rejected, or removed and created again. It is never
//! updated in place.

mod activation;

pub use activation::{venv_bin, Activation};

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{BenchConfig, EnvironmentConfig, ManagerKind, OnExisting, PackageSpec};
use crate::process::{CommandExecutor, CommandOutput, CommandSpec};
use crate::{Error, Result};

/// What provisioning did to an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Environment was created and populated
    Created,
    /// Environment already existed and was left as is
    Reused,
}

/// Summary of one provisioned environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Environment name
    pub name: String,
    /// Created or reused
    pub outcome: ProvisionOutcome,
    /// `name==version` of everything installed
    pub installed: Vec<String>,
}

/// Creates environments through a [`CommandExecutor`].
pub struct Provisioner {
    executor: Arc<dyn CommandExecutor>,
}

impl Provisioner {
    /// Create a provisioner.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Provision one environment.
    ///
    /// # Errors
    ///
    /// - [`Error::PackageManagerMissing`] if conda / python3 cannot be run
    /// - [`Error::EnvironmentExists`] if it exists and the policy is `fail`
    /// - [`Error::Setup`] naming the step for any command failure
    pub async fn provision(
        &self,
        env: &EnvironmentConfig,
        config: &BenchConfig,
    ) -> Result<ProvisionReport> {
        let interpreter = self.check_manager(env).await?;

        if self.exists(env, config).await? {
            match env.on_existing {
                OnExisting::Reuse => {
                    warn!(environment = %env.name, "environment exists, reusing without changes");
                    return Ok(ProvisionReport {
                        name: env.name.clone(),
                        outcome: ProvisionOutcome::Reused,
                        installed: Vec::new(),
                    });
                }
                OnExisting::Fail => return Err(Error::EnvironmentExists(env.name.clone())),
                OnExisting::Recreate => {
                    info!(environment = %env.name, "removing existing environment");
                    self.remove(env, config).await?;
                }
            }
        }

        self.create(env, config, &interpreter).await?;

        let activation = Activation::for_environment(env, config);
        let mut installed = Vec::new();
        if !env.packages.is_empty() {
            let step = format!("install-packages:{}", env.name);
            self.run_step(&step, activation.apply(pip_install(&env.packages)))
                .await?;
            installed.extend(env.packages.iter().map(pin));
        }
        for tool in &env.tools {
            let step = format!("install-tool:{}", tool.name);
            self.run_step(&step, activation.apply(pip_install(std::slice::from_ref(tool))))
                .await?;
            installed.push(pin(tool));
        }

        info!(environment = %env.name, packages = installed.len(), "environment ready");
        Ok(ProvisionReport {
            name: env.name.clone(),
            outcome: ProvisionOutcome::Created,
            installed,
        })
    }

    /// Verify the package manager runs; returns the interpreter for venv.
    async fn check_manager(&self, env: &EnvironmentConfig) -> Result<String> {
        let program = match env.manager {
            ManagerKind::Conda => "conda".to_string(),
            ManagerKind::Venv => env
                .python
                .as_ref()
                .map_or_else(|| "python3".to_string(), |v| format!("python{v}")),
        };
        match self
            .executor
            .execute(&CommandSpec::new(&program).arg("--version"))
            .await
        {
            Ok(out) if out.success() => Ok(program),
            _ => Err(Error::PackageManagerMissing(program)),
        }
    }

    async fn exists(&self, env: &EnvironmentConfig, config: &BenchConfig) -> Result<bool> {
        match env.manager {
            ManagerKind::Conda => {
                let out = self
                    .run_step(
                        "list-environments",
                        CommandSpec::new("conda").args(["env", "list", "--json"]),
                    )
                    .await?;
                conda_env_listed(&out.stdout, &env.name)
                    .map_err(|e| Error::setup("list-environments", e))
            }
            ManagerKind::Venv => Ok(config.resolve(&env.venv_dir()).join("pyvenv.cfg").is_file()),
        }
    }

    async fn remove(&self, env: &EnvironmentConfig, config: &BenchConfig) -> Result<()> {
        let step = format!("remove-environment:{}", env.name);
        match env.manager {
            ManagerKind::Conda => {
                let command = CommandSpec::new("conda")
                    .args(["remove", "--yes", "--all", "--name"])
                    .arg(&env.name);
                self.run_step(&step, command).await?;
            }
            ManagerKind::Venv => {
                let dir = config.resolve(&env.venv_dir());
                std::fs::remove_dir_all(&dir).map_err(|e| {
                    Error::setup(step, format!("cannot remove {}: {e}", dir.display()))
                })?;
            }
        }
        Ok(())
    }

    async fn create(
        &self,
        env: &EnvironmentConfig,
        config: &BenchConfig,
        interpreter: &str,
    ) -> Result<()> {
        let step = format!("create-environment:{}", env.name);
        let command = match env.manager {
            ManagerKind::Conda => {
                let mut cmd = CommandSpec::new("conda")
                    .args(["create", "--yes", "--quiet", "--name"])
                    .arg(&env.name);
                if let Some(python) = &env.python {
                    cmd = cmd.arg(format!("python={python}"));
                }
                cmd
            }
            ManagerKind::Venv => {
                let dir = config.resolve(&env.venv_dir());
                CommandSpec::new(interpreter)
                    .args(["-m", "venv"])
                    .arg(dir.to_string_lossy())
            }
        };
        info!(environment = %env.name, command = %command, "creating environment");
        self.run_step(&step, command).await?;
        Ok(())
    }

    async fn run_step(&self, step: &str, command: CommandSpec) -> Result<CommandOutput> {
        let out = self.executor.execute(&command).await.map_err(|e| {
            Error::setup(step, format!("cannot run `{}`: {e}", command.program()))
        })?;
        if out.success() {
            Ok(out)
        } else {
            Err(Error::setup(step, out.diagnostic()))
        }
    }
}

fn pin(pkg: &PackageSpec) -> String {
    format!("{}=={}", pkg.name, pkg.version)
}

fn pip_install(packages: &[PackageSpec]) -> CommandSpec {
    CommandSpec::new("python")
        .args(["-m", "pip", "install", "--disable-pip-version-check"])
        .args(packages.iter().map(pin))
}

/// Parse `conda env list --json` and look for an environment by name.
fn conda_env_listed(json: &str, name: &str) -> std::result::Result<bool, String> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("unexpected conda output: {e}"))?;
    let envs = value
        .get("envs")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| "conda output has no `envs` list".to_string())?;
    Ok(envs.iter().filter_map(serde_json::Value::as_str).any(|path| {
        std::path::Path::new(path)
            .file_name()
            .is_some_and(|n| n == name)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync>;

    struct FakeExecutor {
        calls: Mutex<Vec<String>>,
        respond: Responder,
    }

    impl FakeExecutor {
        fn new(
            respond: impl Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn execute(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(command.to_string());
            (self.respond)(command)
        }
    }

    fn conda_env(on_existing: OnExisting) -> EnvironmentConfig {
        EnvironmentConfig {
            name: "gp-bench".into(),
            manager: ManagerKind::Conda,
            python: Some("3.10".into()),
            path: None,
            on_existing,
            packages: vec![
                PackageSpec { name: "deap".into(), version: "1.4.1".into() },
                PackageSpec { name: "numpy".into(), version: "1.26.4".into() },
            ],
            tools: vec![PackageSpec { name: "scikit-learn".into(), version: "1.3.2".into() }],
        }
    }

    fn bench_config() -> BenchConfig {
        BenchConfig::from_yaml_str(
            "tools:\n  - { name: deap, kind: deap, program: python }\nproblems:\n  - { name: p }\n",
        )
        .unwrap()
    }

    fn env_list(names: &[&str]) -> CommandOutput {
        let envs: Vec<String> = names.iter().map(|n| format!("/opt/conda/envs/{n}")).collect();
        CommandOutput::ok(serde_json::json!({ "envs": envs }).to_string())
    }

    #[tokio::test]
    async fn test_missing_conda_is_fatal() {
        let exec = FakeExecutor::new(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no conda"))
        });
        let err = Provisioner::new(exec.clone())
            .provision(&conda_env(OnExisting::Reuse), &bench_config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PackageManagerMissing(ref m) if m == "conda"));
        assert!(err.is_setup());
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_creates_and_installs() {
        let exec = FakeExecutor::new(|cmd| {
            Ok(if cmd.arguments().starts_with(&["env".to_string()]) {
                env_list(&["other"])
            } else {
                CommandOutput::ok("")
            })
        });
        let report = Provisioner::new(exec.clone())
            .provision(&conda_env(OnExisting::Reuse), &bench_config())
            .await
            .unwrap();

        assert_eq!(report.outcome, ProvisionOutcome::Created);
        assert_eq!(report.installed, ["deap==1.4.1", "numpy==1.26.4", "scikit-learn==1.3.2"]);
        let calls = exec.calls();
        assert_eq!(calls[0], "conda --version");
        assert_eq!(calls[2], "conda create --yes --quiet --name gp-bench python=3.10");
        assert!(calls[3].starts_with("conda run --no-capture-output -n gp-bench python -m pip install"));
        assert!(calls[3].ends_with("deap==1.4.1 numpy==1.26.4"));
        assert!(calls[4].ends_with("scikit-learn==1.3.2"));
    }

    #[tokio::test]
    async fn test_existing_reused_without_changes() {
        let exec = FakeExecutor::new(|cmd| {
            Ok(if cmd.arguments().first().map(String::as_str) == Some("env") {
                env_list(&["gp-bench"])
            } else {
                CommandOutput::ok("")
            })
        });
        let report = Provisioner::new(exec.clone())
            .provision(&conda_env(OnExisting::Reuse), &bench_config())
            .await
            .unwrap();
        assert_eq!(report.outcome, ProvisionOutcome::Reused);
        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_with_fail_policy() {
        let exec = FakeExecutor::new(|cmd| {
            Ok(if cmd.arguments().first().map(String::as_str) == Some("env") {
                env_list(&["gp-bench"])
            } else {
                CommandOutput::ok("")
            })
        });
        let err = Provisioner::new(exec)
            .provision(&conda_env(OnExisting::Fail), &bench_config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EnvironmentExists(_)));
    }

    #[tokio::test]
    async fn test_recreate_removes_first() {
        let exec = FakeExecutor::new(|cmd| {
            Ok(if cmd.arguments().first().map(String::as_str) == Some("env") {
                env_list(&["gp-bench"])
            } else {
                CommandOutput::ok("")
            })
        });
        Provisioner::new(exec.clone())
            .provision(&conda_env(OnExisting::Recreate), &bench_config())
            .await
            .unwrap();
        let calls = exec.calls();
        assert_eq!(calls[2], "conda remove --yes --all --name gp-bench");
        assert!(calls[3].starts_with("conda create"));
    }

    #[tokio::test]
    async fn test_tool_install_failure_names_step() {
        let exec = FakeExecutor::new(|cmd| {
            let args = cmd.arguments();
            Ok(if args.first().map(String::as_str) == Some("env") {
                env_list(&[])
            } else if args.iter().any(|a| a == "scikit-learn==1.3.2") {
                CommandOutput::failed(1, "ERROR: No matching distribution found")
            } else {
                CommandOutput::ok("")
            })
        });
        let err = Provisioner::new(exec)
            .provision(&conda_env(OnExisting::Reuse), &bench_config())
            .await
            .unwrap_err();
        match err {
            Error::Setup { step, message } => {
                assert_eq!(step, "install-tool:scikit-learn");
                assert!(message.contains("No matching distribution"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_conda_env_listed() {
        let json = r#"{"envs": ["/opt/conda", "/opt/conda/envs/gp-bench"]}"#;
        assert_eq!(conda_env_listed(json, "gp-bench"), Ok(true));
        assert_eq!(conda_env_listed(json, "gp"), Ok(false));
        assert!(conda_env_listed("not json", "gp").is_err());
    }
}
