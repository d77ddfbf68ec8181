//! Shared fakes for integration tests.
//!
//! `FakeSystem` stands in for conda, git, and the GP tools so whole sessions
//! can run without any of them installed. Tools are selected by program name:
//!
//! - `fake-ok`: exits 0 and reports a metric
//! - `fake-crash`: exits 1
//! - `fake-hang`: never finishes (until timed out or cancelled)

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use gp_bench::config::BenchConfig;
use gp_bench::process::{CommandExecutor, CommandOutput, CommandSpec};
use tokio::sync::Notify;

#[derive(Default)]
pub struct FakeSystem {
    /// Every command executed, rendered as a string
    pub calls: Mutex<Vec<String>>,
    /// Signalled whenever `fake-hang` starts
    pub hang_started: Notify,
    /// Make `conda --version` fail
    pub conda_missing: bool,
}

impl FakeSystem {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tool_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains("fake-"))
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for FakeSystem {
    async fn execute(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());
        let (program, args) = unwrap_conda_run(command);
        match program {
            "conda" if self.conda_missing => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            )),
            "conda" if args.first().map(String::as_str) == Some("env") => {
                Ok(CommandOutput::ok(r#"{"envs": ["/opt/conda"]}"#))
            }
            "git" if args.first().map(String::as_str) == Some("clone") => {
                let target = Path::new(&args[3]);
                std::fs::create_dir_all(target.join("src"))?;
                std::fs::write(target.join("src/engine.py"), "upstream\n")?;
                Ok(CommandOutput::ok(""))
            }
            // Fake remotes have one branch, `stable`
            "git" if args.iter().any(|a| a == "show-ref") => {
                Ok(if args.last().is_some_and(|r| r.ends_with("/stable")) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "")
                })
            }
            "git" if args.iter().any(|a| a == "rev-parse") => {
                Ok(CommandOutput::ok("9f8e7d6c5b4a\n"))
            }
            "fake-ok" => Ok(CommandOutput::ok(format!(
                "profiling {}\n@metric min_avg_runtime 0.0125\n",
                args.join(" ")
            ))),
            "fake-crash" => Ok(CommandOutput::failed(1, "Traceback\nRuntimeError: boom\n")),
            "fake-hang" => {
                self.hang_started.notify_one();
                std::future::pending().await
            }
            _ => Ok(CommandOutput::ok("")),
        }
    }
}

/// Strip a `conda run --no-capture-output -n <env>` launcher.
fn unwrap_conda_run(command: &CommandSpec) -> (&str, &[String]) {
    let args = command.arguments();
    if command.program() == "conda" && args.first().map(String::as_str) == Some("run") {
        if let Some((program, rest)) = args.get(4..).and_then(<[String]>::split_first) {
            return (program.as_str(), rest);
        }
    }
    (command.program(), args)
}

/// Write `yaml` to `dir/bench.yaml` and load it.
pub fn load_config(dir: &Path, yaml: &str) -> BenchConfig {
    let path = dir.join("bench.yaml");
    std::fs::write(&path, yaml).unwrap();
    BenchConfig::load(&path).unwrap()
}

/// Only session directory under `results`.
pub fn only_session(dir: &Path) -> PathBuf {
    let sessions: Vec<PathBuf> = std::fs::read_dir(dir.join("results"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(sessions.len(), 1, "expected one session: {sessions:?}");
    sessions.into_iter().next().unwrap()
}
