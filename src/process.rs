//! Subprocess plumbing shared by setup steps and tool evaluators
//!
//! Every external program (package managers, git, GP tools) is described by a
//! [`CommandSpec`] and run through a [`CommandExecutor`]. The system executor
//! kills the child when its future is dropped, which is how timeouts and
//! cancellation stop a running tool.
//!
//! On unix each child leads its own process group and the whole group is
//! killed, so programs started through a launcher such as `conda run` die
//! with it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Create a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Prefix this command with a launcher, e.g. `conda run -n env`.
    ///
    /// Working directory and environment are preserved.
    #[must_use]
    pub fn wrapped_by(self, launcher: &str, launcher_args: &[&str]) -> Self {
        let mut args: Vec<String> = launcher_args.iter().map(|s| (*s).to_string()).collect();
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: launcher.to_string(),
            args,
            cwd: self.cwd,
            env: self.env,
        }
    }

    /// Replace the program, keeping everything else.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if set.
    #[must_use]
    pub fn cwd(&self) -> Option<&std::path::Path> {
        self.cwd.as_deref()
    }

    /// Extra environment variables.
    #[must_use]
    pub const fn envs(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub code: Option<i32>,
    /// Captured standard output (lossy UTF-8)
    pub stdout: String,
    /// Captured standard error (lossy UTF-8)
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// True when the process exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Last non-empty line of stderr (or stdout), for error messages.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let pick = |s: &str| {
            s.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::trim)
                .map(ToString::to_string)
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| match self.code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            })
    }
}

/// Runs external commands.
///
/// Implementations must stop the child process if the returned future is
/// dropped before completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the program cannot be spawned (for example,
    /// it is not on `PATH`).
    async fn execute(&self, command: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Executor backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        debug!(command = %command, cwd = ?command.cwd(), "spawning");

        let mut cmd = Command::new(command.program());
        cmd.args(command.arguments())
            .envs(command.envs())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = command.cwd() {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn()?;
        let _group = ProcessGroup::lead_by(&child);
        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Kills every process in a child's group when dropped.
///
/// Dropped after normal completion too, which reaps stragglers the tool left
/// running in the background.
struct ProcessGroup {
    #[cfg(unix)]
    leader: Option<nix::unistd::Pid>,
}

impl ProcessGroup {
    #[cfg(unix)]
    fn lead_by(child: &Child) -> Self {
        let leader = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(nix::unistd::Pid::from_raw);
        Self { leader }
    }

    #[cfg(not(unix))]
    fn lead_by(_child: &Child) -> Self {
        Self {}
    }
}

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};

        let Some(leader) = self.leader else { return };
        match killpg(leader, Signal::SIGKILL) {
            Ok(()) => debug!(pgid = leader.as_raw(), "killed process group"),
            Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = leader.as_raw(), "cannot kill process group: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wrapped_by_keeps_cwd_and_env() {
        let spec = CommandSpec::new("python")
            .arg("profile.py")
            .current_dir("tools/deap")
            .env("A", "1")
            .wrapped_by("conda", &["run", "-n", "gp"]);

        assert_eq!(spec.program(), "conda");
        assert_eq!(spec.arguments(), ["run", "-n", "gp", "python", "profile.py"]);
        assert_eq!(spec.cwd(), Some(std::path::Path::new("tools/deap")));
        assert_eq!(spec.envs().get("A").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let spec = CommandSpec::new("git").args(["commit", "-m", "two words"]);
        assert_eq!(spec.to_string(), "git commit -m 'two words'");
    }

    #[test]
    fn test_diagnostic_prefers_stderr_tail() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "progress\n".into(),
            stderr: "warning\nfatal: repository not found\n\n".into(),
        };
        assert_eq!(out.diagnostic(), "fatal: repository not found");
        assert_eq!(CommandOutput::failed(7, "").diagnostic(), "exit code 7");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_executor_captures_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = SystemExecutor.execute(&spec).await.unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        // The trailing `true` keeps the outer shell from exec'ing the inner one
        let script = format!("sh -c 'sleep 1; touch {}'; true", marker.display());
        let spec = CommandSpec::new("sh").args(["-c", script.as_str()]);

        let outcome =
            tokio::time::timeout(Duration::from_millis(200), SystemExecutor.execute(&spec)).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "grandchild outlived the timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("sh -c 'sleep 1; touch {}'; true", marker.display());
        let spec = CommandSpec::new("sh").args(["-c", script.as_str()]);
        let token = tokio_util::sync::CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        tokio::select! {
            () = token.cancelled() => {}
            _ = SystemExecutor.execute(&spec) => panic!("command finished before cancel"),
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "grandchild outlived cancellation");
    }

    #[tokio::test]
    async fn test_system_executor_missing_program() {
        let spec = CommandSpec::new("gp-bench-definitely-not-a-program");
        assert!(SystemExecutor.execute(&spec).await.is_err());
    }
}
