//! Running commands inside a provisioned environment

use std::path::{Path, PathBuf};

use crate::config::{BenchConfig, EnvironmentConfig, ManagerKind};
use crate::process::CommandSpec;

/// How a command is placed inside an environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Activation {
    /// Run with the caller's environment untouched
    #[default]
    Inherit,
    /// `conda run -n <env> ...`
    Conda {
        /// Environment name
        env: String,
    },
    /// Resolve bare program names in `<dir>/bin`
    Venv {
        /// Environment directory
        dir: PathBuf,
    },
}

impl Activation {
    /// Activation for a configured environment.
    #[must_use]
    pub fn for_environment(env: &EnvironmentConfig, config: &BenchConfig) -> Self {
        match env.manager {
            ManagerKind::Conda => Self::Conda {
                env: env.name.clone(),
            },
            ManagerKind::Venv => Self::Venv {
                dir: config.resolve(&env.venv_dir()),
            },
        }
    }

    /// Rewrite `command` so it runs inside the environment.
    #[must_use]
    pub fn apply(&self, command: CommandSpec) -> CommandSpec {
        match self {
            Self::Inherit => command,
            Self::Conda { env } => {
                command.wrapped_by("conda", &["run", "--no-capture-output", "-n", env.as_str()])
            }
            Self::Venv { dir } => {
                let program = command.program().to_string();
                let command = command.env("VIRTUAL_ENV", dir.to_string_lossy());
                if is_bare(&program) {
                    command.with_program(venv_bin(dir, &program).to_string_lossy())
                } else {
                    command
                }
            }
        }
    }
}

/// Executable inside a venv.
#[must_use]
pub fn venv_bin(dir: &Path, program: &str) -> PathBuf {
    if cfg!(windows) {
        dir.join("Scripts").join(program)
    } else {
        dir.join("bin").join(program)
    }
}

fn is_bare(program: &str) -> bool {
    !program.contains(['/', '\\'])
}
