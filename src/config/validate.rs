//! Config validation

use std::collections::HashSet;
use std::path::{Component, Path};

use super::BenchConfig;
use crate::{Error, Result};

/// Revisions that float and therefore cannot pin a checkout.
///
/// Other branch names are caught by the fetcher once the remote is known.
const FLOATING_REVISIONS: &[&str] = &["HEAD", "latest", "master", "main", "trunk", "develop"];

impl BenchConfig {
    /// Check cross-references and invariants the schema cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.tools.is_empty() {
            return Err(config_err("at least one tool is required"));
        }
        if self.problems.is_empty() {
            return Err(config_err("at least one problem is required"));
        }
        if self.trials == 0 {
            return Err(config_err("`trials` must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(config_err("`timeout_secs` must be positive"));
        }

        unique("environment", self.environments.iter().map(|e| e.name.as_str()))?;
        unique("repository", self.repositories.iter().map(|r| r.name.as_str()))?;
        unique("tool", self.tools.iter().map(|t| t.name.as_str()))?;
        unique("problem", self.problems.iter().map(|p| p.name.as_str()))?;

        for env in &self.environments {
            for pkg in env.packages.iter().chain(&env.tools) {
                if pkg.name.trim().is_empty() || pkg.version.trim().is_empty() {
                    return Err(config_err(format!(
                        "environment `{}`: package `{}` must be pinned to a version",
                        env.name, pkg.name
                    )));
                }
            }
        }

        for repo in &self.repositories {
            if repo.url.trim().is_empty() {
                return Err(config_err(format!("repository `{}`: empty url", repo.name)));
            }
            let rev = repo.revision.trim();
            if rev.is_empty() || FLOATING_REVISIONS.iter().any(|f| f.eq_ignore_ascii_case(rev)) {
                return Err(config_err(format!(
                    "repository `{}`: revision must be an exact commit or tag, got `{}`",
                    repo.name, repo.revision
                )));
            }
            for patch in &repo.patches {
                if !is_contained(&patch.dest) {
                    return Err(config_err(format!(
                        "repository `{}`: patch destination `{}` must stay inside the checkout",
                        repo.name,
                        patch.dest.display()
                    )));
                }
            }
        }

        for tool in &self.tools {
            path_component("tool", &tool.name)?;
            if tool.program.trim().is_empty() {
                return Err(config_err(format!("tool `{}`: empty program", tool.name)));
            }
            if let Some(env) = &tool.environment {
                if self.environment(env).is_none() {
                    return Err(config_err(format!(
                        "tool `{}`: unknown environment `{env}`",
                        tool.name
                    )));
                }
            }
            if let Some(only) = &tool.problems {
                for name in only {
                    if !self.problems.iter().any(|p| &p.name == name) {
                        return Err(config_err(format!(
                            "tool `{}`: unknown problem `{name}`",
                            tool.name
                        )));
                    }
                }
            }
        }

        for problem in &self.problems {
            path_component("problem", &problem.name)?;
            for (key, value) in &problem.params {
                if value.is_array() || value.is_object() || value.is_null() {
                    return Err(config_err(format!(
                        "problem `{}`: parameter `{key}` must be a string, number or boolean",
                        problem.name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn config_err(message: impl Into<String>) -> Error {
    Error::Config(message.into())
}

fn unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(config_err(format!("duplicate {what} name `{name}`")));
        }
    }
    Ok(())
}

/// Names become directories in the results tree.
fn path_component(what: &str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if ok {
        Ok(())
    } else {
        Err(config_err(format!(
            "{what} name `{name}` cannot be used as a directory name"
        )))
    }
}

fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}
