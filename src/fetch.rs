//! Third-party fetcher and patcher
//!
//! Produces a clean checkout of a pinned revision and then overwrites the
//! designated files with locally maintained variants. The target directory is
//! always removed first: there is no merge with whatever was there before, so
//! re-running yields the same tree as a fresh clone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{BenchConfig, RepositoryConfig};
use crate::process::{CommandExecutor, CommandOutput, CommandSpec};
use crate::{Error, Result};

/// Summary of one fetched repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Repository name from the config
    pub name: String,
    /// Checkout directory
    pub target_dir: PathBuf,
    /// Commit the revision resolved to
    pub resolved_commit: String,
    /// Files replaced, relative to the checkout
    pub patched_files: Vec<PathBuf>,
}

/// Clones and patches repositories with git through a [`CommandExecutor`].
pub struct Fetcher {
    executor: Arc<dyn CommandExecutor>,
}

impl Fetcher {
    /// Create a fetcher.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Fetch one repository at its pinned revision and apply its patches.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingPatchSource`] if a replacement file does not exist
    ///   (checked before anything is touched)
    /// - [`Error::Setup`] naming the step for removal, clone, checkout, or
    ///   copy failures, or when the revision names a branch
    pub async fn fetch(
        &self,
        repo: &RepositoryConfig,
        config: &BenchConfig,
    ) -> Result<FetchReport> {
        let target = config.resolve(&repo.target_dir);

        let patches: Vec<(PathBuf, PathBuf)> = repo
            .patches
            .iter()
            .map(|p| (config.resolve(&p.source), p.dest.clone()))
            .collect();
        for (source, _) in &patches {
            if !source.is_file() {
                return Err(Error::MissingPatchSource(source.clone()));
            }
        }

        if target.exists() {
            debug!(target = %target.display(), "removing previous checkout");
            std::fs::remove_dir_all(&target).map_err(|e| {
                Error::setup(
                    format!("remove:{}", repo.name),
                    format!("cannot remove {}: {e}", target.display()),
                )
            })?;
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::setup(format!("clone:{}", repo.name), format!("{}: {e}", parent.display()))
            })?;
        }

        info!(repository = %repo.name, url = %repo.url, revision = %repo.revision, "cloning");
        self.git(
            &format!("clone:{}", repo.name),
            CommandSpec::new("git")
                .args(["clone", "--quiet", repo.url.as_str()])
                .arg(target.to_string_lossy()),
        )
        .await?;

        self.reject_branch(repo, &target).await?;
        self.git(
            &format!("checkout:{}", repo.name),
            git_in(&target)
                .args(["-c", "advice.detachedHead=false", "checkout", "--quiet", "--detach"])
                .arg(&repo.revision),
        )
        .await?;

        let rev_parse = git_in(&target).args(["rev-parse", "HEAD"]);
        let resolved_commit = self
            .git(&format!("checkout:{}", repo.name), rev_parse)
            .await?
            .stdout
            .trim()
            .to_string();

        let mut patched_files = Vec::with_capacity(patches.len());
        for (source, dest) in patches {
            apply_patch(&repo.name, &source, &target, &dest)?;
            patched_files.push(dest);
        }

        info!(
            repository = %repo.name,
            commit = %resolved_commit,
            patched = patched_files.len(),
            "checkout ready"
        );
        Ok(FetchReport {
            name: repo.name.clone(),
            target_dir: target,
            resolved_commit,
            patched_files,
        })
    }

    /// Branches move, so they cannot pin a checkout.
    async fn reject_branch(&self, repo: &RepositoryConfig, target: &Path) -> Result<()> {
        let step = format!("checkout:{}", repo.name);
        let show_ref = git_in(target)
            .args(["show-ref", "--verify", "--quiet"])
            .arg(format!("refs/remotes/origin/{}", repo.revision));
        let out = self
            .executor
            .execute(&show_ref)
            .await
            .map_err(|e| Error::setup(&step, format!("cannot run git: {e}")))?;
        if out.success() {
            return Err(Error::setup(
                step,
                format!(
                    "revision `{}` is a branch; pin an exact commit or tag",
                    repo.revision
                ),
            ));
        }
        Ok(())
    }

    async fn git(&self, step: &str, command: CommandSpec) -> Result<CommandOutput> {
        let out = self
            .executor
            .execute(&command)
            .await
            .map_err(|e| Error::setup(step, format!("cannot run git: {e}")))?;
        if out.success() {
            Ok(out)
        } else {
            Err(Error::setup(step, out.diagnostic()))
        }
    }
}

fn git_in(dir: &Path) -> CommandSpec {
    CommandSpec::new("git").arg("-C").arg(dir.to_string_lossy())
}

fn apply_patch(repo: &str, source: &Path, target: &Path, dest: &Path) -> Result<()> {
    let step = || format!("patch:{repo}:{}", dest.display());
    let dest_path = target.join(dest);
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::setup(step(), e.to_string()))?;
    }
    std::fs::copy(source, &dest_path).map_err(|e| {
        Error::setup(
            step(),
            format!("cannot copy {} to {}: {e}", source.display(), dest_path.display()),
        )
    })?;
    debug!(source = %source.display(), dest = %dest_path.display(), "patched");
    Ok(())
}
