//! Results Store - append-only collection of run results
//!
//! The runner is handed a store explicitly instead of writing into ambient
//! filesystem state, so completeness and ordering can be checked against the
//! in-memory backend without touching disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{ArtifactRecord, RunConfiguration, RunResult};
use crate::{Error, Result};

/// Append-only store of [`RunResult`]s.
///
/// Results are kept in append order. There is no update or delete.
pub trait ResultsStore: Send {
    /// Append a result. The write is durable when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRecorded`] if the configuration already has a
    /// result, or [`Error::Storage`] if the write fails. A failed append
    /// leaves earlier results intact.
    fn append(&mut self, result: RunResult) -> Result<()>;

    /// Keep an output file for a configuration that has not been appended yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRecorded`] if the configuration already has a
    /// result, or [`Error::Storage`] if the file cannot be read or copied.
    fn attach_artifact(
        &mut self,
        configuration: &RunConfiguration,
        source: &Path,
    ) -> Result<ArtifactRecord>;

    /// All results, in append order.
    fn results(&self) -> &[RunResult];

    /// Number of results.
    fn len(&self) -> usize {
        self.results().len()
    }

    /// True when nothing has been appended.
    fn is_empty(&self) -> bool {
        self.results().is_empty()
    }

    /// Results for one tool, in append order.
    fn results_for_tool(&self, tool: &str) -> Vec<&RunResult> {
        self.results()
            .iter()
            .filter(|r| r.configuration().tool() == tool)
            .collect()
    }

    /// Results for one (tool, problem) configuration, ordered by trial.
    fn results_for_configuration(&self, tool: &str, problem: &str) -> Vec<&RunResult> {
        let mut results: Vec<&RunResult> = self
            .results()
            .iter()
            .filter(|r| r.configuration().tool() == tool && r.configuration().problem() == problem)
            .collect();
        results.sort_by_key(|r| r.configuration().trial());
        results
    }

    /// True when the run id already has a result.
    fn contains(&self, run_id: &str) -> bool {
        self.results().iter().any(|r| r.run_id() == run_id)
    }
}

/// In-memory results store.
///
/// Data is lost on process exit. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryResultsStore {
    results: Vec<RunResult>,
    run_ids: HashSet<String>,
}

impl MemoryResultsStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultsStore for MemoryResultsStore {
    fn append(&mut self, result: RunResult) -> Result<()> {
        let run_id = result.run_id();
        if !self.run_ids.insert(run_id.clone()) {
            return Err(Error::AlreadyRecorded(PathBuf::from(run_id)));
        }
        self.results.push(result);
        Ok(())
    }

    fn attach_artifact(
        &mut self,
        configuration: &RunConfiguration,
        source: &Path,
    ) -> Result<ArtifactRecord> {
        let run_id = configuration.run_id();
        if self.run_ids.contains(&run_id) {
            return Err(Error::AlreadyRecorded(PathBuf::from(run_id)));
        }
        let bytes = std::fs::read(source).map_err(|e| {
            Error::Storage(format!("Failed to read artifact {}: {e}", source.display()))
        })?;
        Ok(ArtifactRecord::from_bytes(run_id, artifact_key(source)?, &bytes))
    }

    fn results(&self) -> &[RunResult] {
        &self.results
    }

    fn contains(&self, run_id: &str) -> bool {
        self.run_ids.contains(run_id)
    }
}

/// File name used as an artifact's key.
pub(crate) fn artifact_key(source: &Path) -> Result<String> {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Storage(format!("Artifact path has no file name: {}", source.display())))
}
