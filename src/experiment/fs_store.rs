//! Filesystem results store
//!
//! Layout of one session directory:
//!
//! ```text
//! <session>/
//!   index.jsonl                          append order, one line per result
//!   deap/nicolau_a/trial-0000.json       one pretty-printed record per run
//!   deap/nicolau_a/trial-0000.artifacts/ copied output files, if any
//!   operon/...
//! ```
//!
//! A record is written to a temporary sibling, synced and renamed into place;
//! only then is its index line appended and synced. The index line is the
//! commit point: records without one are ignored when the session is reopened,
//! so a crash never exposes a truncated record, and a later append for the
//! same configuration replaces them.
//!
//! Artifacts are copied into `trial-NNNN.artifacts.staging/` while the run is
//! pending and renamed to `trial-NNNN.artifacts/` just before the index line
//! is written. Nothing under a committed run is ever written again.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::artifact_key;
use super::{ArtifactRecord, ResultsStore, RunConfiguration, RunResult};
use crate::{Error, Result};

/// Name of the append-order index inside a session directory.
pub const INDEX_FILE: &str = "index.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    seq: usize,
    run_id: String,
    path: String,
}

/// Results store persisted as a directory tree.
#[derive(Debug)]
pub struct FsResultsStore {
    root: PathBuf,
    results: Vec<RunResult>,
    /// Run ids with artifacts staged by this handle
    staged: HashSet<String>,
}

impl FsResultsStore {
    /// Open a session directory, creating it if needed, and load the results
    /// already committed to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created, or the
    /// index or a committed record cannot be read.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!("Failed to create results directory {}: {e}", root.display()))
        })?;
        let results = load_index(&root)?;
        debug!(root = %root.display(), existing = results.len(), "opened results store");
        Ok(Self {
            root,
            results,
            staged: HashSet::new(),
        })
    }

    /// Open an existing session without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the session does not exist or cannot be read.
    pub fn open_existing(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(INDEX_FILE).is_file() {
            return Err(Error::Storage(format!(
                "No results session at {}",
                root.display()
            )));
        }
        Self::open(root)
    }

    /// Session directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record path for a configuration, relative to the session root.
    #[must_use]
    pub fn relative_record_path(configuration: &RunConfiguration) -> PathBuf {
        PathBuf::from(configuration.tool())
            .join(configuration.problem())
            .join(format!("trial-{:04}.json", configuration.trial()))
    }

    /// Absolute record path for a configuration.
    #[must_use]
    pub fn record_path(&self, configuration: &RunConfiguration) -> PathBuf {
        self.root.join(Self::relative_record_path(configuration))
    }

    fn artifact_dir(&self, configuration: &RunConfiguration) -> PathBuf {
        self.record_path(configuration).with_extension("artifacts")
    }

    fn staging_dir(&self, configuration: &RunConfiguration) -> PathBuf {
        self.record_path(configuration).with_extension("artifacts.staging")
    }

    /// Move staged artifacts into place, replacing leftovers of an
    /// uncommitted attempt.
    fn promote_artifacts(&mut self, configuration: &RunConfiguration) -> Result<()> {
        let dir = self.artifact_dir(configuration);
        remove_uncommitted(&dir)?;
        if self.staged.remove(&configuration.run_id()) {
            let staging = self.staging_dir(configuration);
            fs::rename(&staging, &dir).map_err(|e| storage_err("rename into", &dir, &e))?;
        }
        Ok(())
    }

    /// Session names under a results directory, oldest first.
    ///
    /// Default session names embed a UTC timestamp, so lexical order is
    /// chronological.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be listed.
    pub fn sessions(results_dir: &Path) -> Result<Vec<String>> {
        if !results_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(results_dir).map_err(|e| {
            Error::Storage(format!("Failed to list {}: {e}", results_dir.display()))
        })?;
        let mut sessions: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().join(INDEX_FILE).is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        sessions.sort();
        Ok(sessions)
    }
}

impl ResultsStore for FsResultsStore {
    fn append(&mut self, result: RunResult) -> Result<()> {
        let relative = Self::relative_record_path(result.configuration());
        let path = self.root.join(&relative);
        if self.contains(&result.run_id()) {
            return Err(Error::AlreadyRecorded(path));
        }
        if path.exists() {
            warn!(path = %path.display(), "replacing record that was never committed");
        }

        let bytes = serde_json::to_vec_pretty(&result)?;
        write_atomically(&path, &bytes)?;
        self.promote_artifacts(result.configuration())?;

        let entry = IndexEntry {
            seq: self.results.len(),
            run_id: result.run_id(),
            path: relative.to_string_lossy().replace('\\', "/"),
        };
        append_index(&self.root, &entry)?;

        debug!(path = %path.display(), "result committed");
        self.results.push(result);
        Ok(())
    }

    fn attach_artifact(
        &mut self,
        configuration: &RunConfiguration,
        source: &Path,
    ) -> Result<ArtifactRecord> {
        let run_id = configuration.run_id();
        if self.contains(&run_id) {
            return Err(Error::AlreadyRecorded(self.record_path(configuration)));
        }
        let key = artifact_key(source)?;
        let bytes = fs::read(source).map_err(|e| {
            Error::Storage(format!("Failed to read artifact {}: {e}", source.display()))
        })?;

        let staging = self.staging_dir(configuration);
        if !self.staged.contains(&run_id) {
            remove_uncommitted(&staging)?;
            self.staged.insert(run_id.clone());
        }
        write_atomically(&staging.join(&key), &bytes)?;
        Ok(ArtifactRecord::from_bytes(run_id, key, &bytes))
    }

    fn results(&self) -> &[RunResult] {
        &self.results
    }
}

fn storage_err(action: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::Storage(format!("Failed to {action} {}: {e}", path.display()))
}

/// Write `bytes` to `path` via a synced temporary file and a rename.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| storage_err("create", parent, &e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(storage_err("write", &tmp, &e));
    }
    fs::rename(&tmp, path).map_err(|e| storage_err("rename into", path, &e))?;
    sync_dir(parent);
    Ok(())
}

/// Remove a directory left by an attempt that never reached the index.
fn remove_uncommitted(dir: &Path) -> Result<()> {
    if dir.exists() {
        debug!(dir = %dir.display(), "removing uncommitted artifacts");
        fs::remove_dir_all(dir).map_err(|e| storage_err("remove", dir, &e))?;
    }
    Ok(())
}

fn append_index(root: &Path, entry: &IndexEntry) -> Result<()> {
    let path = root.join(INDEX_FILE);
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| storage_err("open", &path, &e))?;
    file.write_all(line.as_bytes())
        .and_then(|()| file.sync_data())
        .map_err(|e| storage_err("append to", &path, &e))
}

fn load_index(root: &Path) -> Result<Vec<RunResult>> {
    let path = root.join(INDEX_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(&path).map_err(|e| storage_err("open", &path, &e))?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()
        .map_err(|e| storage_err("read", &path, &e))?;

    let mut results = Vec::with_capacity(lines.len());
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: IndexEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) if i == last => {
                warn!(index = %path.display(), "ignoring partial trailing index line: {e}");
                break;
            }
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Corrupt index {} at line {}: {e}",
                    path.display(),
                    i + 1
                )))
            }
        };
        let record_path = root.join(&entry.path);
        let text = fs::read_to_string(&record_path)
            .map_err(|e| storage_err("read", &record_path, &e))?;
        let result: RunResult = serde_json::from_str(&text).map_err(|e| {
            Error::Storage(format!("Corrupt record {}: {e}", record_path.display()))
        })?;
        results.push(result);
    }
    Ok(results)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
