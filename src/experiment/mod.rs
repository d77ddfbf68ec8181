//! Experiment records and the results store
//!
//! ## Schema Overview
//!
//! ```text
//! Schedule ──> RunConfiguration (N) ──1:1──> RunResult
//!                                               │
//!                                               ├──< MetricRecord (N) [tool-reported]
//!                                               └──< ArtifactRecord (N) [CAS]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use gp_bench::experiment::{
//!     MemoryResultsStore, ResultsStore, RunConfiguration, RunResult, RunStatus, ToolKind,
//! };
//!
//! let config = RunConfiguration::builder("deap", ToolKind::Deap, "nicolau_a")
//!     .param("max_depth", 7)
//!     .build();
//!
//! let result = RunResult::builder(config)
//!     .exit_code(Some(0))
//!     .stdout("@metric min_avg_runtime 0.0012\n")
//!     .build(RunStatus::Success);
//!
//! let mut store = MemoryResultsStore::new();
//! store.append(result)?;
//! assert_eq!(store.results_for_tool("deap").len(), 1);
//! # Ok::<(), gp_bench::Error>(())
//! ```

mod artifact_record;
mod fs_store;
mod metric_record;
mod run_configuration;
mod run_result;
mod schedule;
mod store;

pub use artifact_record::{sha256_cas, ArtifactRecord};
pub use fs_store::{FsResultsStore, INDEX_FILE};
pub use metric_record::{MetricRecord, METRIC_PREFIX};
pub use run_configuration::{
    render_value, ParameterSet, RunConfiguration, RunConfigurationBuilder, ToolKind,
};
pub use run_result::{RunResult, RunResultBuilder, RunStatus, MAX_CAPTURED_OUTPUT_BYTES};
pub use schedule::Schedule;
pub use store::{MemoryResultsStore, ResultsStore};
