//! # gp-bench: Fitness Evaluation Benchmark Harness
//!
//! gp-bench measures fitness-evaluation performance of genetic programming
//! tools (DEAP, TensorGP, Operon) under identical problem configurations.
//!
//! A session has two phases:
//!
//! 1. **Setup**: provision isolated Python environments with pinned packages,
//!    then clone third-party tools at exact revisions and overwrite selected
//!    files with local patches.
//! 2. **Run**: walk the schedule (tool, then problem, then trial), invoke each
//!    tool as a subprocess under a timeout, and append one result per
//!    configuration to a durable, append-only store.
//!
//! ## Design Principles
//!
//! - **No silent drops**: every scheduled configuration yields exactly one
//!   result, failures included
//! - **Fail fast on setup**: a half-provisioned environment never runs
//! - **Append-only**: results are never updated in place
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gp_bench::config::BenchConfig;
//! use gp_bench::process::SystemExecutor;
//! use gp_bench::session::{run_session, SessionOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> gp_bench::Result<()> {
//! let config = BenchConfig::load("bench.yaml")?;
//! let report = run_session(
//!     &config,
//!     Arc::new(SystemExecutor),
//!     SessionOptions::default(),
//!     CancellationToken::new(),
//! )
//! .await?;
//! println!("{} results recorded", report.summary.recorded);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod experiment;
pub mod fetch;
pub mod process;
pub mod provision;
pub mod runner;
pub mod session;

pub use error::{Error, ErrorCategory, Result};
