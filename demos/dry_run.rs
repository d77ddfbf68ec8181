//! Dry Run Example
//!
//! Runs the schedule from a small config against simulated tools and an
//! in-memory results store. Nothing is provisioned, cloned, or executed.
//!
//! Run with: cargo run --example dry_run

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gp_bench::config::BenchConfig;
use gp_bench::experiment::{MemoryResultsStore, ResultsStore, RunConfiguration, Schedule};
use gp_bench::runner::{EvaluationError, Evaluator, ExperimentRunner, ToolOutput};

const CONFIG: &str = r"
timeout_secs: 2
trials: 2
tools:
  - { name: deap, kind: deap, program: python }
  - { name: tensorgp, kind: tensorgp, program: python }
  - { name: operon, kind: operon, program: operon_bench }
problems:
  - { name: nicolau_a, params: { max_depth: 7, bin_size: 2 } }
  - { name: nicolau_b, params: { max_depth: 5, bin_size: 1 } }
";

/// Pretends to evaluate: runtime grows with depth, TensorGP hangs on trial 1.
struct Simulated {
    per_node_secs: f64,
}

#[async_trait]
impl Evaluator for Simulated {
    async fn invoke(&self, c: &RunConfiguration) -> Result<ToolOutput, EvaluationError> {
        if c.tool() == "tensorgp" && c.trial() == 1 {
            std::future::pending::<()>().await;
        }
        let depth: f64 = c.param("max_depth").and_then(|d| d.parse().ok()).unwrap_or(1.0);
        let runtime = self.per_node_secs * 2f64.powf(depth);
        Ok(ToolOutput::ok(format!("@metric min_avg_runtime {runtime:.6}\n")))
    }
}

#[tokio::main]
async fn main() -> gp_bench::Result<()> {
    println!("=== gp-bench dry run ===\n");

    let config = BenchConfig::from_yaml_str(CONFIG)?;
    let schedule = Schedule::from_config(&config);
    println!("1. Schedule ({} configurations):", schedule.len());
    for configuration in &schedule {
        println!("   {configuration}");
    }

    let runner = ExperimentRunner::new(Duration::from_secs(config.timeout_secs))
        .with_evaluator("deap", Arc::new(Simulated { per_node_secs: 2e-5 }))
        .with_evaluator("tensorgp", Arc::new(Simulated { per_node_secs: 4e-6 }))
        .with_evaluator("operon", Arc::new(Simulated { per_node_secs: 1e-6 }));

    println!("\n2. Running (TensorGP trial 1 will time out)...");
    let mut store = MemoryResultsStore::new();
    let summary = runner.run(&schedule, &mut store).await?;
    println!(
        "   recorded {}/{}: {} ok, {} failed, {} timed out",
        summary.recorded, summary.scheduled, summary.succeeded, summary.failed, summary.timed_out
    );

    println!("\n3. Results by configuration:");
    for tool in &config.tools {
        for problem in &config.problems {
            for result in store.results_for_configuration(&tool.name, &problem.name) {
                let runtime = result
                    .metrics()
                    .first()
                    .map_or_else(|| "-".to_string(), |m| format!("{:.6}s", m.value()));
                println!("   {:<32} {:?} {runtime}", result.run_id(), result.status());
            }
        }
    }

    println!("\n=== Done ===");
    Ok(())
}
