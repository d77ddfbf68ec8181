use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gp_bench::config::{BenchConfig, DEFAULT_CONFIG_FILE};
use gp_bench::experiment::{FsResultsStore, ResultsStore, RunResult, Schedule};
use gp_bench::process::{CommandExecutor, SystemExecutor};
use gp_bench::session::{run_session, run_setup, SessionOptions};

mod exit_codes;

/// Benchmark fitness evaluation across GP tools.
#[derive(Debug, Parser)]
#[command(name = "gp-bench", version, about)]
struct Cli {
    /// Bench config file
    #[arg(long, global = true, env = "GP_BENCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Set up, then run every experiment (default)
    Run(RunArgs),
    /// Provision environments and fetch third-party tools only
    Setup,
    /// List recorded results without running anything
    Results(ResultsArgs),
    /// Check the config and print the schedule
    Validate,
}

#[derive(Debug, Args, Default)]
struct RunArgs {
    /// Reuse the environments and checkouts already in place
    #[arg(long)]
    skip_setup: bool,

    /// Session name under `results_dir` (default: run-<UTC timestamp>)
    #[arg(long)]
    session: Option<String>,
}

#[derive(Debug, Args)]
struct ResultsArgs {
    /// Session to read (default: the latest)
    #[arg(long)]
    session: Option<String>,

    /// Only this tool
    #[arg(long)]
    tool: Option<String>,

    /// Only this problem
    #[arg(long)]
    problem: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after killing the running tool");
            on_signal.cancel();
        }
    });

    let code = match dispatch(cli, cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            exit_codes::for_report(&e)
        }
    };
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli, cancel: CancellationToken) -> anyhow::Result<i32> {
    let config = BenchConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let executor: Arc<dyn CommandExecutor> = Arc::new(SystemExecutor);

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => cmd_run(&config, executor, args, cancel).await,
        Command::Setup => cmd_setup(&config, executor, cancel).await,
        Command::Results(args) => cmd_results(&config, &args),
        Command::Validate => cmd_validate(&config),
    }
}

async fn cmd_run(
    config: &BenchConfig,
    executor: Arc<dyn CommandExecutor>,
    args: RunArgs,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let options = SessionOptions {
        session: args.session,
        skip_setup: args.skip_setup,
    };
    let report = run_session(config, executor, options, cancel).await?;
    let summary = report.summary;

    if let Some(dir) = &report.session_dir {
        println!("session: {}", dir.display());
    }
    println!(
        "recorded {}/{}: {} succeeded, {} failed, {} timed out",
        summary.recorded, summary.scheduled, summary.succeeded, summary.failed, summary.timed_out
    );
    Ok(if summary.interrupted {
        exit_codes::INTERRUPTED
    } else {
        exit_codes::SUCCESS
    })
}

async fn cmd_setup(
    config: &BenchConfig,
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    let report = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(exit_codes::INTERRUPTED),
        report = run_setup(config, executor) => report?,
    };
    for env in &report.environments {
        println!("environment\t{}\t{:?}", env.name, env.outcome);
    }
    for repo in &report.repositories {
        println!(
            "repository\t{}\t{}\t{} patched",
            repo.name,
            repo.resolved_commit,
            repo.patched_files.len()
        );
    }
    Ok(exit_codes::SUCCESS)
}

fn cmd_results(config: &BenchConfig, args: &ResultsArgs) -> anyhow::Result<i32> {
    let results_dir = config.resolve(&config.results_dir);
    let session = match &args.session {
        Some(name) => name.clone(),
        None => FsResultsStore::sessions(&results_dir)?
            .pop()
            .with_context(|| format!("no sessions under {}", results_dir.display()))?,
    };
    let store = FsResultsStore::open_existing(results_dir.join(&session))?;

    let selected: Vec<&RunResult> = store
        .results()
        .iter()
        .filter(|r| args.tool.as_deref().map_or(true, |t| r.configuration().tool() == t))
        .filter(|r| args.problem.as_deref().map_or(true, |p| r.configuration().problem() == p))
        .collect();

    let mut out = std::io::stdout().lock();
    writeln!(out, "# session {session}: {} results", selected.len())?;
    writeln!(out, "run_id\tstatus\texit_code\tduration_secs\tmetrics\terror")?;
    for result in selected {
        let metrics: Vec<String> = result
            .metrics()
            .iter()
            .map(|m| format!("{}={}", m.key(), m.value()))
            .collect();
        writeln!(
            out,
            "{}\t{}\t{}\t{:.3}\t{}\t{}",
            result.run_id(),
            serde_json::to_value(result.status())?.as_str().unwrap_or_default(),
            result.exit_code().map_or_else(|| "-".to_string(), |c| c.to_string()),
            result.duration_secs(),
            metrics.join(","),
            result.error().unwrap_or_default().replace(['\t', '\n'], " "),
        )?;
    }
    Ok(exit_codes::SUCCESS)
}

fn cmd_validate(config: &BenchConfig) -> anyhow::Result<i32> {
    let schedule = Schedule::from_config(config);
    println!(
        "config ok: {} environments, {} repositories, {} tools, {} problems, {} trials",
        config.environments.len(),
        config.repositories.len(),
        config.tools.len(),
        config.problems.len(),
        config.trials
    );
    for configuration in &schedule {
        println!("{configuration}");
    }
    println!("{} configurations scheduled", schedule.len());
    Ok(exit_codes::SUCCESS)
}
