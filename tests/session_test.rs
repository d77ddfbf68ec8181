//! End-to-end session tests against a fake system (no conda, git, or GP tools)

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{load_config, only_session, FakeSystem};
use gp_bench::experiment::{FsResultsStore, ResultsStore, RunStatus, INDEX_FILE};
use gp_bench::session::{run_session, run_setup, SessionOptions};
use gp_bench::Error;
use tokio_util::sync::CancellationToken;

const THREE_TOOLS: &str = r#"
timeout_secs: 30
environments:
  - name: gp-bench
    manager: conda
    python: "3.10"
    packages:
      - { name: deap, version: 1.4.1 }
repositories:
  - name: tensorgp
    url: https://example.org/TensorGP.git
    target_dir: tools/tensorgp/TensorGP
    revision: 9f8e7d6
    patches:
      - { source: patches/engine.py, dest: src/engine.py }
tools:
  - { name: deap, kind: deap, program: fake-ok, args: [profile.py], environment: gp-bench }
  - { name: tensorgp, kind: tensorgp, program: fake-crash, args: [profile.py] }
  - { name: operon, kind: operon, program: fake-ok }
problems:
  - { name: nicolau_a, params: { max_depth: 7, bin_size: 2 } }
  - { name: nicolau_b, params: { max_depth: 5, bin_size: 1 } }
"#;

fn write_patch(dir: &Path) {
    std::fs::create_dir_all(dir.join("patches")).unwrap();
    std::fs::write(dir.join("patches/engine.py"), "patched\n").unwrap();
}

fn options(session: &str) -> SessionOptions {
    SessionOptions {
        session: Some(session.to_string()),
        skip_setup: false,
    }
}

#[tokio::test]
async fn test_three_tools_two_problems_six_results_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_patch(dir.path());
    let config = load_config(dir.path(), THREE_TOOLS);
    let fake = Arc::new(FakeSystem::default());

    let report = run_session(&config, fake.clone(), options("s1"), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.summary.is_complete());
    assert_eq!(report.summary.recorded, 6);
    assert_eq!(report.summary.succeeded, 4);
    assert_eq!(report.summary.failed, 2);

    let store = FsResultsStore::open_existing(dir.path().join("results/s1")).unwrap();
    let ids: Vec<String> = store.results().iter().map(|r| r.run_id()).collect();
    assert_eq!(
        ids,
        [
            "deap/nicolau_a/trial-0000",
            "deap/nicolau_b/trial-0000",
            "tensorgp/nicolau_a/trial-0000",
            "tensorgp/nicolau_b/trial-0000",
            "operon/nicolau_a/trial-0000",
            "operon/nicolau_b/trial-0000",
        ]
    );
    for result in store.results() {
        let path = store.record_path(result.configuration());
        assert!(path.is_file(), "missing {}", path.display());
    }

    let crashed = store.results_for_tool("tensorgp");
    assert!(crashed.iter().all(|r| r.status() == RunStatus::Failed));
    assert!(crashed[0].error().unwrap().contains("RuntimeError: boom"));

    let deap = store.results_for_configuration("deap", "nicolau_a");
    assert_eq!(deap[0].metrics()[0].key(), "min_avg_runtime");
}

#[tokio::test]
async fn test_adapters_build_tool_command_lines() {
    let dir = tempfile::tempdir().unwrap();
    write_patch(dir.path());
    let config = load_config(dir.path(), THREE_TOOLS);
    let fake = Arc::new(FakeSystem::default());

    run_session(&config, fake.clone(), options("s1"), CancellationToken::new())
        .await
        .unwrap();

    let calls = fake.tool_calls();
    assert_eq!(calls.len(), 6);
    assert!(calls[0].starts_with("conda run --no-capture-output -n gp-bench fake-ok profile.py"));
    assert!(calls[0].ends_with("--bin-size 2 --max-depth 7 --seed 0"));
    assert_eq!(calls[2], "fake-crash profile.py --bin-size 2 --max-depth 7 --seed 0");
    assert_eq!(calls[5], "fake-ok --bin-size=1 --max-depth=5 --seed=0");
}

#[tokio::test]
async fn test_setup_failure_leaves_zero_results() {
    let dir = tempfile::tempdir().unwrap();
    write_patch(dir.path());
    let config = load_config(dir.path(), THREE_TOOLS);
    let fake = Arc::new(FakeSystem {
        conda_missing: true,
        ..FakeSystem::default()
    });

    let err = run_session(&config, fake.clone(), options("s1"), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PackageManagerMissing(ref m) if m == "conda"));
    assert!(err.is_setup());
    assert!(!dir.path().join("results").exists());
    assert!(fake.tool_calls().is_empty());
}

#[tokio::test]
async fn test_missing_patch_source_is_setup_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), THREE_TOOLS);

    let err = run_session(
        &config,
        Arc::new(FakeSystem::default()),
        options("s1"),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::MissingPatchSource(_)));
    assert!(!dir.path().join("results").exists());
}

#[tokio::test]
async fn test_branch_revision_is_setup_error() {
    let dir = tempfile::tempdir().unwrap();
    write_patch(dir.path());
    let yaml = THREE_TOOLS.replace("revision: 9f8e7d6", "revision: stable");
    let config = load_config(dir.path(), &yaml);
    let fake = Arc::new(FakeSystem::default());

    let err = run_session(&config, fake.clone(), options("s1"), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Setup { ref step, .. } if step == "checkout:tensorgp"));
    assert!(fake.tool_calls().is_empty());
    assert!(!dir.path().join("results").exists());
}

#[tokio::test]
async fn test_rerunning_recorded_session_invokes_no_tool() {
    let dir = tempfile::tempdir().unwrap();
    write_patch(dir.path());
    let config = load_config(dir.path(), THREE_TOOLS);
    let fake = Arc::new(FakeSystem::default());
    run_session(&config, fake.clone(), options("s1"), CancellationToken::new())
        .await
        .unwrap();
    let invoked = fake.tool_calls().len();

    let err = run_session(&config, fake.clone(), options("s1"), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AlreadyRecorded(_)));
    assert_eq!(fake.tool_calls().len(), invoked);
    let store = FsResultsStore::open_existing(dir.path().join("results/s1")).unwrap();
    assert_eq!(store.len(), 6);
}

#[tokio::test]
async fn test_skip_setup_runs_no_setup_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), THREE_TOOLS);
    let fake = Arc::new(FakeSystem::default());

    let report = run_session(
        &config,
        fake.clone(),
        SessionOptions {
            session: None,
            skip_setup: true,
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.setup.is_none());
    assert_eq!(report.summary.recorded, 6);
    assert!(fake.calls().iter().all(|c| c.contains("fake-")));
    let session = only_session(dir.path());
    assert!(session.file_name().unwrap().to_string_lossy().starts_with("run-"));
}

#[tokio::test]
async fn test_setup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_patch(dir.path());
    let config = load_config(dir.path(), THREE_TOOLS);
    let fake: Arc<FakeSystem> = Arc::new(FakeSystem::default());
    let checkout = dir.path().join("tools/tensorgp/TensorGP");

    let first = run_setup(&config, fake.clone()).await.unwrap();
    std::fs::write(checkout.join("scratch.txt"), "local edit").unwrap();
    let second = run_setup(&config, fake.clone()).await.unwrap();

    assert_eq!(first.repositories, second.repositories);
    assert!(!checkout.join("scratch.txt").exists());
    assert_eq!(
        std::fs::read_to_string(checkout.join("src/engine.py")).unwrap(),
        "patched\n"
    );
    assert_eq!(second.repositories[0].resolved_commit, "9f8e7d6c5b4a");
}

const WITH_HANG: &str = r"
timeout_secs: 60
tools:
  - { name: deap, kind: deap, program: fake-ok }
  - { name: tensorgp, kind: tensorgp, program: fake-hang }
  - { name: operon, kind: operon, program: fake-ok }
problems:
  - { name: nicolau_a }
";

#[tokio::test(start_paused = true)]
async fn test_timeout_recorded_and_schedule_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), WITH_HANG);

    let report = run_session(
        &config,
        Arc::new(FakeSystem::default()),
        options("s1"),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.recorded, 3);
    assert_eq!(report.summary.timed_out, 1);
    let store = FsResultsStore::open_existing(dir.path().join("results/s1")).unwrap();
    let hung = &store.results_for_tool("tensorgp")[0];
    assert_eq!(hung.status(), RunStatus::TimedOut);
    assert!(!hung.success());
    assert!(store.results_for_tool("operon")[0].success());
}

#[tokio::test]
async fn test_interrupt_keeps_only_completed_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), WITH_HANG);
    let fake = Arc::new(FakeSystem::default());
    let cancel = CancellationToken::new();

    let (report, ()) = tokio::join!(
        run_session(&config, fake.clone(), options("s1"), cancel.clone()),
        async {
            fake.hang_started.notified().await;
            cancel.cancel();
        }
    );
    let report = report.unwrap();

    assert!(report.summary.interrupted);
    assert_eq!(report.summary.recorded, 1);

    let session = dir.path().join("results/s1");
    let store = FsResultsStore::open_existing(&session).unwrap();
    assert_eq!(store.len(), 1);
    assert!(!session.join("tensorgp").exists());
    assert!(!session.join("operon").exists());

    let index = std::fs::read_to_string(session.join(INDEX_FILE)).unwrap();
    assert_eq!(index.lines().count(), 1);
    assert_eq!(fake.tool_calls().len(), 2);
}
