//! End-to-end scenarios against real `saltcore-master`/`saltcore-minion`
//! subprocesses, driven through the same `saltcore-client` job tracker the
//! `saltcore` CLI uses.

use std::time::Duration;

use saltcore_client::config::{GatherModeArg, RunArgs, TargetKindArg};
use saltcore_specs::{wait_until, FakeMinion, MasterProcess, MinionProcess};
use saltcore_wire::IdentityFacts;

fn run_args(master: &MasterProcess, target: &str, target_kind: TargetKindArg, func: &str) -> RunArgs {
    RunArgs {
        master_host: "127.0.0.1".to_string(),
        request_port: master.request_port,
        runtime_dir: master.runtime_dir.clone(),
        target: target.to_string(),
        target_kind,
        func: func.to_string(),
        args: Vec::new(),
        kwargs: Vec::new(),
        user: "root".to_string(),
        credential: None,
        timeout_secs: 5,
        gather_mode: GatherModeArg::List,
    }
}

fn accepted_count(master: &MasterProcess) -> usize {
    master
        .key_store()
        .ok()
        .and_then(|s| std::fs::read_dir(s.root().join("accepted")).ok())
        .map(|d| d.count())
        .unwrap_or(0)
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_one_minion_returns_its_result() {
    let master = MasterProcess::start(true).expect("start master");
    master.wait_ready(Duration::from_secs(5)).await.expect("master ready");

    let _minion = MinionProcess::start(&master, "web-01", IdentityFacts::new("web-01")).expect("start minion");

    assert!(wait_until(Duration::from_secs(5), || accepted_count(&master) >= 1).await, "minion key never accepted under open_mode");
    // Give the minion a moment to announce on the publisher connection
    // after its key becomes visible as accepted.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let args = run_args(&master, "web-01", TargetKindArg::Glob, "ping");
    let outcome = saltcore_client::job::run(&args).await.expect("run");
    assert!(outcome.missing.is_empty(), "missing: {:?}", outcome.missing);
    assert_eq!(outcome.returns.len(), 1);
    assert!(outcome.returns.contains_key("web-01"));
}

#[tokio::test(flavor = "multi_thread")]
async fn wildcard_target_reaches_two_minions() {
    let master = MasterProcess::start(true).expect("start master");
    master.wait_ready(Duration::from_secs(5)).await.expect("master ready");

    let _m1 = MinionProcess::start(&master, "web-01", IdentityFacts::new("web-01")).expect("m1");
    let _m2 = MinionProcess::start(&master, "web-02", IdentityFacts::new("web-02")).expect("m2");

    assert!(wait_until(Duration::from_secs(5), || accepted_count(&master) >= 2).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let args = run_args(&master, "web-*", TargetKindArg::Glob, "ping");
    let outcome = saltcore_client::job::run(&args).await.expect("run");
    assert!(outcome.missing.is_empty(), "missing: {:?}", outcome.missing);
    assert_eq!(outcome.returns.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_timeout_reports_the_minion_that_never_answers() {
    let master = MasterProcess::start(true).expect("start master");
    master.wait_ready(Duration::from_secs(5)).await.expect("master ready");

    let _m1 = MinionProcess::start(&master, "web-01", IdentityFacts::new("web-01")).expect("m1");
    // web-02 is a fake minion: authenticated and announced so it is a
    // targetable connected peer, but it never answers a submitted job,
    // exercising the gather-mode `missing` path deterministically.
    let _m2 = FakeMinion::connect(&master, "web-02").await.expect("fake minion connect");

    assert!(wait_until(Duration::from_secs(5), || accepted_count(&master) >= 2).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut args = run_args(&master, "web-*", TargetKindArg::Glob, "ping");
    args.timeout_secs = 2;
    let outcome = saltcore_client::job::run(&args).await.expect("run");
    assert_eq!(outcome.missing, vec!["web-02".to_string()]);
    assert_eq!(outcome.returns.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_key_halts_the_minion() {
    let master = MasterProcess::start(false).expect("start master");
    master.wait_ready(Duration::from_secs(5)).await.expect("master ready");

    let mut minion =
        MinionProcess::start(&master, "quarantine-01", IdentityFacts::new("quarantine-01")).expect("minion");

    let pending = wait_until(Duration::from_secs(5), || {
        master
            .key_store()
            .ok()
            .and_then(|s| std::fs::read_dir(s.root().join("pending")).ok())
            .map(|mut d| d.next().is_some())
            .unwrap_or(false)
    })
    .await;
    assert!(pending, "minion never registered as pending");

    let store = master.key_store().expect("store");
    store.reject("quarantine-01").await.expect("reject");

    let halted = wait_until(Duration::from_secs(5), || minion.is_running().map(|r| !r).unwrap_or(false)).await;
    assert!(halted, "minion kept running after its key was rejected");
}
