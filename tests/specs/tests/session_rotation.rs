//! Scenario: the master proactively rotates a minion's session key mid-job
//! and the minion keeps working without a fresh handshake.

use std::time::Duration;

use saltcore_client::config::{GatherModeArg, RunArgs, TargetKindArg};
use saltcore_specs::{wait_until, MasterProcess, MinionProcess};
use saltcore_wire::IdentityFacts;

#[tokio::test(flavor = "multi_thread")]
async fn minion_keeps_returning_after_a_proactive_session_rotation() {
    let master = MasterProcess::start_with_rotation(true, 1).expect("start master");
    master.wait_ready(Duration::from_secs(5)).await.expect("master ready");

    let _minion = MinionProcess::start(&master, "web-01", IdentityFacts::new("web-01")).expect("minion");

    let accepted = wait_until(Duration::from_secs(5), || {
        master
            .key_store()
            .ok()
            .and_then(|s| std::fs::read_dir(s.root().join("accepted")).ok())
            .map(|mut d| d.next().is_some())
            .unwrap_or(false)
    })
    .await;
    assert!(accepted);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let args = RunArgs {
        master_host: "127.0.0.1".to_string(),
        request_port: master.request_port,
        runtime_dir: master.runtime_dir.clone(),
        target: "web-01".to_string(),
        target_kind: TargetKindArg::Glob,
        func: "ping".to_string(),
        args: Vec::new(),
        kwargs: Vec::new(),
        user: "root".to_string(),
        credential: None,
        timeout_secs: 5,
        gather_mode: GatherModeArg::List,
    };

    // First job, before any rotation has happened.
    let first = saltcore_client::job::run(&args).await.expect("first run");
    assert!(first.missing.is_empty());

    // Wait past at least one rotation tick (interval is 1s) plus the
    // minion's round-trip to install the new key and ack it.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Second job, after rotation: the minion must still be reachable and
    // able to seal a return, now under the rotated session key.
    let second = saltcore_client::job::run(&args).await.expect("second run");
    assert!(second.missing.is_empty(), "missing after rotation: {:?}", second.missing);
    assert_eq!(second.returns.len(), 1);
    assert_ne!(first.jid, second.jid);
}
