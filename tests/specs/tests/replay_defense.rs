//! Scenario: a byte-for-byte replayed `return` frame is rejected and
//! triggers an immediate session-key rotation plus a `system/replay/...`
//! event, rather than being recorded as a second return.

use std::time::Duration;

use saltcore_crypto::session::Direction;
use saltcore_specs::{FakeMinion, MasterProcess};
use saltcore_wire::ReturnBody;

#[tokio::test(flavor = "multi_thread")]
async fn replayed_return_is_rejected_and_emits_a_system_replay_event() {
    let master = MasterProcess::start(true).expect("start master");
    master.wait_ready(Duration::from_secs(5)).await.expect("master ready");

    let mut minion = FakeMinion::connect(&master, "replay-01").await.expect("fake minion connect");

    let mut events = saltcore_client::events_client::subscribe(&master.events_socket_path(), "system/replay")
        .await
        .expect("subscribe");

    let body = ReturnBody { success: true, result: serde_json::json!("pong") };
    let plaintext = serde_json::to_vec(&body).expect("encode");
    let (ciphertext, nonce) = minion.session.seal(Direction::MinionToMaster, &plaintext).expect("seal");

    minion.send_raw_return("manual-replay-test", nonce, ciphertext.clone()).await.expect("first return");
    // Give the master a moment to process the first (legitimate) return
    // before the replay arrives, so ordering is unambiguous.
    tokio::time::sleep(Duration::from_millis(200)).await;
    minion.send_raw_return("manual-replay-test", nonce, ciphertext).await.expect("replayed return");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for system/replay event")
        .expect("event channel closed");
    assert_eq!(event.tag, "system/replay/replay-01");
    assert_eq!(event.data["jid"], serde_json::json!("manual-replay-test"));
}
