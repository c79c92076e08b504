//! `saltcore keys` admin subcommand (§6): operates directly on the
//! on-disk key store the master reads and writes, with no network
//! round-trip, mirroring how `salt-key` is a peer of the master rather
//! than a client of it.

use saltcore_crypto::keystore::{KeyState, KeyStore};

use crate::config::{KeysAction, KeysArgs};
use crate::error::ClientError;

pub async fn run(args: &KeysArgs) -> Result<(), ClientError> {
    let store = KeyStore::new(&args.keys_dir)?;
    match &args.action {
        KeysAction::List => list(&store).await,
        KeysAction::Accept { minion_id } => {
            let record = store.accept(minion_id).await?;
            println!("accepted {} ({})", record.minion_id, record.fingerprint);
            Ok(())
        }
        KeysAction::Reject { minion_id } => {
            let record = store.reject(minion_id).await?;
            println!("rejected {} ({})", record.minion_id, record.fingerprint);
            Ok(())
        }
        KeysAction::Delete { minion_id } => {
            store.delete(minion_id).await?;
            println!("deleted {minion_id}");
            Ok(())
        }
    }
}

async fn list(store: &KeyStore) -> Result<(), ClientError> {
    for state in [KeyState::Pending, KeyState::Accepted, KeyState::Rejected, KeyState::Denied] {
        let records = store.list(state).await?;
        println!("{state:?}:");
        for record in records {
            println!("  {} ({})", record.minion_id, record.fingerprint);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeysAction;

    fn args(dir: &tempfile::TempDir, action: KeysAction) -> KeysArgs {
        KeysArgs { keys_dir: dir.path().to_path_buf(), action }
    }

    #[tokio::test]
    async fn accept_reject_delete_operate_on_the_same_store_the_master_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KeyStore::new(dir.path()).expect("new");
        store.register_minion_key("web-01", b"pubkey").await.expect("register");

        run(&args(&dir, KeysAction::Accept { minion_id: "web-01".to_string() })).await.expect("accept");
        let found = store.find("web-01").await.expect("find").expect("present");
        assert_eq!(found.state, KeyState::Accepted);

        run(&args(&dir, KeysAction::Reject { minion_id: "web-01".to_string() })).await.expect("reject");
        let found = store.find("web-01").await.expect("find").expect("present");
        assert_eq!(found.state, KeyState::Rejected);

        run(&args(&dir, KeysAction::Delete { minion_id: "web-01".to_string() })).await.expect("delete");
        assert!(store.find("web-01").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn list_succeeds_on_an_empty_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        run(&args(&dir, KeysAction::List)).await.expect("list");
    }
}
