//! Test harness for end-to-end binary scenarios.
//!
//! Spawns the real `saltcore-master` and `saltcore-minion` binaries as
//! subprocesses, wired to per-test temporary directories, and exercises
//! them through the `saltcore-client` library (the same code path the
//! `saltcore` CLI uses).

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use saltcore_crypto::session::SessionKeyState;
use saltcore_crypto::{EphemeralAgreement, SigningKeyPair};
use saltcore_wire::{AuthRequest, AuthResponse, Frame, FrameTransport, IdentityFacts, KeyBundle, Payload};
use tokio::net::TcpStream;

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn workspace_binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

/// A running `saltcore-master` process, torn down on drop.
pub struct MasterProcess {
    child: Child,
    pub publish_port: u16,
    pub request_port: u16,
    pub keys_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub runtime_dir: PathBuf,
    _root: tempfile::TempDir,
}

impl MasterProcess {
    /// Start a master with open_mode toggled; every directory it needs
    /// lives under a fresh tempdir so concurrent tests never collide.
    pub fn start(open_mode: bool) -> anyhow::Result<Self> {
        Self::start_with_rotation(open_mode, 0)
    }

    /// Like `start`, but also sets `session_rotate_interval` (seconds; `0`
    /// disables proactive rotation).
    pub fn start_with_rotation(open_mode: bool, session_rotate_interval_secs: u64) -> anyhow::Result<Self> {
        let root = tempfile::tempdir()?;
        let keys_dir = root.path().join("keys");
        let jobs_dir = root.path().join("jobs");
        let runtime_dir = root.path().join("run");
        let publish_port = free_port()?;
        let request_port = free_port()?;

        let binary = workspace_binary("saltcore-master");
        anyhow::ensure!(binary.exists(), "saltcore-master binary not found at {}", binary.display());

        let child = Command::new(&binary)
            .env("SALTCORE_MASTER_HOST", "127.0.0.1")
            .env("SALTCORE_MASTER_PUBLISH_PORT", publish_port.to_string())
            .env("SALTCORE_MASTER_REQUEST_PORT", request_port.to_string())
            .env("SALTCORE_MASTER_KEYS_DIR", &keys_dir)
            .env("SALTCORE_MASTER_JOBS_DIR", &jobs_dir)
            .env("SALTCORE_MASTER_RUNTIME_DIR", &runtime_dir)
            .env("SALTCORE_MASTER_OPEN_MODE", open_mode.to_string())
            .env("SALTCORE_MASTER_SESSION_ROTATE_INTERVAL", session_rotate_interval_secs.to_string())
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, publish_port, request_port, keys_dir, jobs_dir, runtime_dir, _root: root })
    }

    pub fn request_addr(&self) -> String {
        format!("127.0.0.1:{}", self.request_port)
    }

    pub fn publish_addr(&self) -> String {
        format!("127.0.0.1:{}", self.publish_port)
    }

    pub fn events_socket_path(&self) -> PathBuf {
        self.runtime_dir.join("events.sock")
    }

    /// Block until the request port accepts connections and the events
    /// socket exists.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("master did not become ready within {timeout:?}");
            }
            if TcpStream::connect(self.request_addr()).await.is_ok() && self.events_socket_path().exists() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn key_store(&self) -> anyhow::Result<saltcore_crypto::KeyStore> {
        Ok(saltcore_crypto::KeyStore::new(&self.keys_dir)?)
    }
}

impl Drop for MasterProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A running `saltcore-minion` process, torn down on drop.
pub struct MinionProcess {
    child: Child,
    pub minion_id: String,
    _root: tempfile::TempDir,
}

impl MinionProcess {
    /// Start a minion pointed at `master`, identified by `minion_id`, with
    /// the given identity facts (roles/attrs) for target matching.
    pub fn start(master: &MasterProcess, minion_id: &str, facts: IdentityFacts) -> anyhow::Result<Self> {
        let root = tempfile::tempdir()?;
        let state_dir = root.path().join("state");
        std::fs::create_dir_all(&state_dir)?;
        let facts_path = root.path().join("facts.json");
        std::fs::write(&facts_path, serde_json::to_vec(&facts)?)?;

        let binary = workspace_binary("saltcore-minion");
        anyhow::ensure!(binary.exists(), "saltcore-minion binary not found at {}", binary.display());

        let child = Command::new(&binary)
            .env("SALTCORE_MINION_ID", minion_id)
            .env("SALTCORE_MASTER_HOST", "127.0.0.1")
            .env("SALTCORE_MASTER_PUBLISH_PORT", master.publish_port.to_string())
            .env("SALTCORE_MASTER_REQUEST_PORT", master.request_port.to_string())
            .env("SALTCORE_MINION_STATE_DIR", &state_dir)
            .env("SALTCORE_MINION_FACTS_FILE", &facts_path)
            .env("SALTCORE_MINION_AUTH_BACKOFF_INITIAL_MS", "100")
            .env("SALTCORE_MINION_AUTH_BACKOFF_MAX_MS", "500")
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, minion_id: minion_id.to_string(), _root: root })
    }

    pub fn is_running(&mut self) -> anyhow::Result<bool> {
        Ok(self.child.try_wait()?.is_none())
    }
}

impl Drop for MinionProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A minion driven directly through `saltcore-crypto`/`saltcore-wire`
/// rather than the real `saltcore-minion` binary, for tests that need to
/// forge protocol-level misbehavior (e.g. replaying a return) that a
/// well-behaved minion would never produce. Holds both the request and
/// publisher connections open for the caller's lifetime, so the master
/// keeps treating it as connected for target resolution.
pub struct FakeMinion {
    pub minion_id: String,
    pub request_stream: TcpStream,
    pub publisher_stream: TcpStream,
    pub session: SessionKeyState,
}

impl FakeMinion {
    /// Register (and accept) a fresh identity, complete the auth
    /// handshake, then announce on the publisher connection so the target
    /// resolver counts this minion_id as connected.
    pub async fn connect(master: &MasterProcess, minion_id: &str) -> anyhow::Result<Self> {
        let signing = SigningKeyPair::generate()?;
        master.key_store()?.register_minion_key(minion_id, &signing.public_key_bytes()).await?;
        master.key_store()?.accept(minion_id).await?;

        let mut request_stream = TcpStream::connect(master.request_addr()).await?;
        let agreement = EphemeralAgreement::generate()?;
        let request = AuthRequest {
            minion_id: minion_id.to_string(),
            signing_public_key: signing.public_key_bytes(),
            encryption_public_key: agreement.public_key_bytes.clone(),
            token: None,
        };
        FrameTransport::send(&mut request_stream, &Frame::new(Payload::AuthRequest(request))).await?;
        let frame = FrameTransport::recv(&mut request_stream)
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))?;
        let Payload::AuthResponse(AuthResponse::Accepted {
            session_key_id,
            master_ephemeral_public_key,
            sealed_keys,
            ..
        }) = frame.payload
        else {
            anyhow::bail!("expected auth_response accepted");
        };

        let sealing_key = agreement.derive_sealing_key(&master_ephemeral_public_key, b"saltcore-auth-accept")?;
        let plaintext = saltcore_crypto::open_sealed_box(&sealing_key, &sealed_keys)?;
        let bundle: KeyBundle = serde_json::from_slice(&plaintext)?;
        let raw: [u8; 32] = bundle.session_key.as_slice().try_into()?;
        let session = SessionKeyState::new(session_key_id.clone(), raw);

        let mut publisher_stream = TcpStream::connect(master.publish_addr()).await?;
        let signable = format!("{minion_id}:{session_key_id}");
        let announce = saltcore_wire::Announce {
            minion_id: minion_id.to_string(),
            session_key_id,
            facts: IdentityFacts::new(minion_id),
            signature: signing.sign(signable.as_bytes()),
        };
        FrameTransport::send(&mut publisher_stream, &Frame::new(Payload::Announce(announce))).await?;

        Ok(Self { minion_id: minion_id.to_string(), request_stream, publisher_stream, session })
    }

    /// Seal and send a `return` frame with an explicit nonce, so callers
    /// can construct replays.
    pub async fn send_raw_return(
        &mut self,
        jid: &str,
        nonce: u64,
        ciphertext: Vec<u8>,
    ) -> anyhow::Result<()> {
        let envelope = saltcore_wire::ReturnEnvelope {
            jid: jid.to_string(),
            minion_id: self.minion_id.clone(),
            key_id: self.session.key_id.clone(),
            ciphertext,
        };
        let frame = Frame::new(Payload::Return(envelope)).with_nonce(nonce);
        FrameTransport::send(&mut self.request_stream, &frame).await?;
        Ok(())
    }
}

/// Poll a predicate until it is true or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
