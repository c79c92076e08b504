//! Minion configuration. Every flag has an env-var fallback, matching the
//! master's config surface.

use std::path::PathBuf;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "saltcore-minion")]
pub struct MinionConfig {
    /// This minion's stable identity. Generated once and cached under
    /// `state_dir` if not given.
    #[arg(long, env = "SALTCORE_MINION_ID")]
    pub minion_id: Option<String>,

    /// Host the master's publisher and request server are bound on.
    #[arg(long, default_value = "127.0.0.1", env = "SALTCORE_MASTER_HOST")]
    pub master_host: String,

    #[arg(long, default_value_t = 4505, env = "SALTCORE_MASTER_PUBLISH_PORT")]
    pub publish_port: u16,

    #[arg(long, default_value_t = 4506, env = "SALTCORE_MASTER_REQUEST_PORT")]
    pub request_port: u16,

    /// Directory holding this minion's signing identity and the cached
    /// master public key (trust-on-first-use).
    #[arg(long, default_value = "./saltcore-run/minion", env = "SALTCORE_MINION_STATE_DIR")]
    pub state_dir: PathBuf,

    /// Optional JSON file of `IdentityFacts` (`{id, roles, attrs}`) this
    /// minion evaluates target expressions against. Defaults to
    /// `{id: minion_id}` with no roles or attrs.
    #[arg(long, env = "SALTCORE_MINION_FACTS_FILE")]
    pub facts_file: Option<PathBuf>,

    /// Bearer token presented on `auth_request`, if the master requires one.
    #[arg(long, env = "SALTCORE_MINION_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Initial auth retry backoff, in milliseconds.
    #[arg(long, default_value_t = 500, env = "SALTCORE_MINION_AUTH_BACKOFF_INITIAL_MS")]
    pub auth_backoff_initial_ms: u64,

    /// Ceiling on the auth retry backoff, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "SALTCORE_MINION_AUTH_BACKOFF_MAX_MS")]
    pub auth_backoff_max_ms: u64,

    /// Maximum number of publish executors running concurrently.
    #[arg(long, default_value_t = 16, env = "SALTCORE_MINION_EXECUTOR_CAP")]
    pub executor_cap: usize,

    /// Bound on queued-but-not-yet-running publishes before new ones are
    /// dropped with a warning.
    #[arg(long, default_value_t = 256, env = "SALTCORE_MINION_EXECUTOR_BACKLOG")]
    pub executor_backlog: usize,

    /// Per-socket read timeout in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "SALTCORE_MINION_SOCKET_READ_TIMEOUT_MS")]
    pub socket_read_timeout_ms: u64,

    /// Per-socket write timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "SALTCORE_MINION_SOCKET_WRITE_TIMEOUT_MS")]
    pub socket_write_timeout_ms: u64,
}

impl MinionConfig {
    pub fn publish_addr(&self) -> String {
        format!("{}:{}", self.master_host, self.publish_port)
    }

    pub fn request_addr(&self) -> String {
        format!("{}:{}", self.master_host, self.request_port)
    }

    pub fn socket_read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.socket_read_timeout_ms)
    }

    pub fn socket_write_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.socket_write_timeout_ms)
    }

    pub fn auth_backoff_initial(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.auth_backoff_initial_ms)
    }

    pub fn auth_backoff_max(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.auth_backoff_max_ms)
    }

    pub fn identity_key_path(&self) -> PathBuf {
        self.state_dir.join("identity.pk8")
    }

    pub fn master_pubkey_cache_path(&self) -> PathBuf {
        self.state_dir.join("master.pub")
    }

    pub fn minion_id_path(&self) -> PathBuf {
        self.state_dir.join("minion_id")
    }
}
