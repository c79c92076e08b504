//! Master configuration. Every flag has an env-var fallback, matching how
//! the reference mux binary builds its config surface.

use std::path::PathBuf;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "saltcore-master")]
pub struct MasterConfig {
    /// Host to bind both the publisher and request server on.
    #[arg(long, default_value = "127.0.0.1", env = "SALTCORE_MASTER_HOST")]
    pub host: String,

    /// TCP port the publisher binds (minion subscriptions).
    #[arg(long, default_value_t = 4505, env = "SALTCORE_MASTER_PUBLISH_PORT")]
    pub publish_port: u16,

    /// TCP port the request server binds (auth, returns, client submits).
    #[arg(long, default_value_t = 4506, env = "SALTCORE_MASTER_REQUEST_PORT")]
    pub request_port: u16,

    /// Size of the worker pool. Clamped to a minimum of 1.
    #[arg(long, default_value_t = 4, env = "SALTCORE_MASTER_WORKER_COUNT")]
    pub worker_count: usize,

    /// Auto-accept every pending minion key. Unsafe; test beds only.
    #[arg(long, default_value_t = false, env = "SALTCORE_MASTER_OPEN_MODE")]
    pub open_mode: bool,

    /// Seconds between proactive session-key rotations. 0 disables.
    #[arg(long, default_value_t = 0, env = "SALTCORE_MASTER_SESSION_ROTATE_INTERVAL")]
    pub session_rotate_interval: u64,

    /// Maximum simultaneous publisher connections; excess are refused.
    #[arg(long, default_value_t = 4096, env = "SALTCORE_MASTER_PUB_MAX_CONNECTIONS")]
    pub pub_max_connections: usize,

    /// Seconds after job completion before its cache entry may be reaped.
    #[arg(long, default_value_t = 86_400, env = "SALTCORE_MASTER_JOB_CACHE_TTL")]
    pub job_cache_ttl: u64,

    /// Shared credential a local client must present on `submit_request` to
    /// pass authorization. `None` (the default) accepts any credential;
    /// operators wanting real access control set this.
    #[arg(long, env = "SALTCORE_MASTER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Root directory for the on-disk key store.
    #[arg(long, default_value = "./saltcore-run/keys", env = "SALTCORE_MASTER_KEYS_DIR")]
    pub keys_dir: PathBuf,

    /// Root directory for the on-disk job cache.
    #[arg(long, default_value = "./saltcore-run/jobs", env = "SALTCORE_MASTER_JOBS_DIR")]
    pub jobs_dir: PathBuf,

    /// Directory for local IPC sockets (the event-bus egress socket).
    #[arg(long, default_value = "./saltcore-run/run", env = "SALTCORE_MASTER_RUNTIME_DIR")]
    pub runtime_dir: PathBuf,

    /// Per-socket read timeout in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "SALTCORE_MASTER_SOCKET_READ_TIMEOUT_MS")]
    pub socket_read_timeout_ms: u64,

    /// Per-socket write timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "SALTCORE_MASTER_SOCKET_WRITE_TIMEOUT_MS")]
    pub socket_write_timeout_ms: u64,

    /// Bound on each publisher connection's outbound send queue.
    #[arg(long, default_value_t = 256, env = "SALTCORE_MASTER_PUBLISHER_SEND_QUEUE_CAPACITY")]
    pub publisher_send_queue_capacity: usize,

    /// Backlog bound for the in-process event bus.
    #[arg(long, default_value_t = 1024, env = "SALTCORE_MASTER_EVENT_BUS_BACKLOG")]
    pub event_bus_backlog: usize,
}

impl MasterConfig {
    pub fn publish_addr(&self) -> String {
        format!("{}:{}", self.host, self.publish_port)
    }

    pub fn request_addr(&self) -> String {
        format!("{}:{}", self.host, self.request_port)
    }

    pub fn socket_read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.socket_read_timeout_ms)
    }

    pub fn socket_write_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.socket_write_timeout_ms)
    }

    pub fn session_rotate_interval(&self) -> Option<std::time::Duration> {
        if self.session_rotate_interval == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(self.session_rotate_interval))
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.max(1)
    }

    pub fn events_socket_path(&self) -> PathBuf {
        self.runtime_dir.join("events.sock")
    }
}
