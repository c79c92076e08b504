//! Active-jobs index and the on-disk job cache (§3 Job / Return record,
//! §6 on-disk state, §8 idempotence invariant).
//!
//! The in-memory index is the source of truth for "is this `jid` still
//! active"; the on-disk cache is append-only and exists so a return can be
//! retrieved out-of-band after a client has already timed out (§5
//! Cancellation & timeouts: "late returns ... are still accepted and cached
//! for out-of-band retrieval keyed by `jid`").

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use saltcore_wire::{GatherMode, TargetKind};
use tokio::sync::RwLock;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobRecord {
    pub jid: String,
    pub target_expr: String,
    pub target_kind: TargetKind,
    pub func: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: BTreeMap<String, serde_json::Value>,
    pub user: String,
    pub timeout_secs: u64,
    pub gather_mode: GatherMode,
    /// The minion_ids resolved as targeted at publish time. Fixed for the
    /// life of the job — late joiners never enter this set (§4.9).
    pub targets: Vec<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReturnRecord {
    pub jid: String,
    pub minion_id: String,
    pub success: bool,
    pub payload: serde_json::Value,
    pub received_at: u64,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Random-suffixed, timestamp-prefixed job id. Monotonic in practice since
/// the timestamp dominates; the suffix only disambiguates same-second
/// submissions.
pub fn new_jid() -> String {
    use rand::Rng;
    let suffix: u64 = rand::rng().random();
    format!("{:013}{:016x}", now_unix() * 1000, suffix)
}

pub struct JobsIndex {
    jobs_dir: PathBuf,
    active: RwLock<HashMap<String, Arc<JobRecord>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobsError {
    #[error("jid collision: {0}")]
    JidCollision(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed job record: {0}")]
    Decode(#[from] serde_json::Error),
}

impl JobsIndex {
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Result<Self, JobsError> {
        let jobs_dir = jobs_dir.into();
        std::fs::create_dir_all(&jobs_dir)?;
        Ok(Self { jobs_dir, active: RwLock::new(HashMap::new()) })
    }

    fn job_dir(&self, jid: &str) -> PathBuf {
        self.jobs_dir.join(jid)
    }

    /// Create a new job record. Refuses a duplicate `jid` (§8 idempotence:
    /// re-submitting the same `jid` is a `protocol_violation`); in practice
    /// `jid`s are master-minted so this only fires if the id generator ever
    /// collides.
    pub async fn create(&self, mut record: JobRecord) -> Result<Arc<JobRecord>, JobsError> {
        let mut active = self.active.write().await;
        if active.contains_key(&record.jid) {
            return Err(JobsError::JidCollision(record.jid));
        }
        record.created_at = now_unix();
        let dir = self.job_dir(&record.jid);
        std::fs::create_dir_all(&dir)?;
        let tmp = dir.join("load.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        std::fs::rename(&tmp, dir.join("load"))?;

        let record = Arc::new(record);
        active.insert(record.jid.clone(), record.clone());
        Ok(record)
    }

    pub async fn get(&self, jid: &str) -> Option<Arc<JobRecord>> {
        self.active.read().await.get(jid).cloned()
    }

    /// Persist a return to the per-`jid` cache. Idempotent per
    /// `(jid, minion_id)`: a later call for the same pair overwrites.
    pub fn record_return(&self, record: &ReturnRecord) -> Result<(), JobsError> {
        let dir = self.job_dir(&record.jid).join(&record.minion_id);
        std::fs::create_dir_all(&dir)?;
        let tmp = dir.join("return.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, dir.join("return"))?;
        Ok(())
    }

    /// Snapshot the minion_ids that have a cached return for `jid`, by
    /// listing the job directory. Lock-free by design (§5: "readers are
    /// lock-free by taking a snapshot of the directory listing").
    pub fn returned_minions(&self, jid: &str) -> Result<Vec<String>, JobsError> {
        let dir = self.job_dir(jid);
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if entry.path().join("return").exists() {
                        out.push(name.to_string());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Remove a job from the active index once it is complete or timed
    /// out. The on-disk cache is left for `job_cache_ttl` reaping; it is
    /// deliberately not removed here (late returns must still find it).
    pub async fn deactivate(&self, jid: &str) {
        self.active.write().await.remove(jid);
    }

    /// Reap job cache directories older than `ttl` whose job is no longer
    /// active. Called periodically by a background task.
    pub async fn reap_expired(&self, ttl: std::time::Duration) -> Result<usize, JobsError> {
        let active = self.active.read().await;
        let cutoff = now_unix().saturating_sub(ttl.as_secs());
        let mut reaped = 0;
        for entry in std::fs::read_dir(&self.jobs_dir)? {
            let entry = entry?;
            let Some(jid) = entry.file_name().to_str().map(str::to_string) else { continue };
            if active.contains_key(&jid) {
                continue;
            }
            let load_path = entry.path().join("load");
            let Ok(bytes) = std::fs::read(&load_path) else { continue };
            let Ok(record): Result<JobRecord, _> = serde_json::from_slice(&bytes) else {
                continue;
            };
            if record.created_at < cutoff {
                std::fs::remove_dir_all(entry.path())?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    pub fn root(&self) -> &Path {
        &self.jobs_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(jid: &str) -> JobRecord {
        JobRecord {
            jid: jid.to_string(),
            target_expr: "*".to_string(),
            target_kind: TargetKind::Glob,
            func: "echo".to_string(),
            args: vec![serde_json::json!("hi")],
            kwargs: BTreeMap::new(),
            user: "root".to_string(),
            timeout_secs: 5,
            gather_mode: GatherMode::List,
            targets: vec!["m1".to_string()],
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn creates_and_caches_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = JobsIndex::new(dir.path()).expect("new");
        let job = index.create(sample("jid1")).await.expect("create");
        assert!(dir.path().join("jid1").join("load").exists());
        assert_eq!(index.get("jid1").await.expect("active").jid, job.jid);
    }

    #[tokio::test]
    async fn duplicate_jid_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = JobsIndex::new(dir.path()).expect("new");
        index.create(sample("jid1")).await.expect("first");
        let err = index.create(sample("jid1")).await.unwrap_err();
        assert!(matches!(err, JobsError::JidCollision(_)));
    }

    #[tokio::test]
    async fn records_and_lists_returns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = JobsIndex::new(dir.path()).expect("new");
        index.create(sample("jid1")).await.expect("create");
        index
            .record_return(&ReturnRecord {
                jid: "jid1".to_string(),
                minion_id: "m1".to_string(),
                success: true,
                payload: serde_json::json!("hi"),
                received_at: 0,
            })
            .expect("record");
        let returned = index.returned_minions("jid1").expect("list");
        assert_eq!(returned, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn deactivated_job_is_still_reachable_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = JobsIndex::new(dir.path()).expect("new");
        index.create(sample("jid1")).await.expect("create");
        index.deactivate("jid1").await;
        assert!(index.get("jid1").await.is_none());
        assert!(dir.path().join("jid1").join("load").exists());
    }
}
