//! The local "runner" seam (§4.8 Supplemented, §9 Design Notes): an explicit
//! trait invoked with an explicit context struct, replacing the original
//! system's injected-globals model. Wiring a real execution module is out of
//! scope (§1); this crate ships one concrete `Runner` used by tests and as a
//! documented extension point.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use saltcore_eventbus::EventBus;
use saltcore_wire::EventMessage;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The opaque payload a runner is asked to execute: a function name plus
/// positional and keyword arguments, exactly as they arrived in the
/// publish's plaintext body.
#[derive(Debug, Clone)]
pub struct RunnerOpts {
    pub func: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: BTreeMap<String, serde_json::Value>,
}

/// A handle a runner uses to emit progress events onto the minion's local
/// event bus while it works, tagged under this job's `jid`.
#[derive(Clone)]
pub struct EventEmitter {
    bus: EventBus,
    jid: String,
}

impl EventEmitter {
    pub fn emit(&self, suffix: &str, data: serde_json::Value) {
        self.bus.publish(EventMessage { tag: format!("exec/{}/{suffix}", self.jid), data, ts: now_unix() });
    }
}

/// A handle to a proxy-minion target this call is running on behalf of.
/// Proxy-minion transports are out of scope (§1); this is a documented
/// extension point only, always `None` in this implementation.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub id: String,
}

/// The explicit per-call context passed to a [`Runner`], replacing the
/// original system's injected-globals ("dunder dictionary") pattern.
pub struct RunnerContext {
    pub opts: RunnerOpts,
    pub event_emitter: EventEmitter,
    pub logger: tracing::Span,
    pub proxy: Option<ProxyTarget>,
}

/// Outcome of one runner invocation.
pub struct RunResult {
    pub success: bool,
    pub result: serde_json::Value,
}

/// The local execution seam. A real implementation would dispatch `func` to
/// one of the execution-module's state/exec functions (out of scope, §1).
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, ctx: RunnerContext) -> RunResult;
}

/// Echoes its first argument back (or all arguments, if more than one) as
/// the result. Used by tests and as the default runner until a real
/// execution module is wired in.
pub struct EchoRunner;

#[async_trait]
impl Runner for EchoRunner {
    async fn run(&self, ctx: RunnerContext) -> RunResult {
        let _entered = ctx.logger.enter();
        ctx.event_emitter.emit("start", serde_json::json!({ "func": ctx.opts.func }));
        let result = match ctx.opts.args.as_slice() {
            [single] => single.clone(),
            many => serde_json::Value::Array(many.to_vec()),
        };
        RunResult { success: true, result }
    }
}

/// One queued unit of work: a publish that matched this minion's target
/// expression, waiting for an executor slot.
pub struct ExecJob {
    pub jid: String,
    pub opts: RunnerOpts,
}

/// Bounds how many executors run concurrently (a `Semaphore`) and how many
/// publishes may queue behind that cap before new ones are dropped with a
/// warning (a bounded channel), per §4.8's concurrency guarantee: the main
/// receive loop never blocks on execution.
pub struct Executor {
    job_tx: mpsc::Sender<ExecJob>,
}

impl Executor {
    pub fn spawn(runner: Arc<dyn Runner>, bus: EventBus, cap: usize, backlog: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel(backlog.max(1));
        let semaphore = Arc::new(Semaphore::new(cap.max(1)));
        tokio::spawn(dispatch_loop(job_rx, runner, bus, semaphore));
        Self { job_tx }
    }

    /// Enqueue a matched publish for execution. Never blocks the caller's
    /// receive loop: if the backlog is full, the job is dropped and a
    /// warning logged.
    pub fn submit(&self, job: ExecJob) {
        if let Err(mpsc::error::TrySendError::Full(job)) = self.job_tx.try_send(job) {
            warn!(jid = %job.jid, "executor backlog full; dropping publish");
        }
    }
}

async fn dispatch_loop(
    mut job_rx: mpsc::Receiver<ExecJob>,
    runner: Arc<dyn Runner>,
    bus: EventBus,
    semaphore: Arc<Semaphore>,
) {
    while let Some(job) = job_rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let runner = runner.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let jid = job.jid.clone();
            let logger = tracing::info_span!("executor", jid = %jid, func = %job.opts.func);
            let ctx = RunnerContext {
                opts: job.opts,
                event_emitter: EventEmitter { bus: bus.clone(), jid: jid.clone() },
                logger,
                proxy: None,
            };
            let outcome = runner.run(ctx).await;
            info!(%jid, success = outcome.success, "executor finished");
            bus.publish(EventMessage {
                tag: format!("exec/{jid}/done"),
                data: serde_json::json!({ "success": outcome.success, "result": outcome.result }),
                ts: now_unix(),
            });
        });
    }
}
