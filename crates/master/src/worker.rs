//! Worker pool (§4.6): stateless handlers for auth, publish (submit), and
//! return frames. Workers share no in-memory state of their own — all
//! coordination goes through `MasterState`'s registries, key store, job
//! index, and event bus.
//!
//! A panicking worker must not corrupt its siblings and must not stop
//! accepting new work (§4.6, §5): each worker's receive loop runs inside a
//! supervised task that respawns it on panic, losing only the one in-flight
//! request, exactly as a restarted worker *process* would in the
//! multi-process design this collapses onto a single OS process (§5
//! Implementation note).

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use saltcore_crypto::session::Direction;
use saltcore_wire::{
    AuthRequest, AuthResponse, EventMessage, Frame, Payload, PublishBody, PublishEnvelope,
    ReturnBody, ReturnEnvelope, SubmitRequest, SubmitResponse,
};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, warn};

use crate::error::MasterError;
use crate::jobs::{new_jid, JobRecord, ReturnRecord};
use crate::state::MasterState;

/// One unit of work handed from a request-server connection to a worker.
pub enum WorkItem {
    Auth { request: AuthRequest, reply: oneshot::Sender<AuthResponse> },
    Submit { request: SubmitRequest, reply: oneshot::Sender<SubmitResponse> },
    Return { envelope: ReturnEnvelope, nonce: u64 },
    SessionRotateAck { minion_id: String },
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Fixed-size, supervised worker pool. `dispatch` fans work out on a
/// round-robin basis across the slots (§4.5); each slot's channel is
/// recreated transparently if its worker task panics.
pub struct WorkerPool {
    slots: Vec<Arc<RwLock<mpsc::Sender<WorkItem>>>>,
    next: AtomicUsize,
}

impl WorkerPool {
    pub fn spawn(count: usize, state: Arc<MasterState>, queue_capacity: usize) -> Arc<Self> {
        let count = count.max(1);
        let capacity = queue_capacity.max(1);
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = mpsc::channel(capacity);
            let slot = Arc::new(RwLock::new(tx));
            tokio::spawn(supervise(index, slot.clone(), rx, capacity, state.clone()));
            slots.push(slot);
        }
        Arc::new(Self { slots, next: AtomicUsize::new(0) })
    }

    /// Hand one unit of work to the next worker slot in round-robin order.
    pub async fn dispatch(&self, item: WorkItem) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let sender = self.slots[index].read().await.clone();
        if sender.send(item).await.is_err() {
            // The slot's worker task is between a panic and its respawn;
            // the caller (a request-server connection) treats this exactly
            // like any other lost in-flight request.
            warn!(index, "worker slot channel closed momentarily; dropping request");
        }
    }
}

/// Supervise one worker slot: run the worker loop, and if it panics,
/// recreate its channel (so `dispatch` always has somewhere to send) and
/// start a fresh loop. Only the in-flight request is lost, per §4.6.
async fn supervise(
    index: usize,
    slot: Arc<RwLock<mpsc::Sender<WorkItem>>>,
    mut rx: mpsc::Receiver<WorkItem>,
    queue_capacity: usize,
    state: Arc<MasterState>,
) {
    loop {
        let outcome = AssertUnwindSafe(worker_loop(&mut rx, &state)).catch_unwind().await;
        match outcome {
            Ok(()) => {
                // The channel closed because the pool itself is shutting
                // down (all senders dropped); nothing to respawn.
                return;
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(index, %message, "worker panicked; restarting with a fresh queue");
                let (tx, new_rx) = mpsc::channel(queue_capacity);
                *slot.write().await = tx;
                rx = new_rx;
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Runs until the channel closes (graceful shutdown). Each iteration
/// processes exactly one item; a panic inside unwinds out of this function
/// and is caught by `supervise`.
async fn worker_loop(rx: &mut mpsc::Receiver<WorkItem>, state: &Arc<MasterState>) {
    while let Some(item) = rx.recv().await {
        match item {
            WorkItem::Auth { request, reply } => {
                let response = handle_auth(&request, state).await;
                let _ = reply.send(response);
            }
            WorkItem::Submit { request, reply } => {
                let response = handle_submit(&request, state).await;
                let _ = reply.send(response);
            }
            WorkItem::Return { envelope, nonce } => {
                handle_return(&envelope, nonce, state).await;
            }
            WorkItem::SessionRotateAck { minion_id } => {
                state.sessions.clear_previous(&minion_id).await;
            }
        }
    }
}

async fn handle_auth(request: &AuthRequest, state: &Arc<MasterState>) -> AuthResponse {
    let result = crate::auth::handle_auth_request(
        request,
        &state.master_keys.public_key_bytes(),
        &state.key_store,
        &state.sessions,
        &state.publish_keys,
        state.config.open_mode,
    )
    .await;
    match result {
        Ok(response) => response,
        Err(err) => {
            error!(minion_id = %request.minion_id, %err, "auth handshake failed");
            AuthResponse::Denied
        }
    }
}

async fn handle_submit(request: &SubmitRequest, state: &Arc<MasterState>) -> SubmitResponse {
    if let Some(expected) = &state.config.auth_token {
        if request.credential.as_deref() != Some(expected.as_str()) {
            let err = MasterError::UnauthorizedPublish(format!("user {} presented no or the wrong credential", request.user));
            warn!(user = %request.user, %err, "rejecting submit");
            return SubmitResponse::Rejected { reason: err.as_protocol_reason().to_string() };
        }
    }

    let targets: Vec<String> = state
        .connected
        .snapshot()
        .await
        .into_iter()
        .filter(|(_, facts)| saltcore_wire::matches(request.target_kind, &request.target_expr, facts))
        .map(|(id, _)| id)
        .collect();

    let jid = new_jid();
    let body = PublishBody {
        target_expr: request.target_expr.clone(),
        target_kind: request.target_kind,
        func: request.func.clone(),
        args: request.args.clone(),
        kwargs: request.kwargs.clone(),
        ttl: request.timeout_secs,
    };
    let plaintext = match serde_json::to_vec(&body) {
        Ok(bytes) => bytes,
        Err(err) => return SubmitResponse::Rejected { reason: format!("encode error: {err}") },
    };

    let publish_key = state.publish_keys.current().await;
    let (ciphertext, nonce) = match publish_key.seal(Direction::MasterToMinion, &plaintext) {
        Ok(sealed) => sealed,
        Err(err) => return SubmitResponse::Rejected { reason: format!("seal error: {err}") },
    };
    let envelope = PublishEnvelope { jid: jid.clone(), key_id: publish_key.key_id.clone(), ciphertext };
    let mut frame = Frame::new(Payload::Publish(envelope)).with_nonce(nonce);
    match frame.signable_bytes() {
        Ok(signable) => frame = frame.with_signature(state.master_keys.sign(&signable)),
        Err(err) => return SubmitResponse::Rejected { reason: format!("encode error: {err}") },
    }

    let record = JobRecord {
        jid: jid.clone(),
        target_expr: request.target_expr.clone(),
        target_kind: request.target_kind,
        func: request.func.clone(),
        args: request.args.clone(),
        kwargs: request.kwargs.clone(),
        user: request.user.clone(),
        timeout_secs: request.timeout_secs,
        gather_mode: request.gather_mode,
        targets: targets.clone(),
        created_at: 0,
    };
    if let Err(err) = state.jobs.create(record).await {
        return SubmitResponse::Rejected { reason: err.to_string() };
    }

    // §5 ordering guarantee: the `new` event precedes any `ret` event for
    // this jid, which holds here because nothing downstream can produce a
    // return before the envelope below has even been broadcast.
    state.events.publish(EventMessage {
        tag: format!("{jid}/new"),
        data: serde_json::json!({ "targets": targets }),
        ts: now_unix(),
    });
    state.publish_bus.broadcast(frame);

    SubmitResponse::Accepted { jid, targets }
}

async fn handle_return(envelope: &ReturnEnvelope, nonce: u64, state: &Arc<MasterState>) {
    let opened =
        state.sessions.open_for(&envelope.minion_id, &envelope.key_id, nonce, &envelope.ciphertext).await;
    let plaintext = match opened {
        Ok(plaintext) => plaintext,
        Err(saltcore_crypto::CryptoError::Replay) => {
            warn!(minion_id = %envelope.minion_id, jid = %envelope.jid, "replay detected on return; rotating session key");
            if let Err(err) = state.sessions.rotate(&envelope.minion_id).await {
                error!(minion_id = %envelope.minion_id, %err, "failed to rotate session key after replay");
            }
            state.events.publish(EventMessage {
                tag: format!("system/replay/{}", envelope.minion_id),
                data: serde_json::json!({ "jid": envelope.jid }),
                ts: now_unix(),
            });
            return;
        }
        Err(err) => {
            warn!(minion_id = %envelope.minion_id, jid = %envelope.jid, %err, "dropping unverifiable return");
            return;
        }
    };

    let body: ReturnBody = match serde_json::from_slice(&plaintext) {
        Ok(body) => body,
        Err(err) => {
            warn!(minion_id = %envelope.minion_id, %err, "dropping malformed return body");
            return;
        }
    };

    let record = ReturnRecord {
        jid: envelope.jid.clone(),
        minion_id: envelope.minion_id.clone(),
        success: body.success,
        payload: body.result.clone(),
        received_at: now_unix(),
    };
    if let Err(err) = state.jobs.record_return(&record) {
        error!(jid = %envelope.jid, %err, "failed to persist return");
        return;
    }

    state.events.publish(EventMessage {
        tag: format!("{}/ret/{}", envelope.jid, envelope.minion_id),
        data: serde_json::json!({ "success": body.success, "result": body.result }),
        ts: now_unix(),
    });
}
