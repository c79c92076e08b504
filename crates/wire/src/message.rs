//! Wire message types.
//!
//! A [`Frame`] is the `{kind, body, signature?, nonce?}` structure from the
//! wire spec: `kind`/`body` come from the adjacently-tagged [`Payload`] enum,
//! `signature` and `nonce` are flattened in alongside it. `serde_json`
//! serializes struct fields in declaration order (it is not a `HashMap`), so
//! the same `Frame` value always produces the same bytes — required so
//! signatures verify deterministically.
//!
//! Confidential fields never appear in the clear on the wire. `PublishBody`
//! and `ReturnBody` are the plaintext shapes the spec's wire layout names;
//! both travel only inside an AEAD ciphertext, with `jid` / `minion_id` /
//! `key_id` left visible so the request server and publisher can route and
//! dedup without holding any key material themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::target::IdentityFacts;

/// One frame as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

impl Frame {
    pub fn new(payload: Payload) -> Self {
        Self { payload, signature: None, nonce: None }
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Serialize to canonical bytes (what a signature is computed over).
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Bytes a signature is computed/verified over: the payload alone, so
    /// the signature does not need to cover itself.
    pub fn signable_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.payload)
    }
}

/// Discriminates the kind of message. Mirrors `Payload`'s variants one to
/// one; kept distinct so callers can branch on `kind` (e.g. the request
/// server's demultiplexer) without pulling in the full body type.
///
/// The distilled spec names seven: `auth_request`, `auth_response`,
/// `publish`, `return`, `session_rotate`, `event`, `ping`. Four more are
/// added here for legs of the protocol the distillation left implicit
/// (§4.5, §4.9 "Supplemented" notes): `submit_request`/`submit_response`
/// carry the local-client leg of the request server (a client cannot seal
/// a publish envelope itself — only a worker, holding the publish key, can
/// — so its request to the master is a distinct, unsealed shape); `announce`
/// is what a minion sends the publisher immediately after connecting, so
/// the master's target resolver knows which accepted minions are currently
/// connected; `session_rotate_ack` is the minion's acknowledgement that
/// closes out the atomic switch §4.7 step 5 requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    AuthRequest,
    AuthResponse,
    Publish,
    Return,
    SessionRotate,
    SessionRotateAck,
    Event,
    Ping,
    SubmitRequest,
    SubmitResponse,
    Announce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    AuthRequest(AuthRequest),
    AuthResponse(AuthResponse),
    Publish(PublishEnvelope),
    Return(ReturnEnvelope),
    SessionRotate(SessionRotateEnvelope),
    SessionRotateAck(SessionRotateAck),
    Event(EventMessage),
    Ping,
    SubmitRequest(SubmitRequest),
    SubmitResponse(SubmitResponse),
    Announce(Announce),
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Self::AuthRequest(_) => Kind::AuthRequest,
            Self::AuthResponse(_) => Kind::AuthResponse,
            Self::Publish(_) => Kind::Publish,
            Self::Return(_) => Kind::Return,
            Self::SessionRotate(_) => Kind::SessionRotate,
            Self::SessionRotateAck(_) => Kind::SessionRotateAck,
            Self::Event(_) => Kind::Event,
            Self::Ping => Kind::Ping,
            Self::SubmitRequest(_) => Kind::SubmitRequest,
            Self::SubmitResponse(_) => Kind::SubmitResponse,
            Self::Announce(_) => Kind::Announce,
        }
    }
}

/// `auth_request`: a minion proposing (or re-proposing) its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub minion_id: String,
    /// Ed25519 public key bytes, used for publish-signature verification
    /// and as the long-lived identity fingerprint.
    pub signing_public_key: Vec<u8>,
    /// X25519 public key bytes, used only to receive a sealed session key.
    pub encryption_public_key: Vec<u8>,
    pub token: Option<String>,
}

/// `auth_response`: the master's reply to an `auth_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthResponse {
    Pending,
    Rejected,
    Denied,
    Accepted {
        session_key_id: String,
        /// Master's ephemeral X25519 public key for this handshake.
        master_ephemeral_public_key: Vec<u8>,
        /// AEAD ciphertext of a `KeyBundle`, sealed under the ECDH-derived
        /// key shared by `master_ephemeral_public_key` and the minion's
        /// `encryption_public_key`.
        sealed_keys: Vec<u8>,
        /// Master's long-lived Ed25519 signing public key (trust-on-first-use).
        master_signing_public_key: Vec<u8>,
    },
}

/// Session + publish key material handed to a minion at accept time or on
/// rotation. Never appears unencrypted on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub session_key: Vec<u8>,
    pub publish_key: Vec<u8>,
}

/// `publish`: a broadcast command, routable without decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEnvelope {
    pub jid: String,
    /// Identifies which publish key the ciphertext is sealed under.
    pub key_id: String,
    /// AEAD ciphertext of a `PublishBody`.
    pub ciphertext: Vec<u8>,
}

/// Plaintext shape of a publish, after decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishBody {
    pub target_expr: String,
    pub target_kind: TargetKind,
    pub func: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, serde_json::Value>,
    pub ttl: u64,
}

/// `return`: a minion's reply to a job, routable by `jid`/`minion_id`
/// without decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnEnvelope {
    pub jid: String,
    pub minion_id: String,
    pub key_id: String,
    /// AEAD ciphertext of a `ReturnBody`.
    pub ciphertext: Vec<u8>,
}

/// Plaintext shape of a return, after decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnBody {
    pub success: bool,
    pub result: serde_json::Value,
}

/// `session_rotate`: master-initiated key rotation over an already
/// authenticated channel. Sealed under the *current* session key, since the
/// channel is already mutually authenticated and a fresh ECDH handshake
/// would be redundant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRotateEnvelope {
    pub old_key_id: String,
    pub new_key_id: String,
    /// AEAD ciphertext of a `KeyBundle`, sealed under the old session key.
    pub ciphertext: Vec<u8>,
}

/// `event`: one bus event carried over the wire to an out-of-process
/// subscriber (the local client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub tag: String,
    pub data: serde_json::Value,
    pub ts: u64,
}

/// Target expression kind, evaluated locally by each minion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Glob,
    List,
    Grain,
    Compound,
}

/// How a job tracker should behave when the deadline arrives before every
/// targeted minion has replied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherMode {
    /// Return whatever arrived; report the rest as `missing`.
    List,
    /// Same as `List`, but the caller is expected to collect in waves
    /// (batches) rather than treating partial results as final.
    Batch,
    /// Treat any missing minion as a hard error.
    FailOnAnyMissing,
}

/// `submit_request`: a local client's publish request, plaintext (the
/// client holds no publish key — only a worker can seal the broadcast
/// envelope). Travels over the request server's client leg only; never
/// appears on the minion-facing publish/return connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub user: String,
    pub credential: Option<String>,
    pub target_expr: String,
    pub target_kind: TargetKind,
    pub func: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, serde_json::Value>,
    pub timeout_secs: u64,
    pub gather_mode: GatherMode,
}

/// `submit_response`: the request server's synchronous reply to a
/// `submit_request`, carrying the assigned `jid` and the resolved target set
/// so the client's job tracker knows when collection is complete without
/// re-deriving the resolver's decision (§4.5 Supplemented note).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
    Accepted { jid: String, targets: Vec<String> },
    Rejected { reason: String },
}

/// `session_rotate_ack`: a minion's acknowledgement of a `session_rotate`,
/// closing out the atomic switch described in §4.7 step 5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRotateAck {
    pub new_key_id: String,
}

/// `announce`: sent by a minion as the first frame on its publisher
/// connection, so the master's target resolver can see which accepted
/// minions are currently connected (§4.9's "connected-accepted set").
/// Signed with the minion's long-lived signing key so an unauthenticated
/// peer cannot pollute another minion_id's entry in the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announce {
    pub minion_id: String,
    pub session_key_id: String,
    pub facts: IdentityFacts,
    /// Signature over `format!("{minion_id}:{session_key_id}")`.
    pub signature: Vec<u8>,
}
