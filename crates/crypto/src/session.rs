//! Per-session AEAD keys: minting, sealing, opening, and replay defense.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Which side of a session sent a given message. Nonces are tracked
/// independently per direction, per the spec's `(key_id, direction)` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    MasterToMinion,
    MinionToMaster,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Self::MasterToMinion => 0,
            Self::MinionToMaster => 1,
        }
    }
}

/// A key bundle handed to a minion at accept time or on rotation: the new
/// session key plus the current broadcast publish key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub session_key: Vec<u8>,
    pub publish_key: Vec<u8>,
}

/// Generate `n` random bytes via the system RNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    use ring::rand::SecureRandom;
    let rng = ring::rand::SystemRandom::new();
    let mut buf = [0u8; N];
    rng.fill(&mut buf).map_err(|_| CryptoError::Crypto)?;
    Ok(buf)
}

/// Mint a fresh, random session key id and key bytes.
pub fn mint_session_key() -> Result<(String, [u8; 32]), CryptoError> {
    let key_id = uuid::Uuid::new_v4().to_string();
    let raw = random_bytes::<32>()?;
    Ok((key_id, raw))
}

/// Mint a fresh publish (broadcast) key, distinct from session keys.
pub fn mint_publish_key() -> Result<[u8; 32], CryptoError> {
    random_bytes::<32>()
}

fn build_nonce(direction: Direction, counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = direction.index() as u8;
    nonce[4..12].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn seal_raw(key: &[u8; 32], direction: Direction, counter: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let unbound =
        ring::aead::UnboundKey::new(&ring::aead::AES_256_GCM, key).map_err(|_| CryptoError::Crypto)?;
    let less_safe = ring::aead::LessSafeKey::new(unbound);
    let nonce = ring::aead::Nonce::assume_unique_for_key(build_nonce(direction, counter));
    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Crypto)?;
    Ok(in_out)
}

fn open_raw(key: &[u8; 32], direction: Direction, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let unbound =
        ring::aead::UnboundKey::new(&ring::aead::AES_256_GCM, key).map_err(|_| CryptoError::Crypto)?;
    let less_safe = ring::aead::LessSafeKey::new(unbound);
    let nonce = ring::aead::Nonce::assume_unique_for_key(build_nonce(direction, counter));
    let mut buf = ciphertext.to_vec();
    let plaintext = less_safe
        .open_in_place(nonce, ring::aead::Aad::empty(), &mut buf)
        .map_err(|_| CryptoError::Forged)?;
    Ok(plaintext.to_vec())
}

/// A session key plus the protocol state (send counter, per-direction
/// replay high-water marks) needed to use it safely.
pub struct SessionKeyState {
    pub key_id: String,
    raw: [u8; 32],
    send_counter: AtomicU64,
    recv_high_water: [AtomicU64; 2],
}

impl SessionKeyState {
    pub fn new(key_id: String, raw: [u8; 32]) -> Self {
        Self {
            key_id,
            raw,
            send_counter: AtomicU64::new(0),
            recv_high_water: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    /// The raw key bytes, for wrapping into a `KeyBundle` sent to a minion.
    /// Never logged; callers must treat this as key material.
    pub fn expose_raw(&self) -> &[u8; 32] {
        &self.raw
    }

    /// Seal `plaintext`, advancing this side's send counter. Returns the
    /// ciphertext and the nonce counter the frame's `nonce` field must carry.
    pub fn seal(&self, direction: Direction, plaintext: &[u8]) -> Result<(Vec<u8>, u64), CryptoError> {
        let counter = self.send_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let ciphertext = seal_raw(&self.raw, direction, counter, plaintext)?;
        Ok((ciphertext, counter))
    }

    /// Open `ciphertext` sent with the given nonce counter. Rejects replays:
    /// a counter at or below the highest already accepted for this
    /// direction is refused without attempting the AEAD open.
    pub fn open(
        &self,
        direction: Direction,
        counter: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let idx = direction.index();
        let highest = self.recv_high_water[idx].load(Ordering::SeqCst);
        if counter <= highest {
            return Err(CryptoError::Replay);
        }
        let plaintext = open_raw(&self.raw, direction, counter, ciphertext)?;
        // Another open of a higher counter may have raced ahead; only move
        // the mark forward.
        self.recv_high_water[idx].fetch_max(counter, Ordering::SeqCst);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seals_and_opens_round_trip() {
        let (key_id, raw) = mint_session_key().expect("mint");
        let state = SessionKeyState::new(key_id, raw);
        let (ct, nonce) = state.seal(Direction::MasterToMinion, b"payload").expect("seal");
        let pt = state.open(Direction::MasterToMinion, nonce, &ct).expect("open");
        assert_eq!(pt, b"payload");
    }

    #[test]
    fn rejects_replayed_nonce() {
        let (key_id, raw) = mint_session_key().expect("mint");
        let state = SessionKeyState::new(key_id, raw);
        let (ct, nonce) = state.seal(Direction::MinionToMaster, b"x").expect("seal");
        state.open(Direction::MinionToMaster, nonce, &ct).expect("first open");
        let err = state.open(Direction::MinionToMaster, nonce, &ct).unwrap_err();
        assert!(matches!(err, CryptoError::Replay));
    }

    #[test]
    fn directions_have_independent_nonce_spaces() {
        let (key_id, raw) = mint_session_key().expect("mint");
        let state = SessionKeyState::new(key_id, raw);
        let (ct_a, nonce_a) = state.seal(Direction::MasterToMinion, b"a").expect("seal a");
        let (ct_b, nonce_b) = state.seal(Direction::MinionToMaster, b"b").expect("seal b");
        assert_eq!(nonce_a, nonce_b); // both start their own counter at 1
        state.open(Direction::MasterToMinion, nonce_a, &ct_a).expect("open a");
        state.open(Direction::MinionToMaster, nonce_b, &ct_b).expect("open b");
    }

    #[test]
    fn forged_ciphertext_is_rejected() {
        let (key_id, raw) = mint_session_key().expect("mint");
        let state = SessionKeyState::new(key_id, raw);
        let (mut ct, nonce) = state.seal(Direction::MasterToMinion, b"payload").expect("seal");
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        let err = state.open(Direction::MasterToMinion, nonce, &ct).unwrap_err();
        assert!(matches!(err, CryptoError::Forged));
    }
}
