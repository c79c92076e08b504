//! One-shot authenticated sealing with a raw 32-byte key and a random
//! nonce, for messages that only ever travel once (the ephemeral-ECDH-sealed
//! `KeyBundle` at auth time) where the monotonic per-direction nonce
//! discipline in [`crate::session`] would be overkill. The nonce is
//! prepended to the ciphertext so `open_sealed_box` is self-contained.

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;

pub fn seal_sealed_box(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes: [u8; NONCE_LEN] = crate::session::random_bytes()?;
    let unbound =
        ring::aead::UnboundKey::new(&ring::aead::AES_256_GCM, key).map_err(|_| CryptoError::Crypto)?;
    let less_safe = ring::aead::LessSafeKey::new(unbound);
    let nonce = ring::aead::Nonce::assume_unique_for_key(nonce_bytes);
    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Crypto)?;
    let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

pub fn open_sealed_box(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Forged);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let mut nonce_arr = [0u8; NONCE_LEN];
    nonce_arr.copy_from_slice(nonce_bytes);
    let unbound =
        ring::aead::UnboundKey::new(&ring::aead::AES_256_GCM, key).map_err(|_| CryptoError::Crypto)?;
    let less_safe = ring::aead::LessSafeKey::new(unbound);
    let nonce = ring::aead::Nonce::assume_unique_for_key(nonce_arr);
    let mut buf = ciphertext.to_vec();
    let plaintext = less_safe
        .open_in_place(nonce, ring::aead::Aad::empty(), &mut buf)
        .map_err(|_| CryptoError::Forged)?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = crate::session::random_bytes::<32>().expect("key");
        let sealed = seal_sealed_box(&key, b"key bundle bytes").expect("seal");
        let opened = open_sealed_box(&key, &sealed).expect("open");
        assert_eq!(opened, b"key bundle bytes");
    }

    #[test]
    fn tampered_box_is_rejected() {
        let key = crate::session::random_bytes::<32>().expect("key");
        let mut sealed = seal_sealed_box(&key, b"payload").expect("seal");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(open_sealed_box(&key, &sealed).is_err());
    }
}
