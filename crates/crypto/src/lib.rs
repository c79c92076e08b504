//! Signing identity, ephemeral handshakes, session AEAD, and the on-disk
//! minion key store.

pub mod ecdh;
pub mod error;
pub mod keypair;
pub mod keystore;
pub mod seal;
pub mod session;
pub mod sign;

pub use ecdh::EphemeralAgreement;
pub use error::CryptoError;
pub use keypair::load_or_create_master_keys;
pub use keystore::{KeyRecord, KeyState, KeyStore};
pub use seal::{open_sealed_box, seal_sealed_box};
pub use session::{mint_publish_key, mint_session_key, Direction, KeyBundle, SessionKeyState};
pub use sign::{fingerprint, verify, SigningKeyPair};
