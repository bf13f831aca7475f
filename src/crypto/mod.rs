//! Signing, canonical encoding, nonces and key storage.

pub mod canonical;
pub mod keystore;
pub mod nonce;
pub mod signatures;

pub use canonical::canonical_bytes;
pub use keystore::{FileKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
pub use nonce::NonceSource;
pub use signatures::{KeyPair, SigningService};
