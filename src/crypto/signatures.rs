use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Raw key material as it is handed to and from a key store.
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("secret_key", &"<redacted>")
            .field("public_key", &hex::encode(&self.public_key))
            .finish()
    }
}

/// Hash-then-sign service: SHA-256 digest, then ECDSA over secp256k1.
///
/// Signatures are 64-byte compact encodings, public keys 33-byte compressed
/// points. Holds no key material of its own.
pub struct SigningService {
    secp: Secp256k1<secp256k1::All>,
}

impl SigningService {
    pub const HASH_ALGORITHM: &'static str = "SHA-256";
    pub const SIGNATURE_ALGORITHM: &'static str = "ECDSA-secp256k1";

    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    fn digest(payload: &[u8]) -> Message {
        let hash: [u8; 32] = Sha256::digest(payload).into();
        Message::from_digest(hash)
    }

    pub fn sign(&self, payload: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret_key = SecretKey::from_slice(secret_key)
            .map_err(|e| CryptoError::SigningFailed(format!("Invalid secret key: {}", e)))?;

        let signature = self.secp.sign_ecdsa(&Self::digest(payload), &secret_key);
        Ok(signature.serialize_compact().to_vec())
    }

    /// Verify `signature` over `payload`.
    ///
    /// Returns `Err(VerificationFailed)` when the signature or key bytes cannot
    /// be parsed, and `Ok(false)` when they parse but do not match.
    pub fn verify(
        &self,
        signature: &[u8],
        payload: &[u8],
        public_key: &[u8],
    ) -> Result<bool, CryptoError> {
        let signature = Signature::from_compact(signature).map_err(|e| {
            CryptoError::VerificationFailed(format!("Invalid signature format: {}", e))
        })?;
        let public_key = PublicKey::from_slice(public_key).map_err(|e| {
            CryptoError::VerificationFailed(format!("Invalid public key format: {}", e))
        })?;

        match self
            .secp
            .verify_ecdsa(&Self::digest(payload), &signature, &public_key)
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub fn public_key_from_secret(&self, secret_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret_key = SecretKey::from_slice(secret_key)
            .map_err(|e| CryptoError::KeyGenerationFailed(format!("Invalid secret key: {}", e)))?;
        Ok(PublicKey::from_secret_key(&self.secp, &secret_key)
            .serialize()
            .to_vec())
    }

    /// Generate a new keypair
    pub fn generate_keypair(&self) -> Result<KeyPair, CryptoError> {
        let mut rng = OsRng;
        let (secret_key, public_key) = self.secp.generate_keypair(&mut rng);
        Ok(KeyPair {
            secret_key: secret_key.secret_bytes().to_vec(),
            public_key: public_key.serialize().to_vec(),
        })
    }
}

impl Default for SigningService {
    fn default() -> Self {
        Self::new()
    }
}
