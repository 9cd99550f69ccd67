//! Cryptographic primitives for TChain

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

pub const HASH_LEN: usize = 32;

/// Fixed-size SHA-256 digest used for block ids, transaction ids and Merkle roots.
pub type HashValue = [u8; HASH_LEN];

/// SHA-256 of `message`.
pub fn hash(message: &[u8]) -> HashValue {
    Sha256::digest(message).into()
}

/// Short hex prefix of a hash for log lines.
pub fn short_hex(value: &HashValue) -> String {
    hex::encode(&value[..8])
}

/// Something that can sign a 32-byte digest.
pub trait Signer {
    fn sign(&self, digest: &HashValue) -> Result<TxSignature, ChainError>;
}

/// Something that can tell whether it vouches for a 32-byte digest.
pub trait Verifier {
    fn verify(&self, digest: &HashValue) -> bool;
}

/// A compact secp256k1 ECDSA signature bundled with the compressed public key
/// that produced it, so a transaction carries everything needed to check it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl TxSignature {
    fn check(&self, digest: &HashValue) -> Result<(), ChainError> {
        if self.public_key.len() != PUBLIC_KEY_SIZE {
            return Err(ChainError::CryptoError(format!(
                "Public key must be exactly {} bytes (compressed), got {}",
                PUBLIC_KEY_SIZE,
                self.public_key.len()
            )));
        }
        if self.signature.len() != COMPACT_SIGNATURE_SIZE {
            return Err(ChainError::CryptoError(format!(
                "Signature must be exactly {} bytes (compact), got {}",
                COMPACT_SIGNATURE_SIZE,
                self.signature.len()
            )));
        }

        let public_key = PublicKey::from_slice(&self.public_key)
            .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;
        let signature = Signature::from_compact(&self.signature)
            .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;
        let message = Message::from_digest(*digest);

        SECP256K1_CONTEXT
            .verify_ecdsa(&message, &signature, &public_key)
            .map_err(|_| ChainError::InvalidSignature)
    }
}

impl Verifier for TxSignature {
    fn verify(&self, digest: &HashValue) -> bool {
        self.check(digest).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }
}

impl Signer for KeyPair {
    /// Signs the digest as-is; callers pass an already hashed message.
    fn sign(&self, digest: &HashValue) -> Result<TxSignature, ChainError> {
        let message = Message::from_digest(*digest);
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);

        Ok(TxSignature {
            public_key: self.public_key_bytes().to_vec(),
            signature: signature.serialize_compact().to_vec(),
        })
    }
}
