//! Cryptographic primitives for StarNotary
//!
//! Block digests are lowercase hex SHA-256. Addresses are the hex SHA-256 of a
//! compressed secp256k1 public key. Ownership of an address is proven with a
//! recoverable ECDSA signature over a prefixed message, so a verifier only
//! needs the message, the claimed address and the signature.

use crate::error::ChainError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Domain prefix hashed ahead of every signed message.
const SIGNED_MESSAGE_MAGIC: &[u8] = b"\x19StarNotary Signed Message:\n";

/// Header byte offset for a recoverable signature over a compressed key.
const COMPRESSED_HEADER_BASE: u8 = 27 + 4;

/// Length of an encoded signature: header byte plus the 64-byte compact form.
pub const ENCODED_SIGNATURE_SIZE: usize = 65;

/// Hex SHA-256 of `bytes`. This is the chain's block digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Derive the address of a public key.
pub fn address_from_public_key(public_key: &PublicKey) -> String {
    let pubkey_bytes: [u8; PUBLIC_KEY_SIZE] = public_key.serialize();
    sha256_hex(&pubkey_bytes)
}

fn message_digest(message: &str) -> Message {
    let mut hasher = Sha256::new();
    hasher.update(SIGNED_MESSAGE_MAGIC);
    hasher.update(message.as_bytes());
    let first = hasher.finalize();
    let digest: [u8; 32] = Sha256::digest(first).into();
    Message::from_digest(digest)
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

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| ChainError::CryptoError(format!("Invalid hex secret key: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key)
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Signs `message` and returns the base64 recoverable signature that
    /// [`RecoverableVerifier`] accepts.
    pub fn sign_message(&self, message: &str) -> String {
        let digest = message_digest(message);
        let signature = SECP256K1_CONTEXT.sign_ecdsa_recoverable(&digest, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut encoded = [0u8; ENCODED_SIGNATURE_SIZE];
        encoded[0] = COMPRESSED_HEADER_BASE + recovery_id.to_i32() as u8;
        encoded[1..].copy_from_slice(&compact);
        BASE64.encode(encoded)
    }
}

/// Recovers the address that produced `signature` over `message`.
pub fn recover_address(message: &str, signature: &str) -> Result<String, ChainError> {
    let raw = BASE64
        .decode(signature.trim())
        .map_err(|e| ChainError::CryptoError(format!("Invalid base64 signature: {}", e)))?;
    if raw.len() != ENCODED_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes, got {}",
            ENCODED_SIGNATURE_SIZE,
            raw.len()
        )));
    }

    let header = raw[0];
    if !(COMPRESSED_HEADER_BASE..COMPRESSED_HEADER_BASE + 4).contains(&header) {
        return Err(ChainError::CryptoError(format!(
            "Unsupported signature header byte {}",
            header
        )));
    }

    let recovery_id = RecoveryId::from_i32(i32::from(header - COMPRESSED_HEADER_BASE))
        .map_err(|e| ChainError::CryptoError(format!("Invalid recovery id: {}", e)))?;
    let signature = RecoverableSignature::from_compact(&raw[1..], recovery_id)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    let public_key = SECP256K1_CONTEXT
        .recover_ecdsa(&message_digest(message), &signature)
        .map_err(|_| ChainError::CryptoError("Signature verification failed".to_string()))?;

    Ok(address_from_public_key(&public_key))
}

/// Checks that a message was signed by the owner of an address.
pub trait SignatureVerifier: Send + Sync {
    /// Malformed input is an ordinary `false`, never an error.
    fn verify(&self, message: &str, address: &str, signature: &str) -> bool;
}

/// Verifier for the recoverable secp256k1 signatures made by [`KeyPair::sign_message`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverableVerifier;

impl SignatureVerifier for RecoverableVerifier {
    fn verify(&self, message: &str, address: &str, signature: &str) -> bool {
        match recover_address(message, signature) {
            Ok(recovered) => recovered.eq_ignore_ascii_case(address.trim()),
            Err(e) => {
                tracing::debug!(address = %address, error = %e, "signature.rejected");
                false
            }
        }
    }
}
