//! secp256k1 signatures for transactions
//!
//! Transactions carry their signature as `"<compressed pubkey hex>:<compact
//! signature hex>"`. An address is the hex SHA-256 of the compressed public key.

use crate::error::ChainError;
use crate::transaction::{SignatureVerifier, Transaction};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

/// Shared signing and verification context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Ledger address owned by a compressed public key.
pub fn address_from_public_key(public_key_bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key_bytes))
}

/// Messages are signed over their SHA-256 digest.
fn message_digest(message: &[u8]) -> Message {
    Message::from_digest(Sha256::digest(message).into())
}

fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, ChainError> {
    if bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Expected a {}-byte compressed public key, got {} bytes",
            PUBLIC_KEY_SIZE,
            bytes.len()
        )));
    }
    PublicKey::from_slice(bytes)
        .map_err(|e| ChainError::CryptoError(format!("Bad public key: {}", e)))
}

fn parse_compact_signature(bytes: &[u8]) -> Result<Signature, ChainError> {
    if bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Expected a {}-byte compact signature, got {} bytes",
            COMPACT_SIGNATURE_SIZE,
            bytes.len()
        )));
    }
    Signature::from_compact(bytes)
        .map_err(|e| ChainError::CryptoError(format!("Bad signature: {}", e)))
}

fn verify_parsed(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), ChainError> {
    SECP256K1_CONTEXT
        .verify_ecdsa(&message_digest(message), signature, public_key)
        .map_err(|_| {
            ChainError::CryptoError("Signature does not match message and key".to_string())
        })
}

/// Checks a compact signature over `message` against raw public key bytes.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), ChainError> {
    let public_key = parse_public_key(public_key_bytes)?;
    let signature = parse_compact_signature(signature_bytes)?;
    verify_parsed(&public_key, message, &signature)
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::new(&mut OsRng))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        Self {
            public_key: secret_key.public_key(&SECP256K1_CONTEXT),
            secret_key,
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| ChainError::CryptoError(format!("Secret key is not hex: {}", e)))?;
        SecretKey::from_slice(&bytes)
            .map(Self::from_secret_key)
            .map_err(|e| ChainError::CryptoError(format!("Bad secret key: {}", e)))
    }

    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key.serialize())
    }

    fn sign_digest(&self, message: &[u8]) -> Signature {
        SECP256K1_CONTEXT.sign_ecdsa(&message_digest(message), &self.secret_key)
    }

    /// Compact ECDSA signature over the SHA-256 of `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; COMPACT_SIGNATURE_SIZE] {
        self.sign_digest(message).serialize_compact()
    }

    /// Fills in `tx.signature` in the `"<pubkey>:<signature>"` format.
    pub fn sign_transaction(&self, tx: &mut Transaction) {
        let signature = self.sign_digest(&tx.signable_message());
        tx.sign(encode_signature_field(&self.public_key, &signature));
    }
}

pub fn encode_signature_field(public_key: &PublicKey, signature: &Signature) -> String {
    format!(
        "{}:{}",
        hex::encode(public_key.serialize()),
        hex::encode(signature.serialize_compact())
    )
}

/// Splits and decodes a `"<pubkey hex>:<signature hex>"` field.
pub fn parse_signature_field(field: &str) -> Result<(PublicKey, Signature), ChainError> {
    let (key_hex, sig_hex) = field.split_once(':').ok_or_else(|| {
        ChainError::CryptoError("Signature field must look like '<pubkey>:<signature>'".to_string())
    })?;
    let key_bytes = hex::decode(key_hex)
        .map_err(|e| ChainError::CryptoError(format!("Public key is not hex: {}", e)))?;
    let sig_bytes = hex::decode(sig_hex)
        .map_err(|e| ChainError::CryptoError(format!("Signature is not hex: {}", e)))?;
    Ok((parse_public_key(&key_bytes)?, parse_compact_signature(&sig_bytes)?))
}

/// Signature verifier backed by secp256k1. The signing key must also own the
/// sender address.
#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1Verifier;

impl Secp256k1Verifier {
    pub fn check(&self, tx: &Transaction) -> Result<(), ChainError> {
        let (public_key, signature) = parse_signature_field(&tx.signature)?;
        if address_from_public_key(&public_key.serialize()) != tx.sender {
            return Err(ChainError::CryptoError(format!(
                "Public key does not belong to sender {}",
                tx.sender
            )));
        }
        verify_parsed(&public_key, &tx.signable_message(), &signature)
    }
}

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, tx: &Transaction) -> bool {
        match self.check(tx) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(tx_sender = %tx.sender, error = %e, "signature rejected");
                false
            }
        }
    }
}
