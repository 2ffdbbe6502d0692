/// Coin key helpers: secp256k1 ECDSA as spoken by the CLC ledger
///
/// The ledger identifies coin holders by their uncompressed SEC1 public key
/// (lowercase hex, `04 || x || y`) and expects DER signatures over the
/// SHA-256 digest of a plain-text message. Everything that signs or verifies
/// on behalf of the pool goes through here so the wire format stays in one place.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("private key is not valid hex")]
    PrivateKeyHex,
    #[error("private key is not a valid secp256k1 scalar")]
    PrivateKeyRange,
    #[error("public key is not a valid SEC1 point")]
    PublicKey,
    #[error("signature is not valid DER hex")]
    SignatureEncoding,
    #[error("signing failed")]
    Signing,
}

/// SHA-256 digest of `input`, raw bytes.
pub fn sha256(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

/// SHA-256 digest of `input`, lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(sha256(input.as_bytes()))
}

/// A coin's spend authority, parsed from the hex secret the pool stores.
#[derive(Clone)]
pub struct CoinKey {
    signing_key: SigningKey,
}

impl std::fmt::Debug for CoinKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinKey")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl CoinKey {
    /// Parse a hex private key. Shorter inputs are left-padded with zeros,
    /// the same way the ledger's own tooling accepts them.
    pub fn from_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let trimmed = secret_hex.trim().trim_start_matches("0x");
        let padded = if trimmed.len() % 2 == 1 {
            format!("0{}", trimmed)
        } else {
            trimmed.to_string()
        };
        let bytes = hex::decode(&padded).map_err(|_| KeyError::PrivateKeyHex)?;
        if bytes.is_empty() || bytes.len() > 32 {
            return Err(KeyError::PrivateKeyRange);
        }
        let mut scalar = [0u8; 32];
        scalar[32 - bytes.len()..].copy_from_slice(&bytes);
        let signing_key = SigningKey::from_slice(&scalar).map_err(|_| KeyError::PrivateKeyRange)?;
        Ok(Self { signing_key })
    }

    /// Uncompressed SEC1 public key, lowercase hex (130 chars).
    pub fn public_key_hex(&self) -> String {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        hex::encode(point.as_bytes())
    }

    /// Sign `message` (SHA-256 prehashed) and return the DER signature as hex.
    pub fn sign(&self, message: &str) -> Result<String, KeyError> {
        let digest = sha256(message.as_bytes());
        let signature: Signature = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|_| KeyError::Signing)?;
        Ok(hex::encode(signature.to_der().as_bytes()))
    }
}

/// Verify a DER hex `signature` made by `public_key_hex` over `message`.
///
/// High-S signatures are normalised first; miners commonly produce them.
pub fn verify(public_key_hex: &str, message: &str, signature_hex: &str) -> Result<bool, KeyError> {
    let key_bytes = hex::decode(public_key_hex).map_err(|_| KeyError::PublicKey)?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes).map_err(|_| KeyError::PublicKey)?;

    let sig_bytes = hex::decode(signature_hex).map_err(|_| KeyError::SignatureEncoding)?;
    let signature = Signature::from_der(&sig_bytes).map_err(|_| KeyError::SignatureEncoding)?;
    let signature = signature.normalize_s().unwrap_or(signature);

    let digest = sha256(message.as_bytes());
    Ok(verifying_key.verify_prehash(&digest, &signature).is_ok())
}
