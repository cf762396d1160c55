use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Length of one hex-encoded curve coordinate or signature scalar
const SCALAR_HEX_LEN: usize = 64;

/// A P-256 public key
pub type PublicKey = VerifyingKey;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// An opaque wallet address used as transaction sender or recipient
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives an address from a public key: base58 of the SHA-256 of the
    /// uncompressed key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = Sha256::digest(public_key.to_encoded_point(false).as_bytes());
        Address(bs58::encode(digest).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// Encodes a public key as 64-hex X followed by 64-hex Y
pub fn encode_public_key(public_key: &PublicKey) -> String {
    // Drop the 0x04 SEC1 tag, X and Y are already zero-padded big-endian
    hex::encode(&public_key.to_encoded_point(false).as_bytes()[1..])
}

/// Parses a public key from its 128-hex X || Y form
pub fn decode_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    if encoded.len() != 2 * SCALAR_HEX_LEN {
        return Err(CryptoError::MalformedKey(format!(
            "expected {} hex characters, got {}",
            2 * SCALAR_HEX_LEN,
            encoded.len()
        )));
    }

    let coordinates = hex::decode(encoded).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;

    let mut uncompressed = Vec::with_capacity(65);
    uncompressed.push(0x04);
    uncompressed.extend_from_slice(&coordinates);

    PublicKey::from_sec1_bytes(&uncompressed).map_err(|e| CryptoError::MalformedKey(e.to_string()))
}

/// An ECDSA signature over a transaction, carried as 64-hex r || 64-hex s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitalSignature(Signature);

impl DigitalSignature {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        if encoded.len() != 2 * SCALAR_HEX_LEN {
            return Err(CryptoError::MalformedSignature(format!(
                "expected {} hex characters, got {}",
                2 * SCALAR_HEX_LEN,
                encoded.len()
            )));
        }

        let bytes = hex::decode(encoded).map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;

        let signature = Signature::from_slice(&bytes)
            .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;

        Ok(DigitalSignature(signature))
    }
}

impl fmt::Display for DigitalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for DigitalSignature {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DigitalSignature::from_hex(s)
    }
}

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    public_key: PublicKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        Wallet::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Creates a wallet from a hex-encoded private key
    ///
    /// # Arguments
    ///
    /// * `secret_key_hex` - The 32-byte P-256 scalar, hex encoded
    ///
    /// # Returns
    ///
    /// The wallet, or `CryptoError::InvalidPrivateKey` if the input is not
    /// hex or not a valid scalar
    pub fn from_secret_key_hex(secret_key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_key_hex)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Ok(Wallet::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = signing_key.verifying_key().clone();
        let address = Address::from_public_key(&public_key);

        Wallet {
            signing_key,
            public_key,
            address,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Hex form of the public key as sent alongside signed transactions
    pub fn public_key_hex(&self) -> String {
        encode_public_key(&self.public_key)
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Signs the SHA-256 digest of `message` with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature(self.signing_key.sign(message))
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Wallet::new()
    }
}

/// Verifies a signature over the SHA-256 digest of `message`
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &PublicKey,
) -> Result<(), CryptoError> {
    public_key
        .verify(message, &signature.0)
        .map_err(|_| CryptoError::InvalidSignature)
}
