use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::COINBASE_SENDER;

use super::crypto::{
    decode_public_key, encode_public_key, verify_signature, Address, CryptoError, DigitalSignature,
    PublicKey, Wallet,
};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Sender address {0} is reserved for mining rewards")]
    ReservedSender(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// JSON encoding of `value`.
///
/// Struct fields serialize in declaration order and floats always carry a
/// decimal point, so every node produces the same bytes for the same value.
pub(crate) fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("ledger types always encode to JSON")
}

/// SHA-256 of the canonical encoding of `value`
pub(crate) fn canonical_digest<T: Serialize>(value: &T) -> [u8; 32] {
    Sha256::digest(canonical_bytes(value)).into()
}

/// A transfer of `value` from `sender` to `recipient`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    #[serde(rename = "sender_blockchain_address")]
    pub sender: Address,

    #[serde(rename = "recipient_blockchain_address")]
    pub recipient: Address,

    pub value: f64,
}

impl Transaction {
    pub fn new(sender: impl Into<Address>, recipient: impl Into<Address>, value: f64) -> Self {
        Transaction {
            sender: sender.into(),
            recipient: recipient.into(),
            value,
        }
    }

    /// Creates the mining reward transaction paid to `recipient`
    pub fn new_coinbase(recipient: impl Into<Address>, reward: f64) -> Self {
        Transaction::new(COINBASE_SENDER, recipient, reward)
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender.as_str() == COINBASE_SENDER
    }

    /// Digest of the canonical encoding; this is what gets signed
    pub fn hash(&self) -> [u8; 32] {
        canonical_digest(self)
    }

    /// Rejects values a ledger can not carry
    pub fn validate_value(&self) -> Result<(), TransactionError> {
        if !self.value.is_finite() || self.value < 0.0 {
            return Err(TransactionError::InvalidAmount(self.value));
        }
        Ok(())
    }

    /// Signs the transaction with a wallet
    ///
    /// # Arguments
    ///
    /// * `wallet` - The wallet whose private key signs
    ///
    /// # Returns
    ///
    /// An ECDSA signature over `hash()`
    pub fn sign(&self, wallet: &Wallet) -> DigitalSignature {
        wallet.sign(&canonical_bytes(self))
    }

    /// Verifies that `signature` was produced over this transaction by the
    /// holder of `public_key`
    pub fn verify_signature(
        &self,
        public_key: &PublicKey,
        signature: &DigitalSignature,
    ) -> Result<(), TransactionError> {
        verify_signature(&canonical_bytes(self), signature, public_key)?;
        Ok(())
    }
}

/// A transaction together with the key and signature that authorize it
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub public_key: PublicKey,
    pub signature: DigitalSignature,
}

impl SignedTransaction {
    /// Builds and signs a transaction from `wallet`'s address
    pub fn create(wallet: &Wallet, recipient: impl Into<Address>, value: f64) -> Self {
        let transaction = Transaction::new(wallet.address().clone(), recipient, value);
        let signature = transaction.sign(wallet);

        SignedTransaction {
            transaction,
            public_key: wallet.public_key().clone(),
            signature,
        }
    }

    pub fn verify(&self) -> Result<(), TransactionError> {
        self.transaction
            .verify_signature(&self.public_key, &self.signature)
    }

    /// Wire body used when relaying the transaction to a peer
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest {
            sender_blockchain_address: Some(self.transaction.sender.0.clone()),
            recipient_blockchain_address: Some(self.transaction.recipient.0.clone()),
            sender_public_key: Some(encode_public_key(&self.public_key)),
            value: Some(self.transaction.value),
            signature: Some(self.signature.to_hex()),
        }
    }
}

/// Body of `PUT /transactions` and `POST /transactions`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    pub sender_blockchain_address: Option<String>,
    pub recipient_blockchain_address: Option<String>,

    /// 64-hex X followed by 64-hex Y
    pub sender_public_key: Option<String>,

    pub value: Option<f64>,

    /// 64-hex r followed by 64-hex s
    pub signature: Option<String>,
}

impl TransactionRequest {
    /// Checks every field is present and decodes key and signature
    pub fn into_signed(self) -> Result<SignedTransaction, TransactionError> {
        let sender = self
            .sender_blockchain_address
            .ok_or(TransactionError::MissingField("sender_blockchain_address"))?;
        let recipient = self
            .recipient_blockchain_address
            .ok_or(TransactionError::MissingField("recipient_blockchain_address"))?;
        let public_key = self
            .sender_public_key
            .ok_or(TransactionError::MissingField("sender_public_key"))?;
        let value = self.value.ok_or(TransactionError::MissingField("value"))?;
        let signature = self
            .signature
            .ok_or(TransactionError::MissingField("signature"))?;

        Ok(SignedTransaction {
            transaction: Transaction::new(sender, recipient, value),
            public_key: decode_public_key(&public_key)?,
            signature: DigitalSignature::from_hex(&signature)?,
        })
    }
}
