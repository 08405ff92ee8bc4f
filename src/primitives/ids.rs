// Identifiers - users, transactions, gateway references and idempotency keys

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while constructing identifiers from external input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("User id must not be empty")]
    EmptyUserId,

    #[error("User id contains control characters")]
    InvalidUserId,

    #[error("Idempotency key must not be empty")]
    EmptyIdempotencyKey,

    #[error("External reference must not be empty")]
    EmptyExternalRef,

    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),
}

// ============================================================================
// USER ID
// ============================================================================

/// Verified user identifier handed to the ledger by the auth collaborator.
///
/// The ledger never authenticates; it only requires the identifier to be a
/// stable, printable string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::EmptyUserId);
        }
        if id.chars().any(char::is_control) {
            return Err(IdError::InvalidUserId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// TRANSACTION ID
// ============================================================================

/// Unique identifier for a ledger transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a random transaction ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|e| IdError::InvalidTransactionId(e.to_string()))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for TransactionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| IdError::InvalidTransactionId(e.to_string()))
    }
}

// ============================================================================
// EXTERNAL REFERENCE
// ============================================================================

/// Transaction id assigned by an external payment gateway
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef(String);

impl ExternalRef {
    pub fn new(reference: impl Into<String>) -> Result<Self, IdError> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(IdError::EmptyExternalRef);
        }
        Ok(Self(reference))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// IDEMPOTENCY KEY
// ============================================================================

/// Caller-supplied key that makes a repeated request return the original result
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, IdError> {
        let key = key.into();
        if key.is_empty() {
            return Err(IdError::EmptyIdempotencyKey);
        }
        Ok(Self(key))
    }

    /// Generate a fresh key for requests that did not carry one
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Key for a record produced as a side effect of the request keyed by `self`
    pub fn derive(&self, suffix: &str) -> Self {
        Self(format!("{}/{}", self.0, suffix))
    }

    /// Fixed-size digest used as the index key
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"idempotency:");
        hasher.update(self.0.as_bytes());
        hasher.finalize().into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
