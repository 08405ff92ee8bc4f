// Callback signatures - ed25519 over the raw callback body, base64 encoded

use crate::gateway::{CallbackPayload, GatewayError, VerifiedCallback};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid key length: expected 32, got {0}")]
    InvalidLength(usize),

    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid key bytes: {0}")]
    InvalidBytes(String),
}

fn key_bytes(hex_key: &str) -> Result<[u8; 32], KeyError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}

/// Provider-side key that signs callbacks
#[derive(Clone)]
pub struct CallbackSigner {
    signing_key: SigningKey,
}

impl CallbackSigner {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_hex(secret: &str) -> Result<Self, KeyError> {
        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes(secret)?),
        })
    }

    pub fn verifier(&self) -> CallbackVerifier {
        CallbackVerifier {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Base64 signature over `body`
    pub fn sign(&self, body: &[u8]) -> String {
        STANDARD.encode(self.signing_key.sign(body).to_bytes())
    }

    /// Serialize and sign a callback the way the provider would send it
    pub fn payload(&self, callback: &VerifiedCallback) -> Result<CallbackPayload, GatewayError> {
        let body = callback.to_json()?;
        let signature = self.sign(&body);
        Ok(CallbackPayload::new(body, signature))
    }
}

/// Platform-side public key of a provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackVerifier {
    verifying_key: VerifyingKey,
}

impl CallbackVerifier {
    pub fn from_hex(public_key: &str) -> Result<Self, KeyError> {
        let verifying_key = VerifyingKey::from_bytes(&key_bytes(public_key)?)
            .map_err(|e| KeyError::InvalidBytes(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    /// Check the signature, then decode the body
    pub fn verify(&self, payload: &CallbackPayload) -> Result<VerifiedCallback, GatewayError> {
        let raw = STANDARD
            .decode(payload.signature.trim())
            .map_err(|_| GatewayError::InvalidSignature)?;
        let raw: [u8; 64] = raw
            .try_into()
            .map_err(|_| GatewayError::InvalidSignature)?;
        self.verifying_key
            .verify(&payload.body, &Signature::from_bytes(&raw))
            .map_err(|_| GatewayError::InvalidSignature)?;
        VerifiedCallback::from_json(&payload.body)
    }
}
