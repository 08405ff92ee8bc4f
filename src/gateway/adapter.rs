// Gateway Adapter - the narrow interface every payment rail is reached through

use crate::primitives::{Currency, ExternalRef, IdempotencyKey, Rail, TransactionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// GATEWAY ADAPTER TRAIT
// ============================================================================

/// One external payment rail (card/UPI, PayPal-like, crypto)
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn rail(&self) -> Rail;

    /// Start a collection or payout with the provider
    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiatedPayment, GatewayError>;

    /// Authenticate a provider callback and decode it
    fn verify_callback(&self, payload: &CallbackPayload) -> Result<VerifiedCallback, GatewayError>;

    /// Current state of a payment, for rails that are polled.
    ///
    /// `None` if the provider does not know the reference.
    async fn query_status(
        &self,
        external_ref: &ExternalRef,
    ) -> Result<Option<VerifiedCallback>, GatewayError>;
}

// ============================================================================
// REQUESTS AND RESPONSES
// ============================================================================

/// Direction of money relative to the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// User pays in (deposit)
    Collection,
    /// Platform pays out (withdrawal)
    Payout,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub transaction_id: TransactionId,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub currency: Currency,
    pub user_ref: UserId,
    pub purpose: PaymentPurpose,
    /// Forwarded so the provider can deduplicate retried initiations
    pub idempotency_key: IdempotencyKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitiatedPayment {
    pub external_ref: ExternalRef,
    /// Checkout URL for fiat rails, deposit address for crypto
    pub redirect_or_address: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Raw callback as received from the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackPayload {
    pub body: Vec<u8>,
    /// Base64 signature over `body`
    pub signature: String,
}

impl CallbackPayload {
    pub fn new(body: impl Into<Vec<u8>>, signature: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            signature: signature.into(),
        }
    }
}

/// Provider-reported outcome of a payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallbackStatus {
    Succeeded,
    Confirming,
    Failed { reason: String },
}

/// Authenticated callback content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifiedCallback {
    pub external_ref: ExternalRef,
    #[serde(flatten)]
    pub status: CallbackStatus,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub confirmed_amount: Option<Decimal>,
    #[serde(default)]
    pub confirmations: u32,
}

impl VerifiedCallback {
    pub fn succeeded(external_ref: ExternalRef) -> Self {
        Self {
            external_ref,
            status: CallbackStatus::Succeeded,
            confirmed_amount: None,
            confirmations: 0,
        }
    }

    pub fn confirming(external_ref: ExternalRef, confirmations: u32) -> Self {
        Self {
            external_ref,
            status: CallbackStatus::Confirming,
            confirmed_amount: None,
            confirmations,
        }
    }

    pub fn failed(external_ref: ExternalRef, reason: &str) -> Self {
        Self {
            external_ref,
            status: CallbackStatus::Failed {
                reason: reason.to_string(),
            },
            confirmed_amount: None,
            confirmations: 0,
        }
    }

    pub fn with_confirmed_amount(mut self, amount: Decimal) -> Self {
        self.confirmed_amount = Some(amount);
        self
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, GatewayError> {
        serde_json::to_vec(self).map_err(|e| GatewayError::MalformedCallback(e.to_string()))
    }

    pub fn from_json(body: &[u8]) -> Result<Self, GatewayError> {
        serde_json::from_slice(body).map_err(|e| GatewayError::MalformedCallback(e.to_string()))
    }
}

// ============================================================================
// GATEWAY ERROR
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Initiation rejected by provider: {0}")]
    InitiationFailed(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider timed out")]
    Timeout,

    #[error("Callback signature is invalid")]
    InvalidSignature,

    #[error("Malformed callback: {0}")]
    MalformedCallback(String),

    #[error("No gateway configured for rail {0}")]
    NoAdapter(Rail),
}

impl GatewayError {
    /// Transient faults worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout)
    }
}
