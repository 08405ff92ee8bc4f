// Mock Gateway - scriptable in-process payment rail for tests and local runs

use crate::gateway::{
    CallbackPayload, CallbackSigner, GatewayAdapter, GatewayError, InitiateRequest,
    InitiatedPayment, PaymentPurpose, VerifiedCallback,
};
use crate::primitives::{ExternalRef, Rail};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Mock implementation of [`GatewayAdapter`]
pub struct MockGateway {
    rail: Rail,
    signer: CallbackSigner,
    should_succeed: bool,
    failure: Option<GatewayError>,
    delay_ms: u64,
    failures_before_success: usize,
    fixed_reference: Option<ExternalRef>,
    call_count: AtomicUsize,
    /// What `query_status` reports per reference
    statuses: Mutex<HashMap<ExternalRef, VerifiedCallback>>,
}

impl MockGateway {
    /// Create a mock that accepts every initiation
    pub fn new(rail: Rail) -> Self {
        Self {
            rail,
            signer: CallbackSigner::generate(),
            should_succeed: true,
            failure: None,
            delay_ms: 0,
            failures_before_success: 0,
            fixed_reference: None,
            call_count: AtomicUsize::new(0),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Reject every initiation with `error`
    pub fn with_failure(mut self, error: GatewayError) -> Self {
        self.should_succeed = false;
        self.failure = Some(error);
        self
    }

    /// Add a delay before responding to `initiate`
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Fail N initiations as unavailable, then succeed
    pub fn with_failures_then_success(mut self, failures: usize) -> Self {
        self.should_succeed = true;
        self.failures_before_success = failures;
        self
    }

    /// Hand out the same reference on every initiation
    pub fn with_fixed_reference(mut self, reference: ExternalRef) -> Self {
        self.fixed_reference = Some(reference);
        self
    }

    pub fn with_signer(mut self, signer: CallbackSigner) -> Self {
        self.signer = signer;
        self
    }

    pub fn signer(&self) -> &CallbackSigner {
        &self.signer
    }

    /// Number of `initiate` calls so far
    pub fn initiate_calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Signed callback as the provider would deliver it
    pub fn callback(&self, callback: &VerifiedCallback) -> Result<CallbackPayload, GatewayError> {
        self.signer.payload(callback)
    }

    /// Set what `query_status` reports for a reference
    pub fn set_status(&self, status: VerifiedCallback) {
        let mut statuses = self.statuses.lock().unwrap_or_else(|p| p.into_inner());
        statuses.insert(status.external_ref.clone(), status);
    }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    fn rail(&self) -> Rail {
        self.rail
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiatedPayment, GatewayError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let call_num = self.call_count.fetch_add(1, Ordering::SeqCst);
        if call_num < self.failures_before_success {
            return Err(GatewayError::Unavailable("mock outage".to_string()));
        }
        if !self.should_succeed {
            return Err(self
                .failure
                .clone()
                .unwrap_or_else(|| GatewayError::InitiationFailed("mock failure".to_string())));
        }

        let id = Uuid::new_v4().simple().to_string();
        let external_ref = match &self.fixed_reference {
            Some(reference) => reference.clone(),
            None => ExternalRef::new(format!("{}_{}", self.rail.name(), id))
                .map_err(|e| GatewayError::InitiationFailed(e.to_string()))?,
        };
        let redirect_or_address = match (self.rail, request.purpose) {
            (Rail::Crypto, PaymentPurpose::Collection) => format!("0xmock{}", &id[..20]),
            (_, PaymentPurpose::Collection) => format!("https://pay.mock/{}/{}", self.rail, id),
            (_, PaymentPurpose::Payout) => String::new(),
        };

        Ok(InitiatedPayment {
            external_ref,
            redirect_or_address,
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> Result<VerifiedCallback, GatewayError> {
        self.signer.verifier().verify(payload)
    }

    async fn query_status(
        &self,
        external_ref: &ExternalRef,
    ) -> Result<Option<VerifiedCallback>, GatewayError> {
        let statuses = self.statuses.lock().unwrap_or_else(|p| p.into_inner());
        Ok(statuses.get(external_ref).cloned())
    }
}
