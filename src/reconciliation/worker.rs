// Reconciliation Worker - maps gateway outcomes onto pending transactions
// Handles signed callbacks, polls crypto confirmations, and sweeps stale deposits

use crate::gateway::{CallbackPayload, CallbackStatus, GatewayError, Gateways, VerifiedCallback};
use crate::job::{jittered, wait_or_shutdown};
use crate::ledger::{
    Confirmation, Ledger, LedgerError, Transaction, TransactionKind, TransactionStatus,
};
use crate::primitives::{ExternalRef, Rail, TransactionId};
use crate::reconciliation::ReconciliationConfig;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Reason recorded on deposits the sweep gives up on
pub const PAYMENT_NOT_RECEIVED: &str = "payment not received";

/// Events kept for `poll_events`; the oldest are dropped beyond this
pub const MAX_QUEUED_EVENTS: usize = 1024;

// ============================================================================
// OUTCOMES AND EVENTS
// ============================================================================

/// What a callback did to the ledger
#[derive(Clone, Debug, PartialEq)]
pub enum CallbackOutcome {
    /// The transaction was completed by this callback
    Settled(Transaction),
    /// Confirmations recorded, not yet enough to settle
    Confirming(Transaction),
    /// The transaction was failed by this callback
    Failed(Transaction),
    /// The transaction was already final; nothing changed
    Duplicate(Transaction),
    /// No transaction carries this reference; dropped
    Unmatched(ExternalRef),
}

/// Events emitted by the worker
#[derive(Clone, Debug, PartialEq)]
pub enum ReconciliationEvent {
    Settled {
        tx_id: TransactionId,
        external_ref: ExternalRef,
    },
    Confirming {
        tx_id: TransactionId,
        confirmations: u32,
    },
    Failed {
        tx_id: TransactionId,
        reason: String,
    },
    Expired {
        tx_id: TransactionId,
    },
    Duplicate {
        tx_id: TransactionId,
    },
    Unmatched {
        external_ref: ExternalRef,
    },
    InvalidSignature {
        rail: Rail,
    },
    /// A validly signed callback named a transaction owned by another rail
    WrongRail {
        tx_id: TransactionId,
        rail: Rail,
    },
}

/// Counters since the worker started
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationStats {
    pub callbacks_received: u64,
    pub settled: u64,
    pub confirming: u64,
    pub duplicates: u64,
    pub unmatched: u64,
    pub invalid_signatures: u64,
    pub wrong_rail: u64,
    pub failed: u64,
    pub expired: u64,
}

/// Result of one poll or sweep pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub settled: usize,
    pub confirming: usize,
    pub failed: usize,
    pub expired: usize,
}

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Callback from {received} for a {expected} transaction {tx_id}")]
    WrongRail {
        tx_id: TransactionId,
        expected: Rail,
        received: Rail,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// RECONCILIATION WORKER
// ============================================================================

pub struct ReconciliationWorker {
    ledger: Arc<Ledger>,
    gateways: Gateways,
    config: ReconciliationConfig,
    stats: Mutex<ReconciliationStats>,
    events: Mutex<VecDeque<ReconciliationEvent>>,
    event_capacity: usize,
}

impl ReconciliationWorker {
    pub fn new(
        ledger: Arc<Ledger>,
        gateways: Gateways,
        config: ReconciliationConfig,
    ) -> Result<Self, ReconciliationError> {
        config.validate()?;
        Ok(Self {
            ledger,
            gateways,
            config,
            stats: Mutex::new(ReconciliationStats::default()),
            events: Mutex::new(VecDeque::new()),
            event_capacity: MAX_QUEUED_EVENTS,
        })
    }

    /// Keep at most `capacity` undrained events
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn stats(&self) -> ReconciliationStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Drain events emitted since the last call
    pub fn poll_events(&self) -> Vec<ReconciliationEvent> {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        events.drain(..).collect()
    }

    // ========================================================================
    // CALLBACKS
    // ========================================================================

    /// Verify and apply a provider callback.
    ///
    /// An invalid signature is an error and applies nothing, as is a callback
    /// for a transaction that belongs to another rail. Callbacks for unknown
    /// references or already-final transactions are acknowledged.
    #[instrument(name = "reconciliation.on_callback", skip(self, payload), err)]
    pub async fn on_callback(
        &self,
        rail: Rail,
        payload: &CallbackPayload,
    ) -> Result<CallbackOutcome, ReconciliationError> {
        let adapter = self.gateways.for_rail(rail)?;
        let verified = match adapter.verify_callback(payload) {
            Ok(verified) => verified,
            Err(GatewayError::InvalidSignature) => {
                warn!(%rail, "callback with invalid signature rejected");
                self.record(|s| s.invalid_signatures += 1);
                self.emit(ReconciliationEvent::InvalidSignature { rail });
                return Err(GatewayError::InvalidSignature.into());
            }
            Err(e) => return Err(e.into()),
        };
        self.record(|s| s.callbacks_received += 1);
        self.apply(rail, verified).await
    }

    async fn apply(
        &self,
        rail: Rail,
        update: VerifiedCallback,
    ) -> Result<CallbackOutcome, ReconciliationError> {
        let Some(tx) = self.ledger.transaction_by_external_ref(&update.external_ref)? else {
            warn!(external_ref = %update.external_ref, "callback matches no transaction");
            self.record(|s| s.unmatched += 1);
            self.emit(ReconciliationEvent::Unmatched {
                external_ref: update.external_ref.clone(),
            });
            return Ok(CallbackOutcome::Unmatched(update.external_ref));
        };

        let expected = tx.currency().rail();
        if expected != rail {
            warn!(
                tx_id = %tx.id(),
                %expected,
                received = %rail,
                "callback from the wrong rail rejected"
            );
            self.record(|s| s.wrong_rail += 1);
            self.emit(ReconciliationEvent::WrongRail { tx_id: tx.id(), rail });
            return Err(ReconciliationError::WrongRail {
                tx_id: tx.id(),
                expected,
                received: rail,
            });
        }

        if tx.status().is_final() {
            debug!(tx_id = %tx.id(), status = %tx.status(), "duplicate callback acknowledged");
            self.record(|s| s.duplicates += 1);
            self.emit(ReconciliationEvent::Duplicate { tx_id: tx.id() });
            return Ok(CallbackOutcome::Duplicate(tx));
        }

        let needs_confirmations = tx.currency().rail().requires_confirmations();
        let confirmed = update.confirmations >= self.config.required_confirmations;
        match &update.status {
            CallbackStatus::Failed { reason } => self.fail(&tx, reason).await,
            CallbackStatus::Succeeded if !needs_confirmations || confirmed => {
                self.settle(&tx, &update).await
            }
            CallbackStatus::Confirming if needs_confirmations && confirmed => {
                self.settle(&tx, &update).await
            }
            CallbackStatus::Succeeded | CallbackStatus::Confirming => {
                let updated = self.ledger.mark_confirming(tx.id(), update.confirmations).await?;
                self.record(|s| s.confirming += 1);
                self.emit(ReconciliationEvent::Confirming {
                    tx_id: updated.id(),
                    confirmations: updated.confirmations(),
                });
                Ok(CallbackOutcome::Confirming(updated))
            }
        }
    }

    async fn settle(
        &self,
        tx: &Transaction,
        update: &VerifiedCallback,
    ) -> Result<CallbackOutcome, ReconciliationError> {
        let mut confirmation = Confirmation::new()
            .with_external_ref(update.external_ref.clone())
            .with_confirmations(update.confirmations);
        if let Some(amount) = update.confirmed_amount {
            confirmation = confirmation.with_confirmed_amount(amount);
        }

        let result = match tx.kind() {
            TransactionKind::Withdrawal => {
                self.ledger.complete_withdrawal(tx.id(), &confirmation).await
            }
            _ => self.ledger.settle_deposit(tx.id(), &confirmation).await,
        };

        match result {
            Ok(settled) => {
                info!(tx_id = %settled.id(), kind = %settled.kind(), "settled from gateway");
                self.record(|s| s.settled += 1);
                self.emit(ReconciliationEvent::Settled {
                    tx_id: settled.id(),
                    external_ref: update.external_ref.clone(),
                });
                Ok(CallbackOutcome::Settled(settled))
            }
            Err(LedgerError::Underpaid {
                required, received, ..
            }) if tx.kind() == TransactionKind::Deposit => {
                let reason = format!("underpaid: required {}, received {}", required, received);
                self.fail(tx, &reason).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fail(
        &self,
        tx: &Transaction,
        reason: &str,
    ) -> Result<CallbackOutcome, ReconciliationError> {
        let failed = self.ledger.fail_transaction(tx.id(), reason).await?;
        self.record(|s| s.failed += 1);
        self.emit(ReconciliationEvent::Failed {
            tx_id: failed.id(),
            reason: reason.to_string(),
        });
        Ok(CallbackOutcome::Failed(failed))
    }

    // ========================================================================
    // PERIODIC PASSES
    // ========================================================================

    /// Query the provider for crypto transactions still awaiting confirmations.
    ///
    /// Covers pending and confirming deposits and confirming payouts. Confirming
    /// deposits past the confirmation timeout expire; a payout already left, so
    /// it is polled until the provider reports enough confirmations.
    #[instrument(name = "reconciliation.poll_confirmations", skip(self), err)]
    pub async fn poll_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<TickReport, ReconciliationError> {
        let mut report = TickReport::default();
        let min_age = to_chrono(self.config.min_poll_age);
        let timeout = to_chrono(self.config.confirmation_timeout);

        let mut candidates = self
            .ledger
            .open_transactions(TransactionKind::Deposit, TransactionStatus::Confirming)?;
        candidates.extend(
            self.ledger
                .open_transactions(TransactionKind::Deposit, TransactionStatus::Pending)?,
        );
        candidates.extend(
            self.ledger
                .open_transactions(TransactionKind::Withdrawal, TransactionStatus::Confirming)?,
        );
        candidates.retain(|tx| tx.currency().rail().requires_confirmations());

        for tx in candidates {
            if tx.age(now) < min_age {
                continue;
            }
            report.examined += 1;

            if tx.kind() == TransactionKind::Deposit
                && tx.status() == TransactionStatus::Confirming
                && tx.age(now) > timeout
            {
                match self.ledger.expire_transaction(tx.id()).await {
                    Ok(_) => {
                        report.expired += 1;
                        self.record(|s| s.expired += 1);
                        self.emit(ReconciliationEvent::Expired { tx_id: tx.id() });
                    }
                    Err(e) => warn!(tx_id = %tx.id(), error = %e, "expiry skipped"),
                }
                continue;
            }

            let Some(reference) = tx.external_reference() else {
                continue;
            };
            let adapter = self.gateways.for_currency(tx.currency())?;
            let update = match adapter.query_status(reference).await {
                Ok(Some(update)) => update,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tx_id = %tx.id(), error = %e, "status query failed");
                    continue;
                }
            };

            match self.apply(tx.currency().rail(), update).await {
                Ok(CallbackOutcome::Settled(_)) => report.settled += 1,
                Ok(CallbackOutcome::Confirming(_)) => report.confirming += 1,
                Ok(CallbackOutcome::Failed(_)) => report.failed += 1,
                Ok(_) => {}
                Err(e) => warn!(tx_id = %tx.id(), error = %e, "poll update skipped"),
            }
        }

        Ok(report)
    }

    /// Fail pending deposits nobody paid within the pending timeout
    #[instrument(name = "reconciliation.sweep_stale_pending", skip(self), err)]
    pub async fn sweep_stale_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<TickReport, ReconciliationError> {
        let mut report = TickReport::default();
        let timeout = to_chrono(self.config.pending_timeout);

        for tx in self
            .ledger
            .open_transactions(TransactionKind::Deposit, TransactionStatus::Pending)?
        {
            report.examined += 1;
            if tx.age(now) < timeout {
                continue;
            }
            match self.ledger.fail_transaction(tx.id(), PAYMENT_NOT_RECEIVED).await {
                Ok(_) => {
                    report.failed += 1;
                    self.record(|s| s.failed += 1);
                    self.emit(ReconciliationEvent::Failed {
                        tx_id: tx.id(),
                        reason: PAYMENT_NOT_RECEIVED.to_string(),
                    });
                }
                // A callback may have moved it on since the scan
                Err(e) => debug!(tx_id = %tx.id(), error = %e, "sweep skipped"),
            }
        }

        if report.failed > 0 {
            info!(failed = report.failed, "swept stale pending deposits");
        }
        Ok(report)
    }

    /// Poll and sweep on a jittered interval until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "reconciliation worker started"
        );
        while wait_or_shutdown(
            jittered(self.config.tick_interval, self.config.tick_jitter),
            &mut shutdown,
        )
        .await
        {
            let now = Utc::now();
            if let Err(e) = self.poll_confirmations(now).await {
                warn!(error = %e, "confirmation poll failed");
            }
            if let Err(e) = self.sweep_stale_pending(now).await {
                warn!(error = %e, "pending sweep failed");
            }
        }
        info!("reconciliation worker stopped");
    }

    fn record(&self, update: impl FnOnce(&mut ReconciliationStats)) {
        update(&mut self.stats.lock().unwrap_or_else(|p| p.into_inner()));
    }

    fn emit(&self, event: ReconciliationEvent) {
        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if self.event_capacity == 0 {
            return;
        }
        while events.len() >= self.event_capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
