// App module - THE WALLET SERVICE
// Wires storage, settings, ledger, gateways and the reconciliation worker together

mod config;
mod error;
mod retry;

pub use config::{Config, EnvOverride, SettingsConfig, StorageConfig};
pub use error::ServiceError;
pub use retry::RetryPolicy;

use crate::commission::{compute_deposit, compute_transfer, DepositQuote, TransferQuote};
use crate::gateway::{
    CallbackPayload, GatewayError, Gateways, InitiateRequest, InitiatedPayment, PaymentPurpose,
};
use crate::ledger::{History, Ledger, LedgerError, Transaction};
use crate::primitives::{AccountOwner, Currency, IdempotencyKey, Rail, UserId};
use crate::reconciliation::{CallbackOutcome, ReconciliationError, ReconciliationWorker};
use crate::settings::{SettingsRefresher, SettingsStore};
use crate::storage::LedgerStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// A deposit waiting for the user to pay
#[derive(Clone, Debug)]
pub struct DepositReceipt {
    pub transaction: Transaction,
    /// `None` when an earlier request with the same key already initiated payment
    pub payment: Option<InitiatedPayment>,
}

pub struct WalletService {
    store: Arc<LedgerStore>,
    settings: Arc<SettingsStore>,
    ledger: Arc<Ledger>,
    gateways: Gateways,
    worker: Arc<ReconciliationWorker>,
    config: Config,
}

impl WalletService {
    /// Open the store under `config.storage.data_dir`
    pub fn open(config: Config, gateways: Gateways) -> Result<Self, ServiceError> {
        let store = Arc::new(LedgerStore::open(&config.storage.data_dir)?);
        Self::with_store(store, config, gateways)
    }

    pub fn with_store(
        store: Arc<LedgerStore>,
        config: Config,
        gateways: Gateways,
    ) -> Result<Self, ServiceError> {
        let settings = Arc::new(SettingsStore::open(
            store.clone(),
            config.settings.initial.clone(),
        )?);
        let ledger = Arc::new(Ledger::new(store.clone(), settings.subscribe()));
        let worker = Arc::new(ReconciliationWorker::new(
            ledger.clone(),
            gateways.clone(),
            config.reconciliation.clone(),
        )?);
        Ok(Self {
            store,
            settings,
            ledger,
            gateways,
            worker,
            config,
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn worker(&self) -> &Arc<ReconciliationWorker> {
        &self.worker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // QUOTES
    // ========================================================================

    /// What a deposit would cost under the current settings
    pub fn quote_deposit(&self, amount: Decimal, currency: Currency) -> Result<DepositQuote, ServiceError> {
        Ok(compute_deposit(amount, currency, &self.settings.get()).map_err(LedgerError::from)?)
    }

    pub fn quote_transfer(
        &self,
        amount: Decimal,
        currency: Currency,
    ) -> Result<TransferQuote, ServiceError> {
        Ok(compute_transfer(amount, currency, &self.settings.get()).map_err(LedgerError::from)?)
    }

    // ========================================================================
    // MONEY MOVEMENT
    // ========================================================================

    /// Create a pending deposit and start the collection with the gateway.
    ///
    /// If the gateway refuses, the pending deposit is failed and the error returned.
    #[instrument(name = "service.request_deposit", skip(self), err)]
    pub async fn request_deposit(
        &self,
        user: &UserId,
        currency: Currency,
        amount: Decimal,
        idempotency_key: IdempotencyKey,
    ) -> Result<DepositReceipt, ServiceError> {
        let ledger = &self.ledger;
        let key = &idempotency_key;
        let tx = self
            .config
            .retry
            .run(
                "deposit",
                move || {
                    let key = key.clone();
                    async move { ledger.deposit(user, currency, amount, None, key).await }
                },
                LedgerError::is_retryable,
            )
            .await?;

        if tx.external_reference().is_some() || tx.status().is_final() {
            return Ok(DepositReceipt {
                transaction: tx,
                payment: None,
            });
        }

        let request = InitiateRequest {
            transaction_id: tx.id(),
            amount: tx.total_payable(),
            currency,
            user_ref: user.clone(),
            purpose: PaymentPurpose::Collection,
            idempotency_key: idempotency_key.clone(),
        };
        let payment = self.initiate(&tx, &request).await?;
        let transaction = self.bind_reference(&tx, &payment).await?;

        info!(tx_id = %transaction.id(), external_ref = %payment.external_ref, "deposit initiated");
        Ok(DepositReceipt {
            transaction,
            payment: Some(payment),
        })
    }

    /// Reserve funds and start the payout with the gateway.
    ///
    /// If the gateway refuses, the withdrawal fails and the reserved amount is restored.
    #[instrument(name = "service.request_withdrawal", skip(self), err)]
    pub async fn request_withdrawal(
        &self,
        user: &UserId,
        currency: Currency,
        amount: Decimal,
        idempotency_key: IdempotencyKey,
    ) -> Result<Transaction, ServiceError> {
        let ledger = &self.ledger;
        let key = &idempotency_key;
        let tx = self
            .config
            .retry
            .run(
                "withdraw",
                move || {
                    let key = key.clone();
                    async move { ledger.withdraw(user, currency, amount, key).await }
                },
                LedgerError::is_retryable,
            )
            .await?;

        if tx.external_reference().is_some() || tx.status().is_final() {
            return Ok(tx);
        }

        let request = InitiateRequest {
            transaction_id: tx.id(),
            amount,
            currency,
            user_ref: user.clone(),
            purpose: PaymentPurpose::Payout,
            idempotency_key: idempotency_key.clone(),
        };
        let payment = self.initiate(&tx, &request).await?;
        self.bind_reference(&tx, &payment).await
    }

    /// Peer-to-peer transfer; no gateway involved
    #[instrument(name = "service.transfer", skip(self), err)]
    pub async fn transfer(
        &self,
        from: &UserId,
        to: &UserId,
        amount: Decimal,
        currency: Currency,
        idempotency_key: IdempotencyKey,
    ) -> Result<(Transaction, Transaction), ServiceError> {
        let ledger = &self.ledger;
        let key = &idempotency_key;
        Ok(self
            .config
            .retry
            .run(
                "transfer",
                move || {
                    let key = key.clone();
                    async move { ledger.transfer(from, to, amount, currency, key).await }
                },
                LedgerError::is_retryable,
            )
            .await?)
    }

    /// Entry point for provider callbacks
    pub async fn handle_callback(
        &self,
        rail: Rail,
        payload: &CallbackPayload,
    ) -> Result<CallbackOutcome, ServiceError> {
        let worker = &self.worker;
        Ok(self
            .config
            .retry
            .run(
                "callback",
                move || async move { worker.on_callback(rail, payload).await },
                |e: &ReconciliationError| matches!(e, ReconciliationError::Ledger(e) if e.is_retryable()),
            )
            .await?)
    }

    async fn initiate(
        &self,
        tx: &Transaction,
        request: &InitiateRequest,
    ) -> Result<InitiatedPayment, ServiceError> {
        let result = match self.gateways.for_currency(request.currency) {
            Ok(adapter) => {
                self.config
                    .retry
                    .run(
                        "initiate",
                        move || adapter.initiate(request),
                        GatewayError::is_retryable,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(payment) => Ok(payment),
            Err(e) => {
                warn!(tx_id = %tx.id(), error = %e, "gateway initiation failed");
                self.ledger
                    .fail_transaction(tx.id(), &format!("gateway initiation failed: {}", e))
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Record the gateway's reference. If that fails the provider already holds a
    /// live payment nothing here can match, so it is reported for manual follow-up.
    async fn bind_reference(
        &self,
        tx: &Transaction,
        payment: &InitiatedPayment,
    ) -> Result<Transaction, ServiceError> {
        match self
            .ledger
            .attach_external_ref(tx.id(), payment.external_ref.clone())
            .await
        {
            Ok(bound) => Ok(bound),
            Err(e) => {
                error!(
                    tx_id = %tx.id(),
                    kind = %tx.kind(),
                    external_ref = %payment.external_ref,
                    amount = %tx.total_payable(),
                    currency = %tx.currency(),
                    error = %e,
                    "gateway payment initiated but its reference could not be recorded; reconcile manually"
                );
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn balance(&self, user: &UserId, currency: Currency) -> Result<Decimal, ServiceError> {
        Ok(self.ledger.balance(&user.into(), currency)?)
    }

    /// Commission accrued by the platform in one currency
    pub fn revenue(&self, currency: Currency) -> Result<Decimal, ServiceError> {
        Ok(self.ledger.balance(&AccountOwner::Platform, currency)?)
    }

    pub fn history(&self, owner: &AccountOwner, currency: Currency) -> History {
        self.ledger.history(owner, currency)
    }

    // ========================================================================
    // BACKGROUND TASKS
    // ========================================================================

    /// Start the settings refresher and the reconciliation worker
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let refresher = SettingsRefresher::new(
            self.settings.clone(),
            self.config.settings.refresh_interval,
        )
        .with_jitter(self.config.settings.refresh_jitter);

        vec![
            tokio::spawn(refresher.run(shutdown.clone())),
            tokio::spawn(self.worker.clone().run(shutdown)),
        ]
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), ServiceError> {
        Ok(self.store.flush()?)
    }
}
