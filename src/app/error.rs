use crate::gateway::GatewayError;
use crate::ledger::LedgerError;
use crate::reconciliation::ReconciliationError;
use crate::settings::SettingsError;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}
