// Reconciliation module - GATEWAY OUTCOMES TO LEDGER STATE
// Applies callbacks idempotently, polls confirmations, sweeps stale deposits

mod config;
mod worker;

pub use config::ReconciliationConfig;
pub use worker::{
    CallbackOutcome, ReconciliationError, ReconciliationEvent, ReconciliationStats,
    ReconciliationWorker, TickReport, MAX_QUEUED_EVENTS, PAYMENT_NOT_RECEIVED,
};
