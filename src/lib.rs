// gigwallet - multi-currency wallet ledger and commission engine
//
// Deposits and withdrawals travel through external payment gateways, peer
// transfers settle synchronously, and the platform earns a configurable commission.

pub mod app;
pub mod cli;
pub mod commission;
pub mod gateway;
pub mod job;
pub mod ledger;
pub mod primitives;
pub mod reconciliation;
pub mod settings;
pub mod storage;
pub mod tracing;
