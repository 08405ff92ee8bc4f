// Storage module - PERSISTENCE
// Ledger state in sled, mutated through one atomic multi-tree commit

mod store;

pub use store::{CommitBatch, CommitRejection, HistoryPage, LedgerStore, StoreError};
