// Primitives module - identifiers, currencies and account keys shared by every component

mod account;
mod currency;
mod ids;

pub use account::{AccountKey, AccountOwner};
pub use currency::{Currency, CurrencyError, Rail, FIAT_DECIMALS};
pub use ids::{ExternalRef, IdError, IdempotencyKey, TransactionId, UserId};
