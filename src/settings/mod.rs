// Settings module - ADMIN-TUNABLE ECONOMICS
// Commission rules and wallet availability, versioned and hot-reloadable

mod model;
mod refresher;
mod store;

pub use model::{
    CommissionSettings, CurrencyLimits, CurrencyLimitsPatch, SettingsError, SettingsPatch,
    MAX_CRYPTO_DECIMALS,
};
pub use refresher::SettingsRefresher;
pub use store::{AdminCaller, SettingsBackend, SettingsStore, SettingsView};
