// Commission settings - the admin-tunable economics of the wallet

use crate::primitives::Currency;
use crate::storage::StoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Highest precision the crypto currency may be configured with
pub const MAX_CRYPTO_DECIMALS: u32 = 18;

/// Errors from validating or applying a settings change
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Field {field} is not a number: {value:?}")]
    NotNumeric { field: String, value: String },

    #[error("Commission percentage must be within 0..=100, got {0}")]
    PercentageOutOfRange(Decimal),

    #[error("Field {field} must not be negative")]
    NegativeThreshold { field: String },

    #[error("{currency}: minimum {operation} {min} exceeds maximum {max}")]
    InvertedRange {
        currency: Currency,
        operation: &'static str,
        min: Decimal,
        max: Decimal,
    },

    #[error("Crypto precision must be within 0..=18, got {0}")]
    InvalidPrecision(u32),

    #[error("No limits configured for {0}")]
    MissingCurrency(Currency),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

// ============================================================================
// CURRENCY LIMITS
// ============================================================================

/// Per-currency availability and thresholds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyLimits {
    #[serde(with = "rust_decimal::serde::str")]
    pub min_deposit: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_deposit: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_withdrawal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_withdrawal: Decimal,
    pub wallet_enabled: bool,
}

impl Default for CurrencyLimits {
    fn default() -> Self {
        Self {
            min_deposit: dec!(1),
            max_deposit: dec!(100000),
            min_withdrawal: dec!(1),
            max_withdrawal: dec!(100000),
            wallet_enabled: true,
        }
    }
}

impl CurrencyLimits {
    pub fn with_deposit_range(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_deposit = min;
        self.max_deposit = max;
        self
    }

    pub fn with_withdrawal_range(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_withdrawal = min;
        self.max_withdrawal = max;
        self
    }

    pub fn with_wallet_enabled(mut self, enabled: bool) -> Self {
        self.wallet_enabled = enabled;
        self
    }

    fn validate(&self, currency: Currency) -> Result<(), SettingsError> {
        let fields = [
            ("min_deposit", self.min_deposit),
            ("max_deposit", self.max_deposit),
            ("min_withdrawal", self.min_withdrawal),
            ("max_withdrawal", self.max_withdrawal),
        ];
        for (name, value) in fields {
            if value < Decimal::ZERO {
                return Err(SettingsError::NegativeThreshold {
                    field: format!("{}.{}", currency, name),
                });
            }
        }
        if self.min_deposit > self.max_deposit {
            return Err(SettingsError::InvertedRange {
                currency,
                operation: "deposit",
                min: self.min_deposit,
                max: self.max_deposit,
            });
        }
        if self.min_withdrawal > self.max_withdrawal {
            return Err(SettingsError::InvertedRange {
                currency,
                operation: "withdrawal",
                min: self.min_withdrawal,
                max: self.max_withdrawal,
            });
        }
        Ok(())
    }
}

// ============================================================================
// COMMISSION SETTINGS
// ============================================================================

/// Versioned singleton holding the platform's commission rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionSettings {
    /// Bumped on every accepted change
    pub version: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub percentage: Decimal,
    pub on_deposits: bool,
    pub on_transfers: bool,
    pub crypto_decimals: u32,
    pub currencies: BTreeMap<Currency, CurrencyLimits>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            version: 0,
            percentage: Decimal::ZERO,
            on_deposits: false,
            on_transfers: false,
            crypto_decimals: 6,
            currencies: Currency::ALL
                .iter()
                .map(|c| (*c, CurrencyLimits::default()))
                .collect(),
            updated_at: Utc::now(),
        }
    }
}

impl CommissionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_percentage(mut self, percentage: Decimal) -> Self {
        self.percentage = percentage;
        self
    }

    pub fn with_on_deposits(mut self, enabled: bool) -> Self {
        self.on_deposits = enabled;
        self
    }

    pub fn with_on_transfers(mut self, enabled: bool) -> Self {
        self.on_transfers = enabled;
        self
    }

    pub fn with_crypto_decimals(mut self, decimals: u32) -> Self {
        self.crypto_decimals = decimals;
        self
    }

    pub fn with_limits(mut self, currency: Currency, limits: CurrencyLimits) -> Self {
        self.currencies.insert(currency, limits);
        self
    }

    /// Limits for a currency, if configured
    pub fn limits(&self, currency: Currency) -> Option<&CurrencyLimits> {
        self.currencies.get(&currency)
    }

    /// A missing entry counts as disabled
    pub fn wallet_enabled(&self, currency: Currency) -> bool {
        self.limits(currency).is_some_and(|l| l.wallet_enabled)
    }

    pub fn precision(&self, currency: Currency) -> u32 {
        currency.precision(self.crypto_decimals)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.percentage < Decimal::ZERO || self.percentage > dec!(100) {
            return Err(SettingsError::PercentageOutOfRange(self.percentage));
        }
        if self.crypto_decimals > MAX_CRYPTO_DECIMALS {
            return Err(SettingsError::InvalidPrecision(self.crypto_decimals));
        }
        for currency in Currency::ALL {
            self.limits(currency)
                .ok_or(SettingsError::MissingCurrency(currency))?
                .validate(currency)?;
        }
        Ok(())
    }
}

// ============================================================================
// SETTINGS PATCH
// ============================================================================

/// Partial update to the limits of one currency.
///
/// Numeric fields arrive as text from the admin form and are parsed on apply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyLimitsPatch {
    pub min_deposit: Option<String>,
    pub max_deposit: Option<String>,
    pub min_withdrawal: Option<String>,
    pub max_withdrawal: Option<String>,
    pub wallet_enabled: Option<bool>,
}

impl CurrencyLimitsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_deposit(mut self, value: &str) -> Self {
        self.min_deposit = Some(value.to_string());
        self
    }

    pub fn with_max_deposit(mut self, value: &str) -> Self {
        self.max_deposit = Some(value.to_string());
        self
    }

    pub fn with_min_withdrawal(mut self, value: &str) -> Self {
        self.min_withdrawal = Some(value.to_string());
        self
    }

    pub fn with_max_withdrawal(mut self, value: &str) -> Self {
        self.max_withdrawal = Some(value.to_string());
        self
    }

    pub fn with_wallet_enabled(mut self, enabled: bool) -> Self {
        self.wallet_enabled = Some(enabled);
        self
    }

    fn apply(&self, currency: Currency, limits: &mut CurrencyLimits) -> Result<(), SettingsError> {
        let numeric = [
            ("min_deposit", &self.min_deposit, &mut limits.min_deposit),
            ("max_deposit", &self.max_deposit, &mut limits.max_deposit),
            ("min_withdrawal", &self.min_withdrawal, &mut limits.min_withdrawal),
            ("max_withdrawal", &self.max_withdrawal, &mut limits.max_withdrawal),
        ];
        for (name, input, target) in numeric {
            if let Some(raw) = input {
                *target = parse_decimal(&format!("{}.{}", currency, name), raw)?;
            }
        }
        if let Some(enabled) = self.wallet_enabled {
            limits.wallet_enabled = enabled;
        }
        Ok(())
    }
}

/// Partial update to [`CommissionSettings`] submitted by an admin
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub percentage: Option<String>,
    pub on_deposits: Option<bool>,
    pub on_transfers: Option<bool>,
    pub crypto_decimals: Option<u32>,
    #[serde(default)]
    pub currencies: BTreeMap<Currency, CurrencyLimitsPatch>,
}

impl SettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_percentage(mut self, value: &str) -> Self {
        self.percentage = Some(value.to_string());
        self
    }

    pub fn with_on_deposits(mut self, enabled: bool) -> Self {
        self.on_deposits = Some(enabled);
        self
    }

    pub fn with_on_transfers(mut self, enabled: bool) -> Self {
        self.on_transfers = Some(enabled);
        self
    }

    pub fn with_crypto_decimals(mut self, decimals: u32) -> Self {
        self.crypto_decimals = Some(decimals);
        self
    }

    pub fn with_currency(mut self, currency: Currency, patch: CurrencyLimitsPatch) -> Self {
        self.currencies.insert(currency, patch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Produce the next settings version, or reject the whole patch
    pub fn apply(&self, current: &CommissionSettings) -> Result<CommissionSettings, SettingsError> {
        let mut next = current.clone();

        if let Some(raw) = &self.percentage {
            next.percentage = parse_decimal("percentage", raw)?;
        }
        if let Some(enabled) = self.on_deposits {
            next.on_deposits = enabled;
        }
        if let Some(enabled) = self.on_transfers {
            next.on_transfers = enabled;
        }
        if let Some(decimals) = self.crypto_decimals {
            next.crypto_decimals = decimals;
        }
        for (currency, patch) in &self.currencies {
            let limits = next.currencies.entry(*currency).or_default();
            patch.apply(*currency, limits)?;
        }

        next.validate()?;
        next.version = current.version + 1;
        next.updated_at = Utc::now();
        Ok(next)
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, SettingsError> {
    Decimal::from_str(raw.trim()).map_err(|_| SettingsError::NotNumeric {
        field: field.to_string(),
        value: raw.to_string(),
    })
}
