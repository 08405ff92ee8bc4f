// Currencies and the payment rails that carry them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minor-unit precision shared by every fiat currency
pub const FIAT_DECIMALS: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Unknown currency: {0}")]
    Unknown(String),
}

/// Currencies a wallet can hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Inr,
    Usd,
    Usdt,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Inr, Currency::Usd, Currency::Usdt];

    /// ISO-style currency code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Inr => "INR",
            Currency::Usd => "USD",
            Currency::Usdt => "USDT",
        }
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self, Currency::Usdt)
    }

    /// The payment rail deposits and withdrawals in this currency travel over
    pub fn rail(&self) -> Rail {
        match self {
            Currency::Inr => Rail::CardUpi,
            Currency::Usd => Rail::PayPal,
            Currency::Usdt => Rail::Crypto,
        }
    }

    /// Number of decimal places amounts are kept at
    pub fn precision(&self, crypto_decimals: u32) -> u32 {
        if self.is_crypto() {
            crypto_decimals
        } else {
            FIAT_DECIMALS
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INR" => Ok(Currency::Inr),
            "USD" => Ok(Currency::Usd),
            "USDT" => Ok(Currency::Usdt),
            _ => Err(CurrencyError::Unknown(s.to_string())),
        }
    }
}

// ============================================================================
// RAIL
// ============================================================================

/// External payment rail served by one gateway adapter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    /// Card and UPI processor
    CardUpi,
    /// PayPal-like wallet processor
    PayPal,
    /// Crypto processor, settles after on-chain confirmations
    Crypto,
}

impl Rail {
    pub fn requires_confirmations(&self) -> bool {
        matches!(self, Rail::Crypto)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rail::CardUpi => "card_upi",
            Rail::PayPal => "paypal",
            Rail::Crypto => "crypto",
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
