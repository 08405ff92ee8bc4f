// Account addressing - who owns a balance and in which currency

use crate::primitives::{Currency, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner of a wallet account
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountOwner {
    /// The platform's admin revenue account
    Platform,
    User(UserId),
}

impl AccountOwner {
    pub fn user(&self) -> Option<&UserId> {
        match self {
            AccountOwner::User(id) => Some(id),
            AccountOwner::Platform => None,
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, AccountOwner::Platform)
    }

    /// Stable tag used inside storage keys
    pub(crate) fn storage_tag(&self) -> String {
        match self {
            AccountOwner::Platform => "platform".to_string(),
            AccountOwner::User(id) => format!("user:{}", id),
        }
    }
}

impl From<UserId> for AccountOwner {
    fn from(id: UserId) -> Self {
        AccountOwner::User(id)
    }
}

impl From<&UserId> for AccountOwner {
    fn from(id: &UserId) -> Self {
        AccountOwner::User(id.clone())
    }
}

impl fmt::Display for AccountOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountOwner::Platform => f.write_str("platform"),
            AccountOwner::User(id) => write!(f, "{}", id),
        }
    }
}

/// Composite key of a wallet account.
///
/// The derived ordering is the global lock order: any operation touching
/// several accounts acquires them sorted by this key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub currency: Currency,
    pub owner: AccountOwner,
}

impl AccountKey {
    pub fn new(owner: impl Into<AccountOwner>, currency: Currency) -> Self {
        Self {
            currency,
            owner: owner.into(),
        }
    }

    pub fn platform(currency: Currency) -> Self {
        Self {
            currency,
            owner: AccountOwner::Platform,
        }
    }

    pub(crate) fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::new();
        key.extend_from_slice(self.currency.code().as_bytes());
        key.push(0);
        key.extend_from_slice(self.owner.storage_tag().as_bytes());
        key
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.currency)
    }
}
