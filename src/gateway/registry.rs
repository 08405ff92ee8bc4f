// Gateway registry - which adapter serves which rail

use crate::gateway::{GatewayAdapter, GatewayError};
use crate::primitives::{Currency, Rail};
use std::collections::HashMap;
use std::sync::Arc;

/// Adapters keyed by the rail they serve
#[derive(Clone, Default)]
pub struct Gateways {
    adapters: HashMap<Rail, Arc<dyn GatewayAdapter>>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own rail, replacing any previous one
    pub fn with_adapter(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(adapter.rail(), adapter);
        self
    }

    pub fn for_rail(&self, rail: Rail) -> Result<&Arc<dyn GatewayAdapter>, GatewayError> {
        self.adapters.get(&rail).ok_or(GatewayError::NoAdapter(rail))
    }

    pub fn for_currency(&self, currency: Currency) -> Result<&Arc<dyn GatewayAdapter>, GatewayError> {
        self.for_rail(currency.rail())
    }

    pub fn rails(&self) -> impl Iterator<Item = Rail> + '_ {
        self.adapters.keys().copied()
    }
}
