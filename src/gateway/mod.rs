// Gateway module - PAYMENT RAILS
// Adapters for external payment providers and verification of their callbacks

mod adapter;
mod mock;
mod registry;
mod signature;

pub use adapter::*;
pub use mock::MockGateway;
pub use registry::Gateways;
pub use signature::{CallbackSigner, CallbackVerifier, KeyError};
