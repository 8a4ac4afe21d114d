// src/services/gateways/mod.rs
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::payment::{CallbackData, ProviderTag},
};

pub mod cash;
pub mod demo;

pub use cash::CashGateway;
pub use demo::DemoGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitiateOutcome {
    pub status: GatewayStatus,
    pub transaction_id: Option<String>,
    pub redirect_url: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub status: GatewayStatus,
    pub transaction_id: Option<String>,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    #[error("Provider rejected request: {0}")]
    Rejected(String),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::GatewayFailure(err.to_string())
    }
}

/// What every payment provider has to offer. Settlement never sees a concrete provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> ProviderTag;

    async fn initiate(&self, amount: Decimal, ride_id: &str, payer_email: &str) -> Result<InitiateOutcome, GatewayError>;

    async fn verify(&self, callback: &CallbackData) -> Result<VerifyOutcome, GatewayError>;
}

/// Providers keyed by their upper-case tag.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cash and the demo wallet.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CashGateway));
        registry.register(Arc::new(DemoGateway::default()));
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider().to_string(), gateway);
    }

    pub fn get(&self, name: &str) -> DispatchResult<Arc<dyn PaymentGateway>> {
        let tag = ProviderTag::new(name);
        self.gateways
            .get(tag.as_str())
            .cloned()
            .ok_or_else(|| AppError::UnknownGatewayProvider(tag.to_string()))
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gateways.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = GatewayRegistry::with_defaults();
        assert_eq!(registry.providers(), vec!["CASH", "DEMO"]);
        assert!(registry.get("cash").unwrap().provider().is_cash());
        assert_eq!(registry.get("Demo").unwrap().provider(), ProviderTag::demo());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = GatewayRegistry::with_defaults();
        match registry.get("sslcommerz") {
            Err(AppError::UnknownGatewayProvider(name)) => assert_eq!(name, "SSLCOMMERZ"),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("expected lookup to fail"),
        }
    }
}
