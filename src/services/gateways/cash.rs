// src/services/gateways/cash.rs
use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{GatewayError, GatewayStatus, InitiateOutcome, PaymentGateway, VerifyOutcome};
use crate::models::payment::{CallbackData, ProviderTag};

/// Hand cash. Money changes hands offline; settlement waits for the driver to confirm.
pub struct CashGateway;

#[async_trait]
impl PaymentGateway for CashGateway {
    fn provider(&self) -> ProviderTag {
        ProviderTag::cash()
    }

    async fn initiate(&self, _amount: Decimal, ride_id: &str, _payer_email: &str) -> Result<InitiateOutcome, GatewayError> {
        Ok(InitiateOutcome {
            status: GatewayStatus::Success,
            transaction_id: Some(format!("CASH_{}", ride_id)),
            redirect_url: None,
            message: "Hand cash payment recorded. Please pay the driver directly.".to_string(),
        })
    }

    async fn verify(&self, callback: &CallbackData) -> Result<VerifyOutcome, GatewayError> {
        Ok(VerifyOutcome {
            status: GatewayStatus::Success,
            transaction_id: callback.transaction_id().map(str::to_string),
            message: "Cash payment verified.".to_string(),
        })
    }
}
