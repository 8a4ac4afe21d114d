// src/services/gateways/demo.rs
use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{GatewayError, GatewayStatus, InitiateOutcome, PaymentGateway, VerifyOutcome};
use crate::{
    models::payment::{CallbackData, ProviderTag},
    utils::id_generator::IdGenerator,
};

/// Simulated bKash-style wallet: hands out a checkout link that calls straight back.
pub struct DemoGateway {
    callback_path: String,
}

impl Default for DemoGateway {
    fn default() -> Self {
        Self {
            callback_path: "/payments/demo-callback".to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for DemoGateway {
    fn provider(&self) -> ProviderTag {
        ProviderTag::demo()
    }

    async fn initiate(&self, amount: Decimal, ride_id: &str, payer_email: &str) -> Result<InitiateOutcome, GatewayError> {
        if amount <= Decimal::ZERO {
            return Ok(InitiateOutcome {
                status: GatewayStatus::Failed,
                transaction_id: None,
                redirect_url: None,
                message: format!("Amount must be positive, got {}", amount),
            });
        }

        let transaction_id = IdGenerator::gateway_reference("BK");
        tracing::debug!("Demo checkout {} for {} ({})", transaction_id, ride_id, payer_email);

        Ok(InitiateOutcome {
            status: GatewayStatus::Success,
            redirect_url: Some(format!(
                "{}?ride_id={}&trxID={}",
                self.callback_path, ride_id, transaction_id
            )),
            transaction_id: Some(transaction_id),
            message: "Demo payment initiated successfully.".to_string(),
        })
    }

    async fn verify(&self, callback: &CallbackData) -> Result<VerifyOutcome, GatewayError> {
        let Some(transaction_id) = callback.transaction_id() else {
            return Ok(VerifyOutcome {
                status: GatewayStatus::Failed,
                transaction_id: None,
                message: "Missing transaction id".to_string(),
            });
        };

        // The simulator lets callers force the unhappy path
        let failed = callback
            .status()
            .is_some_and(|s| matches!(s.to_ascii_uppercase().as_str(), "FAILED" | "FAILURE" | "CANCEL" | "CANCELLED"));
        if failed {
            return Ok(VerifyOutcome {
                status: GatewayStatus::Failed,
                transaction_id: Some(transaction_id.to_string()),
                message: "Payment was declined by the payer".to_string(),
            });
        }

        Ok(VerifyOutcome {
            status: GatewayStatus::Success,
            transaction_id: Some(transaction_id.to_string()),
            message: "Payment verified successfully.".to_string(),
        })
    }
}
