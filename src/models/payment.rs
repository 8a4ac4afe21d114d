// src/models/payment.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Gateway a payment went through, always upper-case (`CASH`, `DEMO`, ...).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ProviderTag(String);

impl ProviderTag {
    pub const CASH: &'static str = "CASH";
    pub const DEMO: &'static str = "DEMO";

    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_uppercase())
    }

    pub fn cash() -> Self {
        Self(Self::CASH.to_string())
    }

    pub fn demo() -> Self {
        Self(Self::DEMO.to_string())
    }

    pub fn is_cash(&self) -> bool {
        self.0 == Self::CASH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    pub id: String,
    pub ride_id: String,
    pub transaction_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub provider: ProviderTag,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    RidePayment,
    Commission,
    Earning,
    Topup,
    Withdrawal,
    Refund,
}

/// Immutable ledger row. Amounts are signed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub ride_id: Option<String>,
    pub payment_id: Option<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub ride_id: String,
    pub method: String,
    pub amount_paid: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct InitiatePaymentResponse {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub is_cash: bool,
    pub transaction_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmCashRequest {
    pub ride_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DemoCallbackQuery {
    pub ride_id: String,
    #[serde(rename = "trxID")]
    pub trx_id: String,
}

/// What settling a payment produced.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Settled { payment_id: String, ride_id: String },
    AlreadySettled { payment_id: String },
    Failed { payment_id: String, reason: String },
}

/// Raw provider callback parameters (query string or form body).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct CallbackData(pub HashMap<String, String>);

impl CallbackData {
    pub fn transaction_id(&self) -> Option<&str> {
        ["transaction_id", "trxID", "tran_id"]
            .iter()
            .find_map(|key| self.0.get(*key))
            .map(String::as_str)
    }

    pub fn status(&self) -> Option<&str> {
        self.0.get("status").map(String::as_str)
    }

    pub fn ride_id(&self) -> Option<&str> {
        self.0.get("ride_id").map(String::as_str)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WalletStats {
    pub wallet_balance: Decimal,
    pub total_income: Decimal,
    pub total_spent: Decimal,
    pub recent_transactions: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DriverStats {
    pub total_earnings: Decimal,
    pub total_trips: usize,
    pub wallet_balance: Decimal,
}
