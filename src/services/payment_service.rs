// src/services/payment_service.rs
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        events::PAYMENT_PENDING,
        payment::{
            CallbackData, ConfirmCashRequest, DemoCallbackQuery, DriverStats, InitiatePaymentRequest,
            InitiatePaymentResponse, Payment, PaymentStatus, ProviderTag, SettlementOutcome, WalletStats,
        },
        profile::Profile,
        ride::RideStatus,
    },
    services::{
        gateways::{GatewayRegistry, GatewayStatus, VerifyOutcome},
        ledger_service::LedgerService,
        store_service::{RowKey, StoreService},
        tracking_service::TrackingService,
    },
    utils::id_generator::{IdType, WithGeneratedId},
};

#[async_trait]
pub trait PaymentOperations: Send + Sync {
    async fn initiate(&self, rider: &Profile, request: InitiatePaymentRequest) -> DispatchResult<InitiatePaymentResponse>;
    async fn confirm_cash(&self, driver: &Profile, request: ConfirmCashRequest) -> DispatchResult<SettlementOutcome>;
    async fn handle_callback(&self, data: CallbackData) -> DispatchResult<SettlementOutcome>;
    async fn demo_callback(&self, query: DemoCallbackQuery) -> DispatchResult<SettlementOutcome>;
    async fn wallet_stats(&self, user: &Profile) -> DispatchResult<WalletStats>;
    async fn driver_stats(&self, driver: &Profile) -> DispatchResult<DriverStats>;
}

pub struct PaymentService {
    store: Arc<StoreService>,
    ledger_service: Arc<LedgerService>,
    tracking_service: Arc<TrackingService>,
    gateways: Arc<GatewayRegistry>,
    callback_provider: ProviderTag,
}

impl PaymentService {
    pub fn new(
        store: Arc<StoreService>,
        ledger_service: Arc<LedgerService>,
        tracking_service: Arc<TrackingService>,
        gateways: Arc<GatewayRegistry>,
        callback_provider: ProviderTag,
    ) -> Self {
        Self {
            store,
            ledger_service,
            tracking_service,
            gateways,
            callback_provider,
        }
    }

    async fn payment_by_transaction(&self, transaction_id: &str) -> DispatchResult<Payment> {
        self.store
            .read(|t| t.payment_by_transaction(transaction_id).cloned())
            .await
            .ok_or_else(|| AppError::not_found(format!("Payment with transaction {}", transaction_id)))
    }

    /// Routes a verified callback into the ledger. Only the provider that issued the
    /// transaction may settle it, and cash never settles through a callback.
    async fn settle(
        &self,
        provider: &ProviderTag,
        payment: &Payment,
        verified: VerifyOutcome,
    ) -> DispatchResult<SettlementOutcome> {
        if payment.provider.is_cash() {
            tracing::warn!("Refusing callback for cash payment {}", payment.id);
            return Err(AppError::forbidden("Cash payments settle only when the driver confirms receipt"));
        }
        if &payment.provider != provider {
            tracing::warn!(
                "Refusing {} callback for payment {} issued by {}",
                provider,
                payment.id,
                payment.provider
            );
            return Err(AppError::forbidden(format!(
                "Payment {} was not issued by {}",
                payment.id, provider
            )));
        }

        match verified.status {
            GatewayStatus::Success => self.ledger_service.process_success(&payment.id).await,
            GatewayStatus::Failed => self.ledger_service.process_failure(&payment.id, &verified.message).await,
        }
    }
}

#[async_trait]
impl PaymentOperations for PaymentService {
    async fn initiate(&self, rider: &Profile, request: InitiatePaymentRequest) -> DispatchResult<InitiatePaymentResponse> {
        tracing::info!("Initiating {} payment for ride {}", request.method, request.ride_id);

        let ride = self.store.get_ride(&request.ride_id).await?;
        if ride.rider_id != rider.id {
            return Err(AppError::ride_not_found(&request.ride_id));
        }
        if ride.status != RideStatus::Completed {
            return Err(AppError::bad_request(format!(
                "Ride is {}, only COMPLETED rides can be paid",
                ride.status
            )));
        }

        let gateway = self.gateways.get(&request.method)?;
        let amount = request.amount_paid.unwrap_or_else(|| ride.payable_fare());
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount(format!("Payment amount must be positive, got {}", amount)));
        }

        let existing = self.store.read(|t| t.payment_for_ride(&ride.id).cloned()).await;
        if existing.as_ref().is_some_and(|p| p.status == PaymentStatus::Completed) {
            return Err(AppError::DuplicatePayment);
        }

        // Provider round trip happens before any row is locked or written
        let outcome = gateway.initiate(amount, &ride.id, &rider.email).await?;
        if outcome.status == GatewayStatus::Failed {
            tracing::warn!("Gateway {} refused ride {}: {}", gateway.provider(), ride.id, outcome.message);
            return Err(AppError::GatewayFailure(outcome.message));
        }
        let transaction_id = outcome
            .transaction_id
            .ok_or_else(|| AppError::GatewayFailure("Gateway returned no transaction id".to_string()))?;

        let _ride_row = self.store.lock_row(RowKey::Ride(ride.id.clone())).await;
        let now = Utc::now();
        let mut payment = match self.store.read(|t| t.payment_for_ride(&ride.id).cloned()).await {
            Some(existing) if existing.status == PaymentStatus::Completed => return Err(AppError::DuplicatePayment),
            Some(existing) => existing,
            None => Payment {
                id: String::new(),
                ride_id: ride.id.clone(),
                transaction_id: None,
                amount,
                status: PaymentStatus::Pending,
                provider: gateway.provider(),
                failure_reason: None,
                created_at: now,
                updated_at: now,
            }
            .with_generated_id(IdType::Payment),
        };
        let _payment_row = self.store.lock_row(RowKey::Payment(payment.id.clone())).await;

        payment.amount = amount;
        payment.provider = gateway.provider();
        payment.status = PaymentStatus::Pending;
        payment.transaction_id = Some(transaction_id.clone());
        payment.failure_reason = None;
        payment.updated_at = now;

        let mut work = self.store.begin();
        work.put_payment(payment.clone());
        self.store.commit(work).await?;

        let is_cash = payment.provider.is_cash();
        if is_cash {
            self.tracking_service.announce(&ride, PAYMENT_PENDING).await;
        }

        tracing::info!("Payment {} pending via {} ({})", payment.id, payment.provider, transaction_id);
        Ok(InitiatePaymentResponse {
            payment_id: payment.id,
            status: payment.status,
            is_cash,
            transaction_id,
            checkout_url: outcome.redirect_url,
        })
    }

    async fn confirm_cash(&self, driver: &Profile, request: ConfirmCashRequest) -> DispatchResult<SettlementOutcome> {
        let ride = self.store.get_ride(&request.ride_id).await?;
        if ride.driver_id.as_deref() != Some(driver.id.as_str()) {
            return Err(AppError::forbidden("Only the assigned driver can confirm cash receipt"));
        }

        let payment = self
            .store
            .read(|t| {
                t.payment_for_ride(&ride.id)
                    .filter(|p| p.provider.is_cash() && p.status != PaymentStatus::Failed)
                    .cloned()
            })
            .await
            .ok_or_else(|| AppError::not_found(format!("Pending cash payment for ride {}", ride.id)))?;

        tracing::info!("Driver {} confirmed cash for ride {}", driver.id, ride.id);
        self.ledger_service.process_success(&payment.id).await
    }

    async fn handle_callback(&self, data: CallbackData) -> DispatchResult<SettlementOutcome> {
        let gateway = self.gateways.get(self.callback_provider.as_str())?;
        let verified = gateway.verify(&data).await?;

        let transaction_id = verified
            .transaction_id
            .clone()
            .or_else(|| data.transaction_id().map(str::to_string))
            .ok_or_else(|| AppError::bad_request("Callback carries no transaction id"))?;
        let payment = self.payment_by_transaction(&transaction_id).await?;

        tracing::info!("Callback for payment {} reported {:?}", payment.id, verified.status);
        self.settle(&gateway.provider(), &payment, verified).await
    }

    async fn demo_callback(&self, query: DemoCallbackQuery) -> DispatchResult<SettlementOutcome> {
        let gateway = self.gateways.get(ProviderTag::DEMO)?;
        let data = CallbackData(HashMap::from([
            ("ride_id".to_string(), query.ride_id.clone()),
            ("trxID".to_string(), query.trx_id.clone()),
        ]));
        let verified = gateway.verify(&data).await?;

        let payment = self.payment_by_transaction(&query.trx_id).await?;
        if payment.ride_id != query.ride_id {
            return Err(AppError::bad_request(format!(
                "Transaction {} does not belong to ride {}",
                query.trx_id, query.ride_id
            )));
        }

        self.settle(&gateway.provider(), &payment, verified).await
    }

    async fn wallet_stats(&self, user: &Profile) -> DispatchResult<WalletStats> {
        self.ledger_service.wallet_stats(&user.id).await
    }

    async fn driver_stats(&self, driver: &Profile) -> DispatchResult<DriverStats> {
        if !driver.is_driver() {
            return Err(AppError::forbidden("Only drivers have earnings"));
        }
        self.ledger_service.driver_stats(&driver.id).await
    }
}
