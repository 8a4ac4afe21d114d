// src/services/ledger_service.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        payment::{
            DriverStats, LedgerEntry, Payment, PaymentStatus, SettlementOutcome, TransactionType, Wallet,
            WalletStats,
        },
        ride::{Ride, RideStatus},
    },
    services::{
        store_service::{RowKey, StoreService, UnitOfWork},
        tracking_service::TrackingService,
    },
    utils::{
        fare::FarePrecision,
        id_generator::{IdGenerator, IdType},
    },
};

const RECENT_TRANSACTIONS: usize = 20;

/// Turns completed payments into wallet movements and ledger rows.
pub struct LedgerService {
    store: Arc<StoreService>,
    tracking_service: Arc<TrackingService>,
    commission_rate: Decimal,
}

impl LedgerService {
    pub fn new(store: Arc<StoreService>, tracking_service: Arc<TrackingService>, commission_rate: Decimal) -> Self {
        Self {
            store,
            tracking_service,
            commission_rate,
        }
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    /// Settles `payment_id` exactly once. Runs under the ride and payment row locks and
    /// commits payment, wallets, ledger rows and the ride's FINISHED status together.
    pub async fn process_success(&self, payment_id: &str) -> DispatchResult<SettlementOutcome> {
        let ride_id = self.store.get_payment(payment_id).await?.ride_id;

        let _ride_row = self.store.lock_row(RowKey::Ride(ride_id.clone())).await;
        let _payment_row = self.store.lock_row(RowKey::Payment(payment_id.to_string())).await;

        let mut payment = self.store.get_payment(payment_id).await?;
        if payment.status == PaymentStatus::Completed {
            tracing::info!("Payment {} already settled, skipping", payment_id);
            return Ok(SettlementOutcome::AlreadySettled {
                payment_id: payment.id,
            });
        }
        let mut ride = self.store.get_ride(&ride_id).await?;

        let now = Utc::now();
        let mut work = self.store.begin();

        payment.status = PaymentStatus::Completed;
        payment.failure_reason = None;
        payment.updated_at = now;

        let amount = payment.amount;
        let commission = FarePrecision::Cents.round(amount * self.commission_rate);

        if let Some(driver_id) = ride.driver_id.clone() {
            let wallet = self.wallet_for(&driver_id, &mut work, now).await;

            let earning_note = if payment.provider.is_cash() {
                format!("Cash earning from ride {}", ride.id)
            } else {
                format!("Earning from ride {}", ride.id)
            };
            // Earning is recorded gross; any commission is its own negative row
            work.append_entry(entry(&wallet, amount, TransactionType::Earning, &ride, &payment, now, earning_note));

            if payment.provider.is_cash() {
                // The driver already holds the cash, only commission touches the balance
                if self.commission_rate > Decimal::ZERO {
                    work.credit_wallet(&wallet.id, -commission);
                    work.append_entry(entry(&wallet, -commission, TransactionType::Commission, &ride, &payment, now,
                        format!("Commission deduction for cash ride {}", ride.id)));
                }
            } else {
                work.credit_wallet(&wallet.id, amount - commission);
                work.append_entry(entry(&wallet, -commission, TransactionType::Commission, &ride, &payment, now,
                    format!("Platform fee for ride {} ({})", ride.id, payment.provider)));
            }
        } else {
            tracing::warn!("Ride {} has no driver, settling without a driver credit", ride.id);
        }

        let rider_wallet = self.wallet_for(&ride.rider_id, &mut work, now).await;
        work.append_entry(entry(&rider_wallet, -amount, TransactionType::RidePayment, &ride, &payment, now,
            format!("Payment for ride {} ({})", ride.id, payment.provider)));

        // Fails the whole unit if the ride is not COMPLETED or PAID
        ride.transition_to(RideStatus::Finished, now)?;

        work.put_payment(payment.clone()).put_ride(ride.clone());
        self.store.commit(work).await?;

        tracing::info!(
            "Settled payment {} for ride {}: amount {}, commission {}",
            payment.id,
            ride.id,
            amount,
            commission
        );
        self.tracking_service.announce_status(&ride).await;

        Ok(SettlementOutcome::Settled {
            payment_id: payment.id,
            ride_id: ride.id,
        })
    }

    /// Marks the payment FAILED. Wallets and the ride are left alone so it can be paid again.
    pub async fn process_failure(&self, payment_id: &str, reason: &str) -> DispatchResult<SettlementOutcome> {
        let _payment_row = self.store.lock_row(RowKey::Payment(payment_id.to_string())).await;
        let mut payment = self.store.get_payment(payment_id).await?;

        if payment.status == PaymentStatus::Completed {
            tracing::warn!("Ignoring failure report for settled payment {}", payment_id);
            return Ok(SettlementOutcome::AlreadySettled {
                payment_id: payment.id,
            });
        }

        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.to_string());
        payment.updated_at = Utc::now();

        let mut work = self.store.begin();
        work.put_payment(payment.clone());
        self.store.commit(work).await?;

        tracing::warn!("Payment {} failed: {}", payment.id, reason);
        Ok(SettlementOutcome::Failed {
            payment_id: payment.id,
            reason: reason.to_string(),
        })
    }

    /// Existing wallet, or one staged into `work` for users that never got one.
    async fn wallet_for(&self, user_id: &str, work: &mut UnitOfWork, now: DateTime<Utc>) -> Wallet {
        if let Some(wallet) = self.store.read(|t| t.wallet_for_user(user_id).cloned()).await {
            return wallet;
        }
        let wallet = Wallet {
            id: IdGenerator::generate(IdType::Wallet),
            user_id: user_id.to_string(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        work.create_wallet(wallet.clone());
        wallet
    }

    pub async fn wallet_stats(&self, user_id: &str) -> DispatchResult<WalletStats> {
        let (wallet, mut entries, ridden) = self
            .store
            .read(|t| {
                let wallet = t.wallet_for_user(user_id).cloned();
                let entries = wallet
                    .as_ref()
                    .map(|w| t.entries_for_wallet(&w.id).cloned().collect::<Vec<_>>())
                    .unwrap_or_default();
                let ridden = t
                    .rides
                    .values()
                    .filter(|r| r.rider_id == user_id)
                    .map(|r| r.id.clone())
                    .collect::<HashSet<_>>();
                (wallet, entries, ridden)
            })
            .await;
        let wallet = wallet.ok_or_else(|| AppError::not_found(format!("Wallet for user {}", user_id)))?;

        let total_income = entries
            .iter()
            .filter(|e| e.transaction_type == TransactionType::Earning)
            .map(|e| e.amount)
            .sum();
        let total_spent = self.store.completed_payment_total(&ridden).await;

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(RECENT_TRANSACTIONS);

        Ok(WalletStats {
            wallet_balance: wallet.balance,
            total_income,
            total_spent,
            recent_transactions: entries,
        })
    }

    pub async fn driver_stats(&self, driver_id: &str) -> DispatchResult<DriverStats> {
        let stats = self
            .store
            .read(|t| {
                let wallet = t.wallet_for_user(driver_id)?;
                let earnings: Vec<Decimal> = t
                    .entries_for_wallet(&wallet.id)
                    .filter(|e| e.transaction_type == TransactionType::Earning)
                    .map(|e| e.amount)
                    .collect();
                Some(DriverStats {
                    total_earnings: earnings.iter().copied().sum(),
                    total_trips: earnings.len(),
                    wallet_balance: wallet.balance,
                })
            })
            .await;
        stats.ok_or_else(|| AppError::not_found(format!("Wallet for user {}", driver_id)))
    }
}

fn entry(
    wallet: &Wallet,
    amount: Decimal,
    transaction_type: TransactionType,
    ride: &Ride,
    payment: &Payment,
    at: DateTime<Utc>,
    description: String,
) -> LedgerEntry {
    LedgerEntry {
        id: IdGenerator::generate(IdType::Transaction),
        wallet_id: wallet.id.clone(),
        amount,
        transaction_type,
        ride_id: Some(ride.id.clone()),
        payment_id: Some(payment.id.clone()),
        description,
        timestamp: at,
    }
}
