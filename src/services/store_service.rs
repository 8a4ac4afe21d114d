// src/services/store_service.rs
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{hash_map::Entry as HashEntry, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        payment::{LedgerEntry, Payment, PaymentStatus, Wallet},
        profile::Profile,
        ride::Ride,
        vehicle::VehicleType,
    },
    services::persistence::{ChangeSet, EphemeralPersistence, Persistence, Snapshot},
};

// Row lock key strategies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Ride(String),
    Payment(String),
    Profile(String),
}

impl RowKey {
    pub fn to_key(&self) -> String {
        match self {
            RowKey::Ride(id) => format!("ride:{}", id),
            RowKey::Payment(id) => format!("payment:{}", id),
            RowKey::Profile(id) => format!("profile:{}", id),
        }
    }
}

/// One mutex per row, created on first use. Holding the guard is `SELECT ... FOR UPDATE`.
#[derive(Default)]
pub struct RowLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RowLocks {
    pub async fn lock(&self, key: &RowKey) -> RowGuard {
        let key = key.to_key();
        // Clone the Arc out so the shard guard is released before awaiting
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        RowGuard {
            guard: Some(mutex.lock_owned().await),
            key,
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Releases the row on drop and forgets its mutex once nobody holds or waits on it.
pub struct RowGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one is the map alone
        self.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[derive(Default)]
pub struct Tables {
    pub profiles: HashMap<String, Profile>,
    pub vehicle_types: HashMap<String, VehicleType>,
    pub rides: HashMap<String, Ride>,
    pub payments: HashMap<String, Payment>,
    pub wallets: HashMap<String, Wallet>,
    pub wallet_by_user: HashMap<String, String>,
    pub ledger: Vec<LedgerEntry>,
}

impl Tables {
    fn seeded() -> Self {
        let mut tables = Tables::default();
        for vehicle_type in VehicleType::seed() {
            tables.vehicle_types.insert(vehicle_type.id.clone(), vehicle_type);
        }
        tables
    }

    fn restore(snapshot: Snapshot) -> Self {
        let mut tables = Tables::seeded();
        tables.apply(ChangeSet {
            rides: snapshot.rides,
            removed_rides: Vec::new(),
            payments: snapshot.payments,
            profiles: snapshot.profiles,
            wallets: snapshot.wallets,
            entries: snapshot.entries,
        });
        tables
    }

    fn apply(&mut self, changes: ChangeSet) {
        for ride in changes.rides {
            self.rides.insert(ride.id.clone(), ride);
        }
        for ride_id in changes.removed_rides {
            self.rides.remove(&ride_id);
        }
        for payment in changes.payments {
            self.payments.insert(payment.id.clone(), payment);
        }
        for profile in changes.profiles {
            self.profiles.insert(profile.id.clone(), profile);
        }
        for wallet in changes.wallets {
            self.wallet_by_user.insert(wallet.user_id.clone(), wallet.id.clone());
            self.wallets.insert(wallet.id.clone(), wallet);
        }
        self.ledger.extend(changes.entries);
    }

    pub fn wallet_for_user(&self, user_id: &str) -> Option<&Wallet> {
        self.wallet_by_user
            .get(user_id)
            .and_then(|wallet_id| self.wallets.get(wallet_id))
    }

    pub fn payment_for_ride(&self, ride_id: &str) -> Option<&Payment> {
        self.payments.values().find(|p| p.ride_id == ride_id)
    }

    pub fn payment_by_transaction(&self, transaction_id: &str) -> Option<&Payment> {
        self.payments
            .values()
            .find(|p| p.transaction_id.as_deref() == Some(transaction_id))
    }

    pub fn entries_for_wallet<'a>(&'a self, wallet_id: &'a str) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        self.ledger.iter().filter(move |e| e.wallet_id == wallet_id)
    }
}

/// Writes staged against the store, applied together by `StoreService::commit`.
#[derive(Default)]
pub struct UnitOfWork {
    rides: HashMap<String, Option<Ride>>,
    payments: HashMap<String, Payment>,
    profiles: HashMap<String, Profile>,
    new_wallets: Vec<Wallet>,
    credits: HashMap<String, Decimal>,
    entries: Vec<LedgerEntry>,
}

impl UnitOfWork {
    pub fn put_ride(&mut self, ride: Ride) -> &mut Self {
        self.rides.insert(ride.id.clone(), Some(ride));
        self
    }

    pub fn delete_ride(&mut self, ride_id: &str) -> &mut Self {
        self.rides.insert(ride_id.to_string(), None);
        self
    }

    pub fn put_payment(&mut self, payment: Payment) -> &mut Self {
        self.payments.insert(payment.id.clone(), payment);
        self
    }

    pub fn put_profile(&mut self, profile: Profile) -> &mut Self {
        self.profiles.insert(profile.id.clone(), profile);
        self
    }

    pub fn create_wallet(&mut self, wallet: Wallet) -> &mut Self {
        self.new_wallets.push(wallet);
        self
    }

    /// Staged as a delta so concurrent credits to one wallet commute.
    pub fn credit_wallet(&mut self, wallet_id: &str, delta: Decimal) -> &mut Self {
        *self.credits.entry(wallet_id.to_string()).or_default() += delta;
        self
    }

    pub fn append_entry(&mut self, entry: LedgerEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
            && self.payments.is_empty()
            && self.profiles.is_empty()
            && self.new_wallets.is_empty()
            && self.credits.is_empty()
            && self.entries.is_empty()
    }

    /// Resolves staged writes against `tables` into final row images.
    fn into_changes(self, tables: &Tables, now: DateTime<Utc>) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (ride_id, ride) in self.rides {
            match ride {
                Some(ride) => changes.rides.push(ride),
                None => changes.removed_rides.push(ride_id),
            }
        }
        changes.payments = self.payments.into_values().collect();
        changes.profiles = self.profiles.into_values().collect();

        let mut wallets: HashMap<String, Wallet> =
            self.new_wallets.into_iter().map(|w| (w.id.clone(), w)).collect();
        for (wallet_id, delta) in self.credits {
            let wallet = match wallets.entry(wallet_id) {
                HashEntry::Occupied(slot) => slot.into_mut(),
                HashEntry::Vacant(slot) => match tables.wallets.get(slot.key()) {
                    Some(existing) => slot.insert(existing.clone()),
                    None => continue,
                },
            };
            wallet.balance += delta;
            wallet.updated_at = now;
        }
        changes.wallets = wallets.into_values().collect();
        changes.entries = self.entries;
        changes
    }

    fn validate(&self, tables: &Tables) -> DispatchResult<()> {
        let mut seen = HashSet::new();
        for payment in self.payments.values() {
            let Some(txn) = payment.transaction_id.as_deref() else {
                continue;
            };
            if !seen.insert(txn) {
                return Err(AppError::Conflict(format!("Duplicate transaction id {}", txn)));
            }
            if let Some(other) = tables.payment_by_transaction(txn) {
                if other.id != payment.id && !self.payments.contains_key(&other.id) {
                    return Err(AppError::Conflict(format!("Duplicate transaction id {}", txn)));
                }
            }
        }

        for payment in self.payments.values() {
            let existing = tables.payments.values().find(|p| p.ride_id == payment.ride_id);
            if let Some(existing) = existing {
                if existing.id != payment.id {
                    return Err(AppError::Conflict(format!("Ride {} already has a payment", payment.ride_id)));
                }
            }
        }

        let wallet_exists = |wallet_id: &str| {
            tables.wallets.contains_key(wallet_id) || self.new_wallets.iter().any(|w| w.id == wallet_id)
        };
        for wallet_id in self.credits.keys().map(String::as_str).chain(self.entries.iter().map(|e| e.wallet_id.as_str())) {
            if !wallet_exists(wallet_id) {
                return Err(AppError::internal_error(format!("Wallet {} does not exist", wallet_id)));
            }
        }

        for wallet in &self.new_wallets {
            if tables.wallet_by_user.contains_key(&wallet.user_id) {
                return Err(AppError::Conflict(format!("User {} already has a wallet", wallet.user_id)));
            }
        }

        Ok(())
    }
}

pub struct StoreService {
    tables: RwLock<Tables>,
    locks: RowLocks,
    persistence: Arc<dyn Persistence>,
}

impl StoreService {
    /// A store that keeps nothing past the process.
    pub fn new() -> Self {
        Self::with_tables(Tables::seeded(), Arc::new(EphemeralPersistence))
    }

    /// Loads every durable record from `persistence`, which then receives each commit.
    pub async fn open(persistence: Arc<dyn Persistence>) -> DispatchResult<Self> {
        let snapshot = persistence.load().await?;
        Ok(Self::with_tables(Tables::restore(snapshot), persistence))
    }

    fn with_tables(tables: Tables, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            tables: RwLock::new(tables),
            locks: RowLocks::default(),
            persistence,
        }
    }

    pub async fn lock_row(&self, key: RowKey) -> RowGuard {
        self.locks.lock(&key).await
    }

    /// Rows currently locked or awaited.
    pub fn locked_rows(&self) -> usize {
        self.locks.len()
    }

    /// Runs `f` against a consistent snapshot of the committed tables.
    pub async fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.read().await;
        f(&tables)
    }

    pub async fn get_ride(&self, ride_id: &str) -> DispatchResult<Ride> {
        self.read(|t| t.rides.get(ride_id).cloned())
            .await
            .ok_or_else(|| AppError::ride_not_found(ride_id))
    }

    pub async fn get_payment(&self, payment_id: &str) -> DispatchResult<Payment> {
        self.read(|t| t.payments.get(payment_id).cloned())
            .await
            .ok_or_else(|| AppError::payment_not_found(payment_id))
    }

    pub async fn get_profile(&self, user_id: &str) -> DispatchResult<Profile> {
        self.read(|t| t.profiles.get(user_id).cloned())
            .await
            .ok_or_else(|| AppError::profile_not_found(user_id))
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::default()
    }

    /// Validates, persists, then applies every staged write under one write lock.
    /// On error nothing is persisted or applied.
    pub async fn commit(&self, work: UnitOfWork) -> DispatchResult<()> {
        if work.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write().await;
        work.validate(&tables)?;

        let changes = work.into_changes(&tables, Utc::now());
        self.persistence.save(&changes).await?;

        let appended = changes.entries.len();
        tables.apply(changes);

        tracing::debug!("Committed unit of work ({} ledger entries)", appended);
        Ok(())
    }

    pub async fn completed_payment_total(&self, ride_ids: &HashSet<String>) -> Decimal {
        self.read(|t| {
            t.payments
                .values()
                .filter(|p| p.status == PaymentStatus::Completed && ride_ids.contains(&p.ride_id))
                .map(|p| p.amount)
                .sum()
        })
        .await
    }
}

impl Default for StoreService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payment::{ProviderTag, TransactionType};
    use rust_decimal_macros::dec;

    fn wallet(id: &str, user_id: &str) -> Wallet {
        Wallet {
            id: id.to_string(),
            user_id: user_id.to_string(),
            balance: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn entry(wallet_id: &str, amount: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: format!("txn-{}", amount),
            wallet_id: wallet_id.to_string(),
            amount,
            transaction_type: TransactionType::Topup,
            ride_id: None,
            payment_id: None,
            description: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn payment(id: &str, ride_id: &str, txn: &str) -> Payment {
        Payment {
            id: id.to_string(),
            ride_id: ride_id.to_string(),
            transaction_id: Some(txn.to_string()),
            amount: dec!(100),
            status: PaymentStatus::Pending,
            provider: ProviderTag::demo(),
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_seeded_vehicle_types() {
        let store = StoreService::new();
        let car = store.read(|t| t.vehicle_types.get("car").cloned()).await.unwrap();
        assert_eq!(car.base_fare, dec!(50));
        assert_eq!(car.per_km_rate, dec!(25));
    }

    #[tokio::test]
    async fn test_commit_applies_credits_and_entries() {
        let store = StoreService::new();
        let mut work = store.begin();
        work.create_wallet(wallet("wal-1", "usr-1"));
        store.commit(work).await.unwrap();

        let mut work = store.begin();
        work.credit_wallet("wal-1", dec!(10.50))
            .credit_wallet("wal-1", dec!(4.50))
            .append_entry(entry("wal-1", dec!(15.00)));
        store.commit(work).await.unwrap();

        let (balance, entries) = store
            .read(|t| (t.wallet_for_user("usr-1").unwrap().balance, t.entries_for_wallet("wal-1").count()))
            .await;
        assert_eq!(balance, dec!(15.00));
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_state_untouched() {
        let store = StoreService::new();
        let mut work = store.begin();
        work.create_wallet(wallet("wal-1", "usr-1"));
        store.commit(work).await.unwrap();

        let mut work = store.begin();
        work.put_payment(payment("pay-1", "rid-1", "BK_1"))
            .credit_wallet("wal-1", dec!(100))
            .credit_wallet("wal-missing", dec!(5));
        assert!(store.commit(work).await.is_err());

        let (balance, payments) = store
            .read(|t| (t.wallets["wal-1"].balance, t.payments.len()))
            .await;
        assert_eq!(balance, Decimal::ZERO);
        assert_eq!(payments, 0);
    }

    #[tokio::test]
    async fn test_transaction_id_is_unique() {
        let store = StoreService::new();
        let mut work = store.begin();
        work.put_payment(payment("pay-1", "rid-1", "BK_SAME"));
        store.commit(work).await.unwrap();

        let mut work = store.begin();
        work.put_payment(payment("pay-2", "rid-2", "BK_SAME"));
        assert!(matches!(store.commit(work).await, Err(AppError::Conflict(_))));

        // Re-saving the same payment keeps its own id
        let mut work = store.begin();
        work.put_payment(payment("pay-1", "rid-1", "BK_SAME"));
        assert!(store.commit(work).await.is_ok());
    }

    #[tokio::test]
    async fn test_row_lock_serializes_holders() {
        let store = Arc::new(StoreService::new());
        let guard = store.lock_row(RowKey::Ride("rid-1".to_string())).await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_row(RowKey::Ride("rid-1".to_string())).await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_row_locks_are_forgotten_after_release() {
        let store = Arc::new(StoreService::new());
        let guard = store.lock_row(RowKey::Ride("rid-1".to_string())).await;
        let other = store.lock_row(RowKey::Payment("pay-1".to_string())).await;
        assert_eq!(store.locked_rows(), 2);

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_row(RowKey::Ride("rid-1".to_string())).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The waiter keeps the row's mutex alive past the first release
        drop(guard);
        contender.await.unwrap();
        drop(other);
        assert_eq!(store.locked_rows(), 0);
    }

    #[derive(Default, Clone)]
    struct DiskRows {
        profiles: HashMap<String, Profile>,
        rides: HashMap<String, Ride>,
        payments: HashMap<String, Payment>,
        wallets: HashMap<String, Wallet>,
        entries: Vec<LedgerEntry>,
    }

    #[derive(Default)]
    struct MemoryDisk {
        rows: std::sync::Mutex<DiskRows>,
        offline: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Persistence for MemoryDisk {
        async fn load(&self) -> DispatchResult<Snapshot> {
            let rows = self.rows.lock().unwrap().clone();
            Ok(Snapshot {
                profiles: rows.profiles.into_values().collect(),
                rides: rows.rides.into_values().collect(),
                payments: rows.payments.into_values().collect(),
                wallets: rows.wallets.into_values().collect(),
                entries: rows.entries,
            })
        }

        async fn save(&self, changes: &ChangeSet) -> DispatchResult<()> {
            if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AppError::RedisConnection("disk offline".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            for ride in &changes.rides {
                rows.rides.insert(ride.id.clone(), ride.clone());
            }
            for ride_id in &changes.removed_rides {
                rows.rides.remove(ride_id);
            }
            for payment in &changes.payments {
                rows.payments.insert(payment.id.clone(), payment.clone());
            }
            for profile in &changes.profiles {
                rows.profiles.insert(profile.id.clone(), profile.clone());
            }
            for wallet in &changes.wallets {
                rows.wallets.insert(wallet.id.clone(), wallet.clone());
            }
            rows.entries.extend(changes.entries.iter().cloned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reopened_store_sees_committed_rows() {
        let disk = Arc::new(MemoryDisk::default());
        let store = StoreService::open(disk.clone()).await.unwrap();

        let mut work = store.begin();
        work.create_wallet(wallet("wal-1", "usr-1"))
            .credit_wallet("wal-1", dec!(40))
            .append_entry(entry("wal-1", dec!(40)))
            .put_payment(payment("pay-1", "rid-1", "BK_1"));
        store.commit(work).await.unwrap();

        let mut work = store.begin();
        work.credit_wallet("wal-1", dec!(-15.25));
        store.commit(work).await.unwrap();
        drop(store);

        let reopened = StoreService::open(disk).await.unwrap();
        let (balance, entries, payment, car) = reopened
            .read(|t| {
                (
                    t.wallet_for_user("usr-1").map(|w| w.balance),
                    t.entries_for_wallet("wal-1").count(),
                    t.payment_by_transaction("BK_1").map(|p| p.id.clone()),
                    t.vehicle_types.contains_key("car"),
                )
            })
            .await;
        assert_eq!(balance, Some(dec!(24.75)));
        assert_eq!(entries, 1);
        assert_eq!(payment.as_deref(), Some("pay-1"));
        assert!(car);
    }

    #[tokio::test]
    async fn test_unpersisted_commit_is_not_applied() {
        let disk = Arc::new(MemoryDisk::default());
        let store = StoreService::open(disk.clone()).await.unwrap();
        let mut work = store.begin();
        work.create_wallet(wallet("wal-1", "usr-1"));
        store.commit(work).await.unwrap();

        disk.offline.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut work = store.begin();
        work.credit_wallet("wal-1", dec!(100))
            .append_entry(entry("wal-1", dec!(100)))
            .put_payment(payment("pay-1", "rid-1", "BK_1"));
        assert!(matches!(store.commit(work).await, Err(AppError::RedisConnection(_))));

        let (balance, entries, payments) = store
            .read(|t| (t.wallets["wal-1"].balance, t.ledger.len(), t.payments.len()))
            .await;
        assert_eq!(balance, Decimal::ZERO);
        assert_eq!(entries, 0);
        assert_eq!(payments, 0);
    }
}
