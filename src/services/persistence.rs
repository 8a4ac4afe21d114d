// src/services/persistence.rs
use async_trait::async_trait;
use redis::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        payment::{LedgerEntry, Payment, Wallet},
        profile::Profile,
        ride::Ride,
    },
};

const PROFILES_KEY: &str = "sparrow:profiles";
const RIDES_KEY: &str = "sparrow:rides";
const PAYMENTS_KEY: &str = "sparrow:payments";
const WALLETS_KEY: &str = "sparrow:wallets";
const LEDGER_KEY: &str = "sparrow:ledger";

/// Final row images produced by one committed unit of work.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub rides: Vec<Ride>,
    pub removed_rides: Vec<String>,
    pub payments: Vec<Payment>,
    pub profiles: Vec<Profile>,
    pub wallets: Vec<Wallet>,
    pub entries: Vec<LedgerEntry>,
}

/// Every durable record, as read back at startup.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub profiles: Vec<Profile>,
    pub rides: Vec<Ride>,
    pub payments: Vec<Payment>,
    pub wallets: Vec<Wallet>,
    pub entries: Vec<LedgerEntry>,
}

/// Durable home of the store's tables. `save` is all-or-nothing.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self) -> DispatchResult<Snapshot>;
    async fn save(&self, changes: &ChangeSet) -> DispatchResult<()>;
}

/// Keeps nothing; state lives and dies with the process.
pub struct EphemeralPersistence;

#[async_trait]
impl Persistence for EphemeralPersistence {
    async fn load(&self) -> DispatchResult<Snapshot> {
        Ok(Snapshot::default())
    }

    async fn save(&self, _changes: &ChangeSet) -> DispatchResult<()> {
        Ok(())
    }
}

/// One hash per table keyed by row id, plus an append-only ledger list.
pub struct RedisPersistence {
    client: Client,
}

impl RedisPersistence {
    pub async fn new(redis_url: &str) -> DispatchResult<Self> {
        let client = Client::open(redis_url).map_err(|e| AppError::RedisConnection(e.to_string()))?;
        client.get_async_connection().await?;

        tracing::info!("Connected to redis store at {}", redis_url);
        Ok(Self { client })
    }

    async fn get_connection(&self) -> DispatchResult<redis::aio::Connection> {
        Ok(self.client.get_async_connection().await?)
    }

    async fn load_table<T: DeserializeOwned>(
        conn: &mut redis::aio::Connection,
        key: &str,
    ) -> DispatchResult<Vec<T>> {
        let rows: HashMap<String, String> = redis::cmd("HGETALL").arg(key).query_async(conn).await?;
        rows.values()
            .map(|raw| serde_json::from_str(raw).map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl Persistence for RedisPersistence {
    async fn load(&self) -> DispatchResult<Snapshot> {
        let mut conn = self.get_connection().await?;

        let raw_entries: Vec<String> = redis::cmd("LRANGE")
            .arg(LEDGER_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        let entries = raw_entries
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<Result<Vec<LedgerEntry>, _>>()?;

        let snapshot = Snapshot {
            profiles: Self::load_table(&mut conn, PROFILES_KEY).await?,
            rides: Self::load_table(&mut conn, RIDES_KEY).await?,
            payments: Self::load_table(&mut conn, PAYMENTS_KEY).await?,
            wallets: Self::load_table(&mut conn, WALLETS_KEY).await?,
            entries,
        };
        tracing::info!(
            "Loaded {} profiles, {} rides, {} payments, {} wallets, {} ledger entries",
            snapshot.profiles.len(),
            snapshot.rides.len(),
            snapshot.payments.len(),
            snapshot.wallets.len(),
            snapshot.entries.len()
        );
        Ok(snapshot)
    }

    async fn save(&self, changes: &ChangeSet) -> DispatchResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for ride in &changes.rides {
            pipe.cmd("HSET").arg(RIDES_KEY).arg(&ride.id).arg(serde_json::to_string(ride)?).ignore();
        }
        for ride_id in &changes.removed_rides {
            pipe.cmd("HDEL").arg(RIDES_KEY).arg(ride_id).ignore();
        }
        for payment in &changes.payments {
            pipe.cmd("HSET").arg(PAYMENTS_KEY).arg(&payment.id).arg(serde_json::to_string(payment)?).ignore();
        }
        for profile in &changes.profiles {
            pipe.cmd("HSET").arg(PROFILES_KEY).arg(&profile.id).arg(serde_json::to_string(profile)?).ignore();
        }
        for wallet in &changes.wallets {
            pipe.cmd("HSET").arg(WALLETS_KEY).arg(&wallet.id).arg(serde_json::to_string(wallet)?).ignore();
        }
        for entry in &changes.entries {
            pipe.cmd("RPUSH").arg(LEDGER_KEY).arg(serde_json::to_string(entry)?).ignore();
        }

        let mut conn = self.get_connection().await?;
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
