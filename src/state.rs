// src/state.rs
use std::sync::Arc;

use crate::{
    config::{AppConfig, BrokerBackend, StorageBackend},
    errors::DispatchResult,
    services::{
        assignment_service::AssignmentService,
        broker::{EventBroker, InProcessBroker, RedisBroker},
        gateways::GatewayRegistry,
        ledger_service::LedgerService,
        payment_service::PaymentService,
        persistence::RedisPersistence,
        profile_service::ProfileService,
        ride_service::RideService,
        store_service::StoreService,
        tracking_service::TrackingService,
    },
};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub store: Arc<StoreService>,
    pub profile_service: Arc<ProfileService>,
    pub ride_service: Arc<RideService>,
    pub tracking_service: Arc<TrackingService>,
    pub ledger_service: Arc<LedgerService>,
    pub payment_service: Arc<PaymentService>,
    pub config: AppConfig,
}

impl AppState {
    pub async fn new(config: AppConfig) -> DispatchResult<Self> {
        let broker: Arc<dyn EventBroker> = match config.broker_backend {
            BrokerBackend::Redis => Arc::new(RedisBroker::new(&config.redis_url).await?),
            BrokerBackend::Memory => {
                tracing::warn!("BROKER_BACKEND=memory, events reach this instance only");
                Arc::new(InProcessBroker::new())
            }
        };

        let store = match config.storage_backend {
            StorageBackend::Redis => {
                let persistence = RedisPersistence::new(&config.redis_url).await?;
                StoreService::open(Arc::new(persistence)).await?
            }
            StorageBackend::Memory => {
                tracing::warn!("STORAGE_BACKEND=memory, records are lost on restart");
                StoreService::new()
            }
        };
        Ok(Self::assemble(config, Arc::new(store), broker))
    }

    /// In-memory store around `broker`; used directly by tests.
    pub fn with_broker(config: AppConfig, broker: Arc<dyn EventBroker>) -> Self {
        Self::assemble(config, Arc::new(StoreService::new()), broker)
    }

    /// Wires every service around one store and one broker.
    pub fn assemble(config: AppConfig, store: Arc<StoreService>, broker: Arc<dyn EventBroker>) -> Self {
        let profile_service = Arc::new(ProfileService::new(store.clone()));
        let tracking_service = Arc::new(TrackingService::new(
            store.clone(),
            profile_service.clone(),
            broker,
            config.service_region,
            config.spoof_speed_limit_kmh,
        ));
        let assignment_service = Arc::new(AssignmentService::new(profile_service.clone()));
        let ride_service = Arc::new(RideService::new(
            store.clone(),
            profile_service.clone(),
            assignment_service,
            tracking_service.clone(),
            config.pricing(),
        ));
        let ledger_service = Arc::new(LedgerService::new(
            store.clone(),
            tracking_service.clone(),
            config.commission_rate,
        ));
        let payment_service = Arc::new(PaymentService::new(
            store.clone(),
            ledger_service.clone(),
            tracking_service.clone(),
            Arc::new(GatewayRegistry::with_defaults()),
            config.payment_provider.clone(),
        ));

        Self {
            store,
            profile_service,
            ride_service,
            tracking_service,
            ledger_service,
            payment_service,
            config,
        }
    }
}
