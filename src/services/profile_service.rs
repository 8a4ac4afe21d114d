// src/services/profile_service.rs
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        payment::Wallet,
        profile::{Profile, RegisterProfileRequest},
        vehicle::VehicleType,
    },
    services::store_service::{RowKey, StoreService},
    utils::{
        geo::{is_valid_coordinate, GeoPoint},
        id_generator::{IdGenerator, IdType},
    },
};

#[async_trait]
pub trait ProfileOperations: Send + Sync {
    async fn register_profile(&self, request: RegisterProfileRequest) -> DispatchResult<Profile>;
    async fn get_profile(&self, user_id: &str) -> DispatchResult<Profile>;
    async fn set_online(&self, user_id: &str, is_online: bool) -> DispatchResult<Profile>;
    async fn update_location(&self, user_id: &str, lat: f64, lng: f64) -> DispatchResult<Profile>;
    async fn online_drivers(&self) -> DispatchResult<Vec<Profile>>;
    async fn list_vehicle_types(&self) -> DispatchResult<Vec<VehicleType>>;
    async fn get_vehicle_type(&self, vehicle_type_id: &str) -> DispatchResult<VehicleType>;
}

pub struct ProfileService {
    store: Arc<StoreService>,
}

impl ProfileService {
    pub fn new(store: Arc<StoreService>) -> Self {
        Self { store }
    }

    /// Every profile gets a wallet once it exists.
    async fn on_profile_created(&self, profile: &Profile) -> DispatchResult<()> {
        let now = Utc::now();
        let wallet = Wallet {
            id: IdGenerator::generate(IdType::Wallet),
            user_id: profile.id.clone(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };

        let mut work = self.store.begin();
        work.create_wallet(wallet);
        self.store.commit(work).await?;

        tracing::debug!("Wallet created for user {}", profile.id);
        Ok(())
    }

    async fn modify<F>(&self, user_id: &str, change: F) -> DispatchResult<Profile>
    where
        F: FnOnce(&mut Profile) + Send,
    {
        let _row = self.store.lock_row(RowKey::Profile(user_id.to_string())).await;
        let mut profile = self.store.get_profile(user_id).await?;
        change(&mut profile);

        let mut work = self.store.begin();
        work.put_profile(profile.clone());
        self.store.commit(work).await?;
        Ok(profile)
    }
}

#[async_trait]
impl ProfileOperations for ProfileService {
    async fn register_profile(&self, request: RegisterProfileRequest) -> DispatchResult<Profile> {
        tracing::info!("Registering {} profile: {}", request.role, request.username);

        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(AppError::validation_error("username", "Username is required"));
        }
        if !request.email.contains('@') {
            return Err(AppError::validation_error("email", "Invalid email address"));
        }

        let taken = self
            .store
            .read(|t| t.profiles.values().any(|p| p.username == username))
            .await;
        if taken {
            return Err(AppError::Conflict(format!("Username {} is taken", username)));
        }

        let profile = Profile {
            id: IdGenerator::generate(IdType::User),
            username,
            email: request.email,
            role: request.role,
            is_online: false,
            current_location: None,
            location_updated_at: None,
            created_at: Utc::now(),
        };

        let mut work = self.store.begin();
        work.put_profile(profile.clone());
        self.store.commit(work).await?;

        self.on_profile_created(&profile).await?;
        Ok(profile)
    }

    async fn get_profile(&self, user_id: &str) -> DispatchResult<Profile> {
        self.store.get_profile(user_id).await
    }

    async fn set_online(&self, user_id: &str, is_online: bool) -> DispatchResult<Profile> {
        let profile = self.modify(user_id, |p| p.is_online = is_online).await?;
        tracing::info!("User {} is now {}", user_id, if is_online { "online" } else { "offline" });
        Ok(profile)
    }

    async fn update_location(&self, user_id: &str, lat: f64, lng: f64) -> DispatchResult<Profile> {
        if !is_valid_coordinate(lat, lng) {
            return Err(AppError::InvalidCoordinates { point: "Location".to_string() });
        }

        self.modify(user_id, |p| {
            p.current_location = Some(GeoPoint::new(lat, lng));
            p.location_updated_at = Some(Utc::now());
        })
        .await
    }

    async fn online_drivers(&self) -> DispatchResult<Vec<Profile>> {
        let mut drivers = self
            .store
            .read(|t| {
                t.profiles
                    .values()
                    .filter(|p| p.is_dispatchable())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        drivers.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::debug!("{} drivers online", drivers.len());
        Ok(drivers)
    }

    async fn list_vehicle_types(&self) -> DispatchResult<Vec<VehicleType>> {
        let mut types = self
            .store
            .read(|t| t.vehicle_types.values().cloned().collect::<Vec<_>>())
            .await;
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    async fn get_vehicle_type(&self, vehicle_type_id: &str) -> DispatchResult<VehicleType> {
        self.store
            .read(|t| t.vehicle_types.get(vehicle_type_id).cloned())
            .await
            .ok_or_else(|| AppError::validation_error("requested_vehicle_type", "Invalid vehicle type"))
    }
}
