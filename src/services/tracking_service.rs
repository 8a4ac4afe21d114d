// src/services/tracking_service.rs
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        events::RideEvent,
        profile::{Profile, Role},
        ride::{Ride, RideResponse},
    },
    services::{
        broker::{EventBroker, Topic},
        profile_service::{ProfileOperations, ProfileService},
        store_service::StoreService,
    },
    utils::{
        geo::{GeoPoint, ServiceRegion},
        id_generator::{IdGenerator, IdType},
    },
};

/// Per-socket state. `last_fix` is the last accepted position, cleared on reconnect.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub ride_id: Option<String>,
    pub user_id: String,
    pub role: Role,
    pub last_fix: Option<(GeoPoint, DateTime<Utc>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationOutcome {
    Published { receivers: usize },
    /// Ride is not in a trackable state; the fix is dropped without error.
    Ignored,
}

pub struct Connection {
    pub id: String,
    pub events: broadcast::Receiver<String>,
}

pub struct TrackingService {
    store: Arc<StoreService>,
    profile_service: Arc<ProfileService>,
    broker: Arc<dyn EventBroker>,
    region: ServiceRegion,
    speed_limit_kmh: f64,
    memberships: DashMap<Topic, HashSet<String>>,
    connections: DashMap<String, Arc<Mutex<ConnectionState>>>,
}

impl TrackingService {
    pub fn new(
        store: Arc<StoreService>,
        profile_service: Arc<ProfileService>,
        broker: Arc<dyn EventBroker>,
        region: ServiceRegion,
        speed_limit_kmh: f64,
    ) -> Self {
        Self {
            store,
            profile_service,
            broker,
            region,
            speed_limit_kmh,
            memberships: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    pub async fn authorize(&self, ride_id: &str, user_id: &str) -> DispatchResult<bool> {
        let ride = self.store.get_ride(ride_id).await?;
        Ok(ride.is_participant(user_id))
    }

    pub fn subscribe(&self, topic: Topic, connection_id: String) {
        self.memberships.entry(topic).or_default().insert(connection_id);
    }

    pub fn unsubscribe(&self, topic: &Topic, connection_id: &str) {
        let now_empty = match self.memberships.get_mut(topic) {
            Some(mut members) => {
                members.remove(connection_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.memberships.remove_if(topic, |_, members| members.is_empty());
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.memberships.get(topic).map(|m| m.len()).unwrap_or(0)
    }

    pub async fn connect_ride(&self, ride_id: &str, user: &Profile) -> DispatchResult<Connection> {
        if !self.authorize(ride_id, &user.id).await? {
            tracing::warn!("Refusing ride socket for {} on ride {}", user.id, ride_id);
            return Err(AppError::UnauthorizedConnection);
        }

        let topic = Topic::Ride(ride_id.to_string());
        let events = self.broker.subscribe(&topic).await?;
        let id = self.register(Some(ride_id.to_string()), user);
        self.subscribe(topic, id.clone());

        tracing::info!("User {} connected to ride {}", user.id, ride_id);
        Ok(Connection { id, events })
    }

    pub async fn connect_pool(&self, user: &Profile) -> DispatchResult<Connection> {
        if !user.is_driver() {
            return Err(AppError::UnauthorizedConnection);
        }

        let events = self.broker.subscribe(&Topic::DriverPool).await?;
        let id = self.register(None, user);
        self.subscribe(Topic::DriverPool, id.clone());

        tracing::info!("Driver {} joined the pool", user.id);
        Ok(Connection { id, events })
    }

    fn register(&self, ride_id: Option<String>, user: &Profile) -> String {
        let state = Arc::new(Mutex::new(ConnectionState {
            ride_id,
            user_id: user.id.clone(),
            role: user.role,
            last_fix: None,
        }));
        loop {
            let id = IdGenerator::generate(IdType::Connection);
            if let Entry::Vacant(slot) = self.connections.entry(id.clone()) {
                slot.insert(state);
                return id;
            }
        }
    }

    pub async fn disconnect(&self, connection_id: &str) {
        let Some((_, state)) = self.connections.remove(connection_id) else {
            return;
        };
        let state = state.lock().await;
        let topic = match &state.ride_id {
            Some(ride_id) => Topic::Ride(ride_id.clone()),
            None => Topic::DriverPool,
        };
        self.unsubscribe(&topic, connection_id);
        self.broker.release(&topic).await;
        tracing::info!("User {} disconnected from {}", state.user_id, topic);
    }

    pub async fn publish_location(&self, connection_id: &str, lat: f64, lng: f64) -> DispatchResult<LocationOutcome> {
        self.publish_location_at(connection_id, lat, lng, Utc::now()).await
    }

    /// Validates, spoof-checks, persists and fans out one fix. Fixes on one
    /// connection are handled one at a time in arrival order.
    pub async fn publish_location_at(
        &self,
        connection_id: &str,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    ) -> DispatchResult<LocationOutcome> {
        let state = self
            .connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or(AppError::UnauthorizedConnection)?;
        let mut state = state.lock().await;

        let Some(ride_id) = state.ride_id.clone() else {
            return Err(AppError::bad_request("Location updates need a ride connection"));
        };

        let ride = self.store.get_ride(&ride_id).await?;
        if !ride.status.is_trackable() {
            tracing::debug!("Ignoring location for ride {} in status {}", ride_id, ride.status);
            return Ok(LocationOutcome::Ignored);
        }

        self.region.validate_point("Location", lat, lng)?;

        let fix = GeoPoint::new(lat, lng);
        if let Some((previous, previous_at)) = state.last_fix {
            let speed_kmh = implied_speed_kmh(&previous, previous_at, &fix, at);
            if speed_kmh > self.speed_limit_kmh {
                tracing::warn!(
                    "Spoofing suspected for user {} on ride {}: {:.1} km/h",
                    state.user_id,
                    ride_id,
                    speed_kmh
                );
                return Err(AppError::SpoofingDetected { speed_kmh });
            }
        }

        self.profile_service.update_location(&state.user_id, lat, lng).await?;
        state.last_fix = Some((fix, at));

        let event = RideEvent::LocationUpdate {
            lat,
            lng,
            user_id: state.user_id.clone(),
            role: state.role,
        };
        let receivers = self.fan_out(Topic::Ride(ride_id), &event).await;
        Ok(LocationOutcome::Published { receivers })
    }

    /// Best effort: failures are logged and never reach the caller.
    pub async fn publish_status(&self, ride_id: &str, event: &RideEvent) -> usize {
        self.fan_out(Topic::Ride(ride_id.to_string()), event).await
    }

    /// Post-commit hook for every persisted status change of `ride`.
    pub async fn announce_status(&self, ride: &Ride) -> usize {
        self.announce(ride, ride.status.as_str()).await
    }

    /// Same payload as `announce_status` carrying a status outside the ride state machine.
    pub async fn announce(&self, ride: &Ride, status: &str) -> usize {
        let driver_name = match &ride.driver_id {
            Some(driver_id) => self.store.get_profile(driver_id).await.ok().map(|p| p.username),
            None => None,
        };
        let event = RideEvent::RideStatusUpdate {
            ride_id: ride.id.clone(),
            status: status.to_string(),
            driver_name,
            rider_id: Some(ride.rider_id.clone()),
            amount_paid: Some(ride.payable_fare()),
        };
        self.publish_status(&ride.id, &event).await
    }

    pub async fn publish_new_ride(&self, ride: &Ride) -> usize {
        let event = RideEvent::NewRideRequest {
            ride: RideResponse::from(ride.clone()),
        };
        self.fan_out(Topic::DriverPool, &event).await
    }

    async fn fan_out(&self, topic: Topic, event: &RideEvent) -> usize {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Could not encode event for {}: {}", topic, e);
                return 0;
            }
        };

        match self.broker.publish(&topic, payload).await {
            Ok(receivers) => receivers,
            Err(e) => {
                tracing::error!("Broadcast to {} failed: {}", topic, e);
                0
            }
        }
    }
}

/// Speed between two fixes. Any movement with no elapsed time counts as infinite.
pub fn implied_speed_kmh(from: &GeoPoint, from_at: DateTime<Utc>, to: &GeoPoint, to_at: DateTime<Utc>) -> f64 {
    let distance = from.distance_to(to);
    if distance == 0.0 {
        return 0.0;
    }
    let elapsed_hours = (to_at - from_at).num_milliseconds() as f64 / 3_600_000.0;
    if elapsed_hours <= 0.0 {
        return f64::INFINITY;
    }
    distance / elapsed_hours
}
