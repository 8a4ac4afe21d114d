// src/services/ride_service.rs
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{DispatchError as AppError, DispatchResult},
    models::{
        profile::{Profile, Role},
        ride::{
            CreateRideRequest, DriverAction, DriverActionResponse, FareEstimate, FareEstimateRequest,
            NegotiationStatus, Ride, RideResponse, RideStatus, RideStatusUpdate, TripDetails,
            UpdateRideDetails,
        },
    },
    services::{
        assignment_service::AssignmentService,
        profile_service::{ProfileOperations, ProfileService},
        store_service::{RowGuard, RowKey, StoreService},
        tracking_service::TrackingService,
    },
    utils::{
        fare::{calculate_fare, distance_to_decimal, FarePrecision, Tariff},
        geo::{GeoPoint, ServiceRegion},
        id_generator::{IdType, WithGeneratedId},
    },
};

#[async_trait]
pub trait RideOperations: Send + Sync {
    async fn estimate_fare(&self, request: FareEstimateRequest) -> DispatchResult<FareEstimate>;
    async fn create_ride(&self, rider: &Profile, request: CreateRideRequest) -> DispatchResult<RideResponse>;
    async fn get_ride(&self, user: &Profile, ride_id: &str) -> DispatchResult<RideResponse>;
    async fn current_ride(&self, user: &Profile) -> DispatchResult<Option<RideResponse>>;
    async fn my_rides(&self, user: &Profile) -> DispatchResult<Vec<RideResponse>>;
    async fn available_rides(&self, driver: &Profile) -> DispatchResult<Vec<RideResponse>>;
    async fn update_ride_details(&self, rider: &Profile, ride_id: &str, patch: UpdateRideDetails) -> DispatchResult<RideResponse>;
    async fn update_status(&self, user: &Profile, ride_id: &str, update: RideStatusUpdate) -> DispatchResult<RideResponse>;
    async fn driver_action(&self, driver: &Profile, ride_id: &str, action: DriverAction) -> DispatchResult<DriverActionResponse>;
    async fn cancel_ride(&self, rider: &Profile, ride_id: &str, reason: Option<String>) -> DispatchResult<RideResponse>;
    async fn propose_fare(&self, rider: &Profile, ride_id: &str, amount: Decimal) -> DispatchResult<RideResponse>;
    async fn respond_to_proposal(&self, driver: &Profile, ride_id: &str, accept: bool) -> DispatchResult<DriverActionResponse>;
}

/// Fare and region settings rides are priced with.
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    pub default_tariff: Tariff,
    pub precision: FarePrecision,
    pub region: ServiceRegion,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            default_tariff: Tariff::default(),
            precision: FarePrecision::default(),
            region: ServiceRegion::default(),
        }
    }
}

pub struct RideService {
    store: Arc<StoreService>,
    profile_service: Arc<ProfileService>,
    assignment_service: Arc<AssignmentService>,
    tracking_service: Arc<TrackingService>,
    pricing: PricingPolicy,
}

impl RideService {
    pub fn new(
        store: Arc<StoreService>,
        profile_service: Arc<ProfileService>,
        assignment_service: Arc<AssignmentService>,
        tracking_service: Arc<TrackingService>,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            store,
            profile_service,
            assignment_service,
            tracking_service,
            pricing,
        }
    }

    async fn tariff_for(&self, vehicle_type: Option<&str>) -> DispatchResult<Tariff> {
        match vehicle_type {
            Some(id) => Ok(self.profile_service.get_vehicle_type(id).await?.tariff()),
            None => Ok(self.pricing.default_tariff.clone()),
        }
    }

    /// Region-checks both ends, then returns (distance, fare) for the trip.
    async fn price_trip(
        &self,
        pickup: &GeoPoint,
        drop: &GeoPoint,
        vehicle_type: Option<&str>,
        duration_minutes: Decimal,
    ) -> DispatchResult<(Decimal, Decimal)> {
        self.pricing.region.validate_trip(pickup, drop)?;

        let distance = distance_to_decimal(pickup.distance_to(drop))?;
        let tariff = self.tariff_for(vehicle_type).await?;
        let fare = calculate_fare(distance, &tariff, duration_minutes, self.pricing.precision);
        Ok((distance, fare))
    }

    async fn lock_ride(&self, ride_id: &str) -> DispatchResult<(RowGuard, Ride)> {
        let guard = self.store.lock_row(RowKey::Ride(ride_id.to_string())).await;
        let ride = self.store.get_ride(ride_id).await?;
        Ok((guard, ride))
    }

    /// Persists `ride` and, once committed, announces a status change if there was one.
    async fn save_ride(&self, guard: RowGuard, ride: Ride, previous: RideStatus) -> DispatchResult<Ride> {
        let mut work = self.store.begin();
        work.put_ride(ride.clone());
        self.store.commit(work).await?;
        drop(guard);

        if ride.status != previous {
            tracing::info!("Ride {} moved {} -> {}", ride.id, previous, ride.status);
            self.tracking_service.announce_status(&ride).await;
        }
        Ok(ride)
    }

    fn require_driver(user: &Profile) -> DispatchResult<()> {
        if user.role != Role::Driver {
            return Err(AppError::forbidden("Only drivers can perform this action"));
        }
        Ok(())
    }

    async fn accept(&self, driver: &Profile, ride_id: &str) -> DispatchResult<DriverActionResponse> {
        let (guard, mut ride) = self.lock_ride(ride_id).await?;
        let previous = ride.status;

        let assigned_to = ride.driver_id.clone();
        match assigned_to.as_deref() {
            Some(current) if current == driver.id && ride.status == RideStatus::Assigned => {
                return Ok(DriverActionResponse::Assigned { ride: ride.into() });
            }
            Some(_) => return Err(AppError::Conflict("Ride already assigned".to_string())),
            None => {}
        }
        if ride.has_rejected(&driver.id) {
            return Err(AppError::forbidden("You already rejected this ride"));
        }
        if ride.status != RideStatus::Requested {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                to: RideStatus::Assigned,
            });
        }

        let now = Utc::now();
        ride.driver_id = Some(driver.id.clone());
        ride.transition_to(RideStatus::Assigned, now)?;
        if ride.negotiation_status == NegotiationStatus::Pending {
            ride.negotiation_status = NegotiationStatus::Accepted;
        }

        let ride = self.save_ride(guard, ride, previous).await?;
        tracing::info!("Driver {} accepted ride {}", driver.id, ride.id);
        Ok(DriverActionResponse::Assigned { ride: ride.into() })
    }

    async fn reject(&self, driver: &Profile, ride_id: &str) -> DispatchResult<DriverActionResponse> {
        let (guard, mut ride) = self.lock_ride(ride_id).await?;
        let previous = ride.status;

        if ride.driver_id.is_some() || ride.status != RideStatus::Requested {
            return Err(AppError::Conflict("Ride is no longer open".to_string()));
        }
        ride.rejected_drivers.insert(driver.id.clone());
        ride.updated_at = Utc::now();
        let ride = self.save_ride(guard, ride, previous).await?;
        tracing::info!("Driver {} rejected ride {}", driver.id, ride.id);

        let next_driver = self.assignment_service.find_nearest_driver(&ride).await?;
        let message = match &next_driver {
            Some(next) => format!("Reassigning to {}", next.username),
            None => "No other drivers available".to_string(),
        };
        Ok(DriverActionResponse::Rejected { message, next_driver })
    }
}

#[async_trait]
impl RideOperations for RideService {
    async fn estimate_fare(&self, request: FareEstimateRequest) -> DispatchResult<FareEstimate> {
        let pickup = GeoPoint::new(request.pickup_lat, request.pickup_lng);
        let drop = GeoPoint::new(request.drop_lat, request.drop_lng);
        let duration = request.duration_minutes.unwrap_or(Decimal::ZERO);
        if duration < Decimal::ZERO {
            return Err(AppError::validation_error("duration_minutes", "Duration cannot be negative"));
        }

        let (distance_km, estimated_fare) = self
            .price_trip(&pickup, &drop, request.requested_vehicle_type.as_deref(), duration)
            .await?;
        Ok(FareEstimate { distance_km, estimated_fare })
    }

    async fn create_ride(&self, rider: &Profile, request: CreateRideRequest) -> DispatchResult<RideResponse> {
        tracing::info!("Creating ride for rider: {}", rider.id);

        if rider.role != Role::Rider {
            return Err(AppError::forbidden("Only riders can request rides"));
        }

        let now = Utc::now();
        if request.is_scheduled {
            match request.scheduled_datetime {
                Some(at) if at > now => {}
                Some(_) => {
                    return Err(AppError::validation_error("scheduled_datetime", "Scheduled time must be in the future"));
                }
                None => {
                    return Err(AppError::validation_error("scheduled_datetime", "Scheduled rides need a date and time"));
                }
            }
        }
        let seats = request.available_seats.unwrap_or(1);
        if seats == 0 {
            return Err(AppError::validation_error("available_seats", "At least one seat is required"));
        }
        if let Some(proposed) = request.proposed_fare {
            if proposed <= Decimal::ZERO {
                return Err(AppError::validation_error("proposed_fare", "Proposed fare must be positive"));
            }
        }

        let pickup = GeoPoint::new(request.pickup_lat, request.pickup_lng);
        let drop = GeoPoint::new(request.drop_lat, request.drop_lng);
        let (distance_km, estimated_fare) = self
            .price_trip(&pickup, &drop, request.requested_vehicle_type.as_deref(), Decimal::ZERO)
            .await?;

        let details = TripDetails {
            pickup,
            pickup_address: request.pickup_address,
            drop,
            drop_address: request.drop_address,
            distance_km,
            estimated_fare,
            requested_vehicle_type: request.requested_vehicle_type,
        };
        let mut ride = Ride::new(rider.id.clone(), details, now).with_generated_id(IdType::Ride);
        ride.is_scheduled = request.is_scheduled;
        ride.scheduled_datetime = request.scheduled_datetime.filter(|_| request.is_scheduled);
        ride.available_seats = seats;
        if let Some(proposed) = request.proposed_fare {
            ride.proposed_fare = Some(proposed);
            ride.negotiation_status = NegotiationStatus::Pending;
        }

        let mut work = self.store.begin();
        work.put_ride(ride.clone());
        self.store.commit(work).await?;

        tracing::info!("Ride {} requested: {} km, fare {}", ride.id, ride.distance_km, ride.estimated_fare);
        self.tracking_service.announce_status(&ride).await;
        self.tracking_service.publish_new_ride(&ride).await;

        Ok(ride.into())
    }

    async fn get_ride(&self, user: &Profile, ride_id: &str) -> DispatchResult<RideResponse> {
        tracing::debug!("Fetching ride: {}", ride_id);
        let ride = self.store.get_ride(ride_id).await?;

        let open_to_drivers = user.is_driver() && ride.status == RideStatus::Requested && ride.driver_id.is_none();
        if !ride.is_participant(&user.id) && !open_to_drivers {
            return Err(AppError::forbidden("Not a participant of this ride"));
        }
        Ok(ride.into())
    }

    async fn current_ride(&self, user: &Profile) -> DispatchResult<Option<RideResponse>> {
        let current = self
            .store
            .read(|t| {
                t.rides
                    .values()
                    .filter(|r| r.is_participant(&user.id))
                    .filter(|r| !matches!(r.status, RideStatus::Cancelled | RideStatus::Finished))
                    .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
                    .cloned()
            })
            .await;
        Ok(current.map(RideResponse::from))
    }

    async fn my_rides(&self, user: &Profile) -> DispatchResult<Vec<RideResponse>> {
        let mut rides = self
            .store
            .read(|t| {
                t.rides
                    .values()
                    .filter(|r| r.rider_id == user.id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rides.into_iter().map(RideResponse::from).collect())
    }

    async fn available_rides(&self, driver: &Profile) -> DispatchResult<Vec<RideResponse>> {
        Self::require_driver(driver)?;
        let mut rides = self
            .store
            .read(|t| {
                t.rides
                    .values()
                    .filter(|r| r.status == RideStatus::Requested && r.driver_id.is_none())
                    .filter(|r| !r.has_rejected(&driver.id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rides.into_iter().map(RideResponse::from).collect())
    }

    async fn update_ride_details(&self, rider: &Profile, ride_id: &str, patch: UpdateRideDetails) -> DispatchResult<RideResponse> {
        let (guard, mut ride) = self.lock_ride(ride_id).await?;
        let previous = ride.status;

        if ride.rider_id != rider.id {
            return Err(AppError::forbidden("Only the rider can edit this ride"));
        }
        if !ride.status.is_locked() && ride.status != RideStatus::Requested {
            return Err(AppError::Conflict("Ride details can only change before a driver is assigned".to_string()));
        }

        let mut details = ride.details();
        details.pickup = GeoPoint::new(
            patch.pickup_lat.unwrap_or(details.pickup.lat),
            patch.pickup_lng.unwrap_or(details.pickup.lng),
        );
        details.drop = GeoPoint::new(
            patch.drop_lat.unwrap_or(details.drop.lat),
            patch.drop_lng.unwrap_or(details.drop.lng),
        );
        if patch.pickup_address.is_some() {
            details.pickup_address = patch.pickup_address;
        }
        if patch.drop_address.is_some() {
            details.drop_address = patch.drop_address;
        }
        if patch.requested_vehicle_type.is_some() {
            details.requested_vehicle_type = patch.requested_vehicle_type;
        }

        let (distance_km, estimated_fare) = self
            .price_trip(&details.pickup, &details.drop, details.requested_vehicle_type.as_deref(), Decimal::ZERO)
            .await?;
        details.distance_km = distance_km;
        details.estimated_fare = estimated_fare;

        ride.apply_details(details, Utc::now())?;
        let ride = self.save_ride(guard, ride, previous).await?;
        tracing::info!("Ride {} details updated", ride.id);
        Ok(ride.into())
    }

    async fn update_status(&self, user: &Profile, ride_id: &str, update: RideStatusUpdate) -> DispatchResult<RideResponse> {
        tracing::info!("Updating ride {} status to {}", ride_id, update.status);

        if matches!(update.status, RideStatus::Paid | RideStatus::Finished) {
            return Err(AppError::forbidden("Rides are finished by payment settlement"));
        }

        // Resolve the incoming driver before taking the row lock
        let incoming_driver = match &update.driver_id {
            Some(driver_id) => {
                let driver = self.store.get_profile(driver_id).await?;
                Self::require_driver(&driver)?;
                Some(driver)
            }
            None => None,
        };

        let (guard, mut ride) = self.lock_ride(ride_id).await?;
        let previous = ride.status;

        if !ride.is_participant(&user.id) {
            let self_assigning = incoming_driver.as_ref().is_some_and(|d| d.id == user.id);
            if !self_assigning {
                return Err(AppError::forbidden("Not a participant of this ride"));
            }
        }

        let now = Utc::now();
        if let Some(driver) = incoming_driver {
            if ride.has_rejected(&driver.id) {
                return Err(AppError::forbidden("Driver already rejected this ride"));
            }
            if ride.driver_id.as_ref().is_some_and(|current| *current != driver.id) {
                return Err(AppError::Conflict("Ride already assigned".to_string()));
            }
            ride.driver_id = Some(driver.id);
        }

        ride.transition_to(update.status, now)?;
        if update.status == RideStatus::Cancelled && ride.status != previous {
            ride.cancellation_reason = update.cancellation_reason;
            ride.cancelled_by = Some(user.id.clone());
        }
        if update.actual_vehicle.is_some() {
            ride.set_actual_vehicle(update.actual_vehicle, now)?;
        }

        let ride = self.save_ride(guard, ride, previous).await?;
        Ok(ride.into())
    }

    async fn driver_action(&self, driver: &Profile, ride_id: &str, action: DriverAction) -> DispatchResult<DriverActionResponse> {
        Self::require_driver(driver)?;
        match action {
            DriverAction::Accept => self.accept(driver, ride_id).await,
            DriverAction::Reject => self.reject(driver, ride_id).await,
        }
    }

    async fn cancel_ride(&self, rider: &Profile, ride_id: &str, reason: Option<String>) -> DispatchResult<RideResponse> {
        let (guard, mut ride) = self.lock_ride(ride_id).await?;

        if ride.rider_id != rider.id {
            return Err(AppError::forbidden("Only the rider can cancel this ride"));
        }
        if !matches!(ride.status, RideStatus::Requested | RideStatus::Assigned) {
            return Err(AppError::bad_request("Cannot cancel a ride that is in progress or completed"));
        }

        ride.transition_to(RideStatus::Cancelled, Utc::now())?;
        ride.cancellation_reason = reason;
        ride.cancelled_by = Some(rider.id.clone());

        let mut work = self.store.begin();
        work.delete_ride(&ride.id);
        self.store.commit(work).await?;
        drop(guard);

        tracing::info!("Ride {} cancelled and removed by rider {}", ride.id, rider.id);
        self.tracking_service.announce_status(&ride).await;
        Ok(ride.into())
    }

    async fn propose_fare(&self, rider: &Profile, ride_id: &str, amount: Decimal) -> DispatchResult<RideResponse> {
        if amount <= Decimal::ZERO {
            return Err(AppError::validation_error("proposed_fare", "Proposed fare must be positive"));
        }

        let (guard, mut ride) = self.lock_ride(ride_id).await?;
        let previous = ride.status;
        if ride.rider_id != rider.id {
            return Err(AppError::forbidden("Only the rider can propose a fare"));
        }
        if ride.status != RideStatus::Requested {
            return Err(AppError::Conflict("Fares can only be negotiated before assignment".to_string()));
        }

        ride.proposed_fare = Some(self.pricing.precision.round(amount));
        ride.negotiation_status = NegotiationStatus::Pending;
        ride.updated_at = Utc::now();

        let ride = self.save_ride(guard, ride, previous).await?;
        tracing::info!("Rider {} proposed {} for ride {}", rider.id, amount, ride.id);
        Ok(ride.into())
    }

    async fn respond_to_proposal(&self, driver: &Profile, ride_id: &str, accept: bool) -> DispatchResult<DriverActionResponse> {
        Self::require_driver(driver)?;

        let negotiation = self.store.get_ride(ride_id).await?.negotiation_status;
        if negotiation != NegotiationStatus::Pending {
            return Err(AppError::Conflict("No fare proposal is pending".to_string()));
        }
        if accept {
            return self.accept(driver, ride_id).await;
        }

        let (guard, mut ride) = self.lock_ride(ride_id).await?;
        let previous = ride.status;
        if ride.negotiation_status != NegotiationStatus::Pending {
            return Err(AppError::Conflict("No fare proposal is pending".to_string()));
        }
        ride.negotiation_status = NegotiationStatus::Rejected;
        ride.updated_at = Utc::now();
        let ride = self.save_ride(guard, ride, previous).await?;

        tracing::info!("Driver {} declined the fare proposal on ride {}", driver.id, ride.id);
        Ok(DriverActionResponse::Rejected {
            message: "Fare proposal declined".to_string(),
            next_driver: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::profile::RegisterProfileRequest,
        services::broker::{EventBroker, InProcessBroker, Topic},
    };
    use rust_decimal_macros::dec;

    struct Harness {
        service: RideService,
        broker: Arc<InProcessBroker>,
        rider: Profile,
        driver_a: Profile,
        driver_b: Profile,
    }

    async fn harness() -> Harness {
        let store = Arc::new(StoreService::new());
        let profiles = Arc::new(ProfileService::new(store.clone()));
        let broker = Arc::new(InProcessBroker::new());
        let tracking = Arc::new(TrackingService::new(
            store.clone(),
            profiles.clone(),
            broker.clone(),
            ServiceRegion::BANGLADESH,
            150.0,
        ));
        let assignment = Arc::new(AssignmentService::new(profiles.clone()));
        let service = RideService::new(store, profiles.clone(), assignment, tracking, PricingPolicy::default());

        let register = |name: &str, role: Role| RegisterProfileRequest {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            role,
        };
        let rider = profiles.register_profile(register("rahim", Role::Rider)).await.unwrap();
        let driver_a = profiles.register_profile(register("arif", Role::Driver)).await.unwrap();
        let driver_b = profiles.register_profile(register("bashir", Role::Driver)).await.unwrap();

        for (driver, lat) in [(&driver_a, 23.77), (&driver_b, 23.80)] {
            profiles.set_online(&driver.id, true).await.unwrap();
            profiles.update_location(&driver.id, lat, 89.65).await.unwrap();
        }

        Harness { service, broker, rider, driver_a, driver_b }
    }

    fn ride_request() -> CreateRideRequest {
        CreateRideRequest {
            pickup_lat: 23.76,
            pickup_lng: 89.65,
            pickup_address: Some("Rajbari Rail Station".to_string()),
            drop_lat: 23.80,
            drop_lng: 89.70,
            drop_address: None,
            requested_vehicle_type: Some("car".to_string()),
            proposed_fare: None,
            is_scheduled: false,
            scheduled_datetime: None,
            available_seats: None,
        }
    }

    #[tokio::test]
    async fn test_create_prices_with_vehicle_tariff_and_announces() {
        let h = harness().await;
        let mut pool = h.broker.subscribe(&Topic::DriverPool).await.unwrap();

        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();
        assert_eq!(ride.status, RideStatus::Requested);
        assert_eq!(ride.distance_km, dec!(6.76));
        // 50 + 6.76 * 25
        assert_eq!(ride.estimated_fare, dec!(219.00));

        let frame: serde_json::Value = serde_json::from_str(&pool.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "new_ride_request");
        assert_eq!(frame["ride"]["id"], ride.id.as_str());
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_region_drop() {
        let h = harness().await;
        let mut request = ride_request();
        request.drop_lat = 27.2;
        match h.service.create_ride(&h.rider, request).await {
            Err(AppError::OutOfServiceRegion { point }) => assert_eq!(point, "Drop"),
            other => panic!("unexpected: {:?}", other.map(|r| r.id)),
        }
    }

    #[tokio::test]
    async fn test_scheduled_ride_needs_future_time() {
        let h = harness().await;
        let mut request = ride_request();
        request.is_scheduled = true;
        request.scheduled_datetime = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(matches!(
            h.service.create_ride(&h.rider, request).await,
            Err(AppError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_reject_then_accept_flow() {
        let h = harness().await;
        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();

        match h.service.driver_action(&h.driver_a, &ride.id, DriverAction::Reject).await.unwrap() {
            DriverActionResponse::Rejected { next_driver, .. } => {
                assert_eq!(next_driver.unwrap().driver_id, h.driver_b.id);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // A rejecter can never be assigned afterwards
        assert!(matches!(
            h.service.driver_action(&h.driver_a, &ride.id, DriverAction::Accept).await,
            Err(AppError::Forbidden(_))
        ));

        match h.service.driver_action(&h.driver_b, &ride.id, DriverAction::Accept).await.unwrap() {
            DriverActionResponse::Assigned { ride } => {
                assert_eq!(ride.status, RideStatus::Assigned);
                assert_eq!(ride.driver_id.as_deref(), Some(h.driver_b.id.as_str()));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_riders_cannot_act_as_drivers() {
        let h = harness().await;
        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();
        assert!(matches!(
            h.service.driver_action(&h.rider, &ride.id, DriverAction::Accept).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_accepts_assign_once() {
        let h = Arc::new(harness().await);
        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();

        let a = {
            let h = h.clone();
            let id = ride.id.clone();
            tokio::spawn(async move { h.service.driver_action(&h.driver_a, &id, DriverAction::Accept).await.is_ok() })
        };
        let b = {
            let h = h.clone();
            let id = ride.id.clone();
            tokio::spawn(async move { h.service.driver_action(&h.driver_b, &id, DriverAction::Accept).await.is_ok() })
        };

        let wins = [a.await.unwrap(), b.await.unwrap()].into_iter().filter(|ok| *ok).count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_same_driver_accept_and_reject_race() {
        let h = Arc::new(harness().await);

        for _ in 0..10 {
            let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();
            let accept = {
                let h = h.clone();
                let id = ride.id.clone();
                tokio::spawn(async move { h.service.driver_action(&h.driver_a, &id, DriverAction::Accept).await })
            };
            let reject = {
                let h = h.clone();
                let id = ride.id.clone();
                tokio::spawn(async move { h.service.driver_action(&h.driver_a, &id, DriverAction::Reject).await })
            };
            let accepted = accept.await.unwrap();
            let rejected = reject.await.unwrap();
            assert_ne!(accepted.is_ok(), rejected.is_ok());

            let stored = h.service.get_ride(&h.rider, &ride.id).await.unwrap();
            if accepted.is_ok() {
                assert!(matches!(rejected, Err(AppError::Conflict(_))));
                assert_eq!(stored.status, RideStatus::Assigned);
                assert_eq!(stored.driver_id.as_deref(), Some(h.driver_a.id.as_str()));
            } else {
                assert!(matches!(accepted, Err(AppError::Forbidden(_))));
                assert_eq!(stored.status, RideStatus::Requested);
                assert!(stored.driver_id.is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_status_flow_and_events() {
        let h = harness().await;
        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();
        let mut events = h.broker.subscribe(&Topic::Ride(ride.id.clone())).await.unwrap();

        h.service.driver_action(&h.driver_a, &ride.id, DriverAction::Accept).await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&events.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "ride_status_update");
        assert_eq!(frame["status"], "ASSIGNED");
        assert_eq!(frame["driver_name"], "arif");

        let update = |status| RideStatusUpdate {
            status,
            driver_id: None,
            cancellation_reason: None,
            actual_vehicle: None,
        };
        let ongoing = h.service.update_status(&h.driver_a, &ride.id, update(RideStatus::Ongoing)).await.unwrap();
        assert!(ongoing.start_time.is_some());

        assert!(matches!(
            h.service.update_status(&h.driver_a, &ride.id, update(RideStatus::Requested)).await,
            Err(AppError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.service.update_status(&h.driver_a, &ride.id, update(RideStatus::Finished)).await,
            Err(AppError::Forbidden(_))
        ));

        let done = h.service.update_status(&h.driver_a, &ride.id, update(RideStatus::Completed)).await.unwrap();
        assert!(done.end_time.is_some());

        // Editing a completed trip is refused
        let patch = UpdateRideDetails {
            drop_lat: Some(23.79),
            ..Default::default()
        };
        assert!(matches!(
            h.service.update_ride_details(&h.rider, &ride.id, patch).await,
            Err(AppError::ImmutableAfterCompletion)
        ));

        // A stranger cannot move the ride
        assert!(matches!(
            h.service.update_status(&h.driver_b, &ride.id, update(RideStatus::Cancelled)).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_deletes_ride() {
        let h = harness().await;
        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();

        assert!(matches!(
            h.service.cancel_ride(&h.driver_a, &ride.id, None).await,
            Err(AppError::Forbidden(_))
        ));

        let cancelled = h
            .service
            .cancel_ride(&h.rider, &ride.id, Some("Changed plans".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, RideStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Changed plans"));
        assert!(matches!(
            h.service.get_ride(&h.rider, &ride.id).await,
            Err(AppError::RideNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fare_negotiation() {
        let h = harness().await;
        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();

        let proposed = h.service.propose_fare(&h.rider, &ride.id, dec!(180)).await.unwrap();
        assert_eq!(proposed.negotiation_status, NegotiationStatus::Pending);

        h.service.respond_to_proposal(&h.driver_a, &ride.id, false).await.unwrap();
        let after = h.service.get_ride(&h.rider, &ride.id).await.unwrap();
        assert_eq!(after.negotiation_status, NegotiationStatus::Rejected);
        assert_eq!(after.status, RideStatus::Requested);

        h.service.propose_fare(&h.rider, &ride.id, dec!(200)).await.unwrap();
        match h.service.respond_to_proposal(&h.driver_b, &ride.id, true).await.unwrap() {
            DriverActionResponse::Assigned { ride } => {
                assert_eq!(ride.negotiation_status, NegotiationStatus::Accepted);
                assert_eq!(ride.proposed_fare, Some(dec!(200.00)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_edit_details_reprices() {
        let h = harness().await;
        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();

        let patch = UpdateRideDetails {
            drop_lat: Some(23.77),
            drop_lng: Some(89.65),
            requested_vehicle_type: Some("bike".to_string()),
            ..Default::default()
        };
        let edited = h.service.update_ride_details(&h.rider, &ride.id, patch).await.unwrap();
        assert_eq!(edited.distance_km, dec!(1.11));
        // 30 + 1.11 * 15
        assert_eq!(edited.estimated_fare, dec!(46.65));
    }

    #[tokio::test]
    async fn test_current_and_available_rides() {
        let h = harness().await;
        assert!(h.service.current_ride(&h.rider).await.unwrap().is_none());

        let ride = h.service.create_ride(&h.rider, ride_request()).await.unwrap();
        let current = h.service.current_ride(&h.rider).await.unwrap().unwrap();
        assert_eq!(current.id, ride.id);

        let board = h.service.available_rides(&h.driver_a).await.unwrap();
        assert_eq!(board.len(), 1);
        assert!(h.service.available_rides(&h.rider).await.is_err());

        h.service.driver_action(&h.driver_a, &ride.id, DriverAction::Accept).await.unwrap();
        assert!(h.service.available_rides(&h.driver_b).await.unwrap().is_empty());
        let drivers_current = h.service.current_ride(&h.driver_a).await.unwrap().unwrap();
        assert_eq!(drivers_current.id, ride.id);
    }
}
