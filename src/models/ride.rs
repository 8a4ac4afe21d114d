// src/models/ride.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::errors::{DispatchError, DispatchResult};
use crate::utils::geo::GeoPoint;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested, // Waiting for a driver to accept
    Assigned,  // Driver accepted, heading to pickup
    Ongoing,   // Rider on board
    Completed, // Trip over, payment outstanding
    Cancelled,
    Paid,      // Optional step before FINISHED
    Finished,  // Payment settled
}

impl RideStatus {
    pub const ALL: [RideStatus; 7] = [
        RideStatus::Requested,
        RideStatus::Assigned,
        RideStatus::Ongoing,
        RideStatus::Completed,
        RideStatus::Cancelled,
        RideStatus::Paid,
        RideStatus::Finished,
    ];

    /// Legal targets from this status, self-transitions excluded.
    pub fn allowed_transitions(&self) -> &'static [RideStatus] {
        match self {
            RideStatus::Requested => &[RideStatus::Assigned, RideStatus::Cancelled],
            RideStatus::Assigned => &[RideStatus::Ongoing, RideStatus::Completed, RideStatus::Cancelled],
            RideStatus::Ongoing => &[RideStatus::Completed, RideStatus::Cancelled],
            RideStatus::Completed => &[RideStatus::Paid, RideStatus::Finished],
            RideStatus::Paid => &[RideStatus::Finished],
            RideStatus::Cancelled | RideStatus::Finished => &[],
        }
    }

    pub fn can_transition_to(&self, target: RideStatus) -> bool {
        *self == target || self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Trip details are frozen in these states.
    pub fn is_locked(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Paid)
    }

    /// Location streaming is only meaningful while a driver is on the ride.
    pub fn is_trackable(&self) -> bool {
        matches!(self, RideStatus::Assigned | RideStatus::Ongoing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Assigned => "ASSIGNED",
            RideStatus::Ongoing => "ONGOING",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
            RideStatus::Paid => "PAID",
            RideStatus::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationStatus {
    #[default]
    None,
    Pending,  // Rider proposed a fare, waiting for a driver
    Accepted,
    Rejected,
}

/// The fields frozen once a ride is COMPLETED or PAID.
#[derive(Debug, Clone, PartialEq)]
pub struct TripDetails {
    pub pickup: GeoPoint,
    pub pickup_address: Option<String>,
    pub drop: GeoPoint,
    pub drop_address: Option<String>,
    pub distance_km: Decimal,
    pub estimated_fare: Decimal,
    pub requested_vehicle_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ride {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub rejected_drivers: BTreeSet<String>,

    // Trip
    pub pickup: GeoPoint,
    pub pickup_address: Option<String>,
    pub drop: GeoPoint,
    pub drop_address: Option<String>,
    pub distance_km: Decimal,
    pub estimated_fare: Decimal,

    // Negotiation
    pub proposed_fare: Option<Decimal>,
    pub negotiation_status: NegotiationStatus,

    // Scheduling
    pub is_scheduled: bool,
    pub scheduled_datetime: Option<DateTime<Utc>>,
    pub available_seats: u32,

    // Vehicle
    pub requested_vehicle_type: Option<String>,
    pub actual_vehicle: Option<String>,

    pub status: RideStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub cancellation_time: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
}

impl Ride {
    pub fn new(rider_id: String, details: TripDetails, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            rider_id,
            driver_id: None,
            rejected_drivers: BTreeSet::new(),
            pickup: details.pickup,
            pickup_address: details.pickup_address,
            drop: details.drop,
            drop_address: details.drop_address,
            distance_km: details.distance_km,
            estimated_fare: details.estimated_fare,
            proposed_fare: None,
            negotiation_status: NegotiationStatus::None,
            is_scheduled: false,
            scheduled_datetime: None,
            available_seats: 1,
            requested_vehicle_type: details.requested_vehicle_type,
            actual_vehicle: None,
            status: RideStatus::Requested,
            created_at: now,
            updated_at: now,
            start_time: None,
            end_time: None,
            cancellation_time: None,
            cancellation_reason: None,
            cancelled_by: None,
        }
    }

    pub fn details(&self) -> TripDetails {
        TripDetails {
            pickup: self.pickup,
            pickup_address: self.pickup_address.clone(),
            drop: self.drop,
            drop_address: self.drop_address.clone(),
            distance_km: self.distance_km,
            estimated_fare: self.estimated_fare,
            requested_vehicle_type: self.requested_vehicle_type.clone(),
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.rider_id == user_id || self.driver_id.as_deref() == Some(user_id)
    }

    /// Fare the rider owes: the negotiated one once a driver accepted it.
    pub fn payable_fare(&self) -> Decimal {
        match (self.negotiation_status, self.proposed_fare) {
            (NegotiationStatus::Accepted, Some(agreed)) => agreed,
            _ => self.estimated_fare,
        }
    }

    pub fn has_rejected(&self, driver_id: &str) -> bool {
        self.rejected_drivers.contains(driver_id)
    }

    /// Moves the ride along one legal edge. Returns `false` for a self-transition.
    pub fn transition_to(&mut self, target: RideStatus, now: DateTime<Utc>) -> DispatchResult<bool> {
        let from = self.status;
        if from == target {
            return Ok(false);
        }
        if !from.can_transition_to(target) {
            return Err(DispatchError::InvalidTransition { from, to: target });
        }
        if target == RideStatus::Assigned && self.driver_id.is_none() {
            return Err(DispatchError::MissingDriver);
        }

        match target {
            RideStatus::Ongoing => self.start_time = Some(now),
            RideStatus::Completed => self.end_time = Some(now),
            RideStatus::Cancelled => self.cancellation_time = Some(now),
            _ => {}
        }

        self.status = target;
        self.updated_at = now;
        Ok(true)
    }

    /// Replaces the trip details, refusing any change once the ride is locked.
    pub fn apply_details(&mut self, details: TripDetails, now: DateTime<Utc>) -> DispatchResult<()> {
        if self.details() == details {
            return Ok(());
        }
        if self.status.is_locked() {
            return Err(DispatchError::ImmutableAfterCompletion);
        }

        self.pickup = details.pickup;
        self.pickup_address = details.pickup_address;
        self.drop = details.drop;
        self.drop_address = details.drop_address;
        self.distance_km = details.distance_km;
        self.estimated_fare = details.estimated_fare;
        self.requested_vehicle_type = details.requested_vehicle_type;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_actual_vehicle(&mut self, vehicle: Option<String>, now: DateTime<Utc>) -> DispatchResult<()> {
        if self.actual_vehicle == vehicle {
            return Ok(());
        }
        if self.status.is_locked() {
            return Err(DispatchError::ImmutableAfterCompletion);
        }
        self.actual_vehicle = vehicle;
        self.updated_at = now;
        Ok(())
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateRideRequest {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: Option<String>,
    pub drop_lat: f64,
    pub drop_lng: f64,
    pub drop_address: Option<String>,
    pub requested_vehicle_type: Option<String>,
    pub proposed_fare: Option<Decimal>,
    #[serde(default)]
    pub is_scheduled: bool,
    pub scheduled_datetime: Option<DateTime<Utc>>,
    pub available_seats: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FareEstimateRequest {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub drop_lat: f64,
    pub drop_lng: f64,
    pub requested_vehicle_type: Option<String>,
    pub duration_minutes: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FareEstimate {
    pub distance_km: Decimal,
    pub estimated_fare: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct UpdateRideDetails {
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub pickup_address: Option<String>,
    pub drop_lat: Option<f64>,
    pub drop_lng: Option<f64>,
    pub drop_address: Option<String>,
    pub requested_vehicle_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideStatusUpdate {
    pub status: RideStatus,
    pub driver_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub actual_vehicle: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverAction {
    Accept,
    Reject,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverActionRequest {
    pub action: DriverAction,
}

/// Next driver the assignment engine would offer the ride to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverCandidate {
    pub driver_id: String,
    pub username: String,
    pub distance_km: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DriverActionResponse {
    #[serde(rename = "Ride Assigned")]
    Assigned { ride: RideResponse },
    #[serde(rename = "Rejected")]
    Rejected {
        message: String,
        next_driver: Option<DriverCandidate>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProposeFareRequest {
    pub proposed_fare: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProposalDecision {
    pub accept: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CancelRideRequest {
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideResponse {
    pub id: String,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: Option<String>,
    pub drop_lat: f64,
    pub drop_lng: f64,
    pub drop_address: Option<String>,
    pub distance_km: Decimal,
    pub estimated_fare: Decimal,
    pub proposed_fare: Option<Decimal>,
    pub negotiation_status: NegotiationStatus,
    pub is_scheduled: bool,
    pub scheduled_datetime: Option<DateTime<Utc>>,
    pub available_seats: u32,
    pub requested_vehicle_type: Option<String>,
    pub actual_vehicle: Option<String>,
    pub status: RideStatus,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub cancellation_time: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl From<Ride> for RideResponse {
    fn from(ride: Ride) -> Self {
        Self {
            id: ride.id,
            rider_id: ride.rider_id,
            driver_id: ride.driver_id,
            pickup_lat: ride.pickup.lat,
            pickup_lng: ride.pickup.lng,
            pickup_address: ride.pickup_address,
            drop_lat: ride.drop.lat,
            drop_lng: ride.drop.lng,
            drop_address: ride.drop_address,
            distance_km: ride.distance_km,
            estimated_fare: ride.estimated_fare,
            proposed_fare: ride.proposed_fare,
            negotiation_status: ride.negotiation_status,
            is_scheduled: ride.is_scheduled,
            scheduled_datetime: ride.scheduled_datetime,
            available_seats: ride.available_seats,
            requested_vehicle_type: ride.requested_vehicle_type,
            actual_vehicle: ride.actual_vehicle,
            status: ride.status,
            created_at: ride.created_at,
            start_time: ride.start_time,
            end_time: ride.end_time,
            cancellation_time: ride.cancellation_time,
            cancellation_reason: ride.cancellation_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_ride() -> Ride {
        let details = TripDetails {
            pickup: GeoPoint::new(23.76, 89.65),
            pickup_address: Some("Rajbari Govt College".to_string()),
            drop: GeoPoint::new(23.80, 89.70),
            drop_address: None,
            distance_km: dec!(6.76),
            estimated_fare: dec!(219.00),
            requested_vehicle_type: Some("car".to_string()),
        };
        let mut ride = Ride::new("usr-250101-abc123".to_string(), details, Utc::now());
        ride.id = "rid-250101-abc123".to_string();
        ride
    }

    fn ride_in(status: RideStatus) -> Ride {
        let mut ride = sample_ride();
        ride.driver_id = Some("usr-250101-drv001".to_string());
        ride.status = status;
        ride
    }

    #[test]
    fn test_exhaustive_transition_table() {
        let legal: &[(RideStatus, RideStatus)] = &[
            (RideStatus::Requested, RideStatus::Assigned),
            (RideStatus::Requested, RideStatus::Cancelled),
            (RideStatus::Assigned, RideStatus::Ongoing),
            (RideStatus::Assigned, RideStatus::Completed),
            (RideStatus::Assigned, RideStatus::Cancelled),
            (RideStatus::Ongoing, RideStatus::Completed),
            (RideStatus::Ongoing, RideStatus::Cancelled),
            (RideStatus::Completed, RideStatus::Paid),
            (RideStatus::Completed, RideStatus::Finished),
            (RideStatus::Paid, RideStatus::Finished),
        ];

        for from in RideStatus::ALL {
            for to in RideStatus::ALL {
                let mut ride = ride_in(from);
                let result = ride.transition_to(to, Utc::now());

                if from == to {
                    assert!(matches!(result, Ok(false)), "{} -> {} should be a no-op", from, to);
                } else if legal.contains(&(from, to)) {
                    assert!(matches!(result, Ok(true)), "{} -> {} should succeed", from, to);
                    assert_eq!(ride.status, to);
                } else {
                    match result {
                        Err(DispatchError::InvalidTransition { from: f, to: t }) => {
                            assert_eq!((f, t), (from, to));
                            assert_eq!(ride.status, from);
                        }
                        other => panic!("{} -> {} should be rejected, got {:?}", from, to, other),
                    }
                }
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(RideStatus::Cancelled.is_terminal());
        assert!(RideStatus::Finished.is_terminal());
        assert!(!RideStatus::Paid.is_terminal());
    }

    #[test]
    fn test_assigned_requires_driver() {
        let mut ride = sample_ride();
        assert!(matches!(
            ride.transition_to(RideStatus::Assigned, Utc::now()),
            Err(DispatchError::MissingDriver)
        ));
        assert_eq!(ride.status, RideStatus::Requested);

        ride.driver_id = Some("usr-250101-drv001".to_string());
        assert!(ride.transition_to(RideStatus::Assigned, Utc::now()).unwrap());
    }

    #[test]
    fn test_transition_stamps_times() {
        let mut ride = ride_in(RideStatus::Assigned);
        let now = Utc::now();
        ride.transition_to(RideStatus::Ongoing, now).unwrap();
        assert_eq!(ride.start_time, Some(now));
        ride.transition_to(RideStatus::Completed, now).unwrap();
        assert_eq!(ride.end_time, Some(now));
    }

    #[test]
    fn test_details_immutable_after_completion() {
        for status in [RideStatus::Completed, RideStatus::Paid] {
            let mut ride = ride_in(status);

            let mut moved = ride.details();
            moved.pickup = GeoPoint::new(23.70, 89.60);
            assert!(matches!(
                ride.apply_details(moved, Utc::now()),
                Err(DispatchError::ImmutableAfterCompletion)
            ));

            let mut repriced = ride.details();
            repriced.estimated_fare = dec!(1.00);
            assert!(matches!(
                ride.apply_details(repriced, Utc::now()),
                Err(DispatchError::ImmutableAfterCompletion)
            ));

            let mut other_vehicle = ride.details();
            other_vehicle.requested_vehicle_type = Some("bike".to_string());
            assert!(ride.apply_details(other_vehicle, Utc::now()).is_err());
            assert!(matches!(
                ride.set_actual_vehicle(Some("DHA-1234".to_string()), Utc::now()),
                Err(DispatchError::ImmutableAfterCompletion)
            ));

            // Writing the same values back is not a mutation
            let same = ride.details();
            assert!(ride.apply_details(same, Utc::now()).is_ok());
            assert_eq!(ride.estimated_fare, dec!(219.00));
        }
    }

    #[test]
    fn test_details_editable_before_completion() {
        let mut ride = ride_in(RideStatus::Ongoing);
        let mut details = ride.details();
        details.distance_km = dec!(7.00);
        ride.apply_details(details, Utc::now()).unwrap();
        assert_eq!(ride.distance_km, dec!(7.00));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RideStatus::Ongoing).unwrap();
        assert_eq!(json, "\"ONGOING\"");
        let parsed: RideStatus = serde_json::from_str("\"FINISHED\"").unwrap();
        assert_eq!(parsed, RideStatus::Finished);
    }
}
