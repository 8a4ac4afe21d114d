// src/services/assignment_service.rs
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing;

use crate::{
    errors::DispatchResult,
    models::{
        profile::Profile,
        ride::{DriverCandidate, Ride},
    },
    services::profile_service::{ProfileOperations, ProfileService},
    utils::geo::GeoPoint,
};

/// Closest dispatchable driver to `pickup`, skipping `rejected`.
/// Linear scan; equal distances resolve to the lowest driver id.
pub fn nearest_driver(pickup: &GeoPoint, drivers: &[Profile], rejected: &BTreeSet<String>) -> Option<DriverCandidate> {
    drivers
        .iter()
        .filter(|d| d.is_dispatchable() && !rejected.contains(&d.id))
        .filter_map(|d| {
            d.current_location.map(|location| DriverCandidate {
                driver_id: d.id.clone(),
                username: d.username.clone(),
                distance_km: pickup.distance_to(&location),
            })
        })
        .min_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        })
}

pub struct AssignmentService {
    profile_service: Arc<ProfileService>,
}

impl AssignmentService {
    pub fn new(profile_service: Arc<ProfileService>) -> Self {
        Self { profile_service }
    }

    pub async fn find_nearest_driver(&self, ride: &Ride) -> DispatchResult<Option<DriverCandidate>> {
        let drivers = self.profile_service.online_drivers().await?;
        let candidate = nearest_driver(&ride.pickup, &drivers, &ride.rejected_drivers);

        match &candidate {
            Some(c) => tracing::debug!(
                "Nearest driver for ride {} is {} at {:.2} km",
                ride.id,
                c.driver_id,
                c.distance_km
            ),
            None => tracing::debug!("No eligible driver for ride {}", ride.id),
        }
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::Role;
    use chrono::Utc;

    fn driver(id: &str, lat: f64, lng: f64, online: bool) -> Profile {
        Profile {
            id: id.to_string(),
            username: format!("{}-name", id),
            email: format!("{}@example.com", id),
            role: Role::Driver,
            is_online: online,
            current_location: Some(GeoPoint::new(lat, lng)),
            location_updated_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_nearest_then_next_after_rejection() {
        let pickup = GeoPoint::new(23.76, 89.65);
        // ~1.1 km and ~4.4 km north of the pickup
        let drivers = vec![driver("usr-b", 23.80, 89.65, true), driver("usr-a", 23.77, 89.65, true)];

        let mut rejected = BTreeSet::new();
        let first = nearest_driver(&pickup, &drivers, &rejected).unwrap();
        assert_eq!(first.driver_id, "usr-a");
        assert!((first.distance_km - 1.11).abs() < 0.01);

        rejected.insert("usr-a".to_string());
        let second = nearest_driver(&pickup, &drivers, &rejected).unwrap();
        assert_eq!(second.driver_id, "usr-b");
        assert!((second.distance_km - 4.45).abs() < 0.01);

        rejected.insert("usr-b".to_string());
        assert!(nearest_driver(&pickup, &drivers, &rejected).is_none());
    }

    #[test]
    fn test_skips_offline_riders_and_unlocated() {
        let pickup = GeoPoint::new(23.76, 89.65);
        let mut rider = driver("usr-r", 23.76, 89.65, true);
        rider.role = Role::Rider;
        let mut unlocated = driver("usr-u", 0.0, 0.0, true);
        unlocated.current_location = None;
        let offline = driver("usr-o", 23.76, 89.65, false);
        let far = driver("usr-f", 24.00, 89.65, true);

        let drivers = vec![rider, unlocated, offline, far];
        let picked = nearest_driver(&pickup, &drivers, &BTreeSet::new()).unwrap();
        assert_eq!(picked.driver_id, "usr-f");
    }

    #[test]
    fn test_ties_resolve_to_lowest_id() {
        let pickup = GeoPoint::new(23.76, 89.65);
        let drivers = vec![
            driver("usr-c", 23.77, 89.65, true),
            driver("usr-a", 23.77, 89.65, true),
            driver("usr-b", 23.77, 89.65, true),
        ];
        for _ in 0..3 {
            let picked = nearest_driver(&pickup, &drivers, &BTreeSet::new()).unwrap();
            assert_eq!(picked.driver_id, "usr-a");
        }
    }
}
