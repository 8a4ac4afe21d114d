// src/utils/geo.rs
use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, DispatchResult};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Axis-aligned bounding box the service operates in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegion {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl ServiceRegion {
    pub const BANGLADESH: ServiceRegion = ServiceRegion {
        min_lat: 20.50,
        max_lat: 26.50,
        min_lng: 88.00,
        max_lng: 92.70,
    };

    /// Approximate Rajbari district box.
    pub const RAJBARI: ServiceRegion = ServiceRegion {
        min_lat: 23.40,
        max_lat: 24.00,
        min_lng: 89.30,
        max_lng: 89.95,
    };

    /// Accepts `bangladesh`, `rajbari` or `min_lat,max_lat,min_lng,max_lng`.
    pub fn parse(value: &str) -> DispatchResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bangladesh" => Ok(Self::BANGLADESH),
            "rajbari" => Ok(Self::RAJBARI),
            other => {
                let bounds = other
                    .split(',')
                    .map(|part| part.trim().parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| DispatchError::Configuration(format!("Invalid SERVICE_REGION: {}", e)))?;

                let [min_lat, max_lat, min_lng, max_lng] = bounds[..] else {
                    return Err(DispatchError::Configuration(
                        "SERVICE_REGION needs min_lat,max_lat,min_lng,max_lng".to_string(),
                    ));
                };
                if min_lat > max_lat || min_lng > max_lng {
                    return Err(DispatchError::Configuration(
                        "SERVICE_REGION bounds are inverted".to_string(),
                    ));
                }
                Ok(Self { min_lat, max_lat, min_lng, max_lng })
            }
        }
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lng..=self.max_lng).contains(&lng)
    }

    /// Checks a labelled point ("Pickup", "Drop", ...) for range and region.
    pub fn validate_point(&self, label: &str, lat: f64, lng: f64) -> DispatchResult<()> {
        if !is_valid_coordinate(lat, lng) {
            return Err(DispatchError::InvalidCoordinates { point: label.to_string() });
        }
        if !self.contains(lat, lng) {
            return Err(DispatchError::OutOfServiceRegion { point: label.to_string() });
        }
        Ok(())
    }

    pub fn validate_trip(&self, pickup: &GeoPoint, drop: &GeoPoint) -> DispatchResult<()> {
        self.validate_point("Pickup", pickup.lat, pickup.lng)?;
        self.validate_point("Drop", drop.lat, drop.lng)
    }
}

impl Default for ServiceRegion {
    fn default() -> Self {
        Self::BANGLADESH
    }
}
