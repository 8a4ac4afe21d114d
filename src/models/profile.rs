// src/models/profile.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::geo::GeoPoint;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Rider,  // Someone requesting rides
    Driver, // Someone driving them
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Rider => f.write_str("RIDER"),
            Role::Driver => f.write_str("DRIVER"),
        }
    }
}

/// The slice of a user account the dispatch core reads and writes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_online: bool,
    pub current_location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_driver(&self) -> bool {
        self.role == Role::Driver
    }

    /// Eligible for assignment: an online driver with a known position.
    pub fn is_dispatchable(&self) -> bool {
        self.is_driver() && self.is_online && self.current_location.is_some()
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterProfileRequest {
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineToggle {
    pub is_online: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
}
