// src/models/events.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{profile::Role, ride::RideResponse};

/// Status pushed to ride sockets for the payment hand-off, outside the ride state machine.
pub const PAYMENT_PENDING: &str = "PAYMENT_PENDING";

/// Everything the service pushes out over ride and pool topics.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RideEvent {
    RideStatusUpdate {
        ride_id: String,
        status: String,
        driver_name: Option<String>,
        rider_id: Option<String>,
        amount_paid: Option<Decimal>,
    },
    LocationUpdate {
        lat: f64,
        lng: f64,
        user_id: String,
        role: Role,
    },
    NewRideRequest {
        ride: RideResponse,
    },
    Error {
        code: String,
        message: String,
    },
}

impl RideEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Frames a client may send on a ride socket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    LocationUpdate { lat: f64, lng: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_event_shape() {
        let event = RideEvent::RideStatusUpdate {
            ride_id: "rid-250101-abc123".to_string(),
            status: "ASSIGNED".to_string(),
            driver_name: Some("karim".to_string()),
            rider_id: Some("usr-250101-abc123".to_string()),
            amount_paid: Some(dec!(198.50)),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "ride_status_update");
        assert_eq!(value["status"], "ASSIGNED");
        assert_eq!(value["driver_name"], "karim");
    }

    #[test]
    fn test_client_location_frame() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"location_update","lat":23.76,"lng":89.65}"#).unwrap();
        assert_eq!(parsed, ClientMessage::LocationUpdate { lat: 23.76, lng: 89.65 });
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"chat","text":"hi"}"#).is_err());
    }
}
