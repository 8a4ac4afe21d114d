use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::ride::RideStatus;

/// Main error type for the dispatch service
#[derive(Debug)]
pub enum DispatchError {
    // HTTP and API errors
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    InternalServer(String),

    // Ride lifecycle errors
    InvalidTransition { from: RideStatus, to: RideStatus },
    MissingDriver,
    ImmutableAfterCompletion,
    RideNotFound(String),
    ProfileNotFound(String),

    // Geo validation errors
    InvalidCoordinates { point: String },
    OutOfServiceRegion { point: String },

    // Realtime channel errors
    SpoofingDetected { speed_kmh: f64 },
    UnauthorizedConnection,
    BroadcastFailed(String),

    // Payment errors
    PaymentNotFound(String),
    DuplicatePayment,
    UnknownGatewayProvider(String),
    GatewayFailure(String),
    InvalidAmount(String),

    // Redis errors
    RedisConnection(String),
    RedisQuery(String),

    // Serialization and parsing errors
    JsonParsing(String),
    JsonSerialization(String),
    InvalidFormat(String),

    // Validation errors
    ValidationFailed(Vec<ValidationError>),

    // Configuration and setup errors
    Configuration(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            DispatchError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            DispatchError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            DispatchError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DispatchError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            DispatchError::InternalServer(msg) => write!(f, "Internal server error: {}", msg),

            DispatchError::InvalidTransition { from, to } => {
                write!(f, "Invalid state transition from {} to {}", from, to)
            }
            DispatchError::MissingDriver => write!(f, "Cannot move to ASSIGNED without a driver"),
            DispatchError::ImmutableAfterCompletion => {
                write!(f, "Cannot modify ride details after completion")
            }
            DispatchError::RideNotFound(id) => write!(f, "Ride not found: {}", id),
            DispatchError::ProfileNotFound(id) => write!(f, "User not found: {}", id),

            DispatchError::InvalidCoordinates { point } => write!(f, "Invalid {} coordinates", point),
            DispatchError::OutOfServiceRegion { point } => {
                write!(f, "{} location must be within the service area", point)
            }

            DispatchError::SpoofingDetected { speed_kmh } => {
                write!(f, "GPS spoofing detected or invalid signal ({:.1} km/h)", speed_kmh)
            }
            DispatchError::UnauthorizedConnection => {
                write!(f, "Connection is not authorized for this ride")
            }
            DispatchError::BroadcastFailed(msg) => write!(f, "Broadcast failed: {}", msg),

            DispatchError::PaymentNotFound(id) => write!(f, "Payment not found: {}", id),
            DispatchError::DuplicatePayment => write!(f, "Ride already paid"),
            DispatchError::UnknownGatewayProvider(name) => {
                write!(f, "Unknown payment provider: {}", name)
            }
            DispatchError::GatewayFailure(msg) => write!(f, "Payment gateway failure: {}", msg),
            DispatchError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),

            DispatchError::RedisConnection(msg) => write!(f, "Redis connection error: {}", msg),
            DispatchError::RedisQuery(msg) => write!(f, "Redis query error: {}", msg),

            DispatchError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            DispatchError::JsonSerialization(msg) => write!(f, "JSON serialization error: {}", msg),
            DispatchError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),

            DispatchError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }

            DispatchError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DispatchError {}

impl DispatchError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::BadRequest(_) => "bad_request",
            DispatchError::Unauthorized(_) => "unauthorized",
            DispatchError::Forbidden(_) => "forbidden",
            DispatchError::NotFound(_)
            | DispatchError::RideNotFound(_)
            | DispatchError::PaymentNotFound(_) => "not_found",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::MissingDriver => "missing_driver",
            DispatchError::ImmutableAfterCompletion => "immutable_after_completion",
            DispatchError::ProfileNotFound(_) => "user_not_found",
            DispatchError::InvalidCoordinates { .. } => "invalid_coordinates",
            DispatchError::OutOfServiceRegion { .. } => "out_of_service_region",
            DispatchError::SpoofingDetected { .. } => "spoofing_detected",
            DispatchError::UnauthorizedConnection => "unauthorized_connection",
            DispatchError::DuplicatePayment => "duplicate_payment",
            DispatchError::UnknownGatewayProvider(_) => "unknown_gateway_provider",
            DispatchError::GatewayFailure(_) => "gateway_failure",
            DispatchError::InvalidAmount(_) => "invalid_amount",
            DispatchError::ValidationFailed(_) => "validation_failed",
            DispatchError::JsonParsing(_) | DispatchError::InvalidFormat(_) => "invalid_format",
            _ => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            DispatchError::BadRequest(_)
            | DispatchError::InvalidTransition { .. }
            | DispatchError::MissingDriver
            | DispatchError::InvalidCoordinates { .. }
            | DispatchError::OutOfServiceRegion { .. }
            | DispatchError::SpoofingDetected { .. }
            | DispatchError::UnknownGatewayProvider(_)
            | DispatchError::GatewayFailure(_)
            | DispatchError::InvalidAmount(_)
            | DispatchError::ValidationFailed(_)
            | DispatchError::JsonParsing(_)
            | DispatchError::InvalidFormat(_) => StatusCode::BAD_REQUEST,

            DispatchError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DispatchError::Forbidden(_) | DispatchError::UnauthorizedConnection => StatusCode::FORBIDDEN,

            DispatchError::NotFound(_)
            | DispatchError::RideNotFound(_)
            | DispatchError::ProfileNotFound(_)
            | DispatchError::PaymentNotFound(_) => StatusCode::NOT_FOUND,

            DispatchError::Conflict(_)
            | DispatchError::ImmutableAfterCompletion
            | DispatchError::DuplicatePayment => StatusCode::CONFLICT,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let (message, details) = match self {
            DispatchError::ValidationFailed(errors) => {
                let details = serde_json::to_value(&errors).ok();
                ("Validation errors occurred".to_string(), details)
            }
            DispatchError::InvalidTransition { from, to } => (
                format!("Invalid state transition from {} to {}", from, to),
                Some(serde_json::json!({ "from": from, "to": to })),
            ),
            other => (other.to_string(), None),
        };

        let error_response = ErrorResponse {
            error: code.to_string(),
            message,
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => DispatchError::RedisConnection(err.to_string()),
            redis::ErrorKind::AuthenticationFailed => {
                DispatchError::RedisConnection("Authentication failed".to_string())
            }
            _ => DispatchError::RedisQuery(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() {
            DispatchError::JsonParsing(err.to_string())
        } else {
            DispatchError::JsonSerialization(err.to_string())
        }
    }
}

impl From<rust_decimal::Error> for DispatchError {
    fn from(err: rust_decimal::Error) -> Self {
        DispatchError::InvalidAmount(err.to_string())
    }
}

// Helper functions for creating common errors
impl DispatchError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        DispatchError::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        DispatchError::Forbidden(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        DispatchError::NotFound(resource.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        DispatchError::InternalServer(msg.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn ride_not_found(ride_id: impl Into<String>) -> Self {
        DispatchError::RideNotFound(ride_id.into())
    }

    pub fn profile_not_found(user_id: impl Into<String>) -> Self {
        DispatchError::ProfileNotFound(user_id.into())
    }

    pub fn payment_not_found(payment_id: impl Into<String>) -> Self {
        DispatchError::PaymentNotFound(payment_id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DispatchError::InvalidTransition {
            from: RideStatus::Requested,
            to: RideStatus::Completed,
        };
        assert_eq!(error.to_string(), "Invalid state transition from REQUESTED to COMPLETED");
        assert_eq!(error.code(), "invalid_transition");
    }

    #[test]
    fn test_validation_error() {
        let error = DispatchError::validation_error("pickup_lat", "Invalid Pickup coordinates");
        match error {
            DispatchError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "pickup_lat");
            }
            _ => panic!("Expected ValidationFailed error"),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(DispatchError::ImmutableAfterCompletion.status(), StatusCode::CONFLICT);
        assert_eq!(DispatchError::UnauthorizedConnection.status(), StatusCode::FORBIDDEN);
        assert_eq!(DispatchError::ride_not_found("r").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            DispatchError::OutOfServiceRegion { point: "Drop".into() }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(DispatchError::DuplicatePayment.code(), "duplicate_payment");
    }

    #[test]
    fn test_missing_rides_and_payments_share_one_code() {
        let ride = DispatchError::ride_not_found("rid-1");
        let payment = DispatchError::payment_not_found("pay-1");
        assert_eq!(ride.code(), "not_found");
        assert_eq!(payment.code(), "not_found");
        assert_eq!(ride.to_string(), "Ride not found: rid-1");
        assert_eq!(payment.to_string(), "Payment not found: pay-1");
    }
}
