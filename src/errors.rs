use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::ride::RideStatus;

/// Main error type for the dispatch service
#[derive(Debug)]
pub enum RideError {
    // Input errors
    ValidationFailed(Vec<ValidationError>),
    MissingRequiredField(String),
    InvalidFieldValue { field: String, value: String, reason: String },

    // Lookup errors
    NotFound(String),
    RideNotFound(String),
    UserNotFound(String),

    // Actor and state guards
    Forbidden(String),
    WrongState { ride_id: String, status: RideStatus, operation: &'static str },
    InvalidOtp,
    PaymentRequired(String),
    AlreadyAccepted(String),
    AlreadyRated(String),

    // Capacity and balance guards
    InsufficientPoints { requested: u64, available: u64 },
    InsufficientSeats(String),
    NotAPassenger(String),
    AlreadyPassenger(String),

    // Upstream dependencies
    GeoLookupFailed(String),
    NetworkConnection(String),
    NetworkTimeout,
    NotificationFailed(String),

    // Storage
    Ledger(String),
    LedgerConflict(String),
    Serialization(String),

    // Configuration and setup errors
    InvalidConfiguration(String),
    InternalServer(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
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

impl fmt::Display for RideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            RideError::MissingRequiredField(field) => write!(f, "Missing required field: {}", field),
            RideError::InvalidFieldValue { field, value, reason } => {
                write!(f, "Invalid value '{}' for field '{}': {}", value, field, reason)
            }

            RideError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RideError::RideNotFound(id) => write!(f, "Ride not found: {}", id),
            RideError::UserNotFound(id) => write!(f, "User not found: {}", id),

            RideError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            RideError::WrongState { ride_id, status, operation } => {
                write!(f, "Cannot {} ride {} while it is {}", operation, ride_id, status)
            }
            RideError::InvalidOtp => write!(f, "Invalid OTP"),
            RideError::PaymentRequired(id) => {
                write!(f, "Payment not completed for ride {}; complete payment before finishing", id)
            }
            RideError::AlreadyAccepted(id) => write!(f, "Ride {} was already accepted by another captain", id),
            RideError::AlreadyRated(id) => write!(f, "Ride {} is already rated", id),

            RideError::InsufficientPoints { requested, available } => {
                write!(f, "Insufficient points: requested {}, available {}", requested, available)
            }
            RideError::InsufficientSeats(id) => write!(f, "No seats available on ride {}", id),
            RideError::NotAPassenger(id) => write!(f, "Caller is not a passenger of ride {}", id),
            RideError::AlreadyPassenger(id) => write!(f, "Caller already joined ride {}", id),

            RideError::GeoLookupFailed(msg) => write!(f, "Geo lookup failed: {}", msg),
            RideError::NetworkConnection(msg) => write!(f, "Network connection error: {}", msg),
            RideError::NetworkTimeout => write!(f, "Network request timed out"),
            RideError::NotificationFailed(msg) => write!(f, "Notification delivery failed: {}", msg),

            RideError::Ledger(msg) => write!(f, "Ledger error: {}", msg),
            RideError::LedgerConflict(key) => write!(f, "Too much contention updating {}", key),
            RideError::Serialization(msg) => write!(f, "Serialization error: {}", msg),

            RideError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            RideError::InternalServer(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl std::error::Error for RideError {}

impl IntoResponse for RideError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_type, details) = match &self {
            RideError::ValidationFailed(errors) => {
                (StatusCode::BAD_REQUEST, "validation_failed", serde_json::to_value(errors).ok())
            }
            RideError::MissingRequiredField(_) => (StatusCode::BAD_REQUEST, "missing_field", None),
            RideError::InvalidFieldValue { .. } => (StatusCode::BAD_REQUEST, "invalid_field", None),

            RideError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            RideError::RideNotFound(_) => (StatusCode::NOT_FOUND, "ride_not_found", None),
            RideError::UserNotFound(_) => (StatusCode::NOT_FOUND, "user_not_found", None),

            RideError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", None),
            RideError::WrongState { .. } => (StatusCode::BAD_REQUEST, "wrong_state", None),
            RideError::InvalidOtp => (StatusCode::BAD_REQUEST, "invalid_otp", None),
            RideError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "payment_required", None),
            RideError::AlreadyAccepted(_) => (StatusCode::CONFLICT, "ride_already_accepted", None),
            RideError::AlreadyRated(_) => (StatusCode::BAD_REQUEST, "already_rated", None),

            RideError::InsufficientPoints { .. } => (StatusCode::BAD_REQUEST, "insufficient_points", None),
            RideError::InsufficientSeats(_) => (StatusCode::BAD_REQUEST, "insufficient_seats", None),
            RideError::NotAPassenger(_) => (StatusCode::BAD_REQUEST, "not_a_passenger", None),
            RideError::AlreadyPassenger(_) => (StatusCode::BAD_REQUEST, "already_passenger", None),

            RideError::GeoLookupFailed(_) => (StatusCode::BAD_GATEWAY, "geo_lookup_failed", None),
            RideError::NetworkConnection(_) => (StatusCode::BAD_GATEWAY, "network_connection", None),
            RideError::NetworkTimeout => (StatusCode::GATEWAY_TIMEOUT, "network_timeout", None),

            // All other errors are treated as internal server errors
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type RideResult<T> = Result<T, RideError>;

impl From<redis::RedisError> for RideError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => RideError::Ledger(format!("connection: {}", err)),
            redis::ErrorKind::AuthenticationFailed => RideError::Ledger("Authentication failed".to_string()),
            _ => RideError::Ledger(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for RideError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RideError::NetworkTimeout
        } else {
            RideError::NetworkConnection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RideError {
    fn from(err: serde_json::Error) -> Self {
        RideError::Serialization(err.to_string())
    }
}

/// A non-critical step that failed after the primary transition committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SideEffectFailure {
    pub step: String,
    pub message: String,
}

impl SideEffectFailure {
    pub fn new(step: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            step: step.into(),
            message: error.to_string(),
        }
    }
}

// Helper functions for creating common errors
impl RideError {
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        RideError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        RideError::Forbidden(msg.into())
    }

    pub fn ride_not_found(ride_id: impl Into<String>) -> Self {
        RideError::RideNotFound(ride_id.into())
    }

    pub fn user_not_found(user_id: impl Into<String>) -> Self {
        RideError::UserNotFound(user_id.into())
    }

    pub fn wrong_state(ride_id: impl Into<String>, status: RideStatus, operation: &'static str) -> Self {
        RideError::WrongState { ride_id: ride_id.into(), status, operation }
    }

    /// Losing an accept race is expected; the caller should go back to discovery.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RideError::AlreadyAccepted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RideError::RideNotFound("rid-231207-a1b2c".to_string());
        assert_eq!(error.to_string(), "Ride not found: rid-231207-a1b2c");

        let error = RideError::wrong_state("rid-1", RideStatus::Pending, "start");
        assert_eq!(error.to_string(), "Cannot start ride rid-1 while it is pending");
    }

    #[test]
    fn test_validation_error() {
        let error = RideError::validation_error("pickup", "Pickup is required");
        match error {
            RideError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "pickup");
                assert_eq!(errors[0].message, "Pickup is required");
            }
            _ => panic!("Expected ValidationFailed error"),
        }
    }

    #[test]
    fn test_conflict_is_benign() {
        assert!(RideError::AlreadyAccepted("rid-1".into()).is_conflict());
        assert!(!RideError::InvalidOtp.is_conflict());
    }

    #[test]
    fn test_status_codes() {
        let response = RideError::AlreadyAccepted("rid-1".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = RideError::PaymentRequired("rid-1".into()).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let response = RideError::NetworkConnection("refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = RideError::Ledger("down".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
