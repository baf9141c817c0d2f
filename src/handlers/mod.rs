// src/handlers/mod.rs
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;

use crate::{
    errors::{RideError, SideEffectFailure},
    models::ride::{Ride, RideSnapshot},
    services::ride_service::Transition,
};

pub mod driver_handler;
pub mod event_handler;
pub mod ride_handler;
pub mod user_handler;

pub const ACTOR_HEADER: &str = "x-user-id";

/// Caller identity taken from the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = RideError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Actor(value.to_string()))
            .ok_or_else(|| RideError::MissingRequiredField(ACTOR_HEADER.to_string()))
    }
}

/// A ride as the caller may see it, plus anything that failed after the commit.
#[derive(Debug, Serialize)]
pub struct RideResponse {
    pub ride: RideSnapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<SideEffectFailure>,
}

impl RideResponse {
    /// Riders of the ride get the OTP; everyone else gets the default view.
    pub fn for_actor(transition: Transition<Ride>, actor: &str) -> Self {
        let ride = &transition.value;
        let snapshot = if ride.is_passenger(actor) || ride.user_id == actor {
            ride.snapshot_with_otp()
        } else {
            ride.snapshot()
        };
        Self {
            ride: snapshot,
            side_effects: transition.side_effects,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithSideEffects<T: Serialize> {
    #[serde(flatten)]
    pub value: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<SideEffectFailure>,
}

impl<T: Serialize> From<Transition<T>> for WithSideEffects<T> {
    fn from(transition: Transition<T>) -> Self {
        Self {
            value: transition.value,
            side_effects: transition.side_effects,
        }
    }
}
