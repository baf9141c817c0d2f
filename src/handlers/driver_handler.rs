// src/handlers/driver_handler.rs
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::Actor;
use crate::{
    errors::RideResult,
    models::driver::{CaptainStats, DriverLocationUpdate, DriverPosition, GeoPoint, NearbyDriver, VehicleClass},
    services::{driver_service::DriverOperations, ride_service::RideOperations},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
    pub class: Option<VehicleClass>,
}

pub async fn update_location(
    State(state): State<Arc<AppState>>,
    Actor(captain_id): Actor,
    Json(location): Json<GeoPoint>,
) -> RideResult<Json<DriverPosition>> {
    let position = state
        .driver_service
        .update_driver_location(DriverLocationUpdate {
            driver_id: captain_id,
            location,
        })
        .await?;
    Ok(Json(position))
}

pub async fn go_online(State(state): State<Arc<AppState>>, Actor(captain_id): Actor) -> RideResult<Json<DriverPosition>> {
    Ok(Json(state.driver_service.set_online(&captain_id, true).await?))
}

pub async fn go_offline(State(state): State<Arc<AppState>>, Actor(captain_id): Actor) -> RideResult<Json<DriverPosition>> {
    Ok(Json(state.driver_service.set_online(&captain_id, false).await?))
}

pub async fn nearby(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> RideResult<Json<Vec<NearbyDriver>>> {
    let radius_km = query.radius_km.unwrap_or(state.config.search_radius_km);
    let drivers = state
        .driver_service
        .find_nearby_drivers(GeoPoint::new(query.lat, query.lng), radius_km, query.class)
        .await?;
    Ok(Json(drivers))
}

pub async fn stats(State(state): State<Arc<AppState>>, Actor(captain_id): Actor) -> RideResult<Json<CaptainStats>> {
    Ok(Json(state.ride_service.captain_stats(&captain_id).await?))
}
