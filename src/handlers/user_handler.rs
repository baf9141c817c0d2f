// src/handlers/user_handler.rs
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::{
    errors::{RideError, RideResult},
    models::user::{CaptainRegistration, RiderRegistration, User},
    services::user_service::UserOperations,
    state::AppState,
};

pub async fn register_rider(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<RiderRegistration>,
) -> RideResult<(StatusCode, Json<User>)> {
    let user = state.user_service.register_rider(registration).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn register_captain(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<CaptainRegistration>,
) -> RideResult<(StatusCode, Json<User>)> {
    let user = state.user_service.register_captain(registration).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> RideResult<Json<User>> {
    state
        .user_service
        .get_user(&user_id)
        .await?
        .map(Json)
        .ok_or(RideError::UserNotFound(user_id))
}
