// src/handlers/ride_handler.rs
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{Actor, RideResponse, WithSideEffects};
use crate::{
    errors::RideResult,
    models::ride::{PaymentMethod, RideSnapshot},
    services::{
        rewards_service::{RedeemReceipt, RewardsQuote},
        ride_service::{
            CreateRideRequest, CreateSharedRideRequest, FareQuote, PaymentReceipt, RideCompletion, RideOperations,
        },
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct StartRideBody {
    pub otp: String,
}

#[derive(Debug, Deserialize)]
pub struct RateRideBody {
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodBody {
    pub payment_method: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemBody {
    pub points: u64,
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub pickup: String,
    pub destination: String,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionQuery {
    pub input: String,
}

type Shared = State<Arc<AppState>>;

pub async fn create_ride(
    State(state): Shared,
    Actor(rider_id): Actor,
    Json(request): Json<CreateRideRequest>,
) -> RideResult<(StatusCode, Json<RideResponse>)> {
    let transition = state.ride_service.create_ride(&rider_id, request).await?;
    Ok((StatusCode::CREATED, Json(RideResponse::for_actor(transition, &rider_id))))
}

pub async fn create_shared_ride(
    State(state): Shared,
    Actor(rider_id): Actor,
    Json(request): Json<CreateSharedRideRequest>,
) -> RideResult<(StatusCode, Json<RideResponse>)> {
    let transition = state.ride_service.create_shared_ride(&rider_id, request).await?;
    Ok((StatusCode::CREATED, Json(RideResponse::for_actor(transition, &rider_id))))
}

pub async fn get_ride(
    State(state): Shared,
    Actor(actor): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideSnapshot>> {
    Ok(Json(state.ride_service.get_ride(&actor, &ride_id).await?))
}

pub async fn join_shared_ride(
    State(state): Shared,
    Actor(rider_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideResponse>> {
    let transition = state.ride_service.join_shared_ride(&rider_id, &ride_id).await?;
    Ok(Json(RideResponse::for_actor(transition, &rider_id)))
}

pub async fn leave_shared_ride(
    State(state): Shared,
    Actor(rider_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideResponse>> {
    let transition = state.ride_service.leave_shared_ride(&rider_id, &ride_id).await?;
    Ok(Json(RideResponse::for_actor(transition, &rider_id)))
}

pub async fn confirm_ride(
    State(state): Shared,
    Actor(captain_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideResponse>> {
    let transition = state.ride_service.confirm_ride(&captain_id, &ride_id).await?;
    Ok(Json(RideResponse::for_actor(transition, &captain_id)))
}

pub async fn confirm_shared_ride(
    State(state): Shared,
    Actor(captain_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideResponse>> {
    let transition = state.ride_service.confirm_shared_ride(&captain_id, &ride_id).await?;
    Ok(Json(RideResponse::for_actor(transition, &captain_id)))
}

pub async fn start_ride(
    State(state): Shared,
    Actor(captain_id): Actor,
    Path(ride_id): Path<String>,
    Json(body): Json<StartRideBody>,
) -> RideResult<Json<RideResponse>> {
    let transition = state.ride_service.start_ride(&captain_id, &ride_id, &body.otp).await?;
    Ok(Json(RideResponse::for_actor(transition, &captain_id)))
}

pub async fn start_shared_ride(
    State(state): Shared,
    Actor(captain_id): Actor,
    Path(ride_id): Path<String>,
    Json(body): Json<StartRideBody>,
) -> RideResult<Json<RideResponse>> {
    let transition = state
        .ride_service
        .start_shared_ride(&captain_id, &ride_id, &body.otp)
        .await?;
    Ok(Json(RideResponse::for_actor(transition, &captain_id)))
}

pub async fn end_ride(
    State(state): Shared,
    Actor(captain_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<WithSideEffects<RideCompletion>>> {
    let transition = state.ride_service.end_ride(&captain_id, &ride_id).await?;
    Ok(Json(transition.into()))
}

pub async fn end_shared_ride(
    State(state): Shared,
    Actor(captain_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<WithSideEffects<RideCompletion>>> {
    let transition = state.ride_service.end_shared_ride(&captain_id, &ride_id).await?;
    Ok(Json(transition.into()))
}

pub async fn cancel_ride(
    State(state): Shared,
    Actor(captain_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RideResponse>> {
    let transition = state.ride_service.cancel_ride_by_captain(&captain_id, &ride_id).await?;
    Ok(Json(RideResponse::for_actor(transition, &captain_id)))
}

pub async fn rate_ride(
    State(state): Shared,
    Actor(rider_id): Actor,
    Path(ride_id): Path<String>,
    Json(body): Json<RateRideBody>,
) -> RideResult<Json<RideResponse>> {
    let transition = state
        .ride_service
        .rate_ride(&rider_id, &ride_id, body.rating, body.comment)
        .await?;
    Ok(Json(RideResponse::for_actor(transition, &rider_id)))
}

pub async fn update_payment_method(
    State(state): Shared,
    Actor(rider_id): Actor,
    Path(ride_id): Path<String>,
    Json(body): Json<PaymentMethodBody>,
) -> RideResult<Json<RideResponse>> {
    let method: PaymentMethod = body.payment_method.parse()?;
    let transition = state
        .ride_service
        .update_payment_method(&rider_id, &ride_id, method)
        .await?;
    Ok(Json(RideResponse::for_actor(transition, &rider_id)))
}

pub async fn complete_payment(
    State(state): Shared,
    Actor(payer_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<WithSideEffects<PaymentReceipt>>> {
    let transition = state.ride_service.complete_payment(&payer_id, &ride_id).await?;
    Ok(Json(transition.into()))
}

pub async fn rewards_quote(
    State(state): Shared,
    Actor(rider_id): Actor,
    Path(ride_id): Path<String>,
) -> RideResult<Json<RewardsQuote>> {
    Ok(Json(state.ride_service.rewards_quote(&rider_id, &ride_id).await?))
}

pub async fn rewards_redeem(
    State(state): Shared,
    Actor(rider_id): Actor,
    Path(ride_id): Path<String>,
    Json(body): Json<RedeemBody>,
) -> RideResult<Json<RedeemReceipt>> {
    Ok(Json(state.ride_service.rewards_redeem(&rider_id, &ride_id, body.points).await?))
}

pub async fn fare_quote(State(state): Shared, Query(query): Query<QuoteQuery>) -> RideResult<Json<FareQuote>> {
    Ok(Json(state.ride_service.fare_quote(&query.pickup, &query.destination).await?))
}

pub async fn place_suggestions(
    State(state): Shared,
    Query(query): Query<SuggestionQuery>,
) -> RideResult<Json<Vec<String>>> {
    Ok(Json(state.ride_service.place_suggestions(&query.input).await?))
}
