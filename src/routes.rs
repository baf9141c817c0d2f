// src/routes.rs
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    handlers::{driver_handler, event_handler, ride_handler, user_handler},
    state::AppState,
};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // Profiles
        .route("/users/riders", post(user_handler::register_rider))
        .route("/users/captains", post(user_handler::register_captain))
        .route("/users/:user_id", get(user_handler::get_user))
        // Driver directory
        .route("/drivers/location", post(driver_handler::update_location))
        .route("/drivers/online", post(driver_handler::go_online))
        .route("/drivers/offline", post(driver_handler::go_offline))
        .route("/drivers/nearby", get(driver_handler::nearby))
        .route("/drivers/stats", get(driver_handler::stats))
        // Pricing and places
        .route("/fares/quote", get(ride_handler::fare_quote))
        .route("/places/suggestions", get(ride_handler::place_suggestions))
        // Ride lifecycle
        .route("/rides", post(ride_handler::create_ride))
        .route("/rides/shared", post(ride_handler::create_shared_ride))
        .route("/rides/:ride_id", get(ride_handler::get_ride))
        .route("/rides/:ride_id/join", post(ride_handler::join_shared_ride))
        .route("/rides/:ride_id/leave", post(ride_handler::leave_shared_ride))
        .route("/rides/:ride_id/confirm", post(ride_handler::confirm_ride))
        .route("/rides/:ride_id/confirm-shared", post(ride_handler::confirm_shared_ride))
        .route("/rides/:ride_id/start", post(ride_handler::start_ride))
        .route("/rides/:ride_id/start-shared", post(ride_handler::start_shared_ride))
        .route("/rides/:ride_id/end", post(ride_handler::end_ride))
        .route("/rides/:ride_id/end-shared", post(ride_handler::end_shared_ride))
        .route("/rides/:ride_id/cancel", post(ride_handler::cancel_ride))
        .route("/rides/:ride_id/rate", post(ride_handler::rate_ride))
        .route("/rides/:ride_id/payment-method", post(ride_handler::update_payment_method))
        .route("/rides/:ride_id/payment", post(ride_handler::complete_payment))
        .route("/rides/:ride_id/rewards", get(ride_handler::rewards_quote))
        .route("/rides/:ride_id/rewards/redeem", post(ride_handler::rewards_redeem))
        // Event streams
        .route("/events/broadcast", get(event_handler::subscribe_broadcast))
        .route("/events/:kind/:id", get(event_handler::subscribe))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
