// src/models/events.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::driver::{CaptainStats, GeoPoint};
use super::ride::{PaymentMethod, RideSnapshot};

/// Settlement figures attached to ride-ended events.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideEndedPayload {
    pub ride: RideSnapshot,
    pub total_fare: u64,
    pub company_fee: u64,
    pub driver_earnings: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewRidePayload {
    pub ride: RideSnapshot,
    pub distance_km: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentMethodPayload {
    pub ride_id: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentCompletedPayload {
    pub ride_id: String,
    pub payment_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EarningsPayload {
    pub earnings_today: u64,
    pub earnings_last_reset: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EcoStatsPayload {
    pub eco_streak: u32,
    pub last_eco_ride_at: Option<DateTime<Utc>>,
    pub total_eco_rides: u32,
    pub co2_saved_kg: f64,
    pub badges: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CaptainLocationPayload {
    pub captain_id: String,
    pub location: GeoPoint,
}

/// Everything the core publishes, one variant per wire event name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RideEvent {
    NewRide(NewRidePayload),
    NewSharedRide(NewRidePayload),
    RideConfirmed(RideSnapshot),
    SharedRideConfirmed(RideSnapshot),
    RideStarted(RideSnapshot),
    SharedRideStarted(RideSnapshot),
    RideEnded(RideEndedPayload),
    SharedRideEnded(RideEndedPayload),
    RideRequeued(RideSnapshot),
    RideStatusUpdated(RideSnapshot),
    SharedRideUpdated(RideSnapshot),
    SharedRideJoined(RideSnapshot),
    PassengerLeft(RideSnapshot),
    SharedRideLeft(RideSnapshot),
    PaymentMethodUpdated(PaymentMethodPayload),
    PaymentCompleted(PaymentCompletedPayload),
    EarningsUpdated(EarningsPayload),
    CaptainStatsUpdated(CaptainStats),
    EcoStatsUpdated(EcoStatsPayload),
    CaptainLocation(CaptainLocationPayload),
}

impl RideEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RideEvent::NewRide(_) => "new-ride",
            RideEvent::NewSharedRide(_) => "new-shared-ride",
            RideEvent::RideConfirmed(_) => "ride-confirmed",
            RideEvent::SharedRideConfirmed(_) => "shared-ride-confirmed",
            RideEvent::RideStarted(_) => "ride-started",
            RideEvent::SharedRideStarted(_) => "shared-ride-started",
            RideEvent::RideEnded(_) => "ride-ended",
            RideEvent::SharedRideEnded(_) => "shared-ride-ended",
            RideEvent::RideRequeued(_) => "ride-requeued",
            RideEvent::RideStatusUpdated(_) => "ride-status-updated",
            RideEvent::SharedRideUpdated(_) => "shared-ride-updated",
            RideEvent::SharedRideJoined(_) => "shared-ride-joined",
            RideEvent::PassengerLeft(_) => "passenger-left",
            RideEvent::SharedRideLeft(_) => "shared-ride-left",
            RideEvent::PaymentMethodUpdated(_) => "payment-method-updated",
            RideEvent::PaymentCompleted(_) => "payment-completed",
            RideEvent::EarningsUpdated(_) => "earnings-updated",
            RideEvent::CaptainStatsUpdated(_) => "captain-stats-updated",
            RideEvent::EcoStatsUpdated(_) => "eco-stats-updated",
            RideEvent::CaptainLocation(_) => "captain-location",
        }
    }

    /// The JSON body without the envelope, as pushed to clients.
    pub fn data(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn new_ride(ride: RideSnapshot) -> Self {
        let payload = NewRidePayload { distance_km: ride.distance_km, ride };
        if payload.ride.is_shared {
            RideEvent::NewSharedRide(payload)
        } else {
            RideEvent::NewRide(payload)
        }
    }

    pub fn confirmed(ride: RideSnapshot) -> Self {
        if ride.is_shared { RideEvent::SharedRideConfirmed(ride) } else { RideEvent::RideConfirmed(ride) }
    }

    pub fn started(ride: RideSnapshot) -> Self {
        if ride.is_shared { RideEvent::SharedRideStarted(ride) } else { RideEvent::RideStarted(ride) }
    }

    pub fn ended(payload: RideEndedPayload) -> Self {
        if payload.ride.is_shared { RideEvent::SharedRideEnded(payload) } else { RideEvent::RideEnded(payload) }
    }
}
