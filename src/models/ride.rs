// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::driver::{GeoPoint, VehicleClass};
use crate::errors::{RideError, RideResult};

pub const MAX_SHARED_SEATS: u8 = 4;
pub const DEFAULT_SHARED_SEATS: u8 = 2;
pub const MAX_RATING_COMMENT_CHARS: usize = 500;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,   // Waiting for a captain to accept
    Accepted,  // Captain assigned, waiting for OTP at pickup
    Ongoing,   // Rider on board
    Completed, // Settled
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Ongoing => "ongoing",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassengerStatus {
    Requested,
    Confirmed,
    Onboard,
    Completed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    #[serde(rename = "cod", alias = "cash")]
    Cash,
    Online,
}

impl FromStr for PaymentMethod {
    type Err = RideError;

    /// Wallet payments settle through the online rail.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cod" | "cash" => Ok(PaymentMethod::Cash),
            "online" | "wallet" => Ok(PaymentMethod::Online),
            other => Err(RideError::InvalidFieldValue {
                field: "payment_method".to_string(),
                value: other.to_string(),
                reason: "expected cod, cash, online or wallet".to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Passenger {
    pub user_id: String,
    pub pickup: String,
    pub destination: String,
    pub fare: u64,
    pub status: PassengerStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ride {
    pub id: String,
    pub user_id: String,
    pub captain_id: Option<String>,
    pub vehicle_class: VehicleClass,

    // Geography, fixed at creation
    pub pickup: String,
    pub destination: String,
    pub pickup_point: GeoPoint,
    pub distance_meters: u64,
    pub duration_minutes: u32,

    // Commercial
    pub fare: u64,
    pub discount_amount: u64,
    pub discount_points_used: u64,
    pub discount_source: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
    pub order_id: Option<String>,
    pub signature: Option<String>,
    pub company_fee: u64,
    pub driver_earnings: u64,
    /// Set once the captain's daily earnings and loyalty points were credited for this ride.
    pub earnings_credited: bool,

    // Sharing
    pub is_shared: bool,
    pub max_seats: u8,
    pub available_seats: u8,
    pub fare_per_passenger: u64,
    pub passengers: Vec<Passenger>,

    pub status: RideStatus,
    pub otp: String,

    // Feedback
    pub rating: Option<u8>,
    pub rating_comment: Option<String>,
    pub rated_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn has_payment_record(&self) -> bool {
        self.payment_id.is_some() || self.order_id.is_some() || self.signature.is_some()
    }

    pub fn is_paid_online(&self) -> bool {
        self.has_payment_record() || self.payment_method != PaymentMethod::Cash
    }

    pub fn passenger_count(&self) -> u64 {
        if self.is_shared {
            (self.passengers.len() as u64).max(1)
        } else {
            1
        }
    }

    /// Fare owed for the whole trip: per-passenger fare times head count on shared rides.
    pub fn total_fare(&self) -> u64 {
        if self.is_shared {
            let per_passenger = if self.fare_per_passenger > 0 { self.fare_per_passenger } else { self.fare };
            per_passenger * self.passenger_count()
        } else {
            self.fare
        }
    }

    /// Riders that receive ride events. A solo ride's only passenger is its requester.
    pub fn rider_ids(&self) -> Vec<String> {
        if !self.is_shared {
            return vec![self.user_id.clone()];
        }
        let mut ids: Vec<String> = Vec::with_capacity(self.passengers.len());
        for passenger in &self.passengers {
            if !ids.contains(&passenger.user_id) {
                ids.push(passenger.user_id.clone());
            }
        }
        ids
    }

    pub fn is_passenger(&self, user_id: &str) -> bool {
        if self.is_shared {
            self.passengers.iter().any(|p| p.user_id == user_id)
        } else {
            self.user_id == user_id
        }
    }

    pub fn is_assigned_to(&self, captain_id: &str) -> bool {
        self.captain_id.as_deref() == Some(captain_id)
    }

    fn ensure_shared(&self) -> RideResult<()> {
        if self.is_shared {
            Ok(())
        } else {
            Err(RideError::validation_error("ride_id", "Ride is not shared"))
        }
    }

    fn set_passenger_status(&mut self, status: PassengerStatus) {
        for passenger in &mut self.passengers {
            passenger.status = status;
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// pending -> accepted. Only one captain can ever win this.
    pub fn accept(&mut self, captain_id: &str, now: DateTime<Utc>) -> RideResult<()> {
        match self.status {
            RideStatus::Pending if self.captain_id.is_none() => {}
            RideStatus::Pending | RideStatus::Accepted | RideStatus::Ongoing | RideStatus::Completed => {
                return Err(RideError::AlreadyAccepted(self.id.clone()));
            }
            RideStatus::Cancelled => {
                return Err(RideError::wrong_state(&self.id, self.status, "accept"));
            }
        }
        self.captain_id = Some(captain_id.to_string());
        self.status = RideStatus::Accepted;
        self.accepted_at = Some(now);
        self.set_passenger_status(PassengerStatus::Confirmed);
        self.touch(now);
        Ok(())
    }

    /// accepted -> pending, invoked by the assigned captain backing out before pickup.
    pub fn requeue(&mut self, captain_id: &str, now: DateTime<Utc>) -> RideResult<()> {
        if !self.is_assigned_to(captain_id) {
            return Err(RideError::forbidden("Only the assigned captain can cancel this ride"));
        }
        if self.status != RideStatus::Accepted {
            return Err(RideError::wrong_state(&self.id, self.status, "cancel"));
        }
        self.captain_id = None;
        self.status = RideStatus::Pending;
        self.accepted_at = None;
        self.set_passenger_status(PassengerStatus::Requested);
        self.touch(now);
        Ok(())
    }

    /// accepted -> ongoing, gated by the rider's OTP.
    pub fn start(&mut self, otp: &str, now: DateTime<Utc>) -> RideResult<()> {
        if self.status != RideStatus::Accepted {
            return Err(RideError::wrong_state(&self.id, self.status, "start"));
        }
        if self.otp != otp.trim() {
            return Err(RideError::InvalidOtp);
        }
        self.status = RideStatus::Ongoing;
        self.started_at = Some(now);
        self.set_passenger_status(PassengerStatus::Onboard);
        self.touch(now);
        Ok(())
    }

    /// Guards for ongoing -> completed.
    pub fn ensure_completable(&self, captain_id: &str) -> RideResult<()> {
        if !self.is_assigned_to(captain_id) {
            return Err(RideError::forbidden("Only the assigned captain can end this ride"));
        }
        if self.status != RideStatus::Ongoing {
            return Err(RideError::wrong_state(&self.id, self.status, "end"));
        }
        if self.payment_method == PaymentMethod::Online && !self.has_payment_record() {
            return Err(RideError::PaymentRequired(self.id.clone()));
        }
        Ok(())
    }

    pub fn mark_completed(&mut self, company_fee: u64, driver_earnings: u64, now: DateTime<Utc>) {
        self.company_fee = company_fee;
        self.driver_earnings = driver_earnings;
        self.status = RideStatus::Completed;
        self.completed_at = Some(now);
        self.set_passenger_status(PassengerStatus::Completed);
        self.touch(now);
    }

    /// One rating, by the requester, after completion.
    pub fn rate(&mut self, user_id: &str, rating: u8, comment: Option<String>, now: DateTime<Utc>) -> RideResult<()> {
        if self.user_id != user_id {
            return Err(RideError::forbidden("Only the rider who requested the ride can rate it"));
        }
        if self.status != RideStatus::Completed {
            return Err(RideError::wrong_state(&self.id, self.status, "rate"));
        }
        if self.rating.is_some() || self.rated_at.is_some() {
            return Err(RideError::AlreadyRated(self.id.clone()));
        }
        if !(1..=5).contains(&rating) {
            return Err(RideError::validation_error("rating", "Rating must be between 1 and 5"));
        }
        self.rating = Some(rating);
        self.rating_comment = comment
            .map(|c| c.chars().take(MAX_RATING_COMMENT_CHARS).collect::<String>())
            .filter(|c| !c.trim().is_empty());
        self.rated_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Take one seat on a pending shared ride.
    pub fn join(&mut self, user_id: &str, now: DateTime<Utc>) -> RideResult<()> {
        self.ensure_shared()?;
        if self.status != RideStatus::Pending {
            return Err(RideError::wrong_state(&self.id, self.status, "join"));
        }
        if self.is_passenger(user_id) {
            return Err(RideError::AlreadyPassenger(self.id.clone()));
        }
        if self.available_seats == 0 {
            return Err(RideError::InsufficientSeats(self.id.clone()));
        }
        self.passengers.push(Passenger {
            user_id: user_id.to_string(),
            pickup: self.pickup.clone(),
            destination: self.destination.clone(),
            fare: self.fare_per_passenger,
            status: PassengerStatus::Requested,
        });
        self.available_seats -= 1;
        self.touch(now);
        Ok(())
    }

    /// Give a seat back on a pending shared ride.
    pub fn leave(&mut self, user_id: &str, now: DateTime<Utc>) -> RideResult<()> {
        self.ensure_shared()?;
        if self.status != RideStatus::Pending {
            return Err(RideError::wrong_state(&self.id, self.status, "leave"));
        }
        let before = self.passengers.len();
        self.passengers.retain(|p| p.user_id != user_id);
        if self.passengers.len() == before {
            return Err(RideError::NotAPassenger(self.id.clone()));
        }
        self.available_seats = (self.available_seats + 1).min(self.max_seats);
        self.touch(now);
        Ok(())
    }

    pub fn set_payment_method(&mut self, user_id: &str, method: PaymentMethod, now: DateTime<Utc>) -> RideResult<()> {
        if self.user_id != user_id {
            return Err(RideError::forbidden("Only the ride owner can update payment method"));
        }
        if self.has_payment_record() {
            return Err(RideError::validation_error("payment_method", "Payment already completed"));
        }
        if !matches!(self.status, RideStatus::Accepted | RideStatus::Ongoing) {
            return Err(RideError::wrong_state(&self.id, self.status, "change payment method of"));
        }
        self.payment_method = method;
        self.touch(now);
        Ok(())
    }

    /// Guards for applying a rewards discount: the owner, a solo ride not yet paid, and no earlier redemption.
    pub fn ensure_redeemable(&self, user_id: &str) -> RideResult<()> {
        if self.user_id != user_id {
            return Err(RideError::forbidden("Only the ride owner can redeem points on it"));
        }
        if self.is_shared {
            return Err(RideError::validation_error("ride_id", "Points cannot be redeemed on shared rides"));
        }
        if !matches!(self.status, RideStatus::Pending | RideStatus::Accepted) || self.has_payment_record() {
            return Err(RideError::wrong_state(&self.id, self.status, "redeem points on"));
        }
        if self.discount_points_used > 0 {
            return Err(RideError::validation_error("points", "Points were already redeemed on this ride"));
        }
        Ok(())
    }

    /// Record a one-off rewards discount; 1 point takes 1 unit off the fare.
    pub fn apply_rewards_discount(&mut self, user_id: &str, points: u64, now: DateTime<Utc>) -> RideResult<()> {
        self.ensure_redeemable(user_id)?;
        if points > self.fare {
            return Err(RideError::validation_error("points", "Discount exceeds the fare"));
        }
        self.fare -= points;
        self.discount_amount = points;
        self.discount_points_used = points;
        self.discount_source = Some("rewards".to_string());
        self.touch(now);
        Ok(())
    }

    /// Store the gateway references. Returns false when the ride was already paid.
    pub fn record_payment(&mut self, payment_id: String, order_id: String, now: DateTime<Utc>) -> RideResult<bool> {
        if self.has_payment_record() {
            return Ok(false);
        }
        if self.payment_method == PaymentMethod::Cash {
            return Err(RideError::validation_error(
                "payment_method",
                "Ride is cash on delivery; online payment is not accepted",
            ));
        }
        if self.status == RideStatus::Cancelled {
            return Err(RideError::wrong_state(&self.id, self.status, "pay for"));
        }
        self.payment_method = PaymentMethod::Online;
        self.payment_id = Some(payment_id);
        self.order_id = Some(order_id);
        self.touch(now);
        Ok(true)
    }

    /// Flip the credited flag. Returns false if someone else already credited this ride.
    pub fn claim_earnings_credit(&mut self, now: DateTime<Utc>) -> bool {
        if self.earnings_credited {
            return false;
        }
        self.earnings_credited = true;
        self.touch(now);
        true
    }

    /// Default read view: no OTP.
    pub fn snapshot(&self) -> RideSnapshot {
        RideSnapshot::from_ride(self, false)
    }

    /// View for the ride's own riders.
    pub fn snapshot_with_otp(&self) -> RideSnapshot {
        RideSnapshot::from_ride(self, true)
    }
}

/// What clients see of a ride.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RideSnapshot {
    pub id: String,
    pub user_id: String,
    pub captain_id: Option<String>,
    pub vehicle_class: VehicleClass,
    pub pickup: String,
    pub destination: String,
    pub distance_meters: u64,
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub fare: u64,
    pub discount_amount: u64,
    pub discount_points_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_source: Option<String>,
    pub payment_method: PaymentMethod,
    pub paid: bool,
    pub company_fee: u64,
    pub driver_earnings: u64,
    pub is_shared: bool,
    pub max_seats: u8,
    pub available_seats: u8,
    pub fare_per_passenger: u64,
    pub passenger_count: usize,
    pub passengers: Vec<Passenger>,
    pub status: RideStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl RideSnapshot {
    fn from_ride(ride: &Ride, with_otp: bool) -> Self {
        Self {
            id: ride.id.clone(),
            user_id: ride.user_id.clone(),
            captain_id: ride.captain_id.clone(),
            vehicle_class: ride.vehicle_class,
            pickup: ride.pickup.clone(),
            destination: ride.destination.clone(),
            distance_meters: ride.distance_meters,
            distance_km: ride.distance_meters as f64 / 1000.0,
            duration_minutes: ride.duration_minutes,
            fare: ride.fare,
            discount_amount: ride.discount_amount,
            discount_points_used: ride.discount_points_used,
            discount_source: ride.discount_source.clone(),
            payment_method: ride.payment_method,
            paid: ride.has_payment_record(),
            company_fee: ride.company_fee,
            driver_earnings: ride.driver_earnings,
            is_shared: ride.is_shared,
            max_seats: ride.max_seats,
            available_seats: ride.available_seats,
            fare_per_passenger: ride.fare_per_passenger,
            passenger_count: ride.passengers.len().max(usize::from(!ride.is_shared)),
            passengers: ride.passengers.clone(),
            status: ride.status,
            otp: with_otp.then(|| ride.otp.clone()),
            rating: ride.rating,
            created_at: ride.created_at,
        }
    }
}
