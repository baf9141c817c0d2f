// src/services/ride_service.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{RideError, RideResult, SideEffectFailure, ValidationError},
    models::{
        driver::{CaptainStats, GeoPoint, VehicleClass},
        events::{PaymentCompletedPayload, PaymentMethodPayload, RideEndedPayload, RideEvent},
        ride::{
            DEFAULT_SHARED_SEATS, MAX_SHARED_SEATS, Passenger, PassengerStatus, PaymentMethod, Ride, RideSnapshot,
            RideStatus,
        },
    },
    services::{
        dispatch_service::DispatchService,
        fare_service::FareService,
        geo_service::{DistanceTime, GeoProvider},
        ledger_service::LedgerService,
        messaging_service::{Endpoint, Notifier, fan_out},
        rewards_service::{RedeemReceipt, RewardsQuote, RewardsService},
        settlement_service::{PointsAward, SettlementReport, SettlementService},
    },
    utils::id_generator::{IdGenerator, IdType},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRideRequest {
    pub pickup: String,
    pub destination: String,
    pub vehicle_class: VehicleClass,
    #[serde(default)]
    pub rewards_points_to_use: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSharedRideRequest {
    pub pickup: String,
    pub destination: String,
    pub vehicle_class: VehicleClass,
    #[serde(default)]
    pub max_seats: Option<u8>,
    #[serde(default)]
    pub discount_factor: Option<f64>,
}

/// A committed transition plus the non-critical steps that failed after it.
#[derive(Debug)]
pub struct Transition<T> {
    pub value: T,
    pub side_effects: Vec<SideEffectFailure>,
}

impl<T> Transition<T> {
    fn new(value: T, side_effects: Vec<SideEffectFailure>) -> Self {
        if !side_effects.is_empty() {
            tracing::warn!("{} side effects failed after commit", side_effects.len());
        }
        Self { value, side_effects }
    }
}

#[derive(Debug, Serialize)]
pub struct RideCompletion {
    pub ride: RideSnapshot,
    pub settlement: SettlementReport,
}

#[derive(Debug, Serialize)]
pub struct PaymentReceipt {
    pub ride_id: String,
    pub payment_id: Option<String>,
    pub order_id: Option<String>,
    pub already_paid: bool,
    pub captain_points: u64,
    pub rider_points: Vec<PointsAward>,
}

#[derive(Debug, Serialize)]
pub struct FareQuote {
    pub distance_meters: u64,
    pub duration_seconds: u64,
    pub fares: BTreeMap<VehicleClass, u64>,
}

#[async_trait]
pub trait RideOperations: Send + Sync {
    async fn create_ride(&self, rider_id: &str, request: CreateRideRequest) -> RideResult<Transition<Ride>>;
    async fn create_shared_ride(&self, rider_id: &str, request: CreateSharedRideRequest)
    -> RideResult<Transition<Ride>>;
    async fn join_shared_ride(&self, rider_id: &str, ride_id: &str) -> RideResult<Transition<Ride>>;
    async fn leave_shared_ride(&self, rider_id: &str, ride_id: &str) -> RideResult<Transition<Ride>>;
    async fn confirm_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<Ride>>;
    async fn confirm_shared_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<Ride>>;
    async fn start_ride(&self, captain_id: &str, ride_id: &str, otp: &str) -> RideResult<Transition<Ride>>;
    async fn start_shared_ride(&self, captain_id: &str, ride_id: &str, otp: &str) -> RideResult<Transition<Ride>>;
    async fn end_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<RideCompletion>>;
    async fn end_shared_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<RideCompletion>>;
    async fn cancel_ride_by_captain(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<Ride>>;
    async fn rate_ride(
        &self,
        rider_id: &str,
        ride_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> RideResult<Transition<Ride>>;
    async fn update_payment_method(
        &self,
        rider_id: &str,
        ride_id: &str,
        method: PaymentMethod,
    ) -> RideResult<Transition<Ride>>;
    async fn complete_payment(&self, payer_id: &str, ride_id: &str) -> RideResult<Transition<PaymentReceipt>>;
    async fn fare_quote(&self, pickup: &str, destination: &str) -> RideResult<FareQuote>;
    async fn get_ride(&self, actor_id: &str, ride_id: &str) -> RideResult<RideSnapshot>;
    async fn captain_stats(&self, captain_id: &str) -> RideResult<CaptainStats>;
    async fn rewards_quote(&self, rider_id: &str, ride_id: &str) -> RideResult<RewardsQuote>;
    async fn rewards_redeem(&self, rider_id: &str, ride_id: &str, points: u64) -> RideResult<RedeemReceipt>;
    async fn place_suggestions(&self, input: &str) -> RideResult<Vec<String>>;
    async fn pending_rides(&self, class: VehicleClass) -> RideResult<Vec<RideSnapshot>>;
}

pub struct RideService {
    ledger: Arc<LedgerService>,
    geo: Arc<dyn GeoProvider>,
    notifier: Arc<dyn Notifier>,
    fares: FareService,
    dispatch: Arc<DispatchService>,
    settlement: Arc<SettlementService>,
    rewards: Arc<RewardsService>,
}

struct Route {
    pickup_point: GeoPoint,
    distance_time: DistanceTime,
}

impl RideService {
    pub fn new(
        ledger: Arc<LedgerService>,
        geo: Arc<dyn GeoProvider>,
        notifier: Arc<dyn Notifier>,
        fares: FareService,
        dispatch: Arc<DispatchService>,
        settlement: Arc<SettlementService>,
        rewards: Arc<RewardsService>,
    ) -> Self {
        Self {
            ledger,
            geo,
            notifier,
            fares,
            dispatch,
            settlement,
            rewards,
        }
    }

    fn validate_addresses(pickup: &str, destination: &str) -> RideResult<()> {
        let mut errors = Vec::new();
        for (field, value) in [("pickup", pickup), ("destination", destination)] {
            if value.trim().len() < 3 {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("{} must be at least 3 characters", field),
                });
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(RideError::ValidationFailed(errors)) }
    }

    fn ensure_kind(ride: &Ride, shared: bool) -> RideResult<()> {
        match (ride.is_shared, shared) {
            (true, false) => Err(RideError::validation_error("ride_id", "Ride is shared; use the shared-ride operation")),
            (false, true) => Err(RideError::validation_error("ride_id", "Ride is not shared")),
            _ => Ok(()),
        }
    }

    /// Resolve pickup coordinates and route. Any failure aborts creation before anything is stored.
    async fn resolve_route(&self, pickup: &str, destination: &str) -> RideResult<Route> {
        let lookups = futures::future::try_join(
            self.geo.geocode(pickup),
            self.geo.distance_time(pickup, destination),
        );
        let (pickup_point, distance_time) = lookups.await.map_err(|e| match e {
            RideError::GeoLookupFailed(_) => e,
            other => RideError::GeoLookupFailed(other.to_string()),
        })?;
        Ok(Route {
            pickup_point,
            distance_time,
        })
    }

    fn new_ride(rider_id: &str, pickup: &str, destination: &str, class: VehicleClass, route: &Route, now: DateTime<Utc>) -> Ride {
        Ride {
            id: IdGenerator::generate(IdType::Ride),
            user_id: rider_id.to_string(),
            captain_id: None,
            vehicle_class: class,
            pickup: pickup.trim().to_string(),
            destination: destination.trim().to_string(),
            pickup_point: route.pickup_point,
            distance_meters: route.distance_time.distance_meters,
            duration_minutes: (route.distance_time.duration_seconds as f64 / 60.0).round() as u32,
            fare: 0,
            discount_amount: 0,
            discount_points_used: 0,
            discount_source: None,
            payment_method: PaymentMethod::Cash,
            payment_id: None,
            order_id: None,
            signature: None,
            company_fee: 0,
            driver_earnings: 0,
            earnings_credited: false,
            is_shared: false,
            max_seats: 1,
            available_seats: 0,
            fare_per_passenger: 0,
            passengers: Vec::new(),
            status: RideStatus::Pending,
            otp: IdGenerator::generate_otp(),
            rating: None,
            rating_comment: None,
            rated_at: None,
            created_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    fn rider_endpoints(ride: &Ride) -> Vec<Endpoint> {
        ride.rider_ids().into_iter().map(Endpoint::User).collect()
    }

    fn party_endpoints(ride: &Ride) -> Vec<Endpoint> {
        let mut endpoints = Self::rider_endpoints(ride);
        if let Some(captain_id) = &ride.captain_id {
            endpoints.push(Endpoint::Captain(captain_id.clone()));
        }
        endpoints
    }

    async fn publish(&self, endpoints: &[Endpoint], event: RideEvent) -> Vec<SideEffectFailure> {
        fan_out(self.notifier.as_ref(), endpoints, &event).await
    }

    async fn store_new_ride(&self, ride: Ride) -> RideResult<Transition<Ride>> {
        if let Err(e) = self.ledger.insert_ride(&ride).await {
            tracing::error!("Failed to store ride {}: {}", ride.id, e);
            if let Err(refund_err) = self.rewards.refund(&ride.user_id, ride.discount_points_used).await {
                tracing::error!("Could not refund points to {}: {}", ride.user_id, refund_err);
            }
            return Err(e);
        }

        tracing::info!(
            "Ride {} created by {} ({}, fare {}, shared: {})",
            ride.id,
            ride.user_id,
            ride.vehicle_class,
            ride.fare,
            ride.is_shared
        );
        let outcome = self.dispatch.broadcast(&ride).await;
        Ok(Transition::new(ride, outcome.failures))
    }

    async fn confirm(&self, captain_id: &str, ride_id: &str, shared: bool) -> RideResult<Transition<Ride>> {
        let captain = self.ledger.require_user(captain_id).await?;
        let profile = captain
            .captain
            .as_ref()
            .ok_or_else(|| RideError::forbidden("Only captains can accept rides"))?;
        let class = profile.vehicle.class;

        let now = Utc::now();
        let result = self
            .ledger
            .update_ride(ride_id, |ride| {
                Self::ensure_kind(ride, shared)?;
                if ride.vehicle_class != class {
                    return Err(RideError::forbidden(format!(
                        "Ride needs a {} but captain drives a {}",
                        ride.vehicle_class, class
                    )));
                }
                ride.accept(captain_id, now)
            })
            .await;

        let ride = match result {
            Ok(ride) => ride,
            Err(e) if e.is_conflict() => {
                tracing::info!("Captain {} lost the race for ride {}", captain_id, ride_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        tracing::info!("Ride {} accepted by captain {}", ride.id, captain_id);

        let mut side_effects = self.dispatch.withdraw(&ride).await;
        if let Err(e) = self.ledger.index_captain_ride(captain_id, &ride.id).await {
            tracing::warn!("Could not index ride {} for captain {}: {}", ride.id, captain_id, e);
            side_effects.push(SideEffectFailure::new("index-captain-ride", e));
        }
        side_effects.extend(
            self.publish(&Self::rider_endpoints(&ride), RideEvent::confirmed(ride.snapshot_with_otp()))
                .await,
        );
        side_effects.extend(
            self.publish(&[Endpoint::Captain(captain_id.to_string())], RideEvent::confirmed(ride.snapshot()))
                .await,
        );
        Ok(Transition::new(ride, side_effects))
    }

    async fn start(&self, captain_id: &str, ride_id: &str, otp: &str, shared: bool) -> RideResult<Transition<Ride>> {
        let now = Utc::now();
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| {
                Self::ensure_kind(ride, shared)?;
                if !ride.is_assigned_to(captain_id) {
                    return Err(RideError::forbidden("Only the assigned captain can start this ride"));
                }
                ride.start(otp, now)
            })
            .await?;
        tracing::info!("Ride {} started", ride.id);

        let side_effects = self
            .publish(&Self::party_endpoints(&ride), RideEvent::started(ride.snapshot()))
            .await;
        Ok(Transition::new(ride, side_effects))
    }

    async fn end(&self, captain_id: &str, ride_id: &str, shared: bool) -> RideResult<Transition<RideCompletion>> {
        let now = Utc::now();
        let settlement = self.settlement.as_ref();
        let mut credit = false;
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| {
                Self::ensure_kind(ride, shared)?;
                ride.ensure_completable(captain_id)?;
                let totals = settlement.totals(ride);
                ride.mark_completed(totals.company_fee, totals.driver_earnings, now);
                // Online rides paid earlier were credited at payment time.
                credit = ride.claim_earnings_credit(now);
                Ok(())
            })
            .await?;
        tracing::info!(
            "Ride {} completed: fee {}, captain earnings {}",
            ride.id,
            ride.company_fee,
            ride.driver_earnings
        );

        let report = self.settlement.settle_completed(&ride, credit).await;
        let mut side_effects = Vec::new();
        let payload = RideEndedPayload {
            ride: ride.snapshot(),
            total_fare: report.totals.total_fare,
            company_fee: ride.company_fee,
            driver_earnings: ride.driver_earnings,
        };
        side_effects.extend(
            self.publish(&Self::party_endpoints(&ride), RideEvent::ended(payload))
                .await,
        );
        side_effects.extend(report.failures.iter().cloned());

        Ok(Transition::new(
            RideCompletion {
                ride: ride.snapshot(),
                settlement: report,
            },
            side_effects,
        ))
    }
}

#[async_trait]
impl RideOperations for RideService {
    async fn create_ride(&self, rider_id: &str, request: CreateRideRequest) -> RideResult<Transition<Ride>> {
        Self::validate_addresses(&request.pickup, &request.destination)?;
        self.ledger.require_user(rider_id).await?;

        let route = self.resolve_route(&request.pickup, &request.destination).await?;
        let base_fare = self.fares.fare_for(
            request.vehicle_class,
            route.distance_time.distance_meters,
            route.distance_time.duration_seconds,
        );

        let points_used = match request.rewards_points_to_use {
            Some(requested) => self.rewards.reserve_for_new_ride(rider_id, base_fare, requested).await?,
            None => 0,
        };

        let mut ride = Self::new_ride(
            rider_id,
            &request.pickup,
            &request.destination,
            request.vehicle_class,
            &route,
            Utc::now(),
        );
        ride.fare = base_fare.saturating_sub(points_used);
        ride.discount_amount = points_used;
        ride.discount_points_used = points_used;
        ride.discount_source = (points_used > 0).then(|| "rewards".to_string());

        self.store_new_ride(ride).await
    }

    async fn create_shared_ride(
        &self,
        rider_id: &str,
        request: CreateSharedRideRequest,
    ) -> RideResult<Transition<Ride>> {
        Self::validate_addresses(&request.pickup, &request.destination)?;
        if request.vehicle_class.is_single_capacity() {
            return Err(RideError::validation_error(
                "vehicle_class",
                format!("{} cannot be shared", request.vehicle_class),
            ));
        }
        self.ledger.require_user(rider_id).await?;

        let route = self.resolve_route(&request.pickup, &request.destination).await?;
        let solo_fare = self.fares.fare_for(
            request.vehicle_class,
            route.distance_time.distance_meters,
            route.distance_time.duration_seconds,
        );
        let per_passenger = self.fares.shared_fare(solo_fare, request.discount_factor);
        let max_seats = request
            .max_seats
            .unwrap_or(DEFAULT_SHARED_SEATS)
            .clamp(1, MAX_SHARED_SEATS);

        let mut ride = Self::new_ride(
            rider_id,
            &request.pickup,
            &request.destination,
            request.vehicle_class,
            &route,
            Utc::now(),
        );
        ride.is_shared = true;
        ride.fare = per_passenger;
        ride.fare_per_passenger = per_passenger;
        ride.max_seats = max_seats;
        ride.available_seats = max_seats - 1;
        ride.passengers.push(Passenger {
            user_id: rider_id.to_string(),
            pickup: ride.pickup.clone(),
            destination: ride.destination.clone(),
            fare: per_passenger,
            status: PassengerStatus::Requested,
        });

        self.store_new_ride(ride).await
    }

    async fn join_shared_ride(&self, rider_id: &str, ride_id: &str) -> RideResult<Transition<Ride>> {
        self.ledger.require_user(rider_id).await?;
        let now = Utc::now();
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| ride.join(rider_id, now))
            .await?;
        tracing::info!("Rider {} joined shared ride {} ({} seats left)", rider_id, ride.id, ride.available_seats);

        let mut side_effects = self
            .publish(&Self::rider_endpoints(&ride), RideEvent::SharedRideUpdated(ride.snapshot()))
            .await;
        side_effects.extend(
            self.publish(
                &[Endpoint::User(rider_id.to_string())],
                RideEvent::SharedRideJoined(ride.snapshot_with_otp()),
            )
            .await,
        );
        Ok(Transition::new(ride, side_effects))
    }

    async fn leave_shared_ride(&self, rider_id: &str, ride_id: &str) -> RideResult<Transition<Ride>> {
        let now = Utc::now();
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| ride.leave(rider_id, now))
            .await?;
        tracing::info!("Rider {} left shared ride {} ({} seats left)", rider_id, ride.id, ride.available_seats);

        let mut side_effects = self
            .publish(&Self::rider_endpoints(&ride), RideEvent::PassengerLeft(ride.snapshot()))
            .await;
        side_effects.extend(
            self.publish(
                &[Endpoint::User(rider_id.to_string())],
                RideEvent::SharedRideLeft(ride.snapshot()),
            )
            .await,
        );
        Ok(Transition::new(ride, side_effects))
    }

    async fn confirm_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<Ride>> {
        self.confirm(captain_id, ride_id, false).await
    }

    async fn confirm_shared_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<Ride>> {
        self.confirm(captain_id, ride_id, true).await
    }

    async fn start_ride(&self, captain_id: &str, ride_id: &str, otp: &str) -> RideResult<Transition<Ride>> {
        self.start(captain_id, ride_id, otp, false).await
    }

    async fn start_shared_ride(&self, captain_id: &str, ride_id: &str, otp: &str) -> RideResult<Transition<Ride>> {
        self.start(captain_id, ride_id, otp, true).await
    }

    async fn end_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<RideCompletion>> {
        self.end(captain_id, ride_id, false).await
    }

    async fn end_shared_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<RideCompletion>> {
        self.end(captain_id, ride_id, true).await
    }

    async fn cancel_ride_by_captain(&self, captain_id: &str, ride_id: &str) -> RideResult<Transition<Ride>> {
        let now = Utc::now();
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| ride.requeue(captain_id, now))
            .await?;
        tracing::info!("Captain {} backed out of ride {}; re-queued", captain_id, ride.id);

        let mut side_effects = Vec::new();
        if let Err(e) = self.ledger.unindex_captain_ride(captain_id, &ride.id).await {
            tracing::warn!("Could not unindex ride {} for captain {}: {}", ride.id, captain_id, e);
            side_effects.push(SideEffectFailure::new("unindex-captain-ride", e));
        }
        let riders = Self::rider_endpoints(&ride);
        side_effects.extend(
            self.publish(&riders, RideEvent::RideStatusUpdated(ride.snapshot_with_otp()))
                .await,
        );
        side_effects.extend(
            self.publish(&riders, RideEvent::RideRequeued(ride.snapshot_with_otp()))
                .await,
        );
        side_effects.extend(self.dispatch.broadcast(&ride).await.failures);
        Ok(Transition::new(ride, side_effects))
    }

    async fn rate_ride(
        &self,
        rider_id: &str,
        ride_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> RideResult<Transition<Ride>> {
        let now = Utc::now();
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| ride.rate(rider_id, rating, comment.clone(), now))
            .await?;
        tracing::info!("Ride {} rated {} by {}", ride.id, rating, rider_id);

        let mut side_effects = Vec::new();
        if let Some(captain_id) = ride.captain_id.as_deref() {
            let stats = self.settlement.refresh_captain_rating(captain_id).await;
            side_effects.extend(self.settlement.push_captain_stats(captain_id, stats).await);
        }
        Ok(Transition::new(ride, side_effects))
    }

    async fn update_payment_method(
        &self,
        rider_id: &str,
        ride_id: &str,
        method: PaymentMethod,
    ) -> RideResult<Transition<Ride>> {
        let now = Utc::now();
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| ride.set_payment_method(rider_id, method, now))
            .await?;
        tracing::info!("Ride {} payment method set to {:?}", ride.id, method);

        let event = RideEvent::PaymentMethodUpdated(PaymentMethodPayload {
            ride_id: ride.id.clone(),
            payment_method: ride.payment_method,
        });
        let side_effects = self.publish(&Self::party_endpoints(&ride), event).await;
        Ok(Transition::new(ride, side_effects))
    }

    async fn complete_payment(&self, payer_id: &str, ride_id: &str) -> RideResult<Transition<PaymentReceipt>> {
        let (payment_id, order_id) = IdGenerator::generate_payment_reference();
        let now = Utc::now();
        let mut newly_paid = false;
        let mut credit = false;
        let ride = self
            .ledger
            .update_ride(ride_id, |ride| {
                if !ride.is_passenger(payer_id) {
                    return Err(RideError::forbidden("Only the ride's riders can pay for it"));
                }
                newly_paid = ride.record_payment(payment_id.clone(), order_id.clone(), now)?;
                // Before pickup the captain can still back out; completion credits whoever drives.
                credit = newly_paid && ride.status == RideStatus::Ongoing && ride.claim_earnings_credit(now);
                Ok(())
            })
            .await?;

        let mut receipt = PaymentReceipt {
            ride_id: ride.id.clone(),
            payment_id: ride.payment_id.clone(),
            order_id: ride.order_id.clone(),
            already_paid: !newly_paid,
            captain_points: 0,
            rider_points: Vec::new(),
        };
        if !newly_paid {
            tracing::debug!("Ride {} was already paid", ride.id);
            return Ok(Transition::new(receipt, Vec::new()));
        }
        tracing::info!("Ride {} paid online ({})", ride.id, payment_id);

        let mut side_effects = Vec::new();
        if credit {
            let report = self.settlement.credit(&ride).await;
            receipt.captain_points = report.captain_points;
            receipt.rider_points = report.rider_points;
            side_effects.extend(report.failures);
            if let Some(captain_id) = ride.captain_id.as_deref() {
                let stats = self.settlement.captain_stats(captain_id).await;
                side_effects.extend(self.settlement.push_captain_stats(captain_id, stats).await);
            }
        }

        let event = RideEvent::PaymentCompleted(PaymentCompletedPayload {
            ride_id: ride.id.clone(),
            payment_id,
        });
        side_effects.extend(self.publish(&Self::party_endpoints(&ride), event).await);
        Ok(Transition::new(receipt, side_effects))
    }

    async fn fare_quote(&self, pickup: &str, destination: &str) -> RideResult<FareQuote> {
        Self::validate_addresses(pickup, destination)?;
        let route = self
            .geo
            .distance_time(pickup, destination)
            .await
            .map_err(|e| match e {
                RideError::GeoLookupFailed(_) => e,
                other => RideError::GeoLookupFailed(other.to_string()),
            })?;
        Ok(FareQuote {
            distance_meters: route.distance_meters,
            duration_seconds: route.duration_seconds,
            fares: self.fares.quote(route.distance_meters, route.duration_seconds),
        })
    }

    async fn get_ride(&self, actor_id: &str, ride_id: &str) -> RideResult<RideSnapshot> {
        let ride = self.ledger.require_ride(ride_id).await?;
        if ride.is_passenger(actor_id) || ride.user_id == actor_id {
            Ok(ride.snapshot_with_otp())
        } else {
            Ok(ride.snapshot())
        }
    }

    async fn captain_stats(&self, captain_id: &str) -> RideResult<CaptainStats> {
        self.settlement.captain_stats(captain_id).await
    }

    async fn rewards_quote(&self, rider_id: &str, ride_id: &str) -> RideResult<RewardsQuote> {
        self.rewards.quote(rider_id, ride_id).await
    }

    async fn rewards_redeem(&self, rider_id: &str, ride_id: &str, points: u64) -> RideResult<RedeemReceipt> {
        self.rewards.redeem(rider_id, ride_id, points).await
    }

    async fn place_suggestions(&self, input: &str) -> RideResult<Vec<String>> {
        if input.trim().len() < 3 {
            return Err(RideError::validation_error("input", "Type at least 3 characters"));
        }
        self.geo.suggestions(input).await
    }

    async fn pending_rides(&self, class: VehicleClass) -> RideResult<Vec<RideSnapshot>> {
        self.dispatch.pending_rides_for_class(class).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        driver::DriverLocationUpdate,
        user::{RewardsTier, Role, User},
    };
    use crate::services::{
        dispatch_service::DEFAULT_SEARCH_RADIUS_KM,
        driver_service::{DriverOperations, DriverService, tests::captain},
        geo_service::StaticGeoProvider,
        messaging_service::MockNotifier,
        settlement_service::DEFAULT_COMPANY_FEE_RATE,
    };

    const PICKUP: &str = "MG Road";
    const DROP: &str = "Airport";
    const SHARED_PICKUP: &str = "Camp Area";
    const SHARED_DROP: &str = "Hinjewadi";

    struct Fixture {
        rides: Arc<RideService>,
        ledger: Arc<LedgerService>,
        directory: Arc<DriverService>,
        notifier: Arc<MockNotifier>,
    }

    fn fixture_with_geo(geo: StaticGeoProvider) -> Fixture {
        let ledger = Arc::new(LedgerService::new_memory());
        let notifier = Arc::new(MockNotifier::new());
        let directory = Arc::new(DriverService::new(ledger.clone(), notifier.clone()));
        let dispatch = Arc::new(DispatchService::new(
            ledger.clone(),
            directory.clone(),
            notifier.clone(),
            DEFAULT_SEARCH_RADIUS_KM,
        ));
        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            notifier.clone(),
            DEFAULT_COMPANY_FEE_RATE,
        ));
        let rewards = Arc::new(RewardsService::new(ledger.clone()));
        let rides = Arc::new(RideService::new(
            ledger.clone(),
            Arc::new(geo),
            notifier.clone(),
            FareService::default(),
            dispatch,
            settlement,
            rewards,
        ));
        Fixture { rides, ledger, directory, notifier }
    }

    fn fixture() -> Fixture {
        let geo = StaticGeoProvider::new()
            .with_place(PICKUP, GeoPoint::new(18.5204, 73.8567))
            .with_place(SHARED_PICKUP, GeoPoint::new(18.5204, 73.8567))
            // car: 35 + 5 * 9 + 10 * 4 = 120
            .with_route(PICKUP, DROP, 5000, 600)
            // car: 35 + 5 * 9 + 5 * 4 = 100
            .with_route(SHARED_PICKUP, SHARED_DROP, 5000, 300);
        fixture_with_geo(geo)
    }

    impl Fixture {
        async fn rider(&self, id: &str, tier: RewardsTier, points: u64) {
            let mut user: User = captain(id, VehicleClass::Car, false);
            user.role = Role::Rider;
            user.captain = None;
            user.rewards_tier = tier;
            user.rewards_points = points;
            self.ledger.insert_user(&user).await.unwrap();
        }

        async fn captain(&self, id: &str, class: VehicleClass, eco: bool) {
            let user = captain(id, class, eco);
            self.ledger.insert_user(&user).await.unwrap();
            self.directory.register_driver(&user).await.unwrap();
            self.directory
                .update_driver_location(DriverLocationUpdate {
                    driver_id: id.to_string(),
                    location: GeoPoint::new(18.53, 73.86),
                })
                .await
                .unwrap();
            self.directory.set_online(id, true).await.unwrap();
            self.notifier.set_live(Endpoint::Captain(id.to_string())).await;
        }

        async fn solo_ride(&self) -> Ride {
            self.rides
                .create_ride(
                    "usr-rider",
                    CreateRideRequest {
                        pickup: PICKUP.into(),
                        destination: DROP.into(),
                        vehicle_class: VehicleClass::Car,
                        rewards_points_to_use: None,
                    },
                )
                .await
                .unwrap()
                .value
        }

        async fn shared_ride(&self, max_seats: Option<u8>) -> Ride {
            self.rides
                .create_shared_ride(
                    "usr-rider",
                    CreateSharedRideRequest {
                        pickup: SHARED_PICKUP.into(),
                        destination: SHARED_DROP.into(),
                        vehicle_class: VehicleClass::Car,
                        max_seats,
                        discount_factor: Some(1.0),
                    },
                )
                .await
                .unwrap()
                .value
        }

        async fn ongoing_ride(&self) -> Ride {
            let ride = self.solo_ride().await;
            self.rides.confirm_ride("usr-cap", &ride.id).await.unwrap();
            self.rides.start_ride("usr-cap", &ride.id, &ride.otp).await.unwrap().value
        }
    }

    async fn standard() -> Fixture {
        let f = fixture();
        f.rider("usr-rider", RewardsTier::Bronze, 0).await;
        f.captain("usr-cap", VehicleClass::Car, false).await;
        f
    }

    fn seats_balanced(ride: &Ride) -> bool {
        ride.available_seats as usize + ride.passengers.len() == ride.max_seats as usize
    }

    #[tokio::test]
    async fn create_prices_and_dispatches() {
        let f = standard().await;
        let ride = f.solo_ride().await;

        assert_eq!(ride.fare, 120);
        assert_eq!(ride.status, RideStatus::Pending);
        assert_eq!(ride.distance_meters, 5000);
        assert_eq!(ride.duration_minutes, 10);
        assert_eq!(ride.otp.len(), 4);
        assert_eq!(ride.company_fee, 0);
        assert!(ride.captain_id.is_none());
        assert_eq!(
            f.notifier.names_for(&Endpoint::Captain("usr-cap".into())).await,
            vec!["new-ride"]
        );
    }

    #[tokio::test]
    async fn create_redeems_points_once() {
        let f = fixture();
        f.rider("usr-rider", RewardsTier::Gold, 100).await;
        let ride = f
            .rides
            .create_ride(
                "usr-rider",
                CreateRideRequest {
                    pickup: PICKUP.into(),
                    destination: DROP.into(),
                    vehicle_class: VehicleClass::Car,
                    rewards_points_to_use: Some(40),
                },
            )
            .await
            .unwrap()
            .value;

        assert_eq!(ride.discount_points_used, 12);
        assert_eq!(ride.discount_amount, 12);
        assert_eq!(ride.fare, 108);
        assert_eq!(ride.discount_source.as_deref(), Some("rewards"));
        assert_eq!(f.ledger.require_user("usr-rider").await.unwrap().rewards_points, 88);
    }

    #[tokio::test]
    async fn geo_failure_persists_nothing() {
        let f = fixture_with_geo(StaticGeoProvider::new().unreachable());
        f.rider("usr-rider", RewardsTier::Gold, 100).await;
        let err = f
            .rides
            .create_ride(
                "usr-rider",
                CreateRideRequest {
                    pickup: PICKUP.into(),
                    destination: DROP.into(),
                    vehicle_class: VehicleClass::Car,
                    rewards_points_to_use: Some(10),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RideError::GeoLookupFailed(_)));
        assert!(f.ledger.pending_ride_ids(VehicleClass::Car).await.unwrap().is_empty());
        assert_eq!(f.ledger.require_user("usr-rider").await.unwrap().rewards_points, 100);
        assert!(f.notifier.deliveries().await.is_empty());
    }

    #[tokio::test]
    async fn blank_addresses_are_rejected() {
        let f = standard().await;
        let err = f
            .rides
            .create_ride(
                "usr-rider",
                CreateRideRequest {
                    pickup: " ".into(),
                    destination: "".into(),
                    vehicle_class: VehicleClass::Car,
                    rewards_points_to_use: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RideError::ValidationFailed(errors) if errors.len() == 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirms_yield_one_winner() {
        let f = standard().await;
        for n in 0..8 {
            f.captain(&format!("usr-cap-{n}"), VehicleClass::Car, false).await;
        }
        let ride = f.solo_ride().await;

        let mut handles = Vec::new();
        for n in 0..8 {
            let rides = f.rides.clone();
            let ride_id = ride.id.clone();
            handles.push(tokio::spawn(async move {
                let captain_id = format!("usr-cap-{n}");
                rides.confirm_ride(&captain_id, &ride_id).await.map(|t| t.value)
            }));
        }

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(ride) => winners.push(ride.captain_id.unwrap()),
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 7);

        let stored = f.ledger.require_ride(&ride.id).await.unwrap();
        assert_eq!(stored.status, RideStatus::Accepted);
        assert_eq!(stored.captain_id.as_ref(), Some(&winners[0]));
        assert_eq!(
            f.notifier.names_for(&Endpoint::User("usr-rider".into())).await,
            vec!["ride-confirmed"]
        );
    }

    #[tokio::test]
    async fn confirm_checks_vehicle_class() {
        let f = standard().await;
        f.captain("usr-auto", VehicleClass::Auto, false).await;
        let ride = f.solo_ride().await;
        let err = f.rides.confirm_ride("usr-auto", &ride.id).await.unwrap_err();
        assert!(matches!(err, RideError::Forbidden(_)));
        assert_eq!(f.ledger.require_ride(&ride.id).await.unwrap().status, RideStatus::Pending);
    }

    #[tokio::test]
    async fn rider_sees_otp_captain_does_not() {
        let f = standard().await;
        let ride = f.solo_ride().await;
        f.rides.confirm_ride("usr-cap", &ride.id).await.unwrap();

        let to_rider = f.notifier.events_for(&Endpoint::User("usr-rider".into())).await;
        let to_captain = f.notifier.events_for(&Endpoint::Captain("usr-cap".into())).await;
        match (&to_rider[0], to_captain.last()) {
            (RideEvent::RideConfirmed(r), Some(RideEvent::RideConfirmed(c))) => {
                assert_eq!(r.otp.as_deref(), Some(ride.otp.as_str()));
                assert!(c.otp.is_none());
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(f.rides.get_ride("usr-cap", &ride.id).await.unwrap().otp, None);
    }

    #[tokio::test]
    async fn otp_gates_start() {
        let f = standard().await;
        let ride = f.solo_ride().await;
        f.rides.confirm_ride("usr-cap", &ride.id).await.unwrap();

        let wrong = if ride.otp == "1234" { "4321" } else { "1234" };
        let err = f.rides.start_ride("usr-cap", &ride.id, wrong).await.unwrap_err();
        assert!(matches!(err, RideError::InvalidOtp));
        assert_eq!(f.ledger.require_ride(&ride.id).await.unwrap().status, RideStatus::Accepted);

        let started = f.rides.start_ride("usr-cap", &ride.id, &ride.otp).await.unwrap().value;
        assert_eq!(started.status, RideStatus::Ongoing);
        assert_eq!(started.otp, ride.otp);

        let again = f.rides.start_ride("usr-cap", &ride.id, &ride.otp).await.unwrap_err();
        assert!(matches!(again, RideError::WrongState { .. }));
    }

    #[tokio::test]
    async fn cash_ride_credits_at_completion() {
        let f = standard().await;
        let ride = f.ongoing_ride().await;
        let done = f.rides.end_ride("usr-cap", &ride.id).await.unwrap().value;

        assert_eq!(done.ride.status, RideStatus::Completed);
        assert_eq!(done.ride.company_fee, 0);
        assert_eq!(done.ride.driver_earnings, 120);
        assert!(done.settlement.earnings_credited);
        let cap = f.ledger.require_user("usr-cap").await.unwrap().captain.unwrap();
        assert_eq!(cap.earnings_today, 120);
        assert_eq!(cap.rewards_points, 2);
        assert_eq!(f.ledger.require_user("usr-rider").await.unwrap().rewards_points, 3);

        let again = f.rides.end_ride("usr-cap", &ride.id).await.unwrap_err();
        assert!(matches!(again, RideError::WrongState { .. }));
    }

    #[tokio::test]
    async fn online_ride_requires_payment_and_credits_once() {
        let f = standard().await;
        let ride = f.ongoing_ride().await;
        f.rides
            .update_payment_method("usr-rider", &ride.id, PaymentMethod::Online)
            .await
            .unwrap();

        let blocked = f.rides.end_ride("usr-cap", &ride.id).await.unwrap_err();
        assert!(matches!(blocked, RideError::PaymentRequired(_)));

        let paid = f.rides.complete_payment("usr-rider", &ride.id).await.unwrap().value;
        assert!(!paid.already_paid);
        assert!(paid.payment_id.as_deref().is_some_and(|p| p.starts_with("pay_")));
        assert_eq!(paid.captain_points, 2);

        let repeat = f.rides.complete_payment("usr-rider", &ride.id).await.unwrap().value;
        assert!(repeat.already_paid);
        assert_eq!(repeat.payment_id, paid.payment_id);

        let done = f.rides.end_ride("usr-cap", &ride.id).await.unwrap().value;
        assert_eq!(done.ride.company_fee, 2); // round(120 * 0.02)
        assert_eq!(done.ride.driver_earnings, 118);
        assert!(!done.settlement.earnings_credited);

        let cap = f.ledger.require_user("usr-cap").await.unwrap().captain.unwrap();
        assert_eq!(cap.earnings_today, 120, "credited exactly once");
        assert_eq!(cap.rewards_points, 2);

        let rider_events = f.notifier.names_for(&Endpoint::User("usr-rider".into())).await;
        assert!(rider_events.contains(&"payment-method-updated"));
        assert!(rider_events.contains(&"payment-completed"));
        assert_eq!(rider_events.last(), Some(&"ride-ended"));
    }

    #[tokio::test]
    async fn payment_before_pickup_credits_the_completing_captain() {
        let f = standard().await;
        f.captain("usr-cap-2", VehicleClass::Car, false).await;
        let ride = f.solo_ride().await;
        f.rides.confirm_ride("usr-cap", &ride.id).await.unwrap();
        f.rides
            .update_payment_method("usr-rider", &ride.id, PaymentMethod::Online)
            .await
            .unwrap();

        let stranger = f.rides.complete_payment("usr-cap", &ride.id).await.unwrap_err();
        assert!(matches!(stranger, RideError::Forbidden(_)));

        let paid = f.rides.complete_payment("usr-rider", &ride.id).await.unwrap().value;
        assert!(!paid.already_paid);
        assert_eq!(paid.captain_points, 0, "no credit while the captain can still cancel");

        f.rides.cancel_ride_by_captain("usr-cap", &ride.id).await.unwrap();
        f.rides.confirm_ride("usr-cap-2", &ride.id).await.unwrap();
        f.rides.start_ride("usr-cap-2", &ride.id, &ride.otp).await.unwrap();
        let done = f.rides.end_ride("usr-cap-2", &ride.id).await.unwrap().value;
        assert!(done.settlement.earnings_credited);

        let first = f.ledger.require_user("usr-cap").await.unwrap().captain.unwrap();
        let second = f.ledger.require_user("usr-cap-2").await.unwrap().captain.unwrap();
        assert_eq!(first.earnings_today, 0);
        assert_eq!(second.earnings_today, 120);
    }

    #[tokio::test]
    async fn cash_rides_cannot_be_paid_online() {
        let f = standard().await;
        let ride = f.ongoing_ride().await;
        let err = f.rides.complete_payment("usr-rider", &ride.id).await.unwrap_err();
        assert!(matches!(err, RideError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn payment_method_owner_and_state_guards() {
        let f = standard().await;
        let ride = f.solo_ride().await;
        let pending = f
            .rides
            .update_payment_method("usr-rider", &ride.id, PaymentMethod::Online)
            .await
            .unwrap_err();
        assert!(matches!(pending, RideError::WrongState { .. }));

        f.rides.confirm_ride("usr-cap", &ride.id).await.unwrap();
        let stranger = f
            .rides
            .update_payment_method("usr-cap", &ride.id, PaymentMethod::Online)
            .await
            .unwrap_err();
        assert!(matches!(stranger, RideError::Forbidden(_)));
    }

    #[tokio::test]
    async fn shared_ride_seat_accounting() {
        let f = standard().await;
        f.rider("usr-second", RewardsTier::Bronze, 0).await;
        let ride = f.shared_ride(Some(3)).await;

        assert_eq!(ride.fare_per_passenger, 100);
        assert_eq!(ride.available_seats, 2);
        assert_eq!(ride.passengers.len(), 1);
        assert!(seats_balanced(&ride));

        let joined = f.rides.join_shared_ride("usr-second", &ride.id).await.unwrap().value;
        assert_eq!(joined.available_seats, 1);
        assert_eq!(joined.passengers.len(), 2);
        assert!(seats_balanced(&joined));

        let left = f.rides.leave_shared_ride("usr-second", &ride.id).await.unwrap().value;
        assert_eq!(left.available_seats, 2);
        assert_eq!(left.passengers.len(), 1);
        assert!(seats_balanced(&left));

        assert_eq!(
            f.notifier.names_for(&Endpoint::User("usr-second".into())).await,
            vec!["shared-ride-updated", "shared-ride-joined", "shared-ride-left"]
        );
        assert_eq!(
            f.notifier.names_for(&Endpoint::User("usr-rider".into())).await,
            vec!["shared-ride-updated", "passenger-left"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_never_overbook() {
        let f = standard().await;
        for n in 0..10 {
            f.rider(&format!("usr-joiner-{n}"), RewardsTier::Bronze, 0).await;
        }
        let ride = f.shared_ride(Some(4)).await;

        let mut handles = Vec::new();
        for n in 0..10 {
            let rides = f.rides.clone();
            let ride_id = ride.id.clone();
            handles.push(tokio::spawn(async move {
                rides.join_shared_ride(&format!("usr-joiner-{n}"), &ride_id).await.is_ok()
            }));
        }
        let mut joined = 0;
        for handle in handles {
            if handle.await.unwrap() {
                joined += 1;
            }
        }
        assert_eq!(joined, 3);

        let stored = f.ledger.require_ride(&ride.id).await.unwrap();
        assert_eq!(stored.available_seats, 0);
        assert_eq!(stored.passengers.len(), 4);
        assert!(seats_balanced(&stored));
    }

    #[tokio::test]
    async fn shared_rides_need_multi_seat_vehicles() {
        let f = standard().await;
        let err = f
            .rides
            .create_shared_ride(
                "usr-rider",
                CreateSharedRideRequest {
                    pickup: SHARED_PICKUP.into(),
                    destination: SHARED_DROP.into(),
                    vehicle_class: VehicleClass::Bike,
                    max_seats: Some(2),
                    discount_factor: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RideError::ValidationFailed(_)));

        let clamped = f.shared_ride(Some(9)).await;
        assert_eq!(clamped.max_seats, MAX_SHARED_SEATS);
    }

    #[tokio::test]
    async fn solo_and_shared_operations_do_not_mix() {
        let f = standard().await;
        let shared = f.shared_ride(None).await;
        let err = f.rides.confirm_ride("usr-cap", &shared.id).await.unwrap_err();
        assert!(matches!(err, RideError::ValidationFailed(_)));
        f.rides.confirm_shared_ride("usr-cap", &shared.id).await.unwrap();
        f.rides
            .start_shared_ride("usr-cap", &shared.id, &shared.otp)
            .await
            .unwrap();
        let done = f.rides.end_shared_ride("usr-cap", &shared.id).await.unwrap().value;
        assert_eq!(done.settlement.totals.total_fare, 100);
        assert_eq!(
            f.notifier.names_for(&Endpoint::User("usr-rider".into())).await.last(),
            Some(&"shared-ride-ended")
        );
    }

    #[tokio::test]
    async fn captain_cancel_requeues_and_rebroadcasts() {
        let f = standard().await;
        f.captain("usr-cap-2", VehicleClass::Car, false).await;
        let ride = f.solo_ride().await;
        f.rides.confirm_ride("usr-cap", &ride.id).await.unwrap();
        f.notifier.clear().await;

        let err = f.rides.cancel_ride_by_captain("usr-cap-2", &ride.id).await.unwrap_err();
        assert!(matches!(err, RideError::Forbidden(_)));

        let requeued = f.rides.cancel_ride_by_captain("usr-cap", &ride.id).await.unwrap().value;
        assert_eq!(requeued.status, RideStatus::Pending);
        assert!(requeued.captain_id.is_none());
        assert_eq!(requeued.otp, ride.otp);

        assert_eq!(
            f.notifier.names_for(&Endpoint::User("usr-rider".into())).await,
            vec!["ride-status-updated", "ride-requeued"]
        );
        assert_eq!(
            f.notifier.names_for(&Endpoint::Captain("usr-cap-2".into())).await,
            vec!["new-ride"]
        );
        assert_eq!(f.rides.pending_rides(VehicleClass::Car).await.unwrap().len(), 1);

        f.rides.confirm_ride("usr-cap-2", &ride.id).await.unwrap();
        assert_eq!(f.rides.captain_stats("usr-cap").await.unwrap().total_rides, 0);
        assert_eq!(f.rides.captain_stats("usr-cap-2").await.unwrap().total_rides, 1);
    }

    #[tokio::test]
    async fn rating_rules_and_captain_aggregate() {
        let f = standard().await;
        let ride = f.ongoing_ride().await;

        let early = f.rides.rate_ride("usr-rider", &ride.id, 5, None).await.unwrap_err();
        assert!(matches!(early, RideError::WrongState { .. }));

        f.rides.end_ride("usr-cap", &ride.id).await.unwrap();
        let rated = f
            .rides
            .rate_ride("usr-rider", &ride.id, 4, Some("smooth".into()))
            .await
            .unwrap()
            .value;
        assert_eq!(rated.rating, Some(4));

        let twice = f.rides.rate_ride("usr-rider", &ride.id, 5, None).await.unwrap_err();
        assert!(matches!(twice, RideError::AlreadyRated(_)));

        let cap = f.ledger.require_user("usr-cap").await.unwrap().captain.unwrap();
        assert_eq!(cap.rating, 4.0);
        let stats = f.rides.captain_stats("usr-cap").await.unwrap();
        assert_eq!(stats.total_rides, 1);
        assert_eq!(stats.ratings_count, 1);
        assert_eq!(stats.earnings_today, 120);
    }

    #[tokio::test]
    async fn fare_quote_lists_every_class() {
        let f = standard().await;
        let quote = f.rides.fare_quote(PICKUP, DROP).await.unwrap();
        assert_eq!(quote.fares[&VehicleClass::Car], 120);
        assert_eq!(quote.fares.len(), 5);
    }

    #[tokio::test]
    async fn unknown_ride_is_not_found() {
        let f = standard().await;
        let err = f.rides.confirm_ride("usr-cap", "rid-000000-missing").await.unwrap_err();
        assert!(matches!(err, RideError::RideNotFound(_)));
    }
}
