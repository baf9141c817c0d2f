// src/services/settlement_service.rs
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{RideError, RideResult, SideEffectFailure},
    models::{
        driver::CaptainStats,
        events::{EarningsPayload, EcoStatsPayload, RideEvent},
        ride::Ride,
        user::RewardsTier,
    },
    services::{
        ledger_service::LedgerService,
        messaging_service::{Endpoint, Notifier},
    },
};

pub const DEFAULT_COMPANY_FEE_RATE: f64 = 0.02;

// Accrual rates in basis points of the fare.
const RIDER_ECO_RATE_BP: u64 = 1000;
const RIDER_STANDARD_RATE_BP: u64 = 300;
const CAPTAIN_ECO_RATE_BP: u64 = 500;
const CAPTAIN_STANDARD_RATE_BP: u64 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SettlementTotals {
    pub total_fare: u64,
    pub company_fee: u64,
    pub driver_earnings: u64,
    pub paid_online: bool,
}

impl SettlementTotals {
    pub fn for_ride(ride: &Ride, fee_rate: f64) -> Self {
        let total_fare = ride.total_fare();
        let paid_online = ride.is_paid_online();
        let company_fee = if paid_online {
            (total_fare as f64 * fee_rate).round() as u64
        } else {
            0
        };
        Self {
            total_fare,
            company_fee,
            driver_earnings: total_fare.saturating_sub(company_fee),
            paid_online,
        }
    }
}

/// floor(fare * rate * tier multiplier), where rate depends on the captain's vehicle.
pub fn rider_points(fare: u64, eco: bool, tier: RewardsTier) -> u64 {
    let rate_bp = if eco { RIDER_ECO_RATE_BP } else { RIDER_STANDARD_RATE_BP };
    let multiplier_pct = (tier.points_multiplier() * 100.0).round() as u64;
    fare * rate_bp * multiplier_pct / 1_000_000
}

pub fn captain_points(fare: u64, eco: bool) -> u64 {
    let rate_bp = if eco { CAPTAIN_ECO_RATE_BP } else { CAPTAIN_STANDARD_RATE_BP };
    fare * rate_bp / 10_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsAward {
    pub user_id: String,
    pub points: u64,
}

/// What one credit pass achieved. Failed steps are listed, not raised.
#[derive(Debug, Default, Serialize)]
pub struct CreditReport {
    pub earnings_today: Option<u64>,
    pub captain_points: u64,
    pub rider_points: Vec<PointsAward>,
    #[serde(skip)]
    pub failures: Vec<SideEffectFailure>,
}

#[derive(Debug, Default, Serialize)]
pub struct SettlementReport {
    pub totals: SettlementTotals,
    pub earnings_credited: bool,
    pub captain_points: u64,
    pub rider_points: Vec<PointsAward>,
    pub eco_updated: bool,
    #[serde(skip)]
    pub failures: Vec<SideEffectFailure>,
}

/// Fee, earnings, loyalty and eco bookkeeping around ride completion and payment.
pub struct SettlementService {
    ledger: Arc<LedgerService>,
    notifier: Arc<dyn Notifier>,
    fee_rate: f64,
}

impl SettlementService {
    pub fn new(ledger: Arc<LedgerService>, notifier: Arc<dyn Notifier>, fee_rate: f64) -> Self {
        Self { ledger, notifier, fee_rate }
    }

    pub fn totals(&self, ride: &Ride) -> SettlementTotals {
        SettlementTotals::for_ride(ride, self.fee_rate)
    }

    async fn notify(&self, endpoint: Endpoint, event: RideEvent, failures: &mut Vec<SideEffectFailure>) {
        if let Err(e) = self.notifier.publish(&endpoint, &event).await {
            tracing::warn!("Failed to push {} to {}: {}", event.name(), endpoint, e);
            failures.push(SideEffectFailure::new(format!("notify:{}:{}", event.name(), endpoint), e));
        }
    }

    async fn captain_is_eco(&self, captain_id: &str) -> RideResult<bool> {
        let user = self.ledger.require_user(captain_id).await?;
        user.captain
            .map(|c| c.vehicle.eco_friendly)
            .ok_or_else(|| RideError::forbidden(format!("{} is not a captain", captain_id)))
    }

    /// Each rider's fare base for point accrual.
    fn rider_shares(ride: &Ride) -> Vec<(String, u64)> {
        if !ride.is_shared {
            return vec![(ride.user_id.clone(), ride.total_fare())];
        }
        let mut shares: Vec<(String, u64)> = Vec::with_capacity(ride.passengers.len());
        for passenger in &ride.passengers {
            if shares.iter().any(|(id, _)| id == &passenger.user_id) {
                continue;
            }
            let fare = if passenger.fare > 0 { passenger.fare } else { ride.fare_per_passenger };
            shares.push((passenger.user_id.clone(), fare));
        }
        shares
    }

    /// Credit the captain's day earnings and everyone's points. Callers must hold the ride's
    /// `earnings_credited` claim so this runs once per ride.
    pub async fn credit(&self, ride: &Ride) -> CreditReport {
        let mut report = CreditReport::default();
        let Some(captain_id) = ride.captain_id.clone() else {
            report
                .failures
                .push(SideEffectFailure::new("credit-earnings", "ride has no captain"));
            return report;
        };

        let eco = match self.captain_is_eco(&captain_id).await {
            Ok(eco) => eco,
            Err(e) => {
                tracing::warn!("Skipping credit for ride {}: {}", ride.id, e);
                report.failures.push(SideEffectFailure::new("credit-earnings", e));
                return report;
            }
        };

        let total_fare = ride.total_fare();
        let cpts = captain_points(total_fare, eco);
        let now = Utc::now();

        let credited = self
            .ledger
            .update_user(&captain_id, |user| {
                let captain = user
                    .captain
                    .as_mut()
                    .ok_or_else(|| RideError::forbidden("Only captains earn"))?;
                captain.credit_earnings(total_fare, now);
                captain.rewards_points += cpts;
                user.updated_at = now;
                Ok(())
            })
            .await;

        match credited {
            Ok(user) => {
                if let Some(captain) = user.captain {
                    tracing::info!(
                        "Credited {} to captain {} for ride {} (today: {})",
                        total_fare,
                        captain_id,
                        ride.id,
                        captain.earnings_today
                    );
                    report.earnings_today = Some(captain.earnings_today);
                    report.captain_points = cpts;
                    let event = RideEvent::EarningsUpdated(EarningsPayload {
                        earnings_today: captain.earnings_today,
                        earnings_last_reset: captain.earnings_last_reset,
                    });
                    self.notify(Endpoint::Captain(captain_id.clone()), event, &mut report.failures)
                        .await;
                }
            }
            Err(e) => {
                tracing::warn!("Earnings credit for ride {} failed: {}", ride.id, e);
                report.failures.push(SideEffectFailure::new("credit-earnings", e));
            }
        }

        for (rider_id, fare) in Self::rider_shares(ride) {
            let mut awarded = 0;
            let result = self
                .ledger
                .update_user(&rider_id, |user| {
                    awarded = rider_points(fare, eco, user.rewards_tier);
                    user.rewards_points += awarded;
                    user.updated_at = now;
                    Ok(())
                })
                .await;
            match result {
                Ok(_) => report.rider_points.push(PointsAward { user_id: rider_id, points: awarded }),
                Err(e) => {
                    tracing::warn!("Point accrual for rider {} failed: {}", rider_id, e);
                    report.failures.push(SideEffectFailure::new("rider-points", e));
                }
            }
        }

        report
    }

    /// Eco gamification for the requester of a solo ride with an eco vehicle.
    pub async fn record_eco_ride(&self, ride: &Ride) -> RideResult<Option<EcoStatsPayload>> {
        if ride.is_shared {
            return Ok(None);
        }
        let Some(captain_id) = ride.captain_id.as_deref() else {
            return Ok(None);
        };
        if !self.captain_is_eco(captain_id).await? {
            return Ok(None);
        }

        let now = Utc::now();
        let distance = ride.distance_meters;
        let user = self
            .ledger
            .update_user(&ride.user_id, |user| {
                user.eco.record_eco_ride(distance, now);
                user.updated_at = now;
                Ok(())
            })
            .await?;

        Ok(Some(EcoStatsPayload {
            eco_streak: user.eco.streak,
            last_eco_ride_at: user.eco.last_eco_ride_at,
            total_eco_rides: user.eco.total_eco_rides,
            co2_saved_kg: user.eco.co2_saved_kg,
            badges: user.eco.badges,
        }))
    }

    /// Aggregates over every ride the captain holds, with the day counter rolled if stale.
    pub async fn captain_stats(&self, captain_id: &str) -> RideResult<CaptainStats> {
        let now = Utc::now();
        let user = self
            .ledger
            .update_user(captain_id, |user| {
                let captain = user
                    .captain
                    .as_mut()
                    .ok_or_else(|| RideError::forbidden("Only captains have stats"))?;
                captain.roll_earnings_day(now);
                Ok(())
            })
            .await?;

        let mut stats = CaptainStats::default();
        let mut rating_sum = 0u64;
        for ride_id in self.ledger.captain_ride_ids(captain_id).await? {
            let Some(ride) = self.ledger.get_ride(&ride_id).await? else {
                continue;
            };
            if !ride.is_assigned_to(captain_id) {
                continue;
            }
            stats.total_rides += 1;
            stats.total_distance_meters += ride.distance_meters;
            if let Some(rating) = ride.rating {
                rating_sum += u64::from(rating);
                stats.ratings_count += 1;
            }
        }
        stats.total_distance_km = stats.total_distance_meters as f64 / 1000.0;
        if stats.ratings_count > 0 {
            stats.efficiency_score = rating_sum as f64 / f64::from(stats.ratings_count);
        }
        if let Some(captain) = user.captain {
            stats.earnings_today = captain.earnings_today;
            stats.earnings_last_reset = Some(captain.earnings_last_reset);
        }
        Ok(stats)
    }

    /// Store the captain's aggregate rating from completed-ride ratings.
    pub async fn refresh_captain_rating(&self, captain_id: &str) -> RideResult<CaptainStats> {
        let stats = self.captain_stats(captain_id).await?;
        let (rating, count) = (stats.efficiency_score, stats.ratings_count);
        self.ledger
            .update_user(captain_id, |user| {
                if let Some(captain) = user.captain.as_mut() {
                    captain.rating = rating;
                    captain.ratings_count = count;
                }
                Ok(())
            })
            .await?;
        Ok(stats)
    }

    pub async fn push_captain_stats(&self, captain_id: &str, stats: RideResult<CaptainStats>) -> Vec<SideEffectFailure> {
        let mut failures = Vec::new();
        match stats {
            Ok(stats) => {
                self.notify(
                    Endpoint::Captain(captain_id.to_string()),
                    RideEvent::CaptainStatsUpdated(stats),
                    &mut failures,
                )
                .await
            }
            Err(e) => {
                tracing::warn!("Could not compute stats for captain {}: {}", captain_id, e);
                failures.push(SideEffectFailure::new("captain-stats", e));
            }
        }
        failures
    }

    /// Everything that follows a committed completion. `credit` is true when this
    /// completion won the ride's earnings claim.
    pub async fn settle_completed(&self, ride: &Ride, credit: bool) -> SettlementReport {
        let mut report = SettlementReport {
            totals: self.totals(ride),
            ..Default::default()
        };

        if credit {
            let credit_report = self.credit(ride).await;
            report.earnings_credited = credit_report.earnings_today.is_some();
            report.captain_points = credit_report.captain_points;
            report.rider_points = credit_report.rider_points;
            report.failures.extend(credit_report.failures);
        }

        match self.record_eco_ride(ride).await {
            Ok(Some(payload)) => {
                report.eco_updated = true;
                self.notify(
                    Endpoint::User(ride.user_id.clone()),
                    RideEvent::EcoStatsUpdated(payload),
                    &mut report.failures,
                )
                .await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Eco update for ride {} failed: {}", ride.id, e);
                report.failures.push(SideEffectFailure::new("eco-stats", e));
            }
        }

        if let Some(captain_id) = ride.captain_id.as_deref() {
            let stats = self.captain_stats(captain_id).await;
            report.failures.extend(self.push_captain_stats(captain_id, stats).await);
        }

        report
    }
}
