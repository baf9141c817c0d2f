// src/services/rewards_service.rs
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing;

use crate::{
    errors::{RideError, RideResult},
    models::user::RewardsTier,
    services::ledger_service::LedgerService,
};

/// Most a single ride can be discounted, in currency units (1 point == 1 unit).
pub const PER_RIDE_CAP: u64 = 50;

pub fn max_discount(fare: u64, tier: RewardsTier, available_points: u64) -> u64 {
    let percent = (tier.discount_percent() * 100.0).round() as u64;
    (fare * percent / 100).min(PER_RIDE_CAP).min(available_points)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardsQuote {
    pub ride_id: String,
    pub fare: u64,
    pub tier: RewardsTier,
    pub max_percent: f64,
    pub per_ride_cap: u64,
    pub available_points: u64,
    pub discount_amount: u64,
    pub points_to_use: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemReceipt {
    pub ride_id: String,
    pub points: u64,
    pub discount_amount: u64,
    pub fare: u64,
    pub remaining_points: u64,
}

pub struct RewardsService {
    ledger: Arc<LedgerService>,
}

impl RewardsService {
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }

    pub async fn quote(&self, user_id: &str, ride_id: &str) -> RideResult<RewardsQuote> {
        let ride = self.ledger.require_ride(ride_id).await?;
        if ride.user_id != user_id {
            return Err(RideError::forbidden("Only the ride owner can ask for a rewards quote"));
        }
        let user = self.ledger.require_user(&ride.user_id).await?;
        let discount = if ride.discount_points_used > 0 {
            0
        } else {
            max_discount(ride.fare, user.rewards_tier, user.rewards_points)
        };

        Ok(RewardsQuote {
            ride_id: ride.id,
            fare: ride.fare,
            tier: user.rewards_tier,
            max_percent: user.rewards_tier.discount_percent(),
            per_ride_cap: PER_RIDE_CAP,
            available_points: user.rewards_points,
            discount_amount: discount,
            points_to_use: discount,
        })
    }

    /// Redeem points against a ride's fare, once. The amount is clamped to the tier and
    /// per-ride caps; only the clamped amount leaves the balance, and it is refunded if the
    /// ride cannot take the discount.
    pub async fn redeem(&self, user_id: &str, ride_id: &str, points: u64) -> RideResult<RedeemReceipt> {
        if points == 0 {
            return Err(RideError::validation_error("points", "Points must be positive"));
        }
        let ride = self.ledger.require_ride(ride_id).await?;
        ride.ensure_redeemable(user_id)?;

        let now = Utc::now();
        let fare = ride.fare;
        let mut used = 0;
        let user = self
            .ledger
            .update_user(user_id, |user| {
                if user.rewards_points < points {
                    return Err(RideError::InsufficientPoints {
                        requested: points,
                        available: user.rewards_points,
                    });
                }
                used = points.min(max_discount(fare, user.rewards_tier, user.rewards_points));
                user.rewards_points -= used;
                if used > 0 {
                    user.updated_at = now;
                }
                Ok(())
            })
            .await?;
        if used == 0 {
            return Err(RideError::validation_error("points", "No rewards discount is available on this fare"));
        }

        let ride = match self
            .ledger
            .update_ride(ride_id, |ride| ride.apply_rewards_discount(user_id, used, now))
            .await
        {
            Ok(ride) => ride,
            Err(e) => {
                if let Err(refund_err) = self.refund(user_id, used).await {
                    tracing::error!("Could not refund {} points to {}: {}", used, user_id, refund_err);
                }
                return Err(e);
            }
        };

        tracing::info!("User {} redeemed {} points on ride {} (fare now {})", user_id, used, ride.id, ride.fare);
        Ok(RedeemReceipt {
            ride_id: ride.id,
            points: used,
            discount_amount: ride.discount_amount,
            fare: ride.fare,
            remaining_points: user.rewards_points,
        })
    }

    /// Atomically take up to `requested` points off the rider for a ride about to be created.
    /// Returns the points actually used, which is also the discount.
    pub async fn reserve_for_new_ride(&self, user_id: &str, fare: u64, requested: u64) -> RideResult<u64> {
        if requested == 0 {
            return Ok(0);
        }
        let now = Utc::now();
        let mut used = 0;
        self.ledger
            .update_user(user_id, |user| {
                used = requested.min(max_discount(fare, user.rewards_tier, user.rewards_points));
                user.rewards_points -= used;
                if used > 0 {
                    user.updated_at = now;
                }
                Ok(())
            })
            .await?;
        if used > 0 {
            tracing::debug!("Reserved {} points from {} against fare {}", used, user_id, fare);
        }
        Ok(used)
    }

    /// Give back points reserved for a ride that was never stored.
    pub async fn refund(&self, user_id: &str, points: u64) -> RideResult<()> {
        if points == 0 {
            return Ok(());
        }
        self.ledger
            .update_user(user_id, |user| {
                user.rewards_points += points;
                Ok(())
            })
            .await?;
        tracing::warn!("Refunded {} points to {}", points, user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        driver::VehicleClass,
        ride::tests::pending_ride,
        user::Role,
    };
    use crate::services::driver_service::tests::captain;

    async fn setup(tier: RewardsTier, points: u64) -> (RewardsService, Arc<LedgerService>) {
        let ledger = Arc::new(LedgerService::new_memory());
        let mut rider = captain("usr-rider", VehicleClass::Car, false);
        rider.role = Role::Rider;
        rider.captain = None;
        rider.rewards_tier = tier;
        rider.rewards_points = points;
        ledger.insert_user(&rider).await.unwrap();
        let mut ride = pending_ride(false);
        ride.fare = 400;
        ledger.insert_ride(&ride).await.unwrap();
        (RewardsService::new(ledger.clone()), ledger)
    }

    #[test]
    fn discount_is_the_smallest_cap() {
        assert_eq!(max_discount(400, RewardsTier::Bronze, 1000), 20);
        assert_eq!(max_discount(400, RewardsTier::Silver, 1000), 28);
        assert_eq!(max_discount(1000, RewardsTier::Gold, 1000), 50);
        assert_eq!(max_discount(400, RewardsTier::Gold, 12), 12);
        assert_eq!(max_discount(19, RewardsTier::Bronze, 100), 0);
    }

    #[tokio::test]
    async fn quote_uses_owner_tier_and_balance() {
        let (rewards, _) = setup(RewardsTier::Gold, 30).await;
        let quote = rewards.quote("usr-rider", "rid-250101-abc12").await.unwrap();
        assert_eq!(quote.fare, 400);
        assert_eq!(quote.discount_amount, 30);
        assert_eq!(quote.max_percent, 0.10);
        assert!(matches!(
            rewards.quote("usr-other", "rid-250101-abc12").await,
            Err(RideError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn redeem_checks_balance() {
        let (rewards, ledger) = setup(RewardsTier::Bronze, 40).await;
        let err = rewards.redeem("usr-rider", "rid-250101-abc12", 41).await.unwrap_err();
        assert!(matches!(err, RideError::InsufficientPoints { requested: 41, available: 40 }));
        assert_eq!(ledger.require_user("usr-rider").await.unwrap().rewards_points, 40);

        let receipt = rewards.redeem("usr-rider", "rid-250101-abc12", 15).await.unwrap();
        assert_eq!(receipt.points, 15);
        assert_eq!(receipt.fare, 385);
        assert_eq!(receipt.remaining_points, 25);
    }

    #[tokio::test]
    async fn redeem_is_capped_and_recorded_once() {
        let (rewards, ledger) = setup(RewardsTier::Gold, 100).await;
        ledger
            .update_ride("rid-250101-abc12", |ride| {
                ride.fare = 120;
                Ok(())
            })
            .await
            .unwrap();

        let receipt = rewards.redeem("usr-rider", "rid-250101-abc12", 40).await.unwrap();
        assert_eq!(receipt.points, 12, "gold takes at most 10% of 120");
        assert_eq!(receipt.remaining_points, 88);

        let ride = ledger.require_ride("rid-250101-abc12").await.unwrap();
        assert_eq!(ride.fare, 108);
        assert_eq!(ride.discount_amount, 12);
        assert_eq!(ride.discount_points_used, 12);

        let again = rewards.redeem("usr-rider", "rid-250101-abc12", 40).await.unwrap_err();
        assert!(matches!(again, RideError::ValidationFailed(_)));
        assert_eq!(ledger.require_user("usr-rider").await.unwrap().rewards_points, 88);
        assert_eq!(ledger.require_ride("rid-250101-abc12").await.unwrap().fare, 108);

        let quote = rewards.quote("usr-rider", "rid-250101-abc12").await.unwrap();
        assert_eq!(quote.discount_amount, 0);
    }

    #[tokio::test]
    async fn redeem_needs_an_open_ride() {
        let (rewards, ledger) = setup(RewardsTier::Gold, 100).await;
        ledger
            .update_ride("rid-250101-abc12", |ride| {
                ride.status = crate::models::ride::RideStatus::Completed;
                Ok(())
            })
            .await
            .unwrap();
        let err = rewards.redeem("usr-rider", "rid-250101-abc12", 10).await.unwrap_err();
        assert!(matches!(err, RideError::WrongState { .. }));
        assert_eq!(ledger.require_user("usr-rider").await.unwrap().rewards_points, 100);
    }

    #[tokio::test]
    async fn reservation_is_capped_and_refundable() {
        let (rewards, ledger) = setup(RewardsTier::Silver, 100).await;
        let used = rewards.reserve_for_new_ride("usr-rider", 400, 80).await.unwrap();
        assert_eq!(used, 28);
        assert_eq!(ledger.require_user("usr-rider").await.unwrap().rewards_points, 72);

        rewards.refund("usr-rider", used).await.unwrap();
        assert_eq!(ledger.require_user("usr-rider").await.unwrap().rewards_points, 100);
    }
}
