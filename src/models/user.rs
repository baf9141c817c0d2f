// src/models/user.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::driver::{CaptainProfile, Vehicle};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Captain,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RewardsTier {
    #[default]
    Bronze,
    Silver,
    Gold,
}

impl RewardsTier {
    /// Multiplier applied to loyalty points earned on a ride.
    pub fn points_multiplier(&self) -> f64 {
        match self {
            RewardsTier::Bronze => 1.0,
            RewardsTier::Silver => 1.1,
            RewardsTier::Gold => 1.2,
        }
    }

    /// Share of the fare a rider may cover with points.
    pub fn discount_percent(&self) -> f64 {
        match self {
            RewardsTier::Bronze => 0.05,
            RewardsTier::Silver => 0.07,
            RewardsTier::Gold => 0.10,
        }
    }
}

pub const CO2_KG_PER_KM: f64 = 0.12;

/// Eco gamification counters kept on the rider profile.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct EcoStats {
    pub streak: u32,
    pub last_eco_ride_at: Option<DateTime<Utc>>,
    pub total_eco_rides: u32,
    pub co2_saved_kg: f64,
    pub badges: BTreeSet<String>,
}

impl EcoStats {
    /// Record one eco ride of `distance_meters` finished at `now`.
    pub fn record_eco_ride(&mut self, distance_meters: u64, now: DateTime<Utc>) {
        self.streak = match self.last_eco_ride_at {
            None => 1,
            Some(last) => {
                let gap = (now.date_naive() - last.date_naive()).num_days();
                match gap {
                    0 => self.streak.max(1),
                    1 => self.streak + 1,
                    _ => 1,
                }
            }
        };
        self.last_eco_ride_at = Some(now);
        self.total_eco_rides += 1;

        let km = distance_meters as f64 / 1000.0;
        let delta = (km * CO2_KG_PER_KM * 100.0).round() / 100.0;
        self.co2_saved_kg = ((self.co2_saved_kg + delta.max(0.0)) * 100.0).round() / 100.0;

        for (threshold, badge) in [(5, "Leaf-1"), (20, "Leaf-2"), (50, "Leaf-3")] {
            if self.total_eco_rides >= threshold {
                self.badges.insert(badge.to_string());
            }
        }
        for (threshold, badge) in [(7, "Streak-7"), (30, "Streak-30")] {
            if self.streak >= threshold {
                self.badges.insert(badge.to_string());
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub role: Role,
    pub rewards_points: u64,
    pub rewards_tier: RewardsTier,
    #[serde(default)]
    pub eco: EcoStats,
    pub captain: Option<CaptainProfile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_captain(&self) -> bool {
        self.role == Role::Captain && self.captain.is_some()
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize)]
pub struct RiderRegistration {
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub rewards_tier: RewardsTier,
    #[serde(default)]
    pub rewards_points: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptainRegistration {
    pub name: String,
    pub phone_number: String,
    pub vehicle: Vehicle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn first_eco_ride_starts_streak() {
        let mut eco = EcoStats::default();
        eco.record_eco_ride(5000, at(1, 9));
        assert_eq!(eco.streak, 1);
        assert_eq!(eco.total_eco_rides, 1);
        assert_eq!(eco.co2_saved_kg, 0.6);
    }

    #[test]
    fn streak_follows_calendar_days() {
        let mut eco = EcoStats::default();
        eco.record_eco_ride(1000, at(1, 23));
        eco.record_eco_ride(1000, at(2, 1));
        assert_eq!(eco.streak, 2);
        eco.record_eco_ride(1000, at(2, 18));
        assert_eq!(eco.streak, 2, "same day keeps the streak");
        eco.record_eco_ride(1000, at(5, 8));
        assert_eq!(eco.streak, 1, "a gap resets the streak");
        assert_eq!(eco.total_eco_rides, 4);
    }

    #[test]
    fn badges_unlock_at_thresholds() {
        let mut eco = EcoStats::default();
        for day in 1..=7 {
            eco.record_eco_ride(2500, at(day, 10));
        }
        assert!(eco.badges.contains("Leaf-1"));
        assert!(eco.badges.contains("Streak-7"));
        assert!(!eco.badges.contains("Leaf-2"));
        assert!(!eco.badges.contains("Streak-30"));
        assert_eq!(eco.co2_saved_kg, 2.1);
    }

    #[test]
    fn tier_tables() {
        assert_eq!(RewardsTier::default(), RewardsTier::Bronze);
        assert_eq!(RewardsTier::Gold.points_multiplier(), 1.2);
        assert_eq!(RewardsTier::Silver.discount_percent(), 0.07);
    }
}
