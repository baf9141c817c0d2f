// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::RideError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    EvBike,
    EvCar,
    Bike,
    Car,
    Auto,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 5] = [
        VehicleClass::EvBike,
        VehicleClass::EvCar,
        VehicleClass::Bike,
        VehicleClass::Car,
        VehicleClass::Auto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::EvBike => "ev_bike",
            VehicleClass::EvCar => "ev_car",
            VehicleClass::Bike => "bike",
            VehicleClass::Car => "car",
            VehicleClass::Auto => "auto",
        }
    }

    /// Two-wheelers carry a single passenger and cannot be pooled.
    pub fn is_single_capacity(&self) -> bool {
        matches!(self, VehicleClass::EvBike | VehicleClass::Bike)
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = RideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VehicleClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s.trim())
            .ok_or_else(|| RideError::InvalidFieldValue {
                field: "vehicle_class".to_string(),
                value: s.to_string(),
                reason: "expected one of ev_bike, ev_car, bike, car, auto".to_string(),
            })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Vehicle {
    pub class: VehicleClass,
    pub plate_number: String,
    pub color: String,
    pub model: String,
    pub capacity: u8,
    pub eco_friendly: bool,
}

impl Vehicle {
    /// Plates are stored without spaces or hyphens, upper-cased.
    pub fn normalize_plate(plate: &str) -> String {
        plate
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect::<String>()
            .to_uppercase()
    }
}

/// Captain-only part of a user profile.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptainProfile {
    pub vehicle: Vehicle,
    pub location: Option<GeoPoint>,
    pub online: bool,
    pub earnings_today: u64,
    pub earnings_last_reset: DateTime<Utc>,
    pub rewards_points: u64,
    pub rating: f64,
    pub ratings_count: u32,
}

impl CaptainProfile {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            location: None,
            online: false,
            earnings_today: 0,
            earnings_last_reset: Utc::now(),
            rewards_points: 0,
            rating: 0.0,
            ratings_count: 0,
        }
    }

    /// Zero the day counter when the stored reset timestamp is from another calendar day.
    /// Returns true when a reset happened.
    pub fn roll_earnings_day(&mut self, now: DateTime<Utc>) -> bool {
        if self.earnings_last_reset.date_naive() != now.date_naive() {
            self.earnings_today = 0;
            self.earnings_last_reset = now;
            true
        } else {
            false
        }
    }

    pub fn credit_earnings(&mut self, amount: u64, now: DateTime<Utc>) {
        self.roll_earnings_day(now);
        self.earnings_today += amount;
    }
}

/// Read-mostly projection the directory keeps for radius queries.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverPosition {
    pub driver_id: String,
    pub class: VehicleClass,
    pub eco_friendly: bool,
    pub location: Option<GeoPoint>,
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

/// A driver that matched a radius query.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NearbyDriver {
    pub driver_id: String,
    pub class: VehicleClass,
    pub distance_km: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DriverLocationUpdate {
    pub driver_id: String,
    pub location: GeoPoint,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CaptainStats {
    pub total_rides: u32,
    pub total_distance_meters: u64,
    pub total_distance_km: f64,
    pub efficiency_score: f64,
    pub ratings_count: u32,
    pub earnings_today: u64,
    pub earnings_last_reset: Option<DateTime<Utc>>,
}
