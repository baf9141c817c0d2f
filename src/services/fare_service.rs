// src/services/fare_service.rs
use std::collections::BTreeMap;

use crate::models::driver::VehicleClass;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub base: f64,
    pub per_km: f64,
    pub per_minute: f64,
}

/// Base/per-km/per-minute table keyed by vehicle class.
#[derive(Debug, Clone)]
pub struct RateCard {
    rates: BTreeMap<VehicleClass, Rate>,
}

impl Default for RateCard {
    fn default() -> Self {
        let rate = |base, per_km, per_minute| Rate { base, per_km, per_minute };
        let rates = BTreeMap::from([
            (VehicleClass::EvBike, rate(15.0, 4.0, 1.0)),
            (VehicleClass::EvCar, rate(30.0, 7.0, 2.0)),
            (VehicleClass::Bike, rate(20.0, 5.0, 3.0)),
            (VehicleClass::Car, rate(35.0, 9.0, 4.0)),
            (VehicleClass::Auto, rate(15.0, 6.0, 3.0)),
        ]);
        Self { rates }
    }
}

impl RateCard {
    pub fn rate(&self, class: VehicleClass) -> Option<Rate> {
        self.rates.get(&class).copied()
    }
}

/// Pure pricing. No I/O, no state beyond the rate card.
#[derive(Debug, Clone, Default)]
pub struct FareService {
    card: RateCard,
}

impl FareService {
    pub fn new(card: RateCard) -> Self {
        Self { card }
    }

    /// round(base + km * per_km + minutes * per_minute)
    pub fn fare_for(&self, class: VehicleClass, distance_meters: u64, duration_seconds: u64) -> u64 {
        let Some(rate) = self.card.rate(class) else {
            return 0;
        };
        let km = distance_meters as f64 / 1000.0;
        let minutes = duration_seconds as f64 / 60.0;
        (rate.base + km * rate.per_km + minutes * rate.per_minute).round() as u64
    }

    /// Prices for every class in the card.
    pub fn quote(&self, distance_meters: u64, duration_seconds: u64) -> BTreeMap<VehicleClass, u64> {
        self.card
            .rates
            .keys()
            .map(|class| (*class, self.fare_for(*class, distance_meters, duration_seconds)))
            .collect()
    }

    /// Per-passenger price on a pooled ride.
    pub fn shared_fare(&self, solo_fare: u64, discount_factor: Option<f64>) -> u64 {
        (solo_fare as f64 * Self::normalize_discount(discount_factor)).round() as u64
    }

    /// Factors outside (0, 1] are ignored.
    pub fn normalize_discount(discount_factor: Option<f64>) -> f64 {
        match discount_factor {
            Some(f) if f > 0.0 && f <= 1.0 => f,
            _ => 1.0,
        }
    }
}
