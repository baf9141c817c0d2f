// src/state.rs
use std::str::FromStr;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{RideError, RideResult},
    services::{
        dispatch_service::{DEFAULT_SEARCH_RADIUS_KM, DispatchService},
        driver_service::DriverService,
        fare_service::FareService,
        geo_service::{GeoProvider, GoogleMapsConfig, GoogleMapsGeoProvider, StaticGeoProvider},
        ledger_service::{LedgerConfig, LedgerService},
        messaging_service::ChannelNotifier,
        rewards_service::RewardsService,
        ride_service::RideService,
        settlement_service::{DEFAULT_COMPANY_FEE_RATE, SettlementService},
        user_service::UserService,
    },
};

pub struct AppState {
    pub user_service: Arc<UserService>,
    pub driver_service: Arc<DriverService>,
    pub ride_service: Arc<RideService>,
    pub notifier: Arc<ChannelNotifier>,
    pub config: AppConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub google_maps_api_key: Option<String>,
    pub search_radius_km: f64,
    pub company_fee_rate: f64,
    pub event_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            redis_url: None,
            google_maps_api_key: None,
            search_radius_km: DEFAULT_SEARCH_RADIUS_KM,
            company_fee_rate: DEFAULT_COMPANY_FEE_RATE,
            event_channel_capacity: 64,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> RideResult<T> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RideError::InvalidConfiguration(format!("{} has invalid value '{}'", name, raw))),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> RideResult<Self> {
        let defaults = Self::default();
        let config = Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| defaults.bind_addr.clone()),
            redis_url: optional_var("REDIS_URL"),
            google_maps_api_key: optional_var("GOOGLE_MAPS_API_KEY"),
            search_radius_km: parse_var("SEARCH_RADIUS_KM", defaults.search_radius_km)?,
            company_fee_rate: parse_var("COMPANY_FEE_RATE", defaults.company_fee_rate)?,
            event_channel_capacity: parse_var("EVENT_CHANNEL_CAPACITY", defaults.event_channel_capacity)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RideResult<()> {
        if !(self.search_radius_km.is_finite() && self.search_radius_km > 0.0) {
            return Err(RideError::InvalidConfiguration(
                "SEARCH_RADIUS_KM must be a positive number".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.company_fee_rate) {
            return Err(RideError::InvalidConfiguration(
                "COMPANY_FEE_RATE must be in [0, 1)".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(RideError::InvalidConfiguration(
                "EVENT_CHANNEL_CAPACITY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl AppState {
    pub async fn new(config: AppConfig) -> RideResult<Self> {
        let ledger = Arc::new(
            LedgerService::new(LedgerConfig {
                redis_url: config.redis_url.clone(),
                ..Default::default()
            })
            .await?,
        );
        let notifier = Arc::new(ChannelNotifier::new(config.event_channel_capacity));

        let geo: Arc<dyn GeoProvider> = match &config.google_maps_api_key {
            Some(api_key) => Arc::new(GoogleMapsGeoProvider::new(GoogleMapsConfig::new(api_key.clone()))),
            None => {
                tracing::warn!("GOOGLE_MAPS_API_KEY not set, using static geo provider");
                Arc::new(StaticGeoProvider::new())
            }
        };

        let driver_service = Arc::new(DriverService::new(ledger.clone(), notifier.clone()));
        driver_service.restore().await?;
        let user_service = Arc::new(UserService::new(ledger.clone(), driver_service.clone()));
        let dispatch = Arc::new(DispatchService::new(
            ledger.clone(),
            driver_service.clone(),
            notifier.clone(),
            config.search_radius_km,
        ));
        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            notifier.clone(),
            config.company_fee_rate,
        ));
        let rewards = Arc::new(RewardsService::new(ledger.clone()));
        let ride_service = Arc::new(RideService::new(
            ledger,
            geo,
            notifier.clone(),
            FareService::default(),
            dispatch,
            settlement,
            rewards,
        ));

        Ok(Self {
            user_service,
            driver_service,
            ride_service,
            notifier,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::user_service::UserOperations;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.event_channel_capacity, 64);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let config = AppConfig {
            company_fee_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RideError::InvalidConfiguration(_))));

        let config = AppConfig {
            search_radius_km: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RideError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn state_wires_in_memory_without_redis() {
        let state = AppState::new(AppConfig::default()).await.unwrap();
        assert!(state.config.redis_url.is_none());
        let missing = state.user_service.get_user("usr-000000-abcd1234").await.unwrap();
        assert!(missing.is_none());
    }
}
