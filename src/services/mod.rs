// src/services/mod.rs
pub mod dispatch_service;
pub mod driver_service;
pub mod fare_service;
pub mod geo_service;
pub mod ledger_service;
pub mod messaging_service;
pub mod rewards_service;
pub mod ride_service;
pub mod settlement_service;
pub mod user_service;

pub use dispatch_service::DispatchService;
pub use driver_service::{DriverOperations, DriverService};
pub use fare_service::FareService;
pub use geo_service::{GeoProvider, GoogleMapsGeoProvider, StaticGeoProvider};
pub use ledger_service::{LedgerConfig, LedgerService};
pub use messaging_service::{ChannelNotifier, Endpoint, Notifier};
pub use rewards_service::RewardsService;
pub use ride_service::{RideOperations, RideService};
pub use settlement_service::SettlementService;
pub use user_service::{UserOperations, UserService};
