// src/services/driver_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing;

use crate::{
    errors::{RideError, RideResult},
    models::{
        driver::{DriverLocationUpdate, DriverPosition, GeoPoint, NearbyDriver, VehicleClass},
        events::{CaptainLocationPayload, RideEvent},
        user::User,
    },
    services::{
        geo_service::haversine_km,
        ledger_service::LedgerService,
        messaging_service::{Endpoint, Notifier},
    },
};

#[async_trait]
pub trait DriverOperations: Send + Sync {
    /// Add or refresh a captain's projection from their profile.
    async fn register_driver(&self, user: &User) -> RideResult<DriverPosition>;
    async fn update_driver_location(&self, update: DriverLocationUpdate) -> RideResult<DriverPosition>;
    async fn set_online(&self, driver_id: &str, online: bool) -> RideResult<DriverPosition>;
    async fn get_position(&self, driver_id: &str) -> RideResult<Option<DriverPosition>>;
    /// Online drivers within `radius_km` great-circle distance of `center`, nearest first.
    async fn find_nearby_drivers(
        &self,
        center: GeoPoint,
        radius_km: f64,
        class: Option<VehicleClass>,
    ) -> RideResult<Vec<NearbyDriver>>;
}

/// Driver Directory: a read-mostly projection of captain location, class and availability.
pub struct DriverService {
    ledger: Arc<LedgerService>,
    notifier: Arc<dyn Notifier>,
    positions: RwLock<HashMap<String, DriverPosition>>,
}

impl DriverService {
    pub fn new(ledger: Arc<LedgerService>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            ledger,
            notifier,
            positions: RwLock::new(HashMap::new()),
        }
    }

    fn project(user: &User) -> RideResult<DriverPosition> {
        let captain = user
            .captain
            .as_ref()
            .ok_or_else(|| RideError::forbidden(format!("{} is not a captain", user.id)))?;
        Ok(DriverPosition {
            driver_id: user.id.clone(),
            class: captain.vehicle.class,
            eco_friendly: captain.vehicle.eco_friendly,
            location: captain.location,
            online: captain.online,
            updated_at: user.updated_at,
        })
    }

    async fn store(&self, position: DriverPosition) -> DriverPosition {
        self.positions
            .write()
            .await
            .insert(position.driver_id.clone(), position.clone());
        position
    }

    /// Reload every indexed captain from the profile store. Run once at startup so the
    /// radius query sees captains that were online before a restart.
    pub async fn restore(&self) -> RideResult<usize> {
        let mut restored = 0;
        for captain_id in self.ledger.captain_ids().await? {
            match self.ledger.get_user(&captain_id).await? {
                Some(user) if user.is_captain() => {
                    self.store(Self::project(&user)?).await;
                    restored += 1;
                }
                _ => tracing::warn!("Captain index names {} but no captain profile exists", captain_id),
            }
        }
        tracing::info!("Directory restored {} captains from the ledger", restored);
        Ok(restored)
    }
}

#[async_trait]
impl DriverOperations for DriverService {
    async fn register_driver(&self, user: &User) -> RideResult<DriverPosition> {
        let position = Self::project(user)?;
        self.ledger.index_captain(&user.id).await?;
        tracing::debug!("Directory now tracks captain {} ({})", user.id, position.class);
        Ok(self.store(position).await)
    }

    async fn update_driver_location(&self, update: DriverLocationUpdate) -> RideResult<DriverPosition> {
        if !update.location.is_valid() {
            return Err(RideError::validation_error("location", "Latitude or longitude out of range"));
        }

        let now = Utc::now();
        let location = update.location;
        let user = self
            .ledger
            .update_user(&update.driver_id, |user| {
                let captain = user
                    .captain
                    .as_mut()
                    .ok_or_else(|| RideError::forbidden("Only captains report location"))?;
                captain.location = Some(location);
                user.updated_at = now;
                Ok(())
            })
            .await?;

        let position = self.store(Self::project(&user)?).await;

        let event = RideEvent::CaptainLocation(CaptainLocationPayload {
            captain_id: update.driver_id.clone(),
            location,
        });
        if let Err(e) = self.notifier.publish(&Endpoint::Broadcast, &event).await {
            tracing::warn!("Location fan-out for {} failed: {}", update.driver_id, e);
        }

        Ok(position)
    }

    async fn set_online(&self, driver_id: &str, online: bool) -> RideResult<DriverPosition> {
        let now = Utc::now();
        let user = self
            .ledger
            .update_user(driver_id, |user| {
                let captain = user
                    .captain
                    .as_mut()
                    .ok_or_else(|| RideError::forbidden("Only captains can change availability"))?;
                captain.online = online;
                user.updated_at = now;
                Ok(())
            })
            .await?;

        tracing::info!("Captain {} is now {}", driver_id, if online { "online" } else { "offline" });
        Ok(self.store(Self::project(&user)?).await)
    }

    async fn get_position(&self, driver_id: &str) -> RideResult<Option<DriverPosition>> {
        if let Some(position) = self.positions.read().await.get(driver_id) {
            return Ok(Some(position.clone()));
        }
        // Rebuild from the profile store, e.g. after a restart against a persistent ledger.
        match self.ledger.get_user(driver_id).await? {
            Some(user) if user.is_captain() => Ok(Some(self.store(Self::project(&user)?).await)),
            _ => Ok(None),
        }
    }

    async fn find_nearby_drivers(
        &self,
        center: GeoPoint,
        radius_km: f64,
        class: Option<VehicleClass>,
    ) -> RideResult<Vec<NearbyDriver>> {
        if !center.is_valid() {
            return Err(RideError::validation_error("center", "Latitude or longitude out of range"));
        }
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(RideError::validation_error("radius_km", "Radius must be positive"));
        }

        let positions = self.positions.read().await;
        let mut nearby: Vec<NearbyDriver> = positions
            .values()
            .filter(|p| p.online && class.is_none_or(|c| c == p.class))
            .filter_map(|p| {
                let location = p.location?;
                let distance_km = haversine_km(center, location);
                (distance_km <= radius_km).then(|| NearbyDriver {
                    driver_id: p.driver_id.clone(),
                    class: p.class,
                    distance_km,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        tracing::debug!("{} drivers within {} km of ({}, {})", nearby.len(), radius_km, center.lat, center.lng);
        Ok(nearby)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        driver::{CaptainProfile, Vehicle},
        user::{RewardsTier, Role},
    };
    use crate::services::messaging_service::MockNotifier;

    pub(crate) fn captain(id: &str, class: VehicleClass, eco: bool) -> User {
        let now = Utc::now();
        User {
            id: id.to_string(),
            name: format!("Captain {}", id),
            phone_number: "9000000000".to_string(),
            role: Role::Captain,
            rewards_points: 0,
            rewards_tier: RewardsTier::Bronze,
            eco: Default::default(),
            captain: Some(CaptainProfile::new(Vehicle {
                class,
                plate_number: "MH12AB1234".to_string(),
                color: "white".to_string(),
                model: "Model".to_string(),
                capacity: 4,
                eco_friendly: eco,
            })),
            created_at: now,
            updated_at: now,
        }
    }

    async fn directory_with(users: &[User]) -> (DriverService, Arc<MockNotifier>) {
        let ledger = Arc::new(LedgerService::new_memory());
        let notifier = Arc::new(MockNotifier::new());
        let directory = DriverService::new(ledger.clone(), notifier.clone());
        for user in users {
            ledger.insert_user(user).await.unwrap();
            directory.register_driver(user).await.unwrap();
        }
        (directory, notifier)
    }

    async fn place(directory: &DriverService, id: &str, lat: f64, lng: f64) {
        directory
            .update_driver_location(DriverLocationUpdate {
                driver_id: id.to_string(),
                location: GeoPoint::new(lat, lng),
            })
            .await
            .unwrap();
        directory.set_online(id, true).await.unwrap();
    }

    #[tokio::test]
    async fn radius_query_filters_class_distance_and_availability() {
        let (directory, _) = directory_with(&[
            captain("usr-near-car", VehicleClass::Car, false),
            captain("usr-far-car", VehicleClass::Car, false),
            captain("usr-near-auto", VehicleClass::Auto, false),
            captain("usr-offline-car", VehicleClass::Car, false),
        ])
        .await;

        let pickup = GeoPoint::new(18.5204, 73.8567);
        place(&directory, "usr-near-car", 18.53, 73.86).await;
        place(&directory, "usr-far-car", 18.75, 73.86).await; // ~25 km north
        place(&directory, "usr-near-auto", 18.521, 73.857).await;
        place(&directory, "usr-offline-car", 18.5205, 73.8568).await;
        directory.set_online("usr-offline-car", false).await.unwrap();

        let found = directory
            .find_nearby_drivers(pickup, 10.0, Some(VehicleClass::Car))
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["usr-near-car"]);

        let any_class = directory.find_nearby_drivers(pickup, 10.0, None).await.unwrap();
        assert_eq!(any_class[0].driver_id, "usr-near-auto", "nearest first");
        assert_eq!(any_class.len(), 2);
    }

    #[tokio::test]
    async fn location_updates_fan_out_and_persist() {
        let (directory, notifier) = directory_with(&[captain("usr-cap", VehicleClass::EvCar, true)]).await;
        place(&directory, "usr-cap", 18.5, 73.8).await;
        place(&directory, "usr-cap", 18.6, 73.9).await;

        let position = directory.get_position("usr-cap").await.unwrap().unwrap();
        assert_eq!(position.location, Some(GeoPoint::new(18.6, 73.9)));
        assert_eq!(notifier.names_for(&Endpoint::Broadcast).await, vec!["captain-location", "captain-location"]);
    }

    #[tokio::test]
    async fn restart_restores_online_captains_for_radius_queries() {
        let ledger = Arc::new(LedgerService::new_memory());
        let notifier = Arc::new(MockNotifier::new());
        let before = DriverService::new(ledger.clone(), notifier.clone());
        let user = captain("usr-cap", VehicleClass::Car, false);
        ledger.insert_user(&user).await.unwrap();
        before.register_driver(&user).await.unwrap();
        place(&before, "usr-cap", 18.53, 73.86).await;

        let pickup = GeoPoint::new(18.5204, 73.8567);
        assert_eq!(before.find_nearby_drivers(pickup, 10.0, None).await.unwrap().len(), 1);

        let after = DriverService::new(ledger, notifier);
        assert!(after.find_nearby_drivers(pickup, 10.0, None).await.unwrap().is_empty());
        assert_eq!(after.restore().await.unwrap(), 1);

        let found = after.find_nearby_drivers(pickup, 10.0, Some(VehicleClass::Car)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_id, "usr-cap");
    }

    #[tokio::test]
    async fn riders_cannot_report_location() {
        let mut rider = captain("usr-rider", VehicleClass::Car, false);
        rider.role = Role::Rider;
        rider.captain = None;
        let ledger = Arc::new(LedgerService::new_memory());
        ledger.insert_user(&rider).await.unwrap();
        let directory = DriverService::new(ledger, Arc::new(MockNotifier::new()));

        let result = directory
            .update_driver_location(DriverLocationUpdate {
                driver_id: "usr-rider".into(),
                location: GeoPoint::new(18.5, 73.8),
            })
            .await;
        assert!(matches!(result, Err(RideError::Forbidden(_))));
    }

    #[tokio::test]
    async fn invalid_queries_are_rejected() {
        let (directory, _) = directory_with(&[]).await;
        assert!(directory.find_nearby_drivers(GeoPoint::new(95.0, 0.0), 10.0, None).await.is_err());
        assert!(directory.find_nearby_drivers(GeoPoint::new(18.0, 73.0), 0.0, None).await.is_err());
    }
}
