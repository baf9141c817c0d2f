// src/services/user_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{RideError, RideResult, ValidationError},
    models::{
        driver::{CaptainProfile, Vehicle},
        user::{CaptainRegistration, EcoStats, RiderRegistration, Role, User},
    },
    services::{driver_service::DriverOperations, ledger_service::LedgerService},
    utils::id_generator::{IdGenerator, IdType},
};

#[async_trait]
pub trait UserOperations: Send + Sync {
    async fn register_rider(&self, registration: RiderRegistration) -> RideResult<User>;
    async fn register_captain(&self, registration: CaptainRegistration) -> RideResult<User>;
    async fn get_user(&self, user_id: &str) -> RideResult<Option<User>>;
}

pub struct UserService {
    ledger: Arc<LedgerService>,
    directory: Arc<dyn DriverOperations>,
}

impl UserService {
    pub fn new(ledger: Arc<LedgerService>, directory: Arc<dyn DriverOperations>) -> Self {
        Self { ledger, directory }
    }

    fn validate_identity(name: &str, phone_number: &str) -> RideResult<()> {
        let mut errors = Vec::new();
        if name.trim().len() < 3 {
            errors.push(ValidationError {
                field: "name".to_string(),
                message: "Name must be at least 3 characters".to_string(),
            });
        }
        let digits = phone_number.chars().filter(|c| c.is_ascii_digit()).count();
        if !(10..=15).contains(&digits) {
            errors.push(ValidationError {
                field: "phone_number".to_string(),
                message: "Phone number must have 10 to 15 digits".to_string(),
            });
        }
        if errors.is_empty() { Ok(()) } else { Err(RideError::ValidationFailed(errors)) }
    }

    fn new_user(name: String, phone_number: String, role: Role) -> User {
        let now = Utc::now();
        User {
            id: IdGenerator::generate(IdType::User),
            name: name.trim().to_string(),
            phone_number: phone_number.trim().to_string(),
            role,
            rewards_points: 0,
            rewards_tier: Default::default(),
            eco: EcoStats::default(),
            captain: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl UserOperations for UserService {
    async fn register_rider(&self, registration: RiderRegistration) -> RideResult<User> {
        Self::validate_identity(&registration.name, &registration.phone_number)?;

        let mut user = Self::new_user(registration.name, registration.phone_number, Role::Rider);
        user.rewards_tier = registration.rewards_tier;
        user.rewards_points = registration.rewards_points;

        self.ledger.insert_user(&user).await?;
        tracing::info!("Rider registered: {}", user.id);
        Ok(user)
    }

    async fn register_captain(&self, registration: CaptainRegistration) -> RideResult<User> {
        Self::validate_identity(&registration.name, &registration.phone_number)?;

        let vehicle = registration.vehicle;
        let plate_number = Vehicle::normalize_plate(&vehicle.plate_number);
        if plate_number.len() < 4 {
            return Err(RideError::validation_error("plate_number", "Plate number is too short"));
        }
        let capacity = if vehicle.class.is_single_capacity() {
            1
        } else if vehicle.capacity == 0 {
            return Err(RideError::validation_error("capacity", "Capacity must be at least 1"));
        } else {
            vehicle.capacity
        };

        let mut user = Self::new_user(registration.name, registration.phone_number, Role::Captain);
        user.captain = Some(CaptainProfile::new(Vehicle {
            plate_number,
            capacity,
            ..vehicle
        }));

        self.ledger.insert_user(&user).await?;
        self.directory.register_driver(&user).await?;
        tracing::info!("Captain registered: {}", user.id);
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> RideResult<Option<User>> {
        if !IdGenerator::validate_id(user_id, Some(IdType::User)) {
            tracing::warn!("Invalid user ID format: {}", user_id);
            return Ok(None);
        }
        self.ledger.get_user(user_id).await
    }
}
