// src/services/ledger_service.rs
use async_trait::async_trait;
use redis::Client;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tokio::sync::RwLock;
use tracing;

use crate::errors::{RideError, RideResult};
use crate::models::{driver::VehicleClass, ride::Ride, user::User};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub redis_url: Option<String>,
    pub namespace: String,
    pub max_update_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            namespace: "dispatch".to_string(),
            max_update_retries: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LedgerKey {
    Simple(String),
    Composite(Vec<String>),
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKey::Simple(key) => f.write_str(key),
            LedgerKey::Composite(parts) => f.write_str(&parts.join(":")),
        }
    }
}

pub struct LedgerKeys;

impl LedgerKeys {
    pub fn ride_by_id(ride_id: &str) -> LedgerKey {
        LedgerKey::Composite(vec!["ride".to_string(), "id".to_string(), ride_id.to_string()])
    }

    pub fn user_by_id(user_id: &str) -> LedgerKey {
        LedgerKey::Composite(vec!["user".to_string(), "id".to_string(), user_id.to_string()])
    }

    pub fn rides_by_captain(captain_id: &str) -> LedgerKey {
        LedgerKey::Composite(vec!["rides".to_string(), "captain".to_string(), captain_id.to_string()])
    }

    pub fn captains() -> LedgerKey {
        LedgerKey::Composite(vec!["users".to_string(), "captains".to_string()])
    }

    pub fn pending_rides(class: VehicleClass) -> LedgerKey {
        LedgerKey::Composite(vec!["rides".to_string(), "pending".to_string(), class.as_str().to_string()])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Operation error: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Document missing: {0}")]
    Missing(String),

    #[error("Update kept conflicting: {0}")]
    Conflict(String),
}

impl From<LedgerError> for RideError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Missing(key) => RideError::NotFound(key),
            LedgerError::Conflict(key) => RideError::LedgerConflict(key),
            LedgerError::SerializationError(msg) => RideError::Serialization(msg),
            other => RideError::Ledger(other.to_string()),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, LedgerError> {
    serde_json::to_string(value).map_err(|e| LedgerError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, LedgerError> {
    serde_json::from_str(raw).map_err(|e| LedgerError::SerializationError(e.to_string()))
}

// ------------------------------
// Traits (split to avoid E0283)
// ------------------------------

#[async_trait]
pub trait DocumentOperations<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &LedgerKey) -> RideResult<Option<T>>;

    /// Store a new document; fails if the key is taken.
    async fn insert(&self, key: &LedgerKey, value: &T) -> RideResult<()>;

    /// Atomic read-modify-write. `mutate` may reject, in which case nothing is written.
    /// It can run more than once when the backend retries after a concurrent write.
    async fn update<F>(&self, key: &LedgerKey, mutate: F) -> RideResult<T>
    where
        F: FnMut(&mut T) -> RideResult<()> + Send;
}

#[async_trait]
pub trait SetOperations: Send + Sync {
    async fn sadd(&self, key: &LedgerKey, value: &str) -> RideResult<()>;
    async fn srem(&self, key: &LedgerKey, value: &str) -> RideResult<()>;
    async fn smembers(&self, key: &LedgerKey) -> RideResult<Vec<String>>;
}

pub enum Ledger {
    Redis(RedisLedger),
    Memory(MemoryLedger),
}

// Redis-backed ledger. Conditional updates use WATCH/MULTI/EXEC.
pub struct RedisLedger {
    client: Client,
    config: LedgerConfig,
}

impl RedisLedger {
    pub async fn new(redis_url: &str, config: LedgerConfig) -> RideResult<Self> {
        let client = Client::open(redis_url).map_err(|e| LedgerError::ConnectionError(e.to_string()))?;
        let instance = Self { client, config };
        // Fail fast on a bad URL or unreachable server.
        let mut conn = instance.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| LedgerError::ConnectionError(e.to_string()))?;
        Ok(instance)
    }

    fn namespaced(&self, key: &LedgerKey) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    // WATCH is connection scoped, so every call gets its own connection.
    async fn connection(&self) -> Result<redis::aio::Connection, LedgerError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| LedgerError::ConnectionError(e.to_string()))
    }

    async fn unwatch(conn: &mut redis::aio::Connection) {
        let result: redis::RedisResult<()> = redis::cmd("UNWATCH").query_async(conn).await;
        if let Err(e) = result {
            tracing::warn!("UNWATCH failed: {}", e);
        }
    }
}

#[async_trait]
impl<T> DocumentOperations<T> for RedisLedger
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &LedgerKey) -> RideResult<Option<T>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| LedgerError::OperationError(e.to_string()))?;

        match data {
            Some(json) => Ok(Some(decode(&json)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, key: &LedgerKey, value: &T) -> RideResult<()> {
        let json = encode(value)?;
        let mut conn = self.connection().await?;
        let stored: Option<String> = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| LedgerError::OperationError(e.to_string()))?;

        match stored {
            Some(_) => Ok(()),
            None => Err(LedgerError::AlreadyExists(key.to_string()).into()),
        }
    }

    async fn update<F>(&self, key: &LedgerKey, mut mutate: F) -> RideResult<T>
    where
        F: FnMut(&mut T) -> RideResult<()> + Send,
    {
        let key_str = self.namespaced(key);
        let mut conn = self.connection().await?;

        for attempt in 0..self.config.max_update_retries {
            let _: () = redis::cmd("WATCH")
                .arg(&key_str)
                .query_async(&mut conn)
                .await
                .map_err(|e| LedgerError::OperationError(e.to_string()))?;

            let data: Option<String> = redis::cmd("GET")
                .arg(&key_str)
                .query_async(&mut conn)
                .await
                .map_err(|e| LedgerError::OperationError(e.to_string()))?;

            let Some(json) = data else {
                Self::unwatch(&mut conn).await;
                return Err(LedgerError::Missing(key.to_string()).into());
            };

            let mut value: T = decode(&json)?;
            if let Err(rejected) = mutate(&mut value) {
                Self::unwatch(&mut conn).await;
                return Err(rejected);
            }
            let updated = encode(&value)?;

            // EXEC returns nil when the watched key changed underneath us.
            let committed: Option<()> = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&key_str)
                .arg(updated)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| LedgerError::OperationError(e.to_string()))?;

            if committed.is_some() {
                return Ok(value);
            }
            tracing::debug!("Optimistic update of {} lost a race (attempt {})", key_str, attempt + 1);
        }

        Err(LedgerError::Conflict(key.to_string()).into())
    }
}

#[async_trait]
impl SetOperations for RedisLedger {
    async fn sadd(&self, key: &LedgerKey, value: &str) -> RideResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SADD")
            .arg(self.namespaced(key))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| LedgerError::OperationError(e.to_string()))?;
        Ok(())
    }

    async fn srem(&self, key: &LedgerKey, value: &str) -> RideResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SREM")
            .arg(self.namespaced(key))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| LedgerError::OperationError(e.to_string()))?;
        Ok(())
    }

    async fn smembers(&self, key: &LedgerKey) -> RideResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| LedgerError::OperationError(e.to_string()))?;
        Ok(members)
    }
}

// In-process ledger for development and tests. The write lock makes every update linearizable.
#[derive(Default)]
pub struct MemoryLedger {
    docs: RwLock<HashMap<String, String>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T> DocumentOperations<T> for MemoryLedger
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &LedgerKey) -> RideResult<Option<T>> {
        let docs = self.docs.read().await;
        match docs.get(&key.to_string()) {
            Some(json) => Ok(Some(decode(json)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, key: &LedgerKey, value: &T) -> RideResult<()> {
        let json = encode(value)?;
        let mut docs = self.docs.write().await;
        let key_str = key.to_string();
        if docs.contains_key(&key_str) {
            return Err(LedgerError::AlreadyExists(key_str).into());
        }
        docs.insert(key_str, json);
        Ok(())
    }

    async fn update<F>(&self, key: &LedgerKey, mut mutate: F) -> RideResult<T>
    where
        F: FnMut(&mut T) -> RideResult<()> + Send,
    {
        let key_str = key.to_string();
        let mut docs = self.docs.write().await;
        let json = docs
            .get(&key_str)
            .ok_or_else(|| LedgerError::Missing(key_str.clone()))?;
        let mut value: T = decode(json)?;
        mutate(&mut value)?;
        docs.insert(key_str, encode(&value)?);
        Ok(value)
    }
}

#[async_trait]
impl SetOperations for MemoryLedger {
    async fn sadd(&self, key: &LedgerKey, value: &str) -> RideResult<()> {
        let mut sets = self.sets.write().await;
        sets.entry(key.to_string()).or_default().insert(value.to_string());
        Ok(())
    }

    async fn srem(&self, key: &LedgerKey, value: &str) -> RideResult<()> {
        let mut sets = self.sets.write().await;
        if let Some(set) = sets.get_mut(&key.to_string()) {
            set.remove(value);
        }
        Ok(())
    }

    async fn smembers(&self, key: &LedgerKey) -> RideResult<Vec<String>> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(&key.to_string())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

// ------------------------------
// Enum delegations (Ledger)
// ------------------------------

#[async_trait]
impl<T> DocumentOperations<T> for Ledger
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &LedgerKey) -> RideResult<Option<T>> {
        match self {
            Ledger::Redis(ledger) => ledger.get(key).await,
            Ledger::Memory(ledger) => ledger.get(key).await,
        }
    }

    async fn insert(&self, key: &LedgerKey, value: &T) -> RideResult<()> {
        match self {
            Ledger::Redis(ledger) => ledger.insert(key, value).await,
            Ledger::Memory(ledger) => ledger.insert(key, value).await,
        }
    }

    async fn update<F>(&self, key: &LedgerKey, mutate: F) -> RideResult<T>
    where
        F: FnMut(&mut T) -> RideResult<()> + Send,
    {
        match self {
            Ledger::Redis(ledger) => ledger.update(key, mutate).await,
            Ledger::Memory(ledger) => ledger.update(key, mutate).await,
        }
    }
}

#[async_trait]
impl SetOperations for Ledger {
    async fn sadd(&self, key: &LedgerKey, value: &str) -> RideResult<()> {
        match self {
            Ledger::Redis(ledger) => ledger.sadd(key, value).await,
            Ledger::Memory(ledger) => ledger.sadd(key, value).await,
        }
    }

    async fn srem(&self, key: &LedgerKey, value: &str) -> RideResult<()> {
        match self {
            Ledger::Redis(ledger) => ledger.srem(key, value).await,
            Ledger::Memory(ledger) => ledger.srem(key, value).await,
        }
    }

    async fn smembers(&self, key: &LedgerKey) -> RideResult<Vec<String>> {
        match self {
            Ledger::Redis(ledger) => ledger.smembers(key).await,
            Ledger::Memory(ledger) => ledger.smembers(key).await,
        }
    }
}

/// Typed access to rides and profiles. The only component allowed to write ride documents.
pub struct LedgerService {
    ledger: Ledger,
}

impl LedgerService {
    pub async fn new(config: LedgerConfig) -> RideResult<Self> {
        let ledger = match config.redis_url.clone() {
            Some(url) => {
                tracing::info!("Using Redis ride ledger");
                Ledger::Redis(RedisLedger::new(&url, config).await?)
            }
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory ride ledger");
                Ledger::Memory(MemoryLedger::new())
            }
        };
        Ok(Self { ledger })
    }

    pub fn new_memory() -> Self {
        Self { ledger: Ledger::Memory(MemoryLedger::new()) }
    }

    async fn fetch<T>(&self, key: &LedgerKey) -> RideResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        DocumentOperations::<T>::get(&self.ledger, key).await
    }

    // Ride documents
    pub async fn insert_ride(&self, ride: &Ride) -> RideResult<()> {
        self.ledger.insert(&LedgerKeys::ride_by_id(&ride.id), ride).await
    }

    pub async fn get_ride(&self, ride_id: &str) -> RideResult<Option<Ride>> {
        self.fetch(&LedgerKeys::ride_by_id(ride_id)).await
    }

    pub async fn require_ride(&self, ride_id: &str) -> RideResult<Ride> {
        self.get_ride(ride_id)
            .await?
            .ok_or_else(|| RideError::ride_not_found(ride_id))
    }

    /// Conditional update keyed by ride id; `mutate` enforces the expected prior state.
    pub async fn update_ride<F>(&self, ride_id: &str, mutate: F) -> RideResult<Ride>
    where
        F: FnMut(&mut Ride) -> RideResult<()> + Send,
    {
        DocumentOperations::<Ride>::update(&self.ledger, &LedgerKeys::ride_by_id(ride_id), mutate)
            .await
            .map_err(|e| match e {
                RideError::NotFound(_) => RideError::ride_not_found(ride_id),
                other => other,
            })
    }

    // User profiles
    pub async fn insert_user(&self, user: &User) -> RideResult<()> {
        self.ledger.insert(&LedgerKeys::user_by_id(&user.id), user).await
    }

    pub async fn get_user(&self, user_id: &str) -> RideResult<Option<User>> {
        self.fetch(&LedgerKeys::user_by_id(user_id)).await
    }

    pub async fn require_user(&self, user_id: &str) -> RideResult<User> {
        self.get_user(user_id)
            .await?
            .ok_or_else(|| RideError::user_not_found(user_id))
    }

    pub async fn update_user<F>(&self, user_id: &str, mutate: F) -> RideResult<User>
    where
        F: FnMut(&mut User) -> RideResult<()> + Send,
    {
        DocumentOperations::<User>::update(&self.ledger, &LedgerKeys::user_by_id(user_id), mutate)
            .await
            .map_err(|e| match e {
                RideError::NotFound(_) => RideError::user_not_found(user_id),
                other => other,
            })
    }

    // Indices
    pub async fn index_captain_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<()> {
        self.ledger.sadd(&LedgerKeys::rides_by_captain(captain_id), ride_id).await
    }

    pub async fn unindex_captain_ride(&self, captain_id: &str, ride_id: &str) -> RideResult<()> {
        self.ledger.srem(&LedgerKeys::rides_by_captain(captain_id), ride_id).await
    }

    pub async fn captain_ride_ids(&self, captain_id: &str) -> RideResult<Vec<String>> {
        self.ledger.smembers(&LedgerKeys::rides_by_captain(captain_id)).await
    }

    /// Captains known to the directory; read back to rebuild it on startup.
    pub async fn index_captain(&self, captain_id: &str) -> RideResult<()> {
        self.ledger.sadd(&LedgerKeys::captains(), captain_id).await
    }

    pub async fn captain_ids(&self) -> RideResult<Vec<String>> {
        self.ledger.smembers(&LedgerKeys::captains()).await
    }

    pub async fn mark_pending(&self, class: VehicleClass, ride_id: &str) -> RideResult<()> {
        self.ledger.sadd(&LedgerKeys::pending_rides(class), ride_id).await
    }

    pub async fn clear_pending(&self, class: VehicleClass, ride_id: &str) -> RideResult<()> {
        self.ledger.srem(&LedgerKeys::pending_rides(class), ride_id).await
    }

    pub async fn pending_ride_ids(&self, class: VehicleClass) -> RideResult<Vec<String>> {
        self.ledger.smembers(&LedgerKeys::pending_rides(class)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ride::{RideStatus, tests::pending_ride};
    use std::sync::Arc;

    #[test]
    fn keys_are_namespaced_by_kind() {
        assert_eq!(LedgerKeys::ride_by_id("rid-1").to_string(), "ride:id:rid-1");
        assert_eq!(LedgerKeys::pending_rides(VehicleClass::EvCar).to_string(), "rides:pending:ev_car");
        assert_eq!(LedgerKeys::captains().to_string(), "users:captains");
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let ledger = LedgerService::new_memory();
        let ride = pending_ride(false);
        ledger.insert_ride(&ride).await.unwrap();
        assert!(ledger.insert_ride(&ride).await.is_err());
        assert_eq!(ledger.require_ride(&ride.id).await.unwrap().fare, 100);
    }

    #[tokio::test]
    async fn rejected_update_writes_nothing() {
        let ledger = LedgerService::new_memory();
        let ride = pending_ride(false);
        ledger.insert_ride(&ride).await.unwrap();

        let result = ledger
            .update_ride(&ride.id, |r| {
                r.fare = 1;
                Err(RideError::InvalidOtp)
            })
            .await;
        assert!(matches!(result, Err(RideError::InvalidOtp)));
        assert_eq!(ledger.require_ride(&ride.id).await.unwrap().fare, 100);
    }

    #[tokio::test]
    async fn missing_ride_maps_to_ride_not_found() {
        let ledger = LedgerService::new_memory();
        let result = ledger.update_ride("rid-missing", |_| Ok(())).await;
        assert!(matches!(result, Err(RideError::RideNotFound(id)) if id == "rid-missing"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_have_one_winner() {
        let ledger = Arc::new(LedgerService::new_memory());
        let ride = pending_ride(false);
        ledger.insert_ride(&ride).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..16 {
            let ledger = ledger.clone();
            let ride_id = ride.id.clone();
            handles.push(tokio::spawn(async move {
                let captain = format!("usr-cap-{}", n);
                ledger
                    .update_ride(&ride_id, |r| r.accept(&captain, chrono::Utc::now()))
                    .await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(ledger.require_ride(&ride.id).await.unwrap().status, RideStatus::Accepted);
    }

    #[tokio::test]
    async fn set_operations() {
        let ledger = LedgerService::new_memory();
        ledger.mark_pending(VehicleClass::Car, "rid-1").await.unwrap();
        ledger.mark_pending(VehicleClass::Car, "rid-2").await.unwrap();
        ledger.mark_pending(VehicleClass::Auto, "rid-3").await.unwrap();
        ledger.clear_pending(VehicleClass::Car, "rid-1").await.unwrap();
        assert_eq!(ledger.pending_ride_ids(VehicleClass::Car).await.unwrap(), vec!["rid-2".to_string()]);
        assert!(ledger.captain_ride_ids("usr-nobody").await.unwrap().is_empty());
    }
}
