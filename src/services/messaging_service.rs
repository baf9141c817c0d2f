// src/services/messaging_service.rs
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing;

use crate::{
    errors::{RideError, RideResult, SideEffectFailure},
    models::{driver::VehicleClass, events::RideEvent},
};

/// Where an event is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Endpoint {
    User(String),
    Captain(String),
    /// Every captain driving this class.
    VehicleClass(VehicleClass),
    /// Everyone connected.
    Broadcast,
}

impl Endpoint {
    /// Topics accept events with nobody listening; direct endpoints do not.
    pub fn is_topic(&self) -> bool {
        matches!(self, Endpoint::VehicleClass(_) | Endpoint::Broadcast)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::User(id) => write!(f, "user:{}", id),
            Endpoint::Captain(id) => write!(f, "captain:{}", id),
            Endpoint::VehicleClass(class) => write!(f, "class:{}", class),
            Endpoint::Broadcast => f.write_str("broadcast"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("No live subscriber at {0}")]
    NoSubscriber(String),

    #[error("Delivery to {0} rejected: {1}")]
    Rejected(String, String),
}

impl From<NotificationError> for RideError {
    fn from(error: NotificationError) -> Self {
        RideError::NotificationFailed(error.to_string())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, endpoint: &Endpoint, event: &RideEvent) -> RideResult<()>;

    /// Whether something is currently listening at `endpoint`.
    async fn is_live(&self, endpoint: &Endpoint) -> bool;
}

/// Publish to every endpoint concurrently. Failures are logged and handed back, never raised.
pub async fn fan_out(notifier: &dyn Notifier, endpoints: &[Endpoint], event: &RideEvent) -> Vec<SideEffectFailure> {
    let sends = endpoints
        .iter()
        .map(|endpoint| async move { (endpoint, notifier.publish(endpoint, event).await) });

    join_all(sends)
        .await
        .into_iter()
        .filter_map(|(endpoint, result)| {
            result.err().map(|e| {
                tracing::warn!("Failed to deliver {} to {}: {}", event.name(), endpoint, e);
                SideEffectFailure::new(format!("notify:{}:{}", event.name(), endpoint), e)
            })
        })
        .collect()
}

/// In-process notifier backed by tokio broadcast channels, one per endpoint.
pub struct ChannelNotifier {
    capacity: usize,
    channels: RwLock<HashMap<Endpoint, broadcast::Sender<RideEvent>>>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, endpoint: Endpoint) -> broadcast::Receiver<RideEvent> {
        if let Some(sender) = self.channels.read().await.get(&endpoint) {
            return sender.subscribe();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(endpoint)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop channels whose subscribers all went away.
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(&self, endpoint: &Endpoint, event: &RideEvent) -> RideResult<()> {
        let channels = self.channels.read().await;
        match channels.get(endpoint) {
            Some(sender) if sender.receiver_count() > 0 => {
                sender
                    .send(event.clone())
                    .map_err(|_| NotificationError::NoSubscriber(endpoint.to_string()))?;
                tracing::debug!("Delivered {} to {}", event.name(), endpoint);
                Ok(())
            }
            _ if endpoint.is_topic() => {
                tracing::debug!("No subscribers on {} for {}", endpoint, event.name());
                Ok(())
            }
            _ => Err(NotificationError::NoSubscriber(endpoint.to_string()).into()),
        }
    }

    async fn is_live(&self, endpoint: &Endpoint) -> bool {
        self.channels
            .read()
            .await
            .get(endpoint)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }
}

// Mock notifier for development and testing
#[derive(Default)]
pub struct MockNotifier {
    deliveries: Mutex<Vec<(Endpoint, RideEvent)>>,
    live: RwLock<HashSet<Endpoint>>,
    failing: RwLock<HashSet<Endpoint>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_live(&self, endpoint: Endpoint) {
        self.live.write().await.insert(endpoint);
    }

    /// Deliveries to `endpoint` fail from now on.
    pub async fn fail_for(&self, endpoint: Endpoint) {
        self.failing.write().await.insert(endpoint);
    }

    pub async fn deliveries(&self) -> Vec<(Endpoint, RideEvent)> {
        self.deliveries.lock().await.clone()
    }

    pub async fn events_for(&self, endpoint: &Endpoint) -> Vec<RideEvent> {
        self.deliveries
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == endpoint)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub async fn names_for(&self, endpoint: &Endpoint) -> Vec<&'static str> {
        self.events_for(endpoint).await.iter().map(RideEvent::name).collect()
    }

    pub async fn clear(&self) {
        self.deliveries.lock().await.clear();
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn publish(&self, endpoint: &Endpoint, event: &RideEvent) -> RideResult<()> {
        if self.failing.read().await.contains(endpoint) {
            return Err(NotificationError::Rejected(endpoint.to_string(), "mock failure".to_string()).into());
        }
        tracing::info!("[MOCK] {} -> {}", event.name(), endpoint);
        self.deliveries.lock().await.push((endpoint.clone(), event.clone()));
        Ok(())
    }

    async fn is_live(&self, endpoint: &Endpoint) -> bool {
        self.live.read().await.contains(endpoint)
    }
}
