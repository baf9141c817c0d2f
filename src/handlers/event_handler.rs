// src/handlers/event_handler.rs
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing;

use crate::{
    errors::{RideError, RideResult},
    models::{driver::VehicleClass, events::RideEvent},
    services::{messaging_service::Endpoint, ride_service::RideOperations},
    state::AppState,
};

fn endpoint_for(kind: &str, id: &str) -> RideResult<Endpoint> {
    match kind {
        "user" => Ok(Endpoint::User(id.to_string())),
        "captain" => Ok(Endpoint::Captain(id.to_string())),
        "class" => Ok(Endpoint::VehicleClass(id.parse::<VehicleClass>()?)),
        other => Err(RideError::InvalidFieldValue {
            field: "kind".to_string(),
            value: other.to_string(),
            reason: "expected user, captain or class".to_string(),
        }),
    }
}

fn to_sse(event: &RideEvent) -> Event {
    Event::default().event(event.name()).data(event.data().to_string())
}

/// Server-sent event stream for one endpoint. Class subscribers first receive every ride still pending.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> RideResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let endpoint = endpoint_for(&kind, &id)?;
    stream_endpoint(state, endpoint).await
}

pub async fn subscribe_broadcast(
    State(state): State<Arc<AppState>>,
) -> RideResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    stream_endpoint(state, Endpoint::Broadcast).await
}

async fn stream_endpoint(
    state: Arc<AppState>,
    endpoint: Endpoint,
) -> RideResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading the pending pool so nothing posted in between is lost.
    let receiver = state.notifier.subscribe(endpoint.clone()).await;

    let replay = match &endpoint {
        Endpoint::VehicleClass(class) => state
            .ride_service
            .pending_rides(*class)
            .await?
            .into_iter()
            .map(RideEvent::new_ride)
            .collect(),
        _ => Vec::new(),
    };
    tracing::info!("Event stream opened for {} ({} pending replayed)", endpoint, replay.len());

    let live = stream::unfold((receiver, endpoint), |(mut receiver, endpoint)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((to_sse(&event), (receiver, endpoint))),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber on {} lagged, {} events dropped", endpoint, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::iter(replay.iter().map(to_sse).collect::<Vec<_>>())
        .chain(live)
        .map(Ok::<Event, Infallible>);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_parse_from_path() {
        assert_eq!(endpoint_for("user", "usr-1").unwrap(), Endpoint::User("usr-1".into()));
        assert_eq!(endpoint_for("captain", "usr-2").unwrap(), Endpoint::Captain("usr-2".into()));
        assert_eq!(
            endpoint_for("class", "ev_car").unwrap(),
            Endpoint::VehicleClass(VehicleClass::EvCar)
        );
        assert!(endpoint_for("class", "rocket").is_err());
        assert!(endpoint_for("fleet", "x").is_err());
    }
}
