// src/services/dispatch_service.rs
use futures::future::join_all;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{RideResult, SideEffectFailure},
    models::{
        driver::VehicleClass,
        events::RideEvent,
        ride::{Ride, RideSnapshot, RideStatus},
    },
    services::{
        driver_service::DriverOperations,
        ledger_service::LedgerService,
        messaging_service::{Endpoint, Notifier, fan_out},
    },
};

pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 10.0;

/// Result of one broadcast round.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Drivers inside the search radius.
    pub candidates: Vec<String>,
    /// Candidates that had a live address and were notified directly.
    pub notified: Vec<String>,
    /// True when nobody was reachable directly and the class topic was used instead.
    pub used_class_topic: bool,
    pub failures: Vec<SideEffectFailure>,
}

/// Turns a pending ride into candidate notifications. Never assigns; the first accept wins.
pub struct DispatchService {
    ledger: Arc<LedgerService>,
    directory: Arc<dyn DriverOperations>,
    notifier: Arc<dyn Notifier>,
    search_radius_km: f64,
}

impl DispatchService {
    pub fn new(
        ledger: Arc<LedgerService>,
        directory: Arc<dyn DriverOperations>,
        notifier: Arc<dyn Notifier>,
        search_radius_km: f64,
    ) -> Self {
        Self {
            ledger,
            directory,
            notifier,
            search_radius_km,
        }
    }

    /// Fan a pending ride out to nearby drivers of its class, or to the class topic when none is reachable.
    pub async fn broadcast(&self, ride: &Ride) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        if let Err(e) = self.ledger.mark_pending(ride.vehicle_class, &ride.id).await {
            tracing::warn!("Could not index pending ride {}: {}", ride.id, e);
            outcome.failures.push(SideEffectFailure::new("index-pending", e));
        }

        let nearby = match self
            .directory
            .find_nearby_drivers(ride.pickup_point, self.search_radius_km, Some(ride.vehicle_class))
            .await
        {
            Ok(drivers) => drivers,
            Err(e) => {
                tracing::warn!("Driver lookup for ride {} failed, falling back to class topic: {}", ride.id, e);
                outcome.failures.push(SideEffectFailure::new("find-nearby-drivers", e));
                Vec::new()
            }
        };
        outcome.candidates = nearby.iter().map(|d| d.driver_id.clone()).collect();

        let checks = nearby.iter().map(|driver| async move {
            let endpoint = Endpoint::Captain(driver.driver_id.clone());
            let live = self.notifier.is_live(&endpoint).await;
            (driver.driver_id.clone(), endpoint, live)
        });
        let (live_ids, live_endpoints): (Vec<String>, Vec<Endpoint>) = join_all(checks)
            .await
            .into_iter()
            .filter(|(_, _, live)| *live)
            .map(|(id, endpoint, _)| (id, endpoint))
            .unzip();

        let event = RideEvent::new_ride(ride.snapshot());

        if live_endpoints.is_empty() {
            let topic = Endpoint::VehicleClass(ride.vehicle_class);
            outcome.failures.extend(fan_out(self.notifier.as_ref(), &[topic], &event).await);
            outcome.used_class_topic = true;
        } else {
            let failures = fan_out(self.notifier.as_ref(), &live_endpoints, &event).await;
            outcome.notified = live_ids
                .into_iter()
                .filter(|id| !failures.iter().any(|f| f.step.ends_with(&format!("captain:{}", id))))
                .collect();
            outcome.failures.extend(failures);
        }

        tracing::info!(
            "Dispatched ride {} ({}): {} candidates, {} notified, class topic: {}",
            ride.id,
            ride.vehicle_class,
            outcome.candidates.len(),
            outcome.notified.len(),
            outcome.used_class_topic
        );
        outcome
    }

    /// Take an accepted ride out of the pending pool.
    pub async fn withdraw(&self, ride: &Ride) -> Vec<SideEffectFailure> {
        match self.ledger.clear_pending(ride.vehicle_class, &ride.id).await {
            Ok(()) => Vec::new(),
            Err(e) => {
                tracing::warn!("Could not clear pending index for {}: {}", ride.id, e);
                vec![SideEffectFailure::new("clear-pending", e)]
            }
        }
    }

    /// Rides of `class` still waiting for a captain. Replayed to drivers who subscribe late.
    pub async fn pending_rides_for_class(&self, class: VehicleClass) -> RideResult<Vec<RideSnapshot>> {
        let mut snapshots = Vec::new();
        for ride_id in self.ledger.pending_ride_ids(class).await? {
            match self.ledger.get_ride(&ride_id).await? {
                Some(ride) if ride.status == RideStatus::Pending && ride.captain_id.is_none() => {
                    snapshots.push(ride.snapshot());
                }
                _ => {
                    // Accepted or gone; the index entry is stale.
                    self.ledger.clear_pending(class, &ride_id).await?;
                }
            }
        }
        snapshots.sort_by_key(|s| s.created_at);
        Ok(snapshots)
    }
}
