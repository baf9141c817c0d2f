// src/services/geo_service.rs
use async_trait::async_trait;
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing;

use crate::{
    errors::{RideError, RideResult},
    models::driver::GeoPoint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceTime {
    pub distance_meters: u64,
    pub duration_seconds: u64,
}

/// Address resolution and routing. Everything here is an upstream call.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn geocode(&self, address: &str) -> RideResult<GeoPoint>;
    async fn distance_time(&self, origin: &str, destination: &str) -> RideResult<DistanceTime>;
    async fn suggestions(&self, input: &str) -> RideResult<Vec<String>>;
}

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let from = Point::new(a.lng, a.lat);
    let to = Point::new(b.lng, b.lat);
    from.haversine_distance(&to) / 1000.0
}

#[derive(Debug, Clone)]
pub struct GoogleMapsConfig {
    pub api_key: String,
    pub base_url: String,
}

impl GoogleMapsConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://maps.googleapis.com/maps/api".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<DistanceMatrixRow>,
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixRow {
    elements: Vec<DistanceMatrixElement>,
}

#[derive(Debug, Deserialize)]
struct DistanceMatrixElement {
    status: String,
    distance: Option<ValueField>,
    duration: Option<ValueField>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct AutocompleteResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    description: String,
}

pub struct GoogleMapsGeoProvider {
    config: GoogleMapsConfig,
    client: reqwest::Client,
}

impl GoogleMapsGeoProvider {
    pub fn new(config: GoogleMapsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> RideResult<T> {
        let url = format!("{}/{}", self.config.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!("Maps request to {} failed with {}", path, status);
            return Err(RideError::GeoLookupFailed(format!("{} returned {}", path, status)));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GeoProvider for GoogleMapsGeoProvider {
    async fn geocode(&self, address: &str) -> RideResult<GeoPoint> {
        tracing::debug!("Geocoding address: {}", address);
        let body: GeocodeResponse = self.get_json("geocode/json", &[("address", address)]).await?;
        body.results
            .first()
            .map(|r| GeoPoint::new(r.geometry.location.lat, r.geometry.location.lng))
            .ok_or_else(|| RideError::GeoLookupFailed(format!("Unable to fetch coordinates for {}", address)))
    }

    async fn distance_time(&self, origin: &str, destination: &str) -> RideResult<DistanceTime> {
        let body: DistanceMatrixResponse = self
            .get_json("distancematrix/json", &[("origins", origin), ("destinations", destination)])
            .await?;

        if body.status != "OK" {
            return Err(RideError::GeoLookupFailed(format!("Distance matrix status {}", body.status)));
        }

        let element = body
            .rows
            .first()
            .and_then(|row| row.elements.first())
            .ok_or_else(|| RideError::GeoLookupFailed("Empty distance matrix".to_string()))?;

        match (element.status.as_str(), &element.distance, &element.duration) {
            ("OK", Some(distance), Some(duration)) => Ok(DistanceTime {
                distance_meters: distance.value,
                duration_seconds: duration.value,
            }),
            ("ZERO_RESULTS", _, _) => Err(RideError::GeoLookupFailed("No route found".to_string())),
            (status, _, _) => Err(RideError::GeoLookupFailed(format!("Route status {}", status))),
        }
    }

    async fn suggestions(&self, input: &str) -> RideResult<Vec<String>> {
        let body: AutocompleteResponse = self.get_json("place/autocomplete/json", &[("input", input)]).await?;
        Ok(body.predictions.into_iter().map(|p| p.description).collect())
    }
}

const ROAD_FACTOR: f64 = 1.3;
const CITY_SPEED_MPS: f64 = 25_000.0 / 3600.0;

/// Offline provider for development and tests.
/// Unknown addresses hash to a stable point near `center`; routes default to road-adjusted great-circle distance.
#[derive(Debug, Clone)]
pub struct StaticGeoProvider {
    center: GeoPoint,
    places: HashMap<String, GeoPoint>,
    routes: HashMap<(String, String), DistanceTime>,
    unreachable: bool,
}

impl Default for StaticGeoProvider {
    fn default() -> Self {
        Self {
            center: GeoPoint::new(18.5204, 73.8567),
            places: HashMap::new(),
            routes: HashMap::new(),
            unreachable: false,
        }
    }
}

impl StaticGeoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, address: &str, point: GeoPoint) -> Self {
        self.places.insert(Self::normalize(address), point);
        self
    }

    pub fn with_route(mut self, origin: &str, destination: &str, distance_meters: u64, duration_seconds: u64) -> Self {
        self.routes.insert(
            (Self::normalize(origin), Self::normalize(destination)),
            DistanceTime { distance_meters, duration_seconds },
        );
        self
    }

    /// Every lookup fails, like an upstream outage.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    fn normalize(address: &str) -> String {
        address.trim().to_lowercase()
    }

    fn ensure_reachable(&self) -> RideResult<()> {
        if self.unreachable {
            Err(RideError::GeoLookupFailed("geo provider unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn point_for(&self, address: &str) -> GeoPoint {
        let key = Self::normalize(address);
        if let Some(point) = self.places.get(&key) {
            return *point;
        }
        // FNV-1a, spread over roughly +-0.05 degrees
        let hash = key
            .bytes()
            .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
        let lat_offset = ((hash & 0xffff) as f64 / 65535.0 - 0.5) * 0.1;
        let lng_offset = (((hash >> 16) & 0xffff) as f64 / 65535.0 - 0.5) * 0.1;
        GeoPoint::new(self.center.lat + lat_offset, self.center.lng + lng_offset)
    }
}

#[async_trait]
impl GeoProvider for StaticGeoProvider {
    async fn geocode(&self, address: &str) -> RideResult<GeoPoint> {
        self.ensure_reachable()?;
        if address.trim().is_empty() {
            return Err(RideError::GeoLookupFailed("Empty address".to_string()));
        }
        Ok(self.point_for(address))
    }

    async fn distance_time(&self, origin: &str, destination: &str) -> RideResult<DistanceTime> {
        self.ensure_reachable()?;
        let key = (Self::normalize(origin), Self::normalize(destination));
        if let Some(route) = self.routes.get(&key) {
            return Ok(*route);
        }
        let km = haversine_km(self.point_for(origin), self.point_for(destination));
        let distance_meters = (km * 1000.0 * ROAD_FACTOR).round() as u64;
        Ok(DistanceTime {
            distance_meters,
            duration_seconds: (distance_meters as f64 / CITY_SPEED_MPS).round() as u64,
        })
    }

    async fn suggestions(&self, input: &str) -> RideResult<Vec<String>> {
        self.ensure_reachable()?;
        let needle = Self::normalize(input);
        let mut matches: Vec<String> = self
            .places
            .keys()
            .filter(|place| place.contains(&needle))
            .cloned()
            .collect();
        matches.sort();
        Ok(matches)
    }
}
