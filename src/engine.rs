//! Routing-engine adapters.
//!
//! Every backend answers a single question: the fastest bicycle route
//! between two points, optionally steering clear of a set of exclusion
//! points. Valhalla is the default; Brouter is a minimal alternative that
//! has no exclusion support, so forbidden regions are then enforced by
//! geometric post-validation alone.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoints::Coordinate;
use crate::polyline;

/// Default Valhalla endpoint.
pub const VALHALLA_URL: &str = "http://localhost:8002";
/// Default Brouter endpoint.
pub const BROUTER_URL: &str = "http://localhost:17777";

#[derive(Debug)]
pub enum RoutingError {
    Network(String),
    /// The engine answered with an error payload (e.g. no route found).
    Engine(String),
    Parse(String),
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::Network(msg) => write!(f, "routing network error: {}", msg),
            RoutingError::Engine(msg) => write!(f, "routing engine error: {}", msg),
            RoutingError::Parse(msg) => write!(f, "routing parse error: {}", msg),
        }
    }
}

impl std::error::Error for RoutingError {}

/// A computed point-to-point route.
#[derive(Debug, Clone)]
pub struct EngineRoute {
    /// Travel time in seconds.
    pub time: u32,
    /// Route length in meters, when the engine reports one.
    pub length: Option<f64>,
    /// Route geometry from source to destination.
    pub shape: Vec<Coordinate>,
}

/// A point-to-point bicycle router.
pub trait RoutingEngine: Send + Sync {
    /// Backend name; becomes the cache-key namespace.
    fn name(&self) -> &'static str;

    fn direct_connection(
        &self,
        src: Coordinate,
        dst: Coordinate,
        exclude: &[Coordinate],
    ) -> Result<EngineRoute, RoutingError>;
}

fn blocking_client() -> Result<reqwest::blocking::Client, RoutingError> {
    reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(600))
        .build()
        .map_err(|e| RoutingError::Network(e.to_string()))
}

// ============================================================================
// Valhalla
// ============================================================================

pub struct Valhalla {
    base_url: String,
    use_ferries: bool,
    client: reqwest::blocking::Client,
}

impl Valhalla {
    pub fn new(base_url: impl Into<String>, use_ferries: bool) -> Result<Self, RoutingError> {
        Ok(Self {
            base_url: base_url.into(),
            use_ferries,
            client: blocking_client()?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ValhallaRequest {
    locations: Vec<ValhallaLocation>,
    costing: &'static str,
    costing_options: CostingOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclude_locations: Option<Vec<ValhallaLocation>>,
}

#[derive(Debug, Serialize)]
struct CostingOptions {
    bicycle: BicycleOptions,
}

#[derive(Debug, Serialize)]
struct BicycleOptions {
    bicycle_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_ferry: Option<u32>,
    avoid_bad_surfaces: f64,
    use_roads: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
}

impl From<Coordinate> for ValhallaLocation {
    fn from(c: Coordinate) -> Self {
        Self { lat: c.lat, lon: c.lon }
    }
}

#[derive(Debug, Deserialize)]
struct ValhallaResponse {
    trip: Option<ValhallaTrip>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ValhallaTrip {
    legs: Vec<ValhallaLeg>,
    summary: ValhallaSummary,
}

#[derive(Debug, Deserialize)]
struct ValhallaLeg {
    shape: String,
}

#[derive(Debug, Deserialize)]
struct ValhallaSummary {
    time: f64,
    length: f64,
}

impl RoutingEngine for Valhalla {
    fn name(&self) -> &'static str {
        "valhalla"
    }

    fn direct_connection(
        &self,
        src: Coordinate,
        dst: Coordinate,
        exclude: &[Coordinate],
    ) -> Result<EngineRoute, RoutingError> {
        let request = ValhallaRequest {
            locations: vec![src.into(), dst.into()],
            costing: "bicycle",
            costing_options: CostingOptions {
                bicycle: BicycleOptions {
                    bicycle_type: "road",
                    // disable ferries unless configured in
                    use_ferry: if self.use_ferries { None } else { Some(0) },
                    avoid_bad_surfaces: 0.8,
                    use_roads: 0.8,
                },
            },
            exclude_locations: if exclude.is_empty() {
                None
            } else {
                Some(exclude.iter().map(|&c| c.into()).collect())
            },
        };
        debug!(src = %src, dst = %dst, excluded = exclude.len(), "valhalla request");

        let response = self
            .client
            .post(format!("{}/route", self.base_url))
            .json(&request)
            .send()
            .map_err(|e| RoutingError::Network(e.to_string()))?;
        let result: ValhallaResponse = response
            .json()
            .map_err(|e| RoutingError::Parse(e.to_string()))?;

        if let Some(error) = result.error {
            return Err(RoutingError::Engine(error.to_string()));
        }
        let trip = result
            .trip
            .ok_or_else(|| RoutingError::Parse("response has neither trip nor error".into()))?;

        // The request never carries intermediate waypoints, so a multi-leg
        // answer means the engine is misconfigured.
        assert_eq!(trip.legs.len(), 1, "expected exactly one leg in route response");

        let shape = polyline::decode(&trip.legs[0].shape, polyline::PRECISION_E6);
        Ok(EngineRoute {
            time: trip.summary.time.round() as u32,
            length: Some(trip.summary.length),
            shape,
        })
    }
}

// ============================================================================
// Brouter
// ============================================================================

pub struct Brouter {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl Brouter {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RoutingError> {
        Ok(Self {
            base_url: base_url.into(),
            client: blocking_client()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BrouterResponse {
    features: Vec<BrouterFeature>,
}

#[derive(Debug, Deserialize)]
struct BrouterFeature {
    properties: BrouterProperties,
    geometry: BrouterGeometry,
}

#[derive(Debug, Deserialize)]
struct BrouterProperties {
    #[serde(rename = "total-time")]
    total_time: String,
    #[serde(rename = "track-length", default)]
    track_length: Option<String>,
}

/// Coordinates come as [lon, lat, altitude]; the altitude is dropped.
#[derive(Debug, Deserialize)]
struct BrouterGeometry {
    coordinates: Vec<Vec<f64>>,
}

impl RoutingEngine for Brouter {
    fn name(&self) -> &'static str {
        "brouter"
    }

    fn direct_connection(
        &self,
        src: Coordinate,
        dst: Coordinate,
        _exclude: &[Coordinate],
    ) -> Result<EngineRoute, RoutingError> {
        let url = format!(
            "{}/brouter?lonlats={},{}|{},{}&profile=fastbike&format=geojson",
            self.base_url, src.lon, src.lat, dst.lon, dst.lat
        );
        debug!(src = %src, dst = %dst, "brouter request");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| RoutingError::Network(e.to_string()))?;
        let result: BrouterResponse = response
            .json()
            .map_err(|e| RoutingError::Parse(e.to_string()))?;

        let feature = result
            .features
            .into_iter()
            .next()
            .ok_or_else(|| RoutingError::Engine("empty geojson response".into()))?;
        let time = feature
            .properties
            .total_time
            .parse::<u32>()
            .map_err(|e| RoutingError::Parse(e.to_string()))?;
        let length = feature
            .properties
            .track_length
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok());
        let shape = feature
            .geometry
            .coordinates
            .iter()
            .filter(|c| c.len() >= 2)
            .map(|c| Coordinate::new(c[0], c[1]))
            .collect();

        Ok(EngineRoute { time, length, shape })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valhalla_request_payload() {
        let request = ValhallaRequest {
            locations: vec![
                Coordinate::new(7.44411, 46.9469).into(),
                Coordinate::new(8.5417, 47.3769).into(),
            ],
            costing: "bicycle",
            costing_options: CostingOptions {
                bicycle: BicycleOptions {
                    bicycle_type: "road",
                    use_ferry: Some(0),
                    avoid_bad_surfaces: 0.8,
                    use_roads: 0.8,
                },
            },
            exclude_locations: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["costing"], "bicycle");
        assert_eq!(json["costing_options"]["bicycle"]["bicycle_type"], "road");
        assert_eq!(json["costing_options"]["bicycle"]["use_ferry"], 0);
        assert_eq!(json["costing_options"]["bicycle"]["avoid_bad_surfaces"], 0.8);
        assert_eq!(json["locations"][0]["lat"], 46.9469);
        assert!(json.get("exclude_locations").is_none());
    }

    #[test]
    fn test_valhalla_ferry_toggle_omits_field() {
        let options = BicycleOptions {
            bicycle_type: "road",
            use_ferry: None,
            avoid_bad_surfaces: 0.8,
            use_roads: 0.8,
        };
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("use_ferry").is_none());
    }

    #[test]
    fn test_valhalla_response_decodes_shape() {
        let shape = polyline::encode(
            &[Coordinate::new(7.44411, 46.9469), Coordinate::new(7.5, 47.0)],
            polyline::PRECISION_E6,
        );
        let body = format!(
            r#"{{"trip": {{"legs": [{{"shape": {}}}], "summary": {{"time": 3600.5, "length": 25.4}}}}}}"#,
            serde_json::to_string(&shape).unwrap()
        );
        let response: ValhallaResponse = serde_json::from_str(&body).unwrap();
        let trip = response.trip.unwrap();
        assert_eq!(trip.legs.len(), 1);
        let decoded = polyline::decode(&trip.legs[0].shape, polyline::PRECISION_E6);
        assert_eq!(decoded[0], Coordinate::new(7.44411, 46.9469));
        assert_eq!(trip.summary.time.round() as u32, 3601);
    }

    #[test]
    fn test_valhalla_error_payload() {
        let body = r#"{"error": "No route found", "error_code": 442}"#;
        let response: ValhallaResponse = serde_json::from_str(body).unwrap();
        assert!(response.trip.is_none());
        assert_eq!(response.error.unwrap(), "No route found");
    }

    #[test]
    fn test_brouter_response_drops_altitude() {
        let body = r#"{
            "features": [{
                "properties": {"total-time": "4213", "track-length": "25431"},
                "geometry": {"coordinates": [[7.44411, 46.9469, 540.0], [7.5, 47.0, 612.0]]}
            }]
        }"#;
        let response: BrouterResponse = serde_json::from_str(body).unwrap();
        let feature = &response.features[0];
        assert_eq!(feature.properties.total_time, "4213");
        assert_eq!(feature.geometry.coordinates[0][0], 7.44411);
        assert_eq!(feature.geometry.coordinates[0].len(), 3);
    }
}
