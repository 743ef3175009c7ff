//! Blocking Overpass API client.
//!
//! Serves three query shapes: administrative boundary relations (region
//! polygons), driveable ways inside a region (border-crossing extraction)
//! and railway-station nodes (nearest-station resolver). The raw element
//! model is shared; callers interpret the parts they need.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error};

use crate::checkpoints::Coordinate;

/// Public Overpass instance used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://overpass.kumi.systems/api/interpreter";

#[derive(Debug)]
pub enum OverpassError {
    Network(String),
    Parse(String),
}

impl fmt::Display for OverpassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverpassError::Network(msg) => write!(f, "Overpass network error: {}", msg),
            OverpassError::Parse(msg) => write!(f, "Overpass parse error: {}", msg),
        }
    }
}

impl std::error::Error for OverpassError {}

pub struct OverpassClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl OverpassClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, OverpassError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .user_agent(concat!("such-route/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OverpassError::Network(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    /// Posts a raw Overpass QL query and parses the JSON response.
    pub fn query(&self, ql: &str) -> Result<OverpassResponse, OverpassError> {
        debug!("Overpass query:\n{}", ql);

        let response = self
            .client
            .post(&self.endpoint)
            .body(ql.to_owned())
            .header("Content-Type", "text/plain")
            .send()
            .map_err(|e| {
                error!("Overpass request failed: {}", e);
                OverpassError::Network(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(OverpassError::Network(format!(
                "Overpass API returned status {}",
                response.status()
            )));
        }

        response.json().map_err(|e| OverpassError::Parse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct OverpassResponse {
    pub elements: Vec<OsmElement>,
}

#[derive(Debug, Deserialize)]
pub struct OsmElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
    /// Set for node elements.
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Set for way elements queried with `out geom`.
    #[serde(default)]
    pub geometry: Option<Vec<LatLon>>,
    /// Set for relation elements queried with `out body geom`.
    #[serde(default)]
    pub members: Option<Vec<OsmMember>>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

impl OsmElement {
    /// Node position, when this element is a node.
    pub fn node_coordinate(&self) -> Option<Coordinate> {
        match (self.lon, self.lat) {
            (Some(lon), Some(lat)) => Some(Coordinate::new(lon, lat)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OsmMember {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: i64,
    pub role: String,
    #[serde(default)]
    pub geometry: Option<Vec<LatLon>>,
}

/// Overpass wire order is (lat, lon).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn coordinate(self) -> Coordinate {
        Coordinate::new(self.lon, self.lat)
    }
}
