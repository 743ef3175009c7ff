//! Core domain types: coordinates, travel costs and tour checkpoints.
//!
//! Checkpoints come from a semicolon-separated CSV with one row per
//! checkpoint. Each row carries a group id (one checkpoint per group is
//! visited), the ISO-3166-2 code of the canton it sits in and an optional
//! manual override for the nearest railway station.

use std::fmt;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Two days in seconds. Marks a connection as infeasible; the tour solver
/// will never pick an edge this expensive.
pub const UNREACHABLE_SECONDS: u32 = 172_800;

/// A WGS-84 point as (longitude, latitude) in decimal degrees.
///
/// Equality and hashing are exact-bit: two coordinates are the same key
/// only if both floats are identical. Ordering uses `total_cmp` so maps
/// keyed by coordinates iterate deterministically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.lon.to_bits() == other.lon.to_bits() && self.lat.to_bits() == other.lat.to_bits()
    }
}

impl Eq for Coordinate {}

impl std::hash::Hash for Coordinate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.lon.to_bits().hash(state);
        self.lat.to_bits().hash(state);
    }
}

impl PartialOrd for Coordinate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coordinate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.lon
            .total_cmp(&other.lon)
            .then(self.lat.total_cmp(&other.lat))
    }
}

impl fmt::Display for Coordinate {
    /// Renders as `(lon, lat)`, the form used in cache keys and matrix files.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lon, self.lat)
    }
}

/// Haversine distance between two points in meters.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    const R: f64 = 6_371_000.0; // Earth radius in meters

    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    R * c
}

/// Travel time of a connection.
///
/// `Unreachable` is carried through matrices as the literal 172800 so the
/// downstream tour solver needs no special casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cost {
    Reachable(u32),
    Unreachable,
}

impl Cost {
    pub fn from_seconds(seconds: u32) -> Self {
        if seconds >= UNREACHABLE_SECONDS {
            Cost::Unreachable
        } else {
            Cost::Reachable(seconds)
        }
    }

    pub fn seconds(self) -> u32 {
        match self {
            Cost::Reachable(s) => s,
            Cost::Unreachable => UNREACHABLE_SECONDS,
        }
    }

    pub fn is_unreachable(self) -> bool {
        matches!(self, Cost::Unreachable)
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seconds().cmp(&other.seconds())
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.seconds())
    }
}

impl Serialize for Cost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.seconds())
    }
}

impl<'de> Deserialize<'de> for Cost {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let seconds = u32::deserialize(deserializer)?;
        Ok(Cost::from_seconds(seconds))
    }
}

/// One tour checkpoint from the input CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub coord: Coordinate,
    /// Group id; exactly one checkpoint per group is visited.
    pub group: String,
    /// ISO-3166-2 code of the canton containing this checkpoint.
    pub code: String,
    /// Human-readable canton name.
    pub label: String,
    /// Manual nearest-station override, when the CSV carries one.
    pub station: Option<Coordinate>,
}

/// Raw CSV row. Station columns are optional and may hold `NaN` when the
/// station should be resolved automatically.
#[derive(Debug, Deserialize)]
struct CheckpointRecord {
    #[serde(rename = "Latitude")]
    latitude: f64,
    #[serde(rename = "Longitude")]
    longitude: f64,
    #[serde(rename = "Group")]
    group: String,
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Canton")]
    canton: String,
    #[serde(rename = "Station_Lat", default, deserialize_with = "empty_as_none")]
    station_lat: Option<f64>,
    #[serde(rename = "Station_Lon", default, deserialize_with = "empty_as_none")]
    station_lon: Option<f64>,
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<f64>().map(Some).map_err(de::Error::custom),
    }
}

/// Loads checkpoints from a semicolon-separated CSV file with a header line.
pub fn load_checkpoints(path: impl AsRef<Path>) -> Result<Vec<Checkpoint>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_path(path)?;

    let mut checkpoints = Vec::new();
    for record in reader.deserialize() {
        let record: CheckpointRecord = record?;
        let station = match (record.station_lat, record.station_lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                Some(Coordinate::new(lon, lat))
            }
            _ => None,
        };
        checkpoints.push(Checkpoint {
            coord: Coordinate::new(record.longitude, record.latitude),
            group: record.group,
            code: record.code,
            label: record.canton,
            station,
        });
    }
    Ok(checkpoints)
}
