//! Persistent two-tier route cache.
//!
//! Small values (route summaries, region polygons, station lookups) live in
//! a single JSON blob that is loaded on startup and rewritten on save. Large
//! values (route geometries) are stored as one file per key in a sibling
//! directory, so parallel workers can write distinct routes without
//! coordination.
//!
//! Keys are plain strings namespaced by prefix: `<algo>:…` for routes,
//! `region:<code>` for polygons, `station:…`/`station_cost:…` for the
//! nearest-station resolver and `valhalla:intersection_points:<code>` for
//! border crossings.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use geo::MultiPolygon;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoints::{Coordinate, Cost};

/// A value in the small cache tier. The key namespace decides the variant;
/// a lookup that finds the wrong variant is treated as a miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheValue {
    /// Route summary: travel time and length in meters (absent for
    /// unreachable routes).
    Route(Cost, Option<f64>),
    /// Administrative region boundary.
    Polygon(MultiPolygon<f64>),
    /// A single point, e.g. a resolved station position.
    Point(Coordinate),
    /// A bare travel cost, e.g. the cost to a resolved station.
    Cost(Cost),
    /// A list of points, e.g. road/border intersection points.
    Points(Vec<Coordinate>),
}

#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    /// The on-disk blob exists but cannot be deserialized. Fatal, unlike a
    /// missing file: the populated cache must not be silently dropped.
    Corrupt(serde_json::Error),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "cache I/O error: {}", e),
            CacheError::Corrupt(e) => write!(f, "cache blob is corrupt: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        CacheError::Io(e)
    }
}

/// The persistent cache. All small-tier access goes through an internal
/// mutex; large-tier files are written once and read many, each under its
/// own filename, so they need no lock.
pub struct Cache {
    path: PathBuf,
    files_dir: PathBuf,
    algorithm: String,
    entries: Mutex<HashMap<String, CacheValue>>,
}

impl Cache {
    /// Creates an empty cache bound to `path`. Large-tier files go to the
    /// sibling directory `<path>_files`.
    pub fn new(path: impl Into<PathBuf>, algorithm: impl Into<String>) -> Self {
        let path = path.into();
        let mut files_dir = path.as_os_str().to_owned();
        files_dir.push("_files");
        Self {
            files_dir: PathBuf::from(files_dir),
            path,
            algorithm: algorithm.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Loads the small tier from disk and ensures the large-tier directory
    /// exists. A missing or unreadable blob is not an error (the cache is
    /// advisory); a blob that fails to parse is.
    pub fn load(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.files_dir)?;
        match fs::read(&self.path) {
            Ok(bytes) => {
                let map: HashMap<String, CacheValue> =
                    serde_json::from_slice(&bytes).map_err(CacheError::Corrupt)?;
                info!(entries = map.len(), path = %self.path.display(), "loaded cache");
                *self.entries.lock() = map;
            }
            Err(err) => {
                info!(path = %self.path.display(), %err, "no readable cache, starting empty");
            }
        }
        Ok(())
    }

    /// Rewrites the small-tier blob. Called from the main thread only.
    pub fn save(&self) -> Result<(), CacheError> {
        let bytes = {
            let entries = self.entries.lock();
            serde_json::to_vec(&*entries).map_err(CacheError::Corrupt)?
        };
        fs::write(&self.path, bytes)?;
        info!(path = %self.path.display(), "saved cache");
        Ok(())
    }

    /// Builds the canonical key for a routed connection. Nogo region codes
    /// are sorted and deduplicated so every permutation of the same set
    /// yields a byte-identical key.
    pub fn route_key(&self, src: Coordinate, dst: Coordinate, nogo_codes: &[&str]) -> String {
        let mut key = self.endpoint_prefix(src, dst);
        if !nogo_codes.is_empty() {
            let mut codes = nogo_codes.to_vec();
            codes.sort_unstable();
            codes.dedup();
            key.push(':');
            key.push_str(&codes.join(","));
        }
        key
    }

    /// Key prefix shared by all routes between two endpoints, regardless of
    /// their nogo suffix.
    pub fn endpoint_prefix(&self, src: Coordinate, dst: Coordinate) -> String {
        format!("{}:{}:{}", self.algorithm, src, dst)
    }

    /// Large-tier key holding the geometry of a routed connection.
    pub fn shape_key(route_key: &str) -> String {
        format!("{}:route", route_key)
    }

    pub fn get_route(&self, key: &str) -> Option<(Cost, Option<f64>)> {
        match self.entries.lock().get(key) {
            Some(CacheValue::Route(cost, length)) => Some((*cost, *length)),
            _ => None,
        }
    }

    pub fn set_route(&self, key: impl Into<String>, cost: Cost, length: Option<f64>) {
        self.entries
            .lock()
            .insert(key.into(), CacheValue::Route(cost, length));
    }

    /// All cached route summaries whose key starts with `prefix`, cheapest
    /// first. Used to find relaxed routes that may satisfy a stricter nogo
    /// set.
    pub fn route_candidates(&self, prefix: &str) -> Vec<(String, Cost, Option<f64>)> {
        let entries = self.entries.lock();
        let mut candidates: Vec<(String, Cost, Option<f64>)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, value)| match value {
                CacheValue::Route(cost, length) => Some((key.clone(), *cost, *length)),
                _ => None,
            })
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        candidates
    }

    pub fn get_generic(&self, key: &str) -> Option<CacheValue> {
        self.entries.lock().get(key).cloned()
    }

    pub fn set_generic(&self, key: impl Into<String>, value: CacheValue) {
        self.entries.lock().insert(key.into(), value);
    }

    /// Reads a route geometry from the large tier. Missing and unreadable
    /// files both count as a miss.
    pub fn get_shape(&self, shape_key: &str) -> Option<Vec<Coordinate>> {
        let path = self.file_path(shape_key);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(shape) => Some(shape),
            Err(err) => {
                warn!(path = %path.display(), %err, "discarding unreadable shape file");
                None
            }
        }
    }

    /// Writes a route geometry to the large tier. Safe to call from
    /// parallel workers as long as keys are distinct.
    pub fn set_shape(&self, shape_key: &str, shape: &[Coordinate]) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(shape).map_err(CacheError::Corrupt)?;
        fs::write(self.file_path(shape_key), bytes)?;
        Ok(())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.files_dir.join(key)
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bern() -> Coordinate {
        Coordinate::new(7.44, 46.94)
    }

    fn zurich() -> Coordinate {
        Coordinate::new(8.55, 47.37)
    }

    #[test]
    fn test_route_key_is_order_independent() {
        let cache = Cache::new("/tmp/unused", "valhalla");
        let a = cache.route_key(bern(), zurich(), &["CH-VS", "CH-ZH"]);
        let b = cache.route_key(bern(), zurich(), &["CH-ZH", "CH-VS"]);
        assert_eq!(a, b);
        assert_eq!(a, "valhalla:(7.44, 46.94):(8.55, 47.37):CH-VS,CH-ZH");
    }

    #[test]
    fn test_route_key_dedupes_codes() {
        let cache = Cache::new("/tmp/unused", "valhalla");
        let key = cache.route_key(bern(), zurich(), &["CH-VS", "CH-VS"]);
        assert_eq!(key, "valhalla:(7.44, 46.94):(8.55, 47.37):CH-VS");
    }

    #[test]
    fn test_route_key_without_nogos_is_the_prefix() {
        let cache = Cache::new("/tmp/unused", "valhalla");
        assert_eq!(
            cache.route_key(bern(), zurich(), &[]),
            cache.endpoint_prefix(bern(), zurich())
        );
    }

    #[test]
    fn test_candidates_sorted_by_cost() {
        let cache = Cache::new("/tmp/unused", "valhalla");
        let prefix = cache.endpoint_prefix(bern(), zurich());
        cache.set_route(format!("{}:CH-VS", prefix), Cost::Reachable(9_000), Some(80_000.0));
        cache.set_route(prefix.clone(), Cost::Reachable(7_200), Some(60_000.0));
        cache.set_route(format!("{}:CH-ZH", prefix), Cost::Unreachable, None);
        // unrelated endpoint must not appear
        cache.set_route(
            cache.endpoint_prefix(zurich(), bern()),
            Cost::Reachable(1),
            None,
        );

        let candidates = cache.route_candidates(&prefix);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].1, Cost::Reachable(7_200));
        assert_eq!(candidates[1].1, Cost::Reachable(9_000));
        assert_eq!(candidates[2].1, Cost::Unreachable);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");

        let cache = Cache::new(&path, "valhalla");
        cache.load().unwrap();
        let key = cache.route_key(bern(), zurich(), &["CH-VS"]);
        cache.set_route(key.clone(), Cost::Reachable(3_600), Some(25_500.0));
        cache.set_generic("station:7.44,46.94", CacheValue::Point(zurich()));
        cache.save().unwrap();

        let reloaded = Cache::new(&path, "valhalla");
        reloaded.load().unwrap();
        assert_eq!(
            reloaded.get_route(&key),
            Some((Cost::Reachable(3_600), Some(25_500.0)))
        );
        match reloaded.get_generic("station:7.44,46.94") {
            Some(CacheValue::Point(p)) => assert_eq!(p, zurich()),
            other => panic!("unexpected cache value: {:?}", other),
        }
    }

    #[test]
    fn test_missing_blob_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("nonexistent"), "valhalla");
        cache.load().unwrap();
        assert!(cache.get_route("anything").is_none());
    }

    #[test]
    fn test_corrupt_blob_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        fs::write(&path, b"not json").unwrap();
        let cache = Cache::new(&path, "valhalla");
        assert!(matches!(cache.load(), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn test_shape_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"), "valhalla");
        cache.load().unwrap();

        let shape = vec![bern(), Coordinate::new(7.9, 47.0), zurich()];
        let shape_key = Cache::shape_key(&cache.route_key(bern(), zurich(), &[]));
        cache.set_shape(&shape_key, &shape).unwrap();
        assert_eq!(cache.get_shape(&shape_key), Some(shape));
        assert!(cache.get_shape("valhalla:(0, 0):(1, 1):route").is_none());
    }

    #[test]
    fn test_wrong_variant_is_a_miss() {
        let cache = Cache::new("/tmp/unused", "valhalla");
        cache.set_generic("region:CH-BE", CacheValue::Cost(Cost::Reachable(1)));
        assert!(cache.get_route("region:CH-BE").is_none());
    }
}
