//! Cache-aware routing service and parallel matrix builder.
//!
//! Every query runs the same pipeline: geodesic cutoff, exact cache hit,
//! reuse of a relaxed route that happens to avoid all forbidden regions,
//! and only then a live engine call. The result of a live call (including a
//! failure, memoised as unreachable) becomes ground truth for its exact
//! (source, destination, nogos) triple.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::checkpoints::{haversine_distance, Coordinate, Cost};
use crate::codec::Matrix;
use crate::engine::RoutingEngine;
use crate::overpass::OverpassClient;
use crate::region::{Region, RegionError};

/// Legs longer than this great-circle distance are never routed: the tour
/// stays inside one country and the router is expensive.
pub const DISTANCE_CUTOFF_KM: f64 = 120.0;

#[derive(Debug)]
pub enum ServiceError {
    Region(RegionError),
    Pool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Region(e) => write!(f, "{}", e),
            ServiceError::Pool(e) => write!(f, "worker pool error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<RegionError> for ServiceError {
    fn from(e: RegionError) -> Self {
        ServiceError::Region(e)
    }
}

/// Outcome of a routing query. The geometry stays in the large cache tier
/// and is only loaded when asked for.
pub struct RoutingResult {
    route_key: String,
    cache: Arc<Cache>,
    cost: Cost,
    distance: Option<f64>,
}

impl RoutingResult {
    pub fn cost(&self) -> Cost {
        self.cost
    }

    /// Route length in meters; absent for unreachable connections.
    pub fn distance(&self) -> Option<f64> {
        self.distance
    }

    /// Loads the route geometry from the cache on demand.
    pub fn route(&self) -> Option<Vec<Coordinate>> {
        self.cache.get_shape(&Cache::shape_key(&self.route_key))
    }
}

/// Answers "fastest time from A to B given a set of forbidden regions",
/// hitting the cache as hard as possible before the routing engine.
///
/// The nogo set and the per-region border crossings are fixed at
/// construction; one service instance serves one scramble.
pub struct RoutingService {
    cache: Arc<Cache>,
    engine: Arc<dyn RoutingEngine>,
    nogos: Vec<Arc<Region>>,
    /// Union of all nogo border crossings, handed to the engine as
    /// exclusion points.
    exclusions: Vec<Coordinate>,
    pool: rayon::ThreadPool,
}

impl RoutingService {
    pub fn new(
        cache: Arc<Cache>,
        engine: Arc<dyn RoutingEngine>,
        nogos: Vec<Arc<Region>>,
        overpass: &OverpassClient,
    ) -> Result<Self, ServiceError> {
        let mut exclusions = Vec::new();
        for region in &nogos {
            exclusions.extend(region.border_crossings(&cache, overpass)?);
        }

        let workers = num_cpus::get().saturating_sub(1).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(ServiceError::Pool)?;

        Ok(Self {
            cache,
            engine,
            nogos,
            exclusions,
            pool,
        })
    }

    fn nogo_codes(&self) -> Vec<&str> {
        self.nogos.iter().map(|r| r.code()).collect()
    }

    /// Fastest connection from `src` to `dst` under this service's nogo
    /// set. Never fails: infeasible or failed routes come back as
    /// unreachable.
    pub fn query(&self, src: Coordinate, dst: Coordinate) -> RoutingResult {
        let codes = self.nogo_codes();
        let route_key = self.cache.route_key(src, dst, &codes);

        if haversine_distance(src, dst) > DISTANCE_CUTOFF_KM * 1000.0 {
            info!(%src, %dst, "points are too far apart");
            return self.result(route_key, Cost::Unreachable, None);
        }

        if let Some((cost, distance)) = self.cache.get_route(&route_key) {
            info!(%src, %dst, nogos = ?codes, "connection served from cache");
            return self.result(route_key, cost, distance);
        }

        // A route computed under a looser nogo set is also optimal for this
        // one if it happens to avoid every forbidden region: anything
        // cheaper would have shown up under the looser set too.
        if !self.nogos.is_empty() {
            let prefix = self.cache.endpoint_prefix(src, dst);
            for (candidate_key, cost, distance) in self.cache.route_candidates(&prefix) {
                if cost.is_unreachable() {
                    continue;
                }
                let Some(shape) = self.cache.get_shape(&Cache::shape_key(&candidate_key)) else {
                    continue;
                };
                if self.nogos.iter().any(|region| region.intersects(&shape)) {
                    continue;
                }
                self.cache.set_route(route_key.clone(), cost, distance);
                if let Err(err) = self.cache.set_shape(&Cache::shape_key(&route_key), &shape) {
                    warn!(%err, "failed to copy reused route geometry");
                }
                info!(%src, %dst, reused = %candidate_key, "reused relaxed route");
                return self.result(route_key, cost, distance);
            }
        }

        match self.engine.direct_connection(src, dst, &self.exclusions) {
            Ok(route) => {
                if let Err(err) = self.cache.set_shape(&Cache::shape_key(&route_key), &route.shape)
                {
                    warn!(%err, "failed to store route geometry");
                }
                let cost = Cost::from_seconds(route.time);
                self.cache.set_route(route_key.clone(), cost, route.length);
                if codes.is_empty() {
                    info!(%src, %dst, "calculated route");
                } else {
                    info!(%src, %dst, nogos = ?codes, "calculated route avoiding regions");
                }
                self.result(route_key, cost, route.length)
            }
            Err(err) => {
                warn!(%src, %dst, %err, "routing failed, memoising as unreachable");
                self.cache.set_route(route_key.clone(), Cost::Unreachable, None);
                self.result(route_key, Cost::Unreachable, None)
            }
        }
    }

    fn result(&self, route_key: String, cost: Cost, distance: Option<f64>) -> RoutingResult {
        RoutingResult {
            route_key,
            cache: self.cache.clone(),
            cost,
            distance,
        }
    }

    /// Builds the full travel-time matrix over `coordinates`. The final
    /// coordinate is the tour destination: its outgoing row is written as
    /// unreachable without consulting the engine, which forces the tour
    /// solver to place it last.
    pub fn matrix(&self, coordinates: &[Coordinate]) -> Matrix {
        let Some((&sink, _)) = coordinates.split_last() else {
            return Matrix::new();
        };

        let pairs: Vec<(Coordinate, Coordinate)> = coordinates
            .iter()
            .filter(|&&src| src != sink)
            .flat_map(|&src| {
                coordinates
                    .iter()
                    .filter(move |&&dst| dst != src)
                    .map(move |&dst| (src, dst))
            })
            .collect();

        let started = Instant::now();
        let results: Vec<(Coordinate, Coordinate, Cost)> = self.pool.install(|| {
            pairs
                .par_iter()
                .map(|&(src, dst)| (src, dst, self.query(src, dst).cost()))
                .collect()
        });

        let mut matrix = Matrix::new();
        for (src, dst, cost) in results {
            matrix.entry(src).or_insert_with(BTreeMap::new).insert(dst, cost);
        }
        let sink_row = matrix.entry(sink).or_insert_with(BTreeMap::new);
        for &dst in coordinates.iter().filter(|&&dst| dst != sink) {
            sink_row.insert(dst, Cost::Unreachable);
        }

        info!(
            nodes = coordinates.len(),
            connections = pairs.len(),
            elapsed_s = started.elapsed().as_secs(),
            "matrix complete"
        );
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheValue;
    use crate::engine::{EngineRoute, RoutingError};
    use crate::overpass;
    use geo::{LineString, MultiPolygon, Polygon};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine stub returning a fixed answer and counting calls.
    struct StubEngine {
        response: Result<EngineRoute, ()>,
        calls: AtomicUsize,
    }

    impl StubEngine {
        fn ok(time: u32, length: f64, shape: Vec<Coordinate>) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(EngineRoute {
                    time,
                    length: Some(length),
                    shape,
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err(()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RoutingEngine for StubEngine {
        fn name(&self) -> &'static str {
            "valhalla"
        }

        fn direct_connection(
            &self,
            _src: Coordinate,
            _dst: Coordinate,
            _exclude: &[Coordinate],
        ) -> Result<EngineRoute, RoutingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(route) => Ok(route.clone()),
                Err(()) => Err(RoutingError::Engine("stubbed failure".into())),
            }
        }
    }

    fn test_cache(dir: &tempfile::TempDir) -> Arc<Cache> {
        let cache = Arc::new(Cache::new(dir.path().join("cache"), "valhalla"));
        cache.load().unwrap();
        cache
    }

    fn test_overpass() -> OverpassClient {
        OverpassClient::new(overpass::DEFAULT_ENDPOINT).unwrap()
    }

    /// Rectangular region with pre-seeded (empty) border crossings so
    /// service construction needs no network.
    fn boxed_region(
        cache: &Cache,
        code: &str,
        (min_lon, min_lat): (f64, f64),
        (max_lon, max_lat): (f64, f64),
    ) -> Arc<Region> {
        cache.set_generic(
            format!("valhalla:intersection_points:{}", code),
            CacheValue::Points(vec![]),
        );
        let polygon = Polygon::new(
            LineString::from(vec![
                (min_lon, min_lat),
                (max_lon, min_lat),
                (max_lon, max_lat),
                (min_lon, max_lat),
                (min_lon, min_lat),
            ]),
            vec![],
        );
        Arc::new(Region::new(code, MultiPolygon(vec![polygon])))
    }

    fn service(
        cache: Arc<Cache>,
        engine: Arc<StubEngine>,
        nogos: Vec<Arc<Region>>,
    ) -> RoutingService {
        RoutingService::new(cache, engine, nogos, &test_overpass()).unwrap()
    }

    fn bern() -> Coordinate {
        Coordinate::new(7.44411, 46.9469)
    }

    fn zurich() -> Coordinate {
        Coordinate::new(8.5417, 47.3769)
    }

    #[test]
    fn test_cutoff_skips_engine_and_is_not_memoised() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);
        let engine = StubEngine::ok(1, 1.0, vec![]);
        let service = service(cache.clone(), engine.clone(), vec![]);

        let src = Coordinate::new(7.0, 46.0);
        let dst = Coordinate::new(9.0, 48.0); // ~270 km apart
        let result = service.query(src, dst);

        assert_eq!(result.cost(), Cost::Unreachable);
        assert_eq!(engine.calls(), 0);
        assert!(cache.get_route(&cache.route_key(src, dst, &[])).is_none());
    }

    #[test]
    fn test_query_memoises_and_reuses_exact_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);
        let shape = vec![bern(), Coordinate::new(8.0, 47.1), zurich()];
        let engine = StubEngine::ok(7_200, 95_000.0, shape.clone());
        let service = service(cache.clone(), engine.clone(), vec![]);

        let first = service.query(bern(), zurich());
        assert_eq!(first.cost(), Cost::Reachable(7_200));
        assert_eq!(first.distance(), Some(95_000.0));
        assert_eq!(first.route(), Some(shape));
        assert_eq!(engine.calls(), 1);

        let second = service.query(bern(), zurich());
        assert_eq!(second.cost(), Cost::Reachable(7_200));
        assert_eq!(engine.calls(), 1, "second query must be served from cache");
    }

    #[test]
    fn test_relaxed_route_is_reused_when_it_avoids_all_nogos() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);

        // relaxed route, geometrically clear of the nogo square
        let relaxed_key = cache.route_key(bern(), zurich(), &[]);
        let shape = vec![bern(), Coordinate::new(8.0, 47.1), zurich()];
        cache.set_route(relaxed_key.clone(), Cost::Reachable(7_200), Some(95_000.0));
        cache
            .set_shape(&Cache::shape_key(&relaxed_key), &shape)
            .unwrap();

        let nogo = boxed_region(&cache, "CH-VS", (6.0, 46.0), (7.0, 48.0)); // west of the route
        let engine = StubEngine::ok(9_999, 1.0, vec![]);
        let service = service(cache.clone(), engine.clone(), vec![nogo]);

        let result = service.query(bern(), zurich());
        assert_eq!(result.cost(), Cost::Reachable(7_200));
        assert_eq!(engine.calls(), 0, "reuse must not touch the engine");

        // copied under the stricter key, geometry included
        let strict_key = cache.route_key(bern(), zurich(), &["CH-VS"]);
        assert_eq!(
            cache.get_route(&strict_key),
            Some((Cost::Reachable(7_200), Some(95_000.0)))
        );
        assert_eq!(result.route(), Some(shape));
    }

    #[test]
    fn test_intersecting_candidate_falls_through_to_engine() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);

        let relaxed_key = cache.route_key(bern(), zurich(), &[]);
        let shape = vec![bern(), Coordinate::new(8.0, 47.1), zurich()];
        cache.set_route(relaxed_key.clone(), Cost::Reachable(7_200), Some(95_000.0));
        cache
            .set_shape(&Cache::shape_key(&relaxed_key), &shape)
            .unwrap();

        // nogo box sitting right on the cached geometry
        let nogo = boxed_region(&cache, "CH-ZH", (7.9, 46.5), (8.1, 47.5));
        let detour = vec![bern(), Coordinate::new(7.6, 47.3), zurich()];
        let engine = StubEngine::ok(8_400, 101_000.0, detour);
        let service = service(cache.clone(), engine.clone(), vec![nogo]);

        let result = service.query(bern(), zurich());
        assert_eq!(result.cost(), Cost::Reachable(8_400));
        assert_eq!(engine.calls(), 1);

        let strict_key = cache.route_key(bern(), zurich(), &["CH-ZH"]);
        assert_eq!(
            cache.get_route(&strict_key),
            Some((Cost::Reachable(8_400), Some(101_000.0)))
        );
    }

    #[test]
    fn test_engine_failure_is_memoised_as_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);
        let engine = StubEngine::failing();
        let service = service(cache.clone(), engine.clone(), vec![]);

        let result = service.query(bern(), zurich());
        assert_eq!(result.cost(), Cost::Unreachable);
        assert_eq!(result.distance(), None);
        assert_eq!(engine.calls(), 1);
        assert_eq!(
            cache.get_route(&cache.route_key(bern(), zurich(), &[])),
            Some((Cost::Unreachable, None))
        );

        // failure is ground truth now; no retry
        let again = service.query(bern(), zurich());
        assert_eq!(again.cost(), Cost::Unreachable);
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn test_restarted_service_answers_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let shape = vec![bern(), zurich()];

        {
            let cache = test_cache(&dir);
            let engine = StubEngine::ok(7_200, 95_000.0, shape.clone());
            let service = service(cache.clone(), engine, vec![]);
            service.query(bern(), zurich());
            cache.save().unwrap();
        }

        // fresh cache instance, engine that would fail if consulted
        let cache = test_cache(&dir);
        let engine = StubEngine::failing();
        let service = service(cache, engine.clone(), vec![]);
        let result = service.query(bern(), zurich());
        assert_eq!(result.cost(), Cost::Reachable(7_200));
        assert_eq!(result.route(), Some(shape));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn test_matrix_shape_and_sink_row() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir);
        let engine = StubEngine::ok(3_600, 40_000.0, vec![bern(), zurich()]);
        let service = service(cache.clone(), engine.clone(), vec![]);

        let coords = vec![
            Coordinate::new(7.1, 46.8),
            Coordinate::new(7.5, 46.9),
            Coordinate::new(8.0, 47.0),
            Coordinate::new(7.44411, 46.9469), // sink
        ];
        let matrix = service.matrix(&coords);

        assert_eq!(matrix.len(), 4);
        for (src, row) in &matrix {
            assert_eq!(row.len(), 3);
            assert!(!row.contains_key(src));
        }
        let sink_row = &matrix[&coords[3]];
        assert!(sink_row.values().all(|cost| cost.is_unreachable()));
        // only non-sink sources hit the engine
        assert_eq!(engine.calls(), 9);
    }
}
