//! Nearest railway station resolver.
//!
//! Enumerates railway stations around a point via the OSM query service and
//! scores each candidate with a routing query from the point, keeping the
//! cheapest. Both the chosen position and its travel cost are cached, so a
//! rerun answers without network traffic. A caller-supplied override skips
//! the enumeration but still resolves (and caches) the cost.

use std::fmt;

use tracing::info;

use crate::cache::{Cache, CacheError, CacheValue};
use crate::checkpoints::{Coordinate, Cost};
use crate::overpass::{OverpassClient, OverpassError};
use crate::routing::RoutingService;

/// Station search radius in km.
pub const RADIUS_KM: f64 = 20.0;

#[derive(Debug)]
pub enum StationError {
    /// No railway station inside the search radius; the caller has to
    /// provide one manually.
    NoStationInRadius(Coordinate),
    Overpass(OverpassError),
    Cache(CacheError),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::NoStationInRadius(point) => write!(
                f,
                "no station in a {}km radius around {}, provide the nearest station manually",
                RADIUS_KM, point
            ),
            StationError::Overpass(e) => write!(f, "{}", e),
            StationError::Cache(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StationError {}

impl From<OverpassError> for StationError {
    fn from(e: OverpassError) -> Self {
        StationError::Overpass(e)
    }
}

impl From<CacheError> for StationError {
    fn from(e: CacheError) -> Self {
        StationError::Cache(e)
    }
}

/// The railway station closest (by bicycle travel time) to some point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestStation {
    position: Coordinate,
    cost: Cost,
}

impl NearestStation {
    pub fn position(&self) -> Coordinate {
        self.position
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    /// Resolves the nearest station to `near`. `override_position` pins the
    /// station and skips the enumeration.
    pub fn resolve(
        cache: &Cache,
        routing: &RoutingService,
        overpass: &OverpassClient,
        near: Coordinate,
        override_position: Option<Coordinate>,
    ) -> Result<Self, StationError> {
        let position = match override_position {
            Some(position) => position,
            None => Self::lookup_position(cache, routing, overpass, near)?,
        };

        let cost_key = format!("station_cost:{},{}", position.lon, position.lat);
        let cost = match cache.get_generic(&cost_key) {
            Some(CacheValue::Cost(cost)) => cost,
            _ => {
                let cost = routing.query(near, position).cost();
                cache.set_generic(cost_key, CacheValue::Cost(cost));
                cache.save()?;
                cost
            }
        };

        Ok(Self { position, cost })
    }

    fn lookup_position(
        cache: &Cache,
        routing: &RoutingService,
        overpass: &OverpassClient,
        near: Coordinate,
    ) -> Result<Coordinate, StationError> {
        let station_key = format!("station:{},{}", near.lon, near.lat);
        if let Some(CacheValue::Point(position)) = cache.get_generic(&station_key) {
            return Ok(position);
        }

        let query = format!(
            "[out:json];(node[\"railway\"=\"station\"](around:{},{},{}););out body geom;",
            RADIUS_KM * 1000.0,
            near.lat,
            near.lon,
        );
        let response = overpass.query(&query)?;
        let candidates: Vec<Coordinate> = response
            .elements
            .iter()
            .filter_map(|e| e.node_coordinate())
            .collect();
        if candidates.is_empty() {
            return Err(StationError::NoStationInRadius(near));
        }

        let mut best: Option<(Coordinate, Cost)> = None;
        for candidate in candidates {
            let cost = routing.query(near, candidate).cost();
            match best {
                Some((_, best_cost)) if cost >= best_cost => {}
                _ => best = Some((candidate, cost)),
            }
        }
        // candidates is non-empty, so best is set
        let (position, cost) = best.ok_or(StationError::NoStationInRadius(near))?;
        info!(%near, station = %position, %cost, "resolved nearest station");

        cache.set_generic(station_key, CacheValue::Point(position));
        cache.set_generic(
            format!("station_cost:{},{}", position.lon, position.lat),
            CacheValue::Cost(cost),
        );
        cache.save()?;
        Ok(position)
    }
}
