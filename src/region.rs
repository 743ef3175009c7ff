//! Administrative regions: boundary polygons, intersection predicates and
//! border-crossing extraction.
//!
//! A region's polygon is fetched once from the boundary service and cached
//! forever; it is read-only after first materialisation. Border crossings
//! are the points where driveable roads cross the region boundary; they are
//! handed to the routing engine as exclusion points so computed routes stay
//! out of forbidden regions.

use std::fmt;

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{BoundingRect, Coord, Intersects, Line, LineString, MultiPolygon, Point, Polygon};
use tracing::info;

use crate::cache::{Cache, CacheValue};
use crate::checkpoints::Coordinate;
use crate::overpass::{OverpassClient, OverpassError};

/// Road classes considered driveable when extracting border crossings.
const DRIVEABLE_HIGHWAYS: &str = "^(motorway|trunk|primary|secondary|tertiary|unclassified|\
residential|living_street|service|(motorway|trunk|primary|secondary)_link)$";

#[derive(Debug)]
pub enum RegionError {
    Overpass(OverpassError),
    /// The boundary service has no usable relation for this code.
    NotFound(String),
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::Overpass(e) => write!(f, "boundary service error: {}", e),
            RegionError::NotFound(code) => write!(f, "no administrative boundary for {}", code),
        }
    }
}

impl std::error::Error for RegionError {}

impl From<OverpassError> for RegionError {
    fn from(e: OverpassError) -> Self {
        RegionError::Overpass(e)
    }
}

/// An administrative region identified by its ISO-3166-2 code.
#[derive(Debug, Clone)]
pub struct Region {
    code: String,
    polygon: MultiPolygon<f64>,
}

impl Region {
    pub fn new(code: impl Into<String>, polygon: MultiPolygon<f64>) -> Self {
        Self {
            code: code.into(),
            polygon,
        }
    }

    /// Returns the region for `code`, fetching and caching its boundary
    /// polygon on first reference.
    pub fn from_code(
        code: &str,
        cache: &Cache,
        overpass: &OverpassClient,
    ) -> Result<Self, RegionError> {
        let cache_key = format!("region:{}", code);
        if let Some(CacheValue::Polygon(polygon)) = cache.get_generic(&cache_key) {
            return Ok(Self::new(code, polygon));
        }

        let query = format!(
            "[out:json];(relation[\"type\"=\"boundary\"][\"boundary\"=\"administrative\"]\
[\"ISO3166-2\"=\"{}\"];);out body geom;",
            code
        );
        let response = overpass.query(&query)?;
        let relation = response
            .elements
            .iter()
            .find(|e| e.kind == "relation")
            .ok_or_else(|| RegionError::NotFound(code.to_owned()))?;

        let segments: Vec<Vec<Coord<f64>>> = relation
            .members
            .iter()
            .flatten()
            .filter(|m| m.kind == "way" && m.role == "outer")
            .filter_map(|m| m.geometry.as_ref())
            .map(|geometry| {
                geometry
                    .iter()
                    .map(|p| Coord { x: p.lon, y: p.lat })
                    .collect()
            })
            .collect();
        if segments.is_empty() {
            return Err(RegionError::NotFound(code.to_owned()));
        }

        let polygon = MultiPolygon(assemble_rings(segments));
        info!(code, rings = polygon.iter().count(), "fetched region boundary");
        cache.set_generic(cache_key, CacheValue::Polygon(polygon.clone()));
        Ok(Self::new(code, polygon))
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn polygon(&self) -> &MultiPolygon<f64> {
        &self.polygon
    }

    /// True iff the path touches the region's interior or boundary.
    pub fn intersects(&self, shape: &[Coordinate]) -> bool {
        match shape {
            [] => false,
            [point] => Point::new(point.lon, point.lat).intersects(&self.polygon),
            _ => {
                let line: LineString<f64> =
                    shape.iter().map(|c| Coord { x: c.lon, y: c.lat }).collect();
                line.intersects(&self.polygon)
            }
        }
    }

    /// Points where driveable roads belonging to this region cross its
    /// boundary. Fetched once per region and cached; duplicates are kept
    /// (the routing engine deduplicates on its side).
    pub fn border_crossings(
        &self,
        cache: &Cache,
        overpass: &OverpassClient,
    ) -> Result<Vec<Coordinate>, RegionError> {
        let cache_key = format!("valhalla:intersection_points:{}", self.code);
        if let Some(CacheValue::Points(points)) = cache.get_generic(&cache_key) {
            return Ok(points);
        }

        let bounds = self
            .polygon
            .bounding_rect()
            .ok_or_else(|| RegionError::NotFound(self.code.clone()))?;
        let query = format!(
            "[out:json][timeout:6000];rel[\"ISO3166-2\"=\"{}\"];way(r);\
way[highway~\"{}\"](around:0)({},{},{},{});out geom;",
            self.code,
            DRIVEABLE_HIGHWAYS,
            bounds.min().y,
            bounds.min().x,
            bounds.max().y,
            bounds.max().x,
        );
        let response = overpass.query(&query)?;

        let mut points = Vec::new();
        for way in response.elements.iter().filter(|e| e.kind == "way") {
            let Some(geometry) = &way.geometry else { continue };
            let road: Vec<Coordinate> = geometry.iter().map(|p| p.coordinate()).collect();
            points.extend(crossing_points(&self.polygon, &road));
        }
        info!(code = %self.code, crossings = points.len(), "extracted border crossings");
        cache.set_generic(cache_key, CacheValue::Points(points.clone()));
        Ok(points)
    }
}

/// Stitches unordered outer-boundary ways into closed rings. Ways are
/// appended end-to-end, reversed when they match backwards; a chain whose
/// continuation is missing (a data glitch on large relations) is closed
/// straight back to its start.
fn assemble_rings(mut segments: Vec<Vec<Coord<f64>>>) -> Vec<Polygon<f64>> {
    let mut rings = Vec::new();
    while let Some(mut ring) = segments.pop() {
        loop {
            if ring.len() > 2 && ring.first() == ring.last() {
                break;
            }
            let end = match ring.last() {
                Some(end) => *end,
                None => break,
            };
            let next_idx = segments
                .iter()
                .position(|s| s.first() == Some(&end) || s.last() == Some(&end));
            match next_idx {
                Some(idx) => {
                    let mut next = segments.swap_remove(idx);
                    if next.last() == Some(&end) {
                        next.reverse();
                    }
                    ring.extend(next.into_iter().skip(1));
                }
                None => {
                    if let Some(first) = ring.first().copied() {
                        ring.push(first);
                    }
                    break;
                }
            }
        }
        if ring.len() > 3 {
            rings.push(Polygon::new(LineString::from(ring), vec![]));
        }
    }
    rings
}

/// Intersection points between a road polyline and every boundary ring of
/// the polygon. Collinear overlaps contribute both overlap endpoints.
fn crossing_points(polygon: &MultiPolygon<f64>, road: &[Coordinate]) -> Vec<Coordinate> {
    let road_lines: Vec<Line<f64>> = road
        .windows(2)
        .map(|w| {
            Line::new(
                Coord { x: w[0].lon, y: w[0].lat },
                Coord { x: w[1].lon, y: w[1].lat },
            )
        })
        .collect();

    let mut points = Vec::new();
    for ring in boundary_rings(polygon) {
        for boundary_line in ring.lines() {
            for road_line in &road_lines {
                match line_intersection(boundary_line, *road_line) {
                    Some(LineIntersection::SinglePoint { intersection, .. }) => {
                        points.push(Coordinate::new(intersection.x, intersection.y));
                    }
                    Some(LineIntersection::Collinear { intersection }) => {
                        points.push(Coordinate::new(intersection.start.x, intersection.start.y));
                        points.push(Coordinate::new(intersection.end.x, intersection.end.y));
                    }
                    None => {}
                }
            }
        }
    }
    points
}

fn boundary_rings(polygon: &MultiPolygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    polygon
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors().iter()))
}
