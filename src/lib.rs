//! Distance-matrix pipeline for a one-checkpoint-per-canton bicycle tour.
//!
//! Given geo-located checkpoints partitioned into groups, the pipeline
//! enumerates every legal selection of one checkpoint per group (a
//! "scramble"), computes a travel-time matrix for each against an external
//! bicycle router, and persists the matrices for a downstream tour solver.
//! The expensive part is routing, so everything funnels through an
//! aggressive two-tier cache:
//!
//! - [`cache`]: persistent store; route summaries in one blob, geometries
//!   as one file per key
//! - [`routing`]: cache-aware query pipeline and parallel matrix builder
//! - [`region`]: admin-region polygons, intersection tests and border
//!   crossings for the forbidden-region constraint
//! - [`engine`]: Valhalla and Brouter adapters
//! - [`scramble`]: lazy walk over the checkpoint selections
//! - [`station`]: nearest-railway-station resolver
//! - [`codec`]: matrix JSON with coordinate-tuple keys

pub mod cache;
pub mod checkpoints;
pub mod codec;
pub mod engine;
pub mod overpass;
pub mod polyline;
pub mod region;
pub mod routing;
pub mod scramble;
pub mod station;
