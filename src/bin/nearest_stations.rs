//! Resolves the closest railway station for every checkpoint in a CSV.
//!
//! Checkpoints with a manual station override keep it; the rest are looked
//! up via the OSM query service and scored by bicycle travel time. A
//! checkpoint with no station in range is reported and skipped.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use such_route::cache::Cache;
use such_route::checkpoints::load_checkpoints;
use such_route::engine::{Valhalla, VALHALLA_URL};
use such_route::overpass::{self, OverpassClient};
use such_route::routing::RoutingService;
use such_route::station::NearestStation;

/// Lists the nearest railway station per checkpoint.
#[derive(Parser)]
#[command(name = "nearest-stations", version)]
struct Args {
    /// The checkpoint csv file
    #[arg(short, long)]
    filename: PathBuf,

    /// Cache file prefix
    #[arg(long, default_value = ".such_route_cache")]
    cache: PathBuf,

    /// Valhalla base URL
    #[arg(long, default_value = VALHALLA_URL)]
    router_url: String,

    /// Overpass endpoint
    #[arg(long, default_value = overpass::DEFAULT_ENDPOINT)]
    overpass_url: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("such_route=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let checkpoints = load_checkpoints(&args.filename)?;

    let cache = Arc::new(Cache::new(&args.cache, "valhalla"));
    cache.load()?;
    let overpass = OverpassClient::new(&args.overpass_url)?;
    let engine = Arc::new(Valhalla::new(&args.router_url, false)?);
    let routing = RoutingService::new(cache.clone(), engine, vec![], &overpass)?;

    for checkpoint in &checkpoints {
        match NearestStation::resolve(
            &cache,
            &routing,
            &overpass,
            checkpoint.coord,
            checkpoint.station,
        ) {
            Ok(station) => println!(
                "{};{};{};{}",
                checkpoint.label,
                station.position().lat,
                station.position().lon,
                station.cost()
            ),
            Err(err) => warn!(label = %checkpoint.label, %err, "skipping checkpoint"),
        }
    }

    cache.save()?;
    Ok(())
}
