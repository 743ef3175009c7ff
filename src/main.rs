//! such-route CLI: builds a distance matrix for every scramble.

use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use such_route::cache::Cache;
use such_route::checkpoints::load_checkpoints;
use such_route::codec;
use such_route::engine::{Brouter, RoutingEngine, Valhalla, BROUTER_URL, VALHALLA_URL};
use such_route::overpass::{self, OverpassClient};
use such_route::region::Region;
use such_route::routing::RoutingService;
use such_route::scramble::{NogoPolicy, Scrambler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Brouter,
    Valhalla,
}

impl Backend {
    fn name(self) -> &'static str {
        match self {
            Backend::Brouter => "brouter",
            Backend::Valhalla => "valhalla",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NogoPolicyArg {
    /// Forbid the regions of the selected checkpoints
    Selected,
    /// Forbid the regions of the left-out group members
    Complement,
}

/// Creates distance matrices for the SUCH route.
#[derive(Parser)]
#[command(name = "such-route", version)]
struct Args {
    /// The checkpoint csv file
    #[arg(short, long)]
    filename: PathBuf,

    /// The routing backend
    #[arg(short, long, value_enum, default_value = "valhalla")]
    backend: Backend,

    /// Cache file prefix; geometries go to a `_files` sibling directory
    #[arg(long, default_value = ".such_route_cache")]
    cache: PathBuf,

    /// Routing engine base URL (defaults to the backend's standard port)
    #[arg(long)]
    router_url: Option<String>,

    /// Overpass endpoint for boundaries, roads and stations
    #[arg(long, default_value = overpass::DEFAULT_ENDPOINT)]
    overpass_url: String,

    /// Allow ferry legs
    #[arg(long)]
    ferries: bool,

    /// Which regions become forbidden per scramble
    #[arg(long, value_enum, default_value = "selected")]
    nogo_policy: NogoPolicyArg,

    /// Group id of the tour start (must have exactly one member)
    #[arg(long, default_value = "8")]
    start_group: String,

    /// Group id of the final destination (must have exactly one member)
    #[arg(long, default_value = "0")]
    sink_group: String,

    /// Output directory for matrix files
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,
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
    info!(count = checkpoints.len(), file = %args.filename.display(), "loaded checkpoints");

    let cache = Arc::new(Cache::new(&args.cache, args.backend.name()));
    cache.load()?;
    let overpass = OverpassClient::new(&args.overpass_url)?;

    // materialise every referenced region once, before any routing
    let mut regions: HashMap<String, Arc<Region>> = HashMap::new();
    for checkpoint in &checkpoints {
        if !regions.contains_key(&checkpoint.code) {
            let region = Region::from_code(&checkpoint.code, &cache, &overpass)?;
            regions.insert(checkpoint.code.clone(), Arc::new(region));
        }
    }
    cache.save()?;

    let policy = match args.nogo_policy {
        NogoPolicyArg::Selected => NogoPolicy::Selected,
        NogoPolicyArg::Complement => NogoPolicy::Complement,
    };
    let scrambler = Scrambler::new(&checkpoints, &args.start_group, &args.sink_group, policy)?;

    let engine: Arc<dyn RoutingEngine> = match args.backend {
        Backend::Valhalla => Arc::new(Valhalla::new(
            args.router_url.as_deref().unwrap_or(VALHALLA_URL),
            args.ferries,
        )?),
        Backend::Brouter => Arc::new(Brouter::new(
            args.router_url.as_deref().unwrap_or(BROUTER_URL),
        )?),
    };

    fs::create_dir_all(&args.results_dir)?;

    for scramble in scrambler.scrambles() {
        let nogos = scramble
            .nogos
            .iter()
            .map(|code| {
                regions
                    .get(code)
                    .cloned()
                    .ok_or_else(|| format!("checkpoint region {} was never materialised", code))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let service = RoutingService::new(cache.clone(), engine.clone(), nogos, &overpass)?;
        let matrix = service.matrix(&scramble.coordinates);

        let filename = if scramble.nogos.is_empty() {
            "distance_matrix.json".to_owned()
        } else {
            format!("distance_matrix-{}.json", scramble.nogos.join(","))
        };
        let file = fs::File::create(args.results_dir.join(&filename))?;
        let mut writer = BufWriter::new(file);
        codec::dump(&matrix, &mut writer)?;
        writer.flush()?;
        info!(file = filename, "wrote matrix");

        cache.save()?;
    }

    cache.save()?;
    Ok(())
}
