use clap::Parser;
use dotenvy::dotenv;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod error;
mod grid;
mod locations;
mod map_server;
mod mapbox;
mod pipeline;
mod routes;
mod spatial;

use config::Config;
use spatial::H3Index;

#[derive(Debug, Parser)]
#[command(name = "trip_grid", about = "Trip map API with an H3 grid and cached routes")]
struct Cli {
    /// Fetch route geometry from Mapbox and write the route cache, then exit
    #[arg(long)]
    cache_routes: bool,

    /// Write hexagon coverage around each city as GeoJSON to this path, then exit
    #[arg(long, value_name = "PATH")]
    generate: Option<PathBuf>,

    /// Port for the map server (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Route cache location (overrides ROUTES_FILE)
    #[arg(long, value_name = "PATH")]
    routes_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env if present
    if let Err(e) = dotenv() {
        if !e.not_found() {
            eprintln!("Could not load .env: {}", e);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.routes_file {
        config.routes_file = path;
    }

    if args.cache_routes {
        return cache_routes(&config).await;
    }

    if let Some(out) = args.generate {
        return generate_coverage(&config, &out);
    }

    if let Err(e) = map_server::serve_map_server(config).await {
        error!(error = %e, "map server stopped");
        return Err(e);
    }
    Ok(())
}

async fn cache_routes(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let token = config
        .mapbox_token
        .as_deref()
        .ok_or("MAPBOX_TOKEN not set. Populate .env first.")?;
    let client = mapbox::MapboxClient::new(mapbox::create_client(config.http_timeout)?, token)?;

    let legs = routes::trip_routes();
    info!(legs = legs.len(), "fetching real routes from Mapbox");
    let report = pipeline::run(&client, &legs, &config.routes_file).await?;

    let failed = report.failures().count();
    if failed > 0 {
        warn!(failed, "some legs were left out of the route cache");
    }
    info!(
        cached = legs.len() - failed,
        path = %config.routes_file.display(),
        "route cache ready"
    );
    Ok(())
}

fn generate_coverage(config: &Config, out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let rings = H3Index::rings_for_radius(config.resolution, config.radius_km)?;
    info!(
        resolution = config.resolution,
        radius_km = config.radius_km,
        rings,
        "generating city coverage"
    );
    let coverage = locations::city_coverage(&H3Index, config.resolution, rings)?;
    fs::write(out, serde_json::to_string_pretty(&coverage)?)?;
    info!(
        cells = coverage.features.len(),
        path = %out.display(),
        "wrote city coverage"
    );
    Ok(())
}
