use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_TTL;
use crate::grid::DEFAULT_RESOLUTION;
use crate::routes::DEFAULT_ROUTES_FILE;

#[derive(Debug, Error, PartialEq)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Runtime settings, read from the environment (`.env` supported).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub mapbox_token: Option<String>,
    pub routes_file: PathBuf,
    pub static_dir: PathBuf,
    /// Resolution for locations and the city coverage
    pub resolution: u8,
    pub radius_km: f64,
    /// Estimated cell count above which a grid window is refused
    pub max_window_cells: u64,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            mapbox_token: None,
            routes_file: PathBuf::from(DEFAULT_ROUTES_FILE),
            static_dir: PathBuf::from("frontend/dist"),
            resolution: DEFAULT_RESOLUTION,
            radius_km: 15.0,
            max_window_cells: 200_000,
            cache_ttl: DEFAULT_TTL,
            http_timeout: Duration::from_secs(30),
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| ConfigError {
            key,
            value: raw.clone(),
        }),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parsed(&lookup, "PORT", defaults.port)?,
            mapbox_token: non_empty("MAPBOX_TOKEN"),
            routes_file: non_empty("ROUTES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.routes_file),
            static_dir: non_empty("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            resolution: parsed(&lookup, "GRID_RESOLUTION", defaults.resolution)?,
            radius_km: parsed(&lookup, "COVERAGE_RADIUS_KM", defaults.radius_km)?,
            max_window_cells: parsed(&lookup, "MAX_WINDOW_CELLS", defaults.max_window_cells)?,
            cache_ttl: Duration::from_secs(parsed(
                &lookup,
                "GRID_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            http_timeout: Duration::from_secs(parsed(
                &lookup,
                "HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
        })
    }
}
