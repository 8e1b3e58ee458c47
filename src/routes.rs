use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::spatial::{Coordinate, LngLat};

pub const DEFAULT_ROUTES_FILE: &str = "data/cached_routes.json";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode routes: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Train,
    Walk,
    Car,
    Flight,
}

/// A named point on the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(name: &str, lat: f64, lng: f64) -> Self {
        Self {
            name: name.to_string(),
            lat,
            lng,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// One planned leg of the trip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLeg {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TravelMode,
    pub origin: Location,
    pub destination: Location,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<Location>,
    /// Planned distance in km
    pub distance: f64,
    /// Planned duration in minutes
    pub duration: u32,
}

impl RouteLeg {
    /// Origin, intermediate waypoints in order, destination.
    pub fn coordinates(&self) -> Vec<Coordinate> {
        std::iter::once(&self.origin)
            .chain(self.waypoints.iter())
            .chain(std::iter::once(&self.destination))
            .map(Location::coordinate)
            .collect()
    }
}

/// A leg with the geometry the directions provider returned for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRoute {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TravelMode,
    pub origin: Location,
    pub destination: Location,
    pub geometry: Vec<LngLat>,
    /// Meters
    pub distance: f64,
    /// Seconds
    pub duration: f64,
}

pub fn trip_routes() -> Vec<RouteLeg> {
    vec![
        RouteLeg {
            name: "Tokyo to Kyoto Shinkansen".to_string(),
            kind: TravelMode::Train,
            origin: Location::new("Tokyo Station", 35.6812, 139.7671),
            destination: Location::new("Kyoto Station", 34.9851, 135.7584),
            waypoints: vec![
                Location::new("Shinagawa", 35.6284, 139.7387),
                Location::new("Shin-Yokohama", 35.5067, 139.6174),
                Location::new("Nagoya", 35.1707, 136.8816),
            ],
            distance: 476.0,
            duration: 140,
        },
        RouteLeg {
            name: "Kyoto to Osaka Transfer".to_string(),
            kind: TravelMode::Car,
            origin: Location::new("The Hotel Seiryu Kyoto Kiyomizu", 34.9960, 135.7813),
            destination: Location::new("The Osaka Station Hotel", 34.7024, 135.4959),
            waypoints: Vec::new(),
            distance: 55.0,
            duration: 60,
        },
        RouteLeg {
            name: "Haneda Airport to Hotel".to_string(),
            kind: TravelMode::Car,
            origin: Location::new("Haneda Airport (HND)", 35.5494, 139.7798),
            destination: Location::new("HOTEL GROOVE SHINJUKU", 35.6938, 139.7036),
            waypoints: Vec::new(),
            distance: 22.0,
            duration: 35,
        },
        RouteLeg {
            name: "Osaka Hotel to Itami Airport".to_string(),
            kind: TravelMode::Car,
            origin: Location::new("The Osaka Station Hotel", 34.7024, 135.4959),
            destination: Location::new("Osaka Itami Airport (ITM)", 34.7855, 135.4381),
            waypoints: Vec::new(),
            distance: 15.0,
            duration: 25,
        },
    ]
}

/// Writes `routes` as pretty JSON, replacing `path` in one rename so readers
/// never observe a half-written file.
pub fn write_routes(path: &Path, routes: &[CachedRoute]) -> Result<(), PersistenceError> {
    let encoded = serde_json::to_vec_pretty(routes)?;
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(write_err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "routes.json".to_string());
    let tmp_path = dir.join(format!(".{file_name}.tmp"));

    let result = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(&encoded)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(e));
    }
    Ok(())
}

/// Routes with resolved geometry, loaded once at startup and read-only after.
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    routes: Vec<CachedRoute>,
}

impl RouteCatalog {
    pub fn new(routes: Vec<CachedRoute>) -> Self {
        Self { routes }
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let raw = fs::read_to_string(path).map_err(|source| PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let routes = serde_json::from_str(&raw).map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(routes))
    }

    pub fn routes(&self) -> &[CachedRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
