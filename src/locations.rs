use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::grid;
use crate::routes::CachedRoute;
use crate::spatial::{AdapterError, Coordinate, SpatialIndex};

#[derive(Debug, Clone, Serialize)]
pub struct City {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

pub const CITIES: [City; 3] = [
    City {
        name: "Tokyo",
        lat: 35.6762,
        lng: 139.6503,
    },
    City {
        name: "Kyoto",
        lat: 35.0116,
        lng: 135.7681,
    },
    City {
        name: "Osaka",
        lat: 34.6937,
        lng: 135.5023,
    },
];

pub fn city_colors() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([("Tokyo", "#e74c3c"), ("Kyoto", "#3498db"), ("Osaka", "#2ecc71")])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Hotel,
    Airport,
    Station,
}

/// Point of interest on the trip
#[derive(Debug, Clone, Serialize)]
pub struct TripLocation {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: LocationKind,
    pub city: &'static str,
    pub lat: f64,
    pub lng: f64,
}

pub const TRIP_LOCATIONS: [TripLocation; 7] = [
    TripLocation {
        name: "HOTEL GROOVE SHINJUKU",
        kind: LocationKind::Hotel,
        city: "Tokyo",
        lat: 35.6938,
        lng: 139.7036,
    },
    TripLocation {
        name: "The Hotel Seiryu Kyoto Kiyomizu",
        kind: LocationKind::Hotel,
        city: "Kyoto",
        lat: 34.9960,
        lng: 135.7813,
    },
    TripLocation {
        name: "The Osaka Station Hotel",
        kind: LocationKind::Hotel,
        city: "Osaka",
        lat: 34.7024,
        lng: 135.4959,
    },
    TripLocation {
        name: "Haneda Airport",
        kind: LocationKind::Airport,
        city: "Tokyo",
        lat: 35.5494,
        lng: 139.7798,
    },
    TripLocation {
        name: "Osaka Itami Airport",
        kind: LocationKind::Airport,
        city: "Osaka",
        lat: 34.7855,
        lng: 135.4381,
    },
    TripLocation {
        name: "Tokyo Station",
        kind: LocationKind::Station,
        city: "Tokyo",
        lat: 35.6812,
        lng: 139.7671,
    },
    TripLocation {
        name: "Kyoto Station",
        kind: LocationKind::Station,
        city: "Kyoto",
        lat: 34.9851,
        lng: 135.7584,
    },
];

fn properties(value: serde_json::Value) -> Option<JsonObject> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

fn feature(value: Value, props: serde_json::Value) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: properties(props),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Trip locations as points, snapped to the center of their cell.
/// Locations the index cannot place are left out.
pub fn locations_geojson<S: SpatialIndex>(index: &S, resolution: u8) -> FeatureCollection {
    let features = TRIP_LOCATIONS
        .iter()
        .filter_map(|loc| {
            let snapped = index
                .cell_at(Coordinate::new(loc.lat, loc.lng), resolution)
                .and_then(|cell| index.center(cell).map(|center| (cell, center)));
            match snapped {
                Ok((cell, [lng, lat])) => Some(feature(
                    Value::Point(vec![lng, lat]),
                    json!({
                        "name": loc.name,
                        "type": loc.kind,
                        "city": loc.city,
                        "h3_index": cell.to_string(),
                        "resolution": resolution,
                    }),
                )),
                Err(e) => {
                    warn!(location = loc.name, error = %e, "cannot place location");
                    None
                }
            }
        })
        .collect();
    collection(features)
}

/// Cached routes as LineStrings.
pub fn route_lines_geojson(routes: &[CachedRoute]) -> FeatureCollection {
    let features = routes
        .iter()
        .map(|route| {
            feature(
                Value::LineString(route.geometry.iter().map(|p| p.to_vec()).collect()),
                json!({
                    "route_name": route.name,
                    "route_type": route.kind,
                    "distance": route.distance,
                    "duration": route.duration,
                }),
            )
        })
        .collect();
    collection(features)
}

/// Hexagon disks of `rings` k-rings around every city, one polygon feature
/// per cell. Cells shared by two disks are emitted once, for the first city.
pub fn city_coverage<S: SpatialIndex>(
    index: &S,
    resolution: u8,
    rings: u32,
) -> Result<FeatureCollection, AdapterError> {
    let colors = city_colors();
    let mut seen = HashSet::new();
    let mut features = Vec::new();

    for city in &CITIES {
        let center = index.cell_at(Coordinate::new(city.lat, city.lng), resolution)?;
        let disk = index.disk(center, rings)?;
        for outcome in grid::enrich_unique(index, disk.into_iter().filter(|c| seen.insert(*c))) {
            let record = match outcome {
                Ok(record) => record,
                Err(skip) => {
                    warn!(cell = %skip.id, error = %skip.error, "skipping cell");
                    continue;
                }
            };
            let ring = record.boundary.iter().map(|p| p.to_vec()).collect();
            features.push(feature(
                Value::Polygon(vec![ring]),
                json!({
                    "h3_index": record.id,
                    "city": city.name,
                    "color": colors.get(city.name).copied().unwrap_or("#888888"),
                    "resolution": resolution,
                }),
            ));
        }
    }
    Ok(collection(features))
}
