use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{debug, info, warn};

use crate::cache::{CacheStatus, Lookup, ResponseCache};
use crate::config::Config;
use crate::error::ApiError;
use crate::grid::{self, BoundingBox, GridResult, RegionLattice, DEFAULT_RESOLUTION};
use crate::locations::{self, City, CITIES};
use crate::mapbox::{self, MapboxClient, Passthrough, ProviderError};
use crate::routes::{self, RouteCatalog, RouteLeg};
use crate::spatial::{AdapterError, Coordinate, H3Index, LngLat, SpatialIndex};

const CELL_RESOLUTION: u8 = 9;

/// What a cached grid was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridKey {
    Region { resolution: u8 },
    Window { bbox: [u64; 4], resolution: u8 },
}

impl GridKey {
    fn window(bbox: &BoundingBox, resolution: u8) -> Self {
        GridKey::Window {
            bbox: [
                bbox.min_lat.to_bits(),
                bbox.min_lng.to_bits(),
                bbox.max_lat.to_bits(),
                bbox.max_lng.to_bits(),
            ],
            resolution,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    index: H3Index,
    grid_cache: Arc<ResponseCache<GridKey, GridResult>>,
    routes: Arc<RouteCatalog>,
    mapbox: Option<MapboxClient>,
}

impl AppState {
    pub fn new(config: Config, routes: RouteCatalog) -> Result<Self, ProviderError> {
        let mapbox = match config.mapbox_token.as_deref() {
            Some(token) => {
                let client = mapbox::create_client(config.http_timeout)?;
                Some(MapboxClient::new(client, token)?)
            }
            None => None,
        };
        Ok(Self {
            grid_cache: Arc::new(ResponseCache::new(config.cache_ttl)),
            config: Arc::new(config),
            index: H3Index,
            routes: Arc::new(routes),
            mapbox,
        })
    }

    fn mapbox(&self) -> Result<&MapboxClient, ApiError> {
        self.mapbox
            .as_ref()
            .ok_or(ApiError::Upstream(ProviderError::MissingToken))
    }
}

pub fn router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    Router::new()
        .route("/api/cities", get(cities))
        .route("/api/config", get(config))
        .route("/api/routes", get(planned_routes))
        .route("/api/routes/lines", get(route_lines))
        .route("/api/locations", get(trip_locations))
        .route("/api/h3/cell", get(h3_cell))
        .route("/api/h3/ring", get(h3_ring))
        .route("/api/h3/grid", get(h3_grid))
        .route("/api/h3/grid_window", get(h3_grid_window))
        .route("/api/mapbox/directions", get(mapbox_directions))
        .route("/api/mapbox/geocoding", get(mapbox_geocoding))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Loads the route cache and serves the map API until the process stops.
/// A missing or unreadable route cache aborts startup.
pub async fn serve_map_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = RouteCatalog::load(&config.routes_file)?;
    info!(
        routes = catalog.len(),
        path = %config.routes_file.display(),
        "loaded route cache"
    );
    if catalog.is_empty() {
        warn!("route cache is empty, run with --cache-routes to fill it");
    }
    if config.mapbox_token.is_none() {
        warn!("MAPBOX_TOKEN not set, directions and geocoding proxies are disabled");
    }

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let static_dir = config.static_dir.clone();
    let app = router(AppState::new(config, catalog)?);

    let listener = TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        frontend = %static_dir.display(),
        "map server running"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

fn cached_json(lookup: Lookup<GridResult>) -> Response {
    (
        [
            ("x-cache", lookup.status.as_str().to_string()),
            ("x-generated-at", lookup.generated_at.to_rfc3339()),
        ],
        Json(lookup.value.as_ref()),
    )
        .into_response()
}

/// Runs a grid computation through the cache off the async runtime.
async fn cached_grid<F>(state: &AppState, key: GridKey, compute: F) -> Result<Response, ApiError>
where
    F: FnOnce(&H3Index) -> Result<GridResult, grid::GridError> + Send + 'static,
{
    let cache = Arc::clone(&state.grid_cache);
    let index = state.index;
    let lookup = tokio::task::spawn_blocking(move || cache.get_or_compute(key, || compute(&index)))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    if lookup.status == CacheStatus::Miss {
        debug!(
            key = ?key,
            cells = lookup.value.cells.len(),
            skipped = lookup.value.skipped.len(),
            slots = state.grid_cache.slot_count(),
            "regenerated grid"
        );
    }
    Ok(cached_json(lookup))
}

/// Trimmed query value, `None` when blank.
fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Missing or non-numeric resolutions fall back to `default`. Numbers the
/// index cannot use are an adapter error.
fn resolution_param(raw: Option<&str>, default: u8) -> Result<u8, ApiError> {
    let Some(raw) = present(raw) else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(n) => u8::try_from(n).map_err(|_| ApiError::from(AdapterError::InvalidResolution(n))),
        Err(_) => Ok(default),
    }
}

fn number_param(name: &str, raw: Option<&str>) -> Result<Option<f64>, ApiError> {
    present(raw)
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| ApiError::InvalidInput(format!("{name} must be a number")))
        })
        .transpose()
}

#[derive(Debug, Deserialize)]
struct ResolutionParams {
    resolution: Option<String>,
}

async fn h3_grid(
    State(state): State<AppState>,
    Query(params): Query<ResolutionParams>,
) -> Result<Response, ApiError> {
    let resolution = resolution_param(params.resolution.as_deref(), DEFAULT_RESOLUTION)?;
    cached_grid(&state, GridKey::Region { resolution }, move |index| {
        grid::resolve_region(index, &RegionLattice::JAPAN, resolution)
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowParams {
    min_lat: Option<String>,
    min_lng: Option<String>,
    max_lat: Option<String>,
    max_lng: Option<String>,
    resolution: Option<String>,
}

/// Cells covering the requested window.
///
/// All cells are generated and enriched in one blocking task, so the window
/// is refused up front when its estimated cell count (box area over the
/// average cell area) exceeds `MAX_WINDOW_CELLS`.
async fn h3_grid_window(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Response, ApiError> {
    let bounds = (
        number_param("minLat", params.min_lat.as_deref())?,
        number_param("minLng", params.min_lng.as_deref())?,
        number_param("maxLat", params.max_lat.as_deref())?,
        number_param("maxLng", params.max_lng.as_deref())?,
    );
    let (Some(min_lat), Some(min_lng), Some(max_lat), Some(max_lng)) = bounds else {
        return Err(ApiError::InvalidInput(
            "minLat, minLng, maxLat, and maxLng parameters are required".to_string(),
        ));
    };
    let bbox = BoundingBox::new(min_lat, min_lng, max_lat, max_lng)?;
    let resolution = resolution_param(params.resolution.as_deref(), DEFAULT_RESOLUTION)?;

    let estimate = bbox.area_km2() / H3Index::cell_area_km2(resolution)?;
    let limit = state.config.max_window_cells;
    if estimate > limit as f64 {
        return Err(ApiError::InvalidInput(format!(
            "window too large: about {} cells at resolution {resolution}, limit is {limit}",
            estimate.round() as u64
        )));
    }

    cached_grid(&state, GridKey::window(&bbox, resolution), move |index| {
        grid::resolve_window(index, bbox, resolution)
    })
    .await
}

#[derive(Debug, Deserialize)]
struct CellParams {
    lat: Option<String>,
    lng: Option<String>,
    resolution: Option<String>,
}

#[derive(Debug, Serialize)]
struct CellResponse {
    h3_index: String,
    boundary: Vec<LngLat>,
}

fn closed_boundary(index: &H3Index, cell: h3o::CellIndex) -> Result<Vec<LngLat>, AdapterError> {
    let mut boundary = index.boundary(cell)?;
    grid::close_ring(&mut boundary);
    Ok(boundary)
}

async fn h3_cell(
    State(state): State<AppState>,
    Query(params): Query<CellParams>,
) -> Result<Json<CellResponse>, ApiError> {
    let coords = (
        number_param("lat", params.lat.as_deref())?,
        number_param("lng", params.lng.as_deref())?,
    );
    let (Some(lat), Some(lng)) = coords else {
        return Err(ApiError::InvalidInput(
            "lat and lng parameters required".to_string(),
        ));
    };
    let resolution = resolution_param(params.resolution.as_deref(), CELL_RESOLUTION)?;
    let cell = state.index.cell_at(Coordinate::new(lat, lng), resolution)?;
    Ok(Json(CellResponse {
        h3_index: cell.to_string(),
        boundary: closed_boundary(&state.index, cell)?,
    }))
}

#[derive(Debug, Deserialize)]
struct RingParams {
    h3_index: Option<String>,
}

#[derive(Debug, Serialize)]
struct RingResponse {
    ring: Vec<CellResponse>,
}

async fn h3_ring(
    State(state): State<AppState>,
    Query(params): Query<RingParams>,
) -> Result<Json<RingResponse>, ApiError> {
    let raw = params
        .h3_index
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("h3_index parameter required".to_string()))?;
    let center = state
        .index
        .parse_cell(&raw)
        .map_err(|_| ApiError::InvalidInput("invalid h3_index".to_string()))?;

    let ring = state
        .index
        .disk(center, 1)?
        .into_iter()
        .filter(|cell| *cell != center)
        .filter_map(|cell| match closed_boundary(&state.index, cell) {
            Ok(boundary) => Some(CellResponse {
                h3_index: cell.to_string(),
                boundary,
            }),
            Err(e) => {
                warn!(cell = %cell, error = %e, "skipping ring cell");
                None
            }
        })
        .collect();
    Ok(Json(RingResponse { ring }))
}

#[derive(Serialize)]
struct CitiesResponse {
    cities: Vec<City>,
    colors: BTreeMap<&'static str, &'static str>,
}

async fn cities() -> Json<CitiesResponse> {
    Json(CitiesResponse {
        cities: CITIES.to_vec(),
        colors: locations::city_colors(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    resolution: u8,
    radius_km: f64,
}

async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        resolution: state.config.resolution,
        radius_km: state.config.radius_km,
    })
}

#[derive(Serialize)]
struct RoutesResponse {
    routes: Vec<RouteLeg>,
}

async fn planned_routes() -> Json<RoutesResponse> {
    Json(RoutesResponse {
        routes: routes::trip_routes(),
    })
}

async fn route_lines(State(state): State<AppState>) -> Json<FeatureCollection> {
    Json(locations::route_lines_geojson(state.routes.routes()))
}

async fn trip_locations(State(state): State<AppState>) -> Json<FeatureCollection> {
    Json(locations::locations_geojson(
        &state.index,
        state.config.resolution,
    ))
}

fn passthrough(upstream: Passthrough) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        upstream.body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct DirectionsParams {
    coordinates: Option<String>,
}

async fn mapbox_directions(
    State(state): State<AppState>,
    Query(params): Query<DirectionsParams>,
) -> Result<Response, ApiError> {
    let client = state.mapbox()?;
    let coordinates = params
        .coordinates
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("coordinates parameter required".to_string()))?;
    Ok(passthrough(client.forward_directions(&coordinates).await?))
}

#[derive(Debug, Deserialize)]
struct GeocodingParams {
    q: Option<String>,
}

async fn mapbox_geocoding(
    State(state): State<AppState>,
    Query(params): Query<GeocodingParams>,
) -> Result<Response, ApiError> {
    let client = state.mapbox()?;
    let query = params
        .q
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("q parameter required".to_string()))?;
    Ok(passthrough(client.forward_geocoding(&query).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::tests::sample_route;
    use axum::body::{self, Body};
    use axum::http::Request;
    use rstest::rstest;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let catalog = RouteCatalog::new(vec![sample_route("a"), sample_route("b")]);
        router(AppState::new(Config::default(), catalog).unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Option<String>, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let cache = resp
            .headers()
            .get("x-cache")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, cache, body)
    }

    const TOKYO_WINDOW: &str =
        "/api/h3/grid_window?minLat=35.0&minLng=139.0&maxLat=35.1&maxLng=139.1&resolution=7";

    #[tokio::test]
    async fn window_is_cached_between_requests() {
        let app = app();

        let (status, cache, body) = get_json(app.clone(), TOKYO_WINDOW).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("MISS"));
        assert_eq!(body["resolution"], 7);
        assert_eq!(body["bbox"]["minLat"], 35.0);
        assert_eq!(body["bbox"]["maxLng"], 139.1);
        let cells = body["cells"].as_object().unwrap();
        assert!(!cells.is_empty());
        let some_cell = cells.values().next().unwrap();
        let ring = some_cell["boundary"].as_array().unwrap();
        assert_eq!(ring.first(), ring.last());
        assert!(some_cell["neighbors"].as_array().unwrap().len() >= 5);

        let (status, cache, again) = get_json(app, TOKYO_WINDOW).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("HIT"));
        assert_eq!(again, body);
    }

    #[tokio::test]
    async fn window_requires_every_bound() {
        let (status, _, body) =
            get_json(app(), "/api/h3/grid_window?minLat=35.0&minLng=139.0&maxLat=35.1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let (status, cache, _) = get_json(
            app(),
            "/api/h3/grid_window?minLat=36.0&minLng=139.0&maxLat=35.0&maxLng=139.1",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(cache.is_none());
    }

    #[tokio::test]
    async fn out_of_range_resolution_is_a_server_error() {
        let (status, _, _) = get_json(
            app(),
            "/api/h3/grid_window?minLat=35.0&minLng=139.0&maxLat=35.1&maxLng=139.1&resolution=20",
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn non_numeric_resolution_falls_back_to_default() {
        let (status, _, body) = get_json(
            app(),
            "/api/h3/grid_window?minLat=35.0&minLng=139.0&maxLat=35.1&maxLng=139.1&resolution=abc",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resolution"], 7);
    }

    #[rstest]
    #[case("/api/h3/grid_window?minLat=35.0&minLng=139.0&maxLat=35.1&maxLng=139.1&resolution=300")]
    #[case("/api/h3/grid?resolution=-1")]
    #[case("/api/h3/cell?lat=35.6812&lng=139.7671&resolution=300")]
    #[tokio::test]
    async fn unusable_resolution_number_is_a_json_error(#[case] uri: &str) {
        let (status, _, body) = get_json(app(), uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("invalid resolution"));
    }

    #[rstest]
    #[case("/api/h3/grid_window?minLat=north&minLng=139.0&maxLat=35.1&maxLng=139.1", "minLat")]
    #[case("/api/h3/grid_window?minLat=35.0&minLng=139.0&maxLat=35.1&maxLng=139,1", "maxLng")]
    #[case("/api/h3/cell?lat=35.6812&lng=east", "lng")]
    #[tokio::test]
    async fn non_numeric_coordinate_is_a_json_client_error(#[case] uri: &str, #[case] name: &str) {
        let (status, cache, body) = get_json(app(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(cache.is_none());
        assert_eq!(body["error"], format!("{name} must be a number"));
    }

    #[tokio::test]
    async fn oversized_window_is_refused_before_generation() {
        let (status, cache, body) = get_json(
            app(),
            "/api/h3/grid_window?minLat=-80&minLng=-180&maxLat=80&maxLng=180&resolution=15",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(cache.is_none());
        assert!(body["error"].as_str().unwrap().contains("window too large"));
    }

    #[tokio::test]
    async fn window_limit_follows_config() {
        let config = Config {
            max_window_cells: 5,
            ..Config::default()
        };
        let app = router(AppState::new(config, RouteCatalog::default()).unwrap());
        let (status, _, _) = get_json(app, TOKYO_WINDOW).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn overview_grid_has_no_bbox() {
        let (status, cache, body) = get_json(app(), "/api/h3/grid?resolution=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.as_deref(), Some("MISS"));
        assert_eq!(body["resolution"], 3);
        assert!(body.get("bbox").is_none());
        assert!(!body["cells"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cell_lookup_returns_closed_hexagon() {
        let (status, _, body) =
            get_json(app(), "/api/h3/cell?lat=35.6812&lng=139.7671").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["boundary"].as_array().unwrap().len(), 7);
        assert!(body["h3_index"].as_str().unwrap().starts_with("89"));
    }

    #[tokio::test]
    async fn cell_lookup_requires_coordinates() {
        let (status, _, _) = get_json(app(), "/api/h3/cell?lat=35.6812").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ring_lists_six_neighbors() {
        let (_, _, cell) = get_json(app(), "/api/h3/cell?lat=35.6812&lng=139.7671&resolution=7").await;
        let index = cell["h3_index"].as_str().unwrap().to_string();

        let (status, _, body) = get_json(app(), &format!("/api/h3/ring?h3_index={index}")).await;
        assert_eq!(status, StatusCode::OK);
        let ring = body["ring"].as_array().unwrap();
        assert_eq!(ring.len(), 6);
        assert!(ring.iter().all(|c| c["h3_index"] != index.as_str()));
    }

    #[tokio::test]
    async fn ring_rejects_garbage_index() {
        let (status, _, _) = get_json(app(), "/api/h3/ring?h3_index=zzz").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn route_lines_come_from_the_catalog() {
        let (status, _, body) = get_json(app(), "/api/routes/lines").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "FeatureCollection");
        assert_eq!(body["features"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn static_dataset_endpoints() {
        let (_, _, cities) = get_json(app(), "/api/cities").await;
        assert_eq!(cities["cities"].as_array().unwrap().len(), 3);
        assert_eq!(cities["colors"]["Tokyo"], "#e74c3c");

        let (_, _, config) = get_json(app(), "/api/config").await;
        assert_eq!(config["resolution"], 7);
        assert_eq!(config["radiusKm"], 15.0);

        let (_, _, routes) = get_json(app(), "/api/routes").await;
        assert_eq!(routes["routes"][0]["type"], "train");

        let (_, _, locations) = get_json(app(), "/api/locations").await;
        assert_eq!(locations["features"].as_array().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn proxies_need_a_token() {
        let (status, _, body) =
            get_json(app(), "/api/mapbox/directions?coordinates=139.7,35.6;139.8,35.7").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Mapbox token not configured");

        let (status, _, _) = get_json(app(), "/api/mapbox/geocoding?q=Kyoto").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
