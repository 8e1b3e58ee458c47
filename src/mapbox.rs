use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::routes::TravelMode;
use crate::spatial::{Coordinate, LngLat};

const USER_AGENT_VALUE: &str = "trip-grid/0.1";
pub const MAPBOX_API_BASE: &str = "https://api.mapbox.com";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Mapbox token not configured")]
    MissingToken,
    #[error("invalid provider url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("no routes found")]
    NoRoutes,
}

/// Directions profiles the trip legs are fetched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Driving,
    Walking,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Driving => "mapbox/driving",
            Profile::Walking => "mapbox/walking",
        }
    }
}

impl From<TravelMode> for Profile {
    fn from(mode: TravelMode) -> Self {
        match mode {
            TravelMode::Walk => Profile::Walking,
            // no rail or air profile; road geometry is close enough for display
            TravelMode::Train | TravelMode::Car | TravelMode::Flight => Profile::Driving,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteGeometry {
    #[serde(default)]
    pub coordinates: Vec<LngLat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectionsRoute {
    pub geometry: RouteGeometry,
    pub distance: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectionsResponse {
    #[serde(default)]
    pub routes: Vec<DirectionsRoute>,
}

impl DirectionsResponse {
    /// The provider ranks candidates; the first one is authoritative.
    pub fn into_first_route(self) -> Result<DirectionsRoute, ProviderError> {
        self.routes.into_iter().next().ok_or(ProviderError::NoRoutes)
    }
}

/// Raw upstream answer, forwarded as-is by the proxy endpoints.
#[derive(Debug, Clone)]
pub struct Passthrough {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn directions(
        &self,
        profile: Profile,
        waypoints: &[Coordinate],
    ) -> Result<DirectionsResponse, ProviderError>;
}

/// Creates a new reqwest client with the appropriate user agent
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT_VALUE)
        .timeout(timeout)
        .build()
}

/// `lng,lat;lng,lat;...` as the directions API wants it.
pub fn coordinate_path(waypoints: &[Coordinate]) -> String {
    waypoints
        .iter()
        .map(|w| format!("{:.6},{:.6}", w.lng, w.lat))
        .collect::<Vec<_>>()
        .join(";")
}

#[derive(Debug, Clone)]
pub struct MapboxClient {
    client: reqwest::Client,
    token: String,
    base: Url,
}

impl MapboxClient {
    pub fn new(client: reqwest::Client, token: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_base(client, token, MAPBOX_API_BASE)
    }

    pub fn with_base(
        client: reqwest::Client,
        token: impl Into<String>,
        base: &str,
    ) -> Result<Self, ProviderError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ProviderError::MissingToken);
        }
        let base = Url::parse(base).map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client,
            token,
            base,
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("access_token", &self.token)
            .extend_pairs(query);
        Ok(url)
    }

    /// `coordinates` is the already formatted `lng,lat;...` path segment.
    pub fn directions_url(&self, profile: Profile, coordinates: &str) -> Result<Url, ProviderError> {
        let mut segments = vec!["directions", "v5"];
        segments.extend(profile.as_str().split('/'));
        segments.push(coordinates);
        self.url(
            &segments,
            &[("geometries", "geojson"), ("overview", "full")],
        )
    }

    pub fn geocoding_url(&self, query: &str) -> Result<Url, ProviderError> {
        let place = format!("{query}.json");
        self.url(
            &["geocoding", "v5", "mapbox.places", &place],
            &[("country", "JP")],
        )
    }

    async fn fetch(&self, url: Url) -> Result<Passthrough, ProviderError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(Passthrough { status, body })
    }

    /// Forwards a driving directions request without interpreting it.
    pub async fn forward_directions(&self, coordinates: &str) -> Result<Passthrough, ProviderError> {
        self.fetch(self.directions_url(Profile::Driving, coordinates)?)
            .await
    }

    /// Forwards a place search, restricted to Japan.
    pub async fn forward_geocoding(&self, query: &str) -> Result<Passthrough, ProviderError> {
        self.fetch(self.geocoding_url(query)?).await
    }
}

#[async_trait]
impl DirectionsProvider for MapboxClient {
    async fn directions(
        &self,
        profile: Profile,
        waypoints: &[Coordinate],
    ) -> Result<DirectionsResponse, ProviderError> {
        let url = self.directions_url(profile, &coordinate_path(waypoints))?;
        let Passthrough { status, body } = self.fetch(url).await?;
        if !(200..300).contains(&status) {
            return Err(ProviderError::Status { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn client() -> MapboxClient {
        MapboxClient::new(reqwest::Client::new(), "pk.test").unwrap()
    }

    #[rstest]
    #[case(TravelMode::Walk, Profile::Walking)]
    #[case(TravelMode::Car, Profile::Driving)]
    #[case(TravelMode::Train, Profile::Driving)]
    #[case(TravelMode::Flight, Profile::Driving)]
    fn every_mode_has_a_profile(#[case] mode: TravelMode, #[case] profile: Profile) {
        assert_eq!(Profile::from(mode), profile);
    }

    #[test]
    fn coordinates_are_lng_first() {
        let path = coordinate_path(&[
            Coordinate::new(35.6812, 139.7671),
            Coordinate::new(34.9851, 135.7584),
        ]);
        assert_eq!(path, "139.767100,35.681200;135.758400,34.985100");
    }

    #[test]
    fn directions_url_has_profile_and_options() {
        let url = client()
            .directions_url(Profile::Walking, "139.7,35.6;139.8,35.7")
            .unwrap();
        assert_eq!(url.host_str(), Some("api.mapbox.com"));
        assert!(url
            .path()
            .starts_with("/directions/v5/mapbox/walking/139.7,35.6"));
        let query = url.query().unwrap_or_default();
        assert!(query.contains("access_token=pk.test"));
        assert!(query.contains("geometries=geojson"));
        assert!(query.contains("overview=full"));
    }

    #[test]
    fn geocoding_query_is_escaped() {
        let url = client().geocoding_url("Kyoto Station").unwrap();
        assert_eq!(url.path(), "/geocoding/v5/mapbox.places/Kyoto%20Station.json");
        assert!(url.query().unwrap_or_default().contains("country=JP"));
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = MapboxClient::new(reqwest::Client::new(), "").unwrap_err();
        assert!(matches!(err, ProviderError::MissingToken));
    }

    #[test]
    fn first_route_is_taken() {
        let body = r#"{
            "routes": [
                {"geometry": {"type": "LineString", "coordinates": [[139.7, 35.6], [139.8, 35.7]]},
                 "distance": 1200.5, "duration": 300.0},
                {"geometry": {"type": "LineString", "coordinates": []},
                 "distance": 9.0, "duration": 9.0}
            ],
            "code": "Ok"
        }"#;
        let resp: DirectionsResponse = serde_json::from_str(body).unwrap();
        let route = resp.into_first_route().unwrap();
        assert_eq!(route.distance, 1200.5);
        assert_eq!(route.geometry.coordinates.len(), 2);
    }

    #[test]
    fn empty_route_list_is_an_error() {
        let resp: DirectionsResponse =
            serde_json::from_str(r#"{"routes": [], "code": "NoRoute"}"#).unwrap();
        assert!(matches!(resp.into_first_route(), Err(ProviderError::NoRoutes)));
    }
}
