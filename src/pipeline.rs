//! Offline route precomputation.
//!
//! Legs are fetched one after another (provider rate limits, stable output
//! order). A leg that fails is reported and left out; it never stops the run.

use std::path::Path;
use tracing::{info, warn};

use crate::mapbox::{DirectionsProvider, Profile, ProviderError};
use crate::routes::{self, CachedRoute, PersistenceError, RouteLeg};

/// What happened to one leg.
#[derive(Debug)]
pub struct LegOutcome {
    pub name: String,
    pub result: Result<CachedRoute, ProviderError>,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub outcomes: Vec<LegOutcome>,
}

impl PipelineReport {
    /// Successful routes in leg order.
    pub fn routes(&self) -> Vec<CachedRoute> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .cloned()
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ProviderError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name.as_str(), e)))
    }
}

pub async fn fetch_leg<P>(provider: &P, leg: &RouteLeg) -> Result<CachedRoute, ProviderError>
where
    P: DirectionsProvider + ?Sized,
{
    let profile = Profile::from(leg.kind);
    let route = provider
        .directions(profile, &leg.coordinates())
        .await?
        .into_first_route()?;

    Ok(CachedRoute {
        name: leg.name.clone(),
        kind: leg.kind,
        origin: leg.origin.clone(),
        destination: leg.destination.clone(),
        geometry: route.geometry.coordinates,
        distance: route.distance,
        duration: route.duration,
    })
}

pub async fn fetch_all<P>(provider: &P, legs: &[RouteLeg]) -> PipelineReport
where
    P: DirectionsProvider + ?Sized,
{
    let mut outcomes = Vec::with_capacity(legs.len());
    for leg in legs {
        info!(leg = %leg.name, kind = ?leg.kind, "fetching route");
        let result = fetch_leg(provider, leg).await;
        match &result {
            Ok(route) => info!(
                leg = %leg.name,
                km = route.distance / 1000.0,
                minutes = route.duration / 60.0,
                "got route"
            ),
            Err(e) => warn!(leg = %leg.name, error = %e, "skipping leg"),
        }
        outcomes.push(LegOutcome {
            name: leg.name.clone(),
            result,
        });
    }
    PipelineReport { outcomes }
}

/// Fetches every leg and writes the successful ones to `out`.
pub async fn run<P>(
    provider: &P,
    legs: &[RouteLeg],
    out: &Path,
) -> Result<PipelineReport, PersistenceError>
where
    P: DirectionsProvider + ?Sized,
{
    let report = fetch_all(provider, legs).await;
    let routes = report.routes();
    routes::write_routes(out, &routes)?;
    info!(
        cached = routes.len(),
        failed = report.failures().count(),
        path = %out.display(),
        "wrote route cache"
    );
    Ok(report)
}
