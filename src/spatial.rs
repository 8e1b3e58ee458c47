//! Hexagonal spatial index seam.
//!
//! Grid code only talks to [`SpatialIndex`]; [`H3Index`] is the production
//! implementation on top of `h3o`.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use geo::{LineString, Polygon as GeoPolygon};
use h3o::geom::{PolyfillConfig, Polygon, ToCells};
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `[lng, lat]` pair, the order GeoJSON and the map frontend expect.
pub type LngLat = [f64; 2];

/// WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    #[error("invalid coordinate ({lat}, {lng}): {reason}")]
    InvalidCoordinate { lat: f64, lng: f64, reason: String },
    #[error("invalid resolution {0}")]
    InvalidResolution(i64),
    #[error("invalid polygon: {0}")]
    InvalidGeometry(String),
    #[error("invalid cell index {0:?}")]
    InvalidCell(String),
    #[error("spatial index failure for {cell}: {reason}")]
    Cell { cell: String, reason: String },
}

/// Primitive operations of a discrete global grid.
pub trait SpatialIndex: Send + Sync {
    type Cell: Copy + Eq + Hash + fmt::Display + Send + Sync;

    fn cell_at(&self, coord: Coordinate, resolution: u8) -> Result<Self::Cell, AdapterError>;

    /// Cell outline as returned by the index. May or may not repeat the
    /// first vertex at the end.
    fn boundary(&self, cell: Self::Cell) -> Result<Vec<LngLat>, AdapterError>;

    fn center(&self, cell: Self::Cell) -> Result<LngLat, AdapterError>;

    /// All cells within `k` grid steps, including `cell` itself.
    fn disk(&self, cell: Self::Cell, k: u32) -> Result<Vec<Self::Cell>, AdapterError>;

    /// Cells covering the polygon described by `ring` (implicitly closed).
    fn polygon_cells(
        &self,
        ring: &[Coordinate],
        resolution: u8,
    ) -> Result<Vec<Self::Cell>, AdapterError>;
}

/// Uber H3 grid via `h3o`.
#[derive(Debug, Clone, Copy, Default)]
pub struct H3Index;

impl H3Index {
    pub fn resolution(resolution: u8) -> Result<Resolution, AdapterError> {
        Resolution::try_from(resolution)
            .map_err(|_| AdapterError::InvalidResolution(resolution.into()))
    }

    pub fn parse_cell(&self, raw: &str) -> Result<CellIndex, AdapterError> {
        CellIndex::from_str(raw.trim()).map_err(|_| AdapterError::InvalidCell(raw.to_string()))
    }

    /// Average cell area at `resolution`.
    pub fn cell_area_km2(resolution: u8) -> Result<f64, AdapterError> {
        Ok(Self::resolution(resolution)?.area_km2())
    }

    /// Number of k-rings needed for a disk to reach `radius_km` from its
    /// center cell.
    ///
    /// Adjacent hexagon centers are roughly `sqrt(3) * edge` apart, so the
    /// answer is only as good as the average edge length of the resolution;
    /// cells far from the average (near pentagons) get slightly more or less
    /// coverage.
    pub fn rings_for_radius(resolution: u8, radius_km: f64) -> Result<u32, AdapterError> {
        let res = Self::resolution(resolution)?;
        let spacing_km = res.edge_length_km() * 3f64.sqrt();
        if radius_km <= 0.0 || spacing_km <= 0.0 {
            return Ok(0);
        }
        Ok((radius_km / spacing_km).ceil() as u32)
    }
}

fn to_lng_lat(ll: LatLng) -> LngLat {
    [ll.lng(), ll.lat()]
}

impl SpatialIndex for H3Index {
    type Cell = CellIndex;

    fn cell_at(&self, coord: Coordinate, resolution: u8) -> Result<CellIndex, AdapterError> {
        let res = Self::resolution(resolution)?;
        let ll = LatLng::new(coord.lat, coord.lng).map_err(|e| AdapterError::InvalidCoordinate {
            lat: coord.lat,
            lng: coord.lng,
            reason: e.to_string(),
        })?;
        Ok(ll.to_cell(res))
    }

    fn boundary(&self, cell: CellIndex) -> Result<Vec<LngLat>, AdapterError> {
        let boundary = cell.boundary();
        if boundary.is_empty() {
            return Err(AdapterError::Cell {
                cell: cell.to_string(),
                reason: "empty boundary".to_string(),
            });
        }
        Ok(boundary.iter().copied().map(to_lng_lat).collect())
    }

    fn center(&self, cell: CellIndex) -> Result<LngLat, AdapterError> {
        Ok(to_lng_lat(LatLng::from(cell)))
    }

    fn disk(&self, cell: CellIndex, k: u32) -> Result<Vec<CellIndex>, AdapterError> {
        Ok(cell.grid_disk::<Vec<_>>(k))
    }

    fn polygon_cells(
        &self,
        ring: &[Coordinate],
        resolution: u8,
    ) -> Result<Vec<CellIndex>, AdapterError> {
        let res = Self::resolution(resolution)?;
        let exterior: LineString<f64> = ring
            .iter()
            .map(|c| (c.lng, c.lat))
            .collect::<Vec<_>>()
            .into();
        let polygon = Polygon::from_degrees(GeoPolygon::new(exterior, Vec::new()))
            .map_err(|e| AdapterError::InvalidGeometry(e.to_string()))?;
        Ok(polygon.to_cells(PolyfillConfig::new(res)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKYO_STATION: Coordinate = Coordinate::new(35.6812, 139.7671);

    #[test]
    fn same_coordinate_maps_to_same_cell() {
        let index = H3Index;
        let a = index.cell_at(TOKYO_STATION, 9).unwrap();
        let b = index.cell_at(TOKYO_STATION, 9).unwrap();
        assert_eq!(a, b);
        assert_eq!(index.parse_cell(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn invalid_resolution_is_an_adapter_error() {
        let err = H3Index.cell_at(TOKYO_STATION, 42).unwrap_err();
        assert_eq!(err, AdapterError::InvalidResolution(42));
    }

    #[test]
    fn invalid_latitude_is_an_adapter_error() {
        let err = H3Index
            .cell_at(Coordinate::new(f64::NAN, 139.0), 7)
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidCoordinate { .. }));
    }

    #[test]
    fn disk_of_one_contains_center_and_six_neighbors() {
        let index = H3Index;
        let cell = index.cell_at(TOKYO_STATION, 7).unwrap();
        let disk = index.disk(cell, 1).unwrap();
        assert_eq!(disk.len(), 7);
        assert!(disk.contains(&cell));
    }

    #[test]
    fn garbage_cell_string_is_rejected() {
        assert!(matches!(
            H3Index.parse_cell("not-a-cell"),
            Err(AdapterError::InvalidCell(_))
        ));
    }

    #[test]
    fn ring_count_grows_with_radius() {
        let near = H3Index::rings_for_radius(7, 2.0).unwrap();
        let far = H3Index::rings_for_radius(7, 15.0).unwrap();
        assert!(near >= 1);
        assert!(far > near);
        assert_eq!(H3Index::rings_for_radius(7, 0.0).unwrap(), 0);
    }
}
