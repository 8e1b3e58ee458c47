use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::spatial::{AdapterError, Coordinate, LngLat, SpatialIndex};

pub const DEFAULT_RESOLUTION: u8 = 7;

const KM_PER_DEGREE: f64 = 111.32;

/// Self-contained description of one cell, ready for the map frontend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellRecord {
    #[serde(skip)]
    pub id: String,
    /// Closed ring: the first vertex is repeated as the last.
    pub boundary: Vec<LngLat>,
    pub center: LngLat,
    pub neighbors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("min values must be <= max values")]
    InvalidBBox,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Result<Self, GridError> {
        // NaN fails both comparisons and is rejected too
        if !(min_lat <= max_lat) || !(min_lng <= max_lng) {
            return Err(GridError::InvalidBBox);
        }
        Ok(Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        })
    }

    /// Approximate area, treating the box as flat at its middle latitude.
    pub fn area_km2(&self) -> f64 {
        let mid_lat = ((self.min_lat + self.max_lat) / 2.0).to_radians();
        let height = (self.max_lat - self.min_lat) * KM_PER_DEGREE;
        let width = (self.max_lng - self.min_lng) * KM_PER_DEGREE * mid_lat.cos().abs();
        height * width
    }

    /// Corner ring in the order min,min -> min,max -> max,max -> max,min.
    pub fn ring(&self) -> [Coordinate; 4] {
        [
            Coordinate::new(self.min_lat, self.min_lng),
            Coordinate::new(self.min_lat, self.max_lng),
            Coordinate::new(self.max_lat, self.max_lng),
            Coordinate::new(self.max_lat, self.min_lng),
        ]
    }
}

/// A cell left out of a [`GridResult`] and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCell {
    pub id: String,
    pub error: AdapterError,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridResult {
    pub cells: BTreeMap<String, CellRecord>,
    pub resolution: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(skip)]
    pub skipped: Vec<SkippedCell>,
}

impl GridResult {
    fn from_outcomes<I>(resolution: u8, bbox: Option<BoundingBox>, outcomes: I) -> Self
    where
        I: IntoIterator<Item = Result<CellRecord, SkippedCell>>,
    {
        let mut cells = BTreeMap::new();
        let mut skipped = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(record) => {
                    cells.entry(record.id.clone()).or_insert(record);
                }
                Err(skip) => {
                    warn!(cell = %skip.id, error = %skip.error, "skipping cell");
                    skipped.push(skip);
                }
            }
        }
        Self {
            cells,
            resolution,
            bbox,
            skipped,
        }
    }
}

/// Appends the first vertex when the ring is open.
pub fn close_ring(ring: &mut Vec<LngLat>) {
    if let Some(first) = ring.first().copied() {
        if ring.last() != Some(&first) {
            ring.push(first);
        }
    }
}

/// Builds the record for a single cell: closed boundary, center and the
/// 1-ring without the cell itself.
pub fn enrich<S: SpatialIndex>(index: &S, cell: S::Cell) -> Result<CellRecord, AdapterError> {
    let mut boundary = index.boundary(cell)?;
    close_ring(&mut boundary);
    let center = index.center(cell)?;
    let neighbors = index
        .disk(cell, 1)?
        .into_iter()
        .filter(|n| *n != cell)
        .map(|n| n.to_string())
        .collect();

    Ok(CellRecord {
        id: cell.to_string(),
        boundary,
        center,
        neighbors,
    })
}

/// Lazily enriches each distinct cell once. Cells the index cannot describe
/// come out as `Err` so the caller decides what to do with them.
pub fn enrich_unique<'a, S, I>(
    index: &'a S,
    cells: I,
) -> impl Iterator<Item = Result<CellRecord, SkippedCell>> + 'a
where
    S: SpatialIndex,
    S::Cell: 'a,
    I: IntoIterator<Item = S::Cell>,
    I::IntoIter: 'a,
{
    let mut seen = HashSet::new();
    cells
        .into_iter()
        .filter(move |cell| seen.insert(*cell))
        .map(move |cell| {
            enrich(index, cell).map_err(|error| SkippedCell {
                id: cell.to_string(),
                error,
            })
        })
}

/// Cells covering `bbox` at `resolution`, via one polygon-to-cells call.
pub fn resolve_window<S: SpatialIndex>(
    index: &S,
    bbox: BoundingBox,
    resolution: u8,
) -> Result<GridResult, GridError> {
    let covering = index.polygon_cells(&bbox.ring(), resolution)?;
    debug!(cells = covering.len(), resolution, "polyfilled viewport");
    Ok(GridResult::from_outcomes(
        resolution,
        Some(bbox),
        enrich_unique(index, covering),
    ))
}

/// Regular sampling lattice for the whole-area overview grid.
///
/// Each lattice point is resolved to the cell containing it, so coverage is
/// only complete while `step_degrees` is smaller than the cell size of the
/// requested resolution. At 0.3 degrees that holds for resolution 4 and
/// coarser; finer resolutions give a sparse sample with gaps between cells.
/// Exact coverage always goes through [`resolve_window`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionLattice {
    pub bounds: BoundingBox,
    pub step_degrees: f64,
}

impl RegionLattice {
    pub const JAPAN: RegionLattice = RegionLattice {
        bounds: BoundingBox {
            min_lat: 30.0,
            min_lng: 128.0,
            max_lat: 46.0,
            max_lng: 146.0,
        },
        step_degrees: 0.3,
    };

    /// Sample points, row by row from the south-west corner. Positions are
    /// computed from the row/column index so float error does not accumulate.
    pub fn samples(&self) -> impl Iterator<Item = Coordinate> + '_ {
        let steps = |span: f64| -> u32 {
            if self.step_degrees > 0.0 {
                (span / self.step_degrees + 1e-9).floor() as u32
            } else {
                0
            }
        };
        let rows = steps(self.bounds.max_lat - self.bounds.min_lat);
        let cols = steps(self.bounds.max_lng - self.bounds.min_lng);
        (0..=rows).flat_map(move |r| {
            (0..=cols).map(move |c| {
                Coordinate::new(
                    self.bounds.min_lat + f64::from(r) * self.step_degrees,
                    self.bounds.min_lng + f64::from(c) * self.step_degrees,
                )
            })
        })
    }
}

/// Overview grid built by sampling `lattice`. Samples the index cannot place
/// are skipped; if none can be placed the first failure is returned.
pub fn resolve_region<S: SpatialIndex>(
    index: &S,
    lattice: &RegionLattice,
    resolution: u8,
) -> Result<GridResult, GridError> {
    let mut first_error = None;
    let mut sampled = Vec::new();
    for coord in lattice.samples() {
        match index.cell_at(coord, resolution) {
            Ok(cell) => sampled.push(cell),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if sampled.is_empty() {
        if let Some(e) = first_error {
            return Err(e.into());
        }
    }

    debug!(samples = sampled.len(), resolution, "sampled region lattice");
    Ok(GridResult::from_outcomes(
        resolution,
        None,
        enrich_unique(index, sampled),
    ))
}
