//! Population grid dataset: tile polygons with population and ambient
//! traffic attributes, loaded from GeoJSON.

use std::path::Path;

use geo_types::{Geometry, Polygon};
use geojson::GeoJson;

use crate::error::{Result, RiskError};

/// One cell of the population grid. Immutable for the lifetime of a
/// loaded dataset.
#[derive(Debug, Clone)]
pub struct GridTile {
    pub polygon: Polygon<f64>,
    /// Population count `B`; absent or null in the source means 0
    pub population: f64,
    /// Aggregate ambient dwell time `T` attributable to this tile, seconds
    pub dwell_time_s: f64,
    /// Representative ambient speed `v`, m/s
    pub mean_speed_mps: f64,
    /// Drone density `Dn`; None when the dataset has no first-party data
    pub drone_density: Option<f64>,
}

/// A loaded dataset plus the attributes derived once per load.
#[derive(Debug, Clone)]
pub struct PopulationGrid {
    pub tiles: Vec<GridTile>,
    /// NMAC base probability factor `p`, assumed uniform and read from
    /// the first tile
    pub base_probability: f64,
    /// Dataset-wide sum of `Dn`, the first-party normalization constant
    pub total_drone_density: f64,
    /// Whether any tile carries a `Dn` attribute
    pub has_drone_density: bool,
}

impl PopulationGrid {
    /// A dataset with no tiles; every statistic computed against it is zero.
    pub fn empty() -> Self {
        Self {
            tiles: Vec::new(),
            base_probability: 0.0,
            total_drone_density: 0.0,
            has_drone_density: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Load a dataset from a GeoJSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RiskError::DatasetRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_geojson_str(&raw)
    }

    /// Parse a dataset from a GeoJSON FeatureCollection string.
    ///
    /// Tiles with malformed or missing geometry are skipped with a
    /// warning instead of failing the whole load.
    pub fn from_geojson_str(raw: &str) -> Result<Self> {
        let geojson: GeoJson = raw.parse()?;
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(RiskError::NotAFeatureCollection),
        };

        let mut tiles = Vec::with_capacity(collection.features.len());
        let mut has_drone_density = false;
        let mut base_probability = None;
        let mut skipped = 0usize;

        for (position, feature) in collection.features.into_iter().enumerate() {
            let Some(polygon) = feature
                .geometry
                .as_ref()
                .and_then(|g| tile_polygon(g.value.clone()))
            else {
                tracing::warn!(tile = position, "skipping tile with unusable geometry");
                skipped += 1;
                continue;
            };

            let number = |key: &str| feature.property(key).and_then(|v| v.as_f64());

            if base_probability.is_none() {
                base_probability = number("p");
            }
            let drone_density = number("Dn");
            if feature.property("Dn").is_some() {
                has_drone_density = true;
            }

            tiles.push(GridTile {
                polygon,
                population: number("B").unwrap_or(0.0),
                dwell_time_s: number("T").unwrap_or(0.0),
                mean_speed_mps: number("v").unwrap_or(0.0),
                drone_density,
            });
        }

        let total_drone_density: f64 = tiles
            .iter()
            .filter_map(|tile| tile.drone_density)
            .sum();

        if skipped > 0 {
            tracing::warn!(skipped, kept = tiles.len(), "excluded malformed tiles");
        }
        tracing::info!(
            tiles = tiles.len(),
            has_drone_density,
            total_drone_density,
            "loaded population grid"
        );

        Ok(Self {
            tiles,
            base_probability: base_probability.unwrap_or(0.0),
            total_drone_density,
            has_drone_density,
        })
    }
}

/// Convert a feature geometry into a tile polygon, rejecting anything
/// that is not a finite-coordinate polygon. Multi-polygons keep their
/// first ring set, matching the square-tile shape of the source data.
fn tile_polygon(value: geojson::Value) -> Option<Polygon<f64>> {
    let geometry = Geometry::<f64>::try_from(value).ok()?;
    let polygon = match geometry {
        Geometry::Polygon(p) => p,
        Geometry::MultiPolygon(mp) => mp.0.into_iter().next()?,
        _ => return None,
    };
    if polygon.exterior().0.len() < 4 {
        return None;
    }
    let finite = polygon
        .exterior()
        .0
        .iter()
        .all(|c| c.x.is_finite() && c.y.is_finite());
    finite.then_some(polygon)
}
