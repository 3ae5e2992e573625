//! Bounding-box prefilter over the population grid.
//!
//! Tile selection is a superset pass: every tile whose bounding box
//! touches a buffer's bounding box is selected, and the exact polygon
//! intersection happens later in the scan workers.

use geo::BoundingRect;
use geo_types::MultiPolygon;
use rstar::{RTree, RTreeObject, AABB};

use crate::grid::PopulationGrid;

#[derive(Debug, Clone)]
struct TileEntry {
    bbox: AABB<[f64; 2]>,
    tile: usize,
}

impl RTreeObject for TileEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox
    }
}

/// R-tree over the tile bounding boxes of one loaded dataset.
#[derive(Debug)]
pub struct TileIndex {
    tree: RTree<TileEntry>,
}

impl TileIndex {
    /// Build the index. Returns None for an empty dataset or when no
    /// tile has a computable bounding box.
    pub fn build(grid: &PopulationGrid) -> Option<Self> {
        let entries: Vec<TileEntry> = grid
            .tiles
            .iter()
            .enumerate()
            .filter_map(|(tile, t)| {
                let rect = t.polygon.bounding_rect()?;
                Some(TileEntry {
                    bbox: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    tile,
                })
            })
            .collect();
        if entries.is_empty() {
            return None;
        }
        Some(Self {
            tree: RTree::bulk_load(entries),
        })
    }

    /// Tile ids whose bounding box intersects any of the buffers,
    /// sorted and deduplicated.
    pub fn select(&self, buffers: &[&MultiPolygon<f64>]) -> Vec<usize> {
        let mut out = Vec::new();
        for buffer in buffers {
            let Some(rect) = buffer.bounding_rect() else {
                continue;
            };
            let envelope = AABB::from_corners(
                [rect.min().x, rect.min().y],
                [rect.max().x, rect.max().y],
            );
            out.extend(
                self.tree
                    .locate_in_envelope_intersecting(&envelope)
                    .map(|entry| entry.tile),
            );
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Candidate tiles for a set of buffers. Without an index every tile is
/// a candidate.
pub fn select_tiles(
    index: Option<&TileIndex>,
    grid: &PopulationGrid,
    buffers: &[&MultiPolygon<f64>],
) -> Vec<usize> {
    match index {
        Some(index) => index.select(buffers),
        None => (0..grid.len()).collect(),
    }
}
