pub mod debounce;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod intersect;
pub mod models;
pub mod path;
pub mod risk;
pub mod spatial;

pub use debounce::Debouncer;
pub use engine::{Invocation, RiskEngine};
pub use error::{Result, RiskError};
pub use geometry::SegmentGeometry;
pub use grid::{GridTile, PopulationGrid};
pub use intersect::{SegmentAccumulator, SegmentJob, REFERENCE_TILE_AREA_M2};
pub use models::{
    RiskParams, RouteReport, Segment, SegmentReport, SegmentStats, Waypoint, EFR_THRESHOLD,
};
pub use path::PathModel;
pub use spatial::TileIndex;
