//! Error types for the risk engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("failed to read dataset {path}: {source}")]
    DatasetRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset: {0}")]
    DatasetParse(#[from] geojson::Error),

    #[error("dataset is not a GeoJSON FeatureCollection")]
    NotAFeatureCollection,

    #[error("waypoint {0} does not exist")]
    UnknownWaypoint(usize),

    #[error("segment {0} does not exist")]
    UnknownSegment(usize),

    #[error("cannot split segment {0}: endpoints coincide")]
    DegenerateSplit(usize),

    #[error("worker result channel closed before all chunks reported")]
    WorkerChannelClosed,
}

pub type Result<T> = std::result::Result<T, RiskError>;
