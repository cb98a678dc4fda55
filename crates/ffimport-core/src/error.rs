//! Error taxonomy for the tile classification and geocoding core.
//!
//! `MalformedFilename`, `InvalidStatistics` and `MissingMetadata` are fatal:
//! the batch halts before any manifest is emitted.

use std::path::PathBuf;

use thiserror::Error;

use crate::stats::Channel;

#[derive(Debug, Error)]
pub enum TileError {
    /// The tile filename does not follow `tile_<index>.<ext>`.
    #[error("malformed tile filename {filename:?}: {detail}")]
    MalformedFilename { filename: String, detail: String },

    /// A statistic could not be read as a finite number.
    #[error("invalid {channel} statistics for {tile}: {detail}")]
    InvalidStatistics {
        channel: Channel,
        tile: String,
        detail: String,
    },

    /// A required scene metadata key (corner or zone) is absent or unparsable.
    #[error("missing scene metadata {key:?}")]
    MissingMetadata { key: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The stage plan requires an artifact no earlier stage produces.
    #[error("stage {stage} requires {artifact}, which no earlier stage produces")]
    StagePlan {
        stage: &'static str,
        artifact: &'static str,
    },

    #[error("coordinate projection failed: {0}")]
    Projection(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TileError>;

impl TileError {
    pub fn missing(key: impl Into<String>) -> Self {
        TileError::MissingMetadata { key: key.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TileError::Io {
            path: path.into(),
            source,
        }
    }
}
