//! Tile classification and geocoding for Floating Forests scene imports.
//!
//! A scene is cropped into a grid of square tiles by an external raster tool.
//! This crate decides which tiles hold usable open water and are not too
//! cloud-obscured, locates each tile on the scene's UTM grid, and assembles
//! the flat records written to the accepted manifest and the rejects CSV.

pub mod config;
pub mod error;
pub mod geo;
pub mod manifest;
pub mod pipeline;
pub mod rules;
pub mod scene;
pub mod stats;
pub mod tiles;

pub use config::SortConfig;
pub use error::{Result, TileError};
pub use geo::{BoundingBox, GeoMapper, LatLon, UtmInverse};
pub use manifest::{ManifestKind, ManifestRecord};
pub use pipeline::{build_records, run_batch, Artifact, BatchInputs, BatchOutput, Stage, StagePlan, TileSizer};
pub use rules::{classify, Classification, RuleChain, TileStatus};
pub use scene::{Scene, SceneMetadata, UtmZone};
pub use stats::{Channel, ChannelStats, StatisticsProvider, StatsTable};
pub use tiles::{GridLayout, TileAddr};
