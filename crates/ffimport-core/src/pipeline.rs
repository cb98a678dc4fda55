//! Stage planning and the classification/geocoding batch.
//!
//! Stages are an explicit ordered list. Each declares the artifacts it needs
//! and the ones it leaves behind, so a plan can be checked against what is
//! already on disk before anything runs. [`run_batch`] is the pure part of
//! the `classify` → `sort` path: it returns every record or fails as a
//! whole, so a caller never emits a partial manifest.

use std::fmt;

use tracing::info;

use crate::config::SortConfig;
use crate::error::{Result, TileError};
use crate::geo::{GeoMapper, UtmInverse};
use crate::manifest::{sort_by_filename, ManifestRecord, TileFacts};
use crate::rules::{classify, Classification, RuleChain, TileStatus};
use crate::scene::Scene;
use crate::stats::StatisticsProvider;

// ── Stage catalogue ──────────────────────────────────────────────────────────

/// Intermediate products passed between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Scratch tree with `land/` and `cloud/` directories.
    Scratch,
    /// Cropped land and cloud mask tiles.
    MaskTiles,
    /// Cropped colour scene tiles.
    SceneTiles,
    /// In-memory accept/reject partition.
    Classification,
    /// Per-tile manifest records.
    Records,
}

impl Artifact {
    pub fn name(self) -> &'static str {
        match self {
            Artifact::Scratch => "scratch",
            Artifact::MaskTiles => "mask tiles",
            Artifact::SceneTiles => "scene tiles",
            Artifact::Classification => "classification",
            Artifact::Records => "records",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Recreate the mask scratch directories. Scene tiles are kept.
    Clean,
    /// Build land/cloud mask tiles with the external raster tool.
    MaskTiles,
    /// Crop the rendered colour scene into grid tiles.
    SceneTiles,
    /// Run the land and cloud rule chains.
    Classify,
    /// Draw the sort outcome over the scene.
    Visualize,
    /// Copy scene tiles into accepted/rejected and build records.
    SortTiles,
    /// Write the accepted-subject manifest.
    Manifest,
}

impl Stage {
    /// Canonical execution order.
    pub const ALL: [Stage; 7] = [
        Stage::Clean,
        Stage::MaskTiles,
        Stage::SceneTiles,
        Stage::Classify,
        Stage::Visualize,
        Stage::SortTiles,
        Stage::Manifest,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::MaskTiles => "mask",
            Stage::SceneTiles => "tiles",
            Stage::Classify => "classify",
            Stage::Visualize => "visualize",
            Stage::SortTiles => "sort",
            Stage::Manifest => "manifest",
        }
    }

    pub fn requires(self) -> &'static [Artifact] {
        match self {
            Stage::Clean => &[],
            Stage::MaskTiles => &[Artifact::Scratch],
            Stage::SceneTiles => &[Artifact::Scratch],
            Stage::Classify => &[Artifact::MaskTiles],
            Stage::Visualize => &[Artifact::Classification],
            Stage::SortTiles => &[Artifact::Classification, Artifact::SceneTiles],
            Stage::Manifest => &[Artifact::Records],
        }
    }

    /// Artifacts this stage destroys before producing its own.
    pub fn invalidates(self) -> &'static [Artifact] {
        match self {
            Stage::Clean => &[Artifact::MaskTiles],
            _ => &[],
        }
    }

    pub fn produces(self) -> &'static [Artifact] {
        match self {
            Stage::Clean => &[Artifact::Scratch],
            Stage::MaskTiles => &[Artifact::MaskTiles],
            Stage::SceneTiles => &[Artifact::SceneTiles],
            Stage::Classify => &[Artifact::Classification],
            Stage::Visualize => &[],
            Stage::SortTiles => &[Artifact::Records],
            Stage::Manifest => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<Stage>,
}

impl StagePlan {
    /// Check that every stage's requirements are met by `available` (already
    /// present before the run) or by an earlier stage that was not undone by a
    /// later `invalidates`. Duplicates are dropped, keeping the first occurrence.
    pub fn new(stages: &[Stage], available: &[Artifact]) -> Result<Self> {
        let mut have: Vec<Artifact> = available.to_vec();
        let mut ordered: Vec<Stage> = Vec::with_capacity(stages.len());
        for &stage in stages {
            if ordered.contains(&stage) {
                continue;
            }
            if let Some(&missing) = stage.requires().iter().find(|a| !have.contains(a)) {
                return Err(TileError::StagePlan {
                    stage: stage.name(),
                    artifact: missing.name(),
                });
            }
            have.retain(|a| !stage.invalidates().contains(a));
            have.extend_from_slice(stage.produces());
            ordered.push(stage);
        }
        Ok(Self { stages: ordered })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// ── Batch ─────────────────────────────────────────────────────────────────────

/// Pixel sizes of cropped scene tiles. Edge tiles are narrower or
/// shorter than the grid.
pub trait TileSizer {
    fn dimensions(&self, tile: &str) -> Result<(u32, u32)>;
}

/// Everything a batch produces, ready for emission.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub classification: Classification,
    /// Accepted records in candidate order.
    pub accepted: Vec<ManifestRecord>,
    /// Rejected records sorted by filename.
    pub rejected: Vec<ManifestRecord>,
}

/// External collaborators a batch reads through.
pub struct BatchInputs<'a> {
    pub stats: &'a dyn StatisticsProvider,
    pub sizer: &'a dyn TileSizer,
    pub projector: Option<&'a dyn UtmInverse>,
}

/// Classify `candidates` and build a record for every tile.
pub fn run_batch(scene: &Scene, cfg: &SortConfig, candidates: Vec<String>, io: &BatchInputs<'_>) -> Result<BatchOutput> {
    let classification = classify(
        candidates,
        &RuleChain::land(cfg),
        &RuleChain::cloud(cfg),
        io.stats,
    )?;
    let (accepted, rejected) = build_records(scene, &classification, io.sizer, io.projector)?;
    Ok(BatchOutput { classification, accepted, rejected })
}

/// Build accepted records (classification order) and rejected records
/// (sorted by filename). Fails as a whole on the first bad tile.
pub fn build_records(
    scene: &Scene,
    classification: &Classification,
    sizer: &dyn TileSizer,
    projector: Option<&dyn UtmInverse>,
) -> Result<(Vec<ManifestRecord>, Vec<ManifestRecord>)> {
    let layout = scene.layout();
    let mapper = GeoMapper::for_scene(scene);
    let mut accepted = Vec::with_capacity(classification.accepted.len());
    let mut rejected = Vec::with_capacity(classification.total() - classification.accepted.len());

    for (filename, status) in classification.statuses() {
        let addr = layout.locate_file(filename)?;
        let size = sizer.dimensions(filename)?;
        let geo = mapper.locate(addr, size, projector)?;
        let facts = TileFacts { filename, status, addr, size, geo: &geo };
        let record = ManifestRecord::build(&facts, scene.zone, &scene.metadata);
        if status == TileStatus::Accepted {
            accepted.push(record);
        } else {
            rejected.push(record);
        }
    }
    sort_by_filename(&mut rejected);

    info!(
        scene = %scene.id,
        accepted = accepted.len(),
        rejected = rejected.len(),
        "records built"
    );
    Ok((accepted, rejected))
}
