//! Floating Forests scene import: sorts a cropped Landsat scene into accepted
//! and rejected tiles and writes the subject manifest.
//!
//! Expects `<scene_dir>/<scene>_pixel_qa.tif` for scene dimensions and the
//! ESPA `<scene_dir>/<scene>.xml` for zone, projected corners and acquisition
//! fields; `--metadata` swaps in a flat JSON map instead. Scene rendering and
//! the LUT mask step run upstream and leave `render.tif` and
//! `{water,cloud,snow}_mask.png` in the scratch dir.
mod adapters;
mod stages;
mod visualize;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use ffimport_core::scene::load_metadata_json;
use ffimport_core::{
    build_records, classify, Artifact, Channel, Classification, ManifestRecord, RuleChain, Scene,
    SortConfig, Stage, StagePlan, StatisticsProvider, StatsTable, UtmInverse,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use adapters::{
    find_scene_name, list_tiles, load_espa_metadata, scene_dimensions, PngMaskStats, PngTileSizer, Proj4Inverse,
    PIXEL_QA_SUFFIX,
};
use stages::{Workspace, TILE_EXT};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "ffimport",
    about = "Sort scene tiles into accepted/rejected sets and build the Floating Forests manifest"
)]
struct Args {
    /// Scene directory containing `<scene>_pixel_qa.tif`
    scene_dir: PathBuf,

    /// Run every stage: clean, mask, tiles, classify, visualize, sort, manifest
    #[arg(long)]
    full: bool,

    /// Recreate the scratch mask directories
    #[arg(long)]
    clean: bool,

    /// Regenerate masks, remove land and clouds, and sort tiles
    #[arg(long)]
    sort_tiles: bool,

    /// Regenerate mask tiles
    #[arg(long)]
    generate_mask: bool,

    /// Crop the rendered scene into colour tiles
    #[arg(long)]
    generate_tiles: bool,

    /// Reject tiles that are only land
    #[arg(long)]
    remove_land: bool,

    /// Reject tiles that are too cloudy
    #[arg(long)]
    remove_clouds: bool,

    /// Reject tiles that are only land or too cloudy
    #[arg(long)]
    remove_all: bool,

    /// Copy tiles into accepted and rejected folders
    #[arg(long)]
    reject: bool,

    /// Draw which tiles would be rejected
    #[arg(long)]
    visualize: bool,

    /// Write the accepted-subject manifest
    #[arg(long)]
    manifest: bool,

    /// Tile edge in pixels
    #[arg(long)]
    grid_size: Option<u32>,

    #[arg(long)]
    land_threshold: Option<f64>,

    #[arg(long)]
    land_sensitivity: Option<f64>,

    #[arg(long)]
    cloud_threshold: Option<f64>,

    #[arg(long)]
    cloud_sensitivity: Option<f64>,

    /// JSON file with sort parameters; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Flat scene metadata JSON used instead of `<scene_dir>/<scene>.xml`
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Precomputed tile statistics JSON used instead of decoding mask tiles
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Scratch directory (overrides the config file)
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// Directory receiving `<scene>_tiles/`
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Skip centre lat/lon and map links
    #[arg(long)]
    no_latlon: bool,
}

impl Args {
    /// Stages requested by flags, in canonical order.
    fn requested_stages(&self) -> Vec<Stage> {
        let wanted = |stage: Stage| match stage {
            Stage::Clean => self.full || self.clean,
            Stage::MaskTiles => self.full || self.sort_tiles || self.generate_mask,
            Stage::SceneTiles => self.full || self.generate_tiles,
            Stage::Classify => self.full || self.sort_tiles || self.reject || self.visualize,
            Stage::Visualize => self.full || self.visualize,
            Stage::SortTiles => self.full || self.sort_tiles || self.reject,
            Stage::Manifest => self.full || self.manifest,
        };
        Stage::ALL.into_iter().filter(|&s| wanted(s)).collect()
    }

    /// Merge config file, chain flags and numeric overrides, then freeze.
    fn sort_config(&self) -> Result<SortConfig> {
        let mut cfg = match &self.config {
            Some(path) => SortConfig::from_json_file(path)
                .with_context(|| format!("Cannot load config {}", path.display()))?,
            None => SortConfig::default(),
        };
        let chain_flags = self.remove_land || self.remove_clouds || self.remove_all || self.sort_tiles || self.full;
        if chain_flags {
            let everything = self.remove_all || self.sort_tiles || self.full;
            cfg.remove_land = everything || self.remove_land;
            cfg.remove_clouds = everything || self.remove_clouds;
        }
        if let Some(v) = self.grid_size {
            cfg.grid_size = v;
        }
        if let Some(v) = self.land_threshold {
            cfg.land_threshold = v;
        }
        if let Some(v) = self.land_sensitivity {
            cfg.land_sensitivity = v;
        }
        if let Some(v) = self.cloud_threshold {
            cfg.cloud_threshold = v;
        }
        if let Some(v) = self.cloud_sensitivity {
            cfg.cloud_sensitivity = v;
        }
        if let Some(dir) = &self.scratch {
            cfg.scratch_path = dir.to_string_lossy().into_owned();
        }
        Ok(cfg.validate()?)
    }
}

// ── Run ───────────────────────────────────────────────────────────────────────

/// Where per-tile statistics come from.
enum StatsSource {
    Masks(PngMaskStats),
    Table(StatsTable),
}

impl StatsSource {
    fn provider(&self) -> &dyn StatisticsProvider {
        match self {
            StatsSource::Masks(p) => p,
            StatsSource::Table(t) => t,
        }
    }

    fn candidates(&self, ws: &Workspace) -> Result<Vec<String>> {
        match self {
            StatsSource::Masks(_) => list_tiles(&ws.mask_dir(Channel::Land), TILE_EXT),
            StatsSource::Table(t) => Ok(t.tiles(Channel::Land)),
        }
    }
}

fn load_scene(args: &Args, name: &str, cfg: &SortConfig) -> Result<Scene> {
    let qa = args.scene_dir.join(format!("{name}{PIXEL_QA_SUFFIX}"));
    let size = scene_dimensions(&qa)?;
    let metadata = match &args.metadata {
        Some(path) => {
            load_metadata_json(path).with_context(|| format!("Cannot load scene metadata {}", path.display()))?
        }
        None => load_espa_metadata(&args.scene_dir.join(format!("{name}.xml")), name)?,
    };
    let scene = Scene::new(name, &args.scene_dir, cfg.grid_size, size, metadata)?;
    info!(
        scene = %scene.id,
        width = scene.width,
        height = scene.height,
        zone = scene.zone.0,
        per_row = scene.layout().per_row,
        "scene loaded"
    );
    Ok(scene)
}

fn run(args: &Args) -> Result<()> {
    let requested = args.requested_stages();
    if requested.is_empty() {
        Args::command().print_help()?;
        return Ok(());
    }
    let cfg = args.sort_config()?;
    let scene_name = find_scene_name(&args.scene_dir)?;
    let ws = Workspace::new(&cfg, &args.output, &scene_name);

    let source = match &args.stats {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read statistics {}", path.display()))?;
            StatsSource::Table(StatsTable::from_json_str(&text)?)
        }
        None => StatsSource::Masks(PngMaskStats::new(&ws.scratch)),
    };
    ws.ensure_scratch()?;
    let mut available = ws.available();
    if matches!(source, StatsSource::Table(_)) {
        available.push(Artifact::MaskTiles);
    }
    let plan = StagePlan::new(&requested, &available)?;
    info!(
        scene = %scene_name,
        stages = ?plan.stages().iter().map(|s| s.name()).collect::<Vec<_>>(),
        "stage plan validated"
    );

    let scene = if plan.contains(Stage::Classify) {
        Some(load_scene(args, &scene_name, &cfg)?)
    } else {
        None
    };
    let projector = match (&scene, args.no_latlon) {
        (Some(scene), false) => Some(Proj4Inverse::for_zone(scene.zone)?),
        _ => None,
    };

    let mut classification: Option<Classification> = None;
    let mut accepted: Option<Vec<ManifestRecord>> = None;

    for &stage in plan.stages() {
        info!(stage = %stage, "running stage");
        match stage {
            Stage::Clean => stages::clean(&ws)?,
            Stage::MaskTiles => {
                stages::build_mask_tiles(&ws, &cfg)?;
            }
            Stage::SceneTiles => {
                stages::build_scene_tiles(&ws, &cfg)?;
            }
            Stage::Classify => {
                let candidates = source.candidates(&ws)?;
                if candidates.is_empty() {
                    warn!("no candidate tiles found");
                }
                classification = Some(classify(
                    candidates,
                    &RuleChain::land(&cfg),
                    &RuleChain::cloud(&cfg),
                    source.provider(),
                )?);
            }
            Stage::Visualize => {
                let (scene, c) = scene.as_ref().zip(classification.as_ref()).context("visualize ran before classify")?;
                let dest = ws.tiles_root.join("sort_visualization.png");
                visualize::write_visualization(&ws.scratch, (scene.width, scene.height), scene.layout(), c, &dest)?;
            }
            Stage::SortTiles => {
                let (scene, c) = scene.as_ref().zip(classification.as_ref()).context("sort ran before classify")?;
                let sizer = PngTileSizer::new(ws.scene_tile_dir());
                let inverse = projector.as_ref().map(|p| p as &dyn UtmInverse);
                let (acc, rej) = build_records(scene, c, &sizer, inverse)?;
                stages::copy_sorted_tiles(&ws, c)?;
                let path = stages::write_rejects(&ws, &rej)?;
                info!(path = %path.display(), rows = rej.len(), "rejects written");
                accepted = Some(acc);
            }
            Stage::Manifest => {
                let Some(records) = accepted.as_deref() else {
                    bail!("manifest ran before sort");
                };
                let path = stages::write_manifest(&ws, records)?;
                info!(path = %path.display(), rows = records.len(), "manifest written");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    run(&args)
}
