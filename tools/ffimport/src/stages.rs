//! Filesystem side of each pipeline stage.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use ffimport_core::manifest::{write_csv_file, ManifestKind};
use ffimport_core::{Artifact, Channel, Classification, ManifestRecord, SortConfig, TileStatus};
use tracing::{info, warn};

use crate::adapters::list_tiles;

/// Extension of every cropped tile.
pub const TILE_EXT: &str = "png";

// ── Layout ────────────────────────────────────────────────────────────────────

/// Where a run reads and writes.
///
///   <scratch>/land/tile_%04d.png     land mask tiles
///   <scratch>/cloud/tile_%04d.png    cloud mask tiles
///   <scratch>/scene/tile_%04d.png    colour scene tiles
///   <scratch>/render.tif             rendered colour scene
///   <scratch>/{water,cloud,snow}_mask.png   full-scene masks from the LUT step
///   <output>/<scene>_tiles/accepted/ tiles + manifest.csv
///   <output>/<scene>_tiles/rejected/ tiles + rejected.csv
#[derive(Debug, Clone)]
pub struct Workspace {
    pub scratch: PathBuf,
    pub tiles_root: PathBuf,
}

impl Workspace {
    pub fn new(cfg: &SortConfig, output: &Path, scene_name: &str) -> Self {
        Self {
            scratch: PathBuf::from(&cfg.scratch_path),
            tiles_root: output.join(format!("{scene_name}_tiles")),
        }
    }

    pub fn mask_dir(&self, channel: Channel) -> PathBuf {
        self.scratch.join(channel.dir_name())
    }

    pub fn scene_tile_dir(&self) -> PathBuf {
        self.scratch.join("scene")
    }

    pub fn scene_mask(&self, kind: &str) -> PathBuf {
        self.scratch.join(format!("{kind}_mask.png"))
    }

    pub fn accepted_dir(&self) -> PathBuf {
        self.tiles_root.join("accepted")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.tiles_root.join("rejected")
    }

    pub fn render(&self) -> PathBuf {
        self.scratch.join("render.tif")
    }

    /// Create any missing `land/`, `cloud/` and `scene/` directories.
    /// Existing tiles are left alone.
    pub fn ensure_scratch(&self) -> Result<()> {
        let dirs = [self.mask_dir(Channel::Land), self.mask_dir(Channel::Cloud), self.scene_tile_dir()];
        for dir in dirs {
            if !dir.is_dir() {
                info!(dir = %dir.display(), "creating scratch directory");
                fs::create_dir_all(&dir).with_context(|| format!("Cannot create {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Artifacts already on disk before any stage runs.
    pub fn available(&self) -> Vec<Artifact> {
        let has_tiles = |dir: PathBuf| list_tiles(&dir, TILE_EXT).map(|t| !t.is_empty()).unwrap_or(false);
        let mut out = Vec::new();
        if self.mask_dir(Channel::Land).is_dir() && self.mask_dir(Channel::Cloud).is_dir() {
            out.push(Artifact::Scratch);
        }
        if has_tiles(self.mask_dir(Channel::Land)) && has_tiles(self.mask_dir(Channel::Cloud)) {
            out.push(Artifact::MaskTiles);
        }
        if has_tiles(self.scene_tile_dir()) {
            out.push(Artifact::SceneTiles);
        }
        out
    }
}

// ── clean ─────────────────────────────────────────────────────────────────────

/// Recreate empty `land/` and `cloud/` mask directories.
pub fn clean(ws: &Workspace) -> Result<()> {
    for channel in [Channel::Land, Channel::Cloud] {
        let dir = ws.mask_dir(channel);
        if dir.exists() {
            info!(dir = %dir.display(), "removing existing mask tiles");
            fs::remove_dir_all(&dir).with_context(|| format!("Cannot remove {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    fs::create_dir_all(ws.scene_tile_dir())
        .with_context(|| format!("Cannot create {}", ws.scene_tile_dir().display()))?;
    Ok(())
}

// ── mask ──────────────────────────────────────────────────────────────────────

/// Crop blurred land and cloud masks into grid tiles with ImageMagick.
///
/// Land mask = water + cloud − snow; cloud mask is used as is. Returns the
/// number of land tiles produced.
pub fn build_mask_tiles(ws: &Workspace, cfg: &SortConfig) -> Result<usize> {
    let water = ws.scene_mask("water");
    let cloud = ws.scene_mask("cloud");
    let snow = ws.scene_mask("snow");
    for mask in [&water, &cloud, &snow] {
        if !mask.is_file() {
            bail!("Missing scene mask {} (run the LUT mask step first)", mask.display());
        }
    }
    let crop = format!("{0}x{0}", cfg.grid_size);
    let pattern = |channel: Channel| ws.mask_dir(channel).join("tile_%04d.png");

    info!(grid = cfg.grid_size, "generating land mask tiles");
    let mut land = Command::new("convert");
    land.arg("-quiet")
        .arg(&water)
        .arg(&cloud)
        .args(["-compose", "add", "-composite"])
        .arg(&snow)
        .args(["-compose", "minus_src", "-composite"])
        .args(["-blur", cfg.mask_blur.as_str()])
        .args(["-crop", crop.as_str()])
        .arg(pattern(Channel::Land));
    run_external(&mut land)?;

    info!(grid = cfg.grid_size, "generating cloud mask tiles");
    let mut clouds = Command::new("convert");
    clouds
        .arg("-quiet")
        .arg(&cloud)
        .args(["-blur", cfg.mask_blur.as_str()])
        .args(["-crop", crop.as_str()])
        .arg(pattern(Channel::Cloud));
    run_external(&mut clouds)?;

    let generated = list_tiles(&ws.mask_dir(Channel::Land), TILE_EXT)?.len();
    info!(generated, "mask tiles generated");
    Ok(generated)
}

// ── tiles ─────────────────────────────────────────────────────────────────────

/// Crop the rendered scene into `scene/tile_%04d.png`. Returns the tile count.
pub fn build_scene_tiles(ws: &Workspace, cfg: &SortConfig) -> Result<usize> {
    let render = ws.render();
    if !render.is_file() {
        bail!("Missing rendered scene {} (run the assemble step first)", render.display());
    }
    let crop = format!("{0}x{0}", cfg.grid_size);

    info!(grid = cfg.grid_size, "generating scene tiles");
    let mut tiles = Command::new("convert");
    tiles
        .arg("-quiet")
        .arg(&render)
        .args(["-crop", crop.as_str()])
        .arg(ws.scene_tile_dir().join("tile_%04d.png"));
    run_external(&mut tiles)?;

    let generated = list_tiles(&ws.scene_tile_dir(), TILE_EXT)?.len();
    info!(generated, "scene tiles generated");
    Ok(generated)
}

fn run_external(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .status()
        .with_context(|| format!("Cannot launch {:?}", cmd.get_program()))?;
    if !status.success() {
        bail!("{:?} exited with {status}", cmd.get_program());
    }
    Ok(())
}

// ── sort ──────────────────────────────────────────────────────────────────────

/// Copy each classified scene tile into `accepted/` or `rejected/`.
pub fn copy_sorted_tiles(ws: &Workspace, classification: &Classification) -> Result<()> {
    let accepted = ws.accepted_dir();
    let rejected = ws.rejected_dir();
    fs::create_dir_all(&accepted).with_context(|| format!("Cannot create {}", accepted.display()))?;
    fs::create_dir_all(&rejected).with_context(|| format!("Cannot create {}", rejected.display()))?;

    let source = ws.scene_tile_dir();
    for (tile, status) in classification.statuses() {
        let dest = if status == TileStatus::Accepted { &accepted } else { &rejected };
        let from = source.join(tile);
        if !from.is_file() {
            warn!(tile = %tile, "scene tile missing, not copied");
            continue;
        }
        fs::copy(&from, dest.join(tile))
            .with_context(|| format!("Cannot copy {} to {}", from.display(), dest.display()))?;
    }
    Ok(())
}

pub fn write_rejects(ws: &Workspace, records: &[ManifestRecord]) -> Result<PathBuf> {
    let path = ws.rejected_dir().join("rejected.csv");
    write_csv_file(&path, ManifestKind::Rejects, records)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(path)
}

pub fn write_manifest(ws: &Workspace, records: &[ManifestRecord]) -> Result<PathBuf> {
    let path = ws.accepted_dir().join("manifest.csv");
    write_csv_file(&path, ManifestKind::Accepted, records)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffimport_core::{Stage, StagePlan};

    fn workspace(root: &Path) -> Workspace {
        let cfg = SortConfig { scratch_path: root.join("scratch").to_string_lossy().into_owned(), ..SortConfig::default() };
        Workspace::new(&cfg, &root.join("out"), "LC8")
    }

    #[test]
    fn fresh_scratch_is_created_for_the_mask_stage() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        assert!(StagePlan::new(&[Stage::MaskTiles], &ws.available()).is_err());

        ws.ensure_scratch().unwrap();
        let available = ws.available();
        assert!(available.contains(&Artifact::Scratch));
        assert!(!available.contains(&Artifact::MaskTiles));
        assert!(StagePlan::new(&[Stage::MaskTiles, Stage::SceneTiles], &available).is_ok());
    }

    #[test]
    fn ensure_scratch_keeps_existing_tiles() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        fs::create_dir_all(ws.scene_tile_dir()).unwrap();
        fs::write(ws.scene_tile_dir().join("tile_0000.png"), b"").unwrap();

        ws.ensure_scratch().unwrap();
        assert!(ws.scene_tile_dir().join("tile_0000.png").is_file());
        assert!(ws.available().contains(&Artifact::SceneTiles));
    }

    #[test]
    fn scene_tiles_need_a_rendered_scene() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        ws.ensure_scratch().unwrap();
        let err = build_scene_tiles(&ws, &SortConfig::default()).unwrap_err();
        assert!(err.to_string().contains("render.tif"), "{err}");
    }

    #[test]
    fn clean_empties_masks_but_keeps_scene_tiles() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        ws.ensure_scratch().unwrap();
        fs::write(ws.mask_dir(Channel::Land).join("tile_0000.png"), b"").unwrap();
        fs::write(ws.scene_tile_dir().join("tile_0000.png"), b"").unwrap();

        clean(&ws).unwrap();
        assert!(list_tiles(&ws.mask_dir(Channel::Land), TILE_EXT).unwrap().is_empty());
        assert!(ws.scene_tile_dir().join("tile_0000.png").is_file());
    }
}
