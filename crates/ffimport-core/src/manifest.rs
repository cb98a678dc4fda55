//! Flat per-tile records and their CSV rendering.
//!
//! A record is built once from the tile's own facts (filename, status, grid
//! position, pixel size, geocoding) and then filled with scene metadata.
//! Scene keys never replace a tile key of the same name.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, TileError};
use crate::geo::TileGeo;
use crate::rules::TileStatus;
use crate::scene::{SceneMetadata, UtmZone, KEY_UTM_ZONE};
use crate::tiles::TileAddr;

pub const COL_FILENAME: &str = "filename";
pub const COL_REASON: &str = "reason";
pub const COL_ROW: &str = "row";
pub const COL_COLUMN: &str = "column";

/// Which CSV a record set is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// `rejected.csv`: keeps the reason column.
    Rejects,
    /// `manifest.csv`: accepted subjects only, no reason column.
    Accepted,
}

impl ManifestKind {
    pub fn leading_columns(self) -> &'static [&'static str] {
        match self {
            ManifestKind::Rejects => &[COL_FILENAME, COL_REASON, COL_ROW, COL_COLUMN],
            ManifestKind::Accepted => &[COL_FILENAME, COL_ROW, COL_COLUMN],
        }
    }

    fn excludes(self, key: &str) -> bool {
        self == ManifestKind::Accepted && key == COL_REASON
    }
}

/// Tile-specific inputs to a record.
#[derive(Debug, Clone)]
pub struct TileFacts<'a> {
    pub filename: &'a str,
    pub status: TileStatus,
    pub addr: TileAddr,
    /// Cropped pixel size of the scene tile.
    pub size: (u32, u32),
    pub geo: &'a TileGeo,
}

/// One immutable output row.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    fields: BTreeMap<String, String>,
}

impl ManifestRecord {
    /// Compose a record. Tile keys are inserted first; scene metadata only
    /// fills keys the tile did not set. The UTM zone is written unsigned.
    pub fn build(tile: &TileFacts<'_>, zone: UtmZone, scene: &SceneMetadata) -> Self {
        let mut fields = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            fields.insert(k.to_string(), v);
        };
        put(COL_FILENAME, tile.filename.to_string());
        put(COL_REASON, tile.status.label().to_string());
        put(COL_ROW, tile.addr.row.to_string());
        put(COL_COLUMN, tile.addr.col.to_string());
        put("width", tile.size.0.to_string());
        put("height", tile.size.1.to_string());
        put(KEY_UTM_ZONE, zone.number().to_string());
        for (k, v) in tile.geo.fields() {
            fields.insert(k, v);
        }

        for (k, v) in scene {
            fields.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn filename(&self) -> &str {
        self.get(COL_FILENAME).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Order records by filename, independent of processing order.
pub fn sort_by_filename(records: &mut [ManifestRecord]) {
    records.sort_by(|a, b| a.filename().cmp(b.filename()));
}

/// Header for `kind`: the fixed leading columns, then every other key seen in
/// any record, sorted.
pub fn columns(kind: ManifestKind, records: &[ManifestRecord]) -> Vec<String> {
    let leading = kind.leading_columns();
    let rest: BTreeSet<&str> = records
        .iter()
        .flat_map(ManifestRecord::keys)
        .filter(|k| !leading.contains(k) && !kind.excludes(k))
        .collect();
    leading
        .iter()
        .map(|c| c.to_string())
        .chain(rest.into_iter().map(str::to_string))
        .collect()
}

/// Write `records` as CSV. Missing cells are left empty.
pub fn write_csv<W: Write>(writer: W, kind: ManifestKind, records: &[ManifestRecord]) -> Result<()> {
    let header = columns(kind, records);
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&header)?;
    for record in records {
        wtr.write_record(header.iter().map(|col| record.get(col).unwrap_or("")))?;
    }
    wtr.flush().map_err(|e| TileError::Csv(e.into()))?;
    Ok(())
}

/// Write a CSV file, creating its parent directory.
pub fn write_csv_file(path: &Path, kind: ManifestKind, records: &[ManifestRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TileError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| TileError::io(path, e))?;
    write_csv(file, kind, records)
}
