/// Tile addressing: filename → sequential index → (row, col) grid position.
///
/// The external cropper names tiles `tile_<index>.<ext>` in row-major order and
/// always emits a trailing, possibly partial, column per row. The grid layout
/// therefore reserves `width / grid_size + 1` columns even when the width is an
/// exact multiple of the grid size. Tile counts downstream depend on that.
use crate::error::{Result, TileError};

/// Filename prefix written by the cropper.
pub const TILE_PREFIX: &str = "tile_";

/// Grid position of a tile within its scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddr {
    pub row: u32,
    pub col: u32,
}

impl TileAddr {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Pixel rectangle covered by a tile in scene raster space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// Row-major tile grid derived from scene width and tile edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub grid_size: u32,
    pub per_row: u32,
}

impl GridLayout {
    /// `grid_size` must be non-zero; `SortConfig::validate` guarantees it.
    pub fn new(scene_width: u32, grid_size: u32) -> Self {
        Self {
            grid_size,
            per_row: scene_width / grid_size + 1,
        }
    }

    #[inline]
    pub fn locate(&self, index: u32) -> TileAddr {
        TileAddr {
            row: index / self.per_row,
            col: index % self.per_row,
        }
    }

    #[inline]
    pub fn index_of(&self, addr: TileAddr) -> u32 {
        addr.row * self.per_row + addr.col
    }

    /// Parse a tile filename and return its grid position.
    pub fn locate_file(&self, filename: &str) -> Result<TileAddr> {
        Ok(self.locate(parse_tile_index(filename)?))
    }

    /// Nominal pixel rectangle of a tile: `grid*col, grid*row` to
    /// `grid*(col+1), grid*(row+1)`. Not clipped to the scene edge; saturates
    /// at `u32::MAX`.
    pub fn pixel_rect(&self, addr: TileAddr) -> PixelRect {
        let g = self.grid_size;
        PixelRect {
            x0: g.saturating_mul(addr.col),
            y0: g.saturating_mul(addr.row),
            x1: g.saturating_mul(addr.col.saturating_add(1)),
            y1: g.saturating_mul(addr.row.saturating_add(1)),
        }
    }
}

/// Extract the sequential index from `tile_<index>.<ext>`.
///
///   "tile_0004.png"  → 4
///   "tile_12.tif"    → 12
///   "tile_.png"      → MalformedFilename
pub fn parse_tile_index(filename: &str) -> Result<u32> {
    let malformed = |detail: &str| TileError::MalformedFilename {
        filename: filename.to_string(),
        detail: detail.to_string(),
    };

    let rest = filename
        .strip_prefix(TILE_PREFIX)
        .ok_or_else(|| malformed("missing `tile_` prefix"))?;
    let digits = match rest.split_once('.') {
        Some((digits, _ext)) => digits,
        None => rest,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("index is not a decimal integer"));
    }
    digits.parse().map_err(|_| malformed("index out of range"))
}

/// True if `filename` looks like a cropper output with the given extension.
pub fn is_tile_file(filename: &str, extension: &str) -> bool {
    filename.starts_with(TILE_PREFIX)
        && filename
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
}
