//! Scene description: pixel dimensions, UTM zone, projected corners and the
//! opaque metadata map flattened from the scene XML by the caller.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Result, TileError};
use crate::tiles::GridLayout;

// ── Metadata keys ────────────────────────────────────────────────────────────

pub const KEY_UTM_ZONE: &str = "#utm_zone";
pub const KEY_UL_X: &str = "#scene_corner_UL_x";
pub const KEY_UL_Y: &str = "#scene_corner_UL_y";
pub const KEY_LR_X: &str = "#scene_corner_LR_x";
pub const KEY_LR_Y: &str = "#scene_corner_LR_y";

/// String→string metadata, ordered so manifest columns come out sorted.
pub type SceneMetadata = BTreeMap<String, String>;

/// Load a metadata map from a flat JSON object. Scalar values are
/// stringified; nested values are rejected.
pub fn load_metadata_json(path: &Path) -> Result<SceneMetadata> {
    let text = fs::read_to_string(path).map_err(|e| TileError::io(path, e))?;
    let raw: BTreeMap<String, Value> = serde_json::from_str(&text)?;
    raw.into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(TileError::InvalidConfig(format!(
                        "metadata value for {key:?} must be a scalar"
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}

/// UTM zone as carried in scene metadata. Negative means southern hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone(pub i32);

impl UtmZone {
    pub fn from_metadata(meta: &SceneMetadata) -> Result<Self> {
        let zone: i32 = parse_key(meta, KEY_UTM_ZONE)?;
        if zone == 0 || zone.abs() > 60 {
            return Err(TileError::missing(KEY_UTM_ZONE));
        }
        Ok(Self(zone))
    }

    /// Zone number 1–60 without the hemisphere sign.
    pub fn number(self) -> u32 {
        self.0.unsigned_abs()
    }

    pub fn is_southern(self) -> bool {
        self.0 < 0
    }
}

/// Projected scene corners in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneCorners {
    pub ul_x: f64,
    pub ul_y: f64,
    pub lr_x: f64,
    pub lr_y: f64,
}

impl SceneCorners {
    pub fn from_metadata(meta: &SceneMetadata) -> Result<Self> {
        Ok(Self {
            ul_x: parse_key(meta, KEY_UL_X)?,
            ul_y: parse_key(meta, KEY_UL_Y)?,
            lr_x: parse_key(meta, KEY_LR_X)?,
            lr_y: parse_key(meta, KEY_LR_Y)?,
        })
    }

    pub fn span_x(&self) -> f64 {
        self.lr_x - self.ul_x
    }

    /// Negative for north-up scenes.
    pub fn span_y(&self) -> f64 {
        self.lr_y - self.ul_y
    }
}

fn parse_key<T: std::str::FromStr>(meta: &SceneMetadata, key: &str) -> Result<T> {
    meta.get(key)
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| TileError::missing(key))
}

/// One acquisition, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub source_dir: PathBuf,
    pub grid_size: u32,
    pub width: u32,
    pub height: u32,
    pub zone: UtmZone,
    pub corners: SceneCorners,
    pub metadata: SceneMetadata,
}

impl Scene {
    /// Resolve zone and corners from `metadata`; fails with `MissingMetadata`
    /// if any of them is absent and with `InvalidConfig` on an empty scene or
    /// a zero grid size.
    pub fn new(
        id: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        grid_size: u32,
        (width, height): (u32, u32),
        metadata: SceneMetadata,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(TileError::InvalidConfig(format!("scene dimensions {width}x{height} are empty")));
        }
        if grid_size == 0 {
            return Err(TileError::InvalidConfig("grid_size must be positive".into()));
        }
        Ok(Self {
            id: id.into(),
            source_dir: source_dir.into(),
            grid_size,
            width,
            height,
            zone: UtmZone::from_metadata(&metadata)?,
            corners: SceneCorners::from_metadata(&metadata)?,
            metadata,
        })
    }

    pub fn layout(&self) -> GridLayout {
        GridLayout::new(self.width, self.grid_size)
    }
}

#[cfg(test)]
pub(crate) fn test_metadata(zone: &str) -> SceneMetadata {
    [
        (KEY_UTM_ZONE, zone),
        (KEY_UL_X, "100"),
        (KEY_UL_Y, "500"),
        (KEY_LR_X, "1100"),
        (KEY_LR_Y, "0"),
        ("spacecraft", "LANDSAT_8"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scene_resolves_corners_and_zone() {
        let scene = Scene::new("LC8", "scenes/LC8", 400, (1000, 1000), test_metadata("10")).unwrap();
        assert_eq!(scene.corners, SceneCorners { ul_x: 100.0, ul_y: 500.0, lr_x: 1100.0, lr_y: 0.0 });
        assert_eq!(scene.zone, UtmZone(10));
        assert_eq!(scene.corners.span_y(), -500.0);
        assert_eq!(scene.layout().per_row, 3);
    }

    #[test]
    fn missing_corner_names_the_key() {
        let mut meta = test_metadata("10");
        meta.remove(KEY_LR_Y);
        match Scene::new("s", ".", 400, (10, 10), meta) {
            Err(TileError::MissingMetadata { key }) => assert_eq!(key, KEY_LR_Y),
            other => panic!("expected MissingMetadata, got {other:?}"),
        }
    }

    #[test]
    fn zero_grid_size_is_refused() {
        let err = Scene::new("s", ".", 0, (100, 100), test_metadata("10")).unwrap_err();
        assert!(matches!(err, TileError::InvalidConfig(_)), "got {err:?}");
    }

    #[test]
    fn unparsable_zone_is_missing() {
        let meta = test_metadata("ten");
        assert!(matches!(UtmZone::from_metadata(&meta), Err(TileError::MissingMetadata { .. })));
    }

    #[test]
    fn southern_zone_is_negative() {
        let zone = UtmZone::from_metadata(&test_metadata("-19")).unwrap();
        assert!(zone.is_southern());
        assert_eq!(zone.number(), 19);
    }

    #[test]
    fn metadata_json_stringifies_scalars() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r##"{{ "#utm_zone": -19, "spacecraft": "LANDSAT_7", "!cloud_cover": 12.5 }}"##).unwrap();
        let meta = load_metadata_json(file.path()).unwrap();
        assert_eq!(meta["#utm_zone"], "-19");
        assert_eq!(meta["!cloud_cover"], "12.5");
    }

    #[test]
    fn metadata_json_rejects_nested_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "corners": [1, 2] }}"#).unwrap();
        assert!(load_metadata_json(file.path()).is_err());
    }
}
