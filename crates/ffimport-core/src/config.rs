//! Run configuration.
//!
//! Built once from defaults, an optional JSON file and command-line
//! overrides, validated, and then passed by reference into every component.
//! Nothing mutates it after `validate()`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileError};

/// Tile sorting parameters. Thresholds are in percent units, matching the
/// percent-scaled statistics the gate consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Square tile edge in pixels, default 400.
    pub grid_size: u32,
    /// ImageMagick blur geometry applied to mask rasters before cropping.
    pub mask_blur: String,
    /// Scratch directory holding `land/`, `cloud/` and `scene/` tile sets.
    pub scratch_path: String,
    /// Land chain: `max` and `mean` must exceed this, default 10.
    pub land_threshold: f64,
    /// Land chain: `stddev` above this rescues a low-mean tile, default 30.
    pub land_sensitivity: f64,
    /// Cloud chain: `min` and `mean` must stay below this, default 10.
    pub cloud_threshold: f64,
    /// Cloud chain: `stddev` above this rescues a high-mean tile, default 80.
    pub cloud_sensitivity: f64,
    pub remove_land: bool,
    pub remove_clouds: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            grid_size: 400,
            mask_blur: "0x10".to_string(),
            scratch_path: "scratch".to_string(),
            land_threshold: 10.0,
            land_sensitivity: 30.0,
            cloud_threshold: 10.0,
            cloud_sensitivity: 80.0,
            remove_land: true,
            remove_clouds: true,
        }
    }
}

impl SortConfig {
    /// Load a JSON config file. Keys absent from the file keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| TileError::io(path, e))?;
        let config: SortConfig = serde_json::from_str(&text)?;
        config.validate()
    }

    /// Check invariants and hand back the now-frozen config.
    pub fn validate(self) -> Result<Self> {
        if self.grid_size == 0 {
            return Err(TileError::InvalidConfig("grid_size must be positive".into()));
        }
        let thresholds = [
            ("land_threshold", self.land_threshold),
            ("land_sensitivity", self.land_sensitivity),
            ("cloud_threshold", self.cloud_threshold),
            ("cloud_sensitivity", self.cloud_sensitivity),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                return Err(TileError::InvalidConfig(format!("{name} must be finite, got {value}")));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_constants() {
        let c = SortConfig::default();
        assert_eq!(c.grid_size, 400);
        assert_eq!(c.land_threshold, 10.0);
        assert_eq!(c.land_sensitivity, 30.0);
        assert_eq!(c.cloud_threshold, 10.0);
        assert_eq!(c.cloud_sensitivity, 80.0);
        assert_eq!(c.mask_blur, "0x10");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "grid_size": 256, "cloud_sensitivity": 70 }}"#).unwrap();
        let c = SortConfig::from_json_file(file.path()).unwrap();
        assert_eq!(c.grid_size, 256);
        assert_eq!(c.cloud_sensitivity, 70.0);
        assert_eq!(c.land_sensitivity, 30.0, "untouched keys keep defaults");
    }

    #[test]
    fn zero_grid_size_is_rejected() {
        let c = SortConfig { grid_size: 0, ..SortConfig::default() };
        assert!(matches!(c.validate(), Err(TileError::InvalidConfig(_))));
    }

    #[test]
    fn nan_threshold_is_rejected() {
        let c = SortConfig { land_threshold: f64::NAN, ..SortConfig::default() };
        assert!(c.validate().is_err());
    }
}
