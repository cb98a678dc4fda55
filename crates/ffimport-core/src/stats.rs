//! Per-channel tile statistics and the provider seam.
//!
//! The core never decodes rasters. Statistics arrive through
//! [`StatisticsProvider`], already percent-scaled to 0–100, and are never
//! recomputed here. [`ChannelStats::from_luma16`] is the scaling helper
//! that provider implementations share.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, TileError};

/// Full-scale value of a 16-bit gray mask pixel.
pub const LUMA16_MAX: f64 = 65535.0;
/// Statistics are rescaled to this range.
pub const PERCENT_SCALE: f64 = 100.0;

/// Mask channel a statistic was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Land,
    Cloud,
}

impl Channel {
    /// Scratch sub-directory holding this channel's mask tiles.
    pub fn dir_name(self) -> &'static str {
        match self {
            Channel::Land => "land",
            Channel::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Percent-scaled summary of one mask tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

impl ChannelStats {
    pub fn new(min: f64, max: f64, mean: f64, stddev: f64) -> Self {
        Self { min, max, mean, stddev }
    }

    /// Build from `[min, max, mean, stddev]`, rejecting non-finite values.
    pub fn checked(channel: Channel, tile: &str, values: [f64; 4]) -> Result<Self> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(TileError::InvalidStatistics {
                channel,
                tile: tile.to_string(),
                detail: format!("non-finite value {bad}"),
            });
        }
        let [min, max, mean, stddev] = values;
        Ok(Self { min, max, mean, stddev })
    }

    /// Summarise decoded 16-bit gray pixels, scaled by `100 / 65535`.
    /// Standard deviation is the population form. Empty input is invalid.
    pub fn from_luma16(channel: Channel, tile: &str, pixels: &[u16]) -> Result<Self> {
        if pixels.is_empty() {
            return Err(TileError::InvalidStatistics {
                channel,
                tile: tile.to_string(),
                detail: "tile has no pixels".to_string(),
            });
        }
        let n = pixels.len() as f64;
        let mut lo = u16::MAX;
        let mut hi = u16::MIN;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for &p in pixels {
            lo = lo.min(p);
            hi = hi.max(p);
            let v = f64::from(p);
            sum += v;
            sum_sq += v * v;
        }
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        let scale = PERCENT_SCALE / LUMA16_MAX;
        Ok(Self {
            min: f64::from(lo) * scale,
            max: f64::from(hi) * scale,
            mean: mean * scale,
            stddev: variance.sqrt() * scale,
        })
    }
}

/// Source of per-tile statistics for a channel.
///
/// Implementations must be shareable across threads so the gate can fan out
/// per-tile lookups when the `threading` feature is enabled.
pub trait StatisticsProvider: Sync {
    fn stats(&self, channel: Channel, tile: &str) -> Result<ChannelStats>;
}

/// In-memory statistics keyed by channel and tile filename.
///
/// Also the deserialised form of a statistics JSON file:
/// `{ "land": { "tile_0000.png": [min, max, mean, stddev], .. }, "cloud": { .. } }`.
#[derive(Debug, Clone, Default)]
pub struct StatsTable {
    entries: BTreeMap<(Channel, String), ChannelStats>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: Channel, tile: impl Into<String>, stats: ChannelStats) {
        self.entries.insert((channel, tile.into()), stats);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tile names recorded for `channel`, sorted.
    pub fn tiles(&self, channel: Channel) -> Vec<String> {
        self.entries
            .keys()
            .filter(|(c, _)| *c == channel)
            .map(|(_, tile)| tile.clone())
            .collect()
    }

    /// Parse the JSON form. Every statistic must be a JSON number or a
    /// numeric string; anything else is `InvalidStatistics`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let root: BTreeMap<Channel, BTreeMap<String, Vec<Value>>> = serde_json::from_str(text)?;
        let mut table = Self::new();
        for (channel, tiles) in root {
            for (tile, raw) in tiles {
                let invalid = |detail: String| TileError::InvalidStatistics {
                    channel,
                    tile: tile.clone(),
                    detail,
                };
                if raw.len() != 4 {
                    return Err(invalid(format!("expected 4 values, got {}", raw.len())));
                }
                let mut values = [0.0f64; 4];
                for (slot, v) in values.iter_mut().zip(&raw) {
                    *slot = match v {
                        Value::Number(n) => n.as_f64(),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    }
                    .ok_or_else(|| invalid(format!("{v} is not numeric")))?;
                }
                let stats = ChannelStats::checked(channel, &tile, values)?;
                table.insert(channel, tile, stats);
            }
        }
        Ok(table)
    }
}

impl StatisticsProvider for StatsTable {
    fn stats(&self, channel: Channel, tile: &str) -> Result<ChannelStats> {
        self.entries
            .get(&(channel, tile.to_string()))
            .copied()
            .ok_or_else(|| TileError::InvalidStatistics {
                channel,
                tile: tile.to_string(),
                detail: "no statistics recorded".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn luma16_full_scale_maps_to_percent() {
        let s = ChannelStats::from_luma16(Channel::Land, "t", &[0, 65535]).unwrap();
        assert_relative_eq!(s.min, 0.0);
        assert_relative_eq!(s.max, 100.0);
        assert_relative_eq!(s.mean, 50.0, epsilon = 1e-9);
        assert_relative_eq!(s.stddev, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn luma16_uniform_tile_has_zero_spread() {
        let s = ChannelStats::from_luma16(Channel::Cloud, "t", &[13107; 16]).unwrap();
        assert_relative_eq!(s.min, 20.0, epsilon = 1e-9);
        assert_relative_eq!(s.max, 20.0, epsilon = 1e-9);
        assert_relative_eq!(s.stddev, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_tile_is_invalid() {
        assert!(matches!(
            ChannelStats::from_luma16(Channel::Land, "t", &[]),
            Err(TileError::InvalidStatistics { .. })
        ));
    }

    #[test]
    fn json_table_rejects_non_numeric_text() {
        let text = r#"{ "land": { "tile_0001.png": ["0", "5", "n/a", "1"] } }"#;
        match StatsTable::from_json_str(text) {
            Err(TileError::InvalidStatistics { channel, tile, .. }) => {
                assert_eq!(channel, Channel::Land);
                assert_eq!(tile, "tile_0001.png");
            }
            other => panic!("expected InvalidStatistics, got {other:?}"),
        }
    }

    #[test]
    fn checked_rejects_nan() {
        assert!(ChannelStats::checked(Channel::Land, "t", [0.0, f64::NAN, 0.0, 0.0]).is_err());
    }

    #[test]
    fn json_table_round_trips_numbers_and_strings() {
        let text = r#"{
            "land":  { "tile_0000.png": [0, 50, 40, 50] },
            "cloud": { "tile_0000.png": ["5", "90", "3", "90"] }
        }"#;
        let table = StatsTable::from_json_str(text).unwrap();
        assert_eq!(table.len(), 2);
        let cloud = table.stats(Channel::Cloud, "tile_0000.png").unwrap();
        assert_eq!(cloud, ChannelStats::new(5.0, 90.0, 3.0, 90.0));
        assert_eq!(table.tiles(Channel::Land), vec!["tile_0000.png"]);
    }

    #[test]
    fn json_table_rejects_boolean_statistic() {
        let text = r#"{ "land": { "tile_0000.png": [0, true, 40, 50] } }"#;
        assert!(matches!(
            StatsTable::from_json_str(text),
            Err(TileError::InvalidStatistics { .. })
        ));
    }

    #[test]
    fn missing_entry_is_an_error() {
        let table = StatsTable::new();
        assert!(table.stats(Channel::Land, "tile_0009.png").is_err());
    }
}
