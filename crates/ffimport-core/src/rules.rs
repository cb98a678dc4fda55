//! Statistics gate: ordered, short-circuiting accept/reject rule chains.
//!
//! Rules are plain data built from [`SortConfig`] when a chain is
//! constructed. A chain examines its candidates in order; the first failing
//! rule rejects the tile with the chain's label and later rules are never
//! evaluated for it. [`classify`] runs the land chain to completion over all
//! candidates, then the cloud chain over the land survivors.

use std::fmt;

#[cfg(feature = "threading")]
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::SortConfig;
use crate::error::Result;
use crate::stats::{Channel, ChannelStats, StatisticsProvider};

// ── Outcome labels ────────────────────────────────────────────────────────────

/// Final disposition of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileStatus {
    Accepted,
    NoWater,
    TooCloudy,
}

impl TileStatus {
    /// Text written to the `reason` column.
    pub fn label(self) -> &'static str {
        match self {
            TileStatus::Accepted => "Accepted",
            TileStatus::NoWater => "No Water",
            TileStatus::TooCloudy => "Too Cloudy",
        }
    }
}

impl fmt::Display for TileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Rule descriptors ──────────────────────────────────────────────────────────

/// A keep-condition over one tile's channel statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Predicate {
    /// `max > threshold`
    MaxAbove(f64),
    /// `min < threshold`
    MinBelow(f64),
    /// `mean > threshold || stddev > sensitivity`
    MeanAboveOrSpread { threshold: f64, sensitivity: f64 },
    /// `mean < threshold || stddev > sensitivity`
    MeanBelowOrSpread { threshold: f64, sensitivity: f64 },
}

impl Predicate {
    /// True if the tile passes (is kept by) this predicate.
    #[inline]
    pub fn keeps(&self, s: &ChannelStats) -> bool {
        match *self {
            Predicate::MaxAbove(t) => s.max > t,
            Predicate::MinBelow(t) => s.min < t,
            Predicate::MeanAboveOrSpread { threshold, sensitivity } => {
                s.mean > threshold || s.stddev > sensitivity
            }
            Predicate::MeanBelowOrSpread { threshold, sensitivity } => {
                s.mean < threshold || s.stddev > sensitivity
            }
        }
    }
}

/// A predicate paired with the label recorded when it fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub predicate: Predicate,
    pub reject: TileStatus,
}

/// Ordered rules bound to one mask channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleChain {
    pub channel: Channel,
    pub rules: Vec<Rule>,
    pub enabled: bool,
}

/// Tile dropped by a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub filename: String,
    pub reason: TileStatus,
}

/// Result of running one chain: both halves keep input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateOutcome {
    pub retained: Vec<String>,
    pub rejected: Vec<Rejection>,
}

impl RuleChain {
    /// Land chain ("No Water"): keep iff `max > T` and (`mean > T` or `stddev > S`).
    pub fn land(cfg: &SortConfig) -> Self {
        let reject = TileStatus::NoWater;
        Self {
            channel: Channel::Land,
            rules: vec![
                Rule { predicate: Predicate::MaxAbove(cfg.land_threshold), reject },
                Rule {
                    predicate: Predicate::MeanAboveOrSpread {
                        threshold: cfg.land_threshold,
                        sensitivity: cfg.land_sensitivity,
                    },
                    reject,
                },
            ],
            enabled: cfg.remove_land,
        }
    }

    /// Cloud chain ("Too Cloudy"): keep iff `min < T` and (`mean < T` or `stddev > S`).
    pub fn cloud(cfg: &SortConfig) -> Self {
        let reject = TileStatus::TooCloudy;
        Self {
            channel: Channel::Cloud,
            rules: vec![
                Rule { predicate: Predicate::MinBelow(cfg.cloud_threshold), reject },
                Rule {
                    predicate: Predicate::MeanBelowOrSpread {
                        threshold: cfg.cloud_threshold,
                        sensitivity: cfg.cloud_sensitivity,
                    },
                    reject,
                },
            ],
            enabled: cfg.remove_clouds,
        }
    }

    /// Position of the first rule the stats fail, or `None` if all pass.
    /// Rules after the first failure are not evaluated.
    pub fn first_failure(&self, stats: &ChannelStats) -> Option<usize> {
        self.rules.iter().position(|rule| !rule.predicate.keeps(stats))
    }

    fn judge<P: StatisticsProvider + ?Sized>(&self, provider: &P, tile: &str) -> Result<Option<TileStatus>> {
        let stats = provider.stats(self.channel, tile)?;
        let verdict = self.first_failure(&stats).map(|i| self.rules[i].reject);
        debug!(
            channel = %self.channel,
            tile,
            min = stats.min,
            max = stats.max,
            mean = stats.mean,
            stddev = stats.stddev,
            verdict = verdict.map_or("retained", TileStatus::label),
            "tile judged"
        );
        Ok(verdict)
    }

    /// Partition `candidates` into retained and rejected, preserving order.
    /// A disabled chain retains everything and queries no statistics.
    /// Any statistics failure aborts the whole chain.
    pub fn apply<P: StatisticsProvider + ?Sized>(&self, candidates: Vec<String>, provider: &P) -> Result<GateOutcome> {
        if !self.enabled {
            info!(channel = %self.channel, "chain disabled, skipping");
            return Ok(GateOutcome { retained: candidates, rejected: Vec::new() });
        }
        info!(channel = %self.channel, count = candidates.len(), "examining tiles");

        #[cfg(feature = "threading")]
        let verdicts: Vec<Option<TileStatus>> = candidates
            .par_iter()
            .map(|tile| self.judge(provider, tile))
            .collect::<Result<_>>()?;
        #[cfg(not(feature = "threading"))]
        let verdicts: Vec<Option<TileStatus>> = candidates
            .iter()
            .map(|tile| self.judge(provider, tile))
            .collect::<Result<_>>()?;

        let mut outcome = GateOutcome::default();
        for (filename, verdict) in candidates.into_iter().zip(verdicts) {
            match verdict {
                Some(reason) => outcome.rejected.push(Rejection { filename, reason }),
                None => outcome.retained.push(filename),
            }
        }
        Ok(outcome)
    }
}

// ── Two-chain classification ──────────────────────────────────────────────────

/// Three-way partition of a scene's tiles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub accepted: Vec<String>,
    pub no_water: Vec<String>,
    pub too_cloudy: Vec<String>,
}

impl Classification {
    /// All rejected tiles with their reasons: no-water first, then too-cloudy.
    pub fn rejects(&self) -> impl Iterator<Item = (&str, TileStatus)> {
        self.no_water
            .iter()
            .map(|f| (f.as_str(), TileStatus::NoWater))
            .chain(self.too_cloudy.iter().map(|f| (f.as_str(), TileStatus::TooCloudy)))
    }

    /// All tiles with their status, accepted first.
    pub fn statuses(&self) -> impl Iterator<Item = (&str, TileStatus)> {
        self.accepted
            .iter()
            .map(|f| (f.as_str(), TileStatus::Accepted))
            .chain(self.rejects())
    }

    pub fn total(&self) -> usize {
        self.accepted.len() + self.no_water.len() + self.too_cloudy.len()
    }
}

/// Run the land chain over every candidate, then the cloud chain over the
/// land survivors.
pub fn classify<P: StatisticsProvider + ?Sized>(
    candidates: Vec<String>,
    land: &RuleChain,
    cloud: &RuleChain,
    provider: &P,
) -> Result<Classification> {
    let after_land = land.apply(candidates, provider)?;
    let after_cloud = cloud.apply(after_land.retained, provider)?;

    let take = |rejected: Vec<Rejection>| rejected.into_iter().map(|r| r.filename).collect::<Vec<_>>();
    let result = Classification {
        accepted: after_cloud.retained,
        no_water: take(after_land.rejected),
        too_cloudy: take(after_cloud.rejected),
    };
    info!(
        retained = result.accepted.len(),
        no_water = result.no_water.len(),
        too_cloudy = result.too_cloudy.len(),
        "classification complete"
    );
    Ok(result)
}
