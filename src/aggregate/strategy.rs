use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// How detections from several sources are merged into one set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Union of all sources followed by class-partitioned NMS. Never drops a
    /// detection only because a single source reported it.
    #[default]
    UnionNms,
    /// Cross-source clusters kept only when enough distinct sources agree.
    /// Trades recall for precision.
    WeightedVoting,
    /// Same code path as `UnionNms`; kept as a separate name for existing configs.
    Average,
}

impl AggregationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationStrategy::UnionNms => "union_nms",
            AggregationStrategy::WeightedVoting => "weighted_voting",
            AggregationStrategy::Average => "average",
        }
    }

    /// Parse a configured strategy name, falling back to `union_nms` with a
    /// warning when the name is not recognised.
    pub fn parse_or_default(name: &str) -> Self {
        match name.parse() {
            Ok(strategy) => strategy,
            Err(err) => {
                log::warn!("{}; falling back to union_nms", err);
                AggregationStrategy::UnionNms
            }
        }
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "union_nms" => Ok(AggregationStrategy::UnionNms),
            "weighted_voting" => Ok(AggregationStrategy::WeightedVoting),
            "average" => Ok(AggregationStrategy::Average),
            _ => Err(anyhow!("unknown aggregation strategy '{}'", s)),
        }
    }
}
