//! Cross-model aggregation.
//!
//! Each source's detections are first de-duplicated on their own, then merged
//! across sources with the configured [`AggregationStrategy`]. The function is
//! pure: weights, thresholds and quorum arrive through [`AggregationConfig`].

mod cluster;
mod strategy;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::compliance::ClassCounts;
use crate::detect::{BoundingBox, PpeClass, RawDetection, SourceId};
use crate::nms::{greedy_clusters, suppress, Suppressible};

pub use cluster::{average_cluster, consensus_counts};
pub use strategy::AggregationStrategy;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MIN_VOTES: usize = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct AggregationConfig {
    pub iou_threshold: f32,
    pub strategy: AggregationStrategy,
    /// Distinct sources a voting cluster needs. Values below 1 act as 1.
    pub min_votes: usize,
    /// Per-source confidence multipliers. Missing sources weigh 1.0.
    pub source_weights: BTreeMap<SourceId, f32>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            strategy: AggregationStrategy::default(),
            min_votes: DEFAULT_MIN_VOTES,
            source_weights: BTreeMap::new(),
        }
    }
}

impl AggregationConfig {
    pub fn weight_for(&self, source: &SourceId) -> f32 {
        match self.source_weights.get(source) {
            Some(w) if w.is_finite() && *w > 0.0 => *w,
            Some(w) => {
                log::warn!("ignoring invalid weight {} for source {}", w, source);
                1.0
            }
            None => 1.0,
        }
    }
}

/// Where a unified detection came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// A single surviving detection.
    Source { source: SourceId },
    /// Synthetic average of a voting cluster.
    Cluster {
        contributing_sources: BTreeSet<SourceId>,
        vote_count: usize,
    },
}

impl Provenance {
    pub fn source_count(&self) -> usize {
        match self {
            Provenance::Source { .. } => 1,
            Provenance::Cluster {
                contributing_sources,
                ..
            } => contributing_sources.len(),
        }
    }

    pub fn vote_count(&self) -> usize {
        match self {
            Provenance::Source { .. } => 1,
            Provenance::Cluster { vote_count, .. } => *vote_count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnifiedDetection {
    pub class: PpeClass,
    /// Model confidence, unweighted.
    pub confidence: f32,
    /// Confidence scaled by the source weight; only used for ranking.
    pub weighted_confidence: f32,
    pub bbox: BoundingBox,
    pub provenance: Provenance,
}

impl UnifiedDetection {
    fn from_weighted(candidate: WeightedDetection) -> Self {
        Self {
            class: candidate.detection.class(),
            confidence: candidate.detection.confidence(),
            weighted_confidence: candidate.weight_score,
            bbox: *candidate.detection.bbox(),
            provenance: Provenance::Source {
                source: candidate.detection.source().clone(),
            },
        }
    }
}

/// Resolved detections for one frame.
///
/// `class_counts` always equals a tally of `detections` by class.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UnifiedDetectionSet {
    detections: Vec<UnifiedDetection>,
    class_counts: ClassCounts,
}

impl UnifiedDetectionSet {
    pub fn from_detections(detections: Vec<UnifiedDetection>) -> Self {
        let class_counts = ClassCounts::tally(detections.iter().map(|d| d.class));
        Self {
            detections,
            class_counts,
        }
    }

    pub fn detections(&self) -> &[UnifiedDetection] {
        &self.detections
    }

    pub fn class_counts(&self) -> &ClassCounts {
        &self.class_counts
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn into_detections(self) -> Vec<UnifiedDetection> {
        self.detections
    }
}

/// Aggregated set plus per-source counts after per-source suppression.
#[derive(Clone, Debug, Default)]
pub struct Aggregation {
    pub set: UnifiedDetectionSet,
    pub per_source_counts: BTreeMap<SourceId, ClassCounts>,
}

#[derive(Clone, Debug)]
struct WeightedDetection {
    detection: RawDetection,
    weight_score: f32,
}

impl Suppressible for WeightedDetection {
    fn class(&self) -> PpeClass {
        self.detection.class()
    }

    fn bbox(&self) -> &BoundingBox {
        self.detection.bbox()
    }

    fn score(&self) -> f32 {
        self.weight_score
    }
}

/// Merge per-source detections into one de-duplicated set.
///
/// Sources with empty lists (including failed sources) simply contribute
/// nothing; with no detections at all the result is empty.
pub fn aggregate(
    per_source: &BTreeMap<SourceId, Vec<RawDetection>>,
    config: &AggregationConfig,
) -> UnifiedDetectionSet {
    aggregate_with_diagnostics(per_source, config).set
}

/// Like [`aggregate`], also reporting each source's own counts.
pub fn aggregate_with_diagnostics(
    per_source: &BTreeMap<SourceId, Vec<RawDetection>>,
    config: &AggregationConfig,
) -> Aggregation {
    let mut combined = Vec::new();
    let mut per_source_counts = BTreeMap::new();

    for (source, detections) in per_source {
        let kept = suppress(detections.clone(), config.iou_threshold);
        per_source_counts.insert(
            source.clone(),
            ClassCounts::tally(kept.iter().map(|d| d.class())),
        );

        let weight = config.weight_for(source);
        combined.extend(kept.into_iter().map(|detection| WeightedDetection {
            weight_score: detection.confidence() * weight,
            detection,
        }));
    }

    let detections = match config.strategy {
        AggregationStrategy::UnionNms | AggregationStrategy::Average => {
            union_nms(combined, config.iou_threshold)
        }
        AggregationStrategy::WeightedVoting => {
            weighted_voting(&combined, config.iou_threshold, config.min_votes.max(1))
        }
    };

    Aggregation {
        set: UnifiedDetectionSet::from_detections(detections),
        per_source_counts,
    }
}

fn union_nms(combined: Vec<WeightedDetection>, iou_threshold: f32) -> Vec<UnifiedDetection> {
    suppress(combined, iou_threshold)
        .into_iter()
        .map(UnifiedDetection::from_weighted)
        .collect()
}

fn weighted_voting(
    combined: &[WeightedDetection],
    iou_threshold: f32,
    min_votes: usize,
) -> Vec<UnifiedDetection> {
    let mut out = Vec::new();
    for cluster in greedy_clusters(combined, iou_threshold) {
        let distinct: BTreeSet<&SourceId> = cluster
            .iter()
            .map(|&idx| combined[idx].detection.source())
            .collect();
        if distinct.len() < min_votes {
            log::debug!(
                "dropping {} cluster backed by {} of {} required sources",
                combined[cluster[0]].detection.class(),
                distinct.len(),
                min_votes
            );
            continue;
        }

        let members: Vec<RawDetection> = cluster
            .iter()
            .map(|&idx| combined[idx].detection.clone())
            .collect();
        if let Some(mut unified) = average_cluster(&members) {
            let weighted: f32 = cluster.iter().map(|&idx| combined[idx].weight_score).sum();
            unified.weighted_confidence = weighted / cluster.len() as f32;
            out.push(unified);
        }
    }
    out
}
