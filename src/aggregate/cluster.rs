use std::collections::{BTreeMap, BTreeSet};

use crate::compliance::ClassCounts;
use crate::detect::{BoundingBox, PpeClass, RawDetection, SourceId};

use super::{Provenance, UnifiedDetection};

/// Reduce a cluster of overlapping detections to one synthetic detection.
///
/// Returns `None` for an empty cluster.
pub fn average_cluster(cluster: &[RawDetection]) -> Option<UnifiedDetection> {
    let head = cluster.first()?;
    let n = cluster.len() as f64;

    let mean = |coord: fn(&BoundingBox) -> i32| -> i32 {
        let sum: f64 = cluster.iter().map(|d| f64::from(coord(d.bbox()))).sum();
        (sum / n).round() as i32
    };
    let bbox = BoundingBox::new(
        mean(BoundingBox::x1),
        mean(BoundingBox::y1),
        mean(BoundingBox::x2),
        mean(BoundingBox::y2),
    )
    .unwrap_or(*head.bbox());

    let confidence =
        (cluster.iter().map(|d| f64::from(d.confidence())).sum::<f64>() / n) as f32;

    let contributing_sources: BTreeSet<SourceId> =
        cluster.iter().map(|d| d.source().clone()).collect();

    Some(UnifiedDetection {
        class: majority_class(cluster, head.class()),
        confidence,
        weighted_confidence: confidence,
        bbox,
        provenance: Provenance::Cluster {
            contributing_sources,
            vote_count: cluster.len(),
        },
    })
}

/// Most frequent class; ties go to `preferred`.
fn majority_class(cluster: &[RawDetection], preferred: PpeClass) -> PpeClass {
    let mut tally: BTreeMap<PpeClass, usize> = BTreeMap::new();
    for det in cluster {
        *tally.entry(det.class()).or_default() += 1;
    }
    let best = tally.values().copied().max().unwrap_or(0);
    if tally.get(&preferred).copied() == Some(best) {
        return preferred;
    }
    tally
        .into_iter()
        .find(|(_, count)| *count == best)
        .map(|(class, _)| class)
        .unwrap_or(preferred)
}

/// Mean of per-source counts, rounded up per class.
///
/// A class reported by any source survives the average: `[1, 0]` becomes 1.
pub fn consensus_counts(per_source: &[ClassCounts]) -> ClassCounts {
    if per_source.is_empty() {
        return ClassCounts::default();
    }
    let n = per_source.len() as u64;
    let mut out = ClassCounts::default();
    for class in PpeClass::ALL {
        let sum: u64 = per_source.iter().map(|c| u64::from(c.get(class))).sum();
        let ceil = sum.div_ceil(n);
        out.set(class, u32::try_from(ceil).unwrap_or(u32::MAX));
    }
    out
}
