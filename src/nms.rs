//! Same-class non-maximum suppression.
//!
//! Both the duplicate suppressor and the voting aggregator use the same greedy
//! grouping: candidates are visited in descending score order, and each
//! unclaimed candidate opens a cluster that claims every later unclaimed
//! candidate of the same class overlapping it by more than the threshold.
//! Suppression keeps each cluster's head; voting reduces the whole cluster.

use crate::detect::{BoundingBox, PpeClass, RawDetection};
use crate::geometry::iou;

/// Anything that can be grouped by class and box overlap.
pub trait Suppressible {
    fn class(&self) -> PpeClass;
    fn bbox(&self) -> &BoundingBox;
    /// Ranking key. Higher scores are visited first.
    fn score(&self) -> f32;
}

impl Suppressible for RawDetection {
    fn class(&self) -> PpeClass {
        RawDetection::class(self)
    }

    fn bbox(&self) -> &BoundingBox {
        RawDetection::bbox(self)
    }

    fn score(&self) -> f32 {
        self.confidence()
    }
}

/// Indices of `items` in descending score order. Ties keep input order.
fn ranked<T: Suppressible>(items: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| items[b].score().total_cmp(&items[a].score()));
    order
}

/// Greedy clusters over `items`, each listed head first.
///
/// Clusters are returned in the order their heads were selected, so heads are
/// in descending score order.
pub fn greedy_clusters<T: Suppressible>(items: &[T], iou_threshold: f32) -> Vec<Vec<usize>> {
    let order = ranked(items);
    let mut claimed = vec![false; items.len()];
    let mut clusters = Vec::new();

    for (pos, &head) in order.iter().enumerate() {
        if claimed[head] {
            continue;
        }
        claimed[head] = true;
        let mut cluster = vec![head];

        for &other in &order[pos + 1..] {
            if claimed[other] || items[other].class() != items[head].class() {
                continue;
            }
            if iou(items[head].bbox(), items[other].bbox()) > iou_threshold {
                claimed[other] = true;
                cluster.push(other);
            }
        }
        clusters.push(cluster);
    }

    clusters
}

/// Remove same-class duplicates, keeping the highest-scoring box of each group.
///
/// Boxes of different classes never suppress each other. Survivors come back
/// in the order they were kept.
pub fn suppress<T: Suppressible>(items: Vec<T>, iou_threshold: f32) -> Vec<T> {
    if items.is_empty() {
        return items;
    }
    let heads: Vec<usize> = greedy_clusters(&items, iou_threshold)
        .into_iter()
        .map(|cluster| cluster[0])
        .collect();

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    heads
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect()
}
