use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::compliance::ClassCounts;

use super::backend::DetectionSource;
use super::result::{RawDetection, SourceId, SourceReport};

/// Validated per-source output for one frame.
///
/// Failed sources appear in `failed` and as empty lists in `boxes`.
#[derive(Clone, Debug, Default)]
pub struct SourceRun {
    pub boxes: BTreeMap<SourceId, Vec<RawDetection>>,
    pub summaries: BTreeMap<SourceId, ClassCounts>,
    pub failed: Vec<SourceId>,
}

impl SourceRun {
    /// Validate raw source results.
    ///
    /// Records are clamped to the frame; malformed records and records below
    /// `min_confidence` are dropped.
    pub fn from_reports(
        reports: BTreeMap<SourceId, Result<SourceReport>>,
        width: u32,
        height: u32,
        min_confidence: f32,
    ) -> Self {
        let mut run = SourceRun::default();
        for (id, report) in reports {
            match report {
                Ok(SourceReport::Boxes(records)) => {
                    let total = records.len();
                    let detections: Vec<RawDetection> = records
                        .iter()
                        .filter_map(|r| RawDetection::from_record_in_frame(r, &id, width, height))
                        .filter(|d| d.confidence() >= min_confidence)
                        .collect();
                    if detections.len() < total {
                        log::debug!(
                            "{}: kept {} of {} records",
                            id,
                            detections.len(),
                            total
                        );
                    }
                    run.boxes.insert(id, detections);
                }
                Ok(SourceReport::Summary(counts)) => {
                    run.summaries.insert(id, counts);
                }
                Err(err) => {
                    log::warn!("detection source {} failed: {:#}", id, err);
                    run.boxes.insert(id.clone(), Vec::new());
                    run.failed.push(id);
                }
            }
        }
        run
    }

    /// Sources that produced a report.
    pub fn succeeded(&self) -> Vec<SourceId> {
        self.boxes
            .keys()
            .chain(self.summaries.keys())
            .filter(|id| !self.failed.contains(*id))
            .cloned()
            .collect()
    }

    pub fn has_boxes(&self) -> bool {
        self.boxes.keys().any(|id| !self.failed.contains(id))
    }
}

/// Registry of detection sources, run together on every frame.
///
/// Sources are wrapped in `Mutex` because `DetectionSource::detect` takes `&mut self`.
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, Arc<Mutex<dyn DetectionSource>>>,
    min_confidence: f32,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            min_confidence: 0.0,
        }
    }

    /// Drop records below this confidence before aggregation.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Register a source. Identifiers must be unique.
    pub fn register<S: DetectionSource + 'static>(&mut self, source: S) -> Result<()> {
        let id = source.id().clone();
        if self.sources.contains_key(&id) {
            return Err(anyhow!("source '{}' already registered", id));
        }
        self.sources.insert(id, Arc::new(Mutex::new(source)));
        Ok(())
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// List registered sources in identifier order.
    pub fn list(&self) -> Vec<SourceId> {
        self.sources.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Warm up every source, stopping at the first failure.
    pub fn warm_up_all(&self) -> Result<()> {
        for (id, source) in &self.sources {
            let mut guard = source
                .lock()
                .map_err(|_| anyhow!("source {} lock poisoned", id))?;
            guard
                .warm_up()
                .map_err(|e| anyhow!("source {} warm-up failed: {}", id, e))?;
        }
        Ok(())
    }

    /// Run every source on the frame, one thread per source.
    ///
    /// Sources finish in any order. A source that errors, panics, or whose
    /// lock is poisoned is reported as failed; the others are unaffected.
    pub fn detect_all(&self, pixels: &[u8], width: u32, height: u32) -> SourceRun {
        let reports: BTreeMap<SourceId, Result<SourceReport>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .sources
                .iter()
                .map(|(id, source)| {
                    let handle = scope.spawn(move || {
                        let mut guard = source
                            .lock()
                            .map_err(|_| anyhow!("source {} lock poisoned", id))?;
                        guard.detect(pixels, width, height)
                    });
                    (id.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    let report = handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("source {} panicked", id)));
                    (id, report)
                })
                .collect()
        });

        SourceRun::from_reports(reports, width, height, self.min_confidence)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
