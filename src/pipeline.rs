//! Per-frame orchestration: run sources, aggregate, score.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aggregate::{
    aggregate_with_diagnostics, consensus_counts, AggregationConfig, AggregationStrategy,
    UnifiedDetection,
};
use crate::compliance::{score, ClassCounts, ComplianceResult};
use crate::config::PipelineConfig;
use crate::detect::{SourceId, SourceRegistry, SourceReport, SourceRun};

/// Hex SHA-256 of a frame's pixels (or any input document).
pub fn frame_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Which counts the compliance score was computed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountsBasis {
    /// Tally of the resolved detection list.
    Detections,
    /// Rounded-up mean of count-only sources; no boxes were available.
    Consensus,
    /// No source produced anything.
    Empty,
}

/// Everything handed to persistence and notification for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_digest: String,
    pub captured_at: u64,
    pub strategy: AggregationStrategy,
    pub result: ComplianceResult,
    pub detections: Vec<UnifiedDetection>,
    pub class_counts: ClassCounts,
    pub consensus_counts: ClassCounts,
    pub counts_basis: CountsBasis,
    pub sources: Vec<SourceId>,
    pub failed_sources: Vec<SourceId>,
}

/// Aggregate and score an already-collected source run.
pub fn evaluate(
    run: &SourceRun,
    config: &AggregationConfig,
    frame_digest: String,
    captured_at: u64,
) -> FrameReport {
    let aggregation = aggregate_with_diagnostics(&run.boxes, config);

    let per_source: Vec<ClassCounts> = aggregation
        .per_source_counts
        .iter()
        .filter(|(id, _)| !run.failed.contains(*id))
        .map(|(_, counts)| *counts)
        .chain(run.summaries.values().copied())
        .collect();
    let consensus = consensus_counts(&per_source);

    let class_counts = *aggregation.set.class_counts();
    let (scoring_counts, counts_basis) = if run.has_boxes() {
        (class_counts, CountsBasis::Detections)
    } else if !run.summaries.is_empty() {
        let summaries: Vec<ClassCounts> = run.summaries.values().copied().collect();
        (consensus_counts(&summaries), CountsBasis::Consensus)
    } else {
        (ClassCounts::default(), CountsBasis::Empty)
    };

    let result = score(&scoring_counts);
    log::info!(
        "frame {}: {} detections, {} persons, {:.1}% ({}, alert {})",
        short_digest(&frame_digest),
        aggregation.set.len(),
        result.total_persons,
        result.compliance_rate,
        result.compliance_level,
        result.alert_type
    );

    FrameReport {
        frame_digest,
        captured_at,
        strategy: config.strategy,
        result,
        detections: aggregation.set.into_detections(),
        class_counts,
        consensus_counts: consensus,
        counts_basis,
        sources: run.succeeded(),
        failed_sources: run.failed.clone(),
    }
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Detection sources plus the aggregation parameters applied to every frame.
pub struct CompliancePipeline {
    registry: SourceRegistry,
    aggregation: AggregationConfig,
}

impl CompliancePipeline {
    pub fn new(registry: SourceRegistry, aggregation: AggregationConfig) -> Self {
        Self {
            registry,
            aggregation,
        }
    }

    pub fn from_config(registry: SourceRegistry, config: &PipelineConfig) -> Self {
        Self::new(
            registry.with_min_confidence(config.min_confidence),
            config.aggregation.clone(),
        )
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn aggregation(&self) -> &AggregationConfig {
        &self.aggregation
    }

    /// Warm up every source before the first frame. A failure names the source.
    pub fn warm_up(&self) -> Result<()> {
        self.registry.warm_up_all()?;
        log::info!("warmed up {} detection sources", self.registry.len());
        Ok(())
    }

    /// Run every source on the frame and score the merged result.
    ///
    /// Source failures never fail the frame; with every source down the
    /// report scores 0%.
    pub fn process_frame(&self, pixels: &[u8], width: u32, height: u32) -> Result<FrameReport> {
        let captured_at = now_s()?;
        let run = self.registry.detect_all(pixels, width, height);
        if !run.failed.is_empty() && run.succeeded().is_empty() {
            log::warn!("all {} detection sources failed", run.failed.len());
        }
        Ok(evaluate(
            &run,
            &self.aggregation,
            frame_digest(pixels),
            captured_at,
        ))
    }

    /// Score reports that were collected elsewhere, e.g. read from a file.
    ///
    /// Reports go through the same validation as live sources; an `Err`
    /// entry counts as a failed source.
    pub fn score_sources(
        &self,
        reports: BTreeMap<SourceId, Result<SourceReport>>,
        width: u32,
        height: u32,
        frame_digest: String,
    ) -> Result<FrameReport> {
        let run = SourceRun::from_reports(
            reports,
            width,
            height,
            self.registry.min_confidence(),
        );
        Ok(evaluate(&run, &self.aggregation, frame_digest, now_s()?))
    }
}
