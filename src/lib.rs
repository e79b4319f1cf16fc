//! PPE compliance scoring.
//!
//! This crate turns raw object detections from one or more independent
//! models into a single compliance score for a frame.
//!
//! # Pipeline
//!
//! 1. **Sources** (`detect`): each model returns boxes or per-class counts.
//!    Malformed records are dropped; a failing source contributes nothing.
//! 2. **Suppression** (`nms`): same-class duplicates are removed per source.
//! 3. **Aggregation** (`aggregate`): sources are merged with `union_nms`
//!    (default), `weighted_voting`, or `average`.
//! 4. **Scoring** (`compliance`): persons and the four equipment categories
//!    map to a bucketed rate, a level, and an alert type. Zero persons is
//!    always 0%.
//!
//! The core (steps 2-4) is pure and holds no shared state. Persistence
//! (`storage`) and alert rate limiting (`alert`) sit at its boundary.
//!
//! # Module Structure
//!
//! - `detect`: classes, boxes, validated detections, sources and registry
//! - `geometry`, `nms`, `aggregate`, `compliance`: the scoring core
//! - `pipeline`: per-frame orchestration and `FrameReport`
//! - `config`: file + environment configuration
//! - `storage`, `alert`: persistence and notification collaborators

pub mod aggregate;
pub mod alert;
pub mod compliance;
pub mod config;
pub mod detect;
pub mod geometry;
pub mod nms;
pub mod pipeline;
pub mod storage;

pub use aggregate::{
    aggregate, aggregate_with_diagnostics, average_cluster, consensus_counts, AggregationConfig,
    AggregationStrategy, Provenance, UnifiedDetection, UnifiedDetectionSet,
};
pub use alert::{AlertDecision, AlertGate, Clock, ManualClock, SystemClock};
pub use compliance::{score, AlertType, ClassCounts, ComplianceLevel, ComplianceResult};
pub use config::PipelineConfig;
pub use detect::{
    BoundingBox, DetectionRecord, DetectionSource, PpeClass, RawDetection, ReplaySource,
    SourceId, SourceRegistry, SourceReport, SourceRun, StubSource,
};
pub use geometry::iou;
pub use nms::suppress;
pub use pipeline::{evaluate, frame_digest, CompliancePipeline, CountsBasis, FrameReport};
pub use storage::{
    ComplianceSummary, InMemoryReportStore, ReportStore, SqliteReportStore, StoredReport,
};
