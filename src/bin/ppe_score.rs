//! ppe_score - Score one frame's detections and print the report as JSON.
//!
//! Two input modes:
//! 1. `--input <file|->`: a frame document with per-model detections
//!    (`{"width", "height", "sources": {"<model>": [...]}}`).
//! 2. `--frame <file> --replay <model>=<path>`: replay recorded model output
//!    keyed by the frame's SHA-256.
//!
//! The report can optionally be appended to the SQLite report store.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ppe_compliance::{
    frame_digest, AggregationStrategy, ClassCounts, CompliancePipeline, DetectionRecord,
    FrameReport, PipelineConfig, ReplaySource, ReportStore, SourceId, SourceRegistry,
    SourceReport, SqliteReportStore,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Score PPE compliance for one frame")]
struct Args {
    /// Frame document with per-model detections ("-" reads stdin).
    #[arg(long, conflicts_with = "frame")]
    input: Option<String>,

    /// Raw frame bytes, scored against recorded model output (see --replay).
    #[arg(long, requires = "replay")]
    frame: Option<PathBuf>,

    /// Recorded model output as <model>=<path>; repeat once per model.
    #[arg(long, value_name = "MODEL=PATH")]
    replay: Vec<String>,

    /// Frame width in pixels (frame mode).
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height in pixels (frame mode).
    #[arg(long, default_value_t = 640)]
    height: u32,

    /// Aggregation strategy (union_nms|weighted_voting|average).
    #[arg(long)]
    strategy: Option<String>,

    /// Overlap above which two same-class boxes are duplicates.
    #[arg(long)]
    iou_threshold: Option<f32>,

    /// Minimum distinct models per detection (weighted_voting).
    #[arg(long)]
    min_votes: Option<usize>,

    /// Append the report to this SQLite database.
    #[arg(long, env = "PPE_DB_PATH")]
    db: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

/// Frame document accepted by `--input`.
#[derive(Debug, Deserialize)]
struct FrameDocument {
    width: u32,
    height: u32,
    sources: BTreeMap<SourceId, SourceEntry>,
}

/// Box lists are kept as raw JSON so one malformed record is dropped on its
/// own instead of failing the whole document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceEntry {
    Boxes(Vec<serde_json::Value>),
    Summary { summary: ClassCounts },
    Failed { error: String },
}

impl SourceEntry {
    fn into_report(self, source: &SourceId) -> Result<SourceReport> {
        match self {
            SourceEntry::Boxes(values) => {
                let records = values
                    .into_iter()
                    .filter_map(|value| {
                        match serde_json::from_value::<DetectionRecord>(value) {
                            Ok(record) => Some(record),
                            Err(e) => {
                                log::warn!("{}: dropping malformed detection: {}", source, e);
                                None
                            }
                        }
                    })
                    .collect();
                Ok(SourceReport::Boxes(records))
            }
            SourceEntry::Summary { summary } => Ok(SourceReport::Summary(summary)),
            SourceEntry::Failed { error } => Err(anyhow!(error)),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(&args.ui);

    let config = {
        let _stage = ui.stage("Load configuration");
        load_config(&args)?
    };

    let report = if let Some(input) = args.input.as_deref() {
        let raw = {
            let _stage = ui.stage("Read frame document");
            read_input(input)?
        };
        let _stage = ui.stage("Score frame");
        score_document(&raw, &config)?
    } else if let Some(frame) = args.frame.as_ref() {
        let pipeline = {
            let _stage = ui.stage("Load recorded model output");
            replay_pipeline(&args.replay, &config)?
        };
        let pixels = std::fs::read(frame)
            .with_context(|| format!("failed to read frame {}", frame.display()))?;
        let _stage = ui.stage("Score frame");
        pipeline.process_frame(&pixels, args.width, args.height)?
    } else {
        return Err(anyhow!("one of --input or --frame is required"));
    };

    if let Some(db) = args.db.as_deref() {
        let _stage = ui.stage("Store report");
        let mut store = SqliteReportStore::open(db)?;
        let id = store.append(&report)?;
        log::info!("stored report {} in {}", id, db);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load()?;
    if let Some(strategy) = args.strategy.as_deref() {
        config.aggregation.strategy = strategy
            .parse::<AggregationStrategy>()
            .map_err(|e| anyhow!("--strategy: {}", e))?;
    }
    if let Some(iou) = args.iou_threshold {
        config.aggregation.iou_threshold = iou;
    }
    if let Some(votes) = args.min_votes {
        config.aggregation.min_votes = votes;
    }
    config.validate()?;
    Ok(config)
}

fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read(input).with_context(|| format!("failed to read {}", input))
}

fn score_document(raw: &[u8], config: &PipelineConfig) -> Result<FrameReport> {
    let document: FrameDocument =
        serde_json::from_slice(raw).context("invalid frame document")?;
    let reports = document
        .sources
        .into_iter()
        .map(|(id, entry)| {
            let report = entry.into_report(&id);
            (id, report)
        })
        .collect();
    CompliancePipeline::from_config(SourceRegistry::new(), config).score_sources(
        reports,
        document.width,
        document.height,
        frame_digest(raw),
    )
}

fn replay_pipeline(specs: &[String], config: &PipelineConfig) -> Result<CompliancePipeline> {
    let mut registry = SourceRegistry::new();
    for spec in specs {
        let (id, path) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("--replay expects <model>=<path>, got {}", spec))?;
        ppe_compliance::config::validate_source_id(id)?;
        registry.register(ReplaySource::from_path(id, std::path::Path::new(path))?)?;
    }
    let pipeline = CompliancePipeline::from_config(registry, config);
    pipeline.warm_up()?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppe_compliance::{AlertType, CountsBasis};

    #[test]
    fn document_entries_cover_boxes_summaries_and_failures() {
        let raw = br#"{
            "width": 640,
            "height": 480,
            "sources": {
                "best.pt": [
                    {"class": "person", "confidence": 0.9, "bbox": [10, 10, 110, 310]},
                    {"class": "helmet", "confidence": 0.8, "bbox": [40, 10, 80, 50]}
                ],
                "cloud": {"summary": {"person": 3}},
                "session_004.pt": {"error": "cuda out of memory"}
            }
        }"#;
        let report = score_document(raw, &PipelineConfig::default()).unwrap();
        assert_eq!(report.counts_basis, CountsBasis::Detections);
        assert_eq!(report.failed_sources, vec![SourceId::from("session_004.pt")]);
        assert_eq!(report.result.total_persons, 1);
        assert_eq!(report.result.compliance_rate, 60.0);
        assert_eq!(report.result.alert_type, AlertType::Avertissement);
        assert_eq!(report.frame_digest, frame_digest(raw));
    }

    #[test]
    fn malformed_records_are_dropped_individually() {
        let raw = br#"{
            "width": 640,
            "height": 480,
            "sources": {
                "best.pt": [
                    {"class": "person", "confidence": 0.9, "bbox": [10, 10, 110, 310]},
                    {"class": "helmet", "confidence": 0.8, "bbox": [40.5, 10.0, 80.2, 50.9]},
                    {"class": "vest", "confidence": 0.7},
                    "boots",
                    {"class": "glasses", "confidence": 0.6, "bbox": [50, 20, 70, 30]}
                ]
            }
        }"#;
        let report = score_document(raw, &PipelineConfig::default()).unwrap();
        assert!(report.failed_sources.is_empty());
        assert_eq!(report.class_counts.person, 1);
        assert_eq!(report.class_counts.glasses, 1);
        assert_eq!(report.class_counts.helmet, 0);
        assert_eq!(report.class_counts.vest, 0);
        // Helmet, vest and boots are missing.
        assert_eq!(report.result.compliance_rate, 60.0);
    }

    #[test]
    fn empty_document_scores_zero() {
        let raw = br#"{"width": 640, "height": 480, "sources": {}}"#;
        let report = score_document(raw, &PipelineConfig::default()).unwrap();
        assert_eq!(report.counts_basis, CountsBasis::Empty);
        assert_eq!(report.result.compliance_rate, 0.0);
    }

    #[test]
    fn replay_specs_need_a_model_name() {
        let config = PipelineConfig::default();
        assert!(replay_pipeline(&["frames.json".to_string()], &config).is_err());
    }
}
