use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::aggregate::{AggregationConfig, AggregationStrategy};
use crate::detect::SourceId;

const DEFAULT_DB_PATH: &str = "ppe_compliance.db";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 600;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    db_path: Option<String>,
    min_confidence: Option<f32>,
    aggregation: Option<AggregationConfigFile>,
    alerts: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AggregationConfigFile {
    strategy: Option<String>,
    iou_threshold: Option<f32>,
    min_votes: Option<usize>,
    source_weights: Option<BTreeMap<String, f32>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: String,
    pub min_confidence: f32,
    /// Handed to the aggregator as-is for every frame.
    pub aggregation: AggregationConfig,
    pub alert_cooldown: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            aggregation: AggregationConfig::default(),
            alert_cooldown: Duration::from_secs(DEFAULT_ALERT_COOLDOWN_SECS),
        }
    }
}

impl PipelineConfig {
    /// Load from the file named by `PPE_CONFIG` (if any), then apply `PPE_*`
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PPE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let defaults = Self::default();
        let aggregation = file.aggregation.unwrap_or_default();
        let strategy = aggregation
            .strategy
            .as_deref()
            .map(AggregationStrategy::parse_or_default)
            .unwrap_or(defaults.aggregation.strategy);
        let source_weights = aggregation
            .source_weights
            .unwrap_or_default()
            .into_iter()
            .map(|(id, weight)| (SourceId::from(id), weight))
            .collect();

        Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            min_confidence: file.min_confidence.unwrap_or(defaults.min_confidence),
            aggregation: AggregationConfig {
                strategy,
                iou_threshold: aggregation
                    .iou_threshold
                    .unwrap_or(defaults.aggregation.iou_threshold),
                min_votes: aggregation
                    .min_votes
                    .unwrap_or(defaults.aggregation.min_votes),
                source_weights,
            },
            alert_cooldown: file
                .alerts
                .and_then(|alerts| alerts.cooldown_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.alert_cooldown),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PPE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(strategy) = std::env::var("PPE_AGGREGATION_STRATEGY") {
            if !strategy.trim().is_empty() {
                self.aggregation.strategy = AggregationStrategy::parse_or_default(&strategy);
            }
        }
        if let Ok(iou) = std::env::var("PPE_IOU_THRESHOLD") {
            self.aggregation.iou_threshold = iou
                .trim()
                .parse()
                .map_err(|_| anyhow!("PPE_IOU_THRESHOLD must be a number"))?;
        }
        if let Ok(votes) = std::env::var("PPE_MIN_VOTES") {
            self.aggregation.min_votes = votes
                .trim()
                .parse()
                .map_err(|_| anyhow!("PPE_MIN_VOTES must be a non-negative integer"))?;
        }
        if let Ok(weights) = std::env::var("PPE_SOURCE_WEIGHTS") {
            let parsed = parse_weights(&weights)?;
            if !parsed.is_empty() {
                self.aggregation.source_weights = parsed;
            }
        }
        if let Ok(conf) = std::env::var("PPE_MIN_CONFIDENCE") {
            self.min_confidence = conf
                .trim()
                .parse()
                .map_err(|_| anyhow!("PPE_MIN_CONFIDENCE must be a number"))?;
        }
        if let Ok(cooldown) = std::env::var("PPE_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("PPE_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert_cooldown = Duration::from_secs(seconds);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let iou = self.aggregation.iou_threshold;
        if !(iou > 0.0 && iou <= 1.0) {
            return Err(anyhow!("iou_threshold must be in (0, 1], got {}", iou));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            ));
        }
        if self.aggregation.min_votes == 0 {
            return Err(anyhow!("min_votes must be at least 1"));
        }
        if self.aggregation.strategy == AggregationStrategy::WeightedVoting
            && self.aggregation.min_votes > 1
        {
            log::warn!(
                "weighted_voting with min_votes={} drops detections seen by a single model",
                self.aggregation.min_votes
            );
        }
        for (id, weight) in &self.aggregation.source_weights {
            validate_source_id(id.as_str())?;
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(anyhow!("weight for source {} must be > 0, got {}", id, weight));
            }
        }
        if self.alert_cooldown.as_secs() == 0 {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        Ok(())
    }
}

/// Source identifiers are model file names or short slugs.
pub fn validate_source_id(id: &str) -> Result<()> {
    static SOURCE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SOURCE_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9._:-]{1,64}$").expect("source id pattern compiles")
    });
    if !re.is_match(id) {
        return Err(anyhow!(
            "invalid source id '{}': expected 1-64 chars of [A-Za-z0-9._:-]",
            id
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse `name=weight,name=weight`.
fn parse_weights(value: &str) -> Result<BTreeMap<SourceId, f32>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, weight) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("PPE_SOURCE_WEIGHTS entry '{}' must be name=weight", entry))?;
            let weight: f32 = weight
                .trim()
                .parse()
                .map_err(|_| anyhow!("PPE_SOURCE_WEIGHTS weight for '{}' must be a number", id))?;
            Ok((SourceId::from(id.trim()), weight))
        })
        .collect()
}
