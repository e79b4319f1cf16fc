use std::io::Write;
use std::sync::Mutex;

use tempfile::Builder;

use ppe_compliance::{AggregationStrategy, PipelineConfig, SourceId};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PPE_CONFIG",
        "PPE_DB_PATH",
        "PPE_AGGREGATION_STRATEGY",
        "PPE_IOU_THRESHOLD",
        "PPE_MIN_VOTES",
        "PPE_SOURCE_WEIGHTS",
        "PPE_MIN_CONFIDENCE",
        "PPE_ALERT_COOLDOWN_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "ppe_compliance.db");
    assert_eq!(cfg.min_confidence, 0.25);
    assert_eq!(cfg.aggregation.strategy, AggregationStrategy::UnionNms);
    assert_eq!(cfg.aggregation.iou_threshold, 0.5);
    assert_eq!(cfg.aggregation.min_votes, 1);
    assert!(cfg.aggregation.source_weights.is_empty());
    assert_eq!(cfg.alert_cooldown.as_secs(), 600);
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
db_path = "site_a.db"
min_confidence = 0.4

[aggregation]
strategy = "weighted_voting"
iou_threshold = 0.6
min_votes = 2

[aggregation.source_weights]
"best.pt" = 1.0
"session_004.pt" = 0.8

[alerts]
cooldown_secs = 300
"#,
    );

    std::env::set_var("PPE_CONFIG", file.path());
    std::env::set_var("PPE_IOU_THRESHOLD", "0.55");
    std::env::set_var("PPE_ALERT_COOLDOWN_SECS", "120");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "site_a.db");
    assert_eq!(cfg.min_confidence, 0.4);
    assert_eq!(cfg.aggregation.strategy, AggregationStrategy::WeightedVoting);
    assert_eq!(cfg.aggregation.iou_threshold, 0.55);
    assert_eq!(cfg.aggregation.min_votes, 2);
    assert_eq!(
        cfg.aggregation.source_weights[&SourceId::from("session_004.pt")],
        0.8
    );
    assert_eq!(cfg.alert_cooldown.as_secs(), 120);

    assert_eq!(
        cfg.aggregation.weight_for(&SourceId::from("unknown.pt")),
        1.0
    );

    clear_env();
}

#[test]
fn loads_json_file_and_env_weights() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "db_path": "site_b.db",
            "aggregation": { "strategy": "average" }
        }"#,
    );

    std::env::set_var("PPE_CONFIG", file.path());
    std::env::set_var("PPE_SOURCE_WEIGHTS", "best.pt=1.5,session_004.pt=0.5");
    std::env::set_var("PPE_DB_PATH", "override.db");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.aggregation.strategy, AggregationStrategy::Average);
    assert_eq!(cfg.aggregation.source_weights.len(), 2);
    assert_eq!(
        cfg.aggregation.source_weights[&SourceId::from("best.pt")],
        1.5
    );

    clear_env();
}

#[test]
fn unknown_strategy_falls_back_to_union() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PPE_AGGREGATION_STRATEGY", "majority_vote");
    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.aggregation.strategy, AggregationStrategy::UnionNms);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PPE_IOU_THRESHOLD", "1.5");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("PPE_MIN_VOTES", "0");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("PPE_MIN_CONFIDENCE", "high");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("PPE_SOURCE_WEIGHTS", "best.pt=-1");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    let file = config_file(".toml", "[aggregation\nstrategy = ");
    std::env::set_var("PPE_CONFIG", file.path());
    assert!(PipelineConfig::load().is_err());
    clear_env();
}
