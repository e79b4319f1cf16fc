use std::collections::BTreeMap;

use ppe_compliance::{
    evaluate, frame_digest, AggregationConfig, ClassCounts, DetectionRecord, FrameReport,
    InMemoryReportStore, ReportStore, SourceId, SourceReport, SourceRun, SqliteReportStore,
};

fn report(captured_at: u64, counts: ClassCounts) -> FrameReport {
    let mut reports = BTreeMap::new();
    reports.insert(SourceId::from("cloud"), Ok(SourceReport::Summary(counts)));
    let run = SourceRun::from_reports(reports, 640, 480, 0.25);
    let digest = frame_digest(captured_at.to_string().as_bytes());
    evaluate(&run, &AggregationConfig::default(), digest, captured_at)
}

fn compliant() -> ClassCounts {
    ClassCounts {
        person: 1,
        helmet: 1,
        vest: 1,
        glasses: 1,
        boots: 1,
    }
}

fn warning() -> ClassCounts {
    ClassCounts {
        person: 1,
        helmet: 1,
        ..ClassCounts::default()
    }
}

fn critical() -> ClassCounts {
    ClassCounts {
        person: 2,
        ..ClassCounts::default()
    }
}

fn exercise_store(store: &mut dyn ReportStore) {
    let first = store.append(&report(1_000, compliant())).unwrap();
    let second = store.append(&report(2_000, warning())).unwrap();
    let third = store.append(&report(3_000, critical())).unwrap();
    assert!(first < second && second < third);

    let all = store.reports_after(0, 10).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, first);
    assert_eq!(all[0].report, report(1_000, compliant()));

    let tail = store.reports_after(first, 1).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, second);
    assert!(store.reports_after(third, 10).unwrap().is_empty());

    let summary = store.summary_since(2_000).unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.warnings, 1);
    assert_eq!(summary.critical, 1);
    assert!((summary.mean_compliance_rate - 35.0).abs() < 1e-4);

    let empty = store.summary_since(10_000).unwrap();
    assert_eq!(empty.frames, 0);
    assert_eq!(empty.mean_compliance_rate, 0.0);
}

#[test]
fn sqlite_store_appends_and_summarizes() {
    let mut store = SqliteReportStore::open_in_memory().unwrap();
    exercise_store(&mut store);
}

#[test]
fn in_memory_store_matches_sqlite() {
    let mut store = InMemoryReportStore::default();
    exercise_store(&mut store);
    assert_eq!(store.len(), 3);
}

#[test]
fn sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reports.db");
    let path = path.to_str().unwrap();

    let mut reports = BTreeMap::new();
    reports.insert(
        SourceId::from("best.pt"),
        Ok(SourceReport::Boxes(vec![
            DetectionRecord::new("person", 0.9, [0, 0, 100, 300]),
            DetectionRecord::new("helmet", 0.8, [30, 0, 70, 40]),
        ])),
    );
    let run = SourceRun::from_reports(reports, 640, 480, 0.25);
    let report_with_boxes = evaluate(
        &run,
        &AggregationConfig::default(),
        frame_digest(b"frame-5000"),
        5_000,
    );

    {
        let mut store = SqliteReportStore::open(path).unwrap();
        store.append(&report_with_boxes).unwrap();
    }

    let mut store = SqliteReportStore::open(path).unwrap();
    let stored = store.reports_after(0, 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].report, report_with_boxes);
    assert_eq!(stored[0].report.detections.len(), 2);
}
