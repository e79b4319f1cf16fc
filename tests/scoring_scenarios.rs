use std::collections::BTreeMap;

use ppe_compliance::{
    aggregate, score, AggregationConfig, AggregationStrategy, AlertType, BoundingBox,
    ComplianceLevel, PpeClass, RawDetection, SourceId, UnifiedDetectionSet,
};

fn det(source: &str, class: PpeClass, confidence: f32, bbox: [i32; 4]) -> RawDetection {
    RawDetection::new(
        class,
        confidence,
        BoundingBox::from_array(bbox).expect("valid box"),
        SourceId::from(source),
    )
    .expect("finite confidence")
}

fn run(
    sources: Vec<(&str, Vec<RawDetection>)>,
    config: &AggregationConfig,
) -> UnifiedDetectionSet {
    let per_source: BTreeMap<SourceId, Vec<RawDetection>> = sources
        .into_iter()
        .map(|(id, detections)| (SourceId::from(id), detections))
        .collect();
    aggregate(&per_source, config)
}

#[test]
fn single_source_missing_three_categories_scores_sixty() {
    let set = run(
        vec![(
            "best.pt",
            vec![
                det("best.pt", PpeClass::Person, 0.91, [100, 50, 220, 400]),
                det("best.pt", PpeClass::Helmet, 0.77, [130, 40, 190, 100]),
            ],
        )],
        &AggregationConfig::default(),
    );

    let result = score(set.class_counts());
    assert_eq!(result.total_persons, 1);
    assert_eq!(result.with_helmet, 1);
    assert_eq!(result.compliance_rate, 60.0);
    assert_eq!(result.compliance_level, ComplianceLevel::Moyen);
    // 60 sits in the [50, 80) band.
    assert_eq!(result.alert_type, AlertType::Avertissement);
    assert_eq!(
        result.missing_equipment,
        vec![PpeClass::Vest, PpeClass::Glasses, PpeClass::Boots]
    );
}

#[test]
fn union_keeps_a_detection_only_one_source_saw() {
    let set = run(
        vec![
            (
                "best.pt",
                vec![det("best.pt", PpeClass::Glasses, 0.4, [10, 10, 50, 50])],
            ),
            (
                "session_004.pt",
                vec![det("session_004.pt", PpeClass::Person, 0.8, [0, 0, 120, 300])],
            ),
        ],
        &AggregationConfig::default(),
    );

    assert_eq!(set.class_counts().glasses, 1);
    let glasses = set
        .detections()
        .iter()
        .find(|d| d.class == PpeClass::Glasses)
        .expect("glasses retained");
    assert_eq!(glasses.bbox.to_array(), [10, 10, 50, 50]);
    assert_eq!(glasses.confidence, 0.4);
}

#[test]
fn equipment_without_a_person_is_never_compliant() {
    let helmets: Vec<RawDetection> = (0..5)
        .map(|i| det("best.pt", PpeClass::Helmet, 0.9, [i * 100, 0, i * 100 + 40, 40]))
        .collect();
    let set = run(vec![("best.pt", helmets)], &AggregationConfig::default());

    assert_eq!(set.class_counts().helmet, 5);
    let result = score(set.class_counts());
    assert_eq!(result.total_persons, 0);
    assert_eq!(result.compliance_rate, 0.0);
    assert_eq!(result.alert_type, AlertType::Critique);
}

#[test]
fn fully_equipped_person_is_compliant() {
    let set = run(
        vec![(
            "best.pt",
            vec![
                det("best.pt", PpeClass::Person, 0.9, [100, 50, 220, 400]),
                det("best.pt", PpeClass::Helmet, 0.8, [130, 40, 190, 100]),
                det("best.pt", PpeClass::Vest, 0.8, [110, 120, 210, 250]),
                det("best.pt", PpeClass::Glasses, 0.6, [140, 80, 180, 95]),
                det("best.pt", PpeClass::Boots, 0.7, [110, 360, 210, 400]),
            ],
        )],
        &AggregationConfig::default(),
    );

    let result = score(set.class_counts());
    assert_eq!(result.compliance_rate, 100.0);
    assert!(matches!(
        result.compliance_level,
        ComplianceLevel::Excellent | ComplianceLevel::Bon
    ));
    assert_eq!(result.alert_type, AlertType::Aucune);
    assert!(result.missing_equipment.is_empty());
}

#[test]
fn voting_drops_a_helmet_only_one_of_two_sources_reports() {
    let config = AggregationConfig {
        strategy: AggregationStrategy::WeightedVoting,
        min_votes: 2,
        ..AggregationConfig::default()
    };
    let set = run(
        vec![
            (
                "best.pt",
                vec![
                    det("best.pt", PpeClass::Person, 0.9, [100, 50, 220, 400]),
                    det("best.pt", PpeClass::Helmet, 0.85, [130, 40, 190, 100]),
                ],
            ),
            (
                "session_004.pt",
                vec![det("session_004.pt", PpeClass::Person, 0.88, [102, 52, 222, 398])],
            ),
        ],
        &config,
    );

    assert_eq!(set.class_counts().person, 1);
    assert_eq!(set.class_counts().helmet, 0);
    let result = score(set.class_counts());
    assert_eq!(result.with_helmet, 0);
    assert_eq!(result.compliance_rate, 10.0);

    let person = &set.detections()[0];
    assert_eq!(person.provenance.source_count(), 2);
}

#[test]
fn average_strategy_matches_union() {
    let sources = || {
        vec![
            (
                "best.pt",
                vec![
                    det("best.pt", PpeClass::Person, 0.9, [100, 50, 220, 400]),
                    det("best.pt", PpeClass::Vest, 0.5, [110, 120, 210, 250]),
                ],
            ),
            (
                "session_004.pt",
                vec![
                    det("session_004.pt", PpeClass::Person, 0.7, [105, 55, 225, 405]),
                    det("session_004.pt", PpeClass::Boots, 0.6, [110, 360, 210, 400]),
                ],
            ),
        ]
    };
    let union = run(sources(), &AggregationConfig::default());
    let average = run(
        sources(),
        &AggregationConfig {
            strategy: AggregationStrategy::Average,
            ..AggregationConfig::default()
        },
    );
    assert_eq!(union.detections(), average.detections());
    assert_eq!(union.class_counts().person, 1);
}

#[test]
fn source_weights_change_which_duplicate_survives() {
    let sources = vec![
        (
            "best.pt",
            vec![det("best.pt", PpeClass::Helmet, 0.8, [0, 0, 40, 40])],
        ),
        (
            "session_004.pt",
            vec![det("session_004.pt", PpeClass::Helmet, 0.7, [1, 1, 41, 41])],
        ),
    ];
    let mut weights = BTreeMap::new();
    weights.insert(SourceId::from("session_004.pt"), 2.0);
    let config = AggregationConfig {
        source_weights: weights,
        ..AggregationConfig::default()
    };

    let set = run(sources, &config);
    assert_eq!(set.len(), 1);
    let kept = &set.detections()[0];
    assert_eq!(kept.bbox.to_array(), [1, 1, 41, 41]);
    assert_eq!(kept.confidence, 0.7);
    assert!((kept.weighted_confidence - 1.4).abs() < 1e-6);
}

#[test]
fn all_sources_empty_gives_zero_compliance() {
    let set = run(
        vec![("best.pt", Vec::new()), ("session_004.pt", Vec::new())],
        &AggregationConfig::default(),
    );
    assert!(set.is_empty());
    let result = score(set.class_counts());
    assert_eq!(result.compliance_rate, 0.0);
}

#[test]
fn unclamped_frame_sized_boxes_merge_without_overflow() {
    let huge = [-2_000_000_000, -2_000_000_000, 2_000_000_000, 2_000_000_000];
    let set = run(
        vec![
            ("best.pt", vec![det("best.pt", PpeClass::Person, 0.9, huge)]),
            (
                "session_004.pt",
                vec![det("session_004.pt", PpeClass::Person, 0.8, huge)],
            ),
        ],
        &AggregationConfig::default(),
    );
    assert_eq!(set.class_counts().person, 1);
    assert_eq!(set.detections()[0].confidence, 0.9);
}
