use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ppe_compliance::compliance::rate_for_missing;
use ppe_compliance::{
    aggregate, consensus_counts, iou, score, suppress, AggregationConfig, BoundingBox,
    ClassCounts, PpeClass, RawDetection, SourceId,
};

const ROUNDS: usize = 500;

fn random_box(rng: &mut StdRng, x_range: std::ops::Range<i32>) -> BoundingBox {
    let x1 = rng.gen_range(x_range.clone());
    let y1 = rng.gen_range(0..400);
    let w = rng.gen_range(1..120);
    let h = rng.gen_range(1..120);
    BoundingBox::new(x1, y1, x1 + w, y1 + h).expect("positive extent")
}

fn random_class(rng: &mut StdRng) -> PpeClass {
    PpeClass::ALL[rng.gen_range(0..PpeClass::ALL.len())]
}

fn random_detections(rng: &mut StdRng, source: &str, n: usize) -> Vec<RawDetection> {
    (0..n)
        .map(|_| {
            RawDetection::new(
                random_class(rng),
                rng.gen_range(0.0..1.0),
                random_box(rng, 0..300),
                SourceId::from(source),
            )
            .expect("finite confidence")
        })
        .collect()
}

#[test]
fn zero_persons_always_scores_zero() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..ROUNDS {
        let counts = ClassCounts {
            person: 0,
            helmet: rng.gen_range(0..50),
            vest: rng.gen_range(0..50),
            glasses: rng.gen_range(0..50),
            boots: rng.gen_range(0..50),
        };
        assert_eq!(score(&counts).compliance_rate, 0.0, "{:?}", counts);
    }
    let all_gear = ClassCounts {
        person: 0,
        helmet: u32::MAX,
        vest: u32::MAX,
        glasses: u32::MAX,
        boots: u32::MAX,
    };
    assert_eq!(score(&all_gear).compliance_rate, 0.0);
}

#[test]
fn missing_category_buckets_are_exact() {
    let present = |missing: usize| {
        let mut counts = ClassCounts {
            person: 2,
            helmet: 1,
            vest: 1,
            glasses: 1,
            boots: 1,
        };
        for class in PpeClass::REQUIRED_EQUIPMENT.iter().take(missing) {
            counts.set(*class, 0);
        }
        counts
    };

    let expected = [(0, 100.0), (1, 90.0), (2, 90.0), (3, 60.0), (4, 10.0)];
    for (missing, rate) in expected {
        let result = score(&present(missing));
        assert_eq!(result.missing_equipment.len(), missing);
        assert_eq!(result.compliance_rate, rate, "missing={}", missing);
        assert_eq!(rate_for_missing(missing), rate);
    }
}

#[test]
fn overlap_is_symmetric_and_bounded() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..ROUNDS {
        let a = random_box(&mut rng, 0..300);
        let b = random_box(&mut rng, 0..300);
        let ab = iou(&a, &b);
        assert_eq!(ab, iou(&b, &a));
        assert!((0.0..=1.0).contains(&ab), "{:?} {:?} -> {}", a, b, ab);
        assert_eq!(iou(&a, &a), 1.0);
    }
}

#[test]
fn suppression_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(13);
    for _ in 0..ROUNDS / 5 {
        let n = rng.gen_range(0..40);
        let threshold = rng.gen_range(0.1..0.9);
        let once = suppress(random_detections(&mut rng, "best.pt", n), threshold);
        let twice = suppress(once.clone(), threshold);
        assert_eq!(once, twice);
    }
}

#[test]
fn union_keeps_isolated_single_source_detections() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..ROUNDS / 5 {
        let class = random_class(&mut rng);
        let lone = RawDetection::new(
            class,
            rng.gen_range(0.0..1.0),
            random_box(&mut rng, 0..300),
            SourceId::from("best.pt"),
        )
        .expect("finite confidence");

        // Other sources only report boxes that cannot touch the lone one.
        let others: Vec<RawDetection> = (0..rng.gen_range(0..20))
            .map(|_| {
                RawDetection::new(
                    class,
                    rng.gen_range(0.0..1.0),
                    random_box(&mut rng, 500..800),
                    SourceId::from("session_004.pt"),
                )
                .expect("finite confidence")
            })
            .collect();

        let mut per_source = BTreeMap::new();
        per_source.insert(SourceId::from("best.pt"), vec![lone.clone()]);
        per_source.insert(SourceId::from("session_004.pt"), others);

        let set = aggregate(&per_source, &AggregationConfig::default());
        let survivor = set
            .detections()
            .iter()
            .find(|d| d.bbox == *lone.bbox() && d.class == class)
            .expect("lone detection survives");
        assert_eq!(survivor.confidence, lone.confidence());
    }
}

#[test]
fn consensus_rounds_up() {
    let only_helmets = |helmets: &[u32]| -> Vec<ClassCounts> {
        helmets
            .iter()
            .map(|&helmet| ClassCounts {
                helmet,
                ..ClassCounts::default()
            })
            .collect()
    };

    assert_eq!(consensus_counts(&only_helmets(&[1, 0])).helmet, 1);
    assert_eq!(consensus_counts(&only_helmets(&[0, 0])).helmet, 0);
    assert_eq!(consensus_counts(&only_helmets(&[1, 1, 0])).helmet, 1);
    assert_eq!(consensus_counts(&only_helmets(&[3, 2])).helmet, 3);
    assert_eq!(consensus_counts(&[]), ClassCounts::default());
}
