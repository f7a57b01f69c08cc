//! Statistical and structural properties of the bloom filters
//!
//! Run with: cargo test --test test_bloom_properties

use dimy_core::bloom::{BloomEngine, BloomFilter, BloomParams, CountingBloomFilter};
use dimy_core::EncounterId;
use proptest::prelude::*;

fn enc_id(seed: u64) -> EncounterId {
    EncounterId::from_bytes(*blake3::hash(&seed.to_le_bytes()).as_bytes())
}

#[test]
fn test_empirical_false_positive_rate_near_formula() {
    let params = BloomParams::new(20_000, 3).unwrap();
    let inserted = 2_000usize;
    let mut filter = BloomFilter::new(params);
    for seed in 0..inserted as u64 {
        filter.insert(enc_id(seed).as_bytes());
    }

    let trials = 50_000u64;
    let false_positives = (1_000_000..1_000_000 + trials)
        .filter(|&seed| filter.contains(enc_id(seed).as_bytes()))
        .count();

    let observed = false_positives as f64 / trials as f64;
    let expected = params.false_positive_rate(inserted);
    // expected ~0.0174; allow generous slack for a single sample
    assert!(
        (observed - expected).abs() < expected * 0.3,
        "observed {} vs expected {}",
        observed,
        expected
    );
}

#[test]
fn test_default_shape_false_positive_rate_is_tiny() {
    // 100 KB filter, a few hundred encounters per retention period
    let params = BloomParams::default();
    assert!(params.false_positive_rate(1_000) < 1e-6);
}

#[test]
fn test_counting_and_presence_agree() {
    let params = BloomParams::new(4_096, 4).unwrap();
    let mut counting = CountingBloomFilter::new(params);
    let mut presence = BloomFilter::new(params);
    for seed in 0..300 {
        counting.insert(enc_id(seed).as_bytes());
        presence.insert(enc_id(seed).as_bytes());
    }
    assert_eq!(counting.to_presence(), presence);
}

#[test]
fn test_window_roll_zeroes_and_history_is_bounded() {
    let mut engine = BloomEngine::new(BloomParams::new(4_096, 3).unwrap(), 3);
    for window in 0..5u64 {
        engine.insert(&enc_id(window));
        engine.window_roll();
        assert!(engine.counting_filter().counters().iter().all(|&c| c == 0));
        assert!(engine.retained_history() <= 2);
    }
    // Only the two most recent closed windows survive
    assert_eq!(engine.retained_window_ids(), vec![4, 3]);
    let query = engine.query_filter();
    assert!(query.contains(enc_id(4).as_bytes()));
    assert!(query.contains(enc_id(3).as_bytes()));
    assert_eq!(query, engine.build_query([enc_id(4), enc_id(3)].iter()));
}

#[test]
fn test_mismatched_shapes_fail_comparison() {
    let a = BloomFilter::new(BloomParams::new(1_024, 3).unwrap());
    let b = BloomFilter::new(BloomParams::new(1_024, 5).unwrap());
    assert!(matches!(
        a.is_subset_of(&b),
        Err(dimy_core::EncounterError::SerializationError(_))
    ));
}

proptest! {
    #[test]
    fn prop_counters_monotonic_until_roll(seeds in proptest::collection::vec(any::<u64>(), 1..64)) {
        let params = BloomParams::new(512, 3).unwrap();
        let mut cbf = CountingBloomFilter::new(params);
        let mut previous = cbf.counters().to_vec();
        for seed in &seeds {
            cbf.insert(enc_id(*seed).as_bytes());
            let current = cbf.counters().to_vec();
            prop_assert!(current.iter().zip(&previous).all(|(now, before)| now >= before));
            previous = current;
        }
        for seed in &seeds {
            prop_assert!(cbf.contains(enc_id(*seed).as_bytes()));
        }
    }

    #[test]
    fn prop_union_keeps_both_memberships(
        left in proptest::collection::vec(any::<u64>(), 0..32),
        right in proptest::collection::vec(any::<u64>(), 0..32),
    ) {
        let params = BloomParams::new(1_024, 3).unwrap();
        let mut a = BloomFilter::new(params);
        let mut b = BloomFilter::new(params);
        for seed in &left {
            a.insert(enc_id(*seed).as_bytes());
        }
        for seed in &right {
            b.insert(enc_id(*seed).as_bytes());
        }
        let before = a.clone();
        a.union_with(&b).unwrap();

        prop_assert!(before.is_subset_of(&a).unwrap());
        prop_assert!(b.is_subset_of(&a).unwrap());
        for seed in left.iter().chain(&right) {
            prop_assert!(a.contains(enc_id(*seed).as_bytes()));
        }
    }
}
