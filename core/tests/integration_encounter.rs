//! Encounter derivation across two or more engines
//!
//! Engines are driven directly with explicit instants so epoch boundaries are
//! exact. Datagrams move between them as raw bytes, exactly as they would on
//! the wire.
//!
//! Run with: cargo test --test integration_encounter

use dimy_core::bloom::BloomParams;
use dimy_core::encounter::{IgnoreReason, ShareOutcome};
use dimy_core::transport::Advertisement;
use dimy_core::{EncounterEngine, EncounterId, ProtocolConfig};
use std::time::{Duration, Instant};

fn config() -> ProtocolConfig {
    ProtocolConfig {
        epoch_duration_ms: 15_000,
        share_threshold: 3,
        share_count: 5,
        bloom: BloomParams::new(65_536, 3).unwrap(),
        ..ProtocolConfig::default()
    }
}

/// Run one tick and return every remaining share of the fresh identity
fn start_and_collect(engine: &EncounterEngine, now: Instant) -> Vec<Vec<u8>> {
    let first = engine
        .on_tick(now)
        .unwrap()
        .outgoing
        .expect("first slot is due at rotation");
    let mut datagrams = vec![first.to_bytes().to_vec()];
    while let Some(outgoing) = engine.identity().next_share() {
        datagrams.push(Advertisement::from(&outgoing).to_bytes().to_vec());
    }
    datagrams
}

fn deliver(engine: &EncounterEngine, datagrams: &[Vec<u8>], now: Instant) -> Vec<EncounterId> {
    datagrams
        .iter()
        .filter_map(|datagram| match engine.on_datagram(datagram, now).unwrap() {
            ShareOutcome::Reconstructed(enc_id) => Some(enc_id),
            _ => None,
        })
        .collect()
}

#[test]
fn test_three_of_five_shares_yield_identical_enc_id() {
    let alice = EncounterEngine::new(&config()).unwrap();
    let bob = EncounterEngine::new(&config()).unwrap();
    let now = Instant::now();

    let from_alice = start_and_collect(&alice, now);
    let from_bob = start_and_collect(&bob, now);
    assert_eq!(from_alice.len(), 5);

    // Bob hears shares 1, 3, 5 of Alice; Alice hears 2, 3, 4 of Bob
    let picked: Vec<Vec<u8>> = [0, 2, 4].iter().map(|&i| from_alice[i].clone()).collect();
    let at_bob = deliver(&bob, &picked, now);
    let at_alice = deliver(&alice, &from_bob[1..4], now);

    assert_eq!(at_bob.len(), 1);
    assert_eq!(at_alice, at_bob);

    let enc_id = at_bob[0];
    assert!(alice.bloom().lock().counting_filter().contains(enc_id.as_bytes()));
    assert!(bob.bloom().lock().counting_filter().contains(enc_id.as_bytes()));
}

#[test]
fn test_two_shares_then_rollover_yield_nothing() {
    let alice = EncounterEngine::new(&config()).unwrap();
    let bob = EncounterEngine::new(&config()).unwrap();
    let now = Instant::now();

    let from_alice = start_and_collect(&alice, now);
    start_and_collect(&bob, now);

    assert!(deliver(&bob, &from_alice[..2], now).is_empty());
    assert_eq!(bob.stats().peer_buffers, 1);

    // Bob's epoch ends before the third share arrives
    let later = now + Duration::from_secs(15);
    let report = bob.on_tick(later).unwrap();
    assert_eq!(report.discarded_buffers, 1);
    assert_eq!(bob.stats().peer_buffers, 0);

    // The late share starts a new buffer instead of completing the old one
    assert_eq!(
        bob.on_datagram(&from_alice[2], later).unwrap(),
        ShareOutcome::Buffered { collected: 1 }
    );
    assert_eq!(bob.stats().encounters_in_window, 0);
    assert_eq!(bob.stats().aggregator.reconstructed, 0);
}

#[test]
fn test_all_shares_duplicated_and_reordered_give_one_enc_id() {
    let alice = EncounterEngine::new(&config()).unwrap();
    let bob = EncounterEngine::new(&config()).unwrap();
    let now = Instant::now();

    let from_alice = start_and_collect(&alice, now);
    start_and_collect(&bob, now);

    let mut noisy: Vec<Vec<u8>> = from_alice.iter().rev().cloned().collect();
    noisy.extend(from_alice.iter().cloned());
    noisy.insert(1, from_alice[4].clone());

    let found = deliver(&bob, &noisy, now);
    assert_eq!(found.len(), 1);
    assert_eq!(bob.stats().aggregator.duplicates, 1);

    // Everything after the reconstruction is ignored for this epoch
    assert_eq!(
        bob.on_datagram(&from_alice[0], now).unwrap(),
        ShareOutcome::Ignored(IgnoreReason::AlreadyReconstructed)
    );
}

#[test]
fn test_three_party_encounters_are_pairwise_distinct() {
    let nodes: Vec<EncounterEngine> = (0..3)
        .map(|_| EncounterEngine::new(&config()).unwrap())
        .collect();
    let now = Instant::now();
    let shares: Vec<Vec<Vec<u8>>> = nodes.iter().map(|n| start_and_collect(n, now)).collect();

    // Everyone hears everyone, own echoes included
    let mut found = Vec::new();
    for node in &nodes {
        for datagrams in &shares {
            found.extend(deliver(node, datagrams, now));
        }
    }

    // Six directed reconstructions, three distinct pair identifiers
    assert_eq!(found.len(), 6);
    found.sort_by_key(|id| *id.as_bytes());
    found.dedup();
    assert_eq!(found.len(), 3);
}

#[test]
fn test_clock_going_backwards_is_reported() {
    let engine = EncounterEngine::new(&config()).unwrap();
    let now = Instant::now() + Duration::from_secs(60);
    engine.on_tick(now).unwrap();

    let err = engine.rotate(now - Duration::from_secs(1)).unwrap_err();
    assert_eq!(
        err,
        dimy_core::EncounterError::ClockError {
            behind: Duration::from_secs(1)
        }
    );
}

#[test]
fn test_peer_shares_across_local_rotation_give_second_symmetric_enc_id() {
    // t <= n - t: the peer still has a full set left after our rotation
    let config = ProtocolConfig {
        share_threshold: 2,
        share_count: 5,
        ..config()
    };
    let alice = EncounterEngine::new(&config).unwrap();
    let bob = EncounterEngine::new(&config).unwrap();
    let now = Instant::now();

    let from_alice = start_and_collect(&alice, now);
    let from_bob_v1 = start_and_collect(&bob, now);

    let first = deliver(&bob, &from_alice[..2], now);
    assert_eq!(first.len(), 1);
    assert_eq!(deliver(&alice, &from_bob_v1[..2], now), first);

    // Bob rotates mid-way through Alice's epoch
    let later = now + Duration::from_secs(5);
    bob.rotate(later).unwrap();
    let mut from_bob_v2 = Vec::new();
    while let Some(outgoing) = bob.identity().next_share() {
        from_bob_v2.push(Advertisement::from(&outgoing).to_bytes().to_vec());
    }

    let second = deliver(&bob, &from_alice[2..4], later);
    assert_eq!(second.len(), 1);
    assert_ne!(second, first);

    // Alice derives the same second EncID from Bob's new identity
    assert_eq!(deliver(&alice, &from_bob_v2[..2], later), second);
    assert_eq!(
        bob.on_datagram(&from_alice[4], later).unwrap(),
        ShareOutcome::Ignored(IgnoreReason::AlreadyReconstructed)
    );

    let bloom = bob.bloom().lock();
    assert!(bloom.counting_filter().contains(first[0].as_bytes()));
    assert!(bloom.counting_filter().contains(second[0].as_bytes()));
}
