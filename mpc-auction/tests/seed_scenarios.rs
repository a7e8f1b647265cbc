use std::collections::HashMap;
use std::time::Duration;

use field_math::FieldElement;
use mpc_auction::{preprocess_output_masks, preprocess_random_bit_sharings, validate_bid_vector, BitPool, Party};
use mpc_consensus::{DelayModel, Direction, Network, OmissionPolicy, PartyId, RandomnessBeacon};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

const N: usize = 4;
const F: usize = 1;
const BIT_WIDTH: usize = 8;

/// Runs all four parties against one bid vector and returns each
/// party's plaintext outcome, keyed by party id.
async fn run(bids: [u64; 4], omitter: Option<PartyId>, seed: u64) -> HashMap<PartyId, Option<FieldElement>> {
    validate_bid_vector(&bids, BIT_WIDTH).expect("seed scenario bid vectors are valid");
    let omission = match omitter {
        Some(party) => OmissionPolicy::DropAll { party, direction: Direction::Send },
        None => OmissionPolicy::None,
    };
    let network = Network::new(N as PartyId, DelayModel::Fixed(Duration::ZERO), omission, ChaCha20Rng::seed_from_u64(seed));
    let beacon = RandomnessBeacon::new(F + 1, ChaCha20Rng::seed_from_u64(seed.wrapping_add(1)));

    let parties: Vec<PartyId> = (1..=N as PartyId).collect();
    let mut rng = ChaCha20Rng::seed_from_u64(seed.wrapping_add(2));
    let bit_columns = preprocess_random_bit_sharings(BIT_WIDTH * N, &parties, F, &mut rng);
    let mask_columns = preprocess_output_masks(&parties, F, &mut rng);

    let handles: Vec<_> = parties
        .iter()
        .map(|&party_id| {
            let party = Party::new(
                party_id,
                N,
                F,
                BIT_WIDTH,
                network.clone(),
                beacon.clone(),
                ChaCha20Rng::seed_from_u64(seed.wrapping_add(100 + party_id as u64)),
            );
            let bid = FieldElement::from_u64(bids[party_id as usize - 1]);
            let pool = BitPool::new(bit_columns[&party_id].clone());
            let mask_shares: HashMap<PartyId, FieldElement> =
                mask_columns.iter().map(|(&owner, shares)| (owner, shares[&party_id])).collect();
            tokio::spawn(async move { (party_id, party.run(bid, pool, mask_shares).await) })
        })
        .collect();

    let mut results = HashMap::new();
    for handle in handles {
        let (party_id, outcome) = handle.await.unwrap();
        results.insert(party_id, outcome.unwrap());
    }
    results
}

fn fe(v: u64) -> FieldElement {
    FieldElement::from_u64(v)
}

#[tokio::test]
async fn seed1_no_omitter_p2_wins_pays_13() {
    let results = run([5, 20, 13, 7], None, 1).await;
    assert_eq!(results[&2], Some(fe(13)));
    assert_eq!(results[&1], Some(fe(0)));
    assert_eq!(results[&3], Some(fe(0)));
    assert_eq!(results[&4], Some(fe(0)));
}

#[tokio::test]
async fn seed2_p4_omits_p2_still_wins_pays_13() {
    let results = run([5, 20, 13, 7], Some(4), 2).await;
    assert_eq!(results[&2], Some(fe(13)));
    assert_eq!(results[&1], Some(fe(0)));
    assert_eq!(results[&3], Some(fe(0)));
    assert_eq!(results[&4], None);
}

#[tokio::test]
async fn seed3_would_be_winner_omits_p3_wins_pays_7() {
    let results = run([5, 20, 13, 7], Some(2), 3).await;
    assert_eq!(results[&3], Some(fe(7)));
    assert_eq!(results[&1], Some(fe(0)));
    assert_eq!(results[&4], Some(fe(0)));
    assert_eq!(results[&2], None);
}

#[tokio::test]
async fn seed4_no_omitter_p4_wins_pays_30() {
    let results = run([0, 1, 30, 31], None, 4).await;
    assert_eq!(results[&4], Some(fe(30)));
    assert_eq!(results[&1], Some(fe(0)));
    assert_eq!(results[&2], Some(fe(0)));
    assert_eq!(results[&3], Some(fe(0)));
}

#[tokio::test]
async fn seed5_no_omitter_p4_wins_pays_12() {
    let results = run([10, 11, 12, 13], None, 5).await;
    assert_eq!(results[&4], Some(fe(12)));
    assert_eq!(results[&1], Some(fe(0)));
    assert_eq!(results[&2], Some(fe(0)));
    assert_eq!(results[&3], Some(fe(0)));
}
