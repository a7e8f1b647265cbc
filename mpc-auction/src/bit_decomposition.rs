use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use field_math::{FieldElement, Polynomial};
use rand_core::RngCore;

use crate::error::AuctionError;
use crate::mpc_arithmetic::MpcArithmetic;

type PartyId = mpc_consensus::PartyId;

/// Per-party pool of preprocessed random-bit sharings, consumed `k` at
/// a time by each `bit_decompose` call. Generation is an ideal
/// functionality (see module docs): callers seed a pool directly
/// rather than running it through CSS.
pub struct BitPool {
    bits: VecDeque<FieldElement>,
}

impl BitPool {
    pub fn new(bits: Vec<FieldElement>) -> Self {
        BitPool { bits: bits.into() }
    }

    pub fn remaining(&self) -> usize {
        self.bits.len()
    }

    fn take(&mut self, count: usize) -> Result<Vec<FieldElement>, AuctionError> {
        if self.bits.len() < count {
            return Err(AuctionError::BitPoolExhausted { requested: count, available: self.bits.len() });
        }
        Ok((0..count).map(|_| self.bits.pop_front().unwrap()).collect())
    }
}

/// Generates `count` random-bit sharings for every party in `parties`,
/// each a degree-`f` sharing of a uniformly random 0/1 constant term.
/// Stands in for a joint-random-bit-generation sub-protocol, out of
/// scope for this core (see Non-goals); a harness-level setup step
/// calls this once and hands each party its column as a [`BitPool`].
pub fn preprocess_random_bit_sharings<R: RngCore>(
    count: usize,
    parties: &[PartyId],
    f: usize,
    rng: &mut R,
) -> HashMap<PartyId, Vec<FieldElement>> {
    let mut columns: HashMap<PartyId, Vec<FieldElement>> = parties.iter().map(|&p| (p, Vec::with_capacity(count))).collect();
    for _ in 0..count {
        let bit = FieldElement::from_u64((rng.next_u32() & 1) as u64);
        let poly = Polynomial::random(f, bit, rng);
        for &party in parties {
            columns.get_mut(&party).unwrap().push(poly.evaluate(FieldElement::from_u64(party as u64)));
        }
    }
    columns
}

/// Bit decomposition of a shared value known to satisfy `0 <= x < 2^k`
/// (§4.6): open a randomly-masked value, then ripple-borrow subtract
/// the mask back out bit by bit under MPC. Output is LSB-first.
pub struct BitDecomposition {
    arithmetic: Arc<MpcArithmetic>,
}

impl BitDecomposition {
    pub fn new(arithmetic: Arc<MpcArithmetic>) -> Self {
        BitDecomposition { arithmetic }
    }

    pub async fn decompose(&self, x: FieldElement, k: usize, pool: &mut BitPool, sid: &str) -> Result<Vec<FieldElement>, AuctionError> {
        let r_shares = pool.take(k)?;
        let mut r_share = FieldElement::zero();
        for (j, rj) in r_shares.iter().enumerate() {
            r_share = MpcArithmetic::add(r_share, MpcArithmetic::scalar_mul(FieldElement::from_u64(1u64 << j), *rj));
        }

        let y_share = MpcArithmetic::add(x, r_share);
        let y = self.arithmetic.open_value(y_share, &format!("{sid}:open")).await?;
        let y_int = y.to_u128();
        if y_int >> (k + 1) != 0 {
            return Err(AuctionError::ValueOutOfRange(y_int, k + 1));
        }
        let y_bits: Vec<u8> = (0..=k).map(|i| ((y_int >> i) & 1) as u8).collect();

        let mut borrow = FieldElement::zero();
        let mut result_bits = Vec::with_capacity(k);
        for i in 0..k {
            let y_i = y_bits[i];
            let r_i = r_shares[i];
            let t_i = if y_i == 0 { r_i } else { MpcArithmetic::sub(FieldElement::one(), r_i) };

            let t_borrow = self.arithmetic.multiply(t_i, borrow, &format!("{sid}:bit{i}:txb")).await?;
            let bit_i = xor_from_product(t_i, borrow, t_borrow);
            result_bits.push(bit_i);

            let r_borrow = self.arithmetic.multiply(r_i, borrow, &format!("{sid}:bit{i}:rxb")).await?;
            let r_xor_borrow = xor_from_product(r_i, borrow, r_borrow);
            let carried_term = if y_i == 0 { r_xor_borrow } else { FieldElement::zero() };
            borrow = MpcArithmetic::add(r_borrow, carried_term);
        }
        Ok(result_bits)
    }
}

/// `a XOR b = a + b - 2ab` given the product `ab` already computed.
fn xor_from_product(a: FieldElement, b: FieldElement, ab: FieldElement) -> FieldElement {
    MpcArithmetic::sub(MpcArithmetic::add(a, b), MpcArithmetic::scalar_mul(FieldElement::from_u64(2), ab))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc_arithmetic::MpcArithmetic;
    use mpc_consensus::{AcsProtocol, BaProtocol, CssProtocol, DelayModel, Envelope, MessageKind, Network, OmissionPolicy, RandomnessBeacon, RbcProtocol};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::time::Duration;

    async fn build(party: PartyId, network: Arc<Network>, beacon: Arc<RandomnessBeacon>) -> Arc<MpcArithmetic> {
        let rbc = RbcProtocol::new(party, 4, 1, network.clone());
        let ba = BaProtocol::new(party, 4, 1, network.clone(), beacon);
        let css = CssProtocol::new(party, 4, 1, network.clone(), ChaCha20Rng::seed_from_u64(party as u64));
        let acs = AcsProtocol::new(party, 4, 1, rbc.clone(), ba.clone());
        let arithmetic = MpcArithmetic::new(party, 4, 1, network.clone(), acs, ba.clone(), css.clone());

        let mut rx = network.take_receiver(party).await;
        let arithmetic2 = arithmetic.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match &envelope.kind {
                    MessageKind::RbcInit { .. } | MessageKind::RbcEcho { .. } | MessageKind::RbcReady { .. } => {
                        rbc.handle_message(envelope).await
                    }
                    MessageKind::BaVote { .. } | MessageKind::BaDecide { .. } => ba.handle_message(envelope).await,
                    MessageKind::CssShare { .. }
                    | MessageKind::CssEcho { .. }
                    | MessageKind::CssReady { .. }
                    | MessageKind::CssRecover { .. }
                    | MessageKind::CssReveal { .. } => css.handle_message(envelope).await,
                    MessageKind::MpcOpen { .. } => arithmetic2.handle_message(envelope).await,
                    _ => {}
                }
            }
        });
        arithmetic
    }

    #[tokio::test]
    async fn decompose_recovers_the_bits_of_a_small_value() {
        let network = Network::new(4, DelayModel::Fixed(Duration::ZERO), OmissionPolicy::None, ChaCha20Rng::seed_from_u64(3));
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(3));
        let mut arithmetics = Vec::new();
        for party in 1..=4u32 {
            let a = build(party, network.clone(), beacon.clone()).await;
            a.set_active_set(vec![1, 2, 3, 4]).await.unwrap();
            arithmetics.push(a);
        }

        const K: usize = 5;
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let columns = preprocess_random_bit_sharings(K, &[1, 2, 3, 4], 1, &mut rng);

        let secret = 13u128; // 01101
        let mut poly_rng = ChaCha20Rng::seed_from_u64(99);
        let poly = Polynomial::random(1, FieldElement::from_u64(secret as u64), &mut poly_rng);
        let x_shares: Vec<FieldElement> = (1..=4u64).map(|i| poly.evaluate(FieldElement::from_u64(i))).collect();

        let bits_per_party = futures::future::join_all(arithmetics.iter().enumerate().map(|(idx, a)| {
            let mut pool = BitPool::new(columns[&((idx + 1) as u32)].clone());
            let decomposer = BitDecomposition::new(a.clone());
            let x = x_shares[idx];
            async move { decomposer.decompose(x, K, &mut pool, "bd").await }
        }))
        .await;

        let bit_shares: Vec<Vec<FieldElement>> = bits_per_party.into_iter().map(|r| r.unwrap()).collect();
        for bit_index in 0..K {
            let shares_for_bit: Vec<(FieldElement, FieldElement)> = (0..4)
                .map(|p| (FieldElement::from_u64((p + 1) as u64), bit_shares[p][bit_index]))
                .collect();
            let opened = Polynomial::interpolate_at_zero(&shares_for_bit).unwrap();
            let expected = (secret >> bit_index) & 1;
            assert_eq!(opened, FieldElement::from_u64(expected as u64));
        }
    }
}
