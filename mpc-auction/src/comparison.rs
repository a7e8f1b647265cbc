use std::sync::Arc;

use field_math::FieldElement;

use crate::error::AuctionError;
use crate::mpc_arithmetic::MpcArithmetic;

/// MSB-first bitwise greater-than (§4.7): a running shared `prefix_eq`
/// tracks whether every higher-order bit pair has been equal so far;
/// the first unequal pair where `a` has the 1 decides the comparison.
pub struct ComparisonCircuit {
    arithmetic: Arc<MpcArithmetic>,
}

impl ComparisonCircuit {
    pub fn new(arithmetic: Arc<MpcArithmetic>) -> Self {
        ComparisonCircuit { arithmetic }
    }

    /// `a_bits`/`b_bits` are MSB-first. Returns a shared 0/1: `[a > b]`.
    pub async fn greater_than(&self, a_bits: &[FieldElement], b_bits: &[FieldElement], sid: &str) -> Result<FieldElement, AuctionError> {
        let mut prefix_eq = FieldElement::one();
        let mut result = FieldElement::zero();

        for (i, (&a_i, &b_i)) in a_bits.iter().zip(b_bits.iter()).enumerate() {
            let ab = self.arithmetic.multiply(a_i, b_i, &format!("{sid}:{i}:ab")).await?;
            let gt_i = MpcArithmetic::sub(a_i, ab);
            let eq_i = MpcArithmetic::add(
                MpcArithmetic::sub(MpcArithmetic::sub(FieldElement::one(), a_i), b_i),
                MpcArithmetic::scalar_mul(FieldElement::from_u64(2), ab),
            );

            let contrib = self.arithmetic.multiply(prefix_eq, gt_i, &format!("{sid}:{i}:contrib")).await?;
            result = MpcArithmetic::add(result, contrib);
            prefix_eq = self.arithmetic.multiply(prefix_eq, eq_i, &format!("{sid}:{i}:eq")).await?;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc_arithmetic::MpcArithmetic;
    use field_math::Polynomial;
    use mpc_consensus::{AcsProtocol, BaProtocol, CssProtocol, DelayModel, Envelope, MessageKind, Network, OmissionPolicy, RandomnessBeacon, RbcProtocol};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::time::Duration;

    type PartyId = mpc_consensus::PartyId;

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

    fn bits_msb(value: u64, width: usize) -> Vec<u8> {
        (0..width).rev().map(|i| ((value >> i) & 1) as u8).collect()
    }

    #[tokio::test]
    async fn greater_than_agrees_with_plaintext_comparison() {
        let network = Network::new(4, DelayModel::Fixed(Duration::ZERO), OmissionPolicy::None, ChaCha20Rng::seed_from_u64(4));
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(4));
        let mut arithmetics = Vec::new();
        for party in 1..=4u32 {
            let a = build(party, network.clone(), beacon.clone()).await;
            a.set_active_set(vec![1, 2, 3, 4]).await.unwrap();
            arithmetics.push(a);
        }

        const WIDTH: usize = 4;
        let a_val = 11u64; // 1011
        let b_val = 6u64; // 0110
        let a_bits = bits_msb(a_val, WIDTH);
        let b_bits = bits_msb(b_val, WIDTH);

        let mut rng = ChaCha20Rng::seed_from_u64(17);
        let a_polys: Vec<Polynomial> = a_bits.iter().map(|&bit| Polynomial::random(1, FieldElement::from_u64(bit as u64), &mut rng)).collect();
        let b_polys: Vec<Polynomial> = b_bits.iter().map(|&bit| Polynomial::random(1, FieldElement::from_u64(bit as u64), &mut rng)).collect();

        let results = futures::future::join_all(arithmetics.iter().enumerate().map(|(idx, arith)| {
            let x = FieldElement::from_u64((idx + 1) as u64);
            let a_shares: Vec<FieldElement> = a_polys.iter().map(|p| p.evaluate(x)).collect();
            let b_shares: Vec<FieldElement> = b_polys.iter().map(|p| p.evaluate(x)).collect();
            let comparator = ComparisonCircuit::new(arith.clone());
            async move { comparator.greater_than(&a_shares, &b_shares, "cmp").await }
        }))
        .await;

        let shares: Vec<(FieldElement, FieldElement)> = results
            .into_iter()
            .enumerate()
            .map(|(idx, r)| (FieldElement::from_u64((idx + 1) as u64), r.unwrap()))
            .collect();
        let opened = Polynomial::interpolate_at_zero(&shares).unwrap();
        assert_eq!(opened, FieldElement::one());
    }
}
