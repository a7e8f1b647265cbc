use std::collections::HashMap;
use std::sync::Arc;

use field_math::FieldElement;

use crate::bit_decomposition::{BitDecomposition, BitPool};
use crate::comparison::ComparisonCircuit;
use crate::error::AuctionError;
use crate::mpc_arithmetic::MpcArithmetic;

type PartyId = mpc_consensus::PartyId;

/// Second-price (Vickrey) auction circuit over a shared bid for every
/// party in the active set (§4.8). Bids are required unique by the
/// caller; behaviour on ties is unspecified here.
pub struct SecondPriceAuction {
    arithmetic: Arc<MpcArithmetic>,
    comparison: ComparisonCircuit,
    bit_width: usize,
}

impl SecondPriceAuction {
    pub fn new(arithmetic: Arc<MpcArithmetic>, bit_width: usize) -> Self {
        SecondPriceAuction { comparison: ComparisonCircuit::new(arithmetic.clone()), arithmetic, bit_width }
    }

    /// Returns, for every bidder in `bids`, their share of the
    /// second-price output (zero unless they are the unique winner).
    pub async fn run(&self, bids: &HashMap<PartyId, FieldElement>, pool: &mut BitPool) -> Result<HashMap<PartyId, FieldElement>, AuctionError> {
        let mut t: Vec<PartyId> = bids.keys().copied().collect();
        t.sort_unstable();
        if t.len() != 3 && t.len() != 4 {
            return Err(AuctionError::UnsupportedAuctionSize(t.len()));
        }

        let decomposer = BitDecomposition::new(self.arithmetic.clone());
        let mut bits_msb: HashMap<PartyId, Vec<FieldElement>> = HashMap::new();
        for &i in &t {
            let lsb = decomposer.decompose(bids[&i], self.bit_width, pool, &format!("bid{i}")).await?;
            bits_msb.insert(i, lsb.into_iter().rev().collect());
        }

        let mut gt: HashMap<(PartyId, PartyId), FieldElement> = HashMap::new();
        for (idx, &i) in t.iter().enumerate() {
            for &j in &t[idx + 1..] {
                let g = self.comparison.greater_than(&bits_msb[&i], &bits_msb[&j], &format!("gt{i}v{j}")).await?;
                gt.insert((i, j), g);
                gt.insert((j, i), MpcArithmetic::sub(FieldElement::one(), g));
            }
        }

        let mut is_max = HashMap::new();
        let mut is_min = HashMap::new();
        for &i in &t {
            let mut max_acc = FieldElement::one();
            let mut min_acc = FieldElement::one();
            for &j in &t {
                if j == i {
                    continue;
                }
                max_acc = self.arithmetic.multiply(max_acc, gt[&(i, j)], &format!("ismax{i}x{j}")).await?;
                min_acc = self.arithmetic.multiply(min_acc, gt[&(j, i)], &format!("ismin{i}x{j}")).await?;
            }
            is_max.insert(i, max_acc);
            is_min.insert(i, min_acc);
        }

        let is_second = self.second_price_indicator(&t, &gt, &is_max, &is_min).await?;

        let mut second_price = FieldElement::zero();
        for &i in &t {
            let contrib = self.arithmetic.multiply(bids[&i], is_second[&i], &format!("sp{i}")).await?;
            second_price = MpcArithmetic::add(second_price, contrib);
        }

        let mut outputs = HashMap::new();
        for &i in &t {
            let out = self.arithmetic.multiply(is_max[&i], second_price, &format!("out{i}")).await?;
            outputs.insert(i, out);
        }
        Ok(outputs)
    }

    async fn second_price_indicator(
        &self,
        t: &[PartyId],
        gt: &HashMap<(PartyId, PartyId), FieldElement>,
        is_max: &HashMap<PartyId, FieldElement>,
        is_min: &HashMap<PartyId, FieldElement>,
    ) -> Result<HashMap<PartyId, FieldElement>, AuctionError> {
        let mut is_second = HashMap::new();
        if t.len() == 3 {
            for &i in t {
                let v = MpcArithmetic::sub(MpcArithmetic::sub(FieldElement::one(), is_max[&i]), is_min[&i]);
                is_second.insert(i, v);
            }
            return Ok(is_second);
        }

        // |T| = 4: is_second[i] = wins*(wins-1)*(wins-3) * (-1/2), the
        // unique degree-3 polynomial that is 1 at wins=2 and 0 at wins
        // in {0, 1, 3}.
        let neg_half = -FieldElement::one() * FieldElement::from_u64(2).inverse()?;
        for &i in t {
            let mut wins = FieldElement::zero();
            for &j in t {
                if j != i {
                    wins = MpcArithmetic::add(wins, gt[&(i, j)]);
                }
            }
            let w_minus_1 = MpcArithmetic::sub(wins, FieldElement::one());
            let w_minus_3 = MpcArithmetic::sub(wins, FieldElement::from_u64(3));
            let p1 = self.arithmetic.multiply(wins, w_minus_1, &format!("isc{i}p1")).await?;
            let p2 = self.arithmetic.multiply(p1, w_minus_3, &format!("isc{i}p2")).await?;
            is_second.insert(i, MpcArithmetic::scalar_mul(neg_half, p2));
        }
        Ok(is_second)
    }
}
