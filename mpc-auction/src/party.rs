use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use field_math::FieldElement;
use mpc_consensus::{
    AcsProtocol, BaProtocol, CssProtocol, Envelope, MessageKind, Network, RandomnessBeacon, RbcProtocol,
};
use tokio::sync::{Mutex, Notify};

use crate::auction::SecondPriceAuction;
use crate::bit_decomposition::BitPool;
use crate::error::AuctionError;
use crate::mpc_arithmetic::MpcArithmetic;
use crate::output_privacy::OutputPrivacy;

type PartyId = mpc_consensus::PartyId;

fn input_session(party: PartyId) -> String {
    format!("input_{party}")
}

/// One party's full view of the protocol (§4.10): wires together the
/// consensus primitives and the arithmetic/circuit layers, and runs
/// the six-phase bid-to-outcome pipeline event-driven end to end. No
/// internal timeout drives any decision; an outer harness timeout may
/// bound total runtime for operator safety, but it is not part of this
/// orchestration.
pub struct Party {
    party_id: PartyId,
    n: usize,
    f: usize,
    rbc: Arc<RbcProtocol>,
    ba: Arc<BaProtocol>,
    css: Arc<CssProtocol>,
    acs: Arc<AcsProtocol>,
    arithmetic: Arc<MpcArithmetic>,
    output_privacy: Arc<OutputPrivacy>,
    bit_width: usize,
}

impl Party {
    pub fn new(
        party_id: PartyId,
        n: usize,
        f: usize,
        bit_width: usize,
        network: Arc<Network>,
        beacon: Arc<RandomnessBeacon>,
        css_rng: rand_chacha::ChaCha20Rng,
    ) -> Arc<Self> {
        let rbc = RbcProtocol::new(party_id, n, f, network.clone());
        let ba = BaProtocol::new(party_id, n, f, network.clone(), beacon);
        let css = CssProtocol::new(party_id, n, f, network.clone(), css_rng);
        let acs = AcsProtocol::new(party_id, n, f, rbc.clone(), ba.clone());
        let arithmetic = MpcArithmetic::new(party_id, n, f, network.clone(), acs.clone(), ba.clone(), css.clone());
        let output_privacy = OutputPrivacy::new(party_id, f, network.clone(), arithmetic.clone());

        let party = Arc::new(Party { party_id, n, f, rbc, ba, css, acs, arithmetic, output_privacy, bit_width });
        party.spawn_reader(network);
        party
    }

    fn spawn_reader(self: &Arc<Self>, network: Arc<Network>) {
        let party = self.clone();
        tokio::spawn(async move {
            let mut rx = network.take_receiver(party.party_id).await;
            while let Some(envelope) = rx.recv().await {
                party.dispatch(envelope).await;
            }
        });
    }

    async fn dispatch(&self, envelope: Envelope) {
        match &envelope.kind {
            MessageKind::RbcInit { .. } | MessageKind::RbcEcho { .. } | MessageKind::RbcReady { .. } => {
                self.rbc.handle_message(envelope).await
            }
            MessageKind::BaVote { .. } | MessageKind::BaDecide { .. } => self.ba.handle_message(envelope).await,
            MessageKind::CssShare { .. }
            | MessageKind::CssEcho { .. }
            | MessageKind::CssReady { .. }
            | MessageKind::CssRecover { .. }
            | MessageKind::CssReveal { .. } => self.css.handle_message(envelope).await,
            MessageKind::MpcOpen { .. } => self.arithmetic.handle_message(envelope).await,
            MessageKind::MaskShare { .. } => self.output_privacy.handle_message(envelope).await,
        }
    }

    /// Runs P1 through P6 and returns this party's plaintext outcome:
    /// `Some(price)` if this party is the winner, `Some(0)` if this
    /// party is in the active set but did not win, `None` if this
    /// party was excluded from the active set entirely.
    pub async fn run(
        &self,
        bid: FieldElement,
        mut bit_pool: BitPool,
        mask_shares: HashMap<PartyId, FieldElement>,
    ) -> Result<Option<FieldElement>, AuctionError> {
        let bound = 1u128 << self.bit_width;
        let bid_int = bid.to_u128();
        if bid_int >= bound {
            return Err(AuctionError::BidOutOfRange { bid: bid_int as u64, bound: bound as u64 });
        }

        // P1
        self.css.share(bid, &input_session(self.party_id)).await;

        // P2 + P3
        let t = self.agree_on_active_set().await;
        tracing::info!(party = self.party_id, active_set = ?t, "active set agreed");

        // P4
        self.arithmetic.set_active_set(t.clone()).await?;

        if !t.contains(&self.party_id) {
            return Ok(None);
        }

        // P5
        let mut bids = HashMap::new();
        for &j in &t {
            let share = self.css.get_share(&input_session(j)).await.expect("finalized input share available locally");
            bids.insert(j, share);
        }

        // P6
        let auction = SecondPriceAuction::new(self.arithmetic.clone(), self.bit_width);
        let outputs = auction.run(&bids, &mut bit_pool).await?;

        let mut my_result = None;
        for &i in &t {
            let mask_share = *mask_shares.get(&i).expect("mask share provided for every active-set member");
            let sid = format!("reveal:{i}");
            let revealed = self.output_privacy.reveal_to_owner(outputs[&i], mask_share, i, &sid).await?;
            if i == self.party_id {
                my_result = revealed;
            }
        }
        Ok(my_result)
    }

    async fn agree_on_active_set(&self) -> Vec<PartyId> {
        let accepted = Arc::new(Mutex::new(HashSet::new()));
        accepted.lock().await.insert(self.party_id);
        let progress = Arc::new(Notify::new());

        for j in 1..=self.n as PartyId {
            if j == self.party_id {
                continue;
            }
            let css = self.css.clone();
            let accepted = accepted.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                css.wait_accepted(&input_session(j)).await;
                accepted.lock().await.insert(j);
                progress.notify_waiters();
            });
        }

        loop {
            let notified = progress.notified();
            if accepted.lock().await.len() >= self.n - self.f {
                break;
            }
            notified.await;
        }

        let mut proposal: Vec<PartyId> = accepted.lock().await.iter().copied().collect();
        proposal.sort_unstable();
        let proposal_bytes = serde_json::to_vec(&proposal).expect("party id list serialises");

        let agreed = self.acs.run("main", proposal_bytes).await;
        let mut t: Vec<PartyId> = agreed.into_iter().map(|(p, _)| p).collect();
        t.sort_unstable();
        t
    }
}
