use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::ba::BaProtocol;
use crate::rbc::RbcProtocol;
use crate::PartyId;

struct AcsSession {
    started: Mutex<HashSet<PartyId>>,
    decided: Mutex<HashMap<PartyId, u8>>,
    progress: Notify,
}

impl AcsSession {
    fn new() -> Self {
        AcsSession { started: Mutex::new(HashSet::new()), decided: Mutex::new(HashMap::new()), progress: Notify::new() }
    }
}

/// Runs one binary agreement per candidate in `candidates` to the
/// standard ACS fixed point: candidate `j`'s BA is input 1 once
/// `ready(j)` resolves, or forced to 0 once `threshold` other
/// candidates have already decided 1 and `j`'s BA has not yet been
/// started. Generalises §4.3's "RBC delivered" readiness condition so
/// the same agreement core can be driven by a different completion
/// signal, and its candidate set need not be every party — e.g. §4.5's
/// per-gate reduction agrees only over the active set's sub-dealers,
/// with readiness being "this dealer's CSS sharing finalized" rather
/// than "this proposer's RBC delivered". `threshold` is taken as an
/// explicit parameter rather than derived from `candidates.len()`
/// because the per-gate caller needs the global N-F bound (enough
/// points to interpolate a degree-2F polynomial) even when its
/// candidate set (the active set's dealers) is smaller than N.
pub async fn agree_on_ready_set<R, Fut>(
    ba: &Arc<BaProtocol>,
    instance_id: &str,
    candidates: &[PartyId],
    threshold: usize,
    ready: R,
) -> Vec<PartyId>
where
    R: Fn(PartyId) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let session = Arc::new(AcsSession::new());
    let mut joins = Vec::with_capacity(candidates.len());
    for &proposer in candidates {
        let ba = ba.clone();
        let session = session.clone();
        let ba_key = ba_key(instance_id, proposer);
        let ready_fut = ready(proposer);
        joins.push(tokio::spawn(async move {
            let forced = wait_for_forced_zero(&session, proposer, threshold);
            tokio::select! {
                _ = ready_fut => { try_start(&ba, &session, proposer, &ba_key, 1).await; }
                _ = forced => { try_start(&ba, &session, proposer, &ba_key, 0).await; }
            }
            ba.wait_decided(&ba_key).await
        }));
    }

    for join in joins {
        join.await.expect("acs per-proposer task does not panic");
    }

    let decided = session.decided.lock().await;
    let mut agreed: Vec<PartyId> = decided.iter().filter(|(_, &v)| v == 1).map(|(&p, _)| p).collect();
    agreed.sort();
    agreed
}

fn ba_key(instance_id: &str, proposer: PartyId) -> String {
    format!("acs:{instance_id}:ba:{proposer}")
}

/// Agreement on a Common Set: every party proposes a value, and all
/// correct parties output the same set `T` of proposers, with `|T| >=
/// n - f` and `T` containing only proposers whose values were actually
/// delivered. Built from one RBC per proposer and one BA per proposer
/// (§4.3) via [`agree_on_ready_set`], purely event-driven — there is no
/// round timeout anywhere in this module.
pub struct AcsProtocol {
    party_id: PartyId,
    n: usize,
    f: usize,
    rbc: Arc<RbcProtocol>,
    ba: Arc<BaProtocol>,
}

impl AcsProtocol {
    pub fn new(party_id: PartyId, n: usize, f: usize, rbc: Arc<RbcProtocol>, ba: Arc<BaProtocol>) -> Arc<Self> {
        Arc::new(AcsProtocol { party_id, n, f, rbc, ba })
    }

    fn rbc_tag(instance_id: &str) -> String {
        format!("acs:{instance_id}:rbc")
    }

    /// Runs one ACS instance to completion and returns the agreed set of
    /// proposers together with their delivered payloads.
    pub async fn run(&self, instance_id: &str, proposal: Vec<u8>) -> Vec<(PartyId, Vec<u8>)> {
        let tag = Self::rbc_tag(instance_id);
        self.rbc.broadcast(&tag, proposal).await;

        let rbc = self.rbc.clone();
        let tag_for_ready = tag.clone();
        let candidates: Vec<PartyId> = (1..=self.n as PartyId).collect();
        let threshold = self.n - self.f;
        let proposers = agree_on_ready_set(&self.ba, instance_id, &candidates, threshold, move |proposer| {
            let rbc = rbc.clone();
            let tag = tag_for_ready.clone();
            async move {
                rbc.wait_deliver(proposer, &tag).await;
            }
        })
        .await;

        let mut agreed = Vec::with_capacity(proposers.len());
        for proposer in proposers {
            let payload = self.rbc.wait_deliver(proposer, &tag).await;
            agreed.push((proposer, payload));
        }
        tracing::info!(instance_id, party = self.party_id, agreed_count = agreed.len(), "acs decided");
        agreed
    }
}

async fn try_start(ba: &Arc<BaProtocol>, session: &Arc<AcsSession>, proposer: PartyId, ba_key: &str, value: u8) {
    {
        let mut started = session.started.lock().await;
        if !started.insert(proposer) {
            return;
        }
    }
    let decision = ba.run(ba_key, value).await;
    session.decided.lock().await.insert(proposer, decision);
    session.progress.notify_waiters();
}

/// Resolves once `proposer`'s BA has not yet been started and at least
/// `threshold` other candidates' BA instances have decided 1 — the
/// liveness trick that lets agreement terminate even if `proposer`'s
/// readiness condition never resolves for this party.
async fn wait_for_forced_zero(session: &Arc<AcsSession>, proposer: PartyId, threshold: usize) {
    loop {
        let notified = session.progress.notified();
        {
            let started = session.started.lock().await;
            let decided = session.decided.lock().await;
            let ones = decided.values().filter(|&&v| v == 1).count();
            if !started.contains(&proposer) && ones >= threshold {
                return;
            }
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::RandomnessBeacon;
    use crate::envelope::Envelope;
    use crate::network::{DelayModel, Direction, Network, OmissionPolicy};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::time::Duration;

    struct PartyHandles {
        acs: Arc<AcsProtocol>,
    }

    async fn build_party(
        party: PartyId,
        n: usize,
        f: usize,
        network: Arc<Network>,
        beacon: Arc<RandomnessBeacon>,
    ) -> PartyHandles {
        let rbc = RbcProtocol::new(party, n, f, network.clone());
        let ba = BaProtocol::new(party, n, f, network.clone(), beacon);
        let acs = AcsProtocol::new(party, n, f, rbc.clone(), ba.clone());

        let mut rx = network.take_receiver(party).await;
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                dispatch(&rbc, &ba, envelope).await;
            }
        });

        PartyHandles { acs }
    }

    async fn dispatch(rbc: &Arc<RbcProtocol>, ba: &Arc<BaProtocol>, envelope: Envelope) {
        use crate::envelope::MessageKind;
        match &envelope.kind {
            MessageKind::RbcInit { .. } | MessageKind::RbcEcho { .. } | MessageKind::RbcReady { .. } => {
                rbc.handle_message(envelope).await
            }
            MessageKind::BaVote { .. } | MessageKind::BaDecide { .. } => ba.handle_message(envelope).await,
            _ => {}
        }
    }

    #[tokio::test]
    async fn all_correct_proposals_are_agreed() {
        let network = Network::new(
            4,
            DelayModel::Fixed(Duration::ZERO),
            OmissionPolicy::None,
            ChaCha20Rng::seed_from_u64(1),
        );
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(1));
        let mut parties = Vec::new();
        for party in 1..=4 {
            parties.push(build_party(party, 4, 1, network.clone(), beacon.clone()).await);
        }

        let results = futures::future::join_all(
            parties.iter().enumerate().map(|(i, p)| p.acs.run("round0", vec![i as u8])),
        )
        .await;

        for result in &results {
            assert_eq!(result.len(), 4);
        }
    }

    #[tokio::test]
    async fn one_omitting_proposer_is_excluded_but_agreement_still_reaches_n_minus_f() {
        let network = Network::new(
            4,
            DelayModel::Fixed(Duration::ZERO),
            OmissionPolicy::DropAll { party: 4, direction: Direction::Send },
            ChaCha20Rng::seed_from_u64(2),
        );
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(2));
        let mut parties = Vec::new();
        for party in 1..=4 {
            parties.push(build_party(party, 4, 1, network.clone(), beacon.clone()).await);
        }

        let results = futures::future::join_all(
            parties.iter().enumerate().map(|(i, p)| p.acs.run("round0", vec![i as u8])),
        )
        .await;

        for result in &results {
            assert!(result.len() >= 3);
        }
    }
}
