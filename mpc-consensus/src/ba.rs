use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::beacon::RandomnessBeacon;
use crate::envelope::{Envelope, MessageKind};
use crate::error::ConsensusError;
use crate::event::OneShotEvent;
use crate::network::Network;
use crate::PartyId;

struct BaInstance {
    votes: Mutex<HashMap<u32, HashMap<u8, HashSet<PartyId>>>>,
    decided: OneShotEvent,
    decided_value: Mutex<Option<u8>>,
    /// Signalled on every new vote or decide, so `run` can re-check its
    /// round's threshold without a dedicated per-round primitive.
    activity: Notify,
}

impl BaInstance {
    fn new() -> Arc<Self> {
        Arc::new(BaInstance {
            votes: Mutex::new(HashMap::new()),
            decided: OneShotEvent::new(),
            decided_value: Mutex::new(None),
            activity: Notify::new(),
        })
    }
}

/// Ben-Or-style binary agreement using the randomness beacon as a
/// common coin. Keyed by an opaque string (e.g. `acs:{id}:ba:{j}`).
pub struct BaProtocol {
    party_id: PartyId,
    n: usize,
    f: usize,
    network: Arc<Network>,
    beacon: Arc<RandomnessBeacon>,
    instances: Mutex<HashMap<String, Arc<BaInstance>>>,
    beacon_counter: AtomicU64,
}

impl BaProtocol {
    pub fn new(party_id: PartyId, n: usize, f: usize, network: Arc<Network>, beacon: Arc<RandomnessBeacon>) -> Arc<Self> {
        Arc::new(BaProtocol {
            party_id,
            n,
            f,
            network,
            beacon,
            instances: Mutex::new(HashMap::new()),
            beacon_counter: AtomicU64::new(0),
        })
    }

    async fn instance(&self, ba_key: &str) -> Arc<BaInstance> {
        let mut instances = self.instances.lock().await;
        instances.entry(ba_key.to_string()).or_insert_with(BaInstance::new).clone()
    }

    pub async fn handle_message(&self, envelope: Envelope) {
        if envelope.sender == 0 || envelope.sender as usize > self.n {
            tracing::warn!(error = %ConsensusError::UnknownSender(envelope.sender), "dropping ba message");
            return;
        }
        match envelope.kind {
            MessageKind::BaVote { ba_key, round, value } => {
                self.on_vote(&ba_key, round, value, envelope.sender).await
            }
            MessageKind::BaDecide { ba_key, value } => self.on_decide(&ba_key, value).await,
            _ => {}
        }
    }

    async fn on_vote(&self, ba_key: &str, round: u32, value: u8, voter: PartyId) {
        let instance = self.instance(ba_key).await;
        {
            let mut votes = instance.votes.lock().await;
            votes.entry(round).or_default().entry(value).or_default().insert(voter);
        }
        instance.activity.notify_waiters();
    }

    async fn on_decide(&self, ba_key: &str, value: u8) {
        let instance = self.instance(ba_key).await;
        if !instance.decided.is_set() {
            *instance.decided_value.lock().await = Some(value);
            tracing::info!(ba_key, value, "ba decided (via DECIDE short-circuit)");
            instance.decided.fire();
        }
        instance.activity.notify_waiters();
    }

    /// Runs one binary agreement instance to decision.
    pub async fn run(&self, ba_key: &str, initial_estimate: u8) -> u8 {
        let instance = self.instance(ba_key).await;
        let mut estimate = initial_estimate;
        let mut round: u32 = 0;

        loop {
            if instance.decided.is_set() {
                return instance.decided_value.lock().await.expect("decided value set");
            }

            self.network
                .broadcast(|_receiver| Envelope {
                    sender: self.party_id,
                    kind: MessageKind::BaVote { ba_key: ba_key.to_string(), round, value: estimate },
                })
                .await;

            let (c0, c1) = self.wait_for_round_quorum(&instance, round).await;
            if let Some(decision) = self.check_decided_shortcut(&instance).await {
                return decision;
            }

            if c1 >= self.n - self.f {
                self.decide(&instance, ba_key, 1).await;
                return 1;
            } else if c0 >= self.n - self.f {
                self.decide(&instance, ba_key, 0).await;
                return 0;
            } else if c1 >= self.f + 1 {
                estimate = 1;
            } else if c0 >= self.f + 1 {
                estimate = 0;
            } else {
                let index = self.beacon_counter.fetch_add(1, Ordering::Relaxed);
                let coin = self.beacon.request(ba_key_index(ba_key, index), self.party_id).await;
                estimate = (coin.to_u128() % 2) as u8;
            }
            round += 1;
        }
    }

    async fn decide(&self, instance: &Arc<BaInstance>, ba_key: &str, value: u8) {
        if !instance.decided.is_set() {
            *instance.decided_value.lock().await = Some(value);
            tracing::info!(ba_key, value, "ba decided");
            instance.decided.fire();
        }
        self.network
            .broadcast(|_receiver| Envelope {
                sender: self.party_id,
                kind: MessageKind::BaDecide { ba_key: ba_key.to_string(), value },
            })
            .await;
    }

    /// Blocks until `ba_key` decides, without driving the protocol
    /// itself (used by callers that only input a value through another
    /// path, e.g. ACS's forced-zero branch racing against a live `run`).
    pub async fn wait_decided(&self, ba_key: &str) -> u8 {
        let instance = self.instance(ba_key).await;
        instance.decided.wait().await;
        let value = instance.decided_value.lock().await.expect("decided value set");
        value
    }

    async fn check_decided_shortcut(&self, instance: &Arc<BaInstance>) -> Option<u8> {
        if instance.decided.is_set() {
            Some(instance.decided_value.lock().await.expect("decided value set"))
        } else {
            None
        }
    }

    async fn wait_for_round_quorum(&self, instance: &Arc<BaInstance>, round: u32) -> (usize, usize) {
        loop {
            let notified = instance.activity.notified();
            let counts = self.round_counts(instance, round).await;
            if instance.decided.is_set() || counts.0 + counts.1 >= self.n - self.f {
                return counts;
            }
            notified.await;
        }
    }

    async fn round_counts(&self, instance: &Arc<BaInstance>, round: u32) -> (usize, usize) {
        let votes = instance.votes.lock().await;
        let for_round = votes.get(&round);
        let c0 = for_round.and_then(|r| r.get(&0)).map(|s| s.len()).unwrap_or(0);
        let c1 = for_round.and_then(|r| r.get(&1)).map(|s| s.len()).unwrap_or(0);
        (c0, c1)
    }
}

/// Derives a beacon index unique to this BA instance's coin requests,
/// so concurrently-running BA instances never collide on a shared
/// counter namespace.
fn ba_key_index(ba_key: &str, counter: u64) -> u64 {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(ba_key.as_bytes());
    hasher.update(counter.to_le_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{DelayModel, OmissionPolicy};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::time::Duration;

    async fn spawn_party(
        ba: Arc<BaProtocol>,
        network: Arc<Network>,
        party_id: PartyId,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = network.take_receiver(party_id).await;
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                ba.handle_message(envelope).await;
            }
        })
    }

    #[tokio::test]
    async fn unanimous_one_input_decides_one() {
        let network = Network::new(
            4,
            DelayModel::Fixed(Duration::ZERO),
            OmissionPolicy::None,
            ChaCha20Rng::seed_from_u64(1),
        );
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(1));
        let mut bas = Vec::new();
        for party in 1..=4 {
            let ba = BaProtocol::new(party, 4, 1, network.clone(), beacon.clone());
            spawn_party(ba.clone(), network.clone(), party).await;
            bas.push(ba);
        }

        let results = futures::future::join_all(bas.iter().map(|ba| ba.run("k", 1))).await;
        assert!(results.iter().all(|&v| v == 1));
    }

    #[tokio::test]
    async fn unanimous_zero_input_decides_zero() {
        let network = Network::new(
            4,
            DelayModel::Fixed(Duration::ZERO),
            OmissionPolicy::None,
            ChaCha20Rng::seed_from_u64(2),
        );
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(2));
        let mut bas = Vec::new();
        for party in 1..=4 {
            let ba = BaProtocol::new(party, 4, 1, network.clone(), beacon.clone());
            spawn_party(ba.clone(), network.clone(), party).await;
            bas.push(ba);
        }

        let results = futures::future::join_all(bas.iter().map(|ba| ba.run("k", 0))).await;
        assert!(results.iter().all(|&v| v == 0));
    }
}
