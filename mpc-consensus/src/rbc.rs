use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::envelope::{Envelope, MessageKind};
use crate::error::ConsensusError;
use crate::event::OneShotEvent;
use crate::network::Network;
use crate::PartyId;

type InstanceKey = (PartyId, String);
type PayloadDigest = [u8; 32];

struct RbcInstance {
    echoes: Mutex<HashMap<PayloadDigest, (Vec<u8>, HashSet<PartyId>)>>,
    readies: Mutex<HashMap<PayloadDigest, (Vec<u8>, HashSet<PartyId>)>>,
    sent_echo: Mutex<bool>,
    sent_ready: Mutex<bool>,
    delivered: OneShotEvent,
    delivered_payload: Mutex<Option<Vec<u8>>>,
}

impl RbcInstance {
    fn new() -> Arc<Self> {
        Arc::new(RbcInstance {
            echoes: Mutex::new(HashMap::new()),
            readies: Mutex::new(HashMap::new()),
            sent_echo: Mutex::new(false),
            sent_ready: Mutex::new(false),
            delivered: OneShotEvent::new(),
            delivered_payload: Mutex::new(None),
        })
    }
}

fn digest_of(payload: &[u8]) -> PayloadDigest {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

/// Bracha reliable broadcast, keyed by `(sender, tag)`. Tolerates an
/// omission-only adversary with `f < n/3`.
pub struct RbcProtocol {
    party_id: PartyId,
    n: usize,
    f: usize,
    network: Arc<Network>,
    instances: Mutex<HashMap<InstanceKey, Arc<RbcInstance>>>,
}

impl RbcProtocol {
    pub fn new(party_id: PartyId, n: usize, f: usize, network: Arc<Network>) -> Arc<Self> {
        Arc::new(RbcProtocol { party_id, n, f, network, instances: Mutex::new(HashMap::new()) })
    }

    async fn instance(&self, sender: PartyId, tag: &str) -> Arc<RbcInstance> {
        let mut instances = self.instances.lock().await;
        instances.entry((sender, tag.to_string())).or_insert_with(RbcInstance::new).clone()
    }

    /// Sender-only: broadcasts `payload` under `tag`.
    pub async fn broadcast(&self, tag: &str, payload: Vec<u8>) {
        self.network
            .broadcast(|_receiver| Envelope {
                sender: self.party_id,
                kind: MessageKind::RbcInit { tag: tag.to_string(), payload: payload.clone() },
            })
            .await;
    }

    /// Blocks until `(sender, tag)` delivers, then returns the payload.
    pub async fn wait_deliver(&self, sender: PartyId, tag: &str) -> Vec<u8> {
        let instance = self.instance(sender, tag).await;
        instance.delivered.wait().await;
        let payload = instance.delivered_payload.lock().await.clone().expect("payload set before delivered fires");
        payload
    }

    pub async fn handle_message(&self, envelope: Envelope) {
        if envelope.sender == 0 || envelope.sender as usize > self.n {
            tracing::warn!(error = %ConsensusError::UnknownSender(envelope.sender), "dropping rbc message");
            return;
        }
        match envelope.kind {
            MessageKind::RbcInit { tag, payload } => self.on_init(envelope.sender, tag, payload).await,
            MessageKind::RbcEcho { original_sender, tag, payload } => {
                self.on_echo(original_sender, tag, envelope.sender, payload).await
            }
            MessageKind::RbcReady { original_sender, tag, payload } => {
                self.on_ready(original_sender, tag, envelope.sender, payload).await
            }
            _ => {}
        }
    }

    async fn on_init(&self, sender: PartyId, tag: String, payload: Vec<u8>) {
        let instance = self.instance(sender, &tag).await;
        let mut sent_echo = instance.sent_echo.lock().await;
        if *sent_echo {
            return;
        }
        *sent_echo = true;
        drop(sent_echo);

        tracing::debug!(sender, tag = %tag, "rbc init -> echo");
        self.network
            .broadcast(|_receiver| Envelope {
                sender: self.party_id,
                kind: MessageKind::RbcEcho { original_sender: sender, tag: tag.clone(), payload: payload.clone() },
            })
            .await;
    }

    async fn on_echo(&self, original_sender: PartyId, tag: String, echoer: PartyId, payload: Vec<u8>) {
        let instance = self.instance(original_sender, &tag).await;
        let digest = digest_of(&payload);

        let reached_n_minus_f = {
            let mut echoes = instance.echoes.lock().await;
            let entry = echoes.entry(digest).or_insert_with(|| (payload.clone(), HashSet::new()));
            entry.1.insert(echoer);
            entry.1.len() >= self.n - self.f
        };

        if reached_n_minus_f {
            let mut sent_ready = instance.sent_ready.lock().await;
            if !*sent_ready {
                *sent_ready = true;
                drop(sent_ready);
                tracing::debug!(original_sender, tag = %tag, "rbc n-f echoes -> ready");
                self.network
                    .broadcast(|_receiver| Envelope {
                        sender: self.party_id,
                        kind: MessageKind::RbcReady {
                            original_sender,
                            tag: tag.clone(),
                            payload: payload.clone(),
                        },
                    })
                    .await;
            }
        }
    }

    async fn on_ready(&self, original_sender: PartyId, tag: String, readier: PartyId, payload: Vec<u8>) {
        let instance = self.instance(original_sender, &tag).await;
        let digest = digest_of(&payload);

        let (reached_amplify, reached_deliver) = {
            let mut readies = instance.readies.lock().await;
            let entry = readies.entry(digest).or_insert_with(|| (payload.clone(), HashSet::new()));
            entry.1.insert(readier);
            (entry.1.len() >= self.f + 1, entry.1.len() >= self.n - self.f)
        };

        if reached_amplify {
            let mut sent_ready = instance.sent_ready.lock().await;
            if !*sent_ready {
                *sent_ready = true;
                drop(sent_ready);
                tracing::debug!(original_sender, tag = %tag, "rbc f+1 readies -> amplify ready");
                self.network
                    .broadcast(|_receiver| Envelope {
                        sender: self.party_id,
                        kind: MessageKind::RbcReady {
                            original_sender,
                            tag: tag.clone(),
                            payload: payload.clone(),
                        },
                    })
                    .await;
            }
        }

        if reached_deliver && !instance.delivered.is_set() {
            *instance.delivered_payload.lock().await = Some(payload);
            tracing::info!(original_sender, tag = %tag, "rbc delivered");
            instance.delivered.fire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{DelayModel, Direction, OmissionPolicy};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::time::Duration;

    async fn run_party(
        rbc: Arc<RbcProtocol>,
        network: Arc<Network>,
        party_id: PartyId,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = network.take_receiver(party_id).await;
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                rbc.handle_message(envelope).await;
            }
        })
    }

    #[tokio::test]
    async fn validity_all_correct_parties_deliver_sender_value() {
        let network = Network::new(
            4,
            DelayModel::Fixed(Duration::ZERO),
            OmissionPolicy::None,
            ChaCha20Rng::seed_from_u64(1),
        );
        let mut rbcs = Vec::new();
        let mut handles = Vec::new();
        for party in 1..=4 {
            let rbc = RbcProtocol::new(party, 4, 1, network.clone());
            handles.push(run_party(rbc.clone(), network.clone(), party).await);
            rbcs.push(rbc);
        }

        rbcs[0].broadcast("tag", b"hello".to_vec()).await;

        for rbc in &rbcs {
            let payload = rbc.wait_deliver(1, "tag").await;
            assert_eq!(payload, b"hello");
        }
    }

    #[tokio::test]
    async fn faulty_sender_omitting_everyone_never_delivers() {
        let network = Network::new(
            4,
            DelayModel::Fixed(Duration::ZERO),
            OmissionPolicy::DropAll { party: 1, direction: Direction::Send },
            ChaCha20Rng::seed_from_u64(1),
        );
        let mut rbcs = Vec::new();
        for party in 1..=4 {
            let rbc = RbcProtocol::new(party, 4, 1, network.clone());
            run_party(rbc.clone(), network.clone(), party).await;
            rbcs.push(rbc);
        }

        rbcs[0].broadcast("tag", b"hello".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        for rbc in &rbcs[1..] {
            let instance = rbc.instance(1, "tag").await;
            assert!(!instance.delivered.is_set());
        }
    }
}
