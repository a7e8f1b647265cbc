use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::{mpsc, Mutex};

use crate::envelope::Envelope;
use crate::PartyId;

/// Which direction(s) of traffic a per-party drop policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
    Both,
}

/// Simulated network delay, sampled per message.
#[derive(Debug, Clone)]
pub enum DelayModel {
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
    Exponential { mean: Duration },
}

impl DelayModel {
    fn sample(&self, rng: &mut ChaCha20Rng) -> Duration {
        match self {
            DelayModel::Fixed(d) => *d,
            DelayModel::Uniform { min, max } => {
                if max <= min {
                    *min
                } else {
                    let span = (max.as_secs_f64() - min.as_secs_f64()).max(0.0);
                    Duration::from_secs_f64(min.as_secs_f64() + rng.gen::<f64>() * span)
                }
            }
            DelayModel::Exponential { mean } => {
                let lambda = 1.0 / mean.as_secs_f64().max(1e-9);
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                Duration::from_secs_f64(-u.ln() / lambda)
            }
        }
    }
}

/// Per-party / per-pair message omission, generalising the reference
/// implementation's `sim/network.py` policy family.
#[derive(Debug, Clone)]
pub enum OmissionPolicy {
    None,
    DropAll { party: PartyId, direction: Direction },
    DropProb { party: PartyId, probability: f64 },
    DropTypes { party: PartyId, types: Vec<&'static str>, probability: f64 },
    SelectiveOmission { party: PartyId, drop_to: HashSet<PartyId> },
    BurstDrop { party: PartyId, burst_ranges: Vec<(u64, u64)> },
    Composite(Vec<OmissionPolicy>),
}

impl OmissionPolicy {
    fn should_drop(
        &self,
        sender: PartyId,
        receiver: PartyId,
        kind_label: &str,
        send_index: u64,
        rng: &mut ChaCha20Rng,
    ) -> bool {
        match self {
            OmissionPolicy::None => false,
            OmissionPolicy::DropAll { party, direction } => {
                (*direction != Direction::Receive && sender == *party)
                    || (*direction != Direction::Send && receiver == *party)
            }
            OmissionPolicy::DropProb { party, probability } => {
                sender == *party && rng.gen::<f64>() < *probability
            }
            OmissionPolicy::DropTypes { party, types, probability } => {
                sender == *party && types.contains(&kind_label) && rng.gen::<f64>() < *probability
            }
            OmissionPolicy::SelectiveOmission { party, drop_to } => {
                sender == *party && drop_to.contains(&receiver)
            }
            OmissionPolicy::BurstDrop { party, burst_ranges } => {
                sender == *party
                    && burst_ranges.iter().any(|(lo, hi)| send_index >= *lo && send_index <= *hi)
            }
            OmissionPolicy::Composite(policies) => policies
                .iter()
                .any(|p| p.should_drop(sender, receiver, kind_label, send_index, rng)),
        }
    }
}

/// Counters tracked across a network's lifetime, mirroring the
/// reference implementation's `NetworkMetrics`.
#[derive(Debug, Default)]
pub struct NetworkMetrics {
    pub messages_sent: AtomicU64,
    pub messages_dropped: AtomicU64,
    by_type: Mutex<HashMap<&'static str, u64>>,
    start: Mutex<Option<Instant>>,
}

impl NetworkMetrics {
    pub fn new() -> Self {
        NetworkMetrics {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            by_type: Mutex::new(HashMap::new()),
            start: Mutex::new(Some(Instant::now())),
        }
    }

    async fn record(&self, kind_label: &'static str, dropped: bool) {
        if dropped {
            self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        }
        let mut by_type = self.by_type.lock().await;
        *by_type.entry(kind_label).or_insert(0) += 1;
    }

    pub async fn elapsed(&self) -> Duration {
        self.start.lock().await.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub async fn by_type_snapshot(&self) -> HashMap<&'static str, u64> {
        self.by_type.lock().await.clone()
    }
}

/// The in-process simulated network: per-directed-pair FIFO channels
/// with optional delay and drop policy, as described in the external
/// interfaces section. In production this is replaced by authenticated
/// TCP streams with the same per-link FIFO property.
pub struct Network {
    n: PartyId,
    senders: HashMap<PartyId, mpsc::UnboundedSender<Envelope>>,
    receivers: Mutex<HashMap<PartyId, mpsc::UnboundedReceiver<Envelope>>>,
    delay_model: DelayModel,
    omission_policy: OmissionPolicy,
    rng: Mutex<ChaCha20Rng>,
    send_counters: Mutex<HashMap<PartyId, u64>>,
    pub metrics: Arc<NetworkMetrics>,
}

impl Network {
    pub fn new(n: PartyId, delay_model: DelayModel, omission_policy: OmissionPolicy, rng: ChaCha20Rng) -> Arc<Self> {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for party in 1..=n {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(party, tx);
            receivers.insert(party, rx);
        }
        Arc::new(Network {
            n,
            senders,
            receivers: Mutex::new(receivers),
            delay_model,
            omission_policy,
            rng: Mutex::new(rng),
            send_counters: Mutex::new(HashMap::new()),
            metrics: Arc::new(NetworkMetrics::new()),
        })
    }

    /// Takes ownership of a party's inbound receiver. Must be called
    /// exactly once per party before that party's reader task starts.
    pub async fn take_receiver(&self, party: PartyId) -> mpsc::UnboundedReceiver<Envelope> {
        self.receivers
            .lock()
            .await
            .remove(&party)
            .expect("receiver already taken")
    }

    pub async fn send(&self, receiver: PartyId, envelope: Envelope) {
        let sender = envelope.sender;
        let kind_label = envelope.kind.label();

        let send_index = {
            let mut counters = self.send_counters.lock().await;
            let counter = counters.entry(sender).or_insert(0);
            let idx = *counter;
            *counter += 1;
            idx
        };

        let (dropped, delay) = {
            let mut rng = self.rng.lock().await;
            let dropped = self
                .omission_policy
                .should_drop(sender, receiver, kind_label, send_index, &mut rng);
            let delay = self.delay_model.sample(&mut rng);
            (dropped, delay)
        };

        self.metrics.record(kind_label, dropped).await;
        if dropped {
            tracing::debug!(sender, receiver, kind = kind_label, "message dropped");
            return;
        }

        let Some(tx) = self.senders.get(&receiver).cloned() else {
            return;
        };
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            tracing::debug!(sender, receiver, kind = kind_label, "message delivered");
            let _ = tx.send(envelope);
        });
    }

    pub async fn broadcast(&self, envelope_for: impl Fn(PartyId) -> Envelope) {
        for receiver in 1..=self.n {
            self.send(receiver, envelope_for(receiver)).await;
        }
    }

    pub fn n(&self) -> PartyId {
        self.n
    }
}
