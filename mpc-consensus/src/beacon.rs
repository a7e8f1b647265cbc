use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use field_math::FieldElement;
use rand_chacha::ChaCha20Rng;
use tokio::sync::Mutex;

use crate::error::ConsensusError;
use crate::event::OneShotEvent;
use crate::PartyId;

struct IndexInner {
    requesters: HashSet<PartyId>,
    value: Option<FieldElement>,
}

struct IndexState {
    inner: Mutex<IndexInner>,
    ready: OneShotEvent,
}

impl IndexState {
    fn new() -> Arc<Self> {
        Arc::new(IndexState {
            inner: Mutex::new(IndexInner { requesters: HashSet::new(), value: None }),
            ready: OneShotEvent::new(),
        })
    }
}

/// Idealised common-coin service: `request(index, party_id)` blocks
/// until at least `threshold` distinct parties have requested the same
/// index, then returns one fixed uniform field element for that index
/// to every requester. The only cross-party shared resource in the
/// system, guarded by a single mutex over its small request-count map.
pub struct RandomnessBeacon {
    threshold: usize,
    indices: Mutex<HashMap<u64, Arc<IndexState>>>,
    rng: Mutex<ChaCha20Rng>,
    invocations: AtomicU64,
}

impl RandomnessBeacon {
    pub fn new(threshold: usize, rng: ChaCha20Rng) -> Arc<Self> {
        Arc::new(RandomnessBeacon {
            threshold,
            indices: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            invocations: AtomicU64::new(0),
        })
    }

    pub async fn request(&self, index: u64, party_id: PartyId) -> FieldElement {
        let state = {
            let mut indices = self.indices.lock().await;
            indices.entry(index).or_insert_with(IndexState::new).clone()
        };

        {
            let mut inner = state.inner.lock().await;
            if !inner.requesters.insert(party_id) {
                tracing::warn!(error = %ConsensusError::BeaconIndexReused(index), "party requested same beacon index twice");
            }
            if inner.requesters.len() >= self.threshold && inner.value.is_none() {
                let mut rng = self.rng.lock().await;
                inner.value = Some(FieldElement::random(&mut *rng));
                self.invocations.fetch_add(1, Ordering::Relaxed);
                state.ready.fire();
            }
        }

        state.ready.wait().await;
        let value = state.inner.lock().await.value.expect("beacon value set before ready fires");
        value
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[tokio::test]
    async fn releases_once_threshold_requesters_join() {
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(5));
        let a = beacon.clone();
        let b = beacon.clone();
        let (va, vb) = tokio::join!(a.request(0, 1), b.request(0, 2));
        assert_eq!(va, vb);
    }

    #[tokio::test]
    async fn distinct_indices_yield_independent_values() {
        let beacon = RandomnessBeacon::new(1, ChaCha20Rng::seed_from_u64(9));
        let v0 = beacon.request(0, 1).await;
        let v1 = beacon.request(1, 1).await;
        assert_ne!(v0, v1);
    }

    #[tokio::test]
    async fn single_requester_below_threshold_blocks_until_joined() {
        let beacon = RandomnessBeacon::new(2, ChaCha20Rng::seed_from_u64(1));
        let b2 = beacon.clone();
        let first = tokio::spawn(async move { b2.request(0, 1).await });
        tokio::task::yield_now().await;
        assert_eq!(beacon.invocation_count(), 0);
        let second = beacon.request(0, 2).await;
        let firstv = first.await.unwrap();
        assert_eq!(firstv, second);
        assert_eq!(beacon.invocation_count(), 1);
    }
}
