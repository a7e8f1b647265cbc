use std::collections::HashMap;
use std::sync::Arc;

use field_math::{lagrange_coefficients_at_zero, FieldElement};
use mpc_consensus::{agree_on_ready_set, AcsProtocol, BaProtocol, CssProtocol, Envelope, MessageKind, Network};
use tokio::sync::{Mutex, Notify};

use crate::error::AuctionError;

type PartyId = mpc_consensus::PartyId;

struct OpenSession {
    shares: Mutex<HashMap<PartyId, FieldElement>>,
    result: Mutex<Option<FieldElement>>,
    ready: Notify,
}

impl OpenSession {
    fn new() -> Arc<Self> {
        Arc::new(OpenSession { shares: Mutex::new(HashMap::new()), result: Mutex::new(None), ready: Notify::new() })
    }
}

/// Local add/sub/scalar_mul plus the async `multiply`/`open_value`
/// primitives every higher circuit (bit decomposition, comparison,
/// the auction itself) is built from, per §4.5.
pub struct MpcArithmetic {
    party_id: PartyId,
    n: usize,
    f: usize,
    network: Arc<Network>,
    acs: Arc<AcsProtocol>,
    ba: Arc<BaProtocol>,
    css: Arc<CssProtocol>,
    active_set: Mutex<Option<Vec<PartyId>>>,
    lagrange: Mutex<Option<HashMap<PartyId, FieldElement>>>,
    open_sessions: Mutex<HashMap<String, Arc<OpenSession>>>,
    gate_counter: std::sync::atomic::AtomicU64,
}

impl MpcArithmetic {
    pub fn new(
        party_id: PartyId,
        n: usize,
        f: usize,
        network: Arc<Network>,
        acs: Arc<AcsProtocol>,
        ba: Arc<BaProtocol>,
        css: Arc<CssProtocol>,
    ) -> Arc<Self> {
        Arc::new(MpcArithmetic {
            party_id,
            n,
            f,
            network,
            acs,
            ba,
            css,
            active_set: Mutex::new(None),
            lagrange: Mutex::new(None),
            open_sessions: Mutex::new(HashMap::new()),
            gate_counter: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn add(a: FieldElement, b: FieldElement) -> FieldElement {
        a + b
    }

    pub fn sub(a: FieldElement, b: FieldElement) -> FieldElement {
        a - b
    }

    pub fn scalar_mul(c: FieldElement, a: FieldElement) -> FieldElement {
        c * a
    }

    /// Fixes the active set T and precomputes Lagrange basis
    /// coefficients at x=0 for T's x-values, as required before any
    /// `multiply`/`open_value` call.
    pub async fn set_active_set(&self, mut t: Vec<PartyId>) -> Result<(), AuctionError> {
        t.sort_unstable();
        t.dedup();
        if t.len() <= self.f {
            return Err(AuctionError::ActiveSetTooSmall(t.len(), self.f + 1));
        }
        let xs: Vec<FieldElement> = t.iter().map(|&p| FieldElement::from_u64(p as u64)).collect();
        let coeffs = lagrange_coefficients_at_zero(&xs)?;
        let lagrange = t.iter().copied().zip(coeffs).collect();
        *self.lagrange.lock().await = Some(lagrange);
        *self.active_set.lock().await = Some(t);
        Ok(())
    }

    pub async fn active_set(&self) -> Result<Vec<PartyId>, AuctionError> {
        self.active_set.lock().await.clone().ok_or(AuctionError::ActiveSetNotSet)
    }

    fn next_gate_id(&self, label: &str) -> String {
        let n = self.gate_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{label}:{n}")
    }

    /// BGW-style degree reduction: local product, per-dealer CSS
    /// reshare, per-gate agreement on which reshares to combine, then
    /// local Lagrange recombination. The agreed dealer set is truncated
    /// to exactly N-F = 2F+1 reshares regardless of the active set's
    /// size, since that is the point count a degree-2F polynomial
    /// needs to interpolate correctly.
    pub async fn multiply(&self, a: FieldElement, b: FieldElement, gate_id: &str) -> Result<FieldElement, AuctionError> {
        let active_set = self.active_set().await?;
        let d_i = a * b;
        let dealer_sid = format!("mul:{gate_id}:d:{}", self.party_id);
        self.css.share(d_i, &dealer_sid).await;

        let css = self.css.clone();
        let gate_id_owned = gate_id.to_string();
        let instance_id = format!("mul:{gate_id_owned}");
        let threshold = self.n - self.f;
        let finalized_dealers = agree_on_ready_set(&self.ba, &instance_id, &active_set, threshold, move |dealer| {
            let css = css.clone();
            let sid = format!("mul:{gate_id_owned}:d:{dealer}");
            async move {
                css.wait_accepted(&sid).await;
            }
        })
        .await;

        let t_gate: Vec<PartyId> = finalized_dealers.into_iter().take(threshold).collect();
        let xs: Vec<FieldElement> = t_gate.iter().map(|&p| FieldElement::from_u64(p as u64)).collect();
        let lambdas = lagrange_coefficients_at_zero(&xs)?;

        let mut result = FieldElement::zero();
        for (dealer, lambda) in t_gate.iter().zip(lambdas.iter()) {
            let sid = format!("mul:{gate_id}:d:{dealer}");
            let reshare = self.css.get_share(&sid).await.expect("finalized dealer share available locally");
            result = result + *lambda * reshare;
        }
        Ok(result)
    }

    /// Convenience wrapper that auto-assigns a gate id from `label`.
    pub async fn multiply_labeled(&self, a: FieldElement, b: FieldElement, label: &str) -> Result<FieldElement, AuctionError> {
        let gate_id = self.next_gate_id(label);
        self.multiply(a, b, &gate_id).await
    }

    async fn open_session(&self, sid: &str) -> Arc<OpenSession> {
        let mut sessions = self.open_sessions.lock().await;
        sessions.entry(sid.to_string()).or_insert_with(OpenSession::new).clone()
    }

    /// Broadcasts own share, collects F+1 shares from the active set,
    /// and Lagrange-interpolates at 0 to recover the plaintext.
    pub async fn open_value(&self, share: FieldElement, sid: &str) -> Result<FieldElement, AuctionError> {
        let session = self.open_session(sid).await;
        self.record_open_share(&session, self.party_id, share).await;

        self.network
            .broadcast(|_receiver| Envelope {
                sender: self.party_id,
                kind: MessageKind::MpcOpen { session_id: sid.to_string(), share_value: share },
            })
            .await;

        loop {
            if let Some(value) = *session.result.lock().await {
                return Ok(value);
            }
            session.ready.notified().await;
        }
    }

    async fn record_open_share(&self, session: &Arc<OpenSession>, sender: PartyId, share: FieldElement) {
        let points = {
            let mut shares = session.shares.lock().await;
            shares.insert(sender, share);
            if session.result.lock().await.is_some() || shares.len() < self.f + 1 {
                None
            } else {
                Some(shares.iter().take(self.f + 1).map(|(p, v)| (FieldElement::from_u64(*p as u64), *v)).collect::<Vec<_>>())
            }
        };
        if let Some(points) = points {
            if let Ok(value) = field_math::Polynomial::interpolate_at_zero(&points) {
                *session.result.lock().await = Some(value);
                session.ready.notify_waiters();
            }
        }
    }

    pub async fn handle_message(&self, envelope: Envelope) {
        if let MessageKind::MpcOpen { session_id, share_value } = envelope.kind {
            let session = self.open_session(&session_id).await;
            self.record_open_share(&session, envelope.sender, share_value).await;
        }
    }
}
