use std::collections::HashMap;
use std::sync::Arc;

use field_math::{compute_vid, FieldElement, Polynomial};
use rand_chacha::ChaCha20Rng;
use tokio::sync::{Mutex, Notify};

use crate::envelope::{Envelope, MessageKind};
use crate::error::ConsensusError;
use crate::event::OneShotEvent;
use crate::network::Network;
use crate::PartyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssStatus {
    Pending,
    Finalized,
    /// Reserved for equivocation detection against an actively-corrupt
    /// dealer; never set under the omission-only adversary this core
    /// defends against (see Non-goals).
    #[allow(dead_code)]
    Invalid,
}

struct CssSession {
    share_value: Mutex<Option<FieldElement>>,
    echoes: Mutex<HashMap<PartyId, FieldElement>>,
    status: Mutex<CssStatus>,
    vid: Mutex<Option<String>>,
    finalized: OneShotEvent,
    ready_sent: Mutex<bool>,
    recover_shares: Mutex<HashMap<PartyId, FieldElement>>,
    reveal_shares: Mutex<HashMap<PartyId, FieldElement>>,
    /// Signalled whenever echoes/recover-shares/reveal-shares grow, so
    /// `recover`/`recover_to_party` can re-check their threshold
    /// without polling on a timer.
    activity: Notify,
}

impl CssSession {
    fn new() -> Arc<Self> {
        Arc::new(CssSession {
            share_value: Mutex::new(None),
            echoes: Mutex::new(HashMap::new()),
            status: Mutex::new(CssStatus::Pending),
            vid: Mutex::new(None),
            finalized: OneShotEvent::new(),
            ready_sent: Mutex::new(false),
            recover_shares: Mutex::new(HashMap::new()),
            reveal_shares: Mutex::new(HashMap::new()),
            activity: Notify::new(),
        })
    }
}

/// Verified t-sharing with echo-based finalization (§4.4): finalization
/// triggers on the F+1-th distinct echo, not on READY count, so that a
/// dealer delaying its own READY cannot self-deadlock the sharing.
pub struct CssProtocol {
    party_id: PartyId,
    n: usize,
    f: usize,
    network: Arc<Network>,
    sessions: Mutex<HashMap<String, Arc<CssSession>>>,
    rng: Mutex<ChaCha20Rng>,
}

impl CssProtocol {
    pub fn new(party_id: PartyId, n: usize, f: usize, network: Arc<Network>, rng: ChaCha20Rng) -> Arc<Self> {
        Arc::new(CssProtocol {
            party_id,
            n,
            f,
            network,
            sessions: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        })
    }

    async fn session(&self, sid: &str) -> Arc<CssSession> {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(sid.to_string()).or_insert_with(CssSession::new).clone()
    }

    /// Dealer-only: shares `secret` under `sid` to every party.
    pub async fn share(&self, secret: FieldElement, sid: &str) {
        let poly = {
            let mut rng = self.rng.lock().await;
            Polynomial::random(self.f, secret, &mut *rng)
        };

        for recipient in 1..=self.n as PartyId {
            let share_value = poly.evaluate(FieldElement::from_u64(recipient as u64));
            if recipient == self.party_id {
                self.receive_share(sid, share_value).await;
            } else {
                self.network
                    .send(
                        recipient,
                        Envelope {
                            sender: self.party_id,
                            kind: MessageKind::CssShare { session_id: sid.to_string(), share_value },
                        },
                    )
                    .await;
            }
        }
    }

    pub async fn handle_message(&self, envelope: Envelope) {
        if envelope.sender == 0 || envelope.sender as usize > self.n {
            tracing::warn!(error = %ConsensusError::UnknownSender(envelope.sender), "dropping css message");
            return;
        }
        match envelope.kind {
            MessageKind::CssShare { session_id, share_value } => {
                self.receive_share(&session_id, share_value).await
            }
            MessageKind::CssEcho { session_id, point, share_value } => {
                if point == 0 || point as usize > self.n {
                    tracing::warn!(
                        error = %ConsensusError::MalformedPayload { kind: "css echo point", session_id: session_id.clone() },
                        "dropping css echo"
                    );
                    return;
                }
                self.on_echo(&session_id, point, share_value).await
            }
            MessageKind::CssReady { .. } => {
                // Liveness optimisation only; finalization is echo-based.
            }
            MessageKind::CssRecover { session_id, point, share_value } => {
                self.on_recover(&session_id, point, share_value).await
            }
            MessageKind::CssReveal { session_id, point, share_value } => {
                self.on_reveal(&session_id, point, share_value).await
            }
            _ => {}
        }
    }

    async fn receive_share(&self, sid: &str, share_value: FieldElement) {
        let session = self.session(sid).await;
        if session.finalized.is_set() {
            tracing::warn!(error = %ConsensusError::SessionAlreadyFinalized(sid.to_string()), "dropping late css share");
            return;
        }
        *session.share_value.lock().await = Some(share_value);
        self.send_echo(sid, &session, share_value).await;
    }

    async fn send_echo(&self, sid: &str, session: &Arc<CssSession>, share_value: FieldElement) {
        {
            let mut echoes = session.echoes.lock().await;
            echoes.insert(self.party_id, share_value);
        }
        session.activity.notify_waiters();
        self.try_finalize(sid, session).await;

        self.network
            .broadcast(|_receiver| Envelope {
                sender: self.party_id,
                kind: MessageKind::CssEcho {
                    session_id: sid.to_string(),
                    point: self.party_id,
                    share_value,
                },
            })
            .await;
    }

    async fn on_echo(&self, sid: &str, point: PartyId, share_value: FieldElement) {
        let session = self.session(sid).await;
        {
            let mut echoes = session.echoes.lock().await;
            echoes.insert(point, share_value);
        }
        session.activity.notify_waiters();
        self.try_finalize(sid, &session).await;

        let echo_count = session.echoes.lock().await.len();
        if echo_count >= self.f + 1 {
            let mut ready_sent = session.ready_sent.lock().await;
            if !*ready_sent {
                *ready_sent = true;
                drop(ready_sent);
                self.network
                    .broadcast(|_receiver| Envelope {
                        sender: self.party_id,
                        kind: MessageKind::CssReady { session_id: sid.to_string() },
                    })
                    .await;
            }
        }
    }

    async fn try_finalize(&self, sid: &str, session: &Arc<CssSession>) {
        if session.finalized.is_set() {
            return;
        }
        let echoes = session.echoes.lock().await;
        if echoes.len() < self.f + 1 {
            return;
        }

        let pairs: Vec<(PartyId, FieldElement)> = echoes.iter().map(|(p, v)| (*p, *v)).collect();
        let vid = compute_vid(sid, &pairs);

        if session.share_value.lock().await.is_none() {
            let points: Vec<(FieldElement, FieldElement)> = pairs
                .iter()
                .take(self.f + 1)
                .map(|(p, v)| (FieldElement::from_u64(*p as u64), *v))
                .collect();
            let derived = Polynomial::interpolate_at_zero(&points)
                .expect("f+1 distinct echo points interpolate")
                .clone();
            // The interpolation above recovers p(0) (the secret); this
            // party's own share is p(self), not p(0), so evaluate the
            // same points' unique polynomial at self instead.
            let my_share = evaluate_unique_polynomial_at(&points, FieldElement::from_u64(self.party_id as u64))
                .unwrap_or(derived);
            *session.share_value.lock().await = Some(my_share);
        }

        *session.status.lock().await = CssStatus::Finalized;
        *session.vid.lock().await = Some(vid);
        tracing::info!(sid, "css finalized");
        session.finalized.fire();
    }

    pub async fn wait_accepted(&self, sid: &str) {
        let session = self.session(sid).await;
        session.finalized.wait().await;
    }

    pub async fn get_share(&self, sid: &str) -> Option<FieldElement> {
        let session = self.session(sid).await;
        let value = *session.share_value.lock().await;
        value
    }

    pub async fn get_status(&self, sid: &str) -> CssStatus {
        let session = self.session(sid).await;
        let status = *session.status.lock().await;
        status
    }

    pub async fn get_vid(&self, sid: &str) -> Option<String> {
        let session = self.session(sid).await;
        let vid = session.vid.lock().await.clone();
        vid
    }

    /// Full public opening: broadcast own share, collect F+1, interpolate at 0.
    pub async fn recover(&self, sid: &str) -> FieldElement {
        let session = self.session(sid).await;
        let own_share = self.get_share(sid).await.expect("share available before recover is called");
        {
            let mut recover_shares = session.recover_shares.lock().await;
            recover_shares.insert(self.party_id, own_share);
        }
        self.network
            .broadcast(|_receiver| Envelope {
                sender: self.party_id,
                kind: MessageKind::CssRecover { session_id: sid.to_string(), point: self.party_id, share_value: own_share },
            })
            .await;

        loop {
            let notified = session.activity.notified();
            let points = {
                let recover_shares = session.recover_shares.lock().await;
                if recover_shares.len() >= self.f + 1 {
                    Some(
                        recover_shares
                            .iter()
                            .take(self.f + 1)
                            .map(|(p, v)| (FieldElement::from_u64(*p as u64), *v))
                            .collect::<Vec<_>>(),
                    )
                } else {
                    None
                }
            };
            if let Some(points) = points {
                return Polynomial::interpolate_at_zero(&points).expect("f+1 points interpolate");
            }
            notified.await;
        }
    }

    async fn on_recover(&self, sid: &str, point: PartyId, share_value: FieldElement) {
        let session = self.session(sid).await;
        session.recover_shares.lock().await.insert(point, share_value);
        session.activity.notify_waiters();
    }

    /// Selective open: every party sends its share privately to
    /// `target`; only `target` reconstructs.
    pub async fn recover_to_party(&self, sid: &str, target: PartyId) -> Option<FieldElement> {
        let own_share = self.get_share(sid).await.expect("share available before recover is called");
        self.network
            .send(
                target,
                Envelope {
                    sender: self.party_id,
                    kind: MessageKind::CssReveal { session_id: sid.to_string(), point: self.party_id, share_value: own_share },
                },
            )
            .await;

        if self.party_id != target {
            return None;
        }

        let session = self.session(sid).await;
        session.reveal_shares.lock().await.insert(self.party_id, own_share);
        loop {
            let notified = session.activity.notified();
            let points = {
                let reveal_shares = session.reveal_shares.lock().await;
                if reveal_shares.len() >= self.f + 1 {
                    Some(
                        reveal_shares
                            .iter()
                            .take(self.f + 1)
                            .map(|(p, v)| (FieldElement::from_u64(*p as u64), *v))
                            .collect::<Vec<_>>(),
                    )
                } else {
                    None
                }
            };
            if let Some(points) = points {
                return Some(Polynomial::interpolate_at_zero(&points).expect("f+1 points interpolate"));
            }
            notified.await;
        }
    }

    async fn on_reveal(&self, sid: &str, point: PartyId, share_value: FieldElement) {
        let session = self.session(sid).await;
        session.reveal_shares.lock().await.insert(point, share_value);
        session.activity.notify_waiters();
    }
}

/// Evaluates the unique polynomial of degree `< points.len()` passing
/// through `points` at `x`, via Lagrange interpolation at an arbitrary
/// point (generalising `interpolate_at_zero`, used only to recover this
/// party's own share when its direct `CSS_SHARE` never arrived).
fn evaluate_unique_polynomial_at(points: &[(FieldElement, FieldElement)], x: FieldElement) -> Option<FieldElement> {
    let mut acc = FieldElement::zero();
    for (i, (xi, yi)) in points.iter().enumerate() {
        let mut numerator = FieldElement::one();
        let mut denominator = FieldElement::one();
        for (j, (xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = numerator * (x - *xj);
            denominator = denominator * (*xi - *xj);
        }
        acc = acc + numerator * denominator.inverse().ok()? * *yi;
    }
    Some(acc)
}
