use std::collections::HashMap;
use std::sync::Arc;

use field_math::{FieldElement, Polynomial};
use mpc_consensus::{Envelope, MessageKind, Network};
use rand_core::RngCore;
use tokio::sync::{Mutex, Notify};

use crate::error::AuctionError;
use crate::mpc_arithmetic::MpcArithmetic;

type PartyId = mpc_consensus::PartyId;

/// Generates one independent random-mask sharing per party in
/// `parties`, keyed by the owner whose output it will later mask.
/// Ideal-functionality preprocessing, mirroring [`crate::bit_decomposition::preprocess_random_bit_sharings`].
pub fn preprocess_output_masks<R: RngCore>(
    parties: &[PartyId],
    f: usize,
    rng: &mut R,
) -> HashMap<PartyId, HashMap<PartyId, FieldElement>> {
    parties
        .iter()
        .map(|&owner| {
            let secret = FieldElement::random(rng);
            let poly = Polynomial::random(f, secret, rng);
            let shares = parties.iter().map(|&p| (p, poly.evaluate(FieldElement::from_u64(p as u64)))).collect();
            (owner, shares)
        })
        .collect()
}

struct MaskSession {
    shares: Mutex<HashMap<PartyId, FieldElement>>,
    result: Mutex<Option<FieldElement>>,
    ready: Notify,
}

impl MaskSession {
    fn new() -> Arc<Self> {
        Arc::new(MaskSession { shares: Mutex::new(HashMap::new()), result: Mutex::new(None), ready: Notify::new() })
    }
}

/// Reveals an owner's output share without leaking it to anyone else
/// (§4.9): the masked value is opened publicly, but the mask itself is
/// only ever reconstructed by the owner from privately-sent shares.
pub struct OutputPrivacy {
    party_id: PartyId,
    f: usize,
    network: Arc<Network>,
    arithmetic: Arc<MpcArithmetic>,
    mask_sessions: Mutex<HashMap<String, Arc<MaskSession>>>,
}

impl OutputPrivacy {
    pub fn new(party_id: PartyId, f: usize, network: Arc<Network>, arithmetic: Arc<MpcArithmetic>) -> Arc<Self> {
        Arc::new(OutputPrivacy { party_id, f, network, arithmetic, mask_sessions: Mutex::new(HashMap::new()) })
    }

    async fn mask_session(&self, sid: &str) -> Arc<MaskSession> {
        let mut sessions = self.mask_sessions.lock().await;
        sessions.entry(sid.to_string()).or_insert_with(MaskSession::new).clone()
    }

    /// Every party holding a share of `output_share` (owned by `owner`)
    /// must call this, even parties that are not `owner`: the public
    /// open of `output_share + mask_share` needs every correct party's
    /// contribution, and only the owner branch reconstructs a result.
    pub async fn reveal_to_owner(
        &self,
        output_share: FieldElement,
        mask_share: FieldElement,
        owner: PartyId,
        sid: &str,
    ) -> Result<Option<FieldElement>, AuctionError> {
        let masked_share = MpcArithmetic::add(output_share, mask_share);
        let masked_value = self.arithmetic.open_value(masked_share, &format!("{sid}:masked")).await?;

        self.network
            .send(
                owner,
                Envelope {
                    sender: self.party_id,
                    kind: MessageKind::MaskShare { session_id: sid.to_string(), point: self.party_id, share_value: mask_share },
                },
            )
            .await;

        if self.party_id != owner {
            return Ok(None);
        }

        let session = self.mask_session(sid).await;
        self.record_mask_share(&session, self.party_id, mask_share).await;
        loop {
            if let Some(mask) = *session.result.lock().await {
                return Ok(Some(MpcArithmetic::sub(masked_value, mask)));
            }
            session.ready.notified().await;
        }
    }

    async fn record_mask_share(&self, session: &Arc<MaskSession>, point: PartyId, share: FieldElement) {
        let points = {
            let mut shares = session.shares.lock().await;
            shares.insert(point, share);
            if session.result.lock().await.is_some() || shares.len() < self.f + 1 {
                None
            } else {
                Some(shares.iter().take(self.f + 1).map(|(p, v)| (FieldElement::from_u64(*p as u64), *v)).collect::<Vec<_>>())
            }
        };
        if let Some(points) = points {
            if let Ok(value) = Polynomial::interpolate_at_zero(&points) {
                *session.result.lock().await = Some(value);
                session.ready.notify_waiters();
            }
        }
    }

    pub async fn handle_message(&self, envelope: Envelope) {
        if let MessageKind::MaskShare { session_id, point, share_value } = envelope.kind {
            let session = self.mask_session(&session_id).await;
            self.record_mask_share(&session, point, share_value).await;
        }
    }
}
