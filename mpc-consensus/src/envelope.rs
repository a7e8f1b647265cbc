use field_math::FieldElement;
use serde::{Deserialize, Serialize};

use crate::PartyId;

/// A typed message crossing a party-to-party channel.
///
/// Generalises the reference implementation's `{msg_type, sender,
/// payload, session_id}` dict into a single tagged enum, per the
/// string-dispatch-table-to-tagged-sum-type design note: one `match` on
/// `MessageKind` replaces a `msg_type -> handler` lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: PartyId,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageKind {
    RbcInit { tag: String, payload: Vec<u8> },
    RbcEcho { original_sender: PartyId, tag: String, payload: Vec<u8> },
    RbcReady { original_sender: PartyId, tag: String, payload: Vec<u8> },

    BaVote { ba_key: String, round: u32, value: u8 },
    BaDecide { ba_key: String, value: u8 },

    CssShare { session_id: String, share_value: FieldElement },
    CssEcho { session_id: String, point: PartyId, share_value: FieldElement },
    CssReady { session_id: String },
    CssRecover { session_id: String, point: PartyId, share_value: FieldElement },
    CssReveal { session_id: String, point: PartyId, share_value: FieldElement },

    MpcOpen { session_id: String, share_value: FieldElement },
    MaskShare { session_id: String, point: PartyId, share_value: FieldElement },
}

impl MessageKind {
    /// A short label for logging, independent of payload contents.
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::RbcInit { .. } => "RBC_INIT",
            MessageKind::RbcEcho { .. } => "RBC_ECHO",
            MessageKind::RbcReady { .. } => "RBC_READY",
            MessageKind::BaVote { .. } => "BA_VOTE",
            MessageKind::BaDecide { .. } => "BA_DECIDE",
            MessageKind::CssShare { .. } => "CSS_SHARE",
            MessageKind::CssEcho { .. } => "CSS_ECHO",
            MessageKind::CssReady { .. } => "CSS_READY",
            MessageKind::CssRecover { .. } => "CSS_RECOVER",
            MessageKind::CssReveal { .. } => "CSS_REVEAL",
            MessageKind::MpcOpen { .. } => "MPC_OPEN",
            MessageKind::MaskShare { .. } => "MASK_SHARE",
        }
    }
}
