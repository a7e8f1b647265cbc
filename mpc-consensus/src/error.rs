use thiserror::Error;

use crate::PartyId;

/// Conditions a handler logs and drops rather than propagates, per §7's
/// propagation policy: malformed or out-of-context inbound messages
/// never abort a running protocol instance. Constructed purely for
/// `tracing` context, never returned as a `Result` — the instance just
/// ignores the offending message and keeps running.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("message from unknown sender {0} (not in 1..=n)")]
    UnknownSender(PartyId),
    #[error("malformed {kind} payload in session {session_id}")]
    MalformedPayload { kind: &'static str, session_id: String },
    #[error("css session {0} already finalized, ignoring late share")]
    SessionAlreadyFinalized(String),
    #[error("beacon index {0} requested twice by the same party")]
    BeaconIndexReused(u64),
}
