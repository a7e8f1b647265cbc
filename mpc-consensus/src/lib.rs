pub mod acs;
pub mod ba;
pub mod beacon;
pub mod css;
pub mod envelope;
pub mod error;
pub mod event;
pub mod network;
pub mod rbc;

/// Parties are numbered `1..=n`; `0` is never a valid party id.
pub type PartyId = u32;

pub use acs::{agree_on_ready_set, AcsProtocol};
pub use ba::BaProtocol;
pub use beacon::RandomnessBeacon;
pub use css::{CssProtocol, CssStatus};
pub use envelope::{Envelope, MessageKind};
pub use error::ConsensusError;
pub use event::OneShotEvent;
pub use network::{DelayModel, Direction, Network, NetworkMetrics, OmissionPolicy};
pub use rbc::RbcProtocol;
