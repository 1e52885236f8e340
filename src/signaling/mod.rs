//! Signaling channel between two peers
//!
//! The wire protocol ([`protocol`]) defines the mailbox slot scheme; the
//! [`Signaler`] moves typed messages through it and folds the counterpart's
//! presence into the same incoming stream.

pub mod protocol;
mod signaler;

pub use protocol::{DescriptionKind, IceCandidate, SessionDescription, SignalMessage};
pub use signaler::Signaler;
