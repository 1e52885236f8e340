//! Signaling wire protocol
//!
//! Messages travel through per-peer mailbox slots under
//! `calls/{call}/data/{peer}`. A slot holds at most one unconsumed value and
//! is overwritten by repeated sends of the same kind:
//!
//! - `sdp`: the latest session description from that peer. Overwriting is
//!   acceptable here, only the newest description matters.
//! - `ice-{seq:08}`: one slot per connectivity candidate, sequenced by the
//!   sender so a burst of candidates can never overwrite each other.
//!
//! The description slot carries only the SDP text; whether it is an offer or
//! an answer follows from the receiver's role in the call. Unknown slot keys
//! are ignored when decoding, so newer writers can add kinds without
//! breaking older readers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Slot key for session descriptions
pub const SDP_SLOT: &str = "sdp";

/// Slot key prefix for connectivity candidates
pub const ICE_SLOT_PREFIX: &str = "ice-";

/// Whether a session description originates or answers the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionKind {
    /// The originating side of the exchange
    Offer,
    /// The response to an offer
    Answer,
}

/// A session description together with its role in the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Offer or answer
    pub kind: DescriptionKind,
    /// The description text
    pub sdp: String,
}

impl SessionDescription {
    /// An offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// An answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One proposed network path endpoint for the media connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Index of the media description this candidate belongs to
    pub sdp_m_line_index: u32,

    /// Identifier of the media description this candidate belongs to
    pub sdp_mid: String,

    /// The candidate text
    pub candidate: String,
}

/// Message decoded from the counterpart's mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// A session description arrived; offer vs. answer follows from the
    /// local role
    Description {
        /// The description text
        sdp: String,
    },

    /// A connectivity candidate arrived
    Candidate(IceCandidate),

    /// The counterpart's presence flipped false after having been true.
    /// Synthesized locally; never written to the store.
    PeerLeft,
}

/// Wire shape of the `sdp` slot
#[derive(Debug, Serialize, Deserialize)]
struct SdpSlot {
    sdp: String,
}

/// Slot key for the `seq`-th candidate sent by this peer
pub fn ice_slot(seq: u64) -> String {
    format!("{}{:08}", ICE_SLOT_PREFIX, seq)
}

/// Encode an outgoing message into its slot key and value
///
/// `PeerLeft` is not encodable: peer departure is carried by the status
/// slot, not the mailbox.
pub fn encode(message: &SignalMessage, candidate_seq: u64) -> Result<(String, Value)> {
    match message {
        SignalMessage::Description { sdp } => {
            let value = serde_json::to_value(SdpSlot { sdp: sdp.clone() })
                .map_err(|e| Error::SerializationError(e.to_string()))?;
            Ok((SDP_SLOT.to_string(), value))
        }
        SignalMessage::Candidate(candidate) => {
            let value = serde_json::to_value(candidate)
                .map_err(|e| Error::SerializationError(e.to_string()))?;
            Ok((ice_slot(candidate_seq), value))
        }
        SignalMessage::PeerLeft => Err(Error::SignalingError(
            "PeerLeft is synthesized locally and cannot be sent".to_string(),
        )),
    }
}

/// Decode a mailbox slot into a message
///
/// Returns `None` for unrecognized slot keys (forward-compatible ignore)
/// and for values that fail to parse.
pub fn decode(key: &str, value: &Value) -> Option<SignalMessage> {
    if key == SDP_SLOT {
        let slot: SdpSlot = serde_json::from_value(value.clone()).ok()?;
        return Some(SignalMessage::Description { sdp: slot.sdp });
    }
    if key.starts_with(ICE_SLOT_PREFIX) {
        let candidate: IceCandidate = serde_json::from_value(value.clone()).ok()?;
        return Some(SignalMessage::Candidate(candidate));
    }
    None
}
