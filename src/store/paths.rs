//! Store path scheme
//!
//! The per-call subtree is exclusively written by its owning peer and read
//! by the counterpart; no two peers ever write the same path.
//!
//! | Path                      | Written by | Meaning                              |
//! |---------------------------|------------|--------------------------------------|
//! | `calls/{C}/data/{P}/...`  | P          | signaling mailbox slots from P       |
//! | `calls/{C}/status/{P}`    | P / store  | P's presence within call C           |
//! | `calls/{P}/id`            | a caller   | invitation: value = caller's peer id |
//! | `users/{P}`               | P          | lobby presence record                |
//! | `users/{P}/online`        | store      | flipped false on disconnect          |

use crate::context::{CallId, PeerId};
use crate::store::StorePath;

const CALLS: &str = "calls";
const USERS: &str = "users";

/// Mailbox root for messages sent by `peer` within `call`
pub fn call_data(call: &CallId, peer: &PeerId) -> StorePath {
    StorePath::new(format!("{}/{}/data/{}", CALLS, call, peer))
}

/// One mailbox slot for messages sent by `peer` within `call`
pub fn call_data_slot(call: &CallId, peer: &PeerId, slot: &str) -> StorePath {
    call_data(call, peer).child(slot)
}

/// Presence flag for `peer` within `call`
pub fn call_status(call: &CallId, peer: &PeerId) -> StorePath {
    StorePath::new(format!("{}/{}/status/{}", CALLS, call, peer))
}

/// Incoming-call slot observed by `peer`
pub fn incoming_call(peer: &PeerId) -> StorePath {
    StorePath::new(format!("{}/{}/id", CALLS, peer))
}

/// Lobby presence record for `peer`
pub fn user(peer: &PeerId) -> StorePath {
    StorePath::new(format!("{}/{}", USERS, peer))
}

/// The online flag inside a peer's presence record
pub fn user_online(peer: &PeerId) -> StorePath {
    user(peer).child("online")
}

/// Root of the lobby presence collection
pub fn users_root() -> StorePath {
    StorePath::new(USERS)
}
