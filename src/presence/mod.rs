//! Lobby presence and call invitations
//!
//! Peers announce themselves under `users/{P}` and discover each other by
//! watching that collection. A call starts with the caller writing its own
//! id into the invitee's incoming-call slot; the invitee consumes the slot
//! (at most once) and joins the caller's channel. Crash safety comes from
//! deferred store writes: an ungraceful disconnect flips the presence flag
//! and retracts any outstanding invitation without the peer's cooperation.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::context::{CallId, PeerId, SessionContext};
use crate::error::{Error, Result};
use crate::media::MediaEngineFactory;
use crate::session::{CallRole, CallSession};
use crate::store::{paths, ChildChange, DeferredAction};

/// One peer's lobby presence, last writer wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Human-readable name, if the identity layer provided one
    pub display_name: Option<String>,

    /// Live connection to the rendezvous store
    ///
    /// The store itself flips this to `false` on ungraceful disconnect.
    pub online: bool,
}

/// A peer visible in the lobby
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// The peer's identifier
    pub peer: PeerId,
    /// Its latest presence record
    pub presence: PresenceRecord,
}

/// Something the lobby wants the UI to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// Someone invited us to a call
    ///
    /// May also arrive while our own invitation to the same peer is
    /// outstanding: mutual invitations are resolved by peer-id order and
    /// this side lost. Terminate the dialing session, then accept.
    IncomingCall {
        /// The inviter; also the call identifier to accept under
        caller: PeerId,
    },
}

/// Presence announcement, roster view and invitation exchange
pub struct Lobby {
    ctx: SessionContext,
    display_name: Option<String>,
    roster_rx: watch::Receiver<Vec<Contact>>,
    events_rx: mpsc::UnboundedReceiver<LobbyEvent>,
    outgoing_invite: Arc<Mutex<Option<PeerId>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Lobby {
    /// Join the lobby: announce presence and start watching
    ///
    /// Arms the deferred offline write before announcing, so a crash at any
    /// later point leaves the peer observably offline.
    pub async fn join(ctx: SessionContext, display_name: Option<String>) -> Result<Lobby> {
        let store = ctx.store();
        let me = ctx.local_peer().clone();

        info!(peer = %me, "joining lobby");

        store
            .defer_on_disconnect(&paths::user_online(&me), DeferredAction::Set(json!(false)))
            .await?;
        let record = PresenceRecord {
            display_name: display_name.clone(),
            online: true,
        };
        store
            .write(
                &paths::user(&me),
                serde_json::to_value(&record)
                    .map_err(|e| Error::SerializationError(e.to_string()))?,
            )
            .await?;

        let (roster_tx, roster_rx) = watch::channel(Vec::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outgoing_invite = Arc::new(Mutex::new(None));

        let mut users_watch = store.watch_children(&paths::users_root()).await?;
        let roster_me = me.clone();
        let roster_task = tokio::spawn(async move {
            let mut known: BTreeMap<PeerId, PresenceRecord> = BTreeMap::new();
            while let Some(event) = users_watch.recv().await {
                let peer = PeerId::from(event.key.as_str());
                if peer == roster_me {
                    continue;
                }
                match event.kind {
                    ChildChange::Removed => {
                        known.remove(&peer);
                    }
                    ChildChange::Added | ChildChange::Changed => {
                        match serde_json::from_value::<PresenceRecord>(event.value) {
                            Ok(record) => {
                                known.insert(peer, record);
                            }
                            Err(e) => {
                                warn!(peer = %peer, error = %e, "unreadable presence record");
                                continue;
                            }
                        }
                    }
                }
                let contacts = known
                    .iter()
                    .map(|(peer, presence)| Contact {
                        peer: peer.clone(),
                        presence: presence.clone(),
                    })
                    .collect();
                if roster_tx.send(contacts).is_err() {
                    break;
                }
            }
        });

        let mut invite_watch = store.watch_value(&paths::incoming_call(&me)).await?;
        let invite_store = Arc::clone(store);
        let invite_me = me.clone();
        let invite_out = Arc::clone(&outgoing_invite);
        let invite_task = tokio::spawn(async move {
            while let Some(update) = invite_watch.recv().await {
                let caller = match update {
                    Some(Value::String(id)) if !id.is_empty() => PeerId::from(id.as_str()),
                    _ => continue,
                };

                // Consume the slot: an invitation is delivered at most once.
                if let Err(e) = invite_store.remove(&paths::incoming_call(&invite_me)).await {
                    warn!(error = %e, "failed to consume invitation slot");
                }

                let mutual = { invite_out.lock().as_ref() == Some(&caller) };
                if mutual {
                    if invite_me < caller {
                        // We keep the offerer role; the counterpart will
                        // observe the same order and yield.
                        debug!(caller = %caller, "mutual invitation, keeping offerer role");
                        continue;
                    }
                    // We yield: retract our own invitation and take the
                    // answerer side.
                    debug!(caller = %caller, "mutual invitation, yielding offerer role");
                    *invite_out.lock() = None;
                    if let Err(e) = invite_store.remove(&paths::incoming_call(&caller)).await {
                        warn!(error = %e, "failed to retract invitation");
                    }
                }

                info!(caller = %caller, "incoming call");
                if events_tx.send(LobbyEvent::IncomingCall { caller }).is_err() {
                    break;
                }
            }
        });

        Ok(Lobby {
            ctx,
            display_name,
            roster_rx,
            events_rx,
            outgoing_invite,
            tasks: vec![roster_task, invite_task],
        })
    }

    /// The lobby roster, excluding the local peer
    pub fn roster(&self) -> watch::Receiver<Vec<Contact>> {
        self.roster_rx.clone()
    }

    /// Next lobby event, or `None` once the lobby shut down
    pub async fn next_event(&mut self) -> Option<LobbyEvent> {
        self.events_rx.recv().await
    }

    /// Invite a peer and start the offerer session
    ///
    /// Publishes readiness under the new call, arms the deferred retraction
    /// (a crash withdraws the invitation), then writes the invitation.
    /// Writing again overwrites any prior unconsumed invitation from this
    /// peer. The call identifier is the local peer id.
    pub async fn start_call(
        &self,
        invitee: &PeerId,
        factory: Arc<dyn MediaEngineFactory>,
        config: CallConfig,
    ) -> Result<CallSession> {
        let me = self.ctx.local_peer().clone();
        if *invitee == me {
            return Err(Error::SignalingError(
                "cannot start a call with yourself".to_string(),
            ));
        }

        let call_id = CallId::from(&me);
        let store = self.ctx.store();

        info!(invitee = %invitee, call_id = %call_id, "placing call");

        store
            .write(&paths::call_status(&call_id, &me), json!(true))
            .await?;
        store
            .defer_on_disconnect(&paths::incoming_call(invitee), DeferredAction::Remove)
            .await?;
        store
            .write(&paths::incoming_call(invitee), json!(me.as_str()))
            .await?;
        *self.outgoing_invite.lock() = Some(invitee.clone());

        CallSession::connect(
            self.ctx.clone(),
            call_id,
            invitee.clone(),
            CallRole::Offerer,
            factory,
            config,
        )
    }

    /// Accept an observed invitation and start the answerer session
    ///
    /// The caller's id is the call identifier.
    pub async fn accept_incoming(
        &self,
        caller: &PeerId,
        factory: Arc<dyn MediaEngineFactory>,
        config: CallConfig,
    ) -> Result<CallSession> {
        {
            let mut outgoing = self.outgoing_invite.lock();
            if outgoing.as_ref() == Some(caller) {
                *outgoing = None;
            }
        }

        info!(caller = %caller, "accepting incoming call");

        CallSession::connect(
            self.ctx.clone(),
            CallId::from(caller),
            caller.clone(),
            CallRole::Answerer,
            factory,
            config,
        )
    }

    /// Say goodbye gracefully
    ///
    /// Writes the offline record and stops the watches. The deferred write
    /// armed at join covers the ungraceful path.
    pub async fn leave(mut self) {
        let me = self.ctx.local_peer().clone();
        info!(peer = %me, "leaving lobby");

        let record = PresenceRecord {
            display_name: self.display_name.clone(),
            online: false,
        };
        if let Ok(value) = serde_json::to_value(&record) {
            if let Err(e) = self.ctx.store().write(&paths::user(&me), value).await {
                warn!(error = %e, "failed to write offline record");
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_record_serde_roundtrip() {
        let record = PresenceRecord {
            display_name: Some("Ada".to_string()),
            online: true,
        };
        let value = serde_json::to_value(&record).unwrap();
        let parsed: PresenceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_presence_record_without_name() {
        let parsed: PresenceRecord =
            serde_json::from_value(serde_json::json!({"display_name": null, "online": false}))
                .unwrap();
        assert_eq!(parsed.display_name, None);
        assert!(!parsed.online);
    }
}
