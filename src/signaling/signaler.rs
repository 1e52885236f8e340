//! Point-to-point signaling mailbox
//!
//! One [`Signaler`] binds the local peer to a designated counterpart for a
//! single call identifier. Outgoing messages land in the local peer's
//! mailbox slots; incoming ones are decoded from the counterpart's slots
//! and delivered, in receipt order, through a single channel. The
//! counterpart's status slot is watched alongside the mailbox: observing it
//! flip `true -> false/absent` synthesizes exactly one
//! [`SignalMessage::PeerLeft`], which is the only mechanism for detecting
//! abrupt departure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::context::{CallId, PeerId, SessionContext};
use crate::error::Result;
use crate::signaling::protocol::{self, SignalMessage};
use crate::store::{paths, ChildChange, DeferredAction, StorePath};

/// Bidirectional signaling mailbox for one call
pub struct Signaler {
    ctx: SessionContext,
    call_id: CallId,
    remote: PeerId,

    /// Identifier of this channel instance, for log correlation
    channel_id: String,

    incoming_tx: mpsc::UnboundedSender<SignalMessage>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<SignalMessage>>>,

    /// Next candidate slot sequence number
    candidate_seq: AtomicU64,

    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Signaler {
    /// Create a signaler bound to `remote` within `call_id`
    ///
    /// No store traffic happens until [`init`](Self::init).
    pub fn new(ctx: SessionContext, call_id: CallId, remote: PeerId) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            call_id,
            remote,
            channel_id: Uuid::new_v4().to_string(),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            candidate_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The call this signaler serves
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// The counterpart peer
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    /// Announce readiness and start listening to the counterpart
    ///
    /// Arms the crash-safety writes first (own mailbox removed, own status
    /// set false on disconnect), then publishes status `true` (externally
    /// observable presence starts here), and finally subscribes to the
    /// counterpart's mailbox and status slot.
    pub async fn init(&self) -> Result<()> {
        let store = self.ctx.store();
        let me = self.ctx.local_peer();
        let my_data = paths::call_data(&self.call_id, me);
        let my_status = paths::call_status(&self.call_id, me);

        info!(
            call_id = %self.call_id,
            remote = %self.remote,
            channel_id = %self.channel_id,
            "initializing signaling channel"
        );

        store
            .defer_on_disconnect(&my_data, DeferredAction::Remove)
            .await?;
        store
            .defer_on_disconnect(&my_status, DeferredAction::Set(json!(false)))
            .await?;
        store.write(&my_status, json!(true)).await?;

        let mut data_watch = store
            .watch_children(&paths::call_data(&self.call_id, &self.remote))
            .await?;
        let mut status_watch = store
            .watch_value(&paths::call_status(&self.call_id, &self.remote))
            .await?;

        let data_tx = self.incoming_tx.clone();
        let data_task = tokio::spawn(async move {
            while let Some(event) = data_watch.recv().await {
                if event.kind == ChildChange::Removed {
                    continue;
                }
                match protocol::decode(&event.key, &event.value) {
                    Some(message) => {
                        debug!(slot = %event.key, "decoded signaling message");
                        if data_tx.send(message).is_err() {
                            break;
                        }
                    }
                    None => trace!(slot = %event.key, "ignoring unrecognized slot"),
                }
            }
        });

        let status_tx = self.incoming_tx.clone();
        let status_task = tokio::spawn(async move {
            let mut seen_online = false;
            while let Some(update) = status_watch.recv().await {
                let online = matches!(update, Some(Value::Bool(true)));
                if online {
                    seen_online = true;
                } else if seen_online {
                    debug!("counterpart status dropped, synthesizing PeerLeft");
                    let _ = status_tx.send(SignalMessage::PeerLeft);
                    break;
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.push(data_task);
        tasks.push(status_task);
        Ok(())
    }

    /// Take the incoming message stream
    ///
    /// There is exactly one consumer; subsequent calls return `None`.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<SignalMessage>> {
        self.incoming_rx.lock().take()
    }

    /// Write a message into the local peer's mailbox
    ///
    /// Fire-and-forget: store failures are logged and treated as transient,
    /// and no attempt is made to confirm the counterpart is still there.
    pub async fn send(&self, message: SignalMessage) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(channel_id = %self.channel_id, "send after close, dropping");
            return;
        }

        let seq = match &message {
            SignalMessage::Candidate(_) => self.candidate_seq.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
        let (slot, value) = match protocol::encode(&message, seq) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode signaling message");
                return;
            }
        };

        let path = paths::call_data_slot(&self.call_id, self.ctx.local_peer(), &slot);
        debug!(slot = %slot, call_id = %self.call_id, "sending signaling message");
        if let Err(e) = self.ctx.store().write(&path, value).await {
            warn!(slot = %slot, error = %e, "signaling write failed");
        }
    }

    /// Tear the channel down
    ///
    /// Stops both watches, removes the local mailbox and publishes status
    /// `false`. Idempotent; safe to call from any state.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            call_id = %self.call_id,
            channel_id = %self.channel_id,
            "closing signaling channel"
        );

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let me = self.ctx.local_peer();
        let store = self.ctx.store();
        if let Err(e) = store.remove(&self.my_data_path(me)).await {
            warn!(error = %e, "failed to remove mailbox on close");
        }
        if let Err(e) = store
            .write(&paths::call_status(&self.call_id, me), json!(false))
            .await
        {
            warn!(error = %e, "failed to clear status on close");
        }
    }

    fn my_data_path(&self, me: &PeerId) -> StorePath {
        paths::call_data(&self.call_id, me)
    }
}
