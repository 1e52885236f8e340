//! Call session state machine
//!
//! A [`CallSession`] owns one media engine and one signaling channel for
//! the lifetime of a call, and drives them from a single worker task. The
//! three event sources (store watch notifications, engine events and user
//! commands) are funneled into that worker and drained strictly in arrival
//! order, interleaved fairly across sources, so the engine (which is not
//! safe for concurrent entry) is never entered twice at once. Description
//! creation and application are awaited inline on the worker, which also
//! guarantees at most one outstanding request at a time.
//!
//! Lifecycle:
//!
//! ```text
//!          Dialing ──► Connecting ──► Connected
//!             │             │             │
//!             │             ├──► Failed   │   (negotiation error; terminate only)
//!             └─────────────┴─────────────┴──► Finished   (terminal)
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::{CallConfig, CameraFacing};
use crate::context::{CallId, PeerId, SessionContext};
use crate::error::Result;
use crate::media::{EngineEvent, MediaEngine, MediaEngineFactory, TrackId};
use crate::signaling::{SessionDescription, SignalMessage, Signaler};
use crate::store::paths;

/// Where a session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Pre-start default for UI collaborators; a constructed session never
    /// reports this
    Unknown,
    /// Waiting for the counterpart to become ready to receive signaling
    Dialing,
    /// Exchanging descriptions and candidates
    Connecting,
    /// Remote media is flowing
    Connected,
    /// Negotiation failed; no automatic retry, a new session must be started
    Failed,
    /// The call is over (terminal)
    Finished,
}

impl CallStatus {
    /// Whether no further transitions can happen
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Finished)
    }
}

/// Which side of the description exchange this session takes
///
/// Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// Originates the session description
    Offerer,
    /// Responds to the counterpart's offer
    Answerer,
}

impl CallRole {
    fn is_offerer(self) -> bool {
        matches!(self, CallRole::Offerer)
    }
}

enum Command {
    ToggleCamera,
    Terminate(oneshot::Sender<()>),
}

/// Handle to a running call session
///
/// Owned by the UI collaborator for the call's lifetime. Dropping the
/// handle tears the call down like [`terminate`](CallSession::terminate).
pub struct CallSession {
    call_id: CallId,
    remote: PeerId,
    role: CallRole,
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<CallStatus>,
}

impl CallSession {
    /// Start a session and its worker
    ///
    /// Status is `Dialing` immediately; engine construction and the rest of
    /// the handshake happen on the worker without blocking the caller.
    /// Must run inside a tokio runtime.
    pub fn connect(
        ctx: SessionContext,
        call_id: CallId,
        remote: PeerId,
        role: CallRole,
        factory: Arc<dyn MediaEngineFactory>,
        config: CallConfig,
    ) -> Result<CallSession> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CallStatus::Dialing);

        info!(call_id = %call_id, remote = %remote, ?role, "starting call session");

        let signaler = Arc::new(Signaler::new(ctx.clone(), call_id.clone(), remote.clone()));
        let worker = Worker {
            ctx,
            call_id: call_id.clone(),
            remote: remote.clone(),
            role,
            config: config.clone(),
            factory,
            signaler,
            status_tx,
            engine: None,
            engine_events: None,
            audio_track: None,
            video_track: None,
            facing: config.media.initial_camera,
            closed: false,
        };
        tokio::spawn(worker.run(cmd_rx));

        Ok(CallSession {
            call_id,
            remote,
            role,
            cmd_tx,
            status_rx,
        })
    }

    /// The call identifier this session is bound to
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// The counterpart peer
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    /// This side's role in the description exchange
    pub fn role(&self) -> CallRole {
        self.role
    }

    /// Current status
    pub fn status(&self) -> CallStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes (the `onStatusChanged` contract)
    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.status_rx.clone()
    }

    /// Swap the outgoing camera without renegotiating
    ///
    /// The replacement track is installed before the old one is disposed,
    /// so the counterpart never observes a gap. The audio track is
    /// unaffected.
    pub fn toggle_camera(&self) {
        let _ = self.cmd_tx.send(Command::ToggleCamera);
    }

    /// End the call and release every resource
    ///
    /// Closes the signaling channel, disposes the engine and its tracks,
    /// and settles the status at `Finished`. Idempotent; safe under any
    /// state. Returns once the worker acknowledged the teardown (or has
    /// already gone away).
    pub async fn terminate(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Terminate(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Outcome of the dial gate
enum Gate {
    /// Counterpart announced readiness
    Ready,
    /// User hung up while dialing
    Terminated(Option<oneshot::Sender<()>>),
    /// The status watch ended before the counterpart showed up
    Lost,
}

struct Worker {
    ctx: SessionContext,
    call_id: CallId,
    remote: PeerId,
    role: CallRole,
    config: CallConfig,
    factory: Arc<dyn MediaEngineFactory>,
    signaler: Arc<Signaler>,
    status_tx: watch::Sender<CallStatus>,
    engine: Option<Box<dyn MediaEngine>>,
    engine_events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    audio_track: Option<TrackId>,
    video_track: Option<TrackId>,
    facing: CameraFacing,
    closed: bool,
}

impl Worker {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        // Engine and local capture first; a camera/microphone denial aborts
        // the session before any signaling write.
        if let Err(e) = self.start_engine().await {
            error!(call_id = %self.call_id, error = %e, "media engine start failed");
            self.set_status(CallStatus::Failed);
            return;
        }

        match self.await_counterpart(&mut cmd_rx).await {
            Gate::Ready => {}
            Gate::Terminated(ack) => {
                self.finish(ack).await;
                return;
            }
            Gate::Lost => {
                self.set_status(CallStatus::Failed);
                self.cleanup().await;
                return;
            }
        }

        self.set_status(CallStatus::Connecting);
        if let Err(e) = self.signaler.init().await {
            warn!(call_id = %self.call_id, error = %e, "signaling init failed");
            self.set_status(CallStatus::Failed);
            self.cleanup().await;
            return;
        }

        let mut incoming = match self.signaler.take_incoming() {
            Some(rx) => rx,
            None => {
                error!(call_id = %self.call_id, "signaling stream already taken");
                self.set_status(CallStatus::Failed);
                self.cleanup().await;
                return;
            }
        };

        if self.role.is_offerer() {
            self.send_offer().await;
        }

        let mut events = self.engine_events.take();
        let mut incoming_open = true;
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::ToggleCamera) => self.toggle_camera().await,
                    Some(Command::Terminate(ack)) => {
                        self.finish(Some(ack)).await;
                        return;
                    }
                    // Handle dropped: tear down like terminate().
                    None => {
                        self.finish(None).await;
                        return;
                    }
                },
                message = incoming.recv(), if incoming_open => match message {
                    Some(message) => {
                        if self.handle_signal(message).await {
                            return;
                        }
                    }
                    None => incoming_open = false,
                },
                event = recv_engine(&mut events) => match event {
                    Some(event) => {
                        if self.handle_engine_event(event).await {
                            return;
                        }
                    }
                    // Engine dropped its event stream; nothing more will come.
                    None => events = None,
                },
            }
        }
    }

    async fn start_engine(&mut self) -> Result<()> {
        let mut engine = self.factory.create(&self.config).await?;
        match self.setup_local_media(&mut engine).await {
            Ok(()) => {
                self.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                let _ = engine.close().await;
                Err(e)
            }
        }
    }

    async fn setup_local_media(&mut self, engine: &mut Box<dyn MediaEngine>) -> Result<()> {
        let audio = engine.create_audio_track().await?;
        engine.set_outgoing_audio(audio).await?;
        let video = engine.create_video_track(self.facing).await?;
        engine.set_outgoing_video(video).await?;
        self.audio_track = Some(audio);
        self.video_track = Some(video);
        self.engine_events = engine.take_events();
        debug!(call_id = %self.call_id, %audio, %video, "local media ready");
        Ok(())
    }

    /// Wait until the counterpart's status slot reads `true`
    ///
    /// The counterpart must have announced readiness (its own
    /// `Signaler::init`) before any signaling exchange makes sense. Hanging
    /// up is still served while waiting.
    async fn await_counterpart(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Gate {
        let status_path = paths::call_status(&self.call_id, &self.remote);
        let mut gate = match self.ctx.store().watch_value(&status_path).await {
            Ok(watch) => watch,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "cannot watch counterpart status");
                return Gate::Lost;
            }
        };

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::ToggleCamera) => self.toggle_camera().await,
                    Some(Command::Terminate(ack)) => return Gate::Terminated(Some(ack)),
                    None => return Gate::Terminated(None),
                },
                update = gate.recv() => match update {
                    Some(Some(Value::Bool(true))) => {
                        debug!(call_id = %self.call_id, remote = %self.remote, "counterpart is ready");
                        return Gate::Ready;
                    }
                    // Absent or false: the counterpart has not joined yet.
                    Some(_) => {}
                    None => return Gate::Lost,
                },
            }
        }
    }

    async fn send_offer(&mut self) {
        if self.negotiation_dead() {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let sdp = match engine.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                error!(call_id = %self.call_id, error = %e, "offer creation failed");
                self.set_status(CallStatus::Failed);
                return;
            }
        };
        if let Err(e) = engine
            .set_local_description(SessionDescription::offer(sdp.clone()))
            .await
        {
            error!(call_id = %self.call_id, error = %e, "applying local offer failed");
            self.set_status(CallStatus::Failed);
            return;
        }
        self.signaler.send(SignalMessage::Description { sdp }).await;
    }

    /// Returns true when the worker should stop
    async fn handle_signal(&mut self, message: SignalMessage) -> bool {
        match message {
            SignalMessage::Description { sdp } => {
                if !self.negotiation_dead() {
                    self.handle_remote_description(sdp).await;
                }
                false
            }
            SignalMessage::Candidate(candidate) => {
                // Forward unconditionally; the engine buffers candidates
                // that arrive before the description exchange completes.
                if let Some(engine) = self.engine.as_mut() {
                    if let Err(e) = engine.add_remote_candidate(candidate).await {
                        warn!(call_id = %self.call_id, error = %e, "remote candidate rejected");
                    }
                }
                false
            }
            SignalMessage::PeerLeft => {
                info!(call_id = %self.call_id, remote = %self.remote, "counterpart left");
                self.finish(None).await;
                true
            }
        }
    }

    async fn handle_remote_description(&mut self, sdp: String) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match self.role {
            // The counterpart answered our offer.
            CallRole::Offerer => {
                if let Err(e) = engine
                    .set_remote_description(SessionDescription::answer(sdp))
                    .await
                {
                    error!(call_id = %self.call_id, error = %e, "applying remote answer failed");
                    self.set_status(CallStatus::Failed);
                }
            }
            // The counterpart's offer: apply it, then answer.
            CallRole::Answerer => {
                if let Err(e) = engine
                    .set_remote_description(SessionDescription::offer(sdp))
                    .await
                {
                    error!(call_id = %self.call_id, error = %e, "applying remote offer failed");
                    self.set_status(CallStatus::Failed);
                    return;
                }
                let answer = match engine.create_answer().await {
                    Ok(answer) => answer,
                    Err(e) => {
                        error!(call_id = %self.call_id, error = %e, "answer creation failed");
                        self.set_status(CallStatus::Failed);
                        return;
                    }
                };
                if let Err(e) = engine
                    .set_local_description(SessionDescription::answer(answer.clone()))
                    .await
                {
                    error!(call_id = %self.call_id, error = %e, "applying local answer failed");
                    self.set_status(CallStatus::Failed);
                    return;
                }
                self.signaler
                    .send(SignalMessage::Description { sdp: answer })
                    .await;
            }
        }
    }

    /// Returns true when the worker should stop
    async fn handle_engine_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::CandidateDiscovered(candidate) => {
                self.signaler
                    .send(SignalMessage::Candidate(candidate))
                    .await;
                false
            }
            EngineEvent::RemoteStreamAttached => {
                self.set_status(CallStatus::Connected);
                false
            }
            EngineEvent::RemoteStreamDetached => {
                info!(call_id = %self.call_id, "remote stream detached");
                self.finish(None).await;
                true
            }
        }
    }

    async fn toggle_camera(&mut self) {
        if self.closed {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let facing = self.facing.flipped();
        let replacement = match engine.create_video_track(facing).await {
            Ok(track) => track,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "camera switch failed");
                return;
            }
        };
        match engine.set_outgoing_video(replacement).await {
            Ok(previous) => {
                // The old track goes away only once the replacement is
                // live, so the outgoing video never gaps.
                if let Some(previous) = previous {
                    if let Err(e) = engine.dispose_track(previous).await {
                        warn!(call_id = %self.call_id, error = %e, "old video track leak");
                    }
                }
                self.facing = facing;
                self.video_track = Some(replacement);
                debug!(call_id = %self.call_id, ?facing, "outgoing camera switched");
            }
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "video track replacement failed");
                let _ = engine.dispose_track(replacement).await;
            }
        }
    }

    fn negotiation_dead(&self) -> bool {
        matches!(
            *self.status_tx.borrow(),
            CallStatus::Failed | CallStatus::Finished
        )
    }

    fn set_status(&self, status: CallStatus) {
        let current = *self.status_tx.borrow();
        if current == status || current.is_terminal() {
            return;
        }
        debug!(call_id = %self.call_id, "status transition: {:?} -> {:?}", current, status);
        let _ = self.status_tx.send(status);
    }

    async fn finish(&mut self, ack: Option<oneshot::Sender<()>>) {
        self.cleanup().await;
        self.set_status(CallStatus::Finished);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Release everything exactly once
    async fn cleanup(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.signaler.close().await;
        if let Some(mut engine) = self.engine.take() {
            for track in [self.video_track.take(), self.audio_track.take()]
                .into_iter()
                .flatten()
            {
                let _ = engine.dispose_track(track).await;
            }
            if let Err(e) = engine.close().await {
                warn!(call_id = %self.call_id, error = %e, "engine close failed");
            }
        }
        info!(call_id = %self.call_id, "session resources released");
    }
}

/// Receive from the engine event stream, pending forever once it is gone
async fn recv_engine(
    rx: &mut Option<mpsc::UnboundedReceiver<EngineEvent>>,
) -> Option<EngineEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
