//! Shared test rig: scripted media engine and store helpers
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use callsign::{
    CallConfig, CallSession, CallStatus, CameraFacing, DescriptionKind, EngineEvent, Error,
    IceCandidate, MediaEngine, MediaEngineFactory, MemoryStore, MemoryStoreHandle, PeerId, Result,
    SessionContext, SessionDescription, TrackId,
};

/// How long tests wait for an expected transition before giving up
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One simulated peer: a store connection plus its session context
pub fn peer(store: &MemoryStore, id: &str) -> (SessionContext, MemoryStoreHandle) {
    let handle = store.handle();
    let ctx = SessionContext::new(Arc::new(handle.clone()), PeerId::new(id));
    (ctx, handle)
}

/// Wait until the session reports `want`, panicking on timeout
pub async fn wait_for_status(session: &CallSession, want: CallStatus) {
    let mut rx = session.watch_status();
    timeout(WAIT, async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            if rx.changed().await.is_err() {
                panic!("status channel closed before reaching {:?}", want);
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for status {:?}", want));
}

/// Poll until `condition` holds, panicking on timeout
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        loop {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {}", what));
}

/// A sample connectivity candidate
pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        sdp_m_line_index: 0,
        sdp_mid: "0".to_string(),
        candidate: format!("candidate:{} 1 udp 2122260223 192.0.2.{} 54400 typ host", n, n),
    }
}

/// Scripted behavior for fake engines produced by one factory
#[derive(Clone)]
pub struct EngineScript {
    /// Whether a back camera device exists
    pub has_back_camera: bool,
    /// Fail video capture setup (camera denied/unavailable)
    pub fail_video_capture: bool,
    /// Fail offer creation
    pub fail_create_offer: bool,
    /// Fail applying any remote description
    pub fail_apply_remote: bool,
    /// Candidates "discovered" right after a local description is applied
    pub candidates_on_local_description: Vec<IceCandidate>,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            has_back_camera: true,
            fail_video_capture: false,
            fail_create_offer: false,
            fail_apply_remote: false,
            candidates_on_local_description: Vec::new(),
        }
    }
}

/// Everything a fake engine did, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    AudioTrackCreated(TrackId),
    VideoTrackCreated { track: TrackId, facing: CameraFacing },
    OutgoingAudioSet { track: TrackId, previous: Option<TrackId> },
    OutgoingVideoSet { track: TrackId, previous: Option<TrackId> },
    TrackDisposed(TrackId),
    OfferCreated,
    AnswerCreated,
    LocalDescriptionApplied(DescriptionKind),
    RemoteDescriptionApplied(DescriptionKind),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy)]
struct TrackInfo {
    kind: TrackKind,
    facing: Option<CameraFacing>,
    disposed: bool,
}

struct EngineState {
    label: String,
    script: EngineScript,
    ops: Mutex<Vec<EngineOp>>,
    tracks: Mutex<HashMap<TrackId, TrackInfo>>,
    outgoing_audio: Mutex<Option<TrackId>>,
    outgoing_video: Mutex<Option<TrackId>>,
    local_descriptions: Mutex<Vec<SessionDescription>>,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    next_track: AtomicU64,
    in_flight_creates: AtomicU32,
    max_concurrent_creates: AtomicU32,
    closed: AtomicBool,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineState {
    fn record(&self, op: EngineOp) {
        self.ops.lock().push(op);
    }

    fn alloc_track(&self, kind: TrackKind, facing: Option<CameraFacing>) -> TrackId {
        let id = TrackId::new(self.next_track.fetch_add(1, Ordering::SeqCst));
        self.tracks.lock().insert(
            id,
            TrackInfo {
                kind,
                facing,
                disposed: false,
            },
        );
        id
    }

    fn enter_create(&self) {
        let now = self.in_flight_creates.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_creates.fetch_max(now, Ordering::SeqCst);
    }

    fn exit_create(&self) {
        self.in_flight_creates.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Test-side view of one engine instance
#[derive(Clone)]
pub struct EngineControl {
    state: Arc<EngineState>,
}

impl EngineControl {
    /// Inject a spontaneous engine event (remote stream attach/detach, ...)
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.state.events_tx.send(event);
    }

    pub fn ops(&self) -> Vec<EngineOp> {
        self.state.ops.lock().clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.state.local_descriptions.lock().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.state.remote_descriptions.lock().clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.remote_candidates.lock().clone()
    }

    pub fn outgoing_audio(&self) -> Option<TrackId> {
        *self.state.outgoing_audio.lock()
    }

    pub fn outgoing_video(&self) -> Option<TrackId> {
        *self.state.outgoing_video.lock()
    }

    /// Live (not disposed) video tracks
    pub fn live_video_tracks(&self) -> usize {
        self.state
            .tracks
            .lock()
            .values()
            .filter(|t| t.kind == TrackKind::Video && !t.disposed)
            .count()
    }

    /// Live (not disposed) audio tracks
    pub fn live_audio_tracks(&self) -> usize {
        self.state
            .tracks
            .lock()
            .values()
            .filter(|t| t.kind == TrackKind::Audio && !t.disposed)
            .count()
    }

    pub fn track_facing(&self, track: TrackId) -> Option<CameraFacing> {
        self.state.tracks.lock().get(&track).and_then(|t| t.facing)
    }

    /// Highest number of description creations ever in flight at once
    pub fn max_concurrent_creates(&self) -> u32 {
        self.state.max_concurrent_creates.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// How many times the engine was closed (must end up exactly 1)
    pub fn close_count(&self) -> usize {
        self.state
            .ops
            .lock()
            .iter()
            .filter(|op| matches!(op, EngineOp::Closed))
            .count()
    }
}

/// Fake engine driven entirely by the session worker plus the test script
pub struct FakeMediaEngine {
    state: Arc<EngineState>,
    events_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
}

impl FakeMediaEngine {
    fn emit_scripted_candidates(&self) {
        for candidate in &self.state.script.candidates_on_local_description {
            let _ = self
                .state
                .events_tx
                .send(EngineEvent::CandidateDiscovered(candidate.clone()));
        }
    }
}

#[async_trait]
impl MediaEngine for FakeMediaEngine {
    async fn create_offer(&mut self) -> Result<String> {
        if self.state.script.fail_create_offer {
            return Err(Error::SdpError("scripted offer failure".to_string()));
        }
        self.state.enter_create();
        sleep(Duration::from_millis(5)).await;
        self.state.exit_create();
        self.state.record(EngineOp::OfferCreated);
        Ok(format!("v=0 offer from {}", self.state.label))
    }

    async fn create_answer(&mut self) -> Result<String> {
        let has_remote_offer = self
            .state
            .remote_descriptions
            .lock()
            .iter()
            .any(|d| d.kind == DescriptionKind::Offer);
        if !has_remote_offer {
            return Err(Error::SdpError(
                "create_answer before remote offer".to_string(),
            ));
        }
        self.state.enter_create();
        sleep(Duration::from_millis(5)).await;
        self.state.exit_create();
        self.state.record(EngineOp::AnswerCreated);
        Ok(format!("v=0 answer from {}", self.state.label))
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()> {
        self.state
            .record(EngineOp::LocalDescriptionApplied(description.kind));
        self.state.local_descriptions.lock().push(description);
        // Gathering starts once a local description is in place.
        self.emit_scripted_candidates();
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        if self.state.script.fail_apply_remote {
            return Err(Error::SdpError("scripted apply failure".to_string()));
        }
        self.state
            .record(EngineOp::RemoteDescriptionApplied(description.kind));
        self.state.remote_descriptions.lock().push(description);
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.state.remote_candidates.lock().push(candidate);
        Ok(())
    }

    async fn create_audio_track(&mut self) -> Result<TrackId> {
        let track = self.state.alloc_track(TrackKind::Audio, None);
        self.state.record(EngineOp::AudioTrackCreated(track));
        Ok(track)
    }

    async fn create_video_track(&mut self, facing: CameraFacing) -> Result<TrackId> {
        if self.state.script.fail_video_capture {
            return Err(Error::MediaError("camera unavailable".to_string()));
        }
        // No back device: fall back to the front camera instead of failing.
        let actual = if facing == CameraFacing::Back && !self.state.script.has_back_camera {
            CameraFacing::Front
        } else {
            facing
        };
        let track = self.state.alloc_track(TrackKind::Video, Some(actual));
        self.state.record(EngineOp::VideoTrackCreated {
            track,
            facing: actual,
        });
        Ok(track)
    }

    async fn set_outgoing_audio(&mut self, track: TrackId) -> Result<Option<TrackId>> {
        let usable = self
            .state
            .tracks
            .lock()
            .get(&track)
            .map(|t| t.kind == TrackKind::Audio && !t.disposed)
            .unwrap_or(false);
        if !usable {
            return Err(Error::MediaError(format!("unusable audio track {}", track)));
        }
        let previous = self.state.outgoing_audio.lock().replace(track);
        self.state
            .record(EngineOp::OutgoingAudioSet { track, previous });
        Ok(previous)
    }

    async fn set_outgoing_video(&mut self, track: TrackId) -> Result<Option<TrackId>> {
        let usable = self
            .state
            .tracks
            .lock()
            .get(&track)
            .map(|t| t.kind == TrackKind::Video && !t.disposed)
            .unwrap_or(false);
        if !usable {
            return Err(Error::MediaError(format!("unusable video track {}", track)));
        }
        let previous = self.state.outgoing_video.lock().replace(track);
        self.state
            .record(EngineOp::OutgoingVideoSet { track, previous });
        Ok(previous)
    }

    async fn dispose_track(&mut self, track: TrackId) -> Result<()> {
        let mut tracks = self.state.tracks.lock();
        let info = tracks
            .get_mut(&track)
            .ok_or_else(|| Error::MediaError(format!("unknown track {}", track)))?;
        info.disposed = true;
        drop(tracks);
        if *self.state.outgoing_video.lock() == Some(track) {
            *self.state.outgoing_video.lock() = None;
        }
        if *self.state.outgoing_audio.lock() == Some(track) {
            *self.state.outgoing_audio.lock() = None;
        }
        self.state.record(EngineOp::TrackDisposed(track));
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.record(EngineOp::Closed);
        Ok(())
    }
}

/// Factory producing scripted fake engines; keeps a control per engine
pub struct FakeEngineFactory {
    label_prefix: String,
    script: EngineScript,
    engines: Mutex<Vec<EngineControl>>,
}

impl FakeEngineFactory {
    pub fn new(label_prefix: &str) -> Arc<Self> {
        Self::with_script(label_prefix, EngineScript::default())
    }

    pub fn with_script(label_prefix: &str, script: EngineScript) -> Arc<Self> {
        Arc::new(Self {
            label_prefix: label_prefix.to_string(),
            script,
            engines: Mutex::new(Vec::new()),
        })
    }

    /// Control for the `index`-th engine, waiting for it to be created
    pub async fn engine(&self, index: usize) -> EngineControl {
        timeout(WAIT, async {
            loop {
                if let Some(control) = self.engines.lock().get(index).cloned() {
                    return control;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("engine {} was never created", index))
    }
}

#[async_trait]
impl MediaEngineFactory for FakeEngineFactory {
    async fn create(&self, _config: &CallConfig) -> Result<Box<dyn MediaEngine>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let index = self.engines.lock().len();
        let state = Arc::new(EngineState {
            label: format!("{}-{}", self.label_prefix, index),
            script: self.script.clone(),
            ops: Mutex::new(Vec::new()),
            tracks: Mutex::new(HashMap::new()),
            outgoing_audio: Mutex::new(None),
            outgoing_video: Mutex::new(None),
            local_descriptions: Mutex::new(Vec::new()),
            remote_descriptions: Mutex::new(Vec::new()),
            remote_candidates: Mutex::new(Vec::new()),
            next_track: AtomicU64::new(1),
            in_flight_creates: AtomicU32::new(0),
            max_concurrent_creates: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            events_tx,
        });
        self.engines.lock().push(EngineControl {
            state: Arc::clone(&state),
        });
        Ok(Box::new(FakeMediaEngine {
            state,
            events_rx: Some(events_rx),
        }))
    }
}
