//! Media engine interface
//!
//! The media engine captures and transports the actual audio/video; this
//! crate only orchestrates it. Engines are produced once per call by a
//! [`MediaEngineFactory`] from an immutable [`CallConfig`], owned
//! exclusively by that call's worker, and disposed exactly once at
//! termination.
//!
//! The engine is not safe for concurrent entry: every method takes
//! `&mut self` and the session worker serializes all calls. Spontaneous
//! engine activity (discovered candidates, remote stream changes) flows
//! back through the event channel returned by
//! [`MediaEngine::take_events`].

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::config::{CallConfig, CameraFacing};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;

/// Handle to a local media track owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    /// Wrap a raw engine-assigned track id
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Spontaneous engine activity, delivered on engine-managed tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A local connectivity candidate was discovered and should be relayed
    /// to the counterpart immediately
    CandidateDiscovered(IceCandidate),

    /// The remote media stream is flowing; the call is live
    RemoteStreamAttached,

    /// The remote media stream went away
    RemoteStreamDetached,
}

/// A two-party media engine
///
/// Description operations may fail (`SdpError`); the session surfaces that
/// as a failed call. Candidates handed over before the description exchange
/// completes must be buffered by the engine, not discarded.
#[async_trait]
pub trait MediaEngine: Send {
    /// Produce the originating session description
    async fn create_offer(&mut self) -> Result<String>;

    /// Produce the answering session description
    ///
    /// Valid only after the remote offer was applied.
    async fn create_answer(&mut self) -> Result<String>;

    /// Apply a locally produced description
    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()>;

    /// Apply the counterpart's description
    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()>;

    /// Feed one of the counterpart's connectivity candidates
    async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()>;

    /// Create a local audio capture track
    async fn create_audio_track(&mut self) -> Result<TrackId>;

    /// Create a local video capture track from the given camera
    ///
    /// When the requested camera does not exist the engine falls back to
    /// whichever device is available rather than failing the call.
    async fn create_video_track(&mut self, facing: CameraFacing) -> Result<TrackId>;

    /// Install a track as the outgoing audio, returning the previous one
    ///
    /// Replacement happens in place, without renegotiating the session
    /// description.
    async fn set_outgoing_audio(&mut self, track: TrackId) -> Result<Option<TrackId>>;

    /// Install a track as the outgoing video, returning the previous one
    ///
    /// Replacement happens in place, without renegotiating the session
    /// description.
    async fn set_outgoing_video(&mut self, track: TrackId) -> Result<Option<TrackId>>;

    /// Release a track's capture resources
    async fn dispose_track(&mut self, track: TrackId) -> Result<()>;

    /// Take the engine event stream
    ///
    /// There is exactly one consumer; subsequent calls return `None`.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;

    /// Stop transport, release all remaining tracks and the render context
    ///
    /// Called exactly once, at session termination.
    async fn close(&mut self) -> Result<()>;
}

/// Factory producing one engine per call from an immutable configuration
#[async_trait]
pub trait MediaEngineFactory: Send + Sync + 'static {
    /// Build an engine configured for gathering policy, security
    /// requirements and capture preferences
    ///
    /// Camera/microphone acquisition failures surface here, before any
    /// signaling traffic happens.
    async fn create(&self, config: &CallConfig) -> Result<Box<dyn MediaEngine>>;
}
