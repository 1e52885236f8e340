//! Configuration types for call sessions

use serde::{Deserialize, Serialize};

/// Main configuration for a call session
///
/// Passed immutably to the media engine factory at session start; the
/// session never mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Local capture and negotiation preferences
    pub media: MediaConfig,

    /// Connectivity gathering policy and servers
    pub connectivity: ConnectivityConfig,
}

/// Media capture and negotiation preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Capture width in pixels (default: 1280)
    pub video_width: u32,

    /// Capture height in pixels (default: 720)
    pub video_height: u32,

    /// Capture framerate in fps (default: 30)
    pub video_fps: u32,

    /// Camera used for the initial video track (default: Front)
    pub initial_camera: CameraFacing,

    /// Audio processing toggles applied to the capture source
    pub audio: AudioProcessing,

    /// Ask the counterpart to send audio (default: true)
    pub offer_to_receive_audio: bool,

    /// Ask the counterpart to send video (default: true)
    pub offer_to_receive_video: bool,
}

/// Audio capture processing options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioProcessing {
    /// Echo cancellation (default: true)
    pub echo_cancellation: bool,

    /// Automatic gain control (default: false)
    pub auto_gain_control: bool,

    /// High-pass filter (default: false)
    pub high_pass_filter: bool,

    /// Noise suppression (default: true)
    pub noise_suppression: bool,
}

/// Connectivity candidate gathering policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// Candidate gathering policy (default: Continual)
    pub gathering: GatheringPolicy,

    /// Allow TCP candidates (default: false; only useful against ICE-TCP servers)
    pub tcp_candidates: bool,

    /// Require encrypted media transport (default: true)
    pub require_encryption: bool,
}

/// Which camera the video track captures from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    /// Front-facing camera
    Front,
    /// Back-facing camera
    Back,
}

impl CameraFacing {
    /// The opposite camera
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }
}

/// Candidate gathering policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatheringPolicy {
    /// Gather once at session start
    Once,
    /// Keep gathering for the lifetime of the connection (default)
    Continual,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            media: MediaConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_width: 1280,
            video_height: 720,
            video_fps: 30,
            initial_camera: CameraFacing::Front,
            audio: AudioProcessing::default(),
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
        }
    }
}

impl Default for AudioProcessing {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            auto_gain_control: false,
            high_pass_filter: false,
            noise_suppression: true,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gathering: GatheringPolicy::Continual,
            tcp_candidates: false,
            require_encryption: true,
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - capture dimensions or framerate are zero
    /// - `stun_servers` is empty
    /// - a server URL has no `stun:`/`turn:` scheme
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.media.video_width == 0 || self.media.video_height == 0 {
            return Err(Error::InvalidConfig(format!(
                "capture dimensions must be non-zero, got {}x{}",
                self.media.video_width, self.media.video_height
            )));
        }

        if self.media.video_fps == 0 {
            return Err(Error::InvalidConfig(
                "capture framerate must be non-zero".to_string(),
            ));
        }

        if self.connectivity.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        for url in &self.connectivity.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("turn:") {
                return Err(Error::InvalidConfig(format!(
                    "server URL must use stun: or turn: scheme, got '{}'",
                    url
                )));
            }
        }

        Ok(())
    }
}
