use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::Error;

/// Environment variable that enables the per-track packet log.
pub const PACKET_LOG_DIR_ENV: &str = "TRACKRELAY_PACKET_LOG_DIR";

/// Timing and sizing parameters shared by every [`crate::relay::PacketRelay`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bound on a single read from the remote track.
    pub read_timeout_ms: u64,
    /// Period of the idle timer while the track is muted.
    pub muted_tick_ms: u64,
    /// Grace period given to in-flight packets after a non-forced drain.
    pub drain_timeout_ms: u64,
    /// Minimum interval between two rate-limited keyframe requests.
    pub pli_interval_ms: u64,
    /// Maximum outstanding retransmission requests, also the largest NACK batch.
    pub retransmission_capacity: usize,
    /// Time spent collecting a burst of losses before sending a NACK.
    pub retransmission_accumulate_ms: u64,
    /// Directory for `<track_id>.pts.log` files. Disabled when `None`.
    pub packet_log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 500,
            muted_tick_ms: 500,
            drain_timeout_ms: 4000,
            pli_interval_ms: 1000,
            retransmission_capacity: 20,
            retransmission_accumulate_ms: 2,
            packet_log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Defaults, with the packet log enabled when [`PACKET_LOG_DIR_ENV`] is set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(PACKET_LOG_DIR_ENV) {
            if !dir.is_empty() {
                config.packet_log_dir = Some(PathBuf::from(dir));
            }
        }
        config
    }

    /// Parses a JSON document; missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn muted_tick(&self) -> Duration {
        Duration::from_millis(self.muted_tick_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn pli_interval(&self) -> Duration {
        Duration::from_millis(self.pli_interval_ms)
    }

    pub fn retransmission_accumulate(&self) -> Duration {
        Duration::from_millis(self.retransmission_accumulate_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub(crate) fn from_mime_type(mime_type: &str) -> Self {
        if mime_type.to_lowercase().starts_with("video") {
            MediaKind::Video
        } else {
            MediaKind::Audio
        }
    }
}

/// Where a published track comes from on the remote participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
    Unknown,
}

impl TrackSource {
    pub fn is_screen_share(&self) -> bool {
        matches!(self, TrackSource::ScreenShare | TrackSource::ScreenShareAudio)
    }

    /// Camera and microphone; `Unknown` belongs to neither group.
    pub fn is_main(&self) -> bool {
        matches!(self, TrackSource::Camera | TrackSource::Microphone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum Codec {
    #[strum(serialize = "OPUS")]
    Opus,
    #[strum(serialize = "H264")]
    H264,
    #[strum(serialize = "VP8")]
    Vp8,
    #[strum(serialize = "VP9")]
    Vp9,
}

impl Codec {
    /// Accepts mime types such as `video/H264` or `audio/opus`, case-insensitively.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type.to_lowercase().as_str() {
            "audio/opus" => Some(Codec::Opus),
            "video/h264" => Some(Codec::H264),
            "video/vp8" => Some(Codec::Vp8),
            "video/vp9" => Some(Codec::Vp9),
            _ => None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Codec::Opus => MediaKind::Audio,
            Codec::H264 | Codec::Vp8 | Codec::Vp9 => MediaKind::Video,
        }
    }

    /// Whether the sender can be asked for a keyframe (PLI) for this codec.
    pub fn supports_keyframe_request(&self) -> bool {
        self.kind() == MediaKind::Video
    }
}
