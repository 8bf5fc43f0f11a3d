use parking_lot::Mutex;

use crate::config::Codec;

/// Classification of one received buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapStatus {
    NotInGap,
    /// The buffer must be dropped.
    InGap,
    /// First keyframe after a gap. The buffer is delivered.
    EndGap,
}

/// Keyframe request the caller has to issue after [`GapDetector::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeRequest {
    None,
    /// Sent regardless of when the previous PLI went out.
    Forced,
    /// Subject to the PLI interval.
    RateLimited,
}

/// Whether `payload` starts a keyframe. Always `false` for codecs without a heuristic.
pub fn is_keyframe_start(payload: &[u8], codec: Codec) -> bool {
    match codec {
        Codec::H264 => {
            if payload.len() < 2 {
                return false;
            }
            let identifier = payload[0];
            let nal_header = payload[1];
            // FU-A carrying the start of an IDR slice
            let fragmented = identifier & 0x1F == 0x1C && nal_header & 0x9F == 0x85;
            let idr = identifier & 0x1F == 0x05 && nal_header & 0xF0 == 0xB0;
            fragmented || idr
        }
        Codec::Vp8 => {
            if payload.len() < 5 {
                return false;
            }
            let descriptor = payload[0];
            let header = payload[4];
            descriptor & 0x10 != 0 && header & 0x01 == 0
        }
        Codec::Opus | Codec::Vp9 => false,
    }
}

/// Tracks whether a relay is dropping buffers while it waits for the next keyframe.
#[derive(Debug)]
pub struct GapDetector {
    codec: Codec,
    dropping: Mutex<bool>,
}

impl GapDetector {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            dropping: Mutex::new(false),
        }
    }

    /// Only H264 and VP8 streams can detect the end of a gap.
    pub fn is_enabled(&self) -> bool {
        matches!(self.codec, Codec::H264 | Codec::Vp8)
    }

    /// Starts dropping until the next keyframe. Returns `true` if this call started the gap.
    pub fn enter(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut dropping = self.dropping.lock();
        if *dropping {
            return false;
        }
        *dropping = true;
        true
    }

    pub fn is_dropping(&self) -> bool {
        *self.dropping.lock()
    }

    pub fn verify(&self, payload: &[u8], discont: bool) -> (GapStatus, KeyframeRequest) {
        if !self.is_enabled() {
            return (GapStatus::NotInGap, KeyframeRequest::None);
        }
        let keyframe = is_keyframe_start(payload, self.codec);

        let mut dropping = self.dropping.lock();
        match (*dropping, keyframe) {
            (true, true) => {
                *dropping = false;
                (GapStatus::EndGap, KeyframeRequest::None)
            }
            (true, false) => (GapStatus::InGap, KeyframeRequest::RateLimited),
            (false, false) if discont => {
                *dropping = true;
                (GapStatus::InGap, KeyframeRequest::Forced)
            }
            _ => (GapStatus::NotInGap, KeyframeRequest::None),
        }
    }
}
