use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    config::MediaKind,
    error::Error,
    relay::PacketRelay,
    sink::{BufferSink, FlowReturn, SinkBin, SinkEventSender, SinkPads},
};

#[derive(Debug)]
struct KindSlot {
    bin: Option<Arc<dyn SinkBin>>,
    pads: Mutex<Option<SinkPads>>,
    ready: Arc<AtomicBool>,
}

impl KindSlot {
    fn new(bin: Option<Arc<dyn SinkBin>>) -> Self {
        Self {
            bin,
            pads: Mutex::new(None),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    fn pad(&self, rtcp: bool) -> Option<Arc<dyn BufferSink>> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let pads = self.pads.lock();
        let pads = pads.as_ref()?;
        if rtcp {
            Some(pads.rtcp.clone())
        } else {
            Some(pads.rtp.clone())
        }
    }

    fn unbind(&self) -> bool {
        self.ready.store(false, Ordering::Release);
        let pads = self.pads.lock().take();
        match (pads, &self.bin) {
            (Some(_), Some(bin)) => {
                bin.teardown();
                true
            }
            _ => false,
        }
    }
}

/// One downstream consumer of a subscription: an optional sink per media kind.
#[derive(Debug)]
pub struct Subscriber {
    pub id: String,
    audio: KindSlot,
    video: KindSlot,
}

impl Subscriber {
    pub fn new(audio_bin: Option<Arc<dyn SinkBin>>, video_bin: Option<Arc<dyn SinkBin>>) -> Arc<Self> {
        let id = Uuid::new_v4().to_string();
        tracing::debug!(
            "Subscriber id={} is created, audio={} video={}",
            id,
            audio_bin.is_some(),
            video_bin.is_some()
        );
        Arc::new(Self {
            id,
            audio: KindSlot::new(audio_bin),
            video: KindSlot::new(video_bin),
        })
    }

    fn slot(&self, kind: MediaKind) -> &KindSlot {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    /// Builds this subscriber's sink for the relay's kind and marks it ready.
    /// Returns `Ok(false)` when there is no sink for the kind or it is already bound.
    pub fn bind(&self, relay: &PacketRelay) -> Result<bool, Error> {
        let slot = self.slot(relay.kind());
        let Some(bin) = &slot.bin else {
            return Ok(false);
        };

        let mut pads = slot.pads.lock();
        if pads.is_some() {
            return Ok(false);
        }
        let events = SinkEventSender::new(slot.ready.clone(), relay.event_sender());
        *pads = Some(bin.build(relay.caps(), events)?);
        slot.ready.store(true, Ordering::Release);

        tracing::debug!(
            "Subscriber id={} is bound to {} track_id={}",
            self.id,
            relay.kind(),
            relay.track_id
        );
        Ok(true)
    }

    /// Releases the sink of `kind` so that a later relay binds afresh.
    pub fn unbind(&self, kind: MediaKind) {
        if self.slot(kind).unbind() {
            tracing::debug!("Subscriber id={} is unbound from {}", self.id, kind);
        }
    }

    pub fn is_ready(&self, kind: MediaKind) -> bool {
        self.slot(kind).ready.load(Ordering::Acquire)
    }

    pub fn has_sink(&self, kind: MediaKind) -> bool {
        self.slot(kind).bin.is_some()
    }

    /// `None` if the subscriber is not ready for `kind`.
    pub fn push_rtp(&self, kind: MediaKind, buffer: Bytes) -> Option<FlowReturn> {
        let pad = self.slot(kind).pad(false)?;
        Some(pad.push_buffer(buffer))
    }

    pub fn push_rtcp(&self, kind: MediaKind, buffer: Bytes) -> Option<FlowReturn> {
        let pad = self.slot(kind).pad(true)?;
        Some(pad.push_buffer(buffer))
    }

    pub(crate) fn destroy(&self) {
        tracing::debug!("Subscriber id={} is destroyed", self.id);
        self.audio.unbind();
        self.video.unbind();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        tracing::debug!("Subscriber id={} is dropped", self.id);
    }
}
