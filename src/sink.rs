use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use strum_macros::Display;
use tokio::sync::mpsc;

use crate::{error::Error, track::TrackCaps};

/// Result of pushing one buffer into a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FlowReturn {
    Ok,
    Flushing,
    Eos,
    NotLinked,
    Error,
}

/// Entry point of a downstream pipeline for one data path.
pub trait BufferSink: fmt::Debug + Send + Sync {
    fn push_buffer(&self, buffer: Bytes) -> FlowReturn;
}

/// Requests a downstream pipeline raises against the relay feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    ForceKeyUnit,
    RetransmissionRequest(u16),
    PacketLost,
}

/// Handed to a [`SinkBin`] when it is built. Events are discarded until the
/// subscriber is ready for the kind.
#[derive(Debug, Clone)]
pub struct SinkEventSender {
    ready: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<SinkEvent>,
}

impl SinkEventSender {
    pub(crate) fn new(ready: Arc<AtomicBool>, sender: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { ready, sender }
    }

    /// Returns `false` if the event was not delivered.
    pub fn send(&self, event: SinkEvent) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            tracing::debug!("Sink event {:?} is dropped, sink is not ready", event);
            return false;
        }
        self.sender.send(event).is_ok()
    }
}

/// RTP and RTCP inputs of a built sink.
#[derive(Debug, Clone)]
pub struct SinkPads {
    pub rtp: Arc<dyn BufferSink>,
    pub rtcp: Arc<dyn BufferSink>,
}

/// The media-processing bin a subscriber supplies for one kind.
pub trait SinkBin: fmt::Debug + Send + Sync {
    /// Builds the receiving elements for `caps`. Called at most once per bound relay.
    fn build(&self, caps: &TrackCaps, events: SinkEventSender) -> Result<SinkPads, Error>;

    /// Releases what [`SinkBin::build`] created.
    fn teardown(&self) {}
}

/// Media a publisher hands to an ingress.
pub trait SourceBin: fmt::Debug + Send + Sync {
    fn name(&self) -> String;
}
