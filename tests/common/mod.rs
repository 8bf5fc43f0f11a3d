#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use trackrelay::{
    config::{MediaKind, TrackSource},
    error::{Error, ReadError, SessionErrorKind, SinkErrorKind},
    remote::{
        ConnectParams, Connector, Ingress, RemoteParticipant, RemoteRoom, RoomEvent,
        TrackPublication,
    },
    sink::{BufferSink, FlowReturn, SinkBin, SinkEventSender, SinkPads, SourceBin},
    track::{RemoteTrack, TrackCaps},
    transport::{RtcpReceiver, RtcpSender},
};
use webrtc::{
    rtcp::{
        self, payload_feedbacks::picture_loss_indication::PictureLossIndication,
        transport_feedbacks::transport_layer_nack::TransportLayerNack,
    },
    rtp,
};

pub type RtcpPacket = Box<dyn rtcp::packet::Packet + Send + Sync>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Lets spawned workers run. Under paused time this also advances the clock by `ms`.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub const H264_KEYFRAME: [u8; 4] = [0x1C, 0x85, 0x01, 0x02];
pub const H264_DELTA: [u8; 4] = [0x1C, 0x84, 0x01, 0x02];
pub const OPUS_FRAME: [u8; 3] = [0xFC, 0xFF, 0xFE];

pub fn rtp(ssrc: u32, sequence_number: u16, payload: &[u8]) -> rtp::packet::Packet {
    rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type: 96,
            sequence_number,
            timestamp: sequence_number as u32 * 3000,
            ssrc,
            ..Default::default()
        },
        payload: Bytes::copy_from_slice(payload),
    }
}

#[derive(Debug)]
pub struct MockTrack {
    id: String,
    ssrc: u32,
    mime_type: String,
    packets: AsyncMutex<mpsc::UnboundedReceiver<Result<rtp::packet::Packet, ReadError>>>,
    rtcp: AsyncMutex<mpsc::UnboundedReceiver<Vec<RtcpPacket>>>,
    rtcp_sender: Arc<RtcpSender>,
}

/// Test side of a [`MockTrack`].
#[derive(Debug)]
pub struct TrackHandle {
    pub ssrc: u32,
    pub packets: mpsc::UnboundedSender<Result<rtp::packet::Packet, ReadError>>,
    pub rtcp_in: mpsc::UnboundedSender<Vec<RtcpPacket>>,
    pub feedback: RtcpReceiver,
    pli_count: usize,
    nacks: Vec<TransportLayerNack>,
}

impl MockTrack {
    pub fn new(id: &str, mime_type: &str, ssrc: u32) -> (Arc<Self>, TrackHandle) {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (rtcp_tx, rtcp_rx) = mpsc::unbounded_channel();
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let track = Arc::new(Self {
            id: id.to_owned(),
            ssrc,
            mime_type: mime_type.to_owned(),
            packets: AsyncMutex::new(packet_rx),
            rtcp: AsyncMutex::new(rtcp_rx),
            rtcp_sender: Arc::new(feedback_tx),
        });
        let handle = TrackHandle {
            ssrc,
            packets: packet_tx,
            rtcp_in: rtcp_tx,
            feedback: feedback_rx,
            pli_count: 0,
            nacks: Vec::new(),
        };
        (track, handle)
    }
}

#[async_trait]
impl RemoteTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn kind(&self) -> MediaKind {
        if self.mime_type.starts_with("video") {
            MediaKind::Video
        } else {
            MediaKind::Audio
        }
    }

    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    fn payload_type(&self) -> u8 {
        96
    }

    fn clock_rate(&self) -> u32 {
        match self.kind() {
            MediaKind::Audio => 48000,
            MediaKind::Video => 90000,
        }
    }

    async fn read_rtp(&self, timeout: Duration) -> Result<rtp::packet::Packet, ReadError> {
        let mut packets = self.packets.lock().await;
        match tokio::time::timeout(timeout, packets.recv()).await {
            Ok(Some(res)) => res,
            Ok(None) => Err(ReadError::EndOfStream),
            Err(_) => Err(ReadError::Timeout),
        }
    }

    async fn read_rtcp(&self) -> Result<Vec<RtcpPacket>, ReadError> {
        match self.rtcp.lock().await.recv().await {
            Some(packets) => Ok(packets),
            None => Err(ReadError::EndOfStream),
        }
    }

    fn rtcp_sender(&self) -> Arc<RtcpSender> {
        self.rtcp_sender.clone()
    }
}

impl TrackHandle {
    pub fn send(&self, sequence_number: u16, payload: &[u8]) {
        let _ = self.packets.send(Ok(rtp(self.ssrc, sequence_number, payload)));
    }

    pub fn fail(&self, err: ReadError) {
        let _ = self.packets.send(Err(err));
    }

    fn collect_feedback(&mut self) {
        while let Ok(packet) = self.feedback.try_recv() {
            if packet
                .as_any()
                .downcast_ref::<PictureLossIndication>()
                .is_some()
            {
                self.pli_count += 1;
            } else if let Some(nack) = packet.as_any().downcast_ref::<TransportLayerNack>() {
                self.nacks.push(nack.clone());
            }
        }
    }

    /// PLIs the relay has sent so far.
    pub fn plis(&mut self) -> usize {
        self.collect_feedback();
        self.pli_count
    }

    /// NACKs the relay has sent so far.
    pub fn nacks(&mut self) -> Vec<TransportLayerNack> {
        self.collect_feedback();
        self.nacks.clone()
    }
}

#[derive(Debug)]
pub struct MockBufferSink {
    buffers: Mutex<Vec<Bytes>>,
    flow: FlowReturn,
}

impl MockBufferSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(Vec::new()),
            flow: FlowReturn::Ok,
        })
    }

    pub fn count(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn buffers(&self) -> Vec<Bytes> {
        self.buffers.lock().clone()
    }

    /// Sequence numbers of the RTP packets received so far.
    pub fn sequence_numbers(&self) -> Vec<u16> {
        self.buffers
            .lock()
            .iter()
            .map(|buffer| u16::from_be_bytes([buffer[2], buffer[3]]))
            .collect()
    }
}

impl BufferSink for MockBufferSink {
    fn push_buffer(&self, buffer: Bytes) -> FlowReturn {
        self.buffers.lock().push(buffer);
        self.flow
    }
}

#[derive(Debug)]
pub struct MockSinkBin {
    pub rtp: Arc<MockBufferSink>,
    pub rtcp: Arc<MockBufferSink>,
    caps: Mutex<Vec<String>>,
    events: Mutex<Option<SinkEventSender>>,
    builds: AtomicUsize,
    teardowns: AtomicUsize,
    fail: bool,
}

impl MockSinkBin {
    pub fn new() -> Arc<Self> {
        Self::with_failure(false)
    }

    pub fn failing() -> Arc<Self> {
        Self::with_failure(true)
    }

    fn with_failure(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            rtp: MockBufferSink::new(),
            rtcp: MockBufferSink::new(),
            caps: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            builds: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
            fail,
        })
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn caps(&self) -> Vec<String> {
        self.caps.lock().clone()
    }

    /// Event sender handed over by the latest build.
    pub fn events(&self) -> Option<SinkEventSender> {
        self.events.lock().clone()
    }
}

impl SinkBin for MockSinkBin {
    fn build(&self, caps: &TrackCaps, events: SinkEventSender) -> Result<SinkPads, Error> {
        if self.fail {
            return Err(Error::new_sink(
                "could not link depayloader".to_owned(),
                SinkErrorKind::BuildError,
            ));
        }
        self.caps.lock().push(caps.caps()?);
        *self.events.lock() = Some(events);
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(SinkPads {
            rtp: self.rtp.clone(),
            rtcp: self.rtcp.clone(),
        })
    }

    fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockSource(pub String);

impl SourceBin for MockSource {
    fn name(&self) -> String {
        self.0.clone()
    }
}

pub fn publication(sid: &str, kind: MediaKind, source: TrackSource) -> TrackPublication {
    TrackPublication {
        sid: sid.to_owned(),
        kind,
        source,
        muted: false,
    }
}

pub fn participant(identity: &str, publications: Vec<TrackPublication>) -> RemoteParticipant {
    RemoteParticipant {
        identity: identity.to_owned(),
        publications,
    }
}

#[derive(Debug)]
pub struct MockRoom {
    pub participants: Mutex<Vec<RemoteParticipant>>,
    calls: Mutex<Vec<(String, bool)>>,
    disconnected: AtomicBool,
}

impl MockRoom {
    pub fn new(participants: Vec<RemoteParticipant>) -> Arc<Self> {
        Arc::new(Self {
            participants: Mutex::new(participants),
            calls: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    /// Every `set_subscribed` call, in order.
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, track_sid: &str, subscribed: bool) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(sid, value)| sid == track_sid && *value == subscribed)
            .count()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteRoom for MockRoom {
    async fn remote_participants(&self) -> Vec<RemoteParticipant> {
        self.participants.lock().clone()
    }

    async fn set_subscribed(&self, track_sid: &str, subscribed: bool) -> Result<(), Error> {
        self.calls.lock().push((track_sid.to_owned(), subscribed));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockIngress {
    pub published: Mutex<Vec<bool>>,
    pub fail_with: Option<String>,
    disconnected: AtomicBool,
}

impl MockIngress {
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), Error> {
        match &self.fail_with {
            Some(message) => Err(Error::new_session(
                message.clone(),
                SessionErrorKind::ConnectionError,
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Ingress for MockIngress {
    async fn publish(
        &self,
        screen_share: bool,
        _audio: Option<Arc<dyn SourceBin>>,
        _video: Option<Arc<dyn SourceBin>>,
    ) -> Result<(), Error> {
        self.check()?;
        self.published.lock().push(screen_share);
        Ok(())
    }

    async fn unpublish(&self, _screen_share: bool) -> Result<(), Error> {
        self.check()
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`MockRoom`]s and keeps the sending side of their event channels.
#[derive(Default)]
pub struct MockConnector {
    pub participants: Vec<RemoteParticipant>,
    pub fail: bool,
    pub ingress_failure: Option<String>,
    pub rooms: Mutex<Vec<(Arc<MockRoom>, mpsc::UnboundedSender<RoomEvent>)>>,
    pub ingresses: Mutex<Vec<Arc<MockIngress>>>,
}

impl MockConnector {
    pub fn new(participants: Vec<RemoteParticipant>) -> Arc<Self> {
        Arc::new(Self {
            participants,
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn room(&self, index: usize) -> Arc<MockRoom> {
        self.rooms.lock()[index].0.clone()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn emit(&self, index: usize, event: RoomEvent) {
        let _ = self.rooms.lock()[index].1.send(event);
    }

    pub fn ingress(&self, index: usize) -> Arc<MockIngress> {
        self.ingresses.lock()[index].clone()
    }

    pub fn ingress_count(&self) -> usize {
        self.ingresses.lock().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect_room(
        &self,
        params: &ConnectParams,
        _identity: &str,
    ) -> Result<(Arc<dyn RemoteRoom>, mpsc::UnboundedReceiver<RoomEvent>), Error> {
        if self.fail {
            return Err(Error::new_session(
                format!("could not connect to {}", params.url),
                SessionErrorKind::ConnectionError,
            ));
        }
        let room = MockRoom::new(self.participants.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        self.rooms.lock().push((room.clone(), tx));
        Ok((room, rx))
    }

    async fn connect_ingress(
        &self,
        params: &ConnectParams,
        _publisher_name: &str,
        _identity: &str,
    ) -> Result<Arc<dyn Ingress>, Error> {
        if self.fail {
            return Err(Error::new_session(
                format!("could not connect to {}", params.url),
                SessionErrorKind::ConnectionError,
            ));
        }
        let ingress = Arc::new(MockIngress {
            fail_with: self.ingress_failure.clone(),
            ..Default::default()
        });
        self.ingresses.lock().push(ingress.clone());
        Ok(ingress)
    }
}

pub fn params(room: &str) -> ConnectParams {
    ConnectParams {
        url: "wss://media.example.com".to_owned(),
        api_key: "key".to_owned(),
        api_secret: "secret".to_owned(),
        room: room.to_owned(),
    }
}
