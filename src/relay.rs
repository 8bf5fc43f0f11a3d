use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use enclose::enc;
use parking_lot::Mutex;
use strum_macros::Display;
use tokio::{
    sync::mpsc,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use webrtc::{
    rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication, rtp,
};
use webrtc_util::marshal::Marshal;

use crate::{
    config::{Codec, MediaKind, RelayConfig},
    error::{Error, ReadError, RelayErrorKind},
    fanout::Fanout,
    fuse::Fuse,
    gap::{GapDetector, GapStatus, KeyframeRequest},
    retransmission::RetransmissionScheduler,
    sink::SinkEvent,
    track::{RemoteTrack, TrackCaps},
    transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RelayState {
    Playing,
    Unmuting,
    Muted,
}

enum ReadAction {
    Continue,
    Mute,
    End,
}

/// Pumps packets of one remote track into the subscribers of a [`Fanout`].
#[derive(Debug)]
pub struct PacketRelay {
    /// The ID is the same as the remote track id.
    pub track_id: String,
    pub ssrc: u32,
    kind: MediaKind,
    codec: Codec,
    caps: TrackCaps,
    config: RelayConfig,
    track: Arc<dyn RemoteTrack>,
    fanout: Arc<Fanout>,
    rtcp_sender: Arc<transport::RtcpSender>,
    state: Mutex<RelayState>,
    muted: AtomicBool,
    last_pli: Mutex<Option<Instant>>,
    gap: GapDetector,
    retransmission: RetransmissionScheduler,
    event_sender: mpsc::UnboundedSender<SinkEvent>,
    draining: Fuse,
    end_stream: Fuse,
    finished: Fuse,
    packet_log: Mutex<Option<PacketLog>>,
}

impl PacketRelay {
    /// Creates the relay and spawns its workers. The relay starts in a gap, so
    /// nothing is forwarded before the first keyframe on codecs that can detect one.
    pub fn start(
        track: Arc<dyn RemoteTrack>,
        fanout: Arc<Fanout>,
        config: RelayConfig,
    ) -> Result<Arc<Self>, Error> {
        let mime_type = track.mime_type().to_lowercase();
        let codec = Codec::from_mime_type(&mime_type).ok_or_else(|| {
            Error::new_relay(
                format!("{} is not yet supported", mime_type),
                RelayErrorKind::UnsupportedCodecError,
            )
        })?;
        let kind = track.kind();
        if codec.kind() != kind {
            return Err(Error::new_relay(
                format!("{} cannot be relayed as a {} track", mime_type, kind),
                RelayErrorKind::InvalidTrackKindError,
            ));
        }

        let track_id = track.id();
        let ssrc = track.ssrc();
        let caps = TrackCaps {
            track_id: track_id.clone(),
            kind,
            codec,
            payload_type: track.payload_type(),
            clock_rate: track.clock_rate(),
        };
        let packet_log = PacketLog::open(&config, &track_id);
        let (retransmission, nack_receiver) =
            RetransmissionScheduler::new(config.retransmission_capacity);
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let rtcp_sender = track.rtcp_sender();

        let relay = Arc::new(Self {
            track_id: track_id.clone(),
            ssrc,
            kind,
            codec,
            caps,
            config: config.clone(),
            track,
            fanout,
            rtcp_sender: rtcp_sender.clone(),
            state: Mutex::new(RelayState::Playing),
            muted: AtomicBool::new(false),
            last_pli: Mutex::new(None),
            gap: GapDetector::new(codec),
            retransmission,
            event_sender,
            draining: Fuse::new(),
            end_stream: Fuse::new(),
            finished: Fuse::new(),
            packet_log: Mutex::new(packet_log),
        });

        tracing::debug!(
            "Relay track_id={} ssrc={} is created, kind={} codec={}",
            track_id,
            ssrc,
            kind,
            codec
        );

        relay.restart_stream();

        tokio::spawn(enc!((relay) async move {
            relay.run().await;
        }));
        tokio::spawn(RetransmissionScheduler::run(
            track_id,
            ssrc,
            nack_receiver,
            rtcp_sender,
            config.retransmission_capacity,
            config.retransmission_accumulate(),
            relay.end_stream.clone(),
        ));
        tokio::spawn(enc!((relay) async move {
            relay.sink_event_loop(event_receiver).await;
        }));
        tokio::spawn(enc!((relay) async move {
            relay.rtcp_event_loop().await;
        }));

        Ok(relay)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn caps(&self) -> &TrackCaps {
        &self.caps
    }

    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn is_in_gap(&self) -> bool {
        self.gap.is_dropping()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.is_broken()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_broken()
    }

    /// Resolves once every packet has been pushed and the pump has exited.
    pub async fn wait_finished(&self) {
        self.finished.broken().await
    }

    pub(crate) fn event_sender(&self) -> mpsc::UnboundedSender<SinkEvent> {
        self.event_sender.clone()
    }

    /// Stops the relay. Only the first call has an effect. Without `force`, an
    /// unmuted relay keeps forwarding for the drain timeout before it ends.
    pub fn drain(&self, force: bool) {
        if !self.draining.break_once() {
            return;
        }
        tracing::debug!(
            "Relay track_id={} is draining, force={}",
            self.track_id,
            force
        );

        if force || self.is_muted() {
            self.end();
            return;
        }

        let end_stream = self.end_stream.clone();
        let timeout = self.config.drain_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = end_stream.broken() => {}
                _ = tokio::time::sleep(timeout) => {
                    end_stream.break_once();
                }
            }
        });
    }

    /// Ends the relay immediately.
    pub fn end(&self) {
        if self.end_stream.break_once() {
            tracing::debug!("Relay track_id={} end of stream", self.track_id);
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
        if muted {
            tracing::debug!("Relay track_id={} is muted", self.track_id);
        } else {
            tracing::debug!("Relay track_id={} is unmuted", self.track_id);
            self.restart_stream();
        }
    }

    /// The decoder downstream starts over: wait for a keyframe where the codec
    /// lets us detect one, and ask for one regardless.
    fn restart_stream(&self) {
        if self.gap.enter() {
            tracing::debug!(
                "Relay track_id={} entered a gap, dropping until keyframe",
                self.track_id
            );
        }
        self.force_send_pli();
    }

    /// Drops everything until the next keyframe. The first entry sends a PLI unconditionally.
    pub fn enter_gap(&self) {
        if self.gap.enter() {
            tracing::debug!(
                "Relay track_id={} entered a gap, dropping until keyframe",
                self.track_id
            );
            self.force_send_pli();
        }
    }

    /// Sends a PLI unless one was sent within the PLI interval.
    pub fn send_pli(&self) {
        if !self.codec.supports_keyframe_request() {
            return;
        }
        let now = Instant::now();
        let mut last_pli = self.last_pli.lock();
        if let Some(last) = *last_pli {
            if now.duration_since(last) < self.config.pli_interval() {
                return;
            }
        }
        *last_pli = Some(now);
        drop(last_pli);
        self.write_pli();
    }

    pub fn force_send_pli(&self) {
        if !self.codec.supports_keyframe_request() {
            return;
        }
        *self.last_pli.lock() = Some(Instant::now());
        self.write_pli();
    }

    fn write_pli(&self) {
        tracing::debug!("Relay track_id={} sending PLI", self.track_id);
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: self.ssrc,
        };
        if let Err(err) = self.rtcp_sender.send(Box::new(pli)) {
            tracing::error!(
                "Relay track_id={} failed to send PLI: {}",
                self.track_id,
                err
            );
        }
    }

    /// Queues a NACK for `sequence_number`. Dropped when the queue is full or the relay ended.
    pub fn retransmit_packet(&self, sequence_number: u16) -> bool {
        tracing::trace!(
            "Relay track_id={} needs retransmission of seq={}",
            self.track_id,
            sequence_number
        );
        self.retransmission.request(sequence_number)
    }

    async fn run(&self) {
        tracing::debug!(
            "Relay track_id={} ssrc={} RTP event loop has started, payload_type={}, mime_type={}",
            self.track_id,
            self.ssrc,
            self.caps.payload_type,
            self.track.mime_type()
        );

        let mut last_sequence_number: Option<u16> = None;
        let mut ticker: Option<Interval> = None;

        while !self.end_stream.is_broken() {
            match self.state() {
                RelayState::Playing | RelayState::Unmuting => {
                    let res = tokio::select! {
                        _ = self.end_stream.broken() => break,
                        res = self.track.read_rtp(self.config.read_timeout()) => res,
                    };
                    match res {
                        Ok(packet) => self.push_packet(packet, &mut last_sequence_number),
                        Err(err) => {
                            match self.handle_read_error(err) {
                                ReadAction::Continue => {}
                                ReadAction::Mute => {
                                    let tick = self.config.muted_tick();
                                    let mut interval = interval_at(Instant::now() + tick, tick);
                                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                                    ticker = Some(interval);
                                    *self.state.lock() = RelayState::Muted;
                                }
                                ReadAction::End => {
                                    self.end();
                                    break;
                                }
                            }
                            self.send_pli();
                        }
                    }
                }
                RelayState::Muted => {
                    if self.draining.is_broken() {
                        ticker = None;
                        tracing::debug!("Relay track_id={} drained while muted", self.track_id);
                        self.end();
                    } else if !self.is_muted() {
                        ticker = None;
                        tracing::debug!("Relay track_id={} is unmuting", self.track_id);
                        *self.state.lock() = RelayState::Unmuting;
                    } else if let Some(interval) = ticker.as_mut() {
                        tokio::select! {
                            _ = self.end_stream.broken() => break,
                            _ = interval.tick() => {}
                        }
                    } else {
                        *self.state.lock() = RelayState::Unmuting;
                    }
                }
            }
        }

        self.retransmission.close();
        if let Some(mut log) = self.packet_log.lock().take() {
            log.close();
        }
        self.draining.break_once();
        self.finished.break_once();

        tracing::debug!(
            "Relay track_id={} ssrc={} RTP event loop has finished",
            self.track_id,
            self.ssrc
        );
    }

    fn handle_read_error(&self, err: ReadError) -> ReadAction {
        tracing::trace!("Relay track_id={} read error: {}", self.track_id, err);
        if self.draining.is_broken() {
            return ReadAction::End;
        }
        match err {
            ReadError::BufferTooSmall => {
                tracing::warn!("Relay track_id={} read error: {}", self.track_id, err);
                ReadAction::Continue
            }
            _ if self.is_muted() => ReadAction::Mute,
            ReadError::Timeout => ReadAction::Continue,
            ReadError::EndOfStream => ReadAction::End,
            ReadError::Other(_) => {
                tracing::error!(
                    "Relay track_id={} could not read packet: {}",
                    self.track_id,
                    err
                );
                ReadAction::End
            }
        }
    }

    fn push_packet(&self, packet: rtp::packet::Packet, last_sequence_number: &mut Option<u16>) {
        let sequence_number = packet.header.sequence_number;
        let discont = match *last_sequence_number {
            Some(last) => {
                let diff = sequence_number.wrapping_sub(last);
                if diff >= 0x8000 {
                    // late or reordered
                    false
                } else {
                    *last_sequence_number = Some(sequence_number);
                    diff > 1
                }
            }
            None => {
                *last_sequence_number = Some(sequence_number);
                false
            }
        };

        let (status, request) = self.gap.verify(&packet.payload[..], discont);
        match request {
            KeyframeRequest::None => {}
            KeyframeRequest::Forced => {
                tracing::debug!(
                    "Relay track_id={} gap found at seq={}, dropping until keyframe",
                    self.track_id,
                    sequence_number
                );
                self.force_send_pli();
            }
            KeyframeRequest::RateLimited => self.send_pli(),
        }
        match status {
            GapStatus::InGap => {
                tracing::trace!(
                    "Relay track_id={} dropped seq={} in gap",
                    self.track_id,
                    sequence_number
                );
                return;
            }
            GapStatus::EndGap => {
                tracing::debug!(
                    "Relay track_id={} keyframe found at seq={}, stop dropping",
                    self.track_id,
                    sequence_number
                );
            }
            GapStatus::NotInGap => {}
        }

        {
            let mut state = self.state.lock();
            if *state == RelayState::Unmuting {
                *state = RelayState::Playing;
            }
        }

        if let Some(log) = self.packet_log.lock().as_mut() {
            log.write(&packet);
        }

        tracing::trace!(
            "Relay track_id={} received RTP ssrc={} seq={} timestamp={}",
            self.track_id,
            packet.header.ssrc,
            sequence_number,
            packet.header.timestamp
        );

        let buffer = match packet.marshal() {
            Ok(buffer) => buffer,
            Err(err) => {
                tracing::error!(
                    "Relay track_id={} could not marshal packet seq={}: {}",
                    self.track_id,
                    sequence_number,
                    err
                );
                return;
            }
        };
        self.fanout.forward_rtp(&self.track_id, self.kind, buffer);
    }

    async fn sink_event_loop(&self, mut event_receiver: mpsc::UnboundedReceiver<SinkEvent>) {
        loop {
            tokio::select! {
                _ = self.end_stream.broken() => break,
                event = event_receiver.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        SinkEvent::ForceKeyUnit => {
                            tracing::debug!("Relay track_id={} sink requested a keyframe", self.track_id);
                            self.send_pli();
                        }
                        SinkEvent::RetransmissionRequest(sequence_number) => {
                            self.retransmit_packet(sequence_number);
                        }
                        SinkEvent::PacketLost => {
                            tracing::debug!("Relay track_id={} sink lost a packet", self.track_id);
                            self.enter_gap();
                        }
                    }
                }
            }
        }
        tracing::debug!("Relay track_id={} sink event loop has finished", self.track_id);
    }

    async fn rtcp_event_loop(&self) {
        loop {
            let res = tokio::select! {
                _ = self.end_stream.broken() => break,
                res = self.track.read_rtcp() => res,
            };
            match res {
                Ok(packets) => {
                    for packet in packets.into_iter() {
                        if !packet.destination_ssrc().contains(&self.ssrc) {
                            continue;
                        }
                        match packet.marshal() {
                            Ok(buffer) => {
                                self.fanout.forward_rtcp(&self.track_id, self.kind, buffer);
                            }
                            Err(err) => {
                                tracing::error!(
                                    "Relay track_id={} could not marshal RTCP packet: {}",
                                    self.track_id,
                                    err
                                );
                            }
                        }
                    }
                }
                Err(ReadError::Timeout) | Err(ReadError::BufferTooSmall) => {}
                Err(ReadError::EndOfStream) => break,
                Err(err) => {
                    tracing::error!("Relay track_id={} failed to read rtcp: {}", self.track_id, err);
                    break;
                }
            }
        }
        tracing::debug!("Relay track_id={} RTCP event loop has finished", self.track_id);
    }
}

impl Drop for PacketRelay {
    fn drop(&mut self) {
        tracing::debug!("Relay track_id={} ssrc={} is dropped", self.track_id, self.ssrc);
    }
}

/// `<dir>/<track_id>.pts.log`, one line per forwarded packet.
#[derive(Debug)]
struct PacketLog {
    writer: BufWriter<File>,
    started_at: Instant,
}

impl PacketLog {
    fn open(config: &RelayConfig, track_id: &str) -> Option<Self> {
        let dir = config.packet_log_dir.as_ref()?;
        let path = dir.join(format!("{}.pts.log", track_id));
        let res = std::fs::create_dir_all(dir).and_then(|_| {
            let mut writer = BufWriter::new(File::create(&path)?);
            writer.write_all(b"time: pts,sn,ts\n")?;
            Ok(writer)
        });
        match res {
            Ok(writer) => Some(Self {
                writer,
                started_at: Instant::now(),
            }),
            Err(err) => {
                tracing::warn!("Could not open packet log {}: {}", path.display(), err);
                None
            }
        }
    }

    fn write(&mut self, packet: &rtp::packet::Packet) {
        let line = format!(
            "{:.6}: ({}) {},{}\n",
            self.started_at.elapsed().as_secs_f64(),
            packet.header.ssrc,
            packet.header.sequence_number,
            packet.header.timestamp
        );
        if let Err(err) = self.writer.write_all(line.as_bytes()) {
            tracing::warn!("Could not write packet log: {}", err);
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.writer.flush() {
            tracing::warn!("Could not flush packet log: {}", err);
        }
    }
}
