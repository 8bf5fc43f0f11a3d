use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use webrtc::{
    rtcp, rtp, rtp_transceiver::rtp_receiver::RTCRtpReceiver,
    track::track_remote::TrackRemote,
};

use crate::{
    config::{Codec, MediaKind},
    error::{Error, ReadError, SinkErrorKind},
    transport,
};

/// A media track received from a remote participant.
#[async_trait]
pub trait RemoteTrack: fmt::Debug + Send + Sync {
    /// The ID is the same as the published track sid.
    fn id(&self) -> String;
    fn ssrc(&self) -> u32;
    fn kind(&self) -> MediaKind;
    fn mime_type(&self) -> String;
    fn payload_type(&self) -> u8;
    fn clock_rate(&self) -> u32;
    /// Reads one RTP packet, giving up with [`ReadError::Timeout`] after `timeout`.
    async fn read_rtp(&self, timeout: Duration) -> Result<rtp::packet::Packet, ReadError>;
    /// Reads the next batch of RTCP packets received for this track.
    async fn read_rtcp(&self) -> Result<Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>, ReadError>;
    fn rtcp_sender(&self) -> Arc<transport::RtcpSender>;
}

/// [`RemoteTrack`] backed by a [`webrtc`] peer connection.
#[derive(Debug)]
pub struct WebRtcTrack {
    track: Arc<TrackRemote>,
    rtp_receiver: Arc<RTCRtpReceiver>,
    rtcp_sender: Arc<transport::RtcpSender>,
}

impl WebRtcTrack {
    pub fn new(
        track: Arc<TrackRemote>,
        rtp_receiver: Arc<RTCRtpReceiver>,
        rtcp_sender: Arc<transport::RtcpSender>,
    ) -> Self {
        Self {
            track,
            rtp_receiver,
            rtcp_sender,
        }
    }
}

#[async_trait]
impl RemoteTrack for WebRtcTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    fn kind(&self) -> MediaKind {
        MediaKind::from_mime_type(&self.mime_type())
    }

    fn mime_type(&self) -> String {
        self.track.codec().capability.mime_type
    }

    fn payload_type(&self) -> u8 {
        self.track.payload_type()
    }

    fn clock_rate(&self) -> u32 {
        self.track.codec().capability.clock_rate
    }

    async fn read_rtp(&self, timeout: Duration) -> Result<rtp::packet::Packet, ReadError> {
        match tokio::time::timeout(timeout, self.track.read_rtp()).await {
            Ok(Ok((packet, _attr))) => Ok(packet),
            Ok(Err(err)) => Err(err.into()),
            Err(_elapsed) => Err(ReadError::Timeout),
        }
    }

    async fn read_rtcp(&self) -> Result<Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>, ReadError> {
        let (packets, _attr) = self.rtp_receiver.read_rtcp().await?;
        Ok(packets)
    }

    fn rtcp_sender(&self) -> Arc<transport::RtcpSender> {
        self.rtcp_sender.clone()
    }
}

/// What a sink needs to know to build the receiving side of one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackCaps {
    pub track_id: String,
    pub kind: MediaKind,
    pub codec: Codec,
    pub payload_type: u8,
    pub clock_rate: u32,
}

impl TrackCaps {
    /// RTP caps, e.g. `application/x-rtp,media=video,payload=96,encoding-name=H264,clock-rate=90000`.
    pub fn caps(&self) -> Result<String, Error> {
        self.validate()?;
        Ok(format!(
            "application/x-rtp,media={},payload={},encoding-name={},clock-rate={}",
            self.kind, self.payload_type, self.codec, self.clock_rate
        ))
    }

    pub fn depayloader(&self) -> Result<&'static str, Error> {
        self.validate()?;
        let name = match self.codec {
            Codec::Opus => "rtpopusdepay",
            Codec::H264 => "rtph264depay",
            Codec::Vp8 => "rtpvp8depay",
            Codec::Vp9 => "rtpvp9depay",
        };
        Ok(name)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.codec.kind() != self.kind {
            return Err(Error::new_sink(
                format!("{} is not yet supported for {} tracks", self.codec, self.kind),
                SinkErrorKind::UnsupportedCapsError,
            ));
        }
        Ok(())
    }
}
