use std::sync::Arc;

use tokio::sync::mpsc;
use webrtc::{peer_connection::RTCPeerConnection, rtcp};

use crate::fuse::Fuse;

/// Feedback channel towards the sender of a remote track (PLI, NACK).
pub type RtcpSender = mpsc::UnboundedSender<Box<dyn rtcp::packet::Packet + Send + Sync>>;
pub type RtcpReceiver = mpsc::UnboundedReceiver<Box<dyn rtcp::packet::Packet + Send + Sync>>;

/// Creates an [`RtcpSender`] whose packets are written to `peer_connection` until `stop` breaks.
pub fn spawn_rtcp_writer(peer_connection: Arc<RTCPeerConnection>, stop: Fuse) -> Arc<RtcpSender> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        tracing::debug!("RTCP writer loop has started");
        loop {
            tokio::select! {
                _ = stop.broken() => {
                    break;
                }
                data = receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(err) = peer_connection.write_rtcp(&[data]).await {
                                tracing::error!("Error writing RTCP: {}", err);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        tracing::debug!("RTCP writer loop has finished");
    });
    Arc::new(sender)
}
