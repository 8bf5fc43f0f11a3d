use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use webrtc::rtcp::transport_feedbacks::transport_layer_nack::{
    nack_pairs_from_sequence_numbers, TransportLayerNack,
};

use crate::{fuse::Fuse, transport};

/// Bounded queue of sequence numbers waiting to be NACKed.
#[derive(Debug)]
pub struct RetransmissionScheduler {
    sender: mpsc::Sender<u16>,
    accepting: AtomicBool,
}

impl RetransmissionScheduler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<u16>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let scheduler = Self {
            sender,
            accepting: AtomicBool::new(true),
        };
        (scheduler, receiver)
    }

    /// Never blocks. Returns `false` if the request was dropped because the queue is full or closed.
    pub fn request(&self, sequence_number: u16) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            return false;
        }
        match self.sender.try_send(sequence_number) {
            Ok(_) => true,
            Err(err) => {
                tracing::trace!(
                    "Retransmission of seq={} is dropped: {}",
                    sequence_number,
                    err
                );
                false
            }
        }
    }

    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    /// Waits for at least one request, gives a burst `accumulate` to settle, then takes
    /// whatever is queued up to `capacity`. `None` once `end` is broken or the queue is closed.
    pub async fn next_batch(
        receiver: &mut mpsc::Receiver<u16>,
        capacity: usize,
        accumulate: Duration,
        end: &Fuse,
    ) -> Option<Vec<u16>> {
        let first = tokio::select! {
            _ = end.broken() => return None,
            sequence_number = receiver.recv() => sequence_number?,
        };

        tokio::select! {
            _ = end.broken() => return None,
            _ = tokio::time::sleep(accumulate) => {}
        }

        let mut batch = Vec::with_capacity(capacity);
        batch.push(first);
        while batch.len() < capacity {
            match receiver.try_recv() {
                Ok(sequence_number) => batch.push(sequence_number),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    pub(crate) async fn run(
        track_id: String,
        media_ssrc: u32,
        mut receiver: mpsc::Receiver<u16>,
        rtcp_sender: Arc<transport::RtcpSender>,
        capacity: usize,
        accumulate: Duration,
        end: Fuse,
    ) {
        tracing::debug!(
            "Relay track_id={} ssrc={} retransmission loop has started",
            track_id,
            media_ssrc
        );

        while let Some(batch) = Self::next_batch(&mut receiver, capacity, accumulate, &end).await {
            tracing::trace!(
                "Relay track_id={} ssrc={} sending NACK for {:?}",
                track_id,
                media_ssrc,
                batch
            );
            let nack = TransportLayerNack {
                sender_ssrc: 0,
                media_ssrc,
                nacks: nack_pairs_from_sequence_numbers(&batch),
            };
            if let Err(err) = rtcp_sender.send(Box::new(nack)) {
                tracing::error!(
                    "Relay track_id={} ssrc={} failed to send NACK: {}",
                    track_id,
                    media_ssrc,
                    err
                );
            }
        }

        tracing::debug!(
            "Relay track_id={} ssrc={} retransmission loop has finished",
            track_id,
            media_ssrc
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_excess_requests_are_dropped() {
        let (scheduler, mut receiver) = RetransmissionScheduler::new(20);
        let accepted = (0..25u16).filter(|seq| scheduler.request(*seq)).count();
        assert_eq!(accepted, 20);

        let end = Fuse::new();
        let batch =
            RetransmissionScheduler::next_batch(&mut receiver, 20, Duration::from_millis(2), &end)
                .await
                .unwrap();
        assert_eq!(batch, (0..20u16).collect::<Vec<_>>());

        // The queue has room again.
        assert!(scheduler.request(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_collects_burst() {
        let (scheduler, mut receiver) = RetransmissionScheduler::new(20);
        scheduler.request(7);

        let end = Fuse::new();
        let handle = tokio::spawn(async move {
            RetransmissionScheduler::next_batch(&mut receiver, 20, Duration::from_millis(2), &end)
                .await
        });
        tokio::task::yield_now().await;
        scheduler.request(8);
        scheduler.request(9);

        assert_eq!(handle.await.unwrap(), Some(vec![7, 8, 9]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_ends_with_relay() {
        let (scheduler, mut receiver) = RetransmissionScheduler::new(20);
        let end = Fuse::new();
        end.break_once();
        assert_eq!(
            RetransmissionScheduler::next_batch(&mut receiver, 20, Duration::from_millis(2), &end)
                .await,
            None
        );

        scheduler.close();
        assert!(scheduler.is_closed());
        assert!(!scheduler.request(1));
    }
}
