use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{config::MediaKind, sink::FlowReturn, subscriber::Subscriber};

/// Ordered set of subscribers sharing the relays of one subscription.
#[derive(Debug, Default)]
pub struct Fanout {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a subscriber with the same id is already present.
    pub fn push(&self, subscriber: Arc<Subscriber>) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers.iter().any(|s| s.id == subscriber.id) {
            return false;
        }
        subscribers.push(subscriber);
        true
    }

    pub fn remove(&self, subscriber_id: &str) -> Option<Arc<Subscriber>> {
        let mut subscribers = self.subscribers.lock();
        let index = subscribers.iter().position(|s| s.id == subscriber_id)?;
        Some(subscribers.remove(index))
    }

    pub fn find(&self, subscriber_id: &str) -> Option<Arc<Subscriber>> {
        self.subscribers
            .lock()
            .iter()
            .find(|s| s.id == subscriber_id)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Pushes an RTP packet to every subscriber ready for `kind`. Returns how many received it.
    pub fn forward_rtp(&self, track_id: &str, kind: MediaKind, buffer: Bytes) -> usize {
        self.forward(track_id, kind, |subscriber| {
            subscriber.push_rtp(kind, buffer.clone())
        })
    }

    pub fn forward_rtcp(&self, track_id: &str, kind: MediaKind, buffer: Bytes) -> usize {
        self.forward(track_id, kind, |subscriber| {
            subscriber.push_rtcp(kind, buffer.clone())
        })
    }

    fn forward(
        &self,
        track_id: &str,
        kind: MediaKind,
        push: impl Fn(&Subscriber) -> Option<FlowReturn>,
    ) -> usize {
        let subscribers = self.snapshot();
        if subscribers.is_empty() {
            tracing::trace!("Relay track_id={} has no subscribers", track_id);
            return 0;
        }

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            match push(subscriber) {
                Some(FlowReturn::Ok) => delivered += 1,
                Some(flow) => {
                    delivered += 1;
                    tracing::info!(
                        "Relay track_id={} unexpected flow return {} from subscriber id={}",
                        track_id,
                        flow,
                        subscriber.id
                    );
                }
                None => {
                    tracing::trace!(
                        "Relay track_id={} subscriber id={} is not ready for {}",
                        track_id,
                        subscriber.id,
                        kind
                    );
                }
            }
        }
        delivered
    }
}
