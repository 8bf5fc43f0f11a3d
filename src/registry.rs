use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::subscription::Subscription;

/// Lookup tables shared by every session of an [`crate::endpoint::Endpoint`].
#[derive(Debug, Default)]
pub struct Registry {
    subscribed_tracks: Mutex<HashMap<String, Arc<Subscription>>>,
    subscribers: Mutex<HashMap<String, Arc<Subscription>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add_subscribed_track(&self, track_id: String, subscription: Arc<Subscription>) {
        tracing::trace!("Registry add subscribed track_id={}", track_id);
        self.subscribed_tracks
            .lock()
            .await
            .insert(track_id, subscription);
    }

    pub async fn remove_subscribed_track(&self, track_id: &str) -> Option<Arc<Subscription>> {
        self.subscribed_tracks.lock().await.remove(track_id)
    }

    pub async fn find_subscribed_track(&self, track_id: &str) -> Option<Arc<Subscription>> {
        self.subscribed_tracks.lock().await.get(track_id).cloned()
    }

    pub async fn add_subscriber(&self, subscriber_id: String, subscription: Arc<Subscription>) {
        self.subscribers
            .lock()
            .await
            .insert(subscriber_id, subscription);
    }

    pub async fn remove_subscriber(&self, subscriber_id: &str) -> Option<Arc<Subscription>> {
        self.subscribers.lock().await.remove(subscriber_id)
    }

    pub async fn find_subscriber(&self, subscriber_id: &str) -> Option<Arc<Subscription>> {
        self.subscribers.lock().await.get(subscriber_id).cloned()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}
