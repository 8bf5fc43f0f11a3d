use std::{collections::HashMap, sync::Arc};

use enclose::enc;
use tokio::sync::{mpsc, Mutex};

use crate::{
    config::RelayConfig,
    endpoint::EndpointEvent,
    error::{Error, SubscriptionErrorKind},
    fuse::Fuse,
    registry::Registry,
    remote::{RemoteRoom, RoomEvent},
    sink::SinkBin,
    subscriber::Subscriber,
    subscription::Subscription,
};

/// A subscribing connection to one room. Session is like the egress side of a meeting room:
/// it owns one [`Subscription`] per participant and screen share flag.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub room: String,
    remote: Arc<dyn RemoteRoom>,
    registry: Arc<Registry>,
    config: RelayConfig,
    subscriptions: Mutex<HashMap<(String, bool), Arc<Subscription>>>,
    endpoint_event_sender: mpsc::UnboundedSender<EndpointEvent>,
    closed: Fuse,
}

impl Session {
    pub(crate) fn new(
        id: String,
        room: String,
        remote: Arc<dyn RemoteRoom>,
        room_events: mpsc::UnboundedReceiver<RoomEvent>,
        registry: Arc<Registry>,
        config: RelayConfig,
        endpoint_event_sender: mpsc::UnboundedSender<EndpointEvent>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            id: id.clone(),
            room,
            remote,
            registry,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            endpoint_event_sender,
            closed: Fuse::new(),
        });

        tracing::debug!("Session {} is created", id);

        tokio::spawn(enc!((session) async move {
            session.session_event_loop(room_events).await;
        }));

        session
    }

    pub async fn has_subscriptions(&self) -> bool {
        !self.subscriptions.lock().await.is_empty()
    }

    pub async fn subscription(&self, participant: &str, screen_share: bool) -> Option<Arc<Subscription>> {
        self.subscriptions
            .lock()
            .await
            .get(&(participant.to_owned(), screen_share))
            .cloned()
    }

    /// Adds a subscriber to the participant's subscription, creating and
    /// subscribing the subscription on first use.
    pub async fn add_subscriber(
        &self,
        participant: &str,
        screen_share: bool,
        audio_bin: Option<Arc<dyn SinkBin>>,
        video_bin: Option<Arc<dyn SinkBin>>,
    ) -> (Arc<Subscription>, Arc<Subscriber>) {
        let (subscription, subscriber) = {
            let mut subscriptions = self.subscriptions.lock().await;
            let key = (participant.to_owned(), screen_share);
            let subscription = match subscriptions.get(&key) {
                Some(subscription) => subscription.clone(),
                None => {
                    let subscription = Subscription::new(
                        participant.to_owned(),
                        screen_share,
                        self.id.clone(),
                        self.remote.clone(),
                        self.registry.clone(),
                        self.config.clone(),
                    );
                    let remote_participant = self
                        .remote
                        .remote_participants()
                        .await
                        .into_iter()
                        .find(|p| p.identity == participant);
                    if let Some(remote_participant) = remote_participant {
                        subscription.reconcile(&remote_participant).await;
                    }
                    subscriptions.insert(key, subscription.clone());
                    subscription
                }
            };
            let subscriber = subscription.add_subscriber(audio_bin, video_bin);
            self.registry
                .add_subscriber(subscriber.id.clone(), subscription.clone())
                .await;
            (subscription, subscriber)
        };

        subscription.build_subscriber(&subscriber).await;

        tracing::debug!(
            "Session {} added subscriber id={} for participant={} screen_share={}",
            self.id,
            subscriber.id,
            participant,
            screen_share
        );
        (subscription, subscriber)
    }

    /// Removes a subscriber. The last one out tears down its subscription and
    /// unsubscribes from the participant.
    pub async fn remove_subscriber(&self, subscriber_id: &str) -> Result<(), Error> {
        let subscription = self
            .registry
            .find_subscriber(subscriber_id)
            .await
            .ok_or_else(|| {
                Error::new_subscription(
                    format!("Subscriber with id {} does not exist", subscriber_id),
                    SubscriptionErrorKind::SubscriberNotFoundError,
                )
            })?;

        let mut subscriptions = self.subscriptions.lock().await;
        let empty = subscription.remove_subscriber(subscriber_id).await?;
        if empty {
            subscription.unsubscribe_from_participant().await;
            subscriptions.remove(&(subscription.participant.clone(), subscription.screen_share));
            tracing::debug!(
                "Session {} removed subscription participant={} screen_share={}",
                self.id,
                subscription.participant,
                subscription.screen_share
            );
        }
        Ok(())
    }

    /// Disconnects from the room without notifying the endpoint.
    pub async fn close(&self) {
        if self.closed.break_once() {
            tracing::debug!("Session {} is closed", self.id);
            self.remote.disconnect().await;
        }
    }

    async fn teardown(&self) {
        let subscriptions: Vec<Arc<Subscription>> = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.drain().map(|(_, subscription)| subscription).collect()
        };
        for subscription in subscriptions.iter() {
            for subscriber_id in subscription.subscriber_ids() {
                if let Err(err) = subscription.remove_subscriber(&subscriber_id).await {
                    tracing::error!("Session {} failed to remove subscriber: {}", self.id, err);
                }
            }
            subscription.unsubscribe_from_participant().await;
        }
    }

    async fn session_event_loop(&self, mut room_events: mpsc::UnboundedReceiver<RoomEvent>) {
        tracing::debug!("Session {} event loop started", self.id);
        loop {
            let event = tokio::select! {
                _ = self.closed.broken() => break,
                event = room_events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            match event {
                RoomEvent::ParticipantConnected(participant) => {
                    tracing::debug!("Session {} participant connected: {}", self.id, participant.identity);
                    for screen_share in [false, true] {
                        if let Some(subscription) =
                            self.subscription(&participant.identity, screen_share).await
                        {
                            subscription.reconcile(&participant).await;
                        }
                    }
                }
                RoomEvent::ParticipantDisconnected(identity) => {
                    tracing::debug!("Session {} participant disconnected: {}", self.id, identity);
                }
                RoomEvent::TrackPublished {
                    publication,
                    participant,
                } => {
                    let screen_share = if publication.source.is_main() {
                        false
                    } else if publication.source.is_screen_share() {
                        true
                    } else {
                        tracing::debug!(
                            "Session {} ignoring track_id={} from source {}",
                            self.id,
                            publication.sid,
                            publication.source
                        );
                        continue;
                    };
                    if let Some(subscription) =
                        self.subscription(&participant.identity, screen_share).await
                    {
                        tracing::debug!("Session {} track published: {}", self.id, publication.sid);
                        subscription.reconcile(&participant).await;
                    }
                }
                RoomEvent::TrackUnpublished {
                    publication,
                    participant,
                } => {
                    tracing::debug!(
                        "Session {} track unpublished: {} from {}",
                        self.id,
                        publication.sid,
                        participant
                    );
                    if let Some(subscription) =
                        self.registry.find_subscribed_track(&publication.sid).await
                    {
                        subscription.on_track_unpublished(&publication.sid).await;
                    }
                }
                RoomEvent::TrackSubscribed {
                    track,
                    publication,
                    participant,
                } => {
                    let Some(subscription) =
                        self.registry.find_subscribed_track(&publication.sid).await
                    else {
                        tracing::debug!(
                            "Session {} no requested subscription to {} from {}",
                            self.id,
                            publication.sid,
                            participant
                        );
                        continue;
                    };
                    if let Err(err) = subscription.create_relay(track, &publication).await {
                        tracing::info!(
                            "Session {} error {} creating relay for track_id={}",
                            self.id,
                            err,
                            publication.sid
                        );
                    }
                }
                RoomEvent::TrackUnsubscribed {
                    publication,
                    participant,
                } => {
                    tracing::debug!(
                        "Session {} track unsubscribed: {} from {}",
                        self.id,
                        publication.sid,
                        participant
                    );
                    if let Some(subscription) =
                        self.registry.find_subscribed_track(&publication.sid).await
                    {
                        subscription.on_track_unsubscribed(&publication.sid).await;
                    }
                }
                RoomEvent::TrackSubscriptionFailed { sid, participant } => {
                    tracing::info!(
                        "Session {} track subscription failed: {} from {}",
                        self.id,
                        sid,
                        participant
                    );
                }
                RoomEvent::TrackMuted(sid) => {
                    if let Some(subscription) = self.registry.find_subscribed_track(&sid).await {
                        subscription.set_muted(&sid, true).await;
                    }
                }
                RoomEvent::TrackUnmuted(sid) => {
                    if let Some(subscription) = self.registry.find_subscribed_track(&sid).await {
                        subscription.set_muted(&sid, false).await;
                    }
                }
                RoomEvent::ActiveSpeakersChanged(speakers) => {
                    tracing::debug!("Session {} active speakers changed: {:?}", self.id, speakers);
                }
                RoomEvent::IsSpeakingChanged {
                    participant,
                    speaking,
                } => {
                    tracing::debug!(
                        "Session {} participant {} speaking={}",
                        self.id,
                        participant,
                        speaking
                    );
                }
                RoomEvent::MetadataChanged {
                    participant,
                    old_metadata,
                } => {
                    tracing::debug!(
                        "Session {} participant {} metadata changed, old {}",
                        self.id,
                        participant,
                        old_metadata
                    );
                }
                RoomEvent::Reconnecting => {
                    tracing::debug!("Session {} reconnecting", self.id);
                }
                RoomEvent::Reconnected => {
                    tracing::debug!("Session {} reconnected", self.id);
                }
                RoomEvent::Disconnected => {
                    tracing::debug!("Session {} disconnected", self.id);
                    self.teardown().await;
                    self.closed.break_once();
                    if let Err(err) = self
                        .endpoint_event_sender
                        .send(EndpointEvent::SessionRemoved(self.id.clone()))
                    {
                        tracing::error!("Failed to send SessionRemoved event id={}: {}", self.id, err);
                    }
                    break;
                }
            }
        }
        tracing::debug!("Session {} event loop finished", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!("Session {} is dropped", self.id);
    }
}
