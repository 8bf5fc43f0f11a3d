use std::sync::Arc;

use strum::IntoEnumIterator;
use tokio::sync::Mutex;

use crate::{
    config::{MediaKind, RelayConfig, TrackSource},
    error::{Error, RelayErrorKind, SubscriptionErrorKind},
    fanout::Fanout,
    registry::Registry,
    relay::PacketRelay,
    remote::{RemoteParticipant, RemoteRoom, TrackPublication},
    sink::SinkBin,
    subscriber::Subscriber,
    track::RemoteTrack,
};

/// Bookkeeping for one remote track a subscription wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub kind: MediaKind,
    pub source: TrackSource,
    /// A subscribe request was issued and not yet withdrawn.
    pub subscribed: bool,
}

impl Track {
    fn new(publication: &TrackPublication) -> Self {
        Self {
            id: publication.sid.clone(),
            kind: publication.kind,
            source: publication.source,
            subscribed: false,
        }
    }
}

#[derive(Debug, Default)]
struct KindState {
    track: Option<Track>,
    relay: Option<Arc<PacketRelay>>,
}

#[derive(Debug, Default)]
struct SubscriptionState {
    audio: KindState,
    video: KindState,
}

impl SubscriptionState {
    fn kind_mut(&mut self, kind: MediaKind) -> &mut KindState {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    fn kind(&self, kind: MediaKind) -> &KindState {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

/// The subscribers of one participant's main or screen share media, and the relays feeding them.
#[derive(Debug)]
pub struct Subscription {
    pub participant: String,
    pub screen_share: bool,
    pub session_id: String,
    config: RelayConfig,
    remote: Arc<dyn RemoteRoom>,
    registry: Arc<Registry>,
    fanout: Arc<Fanout>,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(
        participant: String,
        screen_share: bool,
        session_id: String,
        remote: Arc<dyn RemoteRoom>,
        registry: Arc<Registry>,
        config: RelayConfig,
    ) -> Arc<Self> {
        tracing::info!(
            "Subscription participant={} screen_share={} is created in session id={}",
            participant,
            screen_share,
            session_id
        );
        Arc::new(Self {
            participant,
            screen_share,
            session_id,
            config,
            remote,
            registry,
            fanout: Arc::new(Fanout::new()),
            state: Mutex::new(SubscriptionState::default()),
        })
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.fanout.snapshot().into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.len()
    }

    pub fn find_subscriber(&self, subscriber_id: &str) -> Option<Arc<Subscriber>> {
        self.fanout.find(subscriber_id)
    }

    pub async fn relay(&self, kind: MediaKind) -> Option<Arc<PacketRelay>> {
        self.state.lock().await.kind(kind).relay.clone()
    }

    pub async fn track(&self, kind: MediaKind) -> Option<Track> {
        self.state.lock().await.kind(kind).track.clone()
    }

    /// Registers a new subscriber. It receives nothing until [`Subscription::build_subscriber`].
    pub fn add_subscriber(
        &self,
        audio_bin: Option<Arc<dyn SinkBin>>,
        video_bin: Option<Arc<dyn SinkBin>>,
    ) -> Arc<Subscriber> {
        let subscriber = Subscriber::new(audio_bin, video_bin);
        self.fanout.push(subscriber.clone());
        tracing::debug!(
            "Subscription participant={} added subscriber id={}, {} subscribers",
            self.participant,
            subscriber.id,
            self.fanout.len()
        );
        subscriber
    }

    /// Binds `subscriber` to whatever relays are running now.
    pub async fn build_subscriber(&self, subscriber: &Subscriber) {
        let relays: Vec<Arc<PacketRelay>> = {
            let state = self.state.lock().await;
            [&state.audio.relay, &state.video.relay]
                .into_iter()
                .flatten()
                .cloned()
                .collect()
        };
        for relay in relays.iter() {
            if let Err(err) = subscriber.bind(relay) {
                tracing::error!(
                    "Subscriber id={} failed to bind to track_id={}: {}",
                    subscriber.id,
                    relay.track_id,
                    err
                );
            }
        }
    }

    /// Removes and destroys a subscriber. Returns whether the subscription is now empty.
    pub async fn remove_subscriber(&self, subscriber_id: &str) -> Result<bool, Error> {
        let subscriber = self.fanout.remove(subscriber_id).ok_or_else(|| {
            Error::new_subscription(
                format!("Subscriber with id {} does not exist", subscriber_id),
                SubscriptionErrorKind::SubscriberNotFoundError,
            )
        })?;
        subscriber.destroy();
        self.registry.remove_subscriber(subscriber_id).await;

        let remaining = self.fanout.len();
        tracing::debug!(
            "Subscription participant={} removed subscriber id={}, still {} subscribers",
            self.participant,
            subscriber_id,
            remaining
        );
        Ok(remaining == 0)
    }

    /// Picks the tracks this subscription should receive from `participant` and
    /// switches over to them, subscribing to new tracks and dropping replaced ones.
    pub async fn reconcile(self: &Arc<Self>, participant: &RemoteParticipant) {
        if participant.identity != self.participant {
            return;
        }
        let mut state = self.state.lock().await;
        for kind in MediaKind::iter() {
            let Some(desired) = participant.desired_track(kind, self.screen_share) else {
                continue;
            };

            let current = state.kind(kind).track.as_ref().map(|track| track.id.clone());
            if current.as_deref() != Some(desired.sid.as_str()) {
                if let Some(current) = current.as_ref() {
                    tracing::debug!(
                        "Subscription participant={} switching {} from track_id={} to track_id={}",
                        self.participant,
                        kind,
                        current,
                        desired.sid
                    );
                }
                self.release_kind(&mut state, kind).await;
                state.kind_mut(kind).track = Some(Track::new(desired));
            }

            if let Some(track) = state.kind_mut(kind).track.as_mut() {
                self.subscribe_track(track).await;
            }
        }
    }

    /// Issues a subscribe request unless one is already outstanding.
    async fn subscribe_track(self: &Arc<Self>, track: &mut Track) {
        if track.subscribed {
            return;
        }
        // Registered first so that an immediate acknowledgement finds the subscription.
        self.registry
            .add_subscribed_track(track.id.clone(), self.clone())
            .await;
        tracing::debug!(
            "Subscription participant={} subscribing to track_id={}",
            self.participant,
            track.id
        );
        match self.remote.set_subscribed(&track.id, true).await {
            Ok(_) => track.subscribed = true,
            Err(err) => {
                tracing::info!(
                    "Subscription participant={} could not subscribe to track_id={}: {}",
                    self.participant,
                    track.id,
                    err
                );
                self.registry.remove_subscribed_track(&track.id).await;
            }
        }
    }

    /// Withdraws an outstanding subscribe request. No-op if there is none.
    async fn unsubscribe_track(&self, track: &mut Track) {
        self.registry.remove_subscribed_track(&track.id).await;
        if !track.subscribed {
            return;
        }
        track.subscribed = false;
        tracing::debug!(
            "Subscription participant={} unsubscribing from track_id={}",
            self.participant,
            track.id
        );
        if let Err(err) = self.remote.set_subscribed(&track.id, false).await {
            tracing::info!(
                "Subscription participant={} could not unsubscribe from track_id={}: {}",
                self.participant,
                track.id,
                err
            );
        }
    }

    /// Ends the relay of `kind` and unsubscribes its track.
    async fn release_kind(&self, state: &mut SubscriptionState, kind: MediaKind) {
        self.drop_relay(state, kind);
        if let Some(mut track) = state.kind_mut(kind).track.take() {
            self.unsubscribe_track(&mut track).await;
        }
    }

    fn drop_relay(&self, state: &mut SubscriptionState, kind: MediaKind) {
        if let Some(relay) = state.kind_mut(kind).relay.take() {
            relay.drain(true);
            for subscriber in self.fanout.snapshot().iter() {
                subscriber.unbind(kind);
            }
        }
    }

    /// Starts relaying an acknowledged track and binds every current subscriber to it.
    pub async fn create_relay(
        &self,
        track: Arc<dyn RemoteTrack>,
        publication: &TrackPublication,
    ) -> Result<Arc<PacketRelay>, Error> {
        let kind = publication.kind;
        let relay = {
            let mut state = self.state.lock().await;
            if state.kind(kind).relay.is_some() {
                return Err(Error::new_relay(
                    format!("{} relay already created for track {}", kind, publication.sid),
                    RelayErrorKind::RelayAlreadyExistsError,
                ));
            }
            if track.kind() != kind {
                return Err(Error::new_relay(
                    format!("invalid track kind {} for track {}", track.kind(), publication.sid),
                    RelayErrorKind::InvalidTrackKindError,
                ));
            }

            let wanted = state
                .kind(kind)
                .track
                .as_ref()
                .is_some_and(|t| t.id == publication.sid);
            if !wanted {
                return Err(Error::new_subscription(
                    format!(
                        "track {} is not wanted by participant {}",
                        publication.sid, self.participant
                    ),
                    SubscriptionErrorKind::TrackNotWantedError,
                ));
            }

            let relay = PacketRelay::start(track, self.fanout.clone(), self.config.clone())?;
            if publication.muted {
                relay.set_muted(true);
            }
            let slot = state.kind_mut(kind);
            if let Some(record) = slot.track.as_mut() {
                record.subscribed = true;
            }
            slot.relay = Some(relay.clone());
            relay
        };

        tracing::debug!(
            "Subscription participant={} created {} relay for track_id={}",
            self.participant,
            kind,
            relay.track_id
        );

        for subscriber in self.fanout.snapshot().iter() {
            if let Err(err) = subscriber.bind(&relay) {
                tracing::error!(
                    "Subscriber id={} failed to bind to track_id={}: {}",
                    subscriber.id,
                    relay.track_id,
                    err
                );
            }
        }
        Ok(relay)
    }

    /// The remote side stopped delivering `track_id`.
    pub async fn on_track_unsubscribed(&self, track_id: &str) {
        let mut state = self.state.lock().await;
        for kind in MediaKind::iter() {
            let matches = state
                .kind(kind)
                .track
                .as_ref()
                .is_some_and(|track| track.id == track_id);
            if !matches {
                continue;
            }
            if let Some(track) = state.kind_mut(kind).track.as_mut() {
                track.subscribed = false;
            }
            self.drop_relay(&mut state, kind);
        }
    }

    /// The participant withdrew `track_id`. It is forgotten so a later publication can replace it.
    pub async fn on_track_unpublished(&self, track_id: &str) {
        let mut state = self.state.lock().await;
        for kind in MediaKind::iter() {
            let matches = state
                .kind(kind)
                .track
                .as_ref()
                .is_some_and(|track| track.id == track_id);
            if matches {
                self.release_kind(&mut state, kind).await;
            }
        }
    }

    /// Ends both relays and withdraws every subscribe request, each exactly once.
    pub async fn unsubscribe_from_participant(&self) {
        tracing::debug!(
            "Subscription participant={} screen_share={} unsubscribing from participant",
            self.participant,
            self.screen_share
        );
        let mut state = self.state.lock().await;
        for kind in MediaKind::iter() {
            self.release_kind(&mut state, kind).await;
        }
    }

    pub async fn set_muted(&self, track_id: &str, muted: bool) {
        let state = self.state.lock().await;
        for relay in [&state.audio.relay, &state.video.relay].into_iter().flatten() {
            if relay.track_id == track_id {
                relay.set_muted(muted);
            }
        }
    }

    /// Rate-limited PLI on the video relay, if `subscriber_id` is receiving video.
    pub async fn request_key_frame(&self, subscriber_id: &str) -> bool {
        let Some(subscriber) = self.fanout.find(subscriber_id) else {
            return false;
        };
        let Some(relay) = self.relay(MediaKind::Video).await else {
            return false;
        };
        if !subscriber.is_ready(MediaKind::Video) {
            return false;
        }
        tracing::debug!(
            "Subscriber id={} requested a keyframe on track_id={}",
            subscriber_id,
            relay.track_id
        );
        relay.send_pli();
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        tracing::debug!(
            "Subscription participant={} screen_share={} is dropped",
            self.participant,
            self.screen_share
        );
    }
}
