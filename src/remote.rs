use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    config::{MediaKind, TrackSource},
    error::Error,
    sink::SourceBin,
    track::RemoteTrack,
};

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPublication {
    pub sid: String,
    pub kind: MediaKind,
    pub source: TrackSource,
    pub muted: bool,
}

/// Snapshot of a remote participant and the tracks it publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub identity: String,
    pub publications: Vec<TrackPublication>,
}

/// Notifications delivered by a [`RemoteRoom`].
#[derive(Debug)]
pub enum RoomEvent {
    ParticipantConnected(RemoteParticipant),
    ParticipantDisconnected(String),
    TrackPublished {
        publication: TrackPublication,
        participant: RemoteParticipant,
    },
    TrackUnpublished {
        publication: TrackPublication,
        participant: String,
    },
    /// Acknowledges a subscribe request; media is now readable from `track`.
    TrackSubscribed {
        track: Arc<dyn RemoteTrack>,
        publication: TrackPublication,
        participant: String,
    },
    TrackUnsubscribed {
        publication: TrackPublication,
        participant: String,
    },
    TrackSubscriptionFailed {
        sid: String,
        participant: String,
    },
    TrackMuted(String),
    TrackUnmuted(String),
    ActiveSpeakersChanged(Vec<String>),
    IsSpeakingChanged {
        participant: String,
        speaking: bool,
    },
    MetadataChanged {
        participant: String,
        old_metadata: String,
    },
    Reconnecting,
    Reconnected,
    Disconnected,
}

/// A subscribing connection to a room.
#[async_trait]
pub trait RemoteRoom: fmt::Debug + Send + Sync {
    async fn remote_participants(&self) -> Vec<RemoteParticipant>;
    /// Requests (or cancels) delivery of a published track. The outcome arrives later
    /// as [`RoomEvent::TrackSubscribed`] or [`RoomEvent::TrackUnsubscribed`].
    async fn set_subscribed(&self, track_sid: &str, subscribed: bool) -> Result<(), Error>;
    async fn disconnect(&self);
}

/// A publishing participant in a room.
#[async_trait]
pub trait Ingress: fmt::Debug + Send + Sync {
    async fn publish(
        &self,
        screen_share: bool,
        audio: Option<Arc<dyn SourceBin>>,
        video: Option<Arc<dyn SourceBin>>,
    ) -> Result<(), Error>;
    async fn unpublish(&self, screen_share: bool) -> Result<(), Error>;
    async fn disconnect(&self) -> Result<(), Error>;
}

/// Opens connections to the media server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_room(
        &self,
        params: &ConnectParams,
        identity: &str,
    ) -> Result<(Arc<dyn RemoteRoom>, mpsc::UnboundedReceiver<RoomEvent>), Error>;

    async fn connect_ingress(
        &self,
        params: &ConnectParams,
        publisher_name: &str,
        identity: &str,
    ) -> Result<Arc<dyn Ingress>, Error>;
}

impl RemoteParticipant {
    /// Latest publication of `kind` belonging to the main or the screen share group.
    pub fn desired_track(&self, kind: MediaKind, screen_share: bool) -> Option<&TrackPublication> {
        self.publications
            .iter()
            .filter(|publication| publication.kind == kind)
            .filter(|publication| {
                if screen_share {
                    publication.source.is_screen_share()
                } else {
                    publication.source.is_main()
                }
            })
            .last()
    }
}
