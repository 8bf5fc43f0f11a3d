use std::{collections::HashMap, sync::Arc};

use derivative::Derivative;
use enclose::enc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::{
    config::RelayConfig,
    registry::Registry,
    remote::{ConnectParams, Connector, Ingress},
    session::Session,
    sink::{SinkBin, SourceBin},
};

pub const EGRESS_PREFIX: &str = "GSTEG_";
pub const INGRESS_PREFIX: &str = "GSTIG_";

#[derive(Debug)]
pub(crate) enum EndpointEvent {
    SessionRemoved(String),
}

#[derive(Debug, Default)]
struct Sessions {
    by_id: HashMap<String, (Arc<Session>, String)>,
    /// (url, room) to session id
    by_room: HashMap<(String, String), String>,
}

impl Sessions {
    fn remove(&mut self, id: &str) -> Option<Arc<Session>> {
        let (session, url) = self.by_id.remove(id)?;
        self.by_room.remove(&(url, session.room.clone()));
        Some(session)
    }
}

#[derive(Debug)]
struct IngressEntry {
    ingress: Arc<dyn Ingress>,
    main_publisher: Option<String>,
    screen_share_publisher: Option<String>,
}

impl IngressEntry {
    fn publisher_mut(&mut self, screen_share: bool) -> &mut Option<String> {
        if screen_share {
            &mut self.screen_share_publisher
        } else {
            &mut self.main_publisher
        }
    }
}

/// Host facing entry points. Every operation returns an identifier, an empty
/// string, or a message starting with `ERROR: `.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Endpoint {
    #[derivative(Debug = "ignore")]
    connector: Arc<dyn Connector>,
    registry: Arc<Registry>,
    config: RelayConfig,
    sessions: Arc<Mutex<Sessions>>,
    ingresses: Mutex<HashMap<String, IngressEntry>>,
    /// publisher id to (ingress id, screen share)
    publishers: Mutex<HashMap<String, (String, bool)>>,
    endpoint_event_sender: mpsc::UnboundedSender<EndpointEvent>,
}

impl Endpoint {
    pub fn new(connector: Arc<dyn Connector>, config: RelayConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<EndpointEvent>();
        let sessions = Arc::new(Mutex::new(Sessions::default()));

        tokio::spawn(enc!((sessions) async move {
            Self::endpoint_event_loop(sessions, rx).await;
        }));

        Self {
            connector,
            registry: Registry::new(),
            config,
            sessions,
            ingresses: Mutex::new(HashMap::new()),
            publishers: Mutex::new(HashMap::new()),
            endpoint_event_sender: tx,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub async fn session(&self, egress_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .by_id
            .get(egress_id)
            .map(|(session, _)| session.clone())
    }

    async fn endpoint_event_loop(
        sessions: Arc<Mutex<Sessions>>,
        mut event_receiver: mpsc::UnboundedReceiver<EndpointEvent>,
    ) {
        while let Some(event) = event_receiver.recv().await {
            match event {
                EndpointEvent::SessionRemoved(id) => {
                    let mut sessions = sessions.lock().await;
                    if sessions.remove(&id).is_some() {
                        tracing::debug!("Endpoint removed disconnected session {}", id);
                    }
                }
            }
        }
        tracing::debug!("Endpoint event loop finished");
    }

    /// Without `publisher_name`, returns the egress id of the (url, room) session,
    /// connecting it first if needed. With it, returns an ingress id. `""` on failure.
    pub async fn connect(
        &self,
        params: ConnectParams,
        publisher_name: Option<&str>,
        publisher_id: Option<&str>,
    ) -> String {
        tracing::debug!(
            "connect: room {} on {}, publisher {:?} {:?}",
            params.room,
            params.url,
            publisher_name,
            publisher_id
        );
        match publisher_name.filter(|name| !name.is_empty()) {
            None => self.connect_egress(params).await,
            Some(name) => self.connect_ingress(params, name, publisher_id).await,
        }
    }

    async fn connect_egress(&self, params: ConnectParams) -> String {
        let mut sessions = self.sessions.lock().await;
        let key = (params.url.clone(), params.room.clone());
        if let Some(id) = sessions.by_room.get(&key) {
            return id.clone();
        }

        let id = format!("{}{}", EGRESS_PREFIX, Uuid::new_v4());
        let (remote, room_events) = match self.connector.connect_room(&params, &id).await {
            Ok(connected) => connected,
            Err(err) => {
                tracing::warn!("connect: could not connect to room {}: {}", params.room, err);
                return "".to_owned();
            }
        };
        let session = Session::new(
            id.clone(),
            params.room.clone(),
            remote,
            room_events,
            self.registry.clone(),
            self.config.clone(),
            self.endpoint_event_sender.clone(),
        );
        sessions.by_id.insert(id.clone(), (session, params.url.clone()));
        sessions.by_room.insert(key, id.clone());
        id
    }

    async fn connect_ingress(
        &self,
        params: ConnectParams,
        publisher_name: &str,
        publisher_id: Option<&str>,
    ) -> String {
        let mut ingresses = self.ingresses.lock().await;
        let id = match publisher_id.filter(|id| !id.is_empty()) {
            Some(id) if ingresses.contains_key(id) => return id.to_owned(),
            Some(id) => id.to_owned(),
            None => format!("{}{}", INGRESS_PREFIX, Uuid::new_v4()),
        };

        match self
            .connector
            .connect_ingress(&params, publisher_name, &id)
            .await
        {
            Ok(ingress) => {
                ingresses.insert(
                    id.clone(),
                    IngressEntry {
                        ingress,
                        main_publisher: None,
                        screen_share_publisher: None,
                    },
                );
                id
            }
            Err(err) => {
                tracing::warn!("connect: could not create ingress {}: {}", id, err);
                "".to_owned()
            }
        }
    }

    pub async fn disconnect(&self, id: &str) -> String {
        tracing::debug!("disconnect: {}", id);
        if id.starts_with(EGRESS_PREFIX) {
            self.disconnect_egress(id).await
        } else {
            self.disconnect_ingress(id).await
        }
    }

    async fn disconnect_egress(&self, egress_id: &str) -> String {
        let mut sessions = self.sessions.lock().await;
        let Some((session, _)) = sessions.by_id.get(egress_id) else {
            return format!("ERROR: Egress {} is not available", egress_id);
        };
        if session.has_subscriptions().await {
            return format!("ERROR: room {} already has active subscriptions", session.room);
        }
        if let Some(session) = sessions.remove(egress_id) {
            session.close().await;
        }
        "".to_owned()
    }

    async fn disconnect_ingress(&self, ingress_id: &str) -> String {
        let mut ingresses = self.ingresses.lock().await;
        let Some(entry) = ingresses.get(ingress_id) else {
            return format!("ERROR: Ingress {} is not available", ingress_id);
        };
        if entry.main_publisher.is_some() || entry.screen_share_publisher.is_some() {
            return format!("ERROR: ingress {} already has active publisher", ingress_id);
        }
        if let Err(err) = entry.ingress.disconnect().await {
            return format!("ERROR: {}", err);
        }
        ingresses.remove(ingress_id);
        ingress_id.to_owned()
    }

    /// Returns the new subscriber id.
    pub async fn subscribe(
        &self,
        participant: &str,
        screen_share: bool,
        egress_id: &str,
        audio_bin: Option<Arc<dyn SinkBin>>,
        video_bin: Option<Arc<dyn SinkBin>>,
    ) -> String {
        tracing::debug!(
            "subscribe: participant {}, egress id {}, screen_share {}",
            participant,
            egress_id,
            screen_share
        );
        let Some(session) = self.session(egress_id).await else {
            return format!("ERROR: Egress {} not available", egress_id);
        };
        let (_subscription, subscriber) = session
            .add_subscriber(participant, screen_share, audio_bin, video_bin)
            .await;
        subscriber.id.clone()
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) -> String {
        tracing::debug!("unsubscribe: subscriber id {}", subscriber_id);
        let not_found = || format!("ERROR: Subscriber with id {} does not exist", subscriber_id);
        let Some(subscription) = self.registry.find_subscriber(subscriber_id).await else {
            return not_found();
        };
        let Some(session) = self.session(&subscription.session_id).await else {
            return not_found();
        };
        match session.remove_subscriber(subscriber_id).await {
            Ok(_) => subscriber_id.to_owned(),
            Err(_) => not_found(),
        }
    }

    /// Returns whether a PLI was requested.
    pub async fn request_key_frame(&self, subscriber_id: &str) -> bool {
        tracing::debug!("request_key_frame: {}", subscriber_id);
        match self.registry.find_subscriber(subscriber_id).await {
            Some(subscription) => subscription.request_key_frame(subscriber_id).await,
            None => false,
        }
    }

    /// Returns the new publisher id.
    pub async fn publish(
        &self,
        screen_share: bool,
        ingress_id: &str,
        audio: Option<Arc<dyn SourceBin>>,
        video: Option<Arc<dyn SourceBin>>,
    ) -> String {
        tracing::debug!(
            "publish: ingress id {}, screen_share {}, audio {} video {}",
            ingress_id,
            screen_share,
            audio.is_some(),
            video.is_some()
        );
        let mut ingresses = self.ingresses.lock().await;
        let Some(entry) = ingresses.get_mut(ingress_id) else {
            tracing::warn!("publish: ingress {} not available", ingress_id);
            return "ERROR: ingress not available".to_owned();
        };
        if entry.publisher_mut(screen_share).is_some() {
            tracing::error!("publish: ingress {} already publishing", ingress_id);
            return "ERROR: Already publishing".to_owned();
        }
        if let Err(err) = entry.ingress.publish(screen_share, audio, video).await {
            tracing::error!("publish: ingress {} could not publish: {}", ingress_id, err);
            return format!("ERROR: {}", err);
        }

        let publisher_id = Uuid::new_v4().to_string();
        *entry.publisher_mut(screen_share) = Some(publisher_id.clone());
        self.publishers
            .lock()
            .await
            .insert(publisher_id.clone(), (ingress_id.to_owned(), screen_share));
        publisher_id
    }

    pub async fn unpublish(&self, screen_share: bool, publisher_id: &str) -> String {
        let ingress_id = match self.publishers.lock().await.get(publisher_id) {
            Some((ingress_id, _)) => ingress_id.clone(),
            None => {
                tracing::debug!("unpublish: cannot find publisher {}", publisher_id);
                return "ERROR: publisher not found".to_owned();
            }
        };
        tracing::debug!(
            "unpublish: publisher {}, screen_share {} on ingress {}",
            publisher_id,
            screen_share,
            ingress_id
        );

        let mut ingresses = self.ingresses.lock().await;
        let Some(entry) = ingresses.get_mut(&ingress_id) else {
            return "ERROR: ingress not available".to_owned();
        };
        if entry.publisher_mut(screen_share).is_none() {
            return "ERROR: Not publishing".to_owned();
        }
        if let Err(err) = entry.ingress.unpublish(screen_share).await {
            return format!("ERROR: {}", err);
        }

        *entry.publisher_mut(screen_share) = None;
        self.publishers.lock().await.remove(publisher_id);
        publisher_id.to_owned()
    }
}
