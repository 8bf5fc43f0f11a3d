mod common;

use std::sync::Arc;

use common::*;
use trackrelay::{
    config::{MediaKind, RelayConfig, TrackSource},
    endpoint::Endpoint,
    sink::SourceBin,
};

fn endpoint(connector: &Arc<MockConnector>) -> Endpoint {
    init_tracing();
    Endpoint::new(connector.clone(), RelayConfig::default())
}

fn source(name: &str) -> Option<Arc<dyn SourceBin>> {
    Some(Arc::new(MockSource(name.to_owned())))
}

#[tokio::test]
async fn connect_reuses_room_session() {
    let connector = MockConnector::new(vec![]);
    let endpoint = endpoint(&connector);

    let first = endpoint.connect(params("demo"), None, None).await;
    let again = endpoint.connect(params("demo"), Some(""), None).await;
    let other = endpoint.connect(params("other"), None, None).await;

    assert!(first.starts_with("GSTEG_"));
    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(connector.room_count(), 2);
}

#[tokio::test]
async fn connect_failure_returns_empty() {
    let connector = MockConnector::failing();
    let endpoint = endpoint(&connector);

    assert_eq!(endpoint.connect(params("demo"), None, None).await, "");
    assert_eq!(
        endpoint.connect(params("demo"), Some("camera"), None).await,
        ""
    );
}

#[tokio::test]
async fn connect_ingress() {
    let connector = MockConnector::new(vec![]);
    let endpoint = endpoint(&connector);

    let generated = endpoint.connect(params("demo"), Some("camera"), None).await;
    assert!(generated.starts_with("GSTIG_"));

    let chosen = endpoint
        .connect(params("demo"), Some("camera"), Some("GSTIG_mine"))
        .await;
    assert_eq!(chosen, "GSTIG_mine");
    let again = endpoint
        .connect(params("demo"), Some("camera"), Some("GSTIG_mine"))
        .await;
    assert_eq!(again, "GSTIG_mine");
    assert_eq!(connector.ingress_count(), 2);
}

#[tokio::test]
async fn disconnect_egress() {
    let connector = MockConnector::new(vec![participant(
        "alice",
        vec![publication("TR_mic", MediaKind::Audio, TrackSource::Microphone)],
    )]);
    let endpoint = endpoint(&connector);

    assert_eq!(
        endpoint.disconnect("GSTEG_nope").await,
        "ERROR: Egress GSTEG_nope is not available"
    );

    let egress_id = endpoint.connect(params("demo"), None, None).await;
    let subscriber_id = endpoint
        .subscribe("alice", false, &egress_id, Some(MockSinkBin::new()), None)
        .await;
    assert_eq!(
        endpoint.disconnect(&egress_id).await,
        "ERROR: room demo already has active subscriptions"
    );

    assert_eq!(endpoint.unsubscribe(&subscriber_id).await, subscriber_id);
    assert_eq!(endpoint.disconnect(&egress_id).await, "");
    assert!(connector.room(0).is_disconnected());
    assert!(endpoint.session(&egress_id).await.is_none());
    assert_eq!(
        endpoint.disconnect(&egress_id).await,
        format!("ERROR: Egress {} is not available", egress_id)
    );
}

#[tokio::test]
async fn disconnect_ingress() {
    let connector = MockConnector::new(vec![]);
    let endpoint = endpoint(&connector);

    assert_eq!(
        endpoint.disconnect("GSTIG_nope").await,
        "ERROR: Ingress GSTIG_nope is not available"
    );

    let ingress_id = endpoint.connect(params("demo"), Some("camera"), None).await;
    let publisher_id = endpoint
        .publish(false, &ingress_id, source("mic"), source("cam"))
        .await;
    assert_eq!(
        endpoint.disconnect(&ingress_id).await,
        format!("ERROR: ingress {} already has active publisher", ingress_id)
    );

    assert_eq!(endpoint.unpublish(false, &publisher_id).await, publisher_id);
    assert_eq!(endpoint.disconnect(&ingress_id).await, ingress_id);
    assert!(connector.ingress(0).is_disconnected());
}

#[tokio::test]
async fn subscribe_and_unsubscribe_unknown_ids() {
    let connector = MockConnector::new(vec![]);
    let endpoint = endpoint(&connector);

    assert_eq!(
        endpoint
            .subscribe("alice", false, "GSTEG_nope", None, None)
            .await,
        "ERROR: Egress GSTEG_nope not available"
    );
    assert_eq!(
        endpoint.unsubscribe("nope").await,
        "ERROR: Subscriber with id nope does not exist"
    );
    assert!(!endpoint.request_key_frame("nope").await);
}

#[tokio::test]
async fn publish_and_unpublish() {
    let connector = MockConnector::new(vec![]);
    let endpoint = endpoint(&connector);
    let ingress_id = endpoint.connect(params("demo"), Some("camera"), None).await;

    assert_eq!(
        endpoint.publish(false, "GSTIG_nope", None, source("cam")).await,
        "ERROR: ingress not available"
    );

    let main = endpoint.publish(false, &ingress_id, source("mic"), None).await;
    assert!(!main.starts_with("ERROR"));
    assert_eq!(
        endpoint.publish(false, &ingress_id, source("mic"), None).await,
        "ERROR: Already publishing"
    );
    let screen = endpoint.publish(true, &ingress_id, None, source("screen")).await;
    assert!(!screen.starts_with("ERROR"));
    assert_ne!(main, screen);
    assert_eq!(*connector.ingress(0).published.lock(), vec![false, true]);

    assert_eq!(
        endpoint.unpublish(false, "nope").await,
        "ERROR: publisher not found"
    );
    assert_eq!(endpoint.unpublish(true, &screen).await, screen);
    assert_eq!(
        endpoint.unpublish(true, &screen).await,
        "ERROR: publisher not found"
    );
    assert_eq!(
        endpoint.unpublish(true, &main).await,
        "ERROR: Not publishing"
    );
    assert_eq!(endpoint.unpublish(false, &main).await, main);
}

#[tokio::test]
async fn ingress_failures_are_reported() {
    let connector = Arc::new(MockConnector {
        ingress_failure: Some("encoder unavailable".to_owned()),
        ..Default::default()
    });
    let endpoint = endpoint(&connector);
    let ingress_id = endpoint.connect(params("demo"), Some("camera"), None).await;

    assert_eq!(
        endpoint.publish(false, &ingress_id, source("mic"), None).await,
        "ERROR: encoder unavailable"
    );
    assert_eq!(endpoint.disconnect(&ingress_id).await, ingress_id);
}
