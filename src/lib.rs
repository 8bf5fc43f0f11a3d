#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Trackrelay
//! Trackrelay relays the RTP packets of remote publisher tracks into downstream media sinks. Each remote track gets a [`relay::PacketRelay`] that drops packets after a stream discontinuity until the next keyframe, throttles keyframe requests and batches retransmission requests, while a [`subscription::Subscription`] fans its output out to any number of subscribers.
//!
//! ## Usage
//! Create an [`endpoint::Endpoint`] with your own [`remote::Connector`], connect to a room and subscribe with one [`sink::SinkBin`] per media kind.

/// Configuration for [`relay::PacketRelay`] and the media types shared across the crate.
pub mod config;
/// Host facing operations that answer with identifiers or `ERROR: ` strings.
pub mod endpoint;
pub mod error;
/// Subscriber list shared by the relays of a subscription.
pub mod fanout;
/// One-shot signal used to stop relay workers.
pub mod fuse;
/// Keyframe detection and gap tracking.
pub mod gap;
/// Lookup tables from track and subscriber ids to subscriptions.
pub mod registry;
/// Relay is a module that pumps packets of one remote track into subscribers.
pub mod relay;
/// Interfaces of the media server connection.
pub mod remote;
/// NACK batching.
pub mod retransmission;
/// Session is a module that follows the events of one room connection.
pub mod session;
/// Downstream pipeline interfaces.
pub mod sink;
pub mod subscriber;
/// Subscription lifecycle for one participant.
pub mod subscription;
pub mod track;
pub mod transport;
