use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    ConfigError(#[from] serde_json::Error),
    #[error(transparent)]
    SessionError(#[from] SessionError),
    #[error(transparent)]
    SubscriptionError(#[from] SubscriptionError),
    #[error(transparent)]
    RelayError(#[from] RelayError),
    #[error(transparent)]
    SinkError(#[from] SinkError),
}

impl Error {
    pub fn new_session(message: String, kind: SessionErrorKind) -> Self {
        Error::SessionError(SessionError { kind, message })
    }

    pub fn new_subscription(message: String, kind: SubscriptionErrorKind) -> Self {
        Error::SubscriptionError(SubscriptionError { kind, message })
    }

    pub fn new_relay(message: String, kind: RelayErrorKind) -> Self {
        Error::RelayError(RelayError { kind, message })
    }

    pub fn new_sink(message: String, kind: SinkErrorKind) -> Self {
        Error::SinkError(SinkError { kind, message })
    }
}

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// Raised by [`crate::remote::Connector`] and [`crate::remote::Ingress`] implementations.
    ConnectionError,
}

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct SubscriptionError {
    pub kind: SubscriptionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionErrorKind {
    SubscriberNotFoundError,
    TrackNotWantedError,
}

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct RelayError {
    pub kind: RelayErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayErrorKind {
    UnsupportedCodecError,
    RelayAlreadyExistsError,
    InvalidTrackKindError,
}

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct SinkError {
    pub kind: SinkErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkErrorKind {
    UnsupportedCapsError,
    BuildError,
}

/// Outcome of a failed read from a remote track, classified by how the relay reacts to it.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ReadError {
    /// The read buffer could not hold the packet. The relay keeps going.
    #[error("buffer too small")]
    BufferTooSmall,
    /// Nothing arrived within the read deadline.
    #[error("i/o timeout")]
    Timeout,
    /// The remote side closed the track.
    #[error("end of stream")]
    EndOfStream,
    #[error("{0}")]
    Other(String),
}

impl From<webrtc_util::Error> for ReadError {
    fn from(err: webrtc_util::Error) -> Self {
        match err {
            webrtc_util::Error::ErrBufferShort => ReadError::BufferTooSmall,
            webrtc_util::Error::ErrTimeout => ReadError::Timeout,
            webrtc_util::Error::ErrBufferClosed => ReadError::EndOfStream,
            err => ReadError::Other(err.to_string()),
        }
    }
}

impl From<webrtc::error::Error> for ReadError {
    fn from(err: webrtc::error::Error) -> Self {
        match err {
            webrtc::error::Error::ErrDataChannelNotOpen | webrtc::error::Error::ErrClosedPipe => {
                ReadError::EndOfStream
            }
            webrtc::error::Error::Interceptor(webrtc::interceptor::Error::Srtp(
                webrtc_srtp::Error::Util(webrtc_util::Error::ErrBufferClosed),
            )) => ReadError::EndOfStream,
            webrtc::error::Error::Util(err) => err.into(),
            err => ReadError::Other(err.to_string()),
        }
    }
}
