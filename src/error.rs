//! Ошибки по компонентам.
//!
//! Транспортные ошибки (`SignalingError`) поглощаются внутри канала: они
//! попадают в лог и в причину `Disconnected`, пользователю видна только
//! связность. Пользователю показывается `SessionError`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Почему локальное медиа недоступно
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    PermissionDenied,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("media unavailable: {0:?}")]
    Unavailable(UnavailableReason),
    #[error("media device busy: {0}")]
    Busy(String),
    #[error("media backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid signaling url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("signaling transport error: {0}")]
    Transport(String),
    #[error("signaling channel closed")]
    Closed,
    #[error("signaling codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerLinkError {
    /// Нарушение контракта вызывающей стороной, а не пользовательская ошибка
    #[error("a negotiation is already in flight")]
    AlreadyNegotiating,
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("signal payload error: {0}")]
    Codec(String),
}

impl From<webrtc::Error> for PeerLinkError {
    fn from(err: webrtc::Error) -> Self {
        PeerLinkError::NegotiationFailed(err.to_string())
    }
}

/// Ошибка, видимая пользователю. Одновременно видна только одна.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionError {
    #[error("could not access camera/microphone: {0}")]
    MediaUnavailable(String),
    #[error("camera/microphone is in use by another application")]
    MediaBusy,
    #[error("failed to join: {0}")]
    JoinRejected(String),
    #[error("connection failed, try again ({0})")]
    NegotiationFailed(String),
    #[error("connection failed, try again (timed out)")]
    NegotiationTimedOut,
    #[error("lost connection to the matching server")]
    SignalingLost,
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            // без действия пользователя (разрешение, освобождение устройства) повтор бесполезен
            SessionError::MediaUnavailable(_) | SessionError::MediaBusy => false,
            _ => true,
        }
    }
}

impl From<MediaError> for SessionError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Unavailable(UnavailableReason::PermissionDenied) => {
                SessionError::MediaUnavailable("permission denied".into())
            }
            MediaError::Unavailable(UnavailableReason::NotFound) => {
                SessionError::MediaUnavailable("no capture device found".into())
            }
            MediaError::Busy(_) => SessionError::MediaBusy,
            MediaError::Backend(reason) => SessionError::MediaUnavailable(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid ICE server {id}: {reason}")]
    InvalidIceServer { id: String, reason: String },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Ошибки запуска клиента
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialise peer link: {0}")]
    PeerLink(#[from] PeerLinkError),
}
