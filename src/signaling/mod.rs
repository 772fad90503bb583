//! Сигнальный канал к серверу подбора пар.
//!
//! Все намерения (`request_match`, `leave`, `send_chat`, `relay_signal`)
//! отправляются без ожидания ответа. Ответы сервера и состояние связи
//! приходят как `SignalingEvent` в очередь координатора.

pub mod backoff;
pub mod protocol;
pub mod ws;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::chat::LogicalTime;
use crate::peer::types::PeerSignal;
use crate::session::{PeerAddress, SessionId};

pub use ws::WsSignalingChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub video: bool,
    pub audio: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Индикатор связности для UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    /// Каждая попытка переподключения видна координатору
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    Assigned {
        session_id: SessionId,
    },
    PeerJoined {
        session_id: SessionId,
        remote: PeerAddress,
    },
    PeerLeft {
        session_id: SessionId,
    },
    ChatReceived {
        session_id: SessionId,
        text: String,
        sent_at: LogicalTime,
    },
    PresenceCount {
        count: u64,
    },
    JoinError {
        reason: String,
    },
    PeerSignal {
        session_id: SessionId,
        from: PeerAddress,
        signal: PeerSignal,
    },
}

pub trait SignalingChannel: Send + Sync {
    fn request_match(&self, local: &PeerAddress, capabilities: &Capabilities);

    /// Повторный вызов для завершённой сессии безопасен
    fn leave(&self, session_id: &SessionId);

    /// Без подтверждения доставки
    fn send_chat(&self, session_id: &SessionId, text: &str, sent_at: LogicalTime);

    /// Пересылка offer/answer/candidate собеседнику через сервер
    fn relay_signal(&self, session_id: &SessionId, to: &PeerAddress, signal: PeerSignal);
}
