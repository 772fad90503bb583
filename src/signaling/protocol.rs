use serde::{Deserialize, Serialize};

use crate::chat::LogicalTime;
use crate::peer::types::PeerSignal;
use crate::session::{PeerAddress, SessionId};
use crate::signaling::{Capabilities, SignalingEvent};

/// Клиент → сервер
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    RequestMatch {
        local_peer_address: PeerAddress,
        capabilities: Capabilities,
    },
    #[serde(rename_all = "camelCase")]
    Leave { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    SendChat {
        session_id: SessionId,
        text: String,
        sent_at_logical_time: LogicalTime,
    },
    #[serde(rename_all = "camelCase")]
    Signal {
        session_id: SessionId,
        to: PeerAddress,
        payload: PeerSignal,
    },
    Ping,
}

/// Сервер → клиент
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Assigned { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        session_id: SessionId,
        remote_peer_address: PeerAddress,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft { session_id: SessionId },
    #[serde(rename_all = "camelCase")]
    ChatReceived {
        session_id: SessionId,
        text: String,
        sent_at_logical_time: LogicalTime,
    },
    PresenceCount { count: u64 },
    JoinError { reason: String },
    #[serde(rename_all = "camelCase")]
    Signal {
        session_id: SessionId,
        from: PeerAddress,
        payload: PeerSignal,
    },
    Pong,
}

impl ServerMessage {
    /// `None` для служебных сообщений, которые координатору не нужны
    pub fn into_event(self) -> Option<SignalingEvent> {
        let event = match self {
            ServerMessage::Assigned { session_id } => SignalingEvent::Assigned { session_id },
            ServerMessage::PeerJoined {
                session_id,
                remote_peer_address,
            } => SignalingEvent::PeerJoined {
                session_id,
                remote: remote_peer_address,
            },
            ServerMessage::PeerLeft { session_id } => SignalingEvent::PeerLeft { session_id },
            ServerMessage::ChatReceived {
                session_id,
                text,
                sent_at_logical_time,
            } => SignalingEvent::ChatReceived {
                session_id,
                text,
                sent_at: sent_at_logical_time,
            },
            ServerMessage::PresenceCount { count } => SignalingEvent::PresenceCount { count },
            ServerMessage::JoinError { reason } => SignalingEvent::JoinError { reason },
            ServerMessage::Signal {
                session_id,
                from,
                payload,
            } => SignalingEvent::PeerSignal {
                session_id,
                from,
                signal: payload,
            },
            ServerMessage::Pong => return None,
        };
        Some(event)
    }
}
