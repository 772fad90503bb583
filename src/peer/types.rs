use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::media::RemoteMedia;
use crate::session::{PeerAddress, SessionId};

/// Полезная нагрузка SDP с метаданными
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SdpPayload {
    pub sdp: RTCSessionDescription,
    /// ID сессии, к которой относится описание
    pub id: String,
    pub ts: i64,
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    pub connection_id: String, // ID соединения для сопоставления
}

impl IceCandidate {
    pub fn from_init(init: RTCIceCandidateInit, connection_id: String) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            connection_id,
        }
    }

    pub fn to_init(&self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: self.sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Сообщение канала peer-media, которое сигнальный сервер пересылает
/// собеседнику как есть. `sdp` закодирован через `codec::enc`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
}

/// Входящий offer, адресованный нам
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingOffer {
    pub session_id: SessionId,
    pub remote: PeerAddress,
    pub sdp: String,
}

/// События PeerLink. Все несут сессию и собеседника, чтобы координатор
/// мог отбросить устаревшие.
#[derive(Debug, Clone)]
pub enum PeerLinkEvent {
    RemoteStreamArrived {
        session_id: SessionId,
        remote: PeerAddress,
        stream: RemoteMedia,
    },
    NegotiationFailed {
        session_id: SessionId,
        remote: PeerAddress,
        reason: String,
    },
    LinkLost {
        session_id: SessionId,
        remote: PeerAddress,
    },
}

impl PeerLinkEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            PeerLinkEvent::RemoteStreamArrived { session_id, .. }
            | PeerLinkEvent::NegotiationFailed { session_id, .. }
            | PeerLinkEvent::LinkLost { session_id, .. } => session_id,
        }
    }

    pub fn remote(&self) -> &PeerAddress {
        match self {
            PeerLinkEvent::RemoteStreamArrived { remote, .. }
            | PeerLinkEvent::NegotiationFailed { remote, .. }
            | PeerLinkEvent::LinkLost { remote, .. } => remote,
        }
    }
}
