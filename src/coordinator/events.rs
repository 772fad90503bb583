use crate::chat::ChatMessage;
use crate::error::{MediaError, SessionError};
use crate::media::{MediaHandle, RemoteMedia};
use crate::peer::types::PeerLinkEvent;
use crate::session::{SessionId, SessionState};
use crate::signaling::{Connectivity, SignalingEvent};

/// Команды пользователя
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartSearch,
    Leave,
    SendChat(String),
    ClearError,
    Shutdown,
}

/// ========== ОЧЕРЕДЬ КООРДИНАТОРА ==========
///
/// Всё, что меняет состояние сессии, приходит сюда и обрабатывается
/// по одному. Таймеры и захват медиа помечены эпохой сессии, которая
/// их запустила.
#[derive(Debug)]
pub enum Event {
    Command(Command),
    Signaling(SignalingEvent),
    Peer(PeerLinkEvent),
    MediaReady {
        epoch: u64,
        result: Result<MediaHandle, MediaError>,
    },
    NegotiationDeadline {
        epoch: u64,
    },
    SignalingGraceElapsed {
        outage: u64,
    },
    CleanupComplete {
        epoch: u64,
    },
}

impl From<Command> for Event {
    fn from(command: Command) -> Self {
        Event::Command(command)
    }
}

impl From<SignalingEvent> for Event {
    fn from(event: SignalingEvent) -> Self {
        Event::Signaling(event)
    }
}

impl From<PeerLinkEvent> for Event {
    fn from(event: PeerLinkEvent) -> Self {
        Event::Peer(event)
    }
}

/// Уведомления для UI
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    StateChanged {
        from: SessionState,
        to: SessionState,
        session_id: Option<SessionId>,
    },
    RemoteStream(RemoteMedia),
    Chat(ChatMessage),
    Error(SessionError),
    Connectivity(Connectivity),
}
