use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::chat::ChatMessage;
use crate::coordinator::events::{Command, Notice};
use crate::error::SessionError;
use crate::media::{MediaHandle, RemoteMedia};
use crate::session::{PeerAddress, SessionId, SessionState};
use crate::signaling::Connectivity;

/// Что видит потребитель в каждый момент
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub local_address: PeerAddress,
    pub remote_address: Option<PeerAddress>,
    pub local_media: Option<MediaHandle>,
    pub remote_media: Option<RemoteMedia>,
    pub chat: Vec<ChatMessage>,
    pub error: Option<SessionError>,
    pub connectivity: Connectivity,
    /// Число клиентов онлайн, только для информации
    pub presence: Option<u64>,
}

impl SessionSnapshot {
    pub fn initial(local_address: PeerAddress) -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            local_address,
            remote_address: None,
            local_media: None,
            remote_media: None,
            chat: Vec::new(),
            error: None,
            connectivity: Connectivity::Disconnected,
            presence: None,
        }
    }
}

/// Ручка для UI. Клонируется свободно; команды уходят в очередь
/// координатора и выполняются по порядку.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        snapshot: watch::Receiver<SessionSnapshot>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            commands,
            snapshot,
            notices,
        }
    }

    pub fn start_search(&self) {
        self.send(Command::StartSearch);
    }

    pub fn leave(&self) {
        self.send(Command::Leave);
    }

    pub fn send_chat(&self, text: impl Into<String>) {
        self.send(Command::SendChat(text.into()));
    }

    pub fn clear_error(&self) {
        self.send(Command::ClearError);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("coordinator is gone, command dropped");
        }
    }
}
