use serde::{Deserialize, Serialize};
use std::fmt;

use crate::media::RemoteMedia;
use crate::utils::random_id;

/// Идентификатор комнаты, выданный сервером после подбора пары
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Адрес клиента в канале peer-media. Сравнение лексикографическое,
/// на нём держится разрешение glare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Адрес на всё время жизни процесса
    pub fn generate() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Searching,
    Matched,
    Negotiating,
    Active,
    Ending,
}

impl SessionState {
    /// Состояния, в которых известен собеседник
    pub fn has_remote(self) -> bool {
        matches!(
            self,
            SessionState::Matched | SessionState::Negotiating | SessionState::Active
        )
    }

    /// Сервер ещё должен довести подбор до конца
    pub fn expects_signaling(self) -> bool {
        matches!(
            self,
            SessionState::Searching | SessionState::Matched | SessionState::Negotiating
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Кто начинает согласование после подбора пары
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

impl NegotiationRole {
    /// Меньший адрес делает offer, второй ждёт входящий
    pub fn resolve(local: &PeerAddress, remote: &PeerAddress) -> Self {
        if local < remote {
            NegotiationRole::Offerer
        } else {
            NegotiationRole::Answerer
        }
    }
}

/// Единица подбора пары. Живёт от `Searching` до возврата в `Idle`.
#[derive(Debug, Clone)]
pub struct Session {
    /// Локальный номер попытки, отсекает устаревшие таймеры
    pub epoch: u64,
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub remote: Option<PeerAddress>,
    pub remote_media: Option<RemoteMedia>,
    pub role: Option<NegotiationRole>,
    pub match_requested: bool,
    pub leave_sent: bool,
}

impl Session {
    pub fn idle() -> Self {
        Self {
            epoch: 0,
            state: SessionState::Idle,
            session_id: None,
            remote: None,
            remote_media: None,
            role: None,
            match_requested: false,
            leave_sent: false,
        }
    }

    pub fn searching(epoch: u64) -> Self {
        Self {
            epoch,
            state: SessionState::Searching,
            ..Self::idle()
        }
    }

    pub fn is_current(&self, session_id: &SessionId) -> bool {
        self.session_id.as_ref() == Some(session_id)
    }

    pub fn is_remote(&self, remote: &PeerAddress) -> bool {
        self.remote.as_ref() == Some(remote)
    }

    /// Инвариант: адрес собеседника задан тогда и только тогда,
    /// когда состояние Matched, Negotiating или Active
    pub fn invariant_holds(&self) -> bool {
        self.remote.is_some() == self.state.has_remote()
    }
}
