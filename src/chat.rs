use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::session::SessionId;

/// Логическое время: порядок отправки/получения на этом клиенте
pub type LogicalTime = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub sent_at_logical_time: LogicalTime,
    pub direction: Direction,
    /// Только для отображения, порядок по нему не строится
    pub at: DateTime<Utc>,
}

/// Буфер сообщений одной сессии
#[derive(Debug, Default)]
pub struct ChatRelay {
    session: Option<SessionId>,
    clock: LogicalTime,
    messages: Vec<ChatMessage>,
}

impl ChatRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Привязывает буфер к новой сессии, старые сообщения уходят
    pub fn begin(&mut self, session: SessionId) {
        debug!(session_id = %session, "chat scoped to session");
        self.messages.clear();
        self.session = Some(session);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.session = None;
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn tick(&mut self) -> LogicalTime {
        self.clock += 1;
        self.clock
    }

    /// Возвращает `None`, если буфер не привязан или текст пустой
    pub fn record_sent(&mut self, text: &str) -> Option<ChatMessage> {
        let text = text.trim();
        if text.is_empty() || self.session.is_none() {
            return None;
        }
        let msg = ChatMessage {
            text: text.to_owned(),
            sent_at_logical_time: self.tick(),
            direction: Direction::Sent,
            at: Utc::now(),
        };
        self.messages.push(msg.clone());
        Some(msg)
    }

    /// Сообщения чужой сессии отбрасываются
    pub fn record_received(&mut self, session: &SessionId, text: String) -> Option<ChatMessage> {
        if self.session.as_ref() != Some(session) {
            debug!(session_id = %session, "dropping chat for inactive session");
            return None;
        }
        let msg = ChatMessage {
            text,
            sent_at_logical_time: self.tick(),
            direction: Direction::Received,
            at: Utc::now(),
        };
        self.messages.push(msg.clone());
        Some(msg)
    }
}
