//! Координатор жизненного цикла сессии.
//!
//! Один актор сводит события сигнального канала, PeerLink, таймеров и
//! команды пользователя в одно состояние сессии. Обработчик синхронный:
//! всё долгое (захват медиа, согласование, таймеры) идёт в фоне и
//! возвращается в очередь событием.

pub mod events;
pub mod handle;

pub use events::{Command, Event, Notice};
pub use handle::{CoordinatorHandle, SessionSnapshot};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::chat::{ChatMessage, ChatRelay};
use crate::config::{Config, NEGOTIATION_TIMEOUT, SIGNALING_GRACE_PERIOD};
use crate::error::{MediaError, PeerLinkError, SessionError};
use crate::media::{MediaConstraints, MediaHandle, MediaSource};
use crate::peer::types::{IncomingOffer, PeerLinkEvent, PeerSignal};
use crate::peer::PeerLink;
use crate::session::{NegotiationRole, PeerAddress, Session, SessionId, SessionState};
use crate::signaling::{Capabilities, Connectivity, SignalingChannel, SignalingEvent};

// Сколько завершённых сессий помним, чтобы узнавать их запоздалые события
const RETIRED_CAPACITY: usize = 32;
const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub negotiation_timeout: Duration,
    pub signaling_grace_period: Duration,
    pub media: MediaConstraints,
    pub capabilities: Capabilities,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            signaling_grace_period: SIGNALING_GRACE_PERIOD,
            media: MediaConstraints::default(),
            capabilities: Capabilities::default(),
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            negotiation_timeout: config.negotiation_timeout,
            signaling_grace_period: config.signaling_grace_period,
            media: config.media.clone(),
            capabilities: config.capabilities(),
        }
    }
}

pub struct SessionCoordinator {
    settings: Settings,
    local_address: PeerAddress,
    media: Arc<dyn MediaSource>,
    signaling: Arc<dyn SignalingChannel>,
    link: Box<dyn PeerLink>,

    session: Session,
    chat: ChatRelay,
    local_media: Option<MediaHandle>,
    /// Offer, пришедший раньше, чем мы вошли в Negotiating
    pending_offer: Option<IncomingOffer>,
    error: Option<SessionError>,
    connectivity: Connectivity,
    presence: Option<u64>,

    /// Завершённые сессии и те, для которых уже отправлен leave
    retired: VecDeque<SessionId>,
    left: VecDeque<SessionId>,

    restart_pending: bool,
    next_epoch: u64,
    outage: u64,
    shut_down: bool,

    queue: mpsc::UnboundedSender<Event>,
    queue_rx: mpsc::UnboundedReceiver<Event>,
    commands: mpsc::UnboundedReceiver<Command>,
    signaling_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerLinkEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl SessionCoordinator {
    pub fn new(
        settings: Settings,
        local_address: PeerAddress,
        media: Arc<dyn MediaSource>,
        signaling: Arc<dyn SignalingChannel>,
        link: Box<dyn PeerLink>,
        signaling_rx: mpsc::UnboundedReceiver<SignalingEvent>,
        peer_rx: mpsc::UnboundedReceiver<PeerLinkEvent>,
    ) -> (Self, CoordinatorHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) =
            watch::channel(SessionSnapshot::initial(local_address.clone()));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let handle = CoordinatorHandle::new(commands_tx, snapshot_rx, notices.clone());

        let coordinator = Self {
            settings,
            local_address,
            media,
            signaling,
            link,
            session: Session::idle(),
            chat: ChatRelay::new(),
            local_media: None,
            pending_offer: None,
            error: None,
            connectivity: Connectivity::Disconnected,
            presence: None,
            retired: VecDeque::new(),
            left: VecDeque::new(),
            restart_pending: false,
            next_epoch: 0,
            outage: 0,
            shut_down: false,
            queue,
            queue_rx,
            commands,
            signaling_rx,
            peer_rx,
            snapshot,
            notices,
        };
        (coordinator, handle)
    }

    pub fn local_address(&self) -> &PeerAddress {
        &self.local_address
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn chat(&self) -> &[ChatMessage] {
        self.chat.messages()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Главный цикл: события обрабатываются строго по одному
    pub async fn run(mut self) {
        info!(local = %self.local_address, "session coordinator started");
        while !self.shut_down {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    // все ручки закрыты
                    None => Event::Command(Command::Shutdown),
                },
                Some(event) = self.queue_rx.recv() => event,
                Some(event) = self.signaling_rx.recv() => Event::Signaling(event),
                Some(event) = self.peer_rx.recv() => Event::Peer(event),
            };
            self.handle_event(event);
        }
        info!("session coordinator stopped");
    }

    pub fn handle_event(&mut self, event: Event) {
        if self.shut_down {
            debug!(?event, "coordinator is shut down, dropping event");
            return;
        }
        match event {
            Event::Command(command) => self.on_command(command),
            Event::Signaling(event) => self.on_signaling(event),
            Event::Peer(event) => self.on_peer(event),
            Event::MediaReady { epoch, result } => self.on_media_ready(epoch, result),
            Event::NegotiationDeadline { epoch } => self.on_negotiation_deadline(epoch),
            Event::SignalingGraceElapsed { outage } => self.on_signaling_grace_elapsed(outage),
            Event::CleanupComplete { epoch } => self.on_cleanup_complete(epoch),
        }
        self.publish();
    }

    /// Обрабатывает события, которые координатор уже поставил себе в очередь
    pub fn drain_ready(&mut self) {
        while let Ok(event) = self.queue_rx.try_recv() {
            self.handle_event(event);
        }
    }

    // ---------- команды ----------

    fn on_command(&mut self, command: Command) {
        match command {
            Command::StartSearch => self.start_search(),
            Command::Leave => self.leave(),
            Command::SendChat(text) => self.send_chat(&text),
            Command::ClearError => self.error = None,
            Command::Shutdown => self.shutdown(),
        }
    }

    fn start_search(&mut self) {
        self.error = None;
        match self.session.state {
            SessionState::Idle => self.begin_search(),
            SessionState::Ending => {
                debug!("search requested while ending, deferring until idle");
                self.restart_pending = true;
            }
            state => debug!(%state, "search requested during a live session, ignoring"),
        }
    }

    fn begin_search(&mut self) {
        self.next_epoch += 1;
        let from = self.session.state;
        self.session = Session::searching(self.next_epoch);
        self.announce(from);

        if self.connectivity != Connectivity::Connected {
            self.arm_signaling_grace();
        }
        if self.local_media.is_some() {
            self.request_match();
        } else {
            self.acquire_media();
        }
    }

    fn leave(&mut self) {
        self.error = None;
        self.restart_pending = false;
        match self.session.state {
            SessionState::Idle | SessionState::Ending => debug!("nothing to leave"),
            _ => self.end_session(true),
        }
    }

    fn send_chat(&mut self, text: &str) {
        let session_id = match (self.session.state, &self.session.session_id) {
            (SessionState::Active, Some(id)) => id.clone(),
            _ => {
                debug!("chat outside of an active session, ignoring");
                return;
            }
        };
        let Some(message) = self.chat.record_sent(text) else {
            return;
        };
        self.signaling
            .send_chat(&session_id, &message.text, message.sent_at_logical_time);
        let _ = self.notices.send(Notice::Chat(message));
    }

    fn shutdown(&mut self) {
        info!("shutting down session coordinator");
        if !matches!(self.session.state, SessionState::Idle | SessionState::Ending) {
            self.send_leave();
        }
        self.link.teardown();
        self.local_media = None;
        self.media.release();
        self.chat.clear();
        self.pending_offer = None;
        self.restart_pending = false;

        let from = self.session.state;
        self.session = Session::idle();
        if from != SessionState::Idle {
            self.announce(from);
        }
        self.shut_down = true;
    }

    // ---------- сигнальный канал ----------

    fn on_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => self.on_connected(),
            SignalingEvent::Disconnected { reason } => {
                info!(%reason, state = %self.session.state, "signaling disconnected");
                self.set_connectivity(Connectivity::Disconnected);
                if self.session.state.expects_signaling() {
                    self.arm_signaling_grace();
                }
            }
            SignalingEvent::Reconnecting { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "signaling reconnecting");
                self.set_connectivity(Connectivity::Reconnecting { attempt });
            }
            SignalingEvent::Assigned { session_id } => self.on_assigned(session_id),
            SignalingEvent::PeerJoined { session_id, remote } => {
                self.on_peer_joined(session_id, remote)
            }
            SignalingEvent::PeerLeft { session_id } => self.on_peer_left(session_id),
            SignalingEvent::ChatReceived {
                session_id, text, ..
            } => self.on_chat_received(session_id, text),
            SignalingEvent::PresenceCount { count } => self.presence = Some(count),
            SignalingEvent::JoinError { reason } => self.on_join_error(reason),
            SignalingEvent::PeerSignal {
                session_id,
                from,
                signal,
            } => self.on_peer_signal(session_id, from, signal),
        }
    }

    fn on_connected(&mut self) {
        let was = self.connectivity;
        self.set_connectivity(Connectivity::Connected);
        if was == Connectivity::Connected {
            return;
        }
        // прежнее намерение могло не пережить разрыв; в Active не трогаем
        if matches!(
            self.session.state,
            SessionState::Searching | SessionState::Matched
        ) && self.session.match_requested
        {
            info!(
                state = %self.session.state,
                "signaling reconnected, re-announcing match request"
            );
            self.request_match();
        }
    }

    fn on_assigned(&mut self, session_id: SessionId) {
        if self.is_finished(&session_id) {
            debug!(session_id = %session_id, "assignment for a finished session");
            self.release_stale(&session_id);
            return;
        }
        match (self.session.state, self.session.session_id.as_ref()) {
            (SessionState::Searching, None) => {
                info!(session_id = %session_id, "session assigned, waiting for peer");
                self.session.session_id = Some(session_id);
            }
            (_, Some(current)) if *current == session_id => {
                debug!(session_id = %session_id, "duplicate assignment")
            }
            (state, _) => {
                debug!(session_id = %session_id, %state, "stale assignment");
                self.release_stale(&session_id);
            }
        }
    }

    fn on_peer_joined(&mut self, session_id: SessionId, remote: PeerAddress) {
        if self.is_finished(&session_id) {
            debug!(session_id = %session_id, "peer joined a finished session");
            self.release_stale(&session_id);
            return;
        }
        let same_session = self
            .session
            .session_id
            .as_ref()
            .map_or(true, |current| *current == session_id);

        match self.session.state {
            SessionState::Searching if same_session => {
                if remote == self.local_address {
                    warn!(
                        session_id = %session_id,
                        "matched with our own address, searching again"
                    );
                    self.release_stale(&session_id);
                    self.session.session_id = None;
                    self.pending_offer = None;
                    if self.local_media.is_some() {
                        self.request_match();
                    }
                    return;
                }
                let role = NegotiationRole::resolve(&self.local_address, &remote);
                info!(session_id = %session_id, remote = %remote, ?role, "peer joined");
                self.session.session_id = Some(session_id);
                self.session.remote = Some(remote);
                self.session.role = Some(role);
                self.set_state(SessionState::Matched);

                if self.local_media.is_some() {
                    self.enter_negotiating();
                } else {
                    debug!("waiting for local media before negotiating");
                }
            }
            state if state.has_remote() && same_session => {
                debug!(session_id = %session_id, "duplicate peer joined");
            }
            state => {
                debug!(session_id = %session_id, %state, "stale peer joined");
                self.release_stale(&session_id);
            }
        }
    }

    fn on_peer_left(&mut self, session_id: SessionId) {
        if self.session.is_current(&session_id) && self.session.state.has_remote() {
            info!(session_id = %session_id, "peer left");
            self.end_session(false);
        } else {
            debug!(session_id = %session_id, state = %self.session.state, "stale peer left");
        }
    }

    fn on_chat_received(&mut self, session_id: SessionId, text: String) {
        if self.session.state != SessionState::Active || !self.session.is_current(&session_id) {
            debug!(session_id = %session_id, "chat for an inactive session, dropping");
            return;
        }
        if let Some(message) = self.chat.record_received(&session_id, text) {
            let _ = self.notices.send(Notice::Chat(message));
        }
    }

    fn on_join_error(&mut self, reason: String) {
        match self.session.state {
            SessionState::Searching | SessionState::Matched => {
                self.fail(SessionError::JoinRejected(reason))
            }
            state => debug!(%reason, %state, "join error outside of a search"),
        }
    }

    fn on_peer_signal(&mut self, session_id: SessionId, from: PeerAddress, signal: PeerSignal) {
        if self.is_finished(&session_id) {
            debug!(session_id = %session_id, "signal for a finished session");
            return;
        }
        let state = self.session.state;
        let relevant = match state {
            SessionState::Searching => self
                .session
                .session_id
                .as_ref()
                .map_or(true, |current| *current == session_id),
            SessionState::Matched | SessionState::Negotiating | SessionState::Active => {
                self.session.is_current(&session_id) && self.session.is_remote(&from)
            }
            SessionState::Idle | SessionState::Ending => false,
        };
        if !relevant {
            debug!(session_id = %session_id, remote = %from, %state, "stale peer signal");
            return;
        }

        let Some(offer) = self.link.deliver_signal(&session_id, &from, signal) else {
            return;
        };
        match state {
            SessionState::Searching | SessionState::Matched => {
                debug!(session_id = %session_id, "buffering offer until negotiation starts");
                self.pending_offer = Some(offer);
            }
            SessionState::Negotiating
                if self.session.role == Some(NegotiationRole::Answerer) =>
            {
                self.start_link(Some(offer));
            }
            _ => debug!(session_id = %session_id, %state, "unexpected offer, discarding"),
        }
    }

    // ---------- PeerLink ----------

    fn on_peer(&mut self, event: PeerLinkEvent) {
        if !self.session.is_current(event.session_id()) || !self.session.is_remote(event.remote())
        {
            debug!(
                session_id = %event.session_id(),
                remote = %event.remote(),
                "stale peer link event"
            );
            return;
        }
        let state = self.session.state;
        match event {
            PeerLinkEvent::RemoteStreamArrived {
                session_id, stream, ..
            } => {
                if state != SessionState::Negotiating {
                    debug!(%state, "remote stream outside of negotiation");
                    return;
                }
                info!(
                    session_id = %session_id,
                    stream_id = stream.stream_id(),
                    "remote stream arrived"
                );
                self.session.remote_media = Some(stream.clone());
                self.chat.begin(session_id);
                self.set_state(SessionState::Active);
                let _ = self.notices.send(Notice::RemoteStream(stream));
            }
            PeerLinkEvent::NegotiationFailed { reason, .. } => {
                if state == SessionState::Negotiating {
                    self.fail(SessionError::NegotiationFailed(reason));
                } else {
                    debug!(%state, %reason, "negotiation failure outside of negotiation");
                }
            }
            PeerLinkEvent::LinkLost { .. } => match state {
                SessionState::Negotiating => {
                    self.fail(SessionError::NegotiationFailed("peer connection lost".into()))
                }
                SessionState::Active => {
                    info!("peer link lost");
                    self.end_session(true);
                }
                _ => debug!(%state, "link lost outside of a call"),
            },
        }
    }

    fn enter_negotiating(&mut self) {
        if self.session.state != SessionState::Matched || self.local_media.is_none() {
            return;
        }
        self.set_state(SessionState::Negotiating);
        self.arm_negotiation_deadline();

        match self.session.role {
            Some(NegotiationRole::Offerer) => self.start_link(None),
            Some(NegotiationRole::Answerer) => match self.pending_offer.take() {
                Some(offer)
                    if self.session.is_current(&offer.session_id)
                        && self.session.is_remote(&offer.remote) =>
                {
                    self.start_link(Some(offer))
                }
                Some(offer) => {
                    debug!(
                        session_id = %offer.session_id,
                        "discarding buffered offer for another session"
                    )
                }
                None => debug!("waiting for incoming offer"),
            },
            None => {}
        }
    }

    fn start_link(&mut self, offer: Option<IncomingOffer>) {
        let (Some(session_id), Some(remote), Some(local)) = (
            self.session.session_id.clone(),
            self.session.remote.clone(),
            self.local_media.clone(),
        ) else {
            return;
        };

        let mut result = self.call_link(&session_id, &remote, &local, offer.as_ref());
        if result == Err(PeerLinkError::AlreadyNegotiating) {
            error!(session_id = %session_id, "peer link still busy with a previous negotiation");
            self.link.teardown();
            result = self.call_link(&session_id, &remote, &local, offer.as_ref());
        }
        if let Err(err) = result {
            self.fail(SessionError::NegotiationFailed(err.to_string()));
        }
    }

    fn call_link(
        &mut self,
        session_id: &SessionId,
        remote: &PeerAddress,
        local: &MediaHandle,
        offer: Option<&IncomingOffer>,
    ) -> Result<(), PeerLinkError> {
        match offer {
            None => self.link.offer(session_id, remote, local),
            Some(offer) => self.link.accept_incoming(offer.clone(), local),
        }
    }

    // ---------- медиа и таймеры ----------

    fn acquire_media(&self) {
        let media = Arc::clone(&self.media);
        let constraints = self.settings.media.clone();
        let queue = self.queue.clone();
        let epoch = self.session.epoch;
        debug!(epoch, "acquiring local media");
        tokio::spawn(async move {
            let result = media.acquire(&constraints).await;
            let _ = queue.send(Event::MediaReady { epoch, result });
        });
    }

    fn on_media_ready(&mut self, epoch: u64, result: Result<MediaHandle, MediaError>) {
        match result {
            Ok(handle) => {
                if self.local_media.is_none() {
                    info!(stream_id = handle.stream_id(), "local media ready");
                    self.local_media = Some(handle);
                }
                match self.session.state {
                    SessionState::Searching if !self.session.match_requested => {
                        self.request_match()
                    }
                    SessionState::Matched => self.enter_negotiating(),
                    _ => {}
                }
            }
            Err(err) => {
                let waiting = matches!(
                    self.session.state,
                    SessionState::Searching | SessionState::Matched
                );
                if epoch != self.session.epoch || !waiting {
                    debug!(epoch, error = %err, "media failure for a finished session");
                    return;
                }
                self.fail(SessionError::from(err));
            }
        }
    }

    fn on_negotiation_deadline(&mut self, epoch: u64) {
        if epoch != self.session.epoch || self.session.state != SessionState::Negotiating {
            debug!(epoch, "stale negotiation deadline");
            return;
        }
        warn!(
            timeout_secs = self.settings.negotiation_timeout.as_secs(),
            "negotiation timed out"
        );
        self.fail(SessionError::NegotiationTimedOut);
    }

    fn on_signaling_grace_elapsed(&mut self, outage: u64) {
        if outage != self.outage
            || self.connectivity == Connectivity::Connected
            || !self.session.state.expects_signaling()
        {
            debug!(outage, "stale signaling grace timer");
            return;
        }
        warn!(
            grace_secs = self.settings.signaling_grace_period.as_secs(),
            "signaling still unavailable, giving up on the session"
        );
        self.fail(SessionError::SignalingLost);
    }

    fn on_cleanup_complete(&mut self, epoch: u64) {
        if epoch != self.session.epoch || self.session.state != SessionState::Ending {
            debug!(epoch, "stale cleanup");
            return;
        }
        let from = self.session.state;
        self.session = Session::idle();
        self.announce(from);

        if std::mem::take(&mut self.restart_pending) {
            self.begin_search();
        }
    }

    fn arm_negotiation_deadline(&self) {
        let epoch = self.session.epoch;
        self.schedule(
            self.settings.negotiation_timeout,
            Event::NegotiationDeadline { epoch },
        );
    }

    fn arm_signaling_grace(&mut self) {
        self.outage += 1;
        let outage = self.outage;
        self.schedule(
            self.settings.signaling_grace_period,
            Event::SignalingGraceElapsed { outage },
        );
    }

    fn schedule(&self, after: Duration, event: Event) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = queue.send(event);
        });
    }

    // ---------- переходы ----------

    fn request_match(&mut self) {
        debug!(local = %self.local_address, "requesting match");
        self.signaling
            .request_match(&self.local_address, &self.settings.capabilities);
        self.session.match_requested = true;
    }

    fn fail(&mut self, err: SessionError) {
        warn!(error = %err, retryable = err.is_retryable(), "session failed");
        self.error = Some(err.clone());
        let _ = self.notices.send(Notice::Error(err));
        self.end_session(true);
    }

    /// Вход в Ending: всё освобождается сразу, Idle наступает следующим событием
    fn end_session(&mut self, send_leave: bool) {
        if send_leave {
            self.send_leave();
        }
        self.link.teardown();
        if let Some(id) = self.session.session_id.clone() {
            remember(&mut self.retired, id);
        }
        self.session.remote = None;
        self.session.remote_media = None;
        self.session.role = None;
        self.pending_offer = None;
        self.chat.clear();
        self.set_state(SessionState::Ending);

        let _ = self.queue.send(Event::CleanupComplete {
            epoch: self.session.epoch,
        });
    }

    fn send_leave(&mut self) {
        let Some(id) = self.session.session_id.clone() else {
            return;
        };
        if self.session.leave_sent || self.left.contains(&id) {
            debug!(session_id = %id, "leave already sent");
            return;
        }
        info!(session_id = %id, "leaving session");
        self.signaling.leave(&id);
        self.session.leave_sent = true;
        remember(&mut self.left, id);
    }

    /// Сессия уже закончилась или мы из неё вышли
    fn is_finished(&self, session_id: &SessionId) -> bool {
        self.retired.contains(session_id) || self.left.contains(session_id)
    }

    /// Освобождаем чужую комнату, чтобы собеседник не ждал нас
    fn release_stale(&mut self, session_id: &SessionId) {
        if self.left.contains(session_id) {
            return;
        }
        debug!(session_id = %session_id, "releasing stale session");
        self.signaling.leave(session_id);
        remember(&mut self.left, session_id.clone());
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.session.state;
        self.session.state = to;
        self.announce(from);
    }

    fn announce(&self, from: SessionState) {
        let to = self.session.state;
        let session_id = self.session.session_id.clone();
        info!(
            %from,
            %to,
            session_id = session_id.as_ref().map_or("-", |id| id.as_str()),
            "session state changed"
        );
        let _ = self.notices.send(Notice::StateChanged {
            from,
            to,
            session_id,
        });
    }

    fn set_connectivity(&mut self, connectivity: Connectivity) {
        if self.connectivity == connectivity {
            return;
        }
        self.connectivity = connectivity;
        let _ = self.notices.send(Notice::Connectivity(connectivity));
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            state: self.session.state,
            session_id: self.session.session_id.clone(),
            local_address: self.local_address.clone(),
            remote_address: self.session.remote.clone(),
            local_media: self.local_media.clone(),
            remote_media: self.session.remote_media.clone(),
            chat: self.chat.messages().to_vec(),
            error: self.error.clone(),
            connectivity: self.connectivity,
            presence: self.presence,
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn remember(ids: &mut VecDeque<SessionId>, id: SessionId) {
    if ids.contains(&id) {
        return;
    }
    ids.push_back(id);
    if ids.len() > RETIRED_CAPACITY {
        ids.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::LogicalTime;
    use crate::media::RemoteMedia;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        matches: Mutex<usize>,
        leaves: Mutex<Vec<SessionId>>,
    }

    impl SignalingChannel for Recorder {
        fn request_match(&self, _: &PeerAddress, _: &Capabilities) {
            *self.matches.lock().unwrap() += 1;
        }
        fn leave(&self, session_id: &SessionId) {
            self.leaves.lock().unwrap().push(session_id.clone());
        }
        fn send_chat(&self, _: &SessionId, _: &str, _: LogicalTime) {}
        fn relay_signal(&self, _: &SessionId, _: &PeerAddress, _: PeerSignal) {}
    }

    struct IdleLink;

    impl PeerLink for IdleLink {
        fn offer(
            &mut self,
            _: &SessionId,
            _: &PeerAddress,
            _: &MediaHandle,
        ) -> Result<(), PeerLinkError> {
            Ok(())
        }
        fn accept_incoming(
            &mut self,
            _: IncomingOffer,
            _: &MediaHandle,
        ) -> Result<(), PeerLinkError> {
            Ok(())
        }
        fn deliver_signal(
            &mut self,
            session_id: &SessionId,
            from: &PeerAddress,
            signal: PeerSignal,
        ) -> Option<IncomingOffer> {
            match signal {
                PeerSignal::Offer { sdp } => Some(IncomingOffer {
                    session_id: session_id.clone(),
                    remote: from.clone(),
                    sdp,
                }),
                _ => None,
            }
        }
        fn teardown(&mut self) {}
    }

    struct InstantMedia;

    #[async_trait]
    impl MediaSource for InstantMedia {
        async fn acquire(&self, _: &MediaConstraints) -> Result<MediaHandle, MediaError> {
            Ok(MediaHandle::new("local"))
        }
        fn release(&self) {}
    }

    fn coordinator(local: &str) -> (SessionCoordinator, Arc<Recorder>) {
        let signaling = Arc::new(Recorder::default());
        let (_sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (_peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (coordinator, _handle) = SessionCoordinator::new(
            Settings::default(),
            PeerAddress::new(local),
            Arc::new(InstantMedia),
            signaling.clone(),
            Box::new(IdleLink),
            sig_rx,
            peer_rx,
        );
        (coordinator, signaling)
    }

    /// Довести координатор до Negotiating без фонового захвата медиа
    fn matched(coordinator: &mut SessionCoordinator, remote: &str) {
        coordinator.handle_event(SignalingEvent::Connected.into());
        coordinator.handle_event(Command::StartSearch.into());
        let epoch = coordinator.session().epoch;
        coordinator.handle_event(Event::MediaReady {
            epoch,
            result: Ok(MediaHandle::new("local")),
        });
        coordinator.handle_event(
            SignalingEvent::Assigned {
                session_id: SessionId::new("r1"),
            }
            .into(),
        );
        coordinator.handle_event(
            SignalingEvent::PeerJoined {
                session_id: SessionId::new("r1"),
                remote: PeerAddress::new(remote),
            }
            .into(),
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Config::default();
        config.negotiation_timeout = Duration::from_secs(3);
        config.media.audio = false;
        let settings = Settings::from_config(&config);
        assert_eq!(settings.negotiation_timeout, Duration::from_secs(3));
        assert!(!settings.capabilities.audio);
        assert!(settings.capabilities.video);
    }

    #[test]
    fn remembered_ids_are_bounded() {
        let mut ids = VecDeque::new();
        for n in 0..40 {
            remember(&mut ids, SessionId::new(format!("r{n}")));
        }
        remember(&mut ids, SessionId::new("r39"));
        assert_eq!(ids.len(), RETIRED_CAPACITY);
        assert_eq!(ids.front(), Some(&SessionId::new("r8")));
    }

    #[tokio::test]
    async fn offer_received_before_match_is_answered() {
        let (mut coordinator, _signaling) = coordinator("P9");
        coordinator.handle_event(SignalingEvent::Connected.into());
        coordinator.handle_event(Command::StartSearch.into());
        coordinator.handle_event(
            SignalingEvent::PeerSignal {
                session_id: SessionId::new("r1"),
                from: PeerAddress::new("P1"),
                signal: PeerSignal::Offer { sdp: "o".into() },
            }
            .into(),
        );
        assert!(coordinator.pending_offer.is_some());

        let epoch = coordinator.session().epoch;
        coordinator.handle_event(Event::MediaReady {
            epoch,
            result: Ok(MediaHandle::new("local")),
        });
        coordinator.handle_event(
            SignalingEvent::PeerJoined {
                session_id: SessionId::new("r1"),
                remote: PeerAddress::new("P1"),
            }
            .into(),
        );
        assert_eq!(coordinator.session().state, SessionState::Negotiating);
        assert_eq!(coordinator.session().role, Some(NegotiationRole::Answerer));
        assert!(coordinator.pending_offer.is_none());
    }

    #[tokio::test]
    async fn late_stream_after_leave_is_ignored() {
        let (mut coordinator, signaling) = coordinator("P1");
        matched(&mut coordinator, "P2");
        assert_eq!(coordinator.session().state, SessionState::Negotiating);

        coordinator.handle_event(Command::Leave.into());
        coordinator.drain_ready();
        assert_eq!(coordinator.session().state, SessionState::Idle);

        coordinator.handle_event(
            PeerLinkEvent::RemoteStreamArrived {
                session_id: SessionId::new("r1"),
                remote: PeerAddress::new("P2"),
                stream: RemoteMedia::new("late"),
            }
            .into(),
        );
        assert_eq!(coordinator.session().state, SessionState::Idle);
        assert_eq!(*signaling.leaves.lock().unwrap(), [SessionId::new("r1")]);
    }

    #[tokio::test]
    async fn stale_assignment_is_released_once() {
        let (mut coordinator, signaling) = coordinator("P1");
        let stale = SignalingEvent::Assigned {
            session_id: SessionId::new("old"),
        };
        coordinator.handle_event(stale.clone().into());
        coordinator.handle_event(stale.into());
        assert_eq!(coordinator.session().state, SessionState::Idle);
        assert_eq!(*signaling.leaves.lock().unwrap(), [SessionId::new("old")]);
    }

    #[tokio::test]
    async fn media_failure_ends_search_with_error() {
        let (mut coordinator, signaling) = coordinator("P1");
        coordinator.handle_event(Command::StartSearch.into());
        let epoch = coordinator.session().epoch;
        coordinator.handle_event(Event::MediaReady {
            epoch,
            result: Err(MediaError::Busy("camera".into())),
        });
        coordinator.drain_ready();

        assert_eq!(coordinator.session().state, SessionState::Idle);
        assert_eq!(coordinator.error(), Some(&SessionError::MediaBusy));
        assert_eq!(*signaling.matches.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_leaves_live_session() {
        let (mut coordinator, signaling) = coordinator("P1");
        matched(&mut coordinator, "P0");
        assert_eq!(coordinator.session().role, Some(NegotiationRole::Answerer));

        coordinator.handle_event(Command::Shutdown.into());
        assert!(coordinator.is_shut_down());
        assert_eq!(coordinator.session().state, SessionState::Idle);
        assert_eq!(*signaling.leaves.lock().unwrap(), [SessionId::new("r1")]);

        coordinator.handle_event(Command::StartSearch.into());
        assert_eq!(coordinator.session().state, SessionState::Idle);
    }
}
