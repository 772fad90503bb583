#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;

use roulette_lib::chat::LogicalTime;
use roulette_lib::coordinator::{
    CoordinatorHandle, Notice, SessionCoordinator, SessionSnapshot, Settings,
};
use roulette_lib::error::{MediaError, PeerLinkError};
use roulette_lib::media::{MediaConstraints, MediaHandle, MediaSource, RemoteMedia};
use roulette_lib::peer::{IncomingOffer, PeerLink, PeerLinkEvent, PeerSignal};
use roulette_lib::session::{PeerAddress, SessionId, SessionState};
use roulette_lib::signaling::{Capabilities, SignalingChannel, SignalingEvent};

pub fn sid(id: &str) -> SessionId {
    SessionId::new(id)
}

pub fn addr(addr: &str) -> PeerAddress {
    PeerAddress::new(addr)
}

/// Даём актору разобрать очередь. Время на паузе, поэтому таймеры
/// координатора не сдвигаются.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ---------- сигнальный канал ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    RequestMatch(PeerAddress),
    Leave(SessionId),
    Chat(SessionId, String, LogicalTime),
    Signal(SessionId, PeerAddress, PeerSignal),
}

#[derive(Default)]
pub struct FakeSignaling {
    intents: Mutex<Vec<Intent>>,
}

impl FakeSignaling {
    pub fn intents(&self) -> Vec<Intent> {
        self.intents.lock().unwrap().clone()
    }

    pub fn match_requests(&self) -> usize {
        self.intents()
            .iter()
            .filter(|i| matches!(i, Intent::RequestMatch(_)))
            .count()
    }

    pub fn leaves(&self) -> Vec<SessionId> {
        self.intents()
            .into_iter()
            .filter_map(|i| match i {
                Intent::Leave(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn chats(&self) -> Vec<String> {
        self.intents()
            .into_iter()
            .filter_map(|i| match i {
                Intent::Chat(_, text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, intent: Intent) {
        self.intents.lock().unwrap().push(intent);
    }
}

impl SignalingChannel for FakeSignaling {
    fn request_match(&self, local: &PeerAddress, _: &Capabilities) {
        self.push(Intent::RequestMatch(local.clone()));
    }

    fn leave(&self, session_id: &SessionId) {
        self.push(Intent::Leave(session_id.clone()));
    }

    fn send_chat(&self, session_id: &SessionId, text: &str, sent_at: LogicalTime) {
        self.push(Intent::Chat(session_id.clone(), text.to_owned(), sent_at));
    }

    fn relay_signal(&self, session_id: &SessionId, to: &PeerAddress, signal: PeerSignal) {
        self.push(Intent::Signal(session_id.clone(), to.clone(), signal));
    }
}

// ---------- PeerLink ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Offer(SessionId, PeerAddress),
    Accept(SessionId, PeerAddress),
    Teardown,
}

#[derive(Clone, Default)]
pub struct LinkLog(Arc<Mutex<Vec<LinkCall>>>);

impl LinkLog {
    pub fn calls(&self) -> Vec<LinkCall> {
        self.0.lock().unwrap().clone()
    }

    /// Только offer/accept, без teardown
    pub fn negotiations(&self) -> Vec<LinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| *c != LinkCall::Teardown)
            .collect()
    }

    fn push(&self, call: LinkCall) {
        self.0.lock().unwrap().push(call);
    }
}

/// Ведёт себя как настоящий PeerLink: одно согласование за раз,
/// offer для текущего согласования уходит внутрь.
pub struct FakePeerLink {
    log: LinkLog,
    current: Option<(SessionId, PeerAddress)>,
    // teardown не освобождает согласование
    stuck: bool,
}

impl FakePeerLink {
    pub fn new(log: LinkLog) -> Self {
        Self {
            log,
            current: None,
            stuck: false,
        }
    }

    /// Предыдущее согласование так и не было снято
    pub fn busy(log: LinkLog) -> Self {
        Self {
            current: Some((sid("r0"), addr("P0"))),
            ..Self::new(log)
        }
    }

    /// Занят, и teardown не помогает
    pub fn stuck(log: LinkLog) -> Self {
        Self {
            stuck: true,
            ..Self::busy(log)
        }
    }

    fn begin(&mut self, session_id: &SessionId, remote: &PeerAddress) -> Result<(), PeerLinkError> {
        if self.current.is_some() {
            return Err(PeerLinkError::AlreadyNegotiating);
        }
        self.current = Some((session_id.clone(), remote.clone()));
        Ok(())
    }
}

impl PeerLink for FakePeerLink {
    fn offer(
        &mut self,
        session_id: &SessionId,
        remote: &PeerAddress,
        _: &MediaHandle,
    ) -> Result<(), PeerLinkError> {
        self.begin(session_id, remote)?;
        self.log
            .push(LinkCall::Offer(session_id.clone(), remote.clone()));
        Ok(())
    }

    fn accept_incoming(
        &mut self,
        offer: IncomingOffer,
        _: &MediaHandle,
    ) -> Result<(), PeerLinkError> {
        self.begin(&offer.session_id, &offer.remote)?;
        self.log.push(LinkCall::Accept(offer.session_id, offer.remote));
        Ok(())
    }

    fn deliver_signal(
        &mut self,
        session_id: &SessionId,
        from: &PeerAddress,
        signal: PeerSignal,
    ) -> Option<IncomingOffer> {
        if self.current.as_ref() == Some(&(session_id.clone(), from.clone())) {
            return None;
        }
        match signal {
            PeerSignal::Offer { sdp } => Some(IncomingOffer {
                session_id: session_id.clone(),
                remote: from.clone(),
                sdp,
            }),
            _ => None,
        }
    }

    fn teardown(&mut self) {
        if !self.stuck {
            self.current = None;
        }
        self.log.push(LinkCall::Teardown);
    }
}

// ---------- медиа ----------

pub struct FakeMedia {
    result: Result<MediaHandle, MediaError>,
    delay: Duration,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl FakeMedia {
    pub fn ready() -> Self {
        Self::delayed(Duration::ZERO)
    }

    pub fn delayed(delay: Duration) -> Self {
        Self {
            result: Ok(MediaHandle::new("local")),
            delay,
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: MediaError) -> Self {
        Self {
            result: Err(err),
            ..Self::ready()
        }
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self, _: &MediaConstraints) -> Result<MediaHandle, MediaError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------- обвязка ----------

pub struct Harness {
    pub handle: CoordinatorHandle,
    pub signaling: Arc<FakeSignaling>,
    pub links: LinkLog,
    pub media: Arc<FakeMedia>,
    pub local: PeerAddress,
    signaling_tx: mpsc::UnboundedSender<SignalingEvent>,
    peer_tx: mpsc::UnboundedSender<PeerLinkEvent>,
    notices: broadcast::Receiver<Notice>,
}

impl Harness {
    pub fn start(local: &str) -> Self {
        Self::with(local, FakeMedia::ready(), Settings::default())
    }

    pub fn with(local: &str, media: FakeMedia, settings: Settings) -> Self {
        Self::with_link(local, media, settings, FakePeerLink::new)
    }

    pub fn with_link(
        local: &str,
        media: FakeMedia,
        settings: Settings,
        link: impl FnOnce(LinkLog) -> FakePeerLink,
    ) -> Self {
        let signaling = Arc::new(FakeSignaling::default());
        let media = Arc::new(media);
        let links = LinkLog::default();
        let (signaling_tx, signaling_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        let (coordinator, handle) = SessionCoordinator::new(
            settings,
            addr(local),
            media.clone(),
            signaling.clone(),
            Box::new(link(links.clone())),
            signaling_rx,
            peer_rx,
        );
        let notices = handle.notices();
        tokio::spawn(coordinator.run());

        Self {
            handle,
            signaling,
            links,
            media,
            local: addr(local),
            signaling_tx,
            peer_tx,
            notices,
        }
    }

    /// Координатор с поднятым сигнальным каналом
    pub async fn connected(local: &str) -> Self {
        let harness = Self::start(local);
        harness.signal(SignalingEvent::Connected).await;
        harness
    }

    pub async fn signal(&self, event: SignalingEvent) {
        self.signaling_tx.send(event).unwrap();
        settle().await;
    }

    pub async fn peer(&self, event: PeerLinkEvent) {
        self.peer_tx.send(event).unwrap();
        settle().await;
    }

    pub async fn search(&self) {
        self.handle.start_search();
        settle().await;
    }

    pub async fn leave(&self) {
        self.handle.leave();
        settle().await;
    }

    pub async fn chat(&self, text: &str) {
        self.handle.send_chat(text);
        settle().await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot().state
    }

    /// Все состояния, в которые координатор переходил с прошлого вызова
    pub fn transitions(&mut self) -> Vec<SessionState> {
        let mut states = Vec::new();
        loop {
            match self.notices.try_recv() {
                Ok(Notice::StateChanged { to, .. }) => states.push(to),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        states
    }

    pub async fn assigned(&self, session: &str) {
        self.signal(SignalingEvent::Assigned {
            session_id: sid(session),
        })
        .await;
    }

    pub async fn peer_joined(&self, session: &str, remote: &str) {
        self.signal(SignalingEvent::PeerJoined {
            session_id: sid(session),
            remote: addr(remote),
        })
        .await;
    }

    pub async fn peer_left(&self, session: &str) {
        self.signal(SignalingEvent::PeerLeft {
            session_id: sid(session),
        })
        .await;
    }

    pub async fn stream_arrived(&self, session: &str, remote: &str) {
        self.peer(PeerLinkEvent::RemoteStreamArrived {
            session_id: sid(session),
            remote: addr(remote),
            stream: RemoteMedia::new(format!("{remote}-stream")),
        })
        .await;
    }

    /// search → assigned → peer joined → remote stream
    pub async fn activate(&self, session: &str, remote: &str) {
        self.search().await;
        self.assigned(session).await;
        self.peer_joined(session, remote).await;
        self.stream_arrived(session, remote).await;
        assert_eq!(self.state(), SessionState::Active);
    }
}
