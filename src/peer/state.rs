use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_remote::TrackRemote;

use crate::media::RemoteMedia;
use crate::peer::ice::PendingCandidates;
use crate::peer::types::{IceCandidate, PeerLinkEvent, PeerSignal};
use crate::session::{PeerAddress, SessionId};
use crate::signaling::SignalingChannel;

/// ========== СОСТОЯНИЕ ОДНОГО СОГЛАСОВАНИЯ ==========
///
/// Живёт от offer/accept до teardown. После `close()` событий больше нет.
pub struct LinkContext {
    pub session_id: SessionId,
    pub remote: PeerAddress,
    pub grace_period: Duration,

    /// Кандидаты, полученные до установки remote description
    pub pending: PendingCandidates,

    /// Локальные кандидаты для текущего соединения
    local_candidates: Mutex<Vec<IceCandidate>>,

    /// WebRTC Peer Connection, появляется после создания
    peer: Mutex<Option<Arc<RTCPeerConnection>>>,

    /// Отложенная задача для graceful disconnect
    disconnect_task: Mutex<Option<JoinHandle<()>>>,

    remote_media: Mutex<Option<RemoteMedia>>,
    closed: AtomicBool,

    events: mpsc::UnboundedSender<PeerLinkEvent>,
    signaling: Arc<dyn SignalingChannel>,
}

impl LinkContext {
    pub fn new(
        session_id: SessionId,
        remote: PeerAddress,
        grace_period: Duration,
        events: mpsc::UnboundedSender<PeerLinkEvent>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        Self {
            session_id,
            remote,
            grace_period,
            pending: PendingCandidates::new(),
            local_candidates: Mutex::new(Vec::new()),
            peer: Mutex::new(None),
            disconnect_task: Mutex::new(None),
            remote_media: Mutex::new(None),
            closed: AtomicBool::new(false),
            events,
            signaling,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn attach_peer(&self, pc: Arc<RTCPeerConnection>) {
        *self.peer.lock().unwrap_or_else(|e| e.into_inner()) = Some(pc);
    }

    pub fn relay(&self, signal: PeerSignal) {
        if self.is_closed() {
            return;
        }
        self.signaling
            .relay_signal(&self.session_id, &self.remote, signal);
    }

    pub fn record_local_candidate(&self, candidate: IceCandidate) -> usize {
        let mut local = self
            .local_candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        local.push(candidate);
        local.len()
    }

    pub fn local_candidates(&self) -> Vec<IceCandidate> {
        self.local_candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Первая дорожка создаёт удалённый поток и сообщает о нём,
    /// следующие добавляются в тот же поток.
    pub fn on_remote_track(&self, track: Arc<TrackRemote>) {
        let mut slot = self.remote_media.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(media) => {
                debug!(kind = %track.kind(), "additional remote track");
                media.add_track(track);
            }
            None => {
                let media = RemoteMedia::from_track(track);
                *slot = Some(media.clone());
                drop(slot);
                self.emit(PeerLinkEvent::RemoteStreamArrived {
                    session_id: self.session_id.clone(),
                    remote: self.remote.clone(),
                    stream: media,
                });
            }
        }
    }

    pub fn fail(&self, reason: String) {
        self.emit(PeerLinkEvent::NegotiationFailed {
            session_id: self.session_id.clone(),
            remote: self.remote.clone(),
            reason,
        });
    }

    pub fn link_lost(&self) {
        self.emit(PeerLinkEvent::LinkLost {
            session_id: self.session_id.clone(),
            remote: self.remote.clone(),
        });
    }

    fn emit(&self, event: PeerLinkEvent) {
        if self.is_closed() {
            debug!(session_id = %self.session_id, "link closed, dropping event");
            return;
        }
        let _ = self.events.send(event);
    }

    pub fn has_disconnect_task(&self) -> bool {
        self.disconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn set_disconnect_task(&self, handle: JoinHandle<()>) {
        *self
            .disconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn clear_disconnect_task(&self) {
        self.disconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// отменяем отложенный disconnect, если он был
    pub fn cancel_disconnect_task(&self) {
        if let Some(handle) = self
            .disconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            debug!("aborting pending disconnect task");
            handle.abort();
        }
    }

    /// Закрывает контекст и возвращает соединение, которое нужно закрыть
    pub fn close(&self) -> Option<Arc<RTCPeerConnection>> {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_disconnect_task();
        self.pending.drain();
        self.remote_media
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.peer.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
