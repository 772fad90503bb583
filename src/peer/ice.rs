use std::sync::Mutex;
use tracing::{debug, warn};
use webrtc::peer_connection::RTCPeerConnection;

use crate::peer::types::IceCandidate;

/// Кандидаты, полученные до установки remote description
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Mutex<Vec<IceCandidate>>,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, candidate: IceCandidate) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candidate);
    }

    pub fn drain(&self) -> Vec<IceCandidate> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Применяет кандидат от удалённой стороны; до remote description откладывает его
pub async fn add_ice_candidate(
    pc: &RTCPeerConnection,
    pending: &PendingCandidates,
    candidate: IceCandidate,
) {
    if pc.remote_description().await.is_none() {
        debug!("remote description not set yet, queuing candidate");
        pending.push(candidate);
        return;
    }

    match pc.add_ice_candidate(candidate.to_init()).await {
        Ok(_) => debug!("added remote ICE candidate"),
        Err(e) => warn!(error = %e, "failed to add ICE candidate"),
    }
}

/// Применяет все отложенные кандидаты после установки remote description
pub async fn apply_pending_candidates(pc: &RTCPeerConnection, pending: &PendingCandidates) {
    for candidate in pending.drain() {
        debug!(candidate = %candidate.candidate, "applying pending candidate");
        if let Err(e) = pc.add_ice_candidate(candidate.to_init()).await {
            warn!(error = %e, "failed to apply pending candidate");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );

    if summary.relay == 0 {
        debug!("no TURN relay candidates found, connection through NAT may fail");
    }
    summary
}
