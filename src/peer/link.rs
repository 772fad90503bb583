use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::API;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::PeerLinkError;
use crate::media::MediaHandle;
use crate::peer::codec::{dec, enc};
use crate::peer::connection::{build_api, new_peer, rtc_config};
use crate::peer::ice::{add_ice_candidate, apply_pending_candidates};
use crate::peer::state::LinkContext;
use crate::peer::types::{
    IceCandidate, IncomingOffer, PeerLinkEvent, PeerSignal, SdpPayload, ServerConfig,
};
use crate::peer::PeerLink;
use crate::session::{PeerAddress, SessionId};
use crate::signaling::SignalingChannel;

// Кандидаты, пришедшие раньше, чем мы приняли offer
const MAX_EARLY_CANDIDATES: usize = 64;

struct Negotiation {
    ctx: Arc<LinkContext>,
    signals: mpsc::UnboundedSender<PeerSignal>,
}

/// PeerLink на webrtc-rs. Offer/answer/candidate идут через сигнальный сервер.
pub struct WebRtcPeerLink {
    api: Arc<API>,
    ice_servers: Vec<ServerConfig>,
    grace_period: Duration,
    signaling: Arc<dyn SignalingChannel>,
    events: mpsc::UnboundedSender<PeerLinkEvent>,
    current: Option<Negotiation>,
    early: Vec<(SessionId, PeerAddress, IceCandidate)>,
}

impl WebRtcPeerLink {
    pub fn new(
        ice_servers: Vec<ServerConfig>,
        grace_period: Duration,
        signaling: Arc<dyn SignalingChannel>,
        events: mpsc::UnboundedSender<PeerLinkEvent>,
    ) -> Result<Self, PeerLinkError> {
        Ok(Self {
            api: Arc::new(build_api()?),
            ice_servers,
            grace_period,
            signaling,
            events,
            current: None,
            early: Vec::new(),
        })
    }

    fn start(
        &mut self,
        session_id: &SessionId,
        remote: &PeerAddress,
        local: &MediaHandle,
        offer: Option<String>,
    ) -> Result<(), PeerLinkError> {
        if self.current.is_some() {
            return Err(PeerLinkError::AlreadyNegotiating);
        }

        let ctx = Arc::new(LinkContext::new(
            session_id.clone(),
            remote.clone(),
            self.grace_period,
            self.events.clone(),
            Arc::clone(&self.signaling),
        ));

        let early = std::mem::take(&mut self.early);
        for (sid, from, candidate) in early {
            if &sid == session_id && &from == remote {
                ctx.pending.push(candidate);
            }
        }

        let (signals, signals_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_negotiation(
            Arc::clone(&self.api),
            rtc_config(&self.ice_servers),
            Arc::clone(&ctx),
            local.clone(),
            offer,
            signals_rx,
        ));

        self.current = Some(Negotiation { ctx, signals });
        Ok(())
    }
}

impl PeerLink for WebRtcPeerLink {
    fn offer(
        &mut self,
        session_id: &SessionId,
        remote: &PeerAddress,
        local: &MediaHandle,
    ) -> Result<(), PeerLinkError> {
        info!(session_id = %session_id, remote = %remote, "starting offer");
        self.start(session_id, remote, local, None)
    }

    fn accept_incoming(
        &mut self,
        offer: IncomingOffer,
        local: &MediaHandle,
    ) -> Result<(), PeerLinkError> {
        info!(session_id = %offer.session_id, remote = %offer.remote, "accepting incoming offer");
        self.start(&offer.session_id, &offer.remote, local, Some(offer.sdp))
    }

    fn deliver_signal(
        &mut self,
        session_id: &SessionId,
        from: &PeerAddress,
        signal: PeerSignal,
    ) -> Option<IncomingOffer> {
        if let Some(current) = &self.current {
            if &current.ctx.session_id == session_id && &current.ctx.remote == from {
                let _ = current.signals.send(signal);
                return None;
            }
        }

        match signal {
            PeerSignal::Offer { sdp } => Some(IncomingOffer {
                session_id: session_id.clone(),
                remote: from.clone(),
                sdp,
            }),
            PeerSignal::Candidate(candidate) => {
                if self.early.len() < MAX_EARLY_CANDIDATES {
                    self.early.push((session_id.clone(), from.clone(), candidate));
                } else {
                    debug!("early candidate buffer full, dropping candidate");
                }
                None
            }
            PeerSignal::Answer { .. } => {
                debug!(session_id = %session_id, "answer without a matching negotiation");
                None
            }
        }
    }

    fn teardown(&mut self) {
        self.early.clear();
        let Some(current) = self.current.take() else {
            return;
        };
        info!(session_id = %current.ctx.session_id, "tearing down peer link");
        if let Some(pc) = current.ctx.close() {
            tokio::spawn(async move {
                if let Err(e) = pc.close().await {
                    debug!(error = %e, "peer connection close failed");
                }
            });
        }
    }
}

async fn run_negotiation(
    api: Arc<API>,
    config: RTCConfiguration,
    ctx: Arc<LinkContext>,
    local: MediaHandle,
    offer: Option<String>,
    signals: mpsc::UnboundedReceiver<PeerSignal>,
) {
    if let Err(e) = negotiate(&api, config, Arc::clone(&ctx), &local, offer, signals).await {
        warn!(session_id = %ctx.session_id, error = %e, "negotiation failed");
        ctx.fail(e.to_string());
    }
}

async fn negotiate(
    api: &API,
    config: RTCConfiguration,
    ctx: Arc<LinkContext>,
    local: &MediaHandle,
    offer: Option<String>,
    mut signals: mpsc::UnboundedReceiver<PeerSignal>,
) -> Result<(), PeerLinkError> {
    let pc = new_peer(api, config, Arc::clone(&ctx)).await?;
    ctx.attach_peer(Arc::clone(&pc));

    // teardown мог случиться, пока создавали соединение
    if ctx.is_closed() {
        let _ = pc.close().await;
        return Ok(());
    }

    for track in local.tracks() {
        pc.add_track(Arc::clone(track)).await?;
    }

    match offer {
        None => {
            debug!("creating offer");
            let offer = pc.create_offer(None).await?;
            pc.set_local_description(offer).await?;
            let sdp = encode_local(&pc, &ctx).await?;
            ctx.relay(PeerSignal::Offer { sdp });
        }
        Some(encoded) => {
            let payload = decode_for(&ctx, &encoded)?;
            debug!("setting remote description (offer)");
            pc.set_remote_description(payload.sdp).await?;
            apply_pending_candidates(&pc, &ctx.pending).await;

            debug!("creating answer");
            let answer = pc.create_answer(None).await?;
            pc.set_local_description(answer).await?;
            let sdp = encode_local(&pc, &ctx).await?;
            ctx.relay(PeerSignal::Answer { sdp });
        }
    }

    while let Some(signal) = signals.recv().await {
        match signal {
            PeerSignal::Answer { sdp } => {
                let payload = decode_for(&ctx, &sdp)?;
                debug!("setting remote description (answer)");
                pc.set_remote_description(payload.sdp).await?;
                apply_pending_candidates(&pc, &ctx.pending).await;
            }
            PeerSignal::Candidate(candidate) => {
                add_ice_candidate(&pc, &ctx.pending, candidate).await;
            }
            PeerSignal::Offer { .. } => {
                debug!("ignoring offer inside a running negotiation");
            }
        }
    }
    Ok(())
}

async fn encode_local(pc: &RTCPeerConnection, ctx: &LinkContext) -> Result<String, PeerLinkError> {
    let sdp = pc
        .local_description()
        .await
        .ok_or_else(|| PeerLinkError::NegotiationFailed("no local description".into()))?;
    enc(&SdpPayload {
        sdp,
        id: ctx.session_id.to_string(),
        ts: chrono::Utc::now().timestamp(),
    })
}

fn decode_for(ctx: &LinkContext, encoded: &str) -> Result<SdpPayload, PeerLinkError> {
    let payload = dec(encoded)?;
    if payload.id != ctx.session_id.as_str() {
        return Err(PeerLinkError::NegotiationFailed(format!(
            "description for session {} does not match {}",
            payload.id, ctx.session_id
        )));
    }
    Ok(payload)
}
