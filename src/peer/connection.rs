use std::sync::{Arc, Weak};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::error::PeerLinkError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::ice::analyze_candidates;
use crate::peer::state::LinkContext;
use crate::peer::types::{IceCandidate, PeerSignal, ServerConfig};
use crate::utils::add_ice_url_scheme;

/// API с кодеками по умолчанию (VP8/Opus и т.д.)
pub fn build_api() -> Result<API, PeerLinkError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Серверы из конфигурации → формат webrtc
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Создаём peer и вешаем обработчики; все события идут через `ctx`
pub async fn new_peer(
    api: &API,
    config: RTCConfiguration,
    ctx: Arc<LinkContext>,
) -> Result<Arc<RTCPeerConnection>, PeerLinkError> {
    let pc = Arc::new(api.new_peer_connection(config).await?);

    // Локальные кандидаты сразу уходят собеседнику (trickle)
    let cand_ctx = Arc::clone(&ctx);
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let ctx = Arc::clone(&cand_ctx);
        Box::pin(async move {
            match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c).await;
                    if let Ok(init) = c.to_json() {
                        let candidate = IceCandidate::from_init(init, ctx.session_id.to_string());
                        let total = ctx.record_local_candidate(candidate.clone());
                        debug!(total, "added local ICE candidate");
                        ctx.relay(PeerSignal::Candidate(candidate));
                    }
                }
                None => {
                    // cand == None означает конец сбора
                    debug!("ICE candidate gathering completed");
                    analyze_candidates(&ctx.local_candidates());
                }
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let track_ctx = Arc::clone(&ctx);
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            info!(kind = %track.kind(), stream_id = %track.stream_id(), "remote track arrived");
            track_ctx.on_remote_track(track);
            Box::pin(async {})
        },
    ));

    // слабая ссылка, чтобы обработчик не держал соединение живым
    let pc_state: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
    let state_ctx = Arc::clone(&ctx);

    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        debug!(state = ?st, "peer connection state changed");
        let ctx = Arc::clone(&state_ctx);

        match st {
            RTCPeerConnectionState::Connected => {
                ctx.cancel_disconnect_task();
                if let Some(pc) = pc_state.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "CONNECTED").await;
                    });
                }
            }

            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                // уже ожидаем? – ничего не делаем
                if ctx.has_disconnect_task() || ctx.is_closed() {
                    return Box::pin(async {});
                }

                if let Some(pc) = pc_state.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }

                info!(
                    grace_secs = ctx.grace_period.as_secs(),
                    "peer connection {:?}, starting grace period", st
                );

                // ставим отложенную проверку
                let weak = pc_state.clone();
                let grace_ctx = Arc::clone(&ctx);
                let handle = tokio::spawn(async move {
                    sleep(grace_ctx.grace_period).await;
                    grace_ctx.clear_disconnect_task();

                    let state_now = weak
                        .upgrade()
                        .map(|pc| pc.connection_state())
                        .unwrap_or(RTCPeerConnectionState::Closed);

                    // соединение так и не восстановилось
                    if state_now != RTCPeerConnectionState::Connected {
                        warn!(state = ?state_now, "peer connection did not recover");
                        grace_ctx.link_lost();
                    } else {
                        debug!("connection recovered during grace period");
                    }
                });
                ctx.set_disconnect_task(handle);
            }

            RTCPeerConnectionState::Closed => {
                ctx.cancel_disconnect_task();
            }

            _ => {}
        }
        Box::pin(async {})
    }));

    Ok(pc)
}
