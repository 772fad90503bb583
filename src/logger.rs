use once_cell::sync::OnceCell;
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::LoggingConfig;

static INIT: OnceCell<()> = OnceCell::new();

/// Подписчик tracing с временными метками. Повторные вызовы ничего не делают.
pub fn init(config: &LoggingConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }

        // RUST_LOG имеет приоритет над конфигурацией
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.filter.as_str()));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_owned()))
            .with_target(true)
            .try_init();
    });
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub async fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            label,
            candidate = %init.candidate,
            sdp_mid = ?init.sdp_mid,
            sdp_mline_index = ?init.sdp_mline_index,
            "trickle candidate"
        );
    }
}

/// Быстрый снимок getStats → выбранная пара
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                debug!(
                    moment,
                    local = %pair.local_candidate_id,
                    remote = %pair.remote_candidate_id,
                    bytes_sent = pair.bytes_sent,
                    bytes_received = pair.bytes_received,
                    state = ?pair.state,
                    "selected candidate pair"
                );
            }
        }
    }
}
