pub mod chat;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use config::Config;
pub use coordinator::{CoordinatorHandle, Notice, SessionCoordinator, SessionSnapshot, Settings};
pub use error::StartupError;

use media::TrackMediaSource;
use peer::WebRtcPeerLink;
use session::PeerAddress;
use signaling::WsSignalingChannel;

/// Запущенный клиент: ручка для UI и задача координатора
pub struct Client {
    pub handle: CoordinatorHandle,
    pub local_address: PeerAddress,
    task: JoinHandle<()>,
}

impl Client {
    /// Ждём, пока координатор не остановится (после `shutdown`)
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "coordinator task failed");
        }
    }
}

/// Собирает клиент по конфигурации и запускает цикл координатора.
/// Должна вызываться внутри tokio runtime.
pub fn start(config: &Config) -> Result<Client, StartupError> {
    config.validate()?;
    let url = config.websocket_url()?;
    let local_address = PeerAddress::generate();

    let (signaling_tx, signaling_rx) = mpsc::unbounded_channel();
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();

    let signaling =
        WsSignalingChannel::connect(url.clone(), config.reconnect.clone(), signaling_tx);
    let link = WebRtcPeerLink::new(
        config.ice_servers.clone(),
        config.link_grace_period,
        signaling.clone(),
        peer_tx,
    )?;

    let (coordinator, handle) = SessionCoordinator::new(
        Settings::from_config(config),
        local_address.clone(),
        Arc::new(TrackMediaSource::new()),
        signaling,
        Box::new(link),
        signaling_rx,
        peer_rx,
    );

    info!(
        local = %local_address,
        signaling = %url,
        ice_servers = config.ice_servers.len(),
        "client started"
    );
    let task = tokio::spawn(coordinator.run());

    Ok(Client {
        handle,
        local_address,
        task,
    })
}
