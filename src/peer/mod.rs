pub mod codec;
pub mod connection;
pub mod ice;
pub mod link;
pub mod state;
pub mod types;

pub use link::WebRtcPeerLink;
pub use types::{IceCandidate, IncomingOffer, PeerLinkEvent, PeerSignal, SdpPayload, ServerConfig};

use crate::error::PeerLinkError;
use crate::media::MediaHandle;
use crate::session::{PeerAddress, SessionId};

/// Одно peer-to-peer соединение. Не больше одного согласования за раз.
///
/// Методы не блокируют: согласование идёт в фоне, результат приходит
/// как `PeerLinkEvent`.
pub trait PeerLink: Send {
    fn offer(
        &mut self,
        session_id: &SessionId,
        remote: &PeerAddress,
        local: &MediaHandle,
    ) -> Result<(), PeerLinkError>;

    fn accept_incoming(
        &mut self,
        offer: IncomingOffer,
        local: &MediaHandle,
    ) -> Result<(), PeerLinkError>;

    /// Сигнал от собеседника. Offer, не относящийся к текущему
    /// согласованию, возвращается вызывающему для решения.
    fn deliver_signal(
        &mut self,
        session_id: &SessionId,
        from: &PeerAddress,
        signal: PeerSignal,
    ) -> Option<IncomingOffer>;

    /// Идемпотентно, безопасно без активного соединения
    fn teardown(&mut self);
}
