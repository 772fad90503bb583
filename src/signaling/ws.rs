use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::chat::LogicalTime;
use crate::config::ReconnectPolicy;
use crate::error::SignalingError;
use crate::peer::types::PeerSignal;
use crate::session::{PeerAddress, SessionId};
use crate::signaling::backoff::Backoff;
use crate::signaling::protocol::{ClientMessage, ServerMessage};
use crate::signaling::{Capabilities, SignalingChannel, SignalingEvent};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Сигнальный канал поверх WebSocket с JSON-сообщениями.
/// Переподключается сам, о каждой попытке сообщает событием.
pub struct WsSignalingChannel {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

enum PumpExit {
    Shutdown,
    Lost(SignalingError),
}

impl WsSignalingChannel {
    pub fn connect(
        url: Url,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<SignalingEvent>,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(connection_loop(
            url,
            policy,
            outbound_rx,
            events,
            Arc::clone(&connected),
        ));

        Arc::new(Self {
            outbound,
            connected,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, message: ClientMessage) {
        // Намерения без связи не копим: координатор повторит их после переподключения
        if !self.is_connected() {
            debug!(target: "signaling", ?message, "dropping intent while disconnected");
            return;
        }
        if self.outbound.send(message).is_err() {
            debug!(target: "signaling", "signaling writer is gone");
        }
    }
}

impl SignalingChannel for WsSignalingChannel {
    fn request_match(&self, local: &PeerAddress, capabilities: &Capabilities) {
        self.send(ClientMessage::RequestMatch {
            local_peer_address: local.clone(),
            capabilities: *capabilities,
        });
    }

    fn leave(&self, session_id: &SessionId) {
        self.send(ClientMessage::Leave {
            session_id: session_id.clone(),
        });
    }

    fn send_chat(&self, session_id: &SessionId, text: &str, sent_at: LogicalTime) {
        self.send(ClientMessage::SendChat {
            session_id: session_id.clone(),
            text: text.to_owned(),
            sent_at_logical_time: sent_at,
        });
    }

    fn relay_signal(&self, session_id: &SessionId, to: &PeerAddress, signal: PeerSignal) {
        self.send(ClientMessage::Signal {
            session_id: session_id.clone(),
            to: to.clone(),
            payload: signal,
        });
    }
}

impl Drop for WsSignalingChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

async fn connection_loop(
    url: Url,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<SignalingEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::new(policy);

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(target: "signaling", url = %url, "signaling websocket connected");
                backoff.reset();
                connected.store(true, Ordering::SeqCst);
                if events.send(SignalingEvent::Connected).is_err() {
                    return;
                }

                let exit = pump(ws_stream, &mut outbound, &events).await;
                connected.store(false, Ordering::SeqCst);

                match exit {
                    PumpExit::Shutdown => {
                        debug!(target: "signaling", "signaling channel shut down");
                        return;
                    }
                    PumpExit::Lost(SignalingError::Closed) => {
                        info!(target: "signaling", "signaling websocket closed");
                        let reason = SignalingError::Closed.to_string();
                        if events.send(SignalingEvent::Disconnected { reason }).is_err() {
                            return;
                        }
                    }
                    PumpExit::Lost(err) => {
                        warn!(target: "signaling", error = %err, "signaling connection lost");
                        let reason = err.to_string();
                        if events.send(SignalingEvent::Disconnected { reason }).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                let err = connect_failure(&url, err);
                warn!(target: "signaling", url = %url, error = %err, "signaling connect failed");
            }
        }

        let delay = backoff.next_delay();
        let attempt = backoff.attempt();
        debug!(target: "signaling", attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        if events
            .send(SignalingEvent::Reconnecting { attempt, delay })
            .is_err()
        {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

async fn pump<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
    events: &mpsc::UnboundedSender<SignalingEvent>,
) -> PumpExit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = ws_write.close().await;
                    return PumpExit::Shutdown;
                };
                match serde_json::to_string(&message).map_err(SignalingError::from) {
                    Ok(text) => {
                        trace!(target: "signaling", event = "ws_out", len = text.len());
                        if let Err(err) = ws_write.send(Message::text(text)).await {
                            return PumpExit::Lost(transport_failure(err));
                        }
                    }
                    Err(err) => warn!(target: "signaling", error = %err, "failed to encode intent"),
                }
            }
            incoming = ws_read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        trace!(
                            target: "signaling",
                            event = "ws_in",
                            kind = "text",
                            len = text.len()
                        );
                        dispatch(serde_json::from_str::<ServerMessage>(&text), events);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        trace!(
                            target: "signaling",
                            event = "ws_in",
                            kind = "binary",
                            len = data.len()
                        );
                        dispatch(serde_json::from_slice::<ServerMessage>(&data), events);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return PumpExit::Lost(SignalingError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return PumpExit::Lost(transport_failure(err)),
                }
            }
            _ = heartbeat.tick() => {
                if let Ok(text) = serde_json::to_string(&ClientMessage::Ping) {
                    if let Err(err) = ws_write.send(Message::text(text)).await {
                        return PumpExit::Lost(transport_failure(err));
                    }
                }
            }
        }
    }
}

fn dispatch(
    parsed: Result<ServerMessage, serde_json::Error>,
    events: &mpsc::UnboundedSender<SignalingEvent>,
) {
    match parsed.map_err(SignalingError::from) {
        Ok(message) => {
            if let Some(event) = message.into_event() {
                let _ = events.send(event);
            }
        }
        Err(err) => debug!(target: "signaling", error = %err, "ignoring malformed server message"),
    }
}

// Ошибки URL (в том числе wss без TLS) отдельно от сетевых
fn connect_failure(url: &Url, err: WsError) -> SignalingError {
    match err {
        WsError::Url(reason) => SignalingError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        },
        other => SignalingError::Connect(other.to_string()),
    }
}

fn transport_failure(err: WsError) -> SignalingError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => SignalingError::Closed,
        other => SignalingError::Transport(other.to_string()),
    }
}
