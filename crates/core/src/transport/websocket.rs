//! Data-channel transport over a WebSocket.
//!
//! Connects to the descriptor's URL with the token as a bearer credential,
//! then proxies control messages in both directions. Media is not carried:
//! the track snapshot is always empty and the mic/cam flags are only
//! recorded.

use super::{
    ConnectionDescriptor, Tracks, Transport, TransportError, TransportEvents, TransportState,
};
use crate::{messages::ControlMessage, sync::lock};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message as WsMessage},
};
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Default)]
struct Shared {
    events: OnceLock<TransportEvents>,
    state: Mutex<TransportState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    mic: AtomicBool,
    cam: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: TransportState) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if !previous.can_transition_to(state) {
            warn!(from = %previous, to = %state, "Unexpected transport state transition.");
        }
        if let Some(events) = self.events.get() {
            events.state_changed(state);
        }
    }

    /// Moves `connected → disconnected` once, tearing down the channel.
    /// Returns `false` if the connection was already gone.
    fn close(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != TransportState::Connected {
                return false;
            }
            *state = TransportState::Disconnected;
        }
        lock(&self.outbound).take();
        if let Some(events) = self.events.get() {
            events.state_changed(TransportState::Disconnected);
            events.disconnected();
        }
        true
    }
}

/// The default transport: control messages as WebSocket text frames.
#[derive(Default)]
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(&self, reason: String) -> TransportError {
        self.shared.set_state(TransportState::Error);
        TransportError::Connection(reason)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn attach(&mut self, events: TransportEvents) {
        if self.shared.events.set(events).is_err() {
            warn!("Transport already attached to a session; keeping the first.");
        }
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError> {
        self.shared.set_state(TransportState::Connecting);

        let mut request = descriptor
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| self.fail(format!("invalid room URL: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", descriptor.token))
            .map_err(|e| self.fail(format!("invalid token: {e}")))?;
        request.headers_mut().insert("Authorization", bearer);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| self.fail(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();
        info!(room = %descriptor.url, "WebSocket connected.");

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(
            async move {
                while let Some(frame) = rx.recv().await {
                    if let Err(e) = sink.send(frame).await {
                        warn!(error = %e, "Failed to write frame; closing writer.");
                        break;
                    }
                }
                let _ = sink.close().await;
            }
            .instrument(info_span!("ws_writer")),
        );
        *lock(&self.shared.outbound) = Some(tx);
        self.shared.set_state(TransportState::Connected);
        if let Some(events) = self.shared.events.get() {
            events.connected();
        }

        // Spawned last: a remote close must find the connection already up.
        let shared = self.shared.clone();
        let reader = tokio::spawn(
            async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => {
                            if let Some(events) = shared.events.get() {
                                events.message_received(text.as_str());
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("Remote closed the connection.");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "WebSocket read failed.");
                            break;
                        }
                    }
                }
                shared.close();
            }
            .instrument(info_span!("ws_reader")),
        );

        *lock(&self.shared.reader) = Some(reader);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(tx) = lock(&self.shared.outbound).as_ref() {
            let _ = tx.send(WsMessage::Close(None));
        }
        if let Some(reader) = lock(&self.shared.reader).take() {
            reader.abort();
        }
        if self.shared.close() {
            info!("WebSocket disconnected.");
        }
        Ok(())
    }

    fn send_message(&self, message: ControlMessage) -> Result<(), TransportError> {
        let text = message
            .serialize()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        match lock(&self.shared.outbound).as_ref() {
            Some(tx) => tx
                .send(WsMessage::Text(text.into()))
                .map_err(|_| TransportError::Send("writer task has stopped".into())),
            None => Err(TransportError::NotConnected),
        }
    }

    fn enable_mic(&self, enable: bool) {
        debug!(enable, "Mic flag set; this transport carries no media.");
        self.shared.mic.store(enable, Ordering::SeqCst);
    }

    fn is_mic_enabled(&self) -> bool {
        self.shared.mic.load(Ordering::SeqCst)
    }

    fn enable_cam(&self, enable: bool) {
        self.shared.cam.store(enable, Ordering::SeqCst);
    }

    fn is_cam_enabled(&self) -> bool {
        self.shared.cam.load(Ordering::SeqCst)
    }

    fn state(&self) -> TransportState {
        *lock(&self.shared.state)
    }

    fn set_state(&self, state: TransportState) {
        self.shared.set_state(state);
    }

    fn tracks(&self) -> Tracks {
        Tracks::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use tokio::net::TcpListener;

    fn attached() -> (WebSocketTransport, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let mut transport = WebSocketTransport::new();
        transport.attach(TransportEvents::new(bus.clone()));
        (transport, bus)
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let (transport, _bus) = attached();

        let result = transport.send_message(ControlMessage::interrupt());

        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(transport.disconnect().await.is_ok());
        assert_eq!(transport.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_connect_with_invalid_url_sets_error() {
        let (transport, _bus) = attached();
        let descriptor = ConnectionDescriptor {
            url: "not a url".into(),
            token: "t".into(),
        };

        let result = transport.connect(&descriptor).await;

        assert!(matches!(result, Err(TransportError::Connection(_))));
        assert_eq!(transport.state(), TransportState::Error);
    }

    #[tokio::test]
    async fn test_round_trip_with_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            // Echo a transcript for every frame received.
            if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                let received: ControlMessage = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(received.kind, "tts-speak");
                let reply = r#"{"type":"transcript","tag":"realtime-ai","data":{"text":"hello","final":true}}"#;
                ws.send(WsMessage::Text(reply.to_string().into())).await.unwrap();
            }
            let _ = ws.next().await;
        });

        let (transport, bus) = attached();
        let mut transcripts = bus.transcript.listen();
        let mut disconnects = bus.disconnected.listen();
        let descriptor = ConnectionDescriptor {
            url: format!("ws://{addr}"),
            token: "t".into(),
        };

        transport.connect(&descriptor).await.unwrap();
        assert_eq!(transport.state(), TransportState::Connected);
        transport
            .send_message(ControlMessage::speak("hi", false))
            .unwrap();

        let transcript = transcripts.recv().await.unwrap();
        assert_eq!(transcript.text, "hello");
        assert!(transcript.is_final);

        transport.disconnect().await.unwrap();
        assert_eq!(disconnects.recv().await, Some(()));
        assert_eq!(transport.state(), TransportState::Disconnected);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_close_right_after_accept_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (transport, bus) = attached();
        let mut disconnects = bus.disconnected.listen();
        let descriptor = ConnectionDescriptor {
            url: format!("ws://{addr}"),
            token: "t".into(),
        };

        transport.connect(&descriptor).await.unwrap();
        let disconnected =
            tokio::time::timeout(std::time::Duration::from_secs(5), disconnects.recv()).await;

        assert_eq!(disconnected.unwrap(), Some(()));
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(matches!(
            transport.send_message(ControlMessage::interrupt()),
            Err(TransportError::NotConnected)
        ));
        server.await.unwrap();
    }
}
