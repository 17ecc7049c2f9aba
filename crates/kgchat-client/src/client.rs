//! High-level chat client.
//!
//! [`ChatClient`] wires a [`ConnectionManager`] to an [`EventDispatcher`]:
//! a pump task feeds every inbound frame through the dispatcher in arrival
//! order and re-broadcasts the decoded event to subscribers, who read the
//! derived state through [`ChatClient::state`].

use std::sync::Arc;

use kgchat_core::{ChatMode, ClientError, InboundEvent, OutboundRequest};
use kgchat_settings::KgchatSettings;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::dispatch::EventDispatcher;
use crate::highlight::HighlightSink;
use crate::identity::SessionIdentityStore;
use crate::transport::{Connector, WebSocketConnector};

const EVENT_CAPACITY: usize = 256;

/// Connection plus dispatched state for one chat session.
pub struct ChatClient {
    connection: ConnectionManager,
    state: Arc<Mutex<EventDispatcher>>,
    events: broadcast::Sender<InboundEvent>,
    pump: JoinHandle<()>,
    default_mode: ChatMode,
}

impl ChatClient {
    /// Client over `connector`. Must be called inside a Tokio runtime.
    pub fn new(
        settings: &KgchatSettings,
        connector: Arc<dyn Connector>,
        identity: Arc<SessionIdentityStore>,
        highlights: Box<dyn HighlightSink>,
    ) -> Self {
        let (connection, frames) =
            ConnectionManager::new(ConnectionConfig::from_settings(settings), connector, identity);
        let state = Arc::new(Mutex::new(EventDispatcher::new(
            settings.chat.default_max_rounds,
            highlights,
        )));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pump = tokio::spawn(pump_frames(frames, state.clone(), events.clone()));
        Self {
            connection,
            state,
            events,
            pump,
            default_mode: settings.chat.default_mode,
        }
    }

    /// Client over WebSocket with the configured identity file.
    pub fn websocket(settings: &KgchatSettings, highlights: Box<dyn HighlightSink>) -> Self {
        let identity = Arc::new(SessionIdentityStore::from_settings(&settings.session));
        Self::new(settings, Arc::new(WebSocketConnector), identity, highlights)
    }

    /// Wait the startup delay, then connect.
    pub async fn start(&self) {
        self.connection.start().await;
    }

    /// Send a user turn.
    ///
    /// Fails with [`ClientError::NotConnected`] without touching any state
    /// when the connection is not open. Otherwise per-turn state is reset
    /// before the request is written.
    pub fn send_chat(&self, message: &str, mode: ChatMode) -> Result<(), ClientError> {
        if !self.connection.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.state.lock().begin_turn(message, mode);
        debug!(%mode, len = message.len(), "sending chat");
        self.connection.send(&OutboundRequest::Chat {
            message: message.to_string(),
            mode,
        })
    }

    /// Mode configured as the default.
    pub fn default_mode(&self) -> ChatMode {
        self.default_mode
    }

    /// Decoded events, after they have been applied to [`Self::state`].
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }

    /// Lock the derived state. Do not hold across an await.
    pub fn state(&self) -> MutexGuard<'_, EventDispatcher> {
        self.state.lock()
    }

    /// Connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Close the connection without reconnecting and stop the pump.
    pub async fn shutdown(self) {
        self.connection.disconnect().await;
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_frames(
    mut frames: mpsc::UnboundedReceiver<String>,
    state: Arc<Mutex<EventDispatcher>>,
    events: broadcast::Sender<InboundEvent>,
) {
    while let Some(frame) = frames.recv().await {
        let event = state.lock().dispatch(&frame);
        if let Some(event) = event {
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use kgchat_core::TransportError;

    use super::*;
    use crate::highlight::HighlightMap;
    use crate::transport::{FrameSink, FrameSource, Transport};

    /// Connector whose server echoes scripted frames for every `chat`.
    struct ScriptedConnector {
        script: Vec<String>,
        refuse: AtomicBool,
    }

    struct ScriptedSink {
        script: Vec<String>,
        to_client: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl FrameSink for ScriptedSink {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            if text.contains(r#""type":"chat""#) {
                for frame in &self.script {
                    self.to_client
                        .send(frame.clone())
                        .map_err(|_| TransportError::Closed)?;
                }
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct ScriptedSource(mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
            self.0.recv().await.map(Ok)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: "refused".into(),
                });
            }
            let (to_client, rx) = mpsc::unbounded_channel();
            Ok(Transport {
                sink: Box::new(ScriptedSink {
                    script: self.script.clone(),
                    to_client,
                }),
                source: Box::new(ScriptedSource(rx)),
            })
        }
    }

    fn client(script: &[&str], refuse: bool) -> (ChatClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(SessionIdentityStore::new(dir.path().join("id")));
        let connector = ScriptedConnector {
            script: script.iter().map(ToString::to_string).collect(),
            refuse: AtomicBool::new(refuse),
        };
        let client = ChatClient::new(
            &KgchatSettings::default(),
            Arc::new(connector),
            identity,
            Box::new(HighlightMap::new()),
        );
        (client, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_leaves_state_untouched() {
        let (client, _dir) = client(&[], true);
        assert_matches!(
            client.send_chat("hello", ChatMode::Group),
            Err(ClientError::NotConnected)
        );
        assert!(client.state().conversation().messages().is_empty());
    }

    #[tokio::test]
    async fn chat_turn_round_trip() {
        let (client, _dir) = client(
            &[
                r#"{"type":"processing"}"#,
                r#"{"type":"agent_start","agent_id":"mathew"}"#,
                r#"{"type":"agent_chunk","agent_id":"mathew","chunk":"Hel"}"#,
                r#"{"type":"agent_chunk","agent_id":"mathew","chunk":"lo"}"#,
                r#"{"type":"agent_complete","agent_id":"mathew","full_response":"Hello there"}"#,
                r#"{"type":"all_complete"}"#,
            ],
            false,
        );
        let mut events = client.subscribe();
        client.connection().connect().await.unwrap();
        client.send_chat("hi", ChatMode::Group).unwrap();

        loop {
            if events.recv().await.unwrap() == InboundEvent::AllComplete {
                break;
            }
        }
        let state = client.state();
        let messages = state.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].content, "Hello there");
        assert!(!state.conversation().is_processing());
    }

    #[tokio::test]
    async fn default_mode_comes_from_settings() {
        let (client, _dir) = client(&[], false);
        assert_eq!(client.default_mode(), ChatMode::Group);
    }
}
