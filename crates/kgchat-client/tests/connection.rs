//! End-to-end tests against a real loopback WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use kgchat_client::{ChatClient, ConnectionState, HighlightMap, SessionIdentityStore};
use kgchat_core::{ChatMode, InboundEvent};
use kgchat_settings::KgchatSettings;

const TIMEOUT: Duration = Duration::from_secs(5);

/// One accepted server-side connection.
struct ServerConn {
    received: mpsc::UnboundedReceiver<String>,
    /// `None` closes the connection.
    outgoing: mpsc::UnboundedSender<Option<String>>,
}

impl ServerConn {
    async fn next_json(&mut self) -> Value {
        let text = timeout(TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("connection ended");
        serde_json::from_str(&text).unwrap()
    }

    fn push(&self, value: &Value) {
        self.outgoing.send(Some(value.to_string())).unwrap();
    }

    fn hang_up(&self) {
        let _ = self.outgoing.send(None);
    }
}

/// Start a server and return its URL and a stream of accepted connections.
async fn boot_server() -> (String, mpsc::UnboundedReceiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (conns_tx, conns_rx) = mpsc::unbounded_channel();

    let _ = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            let (received_tx, received) = mpsc::unbounded_channel();
            let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Option<String>>();
            if conns_tx.send(ServerConn { received, outgoing }).is_err() {
                return;
            }
            let _ = tokio::spawn(async move {
                let (mut sink, mut source) = ws.split();
                loop {
                    tokio::select! {
                        msg = source.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = received_tx.send(text.as_str().to_owned());
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        out = outgoing_rx.recv() => match out {
                            Some(Some(text)) => {
                                if sink.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            _ => {
                                let _ = sink.close().await;
                                break;
                            }
                        },
                    }
                }
            });
        }
    });

    (url, conns_rx)
}

fn settings(url: &str) -> KgchatSettings {
    let mut settings = KgchatSettings::default();
    settings.server.url = url.to_string();
    settings.connection.reconnect_delay_ms = 200;
    settings.connection.startup_delay_ms = 0;
    settings.connection.ping_interval_ms = 0;
    settings
}

fn client(url: &str, dir: &tempfile::TempDir) -> ChatClient {
    let identity = Arc::new(SessionIdentityStore::new(dir.path().join("browser_session_id")));
    ChatClient::new(
        &settings(url),
        Arc::new(kgchat_client::WebSocketConnector),
        identity,
        Box::new(HighlightMap::new()),
    )
}

async fn next_conn(conns: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    timeout(TIMEOUT, conns.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("server stopped")
}

#[tokio::test]
async fn register_session_precedes_chat() {
    let (url, mut conns) = boot_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client(&url, &dir);

    client.connection().connect().await.unwrap();
    client.send_chat("hello", ChatMode::ThinkTank).unwrap();

    let mut conn = next_conn(&mut conns).await;
    let first = conn.next_json().await;
    assert_eq!(first["type"], "register_session");
    let id = first["browser_session_id"].as_str().unwrap();
    assert!(id.starts_with("session_"));

    let second = conn.next_json().await;
    assert_eq!(
        second,
        json!({"type": "chat", "message": "hello", "mode": "think_tank"})
    );
}

#[tokio::test]
async fn reconnects_with_same_identity_after_server_drop() {
    let (url, mut conns) = boot_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client(&url, &dir);
    client.start().await;

    let mut first = next_conn(&mut conns).await;
    let first_id = first.next_json().await["browser_session_id"].clone();
    first.hang_up();

    let mut second = next_conn(&mut conns).await;
    let register = second.next_json().await;
    assert_eq!(register["type"], "register_session");
    assert_eq!(register["browser_session_id"], first_id);

    timeout(TIMEOUT, client.connection().wait_until_open())
        .await
        .unwrap();
    assert_eq!(client.connection().live_transports(), 1);
}

#[tokio::test]
async fn teardown_does_not_reconnect() {
    let (url, mut conns) = boot_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client(&url, &dir);
    client.connection().connect().await.unwrap();
    let _conn = next_conn(&mut conns).await;

    client.connection().disconnect().await;
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);

    // Several reconnect delays pass without a new connection.
    let again = timeout(Duration::from_secs(1), conns.recv()).await;
    assert!(again.is_err(), "client reconnected after teardown");
}

#[tokio::test]
async fn streamed_turn_is_aggregated() {
    let (url, mut conns) = boot_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client(&url, &dir);
    let mut events = client.subscribe();
    client.connection().connect().await.unwrap();

    let mut conn = next_conn(&mut conns).await;
    let _register = conn.next_json().await;
    client.send_chat("who knows Python?", ChatMode::Group).unwrap();
    let _chat = conn.next_json().await;

    conn.push(&json!({"type": "processing", "message": "Agents are thinking..."}));
    conn.push(&json!({"type": "agent_start", "agent_id": "rahil", "agent_name": "Rahil"}));
    conn.push(&json!({"type": "agent_chunk", "agent_id": "rahil", "chunk": "I "}));
    conn.push(&json!({"type": "not json"}));
    conn.push(&json!({"type": "agent_chunk", "agent_id": "rahil", "chunk": "do"}));
    conn.push(&json!({
        "type": "agent_complete",
        "agent_id": "rahil",
        "full_response": "I do.",
        "highlights": {"nodes": [{"id": "skill_python", "intensity": 0.9}], "edges": []}
    }));
    conn.push(&json!({"type": "all_complete"}));

    timeout(TIMEOUT, async {
        while events.recv().await.unwrap() != InboundEvent::AllComplete {}
    })
    .await
    .unwrap();

    let state = client.state();
    let conversation = state.conversation();
    let last = conversation.messages().last().unwrap();
    assert_eq!(last.content, "I do.");
    assert_eq!(last.agent_name.as_deref(), Some("Rahil"));
    assert!(!last.streaming);
    assert!(conversation.active_agents().is_empty());
    assert!(!conversation.is_processing());
}

#[tokio::test]
async fn send_before_connect_is_rejected() {
    let (url, _conns) = boot_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client(&url, &dir);
    assert!(client.send_chat("early", ChatMode::Group).is_err());
    assert!(client.state().conversation().messages().is_empty());
}
