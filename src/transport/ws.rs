//! Socket.IO client task
//!
//! Holds one connection to the backend, re-establishing it after a fixed
//! delay when it drops. Each (re)connect starts by requesting the active
//! configuration so the mirror never stays stale after an outage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::handle::TransportHandle;
use super::http;
use super::messages::{Broadcast, Intent};
use super::socketio::{self, Packet};

/// Connection settings for the client task
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Engine.IO WebSocket endpoint
    pub url: String,
    /// Where to fetch the input definitions table; `None` skips it
    pub definitions_url: Option<String>,
    /// Wait between attempts; `None` gives up after the first failure
    pub reconnect_delay: Option<Duration>,
}

/// Spawn the client task
///
/// Decoded broadcasts, plus [`Broadcast::Connection`] link changes, are
/// forwarded on `broadcast_tx`. The task ends when the handle's intent
/// channel closes or `broadcast_tx`'s receiver is dropped.
pub fn spawn_client(
    options: ClientOptions,
    handle: &TransportHandle,
    intent_rx: mpsc::UnboundedReceiver<Intent>,
    broadcast_tx: mpsc::UnboundedSender<Broadcast>,
) -> JoinHandle<()> {
    let connected = handle.connected_flag();
    tokio::spawn(run_client(options, connected, intent_rx, broadcast_tx))
}

/// Definitions table still to be fetched
struct PendingDefinitions {
    client: reqwest::Client,
    url: String,
}

async fn run_client(
    options: ClientOptions,
    connected: Arc<AtomicBool>,
    mut intent_rx: mpsc::UnboundedReceiver<Intent>,
    broadcast_tx: mpsc::UnboundedSender<Broadcast>,
) {
    let mut definitions = match &options.definitions_url {
        Some(url) => match http::build_client() {
            Ok(client) => Some(PendingDefinitions {
                client,
                url: url.clone(),
            }),
            Err(e) => {
                warn!("⚠️  Input definitions will not be fetched: {:#}", e);
                None
            }
        },
        None => None,
    };
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        info!("🔌 Connecting to backend at {} (attempt {})", options.url, attempt);

        let link = Link {
            connected: &connected,
            intent_rx: &mut intent_rx,
            broadcast_tx: &broadcast_tx,
            definitions: &mut definitions,
        };
        match link.run(&options.url).await {
            Ok(LinkEnd::Shutdown) => {
                debug!("Transport task shutting down");
                break;
            }
            Ok(LinkEnd::Dropped) => {
                attempt = 0;
                warn!("⚠️  Backend connection closed");
            }
            Err(e) => warn!("⚠️  Backend connection failed: {:#}", e),
        }

        if connected.swap(false, Ordering::SeqCst)
            && broadcast_tx.send(Broadcast::Connection(false)).is_err()
        {
            break;
        }

        let Some(delay) = options.reconnect_delay else {
            warn!("Reconnect disabled, transport stopped");
            break;
        };
        tokio::time::sleep(delay).await;
    }

    connected.store(false, Ordering::SeqCst);
}

enum LinkEnd {
    Dropped,
    Shutdown,
}

/// One connection attempt and everything it borrows from the task
struct Link<'a> {
    connected: &'a AtomicBool,
    intent_rx: &'a mut mpsc::UnboundedReceiver<Intent>,
    broadcast_tx: &'a mpsc::UnboundedSender<Broadcast>,
    definitions: &'a mut Option<PendingDefinitions>,
}

impl Link<'_> {
    async fn run(mut self, url: &str) -> Result<LinkEnd> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        let (mut write, mut read) = futures_util::StreamExt::split(ws);
        let mut joined = false;

        loop {
            tokio::select! {
                frame = read.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(e).context("WebSocket read failed"),
                        None => return Ok(LinkEnd::Dropped),
                    };

                    let text = match message {
                        Message::Text(text) => text,
                        Message::Ping(payload) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .context("Failed to answer ping")?;
                            continue;
                        }
                        Message::Close(_) => return Ok(LinkEnd::Dropped),
                        _ => continue,
                    };

                    let packet = match socketio::decode(&text) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!("Discarding frame: {}", e);
                            continue;
                        }
                    };

                    match packet {
                        Packet::Open(_) => {
                            debug!("Engine.IO session open, joining namespace");
                            write
                                .send(Message::Text(socketio::CONNECT.to_string()))
                                .await
                                .context("Failed to join namespace")?;
                        }
                        Packet::Connect if !joined => {
                            joined = true;
                            self.drop_stale_intents();

                            let hello = Intent::request_configuration()
                                .to_frame()
                                .context("Failed to encode configuration request")?;
                            write
                                .send(Message::Text(hello))
                                .await
                                .context("Failed to request configuration")?;

                            self.connected.store(true, Ordering::SeqCst);
                            if self.broadcast_tx.send(Broadcast::Connection(true)).is_err() {
                                return Ok(LinkEnd::Shutdown);
                            }
                            info!("✅ Connected to backend");

                            if !self.fetch_definitions().await {
                                return Ok(LinkEnd::Shutdown);
                            }
                        }
                        Packet::Ping => {
                            write
                                .send(Message::Text(socketio::PONG.to_string()))
                                .await
                                .context("Failed to answer ping")?;
                        }
                        Packet::Event { name, data } => match Broadcast::from_event(&name, data) {
                            Ok(Broadcast::Unknown(event)) => {
                                debug!("Ignoring unhandled event '{}'", event);
                            }
                            Ok(broadcast) => {
                                if self.broadcast_tx.send(broadcast).is_err() {
                                    return Ok(LinkEnd::Shutdown);
                                }
                            }
                            Err(e) => warn!("Discarding event: {}", e),
                        },
                        Packet::ConnectError(reason) => {
                            anyhow::bail!("Backend refused the connection: {}", reason);
                        }
                        Packet::Disconnect | Packet::Close => return Ok(LinkEnd::Dropped),
                        Packet::Connect | Packet::Pong | Packet::Noop | Packet::Other(_) => {}
                    }
                }
                intent = self.intent_rx.recv(), if joined => {
                    let Some(intent) = intent else {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(LinkEnd::Shutdown);
                    };
                    let text = match intent.to_frame() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode '{}' intent: {}", intent.event_name(), e);
                            continue;
                        }
                    };
                    debug!("→ {}", intent.event_name());
                    write.send(Message::Text(text)).await.context("WebSocket write failed")?;
                }
            }
        }
    }

    /// Anything queued before the link came up raced a disconnect
    fn drop_stale_intents(&mut self) {
        while let Ok(intent) = self.intent_rx.try_recv() {
            warn!("Dropping '{}' intent: link was down", intent.event_name());
        }
    }

    /// Fetch the definitions table once per client; false if nobody listens
    async fn fetch_definitions(&mut self) -> bool {
        let Some(pending) = self.definitions.as_ref() else {
            return true;
        };
        match http::fetch_input_definitions(&pending.client, &pending.url).await {
            Ok(table) => {
                *self.definitions = None;
                self.broadcast_tx
                    .send(Broadcast::InputDefinitions(table))
                    .is_ok()
            }
            Err(e) => {
                warn!("⚠️  Input definitions not fetched, retrying on reconnect: {:#}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    use super::{spawn_client, ClientOptions};
    use crate::error::PadmapError;
    use crate::transport::http::DEFINITIONS_PATH;
    use crate::transport::socketio::SOCKET_PATH;
    use crate::transport::{Broadcast, Intent, LiveValue, NamedValue, TransportHandle};

    const WAIT: Duration = Duration::from_secs(5);

    struct TestClient {
        handle: TransportHandle,
        broadcasts: mpsc::UnboundedReceiver<Broadcast>,
        task: JoinHandle<()>,
    }

    fn start_client(listener: &TcpListener, reconnect_delay: Option<Duration>) -> TestClient {
        start_client_with_definitions(listener, reconnect_delay, None)
    }

    fn start_client_with_definitions(
        listener: &TcpListener,
        reconnect_delay: Option<Duration>,
        definitions_url: Option<String>,
    ) -> TestClient {
        let url = format!("ws://{}{}", listener.local_addr().unwrap(), SOCKET_PATH);
        let (handle, intent_rx) = TransportHandle::channel();
        let (broadcast_tx, broadcasts) = mpsc::unbounded_channel();
        let task = spawn_client(
            ClientOptions {
                url,
                definitions_url,
                reconnect_delay,
            },
            &handle,
            intent_rx,
            broadcast_tx,
        );
        TestClient {
            handle,
            broadcasts,
            task,
        }
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
            if let Message::Text(text) = message {
                return text;
            }
        }
    }

    async fn send_text(ws: &mut WebSocketStream<TcpStream>, text: &str) {
        ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Server side of the Engine.IO open and namespace join
    async fn handshake(ws: &mut WebSocketStream<TcpStream>) {
        send_text(ws, r#"0{"sid":"e1","pingInterval":25000,"pingTimeout":20000}"#).await;
        assert_eq!(next_text(ws).await, "40");
        send_text(ws, r#"40{"sid":"n1"}"#).await;
    }

    async fn next_broadcast(client: &mut TestClient) -> Broadcast {
        timeout(WAIT, client.broadcasts.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_configuration_requested_on_every_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = start_client(&listener, Some(Duration::from_millis(50)));

        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        assert_eq!(next_text(&mut ws).await, r#"42["get_active_config",{}]"#);
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));
        assert!(client.handle.is_connected());

        send_text(&mut ws, r#"42["channel_value_update",{"name":"Pan","value":0.5}]"#).await;
        assert_eq!(
            next_broadcast(&mut client).await,
            Broadcast::ChannelValue(NamedValue {
                name: "Pan".into(),
                value: LiveValue::Number(0.5)
            })
        );

        send_text(&mut ws, "2").await;
        assert_eq!(next_text(&mut ws).await, "3", "Engine.IO ping is answered");

        ws.close(None).await.unwrap();
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(false));
        assert!(!client.handle.is_connected());

        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        assert_eq!(next_text(&mut ws).await, r#"42["get_active_config",{}]"#);
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));

        client.task.abort();
    }

    #[tokio::test]
    async fn test_intents_sent_and_outage_leftovers_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = start_client(&listener, Some(Duration::from_millis(50)));

        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        next_text(&mut ws).await;
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));

        client.handle.send(Intent::delete_channel("Pan")).unwrap();
        assert_eq!(next_text(&mut ws).await, r#"42["delete_channel",{"name":"Pan"}]"#);

        ws.close(None).await.unwrap();
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(false));
        assert!(matches!(
            client.handle.send(Intent::delete_channel("Tilt")),
            Err(PadmapError::TransportUnavailable(_))
        ));

        // An intent that slipped in while the link was going down
        client.handle.set_connected(true);
        client.handle.send(Intent::delete_channel("Zoom")).unwrap();
        client.handle.set_connected(false);

        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        assert_eq!(next_text(&mut ws).await, r#"42["get_active_config",{}]"#);
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));

        client.handle.send(Intent::delete_variable("Speed")).unwrap();
        assert_eq!(
            next_text(&mut ws).await,
            r#"42["delete_variable",{"name":"Speed"}]"#,
            "The leftover intent must not reach the new link"
        );

        client.task.abort();
    }

    #[tokio::test]
    async fn test_definitions_fetched_after_join_until_one_succeeds() {
        let mut http = mockito::Server::new_async().await;
        let failing = http
            .mock("GET", DEFINITIONS_PATH)
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let definitions_url = format!("{}{}", http.url(), DEFINITIONS_PATH);
        let mut client = start_client_with_definitions(
            &listener,
            Some(Duration::from_millis(50)),
            Some(definitions_url),
        );

        // First join: the fetch fails and nothing is installed
        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        next_text(&mut ws).await;
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));
        ws.close(None).await.unwrap();
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(false));
        failing.assert_async().await;
        failing.remove_async().await;

        let served = http
            .mock("GET", DEFINITIONS_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"BTN_SOUTH": "A"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        next_text(&mut ws).await;
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));
        assert_eq!(
            next_broadcast(&mut client).await,
            Broadcast::InputDefinitions(HashMap::from([("BTN_SOUTH".to_string(), "A".to_string())]))
        );
        ws.close(None).await.unwrap();
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(false));

        // Once installed, later joins do not fetch again
        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        next_text(&mut ws).await;
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));
        ws.close(None).await.unwrap();
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(false));
        served.assert_async().await;

        client.task.abort();
    }

    #[tokio::test]
    async fn test_reconnect_disabled_stops_task() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = start_client(&listener, None);

        let mut ws = accept(&listener).await;
        handshake(&mut ws).await;
        next_text(&mut ws).await;
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(true));

        ws.close(None).await.unwrap();
        assert_eq!(next_broadcast(&mut client).await, Broadcast::Connection(false));

        timeout(WAIT, client.task).await.unwrap().unwrap();
        assert!(client.broadcasts.recv().await.is_none());
        assert!(client.handle.send(Intent::request_configuration()).is_err());
    }

    #[tokio::test]
    async fn test_refused_namespace_is_a_failed_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = start_client(&listener, None);

        let mut ws = accept(&listener).await;
        send_text(&mut ws, r#"0{"sid":"e1"}"#).await;
        assert_eq!(next_text(&mut ws).await, "40");
        send_text(&mut ws, r#"44{"message":"Not authorized"}"#).await;

        timeout(WAIT, client.task).await.unwrap().unwrap();
        assert!(
            client.broadcasts.recv().await.is_none(),
            "No link change is reported for a link that never came up"
        );
    }
}
