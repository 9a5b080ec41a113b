//! WebSocket listener for push events
//!
//! Keeps a connection to the events endpoint open in the background,
//! decoding each frame into a [`PushEvent`] and handing it to an
//! [`EventHub`]. Dropped connections are retried with exponential backoff.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::hub::EventHub;
use super::message::PushEvent;

pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Commands sent to the listener task
#[derive(Debug)]
pub enum ListenerCommand {
    Shutdown,
}

/// Connection events from the listener task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// Handle for controlling a background listener
pub struct ListenerHandle {
    command_tx: mpsc::Sender<ListenerCommand>,
    pub event_rx: mpsc::Receiver<ListenerEvent>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop the listener and wait for it to close the connection
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ListenerCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Spawn a background task that feeds push events from `url` into `hub`
pub fn spawn_listener(url: impl Into<String>, hub: EventHub) -> ListenerHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);

    let task = tokio::spawn(listener_task(url.into(), hub, command_rx, event_tx));

    ListenerHandle {
        command_tx,
        event_rx,
        task,
    }
}

/// Delay before the reconnect attempt following one that waited `current`
pub fn next_delay(current: Duration) -> Duration {
    (current * 2).min(MAX_RECONNECT_DELAY)
}

async fn listener_task(
    url: String,
    hub: EventHub,
    mut command_rx: mpsc::Receiver<ListenerCommand>,
    event_tx: mpsc::Sender<ListenerEvent>,
) {
    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

    loop {
        match connect_and_listen(&url, &hub, &mut command_rx, &event_tx).await {
            Ok(true) => break,
            Ok(false) => {
                // Clean disconnect, reset backoff
                reconnect_delay = INITIAL_RECONNECT_DELAY;
            }
            Err(e) => {
                warn!("Event listener error: {:#}", e);
                let _ = event_tx.try_send(ListenerEvent::Error(format!("{:#}", e)));
            }
        }

        let _ = event_tx.try_send(ListenerEvent::Disconnected);
        debug!(delay = ?reconnect_delay, "Reconnecting to event stream");

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = next_delay(reconnect_delay);
            }
            cmd = command_rx.recv() => {
                if matches!(cmd, Some(ListenerCommand::Shutdown) | None) {
                    break;
                }
            }
        }
    }
    debug!("Event listener stopped");
}

/// Listen until the connection drops (`Ok(false)`) or shutdown (`Ok(true)`)
async fn connect_and_listen(
    url: &str,
    hub: &EventHub,
    command_rx: &mut mpsc::Receiver<ListenerCommand>,
    event_tx: &mpsc::Sender<ListenerEvent>,
) -> Result<bool> {
    let (ws_stream, _) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    let (mut write, mut read) = ws_stream.split();

    info!("Connected to event stream at {}", url);
    let _ = event_tx.try_send(ListenerEvent::Connected);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                if matches!(cmd, Some(ListenerCommand::Shutdown) | None) {
                    let _ = write.close().await;
                    return Ok(true);
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch(hub, PushEvent::decode(&text)),
                    Some(Ok(Message::Binary(bytes))) => {
                        dispatch(hub, PushEvent::decode_bytes(&bytes))
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(false),
                    Some(Err(e)) => return Err(e).context("Event stream failed"),
                    // Ping/pong
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn dispatch(hub: &EventHub, frame: serde_json::Result<PushEvent>) {
    match frame {
        Ok(event) => {
            let handled = hub.publish(&event);
            debug!(event = %event.event, handled, "Push event received");
        }
        Err(e) => warn!("Ignoring malformed push event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut delay = INITIAL_RECONNECT_DELAY;
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay.as_secs());
            delay = next_delay(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test]
    async fn test_frames_reach_hub() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = server.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("not an event".to_string()))
                .await
                .unwrap();
            let event = PushEvent::new("playlist.updated", json!({"id": "p1"}));
            ws.send(Message::Text(event.encode())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let hub = EventHub::new();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let _sub = hub.subscribe("playlist.updated", move |data| {
            let _ = seen_tx.send(data.clone());
        });

        let mut handle = spawn_listener(format!("ws://{}", addr), hub);
        let connected = tokio::time::timeout(Duration::from_secs(5), handle.event_rx.recv())
            .await
            .unwrap();
        assert_eq!(connected, Some(ListenerEvent::Connected));

        let data = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap();
        assert_eq!(data, Some(json!({"id": "p1"})));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
            server.local_addr().unwrap()
        };

        let mut handle = spawn_listener(format!("ws://{}", addr), EventHub::new());
        let first = tokio::time::timeout(Duration::from_secs(5), handle.event_rx.recv())
            .await
            .unwrap();
        assert!(matches!(first, Some(ListenerEvent::Error(_))));
        assert_eq!(handle.event_rx.recv().await, Some(ListenerEvent::Disconnected));

        handle.shutdown().await;
    }
}
