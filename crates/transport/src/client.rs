use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use outreach_core::config::TransportConfig;
use outreach_core::{Error, Result};

use crate::router::OutboundSink;
use crate::wire::{Inbound, Outbound};

/// Doubling backoff, capped at the ceiling.
fn next_delay(current: Duration, ceil: Duration) -> Duration {
    (current * 2).min(ceil)
}

/// One logical connection to the remote dispatcher, kept alive across
/// real-world drops.
///
/// Reconnects with doubling backoff (floor 1s, cap 30s); a successful open
/// resets the delay to the floor, so a transient drop recovers fast while
/// repeated outages back off. `close()` is terminal: it cancels the pending
/// retry and the heartbeat, and no further attempt is made.
pub struct TransportClient {
    config: TransportConfig,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl TransportClient {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        Arc::new(Self {
            config,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Terminal local close. Any scheduled reconnect is abandoned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
        info!("Transport client closed");
    }

    /// Connection loop. Runs until `close()` or the shutdown signal.
    pub async fn run_loop(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<Inbound>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut outbound_rx = match self.outbound_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                error!("Transport run_loop started twice");
                return;
            }
        };

        if self.config.url.is_empty() {
            info!("No dispatcher URL configured, transport disabled");
            tokio::select! {
                _ = self.closed_notify.notified() => {}
                _ = shutdown.recv() => {}
            }
            return;
        }

        let floor = Duration::from_millis(self.config.backoff_floor_ms);
        let ceil = Duration::from_millis(self.config.backoff_ceil_ms);
        let mut delay = floor;

        info!(url = %self.config.url, "Transport client starting");

        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                result = self.connect_and_run(&inbound_tx, &mut outbound_rx) => {
                    let was_open = self.connected.swap(false, Ordering::SeqCst);
                    if was_open {
                        // Distinguishes a transient drop from compounding
                        // backoff across repeated failed connects.
                        delay = floor;
                    }
                    match result {
                        Ok(()) => info!("Transport connection closed"),
                        Err(e) => warn!(error = %e, "Transport connection error"),
                    }
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.closed_notify.notified() => break,
                        _ = shutdown.recv() => break,
                    }
                    delay = next_delay(delay, ceil);
                }
                _ = self.closed_notify.notified() => break,
                _ = shutdown.recv() => break,
            }
        }

        info!("Transport client stopped");
    }

    async fn connect_and_run(
        &self,
        inbound_tx: &mpsc::Sender<Inbound>,
        outbound_rx: &mut mpsc::Receiver<Outbound>,
    ) -> Result<()> {
        url::Url::parse(&self.config.url)
            .map_err(|e| Error::Transport(format!("Invalid dispatcher URL: {}", e)))?;

        let (ws_stream, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("WebSocket connection failed: {}", e)))?;

        info!("Connected to dispatcher");
        self.connected.store(true, Ordering::SeqCst);

        let (mut write, mut read) = ws_stream.split();
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_secs));
        // The first tick fires immediately; skip it so the cadence is fixed.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.handle_text(&text, inbound_tx).await;
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            info!("Dispatcher closed connection");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(Error::Transport(format!("WebSocket error: {}", e)));
                        }
                        None => {
                            return Err(Error::Transport("stream ended".to_string()));
                        }
                        _ => {}
                    }
                }
                Some(outbound) = outbound_rx.recv() => {
                    let json = match serde_json::to_string(&outbound) {
                        Ok(j) => j,
                        Err(e) => {
                            error!(error = %e, "Failed to serialize outbound message");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(WsMessage::Text(json)).await {
                        return Err(Error::Transport(format!("send failed: {}", e)));
                    }
                }
                _ = heartbeat.tick() => {
                    let json = match serde_json::to_string(&Outbound::heartbeat()) {
                        Ok(j) => j,
                        Err(_) => continue,
                    };
                    if let Err(e) = write.send(WsMessage::Text(json)).await {
                        return Err(Error::Transport(format!("heartbeat failed: {}", e)));
                    }
                }
                _ = self.closed_notify.notified() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Malformed payloads and heartbeat echoes are dropped silently; they
    /// never reach the router and never take the connection down.
    async fn handle_text(&self, text: &str, inbound_tx: &mpsc::Sender<Inbound>) {
        match serde_json::from_str::<Inbound>(text) {
            Ok(Inbound::Heartbeat { .. }) => {
                debug!("Heartbeat echo received");
            }
            Ok(msg) => {
                if inbound_tx.send(msg).await.is_err() {
                    warn!("Inbound channel closed, dropping message");
                }
            }
            Err(e) => {
                debug!(error = %e, "Dropping unparseable inbound payload");
            }
        }
    }
}

impl OutboundSink for TransportClient {
    /// Best-effort send: dropped (not buffered, not an error) when the
    /// connection is not currently open.
    fn send(&self, msg: Outbound) {
        if !self.connected.load(Ordering::SeqCst) {
            debug!("Not connected, dropping outbound message");
            return;
        }
        if let Err(e) = self.outbound_tx.try_send(msg) {
            debug!(error = %e, "Outbound buffer full, dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::OutboundSink;

    fn test_config() -> TransportConfig {
        TransportConfig {
            url: "ws://127.0.0.1:9/ws".to_string(),
            heartbeat_secs: 30,
            backoff_floor_ms: 10,
            backoff_ceil_ms: 80,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let ceil = Duration::from_millis(30_000);
        let floor = Duration::from_millis(1_000);
        let d1 = next_delay(floor, ceil);
        let d2 = next_delay(d1, ceil);
        assert_eq!(d1, Duration::from_millis(2_000));
        assert_eq!(d2, Duration::from_millis(4_000));

        let near_cap = Duration::from_millis(20_000);
        assert_eq!(next_delay(near_cap, ceil), ceil);
        assert_eq!(next_delay(ceil, ceil), ceil);
    }

    #[tokio::test]
    async fn test_send_drops_when_not_connected() {
        let client = TransportClient::new(test_config());
        client.send(Outbound::heartbeat());
        // Nothing buffered: the internal channel stays empty.
        let mut rx = client.outbound_rx.lock().await.take().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_stops_reconnect_loop() {
        let client = TransportClient::new(test_config());
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

        let handle = tokio::spawn(client.clone().run_loop(inbound_tx, shutdown_rx));
        // Give the loop a moment to start failing connects, then close.
        tokio::time::sleep(Duration::from_millis(30)).await;
        client.close();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run_loop did not stop after close()")
            .unwrap();
    }

    #[tokio::test]
    async fn test_delay_resets_to_floor_after_successful_open() {
        use std::time::Instant;

        // Server accepts the handshake and immediately hangs up, over and
        // over, recording when each connection arrived.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(std::sync::Mutex::new(Vec::<Instant>::new()));
        let recorder = accepts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                recorder.lock().unwrap().push(Instant::now());
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    drop(ws);
                }
            }
        });

        let client = TransportClient::new(TransportConfig {
            url: format!("ws://{}/ws", addr),
            heartbeat_secs: 30,
            backoff_floor_ms: 100,
            backoff_ceil_ms: 30_000,
        });
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(client.clone().run_loop(inbound_tx, shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while accepts.lock().unwrap().len() < 4 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("client stopped reconnecting");

        client.close();
        let _ = handle.await;

        // Every drop happened after a successful open, so every reconnect
        // waited the floor delay. Compounding backoff would reach 400ms by
        // the fourth attempt.
        let accepts = accepts.lock().unwrap();
        for pair in accepts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap < Duration::from_millis(250),
                "reconnect gap {:?} did not reset to the floor",
                gap
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_inbound_is_dropped() {
        let client = TransportClient::new(test_config());
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
        client.handle_text("not json at all", &inbound_tx).await;
        client
            .handle_text(r#"{"action": "heartbeat", "echo": true}"#, &inbound_tx)
            .await;
        assert!(inbound_rx.try_recv().is_err());

        client
            .handle_text(
                r#"{"action": "execute", "commandId": "c1", "type": "noop"}"#,
                &inbound_tx,
            )
            .await;
        assert!(matches!(
            inbound_rx.try_recv().unwrap(),
            Inbound::Execute { .. }
        ));
    }
}
