use crate::event::ServerEvent;
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Consecutive failed connects before the stream gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

enum Disconnect {
    Lost,
    Revoked,
    Shutdown,
}

/// Event stream over a WebSocket. Owns a background task that reconnects
/// with backoff; the inbound channel closes when the task gives up.
pub struct EventStream;

impl EventStream {
    /// `handshake` builds the first frame sent on every (re)connect, so it
    /// can pick up a rotated key.
    pub fn spawn<F>(
        url: &str,
        handshake: F,
    ) -> Result<(mpsc::Sender<String>, mpsc::Receiver<ServerEvent>)>
    where
        F: Fn() -> String + Send + 'static,
    {
        let ws_url = Url::parse(url).context("Invalid event stream URL")?;
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(128);

        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                tracing::info!("Connecting to world at {}...", ws_url);
                match connect_async(&ws_url).await {
                    Ok((ws_stream, _)) => {
                        tracing::info!("Connected to world");
                        failures = 0;
                        match Self::handle_connection(ws_stream, handshake(), &mut out_rx, &event_tx).await {
                            Ok(Disconnect::Lost) => tracing::warn!("World connection lost"),
                            Ok(Disconnect::Revoked) => {
                                tracing::error!("API key revoked, closing event stream");
                                return;
                            }
                            Ok(Disconnect::Shutdown) => {
                                tracing::info!("Event stream shutting down");
                                return;
                            }
                            Err(e) => tracing::error!("World connection error: {}", e),
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        if failures >= MAX_RECONNECT_ATTEMPTS {
                            tracing::error!(attempts = failures, "Giving up on world connection: {}", e);
                            return;
                        }
                        let wait_secs = 5u64.min(2u64.pow(failures));
                        tracing::error!("Failed to connect to world: {}. Retrying in {}s...", e, wait_secs);
                        tokio::time::sleep(tokio::time::Duration::from_secs(wait_secs)).await;
                        continue;
                    }
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        });

        Ok((out_tx, event_rx))
    }

    async fn handle_connection(
        stream: WsStream,
        hello: String,
        out_rx: &mut mpsc::Receiver<String>,
        event_tx: &mpsc::Sender<ServerEvent>,
    ) -> Result<Disconnect> {
        let (mut write, mut read) = stream.split();
        write.send(Message::Text(hello)).await?;

        loop {
            tokio::select! {
                incoming = read.next() => {
                    let msg = match incoming {
                        Some(msg) => msg?,
                        None => return Ok(Disconnect::Lost),
                    };
                    match msg {
                        Message::Text(text) => {
                            let Some(event) = ServerEvent::parse(&text) else {
                                tracing::debug!("Ignored unparseable frame");
                                continue;
                            };
                            let revoked = event.is_revocation();
                            if event_tx.send(event).await.is_err() {
                                return Ok(Disconnect::Shutdown);
                            }
                            if revoked {
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(Disconnect::Revoked);
                            }
                        }
                        Message::Close(_) => return Ok(Disconnect::Lost),
                        _ => {}
                    }
                }
                outgoing = out_rx.recv() => {
                    match outgoing {
                        Some(payload) => write.send(Message::Text(payload)).await?,
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(Disconnect::Shutdown);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::frame;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_handshake_then_events_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let hello = ws.next().await.unwrap().unwrap().into_text().unwrap();
            ws.send(Message::Text(frame("agent:registered", json!({ "agentId": "a-1" }))))
                .await
                .unwrap();
            let echoed = ws.next().await.unwrap().unwrap().into_text().unwrap();
            (hello, echoed)
        });

        let (out, mut events) =
            EventStream::spawn(&format!("ws://{addr}"), || frame("agent:connect", json!({}))).unwrap();
        assert_eq!(
            events.recv().await,
            Some(ServerEvent::Registered {
                agent_id: "a-1".into(),
                snapshot: None,
            })
        );
        out.send(frame("agent:perceive", json!({}))).await.unwrap();

        let (hello, echoed) = server.await.unwrap();
        assert!(hello.contains("agent:connect"));
        assert!(echoed.contains("agent:perceive"));
    }

    #[tokio::test]
    async fn test_revocation_closes_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
            let _ = ws
                .send(Message::Text(frame("error", json!({ "message": "API key revoked" }))))
                .await;
            let _ = ws.next().await;
        });

        let (_out, mut events) =
            EventStream::spawn(&format!("ws://{addr}"), || frame("agent:connect", json!({}))).unwrap();
        let first = events.recv().await.unwrap();
        assert!(first.is_revocation());
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_repeated_connect_failures() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let (_out, mut events) =
            EventStream::spawn(&format!("ws://{addr}"), || frame("agent:connect", json!({}))).unwrap();
        assert_eq!(events.recv().await, None);
    }

    #[test]
    fn test_rejects_bad_url() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            assert!(EventStream::spawn("not a url", String::new).is_err());
        });
    }
}
