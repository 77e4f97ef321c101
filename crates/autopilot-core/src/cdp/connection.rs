//! Websocket connection to one debug target.
//!
//! A connection owns two tasks: a writer draining an unbounded channel into
//! the socket, and a reader that settles pending calls from inbound frames and
//! periodically sweeps calls past their deadline. When the socket closes or
//! errors the reader fails every pending call and marks the connection closed.

use super::correlator::{Correlator, PendingGuard};
use super::protocol::{Frame, Request};
use crate::config::RpcConfig;
use crate::{AutopilotError, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Live control connection to a target.
pub struct Connection {
    target_id: String,
    url: String,
    correlator: Arc<Correlator>,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Open the websocket and start the reader/writer tasks.
    ///
    /// Resolves once the handshake completes. Fails with a transport error if
    /// the handshake fails or does not finish within `connect_timeout`.
    pub async fn open(target_id: &str, url: &str, connect_timeout: Duration) -> Result<Self> {
        let (stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                AutopilotError::transport(
                    target_id,
                    format!("connect timed out after {connect_timeout:?}"),
                )
            })?
            .map_err(|e| AutopilotError::transport(target_id, e))?;

        debug!("Connected to target {} at {}", target_id, url);

        let (mut sink, mut source) = stream.split();
        let correlator = Arc::new(Correlator::new(target_id));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer_correlator = correlator.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("Write failed on {}: {}", writer_correlator.target_id(), e);
                    writer_correlator.fail_all(&format!("write failed: {e}"));
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_correlator = correlator.clone();
        let pong_tx = outbound.clone();
        let reader = tokio::spawn(async move {
            let correlator = reader_correlator;
            let mut sweep = tokio::time::interval(RpcConfig::DEADLINE_SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let reason = loop {
                tokio::select! {
                    message = source.next() => match message {
                        Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                            Ok(frame) => {
                                if frame.response_id().is_some() {
                                    correlator.settle(frame);
                                }
                            }
                            Err(e) => debug!("Dropping frame from {}: {}", correlator.target_id(), e),
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = pong_tx.send(Message::Pong(payload));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|f| format!("closed by peer: {}", f.reason))
                                .unwrap_or_else(|| "closed by peer".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("read failed: {e}"),
                        None => break "stream ended".to_string(),
                    },
                    _ = sweep.tick() => {
                        correlator.sweep_expired(tokio::time::Instant::now());
                    }
                }
            };

            let failed = correlator.fail_all(&reason);
            debug!(
                "Connection to {} ended ({}); failed {} pending call(s)",
                correlator.target_id(),
                reason,
                failed
            );
        });

        Ok(Self {
            target_id: target_id.to_string(),
            url: url.to_string(),
            correlator,
            outbound,
            reader,
            writer,
        })
    }

    /// Send a command and wait for its response, bounded by `timeout`.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let mut handle = self.correlator.register(method, timeout)?;
        let mut guard = PendingGuard::new(&self.correlator, handle.id);

        let text = Request::new(handle.id, method, params).to_text()?;
        if self.outbound.send(Message::Text(text)).is_err() {
            return Err(AutopilotError::ConnectionClosed {
                target_id: self.target_id.clone(),
                reason: "writer stopped".to_string(),
            });
        }

        let outcome = match tokio::time::timeout(timeout, &mut handle.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AutopilotError::ConnectionClosed {
                target_id: self.target_id.clone(),
                reason: self
                    .correlator
                    .closed_reason()
                    .unwrap_or_else(|| "connection dropped".to_string()),
            }),
            Err(_) => {
                if self.correlator.expire(handle.id) {
                    Err(AutopilotError::RpcTimeout {
                        target_id: self.target_id.clone(),
                        method: method.to_string(),
                        timeout,
                    })
                } else {
                    // Settled between the deadline firing and our removal attempt.
                    match handle.rx.try_recv() {
                        Ok(result) => result,
                        Err(_) => Err(AutopilotError::RpcTimeout {
                            target_id: self.target_id.clone(),
                            method: method.to_string(),
                            timeout,
                        }),
                    }
                }
            }
        };

        guard.disarm();
        outcome
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the transport has closed or errored.
    pub fn is_closed(&self) -> bool {
        self.correlator.is_closed() || self.reader.is_finished()
    }

    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Close the socket and fail any outstanding calls.
    pub fn close(&self) {
        if !self.correlator.is_closed() {
            let _ = self.outbound.send(Message::Close(None));
        }
        let failed = self.correlator.fail_all("closed locally");
        if failed > 0 {
            warn!(
                "Closed connection to {} with {} call(s) in flight",
                self.target_id, failed
            );
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.correlator.fail_all("connection dropped");
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target_id", &self.target_id)
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Echo server answering every request with `{"id", "result": {"method"}}`,
    /// except `hang`, which is never answered.
    async fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = accept_async(tcp).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            let req: Request = serde_json::from_str(&text).unwrap();
                            match req.method.as_str() {
                                "hang" => {}
                                "close" => {
                                    let _ = ws.close(None).await;
                                    return;
                                }
                                _ => {
                                    let reply = serde_json::json!({
                                        "id": req.id,
                                        "result": {"method": req.method},
                                    });
                                    ws.send(Message::Text(reply.to_string())).await.unwrap();
                                }
                            }
                        }
                    }
                });
            }
        });
        format!("ws://{addr}/devtools/page/1")
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let url = spawn_server().await;
        let conn = Connection::open("p1", &url, Duration::from_secs(2)).await.unwrap();

        let result = conn
            .call("Runtime.evaluate", Value::Null, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["method"], "Runtime.evaluate");
        assert_eq!(conn.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_independently() {
        let url = spawn_server().await;
        let conn = Connection::open("p1", &url, Duration::from_secs(2)).await.unwrap();

        let calls = (0..20).map(|i| {
            let conn = &conn;
            async move {
                conn.call(&format!("m{i}"), Value::Null, Duration::from_secs(2))
                    .await
                    .unwrap()
            }
        });
        let results = futures::future::join_all(calls).await;
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result["method"], format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_call_times_out_and_cleans_up() {
        let url = spawn_server().await;
        let conn = Connection::open("p1", &url, Duration::from_secs(2)).await.unwrap();

        let err = conn
            .call("hang", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AutopilotError::RpcTimeout { .. }));
        assert_eq!(conn.pending_calls(), 0);

        // Connection stays usable after a timeout.
        assert!(conn.call("ok", Value::Null, Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_and_marks_closed() {
        let url = spawn_server().await;
        let conn = Connection::open("p1", &url, Duration::from_secs(2)).await.unwrap();

        let err = conn
            .call("close", Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_transport());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(conn.is_closed());
        assert!(conn
            .call("ok", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err()
            .is_transport());
    }

    #[tokio::test]
    async fn test_open_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Connection::open("p1", &format!("ws://{addr}/x"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
