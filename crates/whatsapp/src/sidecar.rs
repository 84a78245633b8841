//! WebSocket sessions against the WhatsApp protocol sidecar.
//!
//! Every account gets its own socket. The first frame on a socket is a
//! `login`; from then on the sidecar streams that account's events and
//! answers `send_text` requests with a `send_result` carrying the same
//! request id.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, anyhow, bail},
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::sync::{Mutex, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    uuid::Uuid,
};

use warelay_config::SidecarConfig;

use crate::{
    session::{CloseReason, Session, SessionConnector, SessionEvent, SessionHandle},
    types::{GatewayMessage, SidecarMessage},
};

/// Default sidecar WebSocket port.
pub const DEFAULT_SIDECAR_PORT: u16 = 9876;

type PendingSends = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

/// Opens sessions on the sidecar configured in [`SidecarConfig`].
pub struct SidecarConnector {
    config: SidecarConfig,
}

impl SidecarConnector {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionConnector for SidecarConnector {
    async fn open(&self, account_id: &str) -> Result<Session> {
        let auth_dir = self.config.account_auth_dir(account_id);
        open_session(
            &self.config.url,
            account_id,
            &auth_dir.to_string_lossy(),
            self.config.send_timeout(),
        )
        .await
    }
}

/// Handle for one account's sidecar socket.
pub struct SidecarSession {
    account_id: String,
    /// Sender for outgoing messages to the sidecar.
    tx: mpsc::Sender<GatewayMessage>,
    pending: PendingSends,
    cancel: CancellationToken,
    send_timeout: Duration,
}

#[async_trait]
impl SessionHandle for SidecarSession {
    async fn send_text(&self, jid: &str, text: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("sidecar session is closed");
        }

        let request_id = Uuid::new_v4().to_string();
        debug!(account_id = %self.account_id, to = jid, request_id, "sending text message");

        let (done_tx, done_rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(request_id.clone(), done_tx);

        let sent = self
            .tx
            .send(GatewayMessage::SendText {
                account_id: self.account_id.clone(),
                to: jid.to_string(),
                text: text.to_string(),
                request_id: request_id.clone(),
            })
            .await;
        if sent.is_err() {
            self.pending.lock().await.remove(&request_id);
            bail!("sidecar session is closed");
        }

        match tokio::time::timeout(self.send_timeout, done_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(anyhow!(e)),
            Ok(Err(_)) => bail!("sidecar session closed before the message was confirmed"),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                bail!(
                    "timed out after {}s waiting for the sidecar to confirm the message",
                    self.send_timeout.as_secs()
                )
            },
        }
    }

    async fn persist_credentials(&self) -> Result<()> {
        self.tx
            .send(GatewayMessage::SaveCreds {
                account_id: self.account_id.clone(),
            })
            .await
            .context("failed to send message to sidecar")
    }

    async fn close(&self) {
        debug!(account_id = %self.account_id, "closing sidecar session");
        self.cancel.cancel();
    }
}

impl Drop for SidecarSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect to the sidecar, log `account_id` in and spawn reader/writer tasks.
pub async fn open_session(
    url: &str,
    account_id: &str,
    auth_dir: &str,
    send_timeout: Duration,
) -> Result<Session> {
    info!(url, account_id, "opening sidecar session");

    let (ws_stream, _) = connect_async(url)
        .await
        .context("failed to connect to sidecar")?;

    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(32);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);
    let pending: PendingSends = Arc::default();
    let cancel = CancellationToken::new();

    // Writer task.
    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        error!(error = %e, "failed to send message to sidecar");
                        break;
                    }
                    debug!(?msg, "sent message to sidecar");
                },
                Err(e) => {
                    error!(error = %e, "failed to serialize message");
                },
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    // Reader task.
    let reader_cancel = cancel.clone();
    let reader_pending = Arc::clone(&pending);
    let account = account_id.to_string();
    tokio::spawn(async move {
        // Set once the owner has been told the session closed, or closed it itself.
        let mut close_reported = false;

        loop {
            let frame = tokio::select! {
                _ = reader_cancel.cancelled() => {
                    close_reported = true;
                    break;
                },
                frame = read.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    info!(account_id = %account, "sidecar connection closed");
                    break;
                },
                Some(Ok(_)) => continue, // Ignore ping/pong/binary
                Some(Err(e)) => {
                    error!(account_id = %account, error = %e, "WebSocket read error");
                    break;
                },
            };

            let msg = match serde_json::from_str::<SidecarMessage>(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, text = %text, "failed to parse sidecar message");
                    continue;
                },
            };

            match msg {
                SidecarMessage::SendResult {
                    request_id,
                    success,
                    message_id,
                    error,
                } => {
                    let waiter = reader_pending.lock().await.remove(&request_id);
                    let Some(waiter) = waiter else {
                        debug!(request_id, "send result for an unknown request");
                        continue;
                    };
                    let outcome = if success {
                        debug!(request_id, ?message_id, "message sent successfully");
                        Ok(())
                    } else {
                        Err(error.unwrap_or_else(|| "sidecar failed to send the message".into()))
                    };
                    let _ = waiter.send(outcome);
                },
                SidecarMessage::Error {
                    account_id: ref scope,
                    ref error,
                } => {
                    if scope.as_deref().is_none_or(|a| a == account) {
                        warn!(account_id = %account, error, "sidecar error");
                    }
                },
                other => {
                    if other.account_id() != Some(account.as_str()) {
                        debug!(account_id = %account, ?other, "ignoring message for another account");
                        continue;
                    }
                    let Some(event) = other.into_event() else {
                        continue;
                    };
                    let is_close = matches!(event, SessionEvent::Closed(_));
                    if event_tx.send(event).await.is_err() {
                        // Nobody is listening any more.
                        close_reported = true;
                        break;
                    }
                    if is_close {
                        close_reported = true;
                        break;
                    }
                },
            }
        }

        reader_cancel.cancel();

        for (_, waiter) in reader_pending.lock().await.drain() {
            let _ = waiter.send(Err("sidecar session closed".into()));
        }

        if !close_reported {
            let _ = event_tx
                .send(SessionEvent::Closed(CloseReason::Recoverable(
                    "sidecar connection lost".into(),
                )))
                .await;
        }
    });

    tx.send(GatewayMessage::Login {
        account_id: account_id.to_string(),
        auth_dir: auth_dir.to_string(),
    })
    .await
    .context("sidecar session closed during login")?;

    let handle = SidecarSession {
        account_id: account_id.to_string(),
        tx,
        pending,
        cancel,
        send_timeout,
    };

    Ok(Session {
        handle: Arc::new(handle),
        events: event_rx,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        tokio::{net::TcpListener, task::JoinHandle},
        tokio_tungstenite::{WebSocketStream, accept_async},
    };

    type ServerSocket = WebSocketStream<tokio::net::TcpStream>;

    /// Start a one-connection fake sidecar running `script`.
    async fn fake_sidecar<F, Fut>(script: F) -> (String, JoinHandle<()>)
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            script(ws).await;
        });
        (url, task)
    }

    async fn recv(ws: &mut ServerSocket) -> GatewayMessage {
        loop {
            match ws.next().await.expect("socket closed").unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send(ws: &mut ServerSocket, value: serde_json::Value) {
        ws.send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn session_streams_events_and_confirms_sends() {
        let (url, server) = fake_sidecar(|mut ws| async move {
            assert_eq!(recv(&mut ws).await, GatewayMessage::Login {
                account_id: "acc1".into(),
                auth_dir: "/auth/auth_acc1".into(),
            });

            send(&mut ws, serde_json::json!({"type": "qr", "accountId": "other", "qr": "nope"})).await;
            send(&mut ws, serde_json::json!({"type": "qr", "accountId": "acc1", "qr": "code-1"})).await;
            send(&mut ws, serde_json::json!({"type": "connected", "accountId": "acc1", "phoneNumber": "5551234567"})).await;

            let GatewayMessage::SendText { to, text, request_id, .. } = recv(&mut ws).await else {
                panic!("expected send_text");
            };
            assert_eq!(to, "5551234567@s.whatsapp.net");
            assert_eq!(text, "hi");
            send(&mut ws, serde_json::json!({"type": "send_result", "requestId": request_id, "success": true, "messageId": "m1"})).await;

            let GatewayMessage::SendText { request_id, .. } = recv(&mut ws).await else {
                panic!("expected send_text");
            };
            send(&mut ws, serde_json::json!({"type": "send_result", "requestId": request_id, "success": false, "error": "not on whatsapp"})).await;

            assert_eq!(recv(&mut ws).await, GatewayMessage::SaveCreds {
                account_id: "acc1".into()
            });

            send(&mut ws, serde_json::json!({"type": "disconnected", "accountId": "acc1", "reason": "logged out", "statusCode": 401})).await;
        })
        .await;

        let mut session = open_session(&url, "acc1", "/auth/auth_acc1", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(
            session.events.recv().await,
            Some(SessionEvent::Qr("code-1".into()))
        );
        assert_eq!(
            session.events.recv().await,
            Some(SessionEvent::Connected {
                phone_number: Some("5551234567".into())
            })
        );

        session
            .handle
            .send_text("5551234567@s.whatsapp.net", "hi")
            .await
            .unwrap();

        let err = session
            .handle
            .send_text("5550000000@s.whatsapp.net", "hi")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not on whatsapp"), "{err}");

        session.handle.persist_credentials().await.unwrap();

        assert_eq!(
            session.events.recv().await,
            Some(SessionEvent::Closed(CloseReason::LoggedOut))
        );

        server.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_socket_is_a_recoverable_close() {
        let (url, server) = fake_sidecar(|mut ws| async move {
            let _ = recv(&mut ws).await;
            drop(ws);
        })
        .await;

        let mut session = open_session(&url, "acc1", "/auth", Duration::from_secs(5))
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(
            session.events.recv().await,
            Some(SessionEvent::Closed(CloseReason::Recoverable(
                "sidecar connection lost".into()
            )))
        );
        assert!(session.handle.send_text("x@s.whatsapp.net", "hi").await.is_err());
    }

    #[tokio::test]
    async fn closing_the_handle_ends_the_stream_quietly() {
        let (url, server) = fake_sidecar(|mut ws| async move {
            // Drain until the relay closes the socket.
            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, Message::Close(_)) {
                    break;
                }
            }
        })
        .await;

        let mut session = open_session(&url, "acc1", "/auth", Duration::from_secs(5))
            .await
            .unwrap();
        session.handle.close().await;

        assert_eq!(session.events.recv().await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn open_fails_without_a_sidecar() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        assert!(
            open_session(&url, "acc1", "/auth", Duration::from_secs(1))
                .await
                .is_err()
        );
    }
}
