//! Per-account connection lifecycle.
//!
//! [`ConnectionManager::connect`] opens a protocol session, registers its
//! handle and hands the session's event stream to a supervisor task. The
//! supervisor forwards QR codes, connection state and inbound messages to the
//! [`EventNotifier`], and decides what happens when the session closes:
//!
//! - explicit logout: the account is removed from the registry, nothing else;
//! - anything else: the entry stays registered, and after the configured delay
//!   the same account is re-opened and its handle replaced in place.
//!
//! Every `connect` call gets a new generation number. A supervisor only acts
//! on the registry while its generation still owns the account's entry, so a
//! newer `connect` silently retires the older session and any reconnect it
//! had pending.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    anyhow::{Context, Result},
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use warelay_config::ReconnectConfig;

use crate::{
    outbound::{self, OutboundError, sender_id},
    qr::qr_data_url,
    session::{CloseReason, InboundMessage, SessionConnector, SessionEvent},
    state::{ConnectionState, SessionEntry, SessionRegistry},
    webhook::{EventNotifier, WebhookEvent},
};

/// Opens, supervises and reconnects protocol sessions.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn SessionConnector>,
    registry: SessionRegistry,
    notifier: Arc<dyn EventNotifier>,
    reconnect: ReconnectConfig,
    next_generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        registry: SessionRegistry,
        notifier: Arc<dyn EventNotifier>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                registry,
                notifier,
                reconnect,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Open a session for `account_id` and start supervising it.
    ///
    /// Returns once the session is registered, not once it reaches `open`.
    /// An existing session for the same account is closed and replaced.
    pub async fn connect(&self, account_id: &str) -> Result<()> {
        info!(account_id, "starting connection");

        let session = self
            .inner
            .connector
            .open(account_id)
            .await
            .with_context(|| format!("failed to open session for {account_id}"))?;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = SessionEntry::new(Arc::clone(&session.handle), generation);
        if let Some(old) = self.inner.registry.put(account_id, entry).await {
            info!(
                account_id,
                old_generation = old.generation,
                generation,
                "replacing existing session"
            );
            old.handle.close().await;
        }

        let inner = Arc::clone(&self.inner);
        let account_id = account_id.to_string();
        tokio::spawn(async move {
            inner.supervise(account_id, generation, session.events).await;
        });

        Ok(())
    }

    /// Send a text message through the account's session.
    pub async fn send_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
    ) -> Result<String, OutboundError> {
        outbound::send_text(&self.inner.registry, account_id, to, text).await
    }

    /// Close every session and empty the registry.
    pub async fn shutdown(&self) {
        let drained = self.inner.registry.drain().await;
        let count = drained.len();
        for (account_id, entry) in drained {
            debug!(account_id, "closing session");
            entry.handle.close().await;
        }
        info!(count, "all sessions closed");
    }
}

impl Inner {
    async fn supervise(
        self: Arc<Self>,
        account_id: String,
        generation: u64,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        // Reconnects since the session last reached `open`.
        let mut attempts: u32 = 0;

        loop {
            let reason = self
                .pump(&account_id, generation, &mut events, &mut attempts)
                .await;

            if !self.registry.is_current(&account_id, generation).await {
                debug!(account_id, generation, "session superseded, supervisor exiting");
                return;
            }

            let reason = match reason {
                CloseReason::LoggedOut => {
                    info!(account_id, "logged out, removing session");
                    self.retire(&account_id, generation).await;
                    return;
                },
                CloseReason::Recoverable(reason) => reason,
            };

            attempts += 1;
            if let Some(max) = self.reconnect.max_attempts
                && attempts > max
            {
                error!(account_id, attempts, reason, "giving up on reconnecting");
                self.retire(&account_id, generation).await;
                return;
            }

            warn!(
                account_id,
                reason,
                attempt = attempts,
                delay_ms = self.reconnect.delay_ms,
                "connection closed, reconnecting"
            );
            self.registry
                .set_state(&account_id, generation, ConnectionState::Reconnecting)
                .await;
            if let Some(entry) = self.registry.entry(&account_id).await
                && entry.generation == generation
            {
                entry.handle.close().await;
            }

            tokio::time::sleep(self.reconnect.delay()).await;

            if !self.registry.is_current(&account_id, generation).await {
                debug!(account_id, generation, "session superseded, skipping reconnect");
                return;
            }

            let session = match self.connector.open(&account_id).await {
                Ok(session) => session,
                Err(e) => {
                    error!(account_id, error = %e, "reconnect failed, removing session");
                    self.retire(&account_id, generation).await;
                    return;
                },
            };

            match self
                .registry
                .replace_handle(&account_id, generation, session.handle)
                .await
            {
                Ok(_) => {
                    info!(account_id, attempt = attempts, "session reopened");
                    events = session.events;
                },
                Err(handle) => {
                    debug!(account_id, generation, "session superseded during reconnect");
                    handle.close().await;
                    return;
                },
            }
        }
    }

    /// Handle events until the session closes.
    async fn pump(
        &self,
        account_id: &str,
        generation: u64,
        events: &mut mpsc::Receiver<SessionEvent>,
        attempts: &mut u32,
    ) -> CloseReason {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Closed(reason) = event {
                return reason;
            }

            if !self.registry.is_current(account_id, generation).await {
                debug!(account_id, generation, "ignoring event from a superseded session");
                continue;
            }

            match event {
                SessionEvent::Qr(raw) => self.on_qr(account_id, generation, &raw).await,
                SessionEvent::Connected { phone_number } => {
                    *attempts = 0;
                    self.on_connected(account_id, generation, phone_number)
                        .await;
                },
                SessionEvent::Messages(batch) => self.on_messages(account_id, batch).await,
                SessionEvent::CredentialsUpdated => {
                    self.on_credentials_updated(account_id, generation).await
                },
                SessionEvent::Closed(_) => {},
            }
        }

        CloseReason::Recoverable("session event stream ended".into())
    }

    async fn on_qr(&self, account_id: &str, generation: u64, raw: &str) {
        debug!(account_id, "received QR code");
        let qr_code = match qr_data_url(raw) {
            Ok(url) => url,
            Err(e) => {
                warn!(account_id, error = %e, "failed to render QR code");
                return;
            },
        };

        self.registry
            .set_state(account_id, generation, ConnectionState::QrPending)
            .await;
        self.notifier
            .notify(WebhookEvent::QrGenerated {
                account_id: account_id.to_string(),
                qr_code,
            })
            .await;
    }

    async fn on_connected(&self, account_id: &str, generation: u64, phone_number: Option<String>) {
        info!(account_id, ?phone_number, "whatsapp connected");
        self.registry
            .set_state(account_id, generation, ConnectionState::Open)
            .await;
        self.notifier
            .notify(WebhookEvent::Connected {
                account_id: account_id.to_string(),
                phone_number,
            })
            .await;
    }

    async fn on_messages(&self, account_id: &str, batch: Vec<InboundMessage>) {
        for msg in batch {
            let Some(text) = msg.forwardable_text() else {
                continue;
            };
            let from = sender_id(&msg.remote_jid);
            info!(account_id, from, message_id = ?msg.message_id, "message received");

            let event = WebhookEvent::message_received(account_id, from, text.to_string());
            self.notifier.notify(event).await;
        }
    }

    async fn on_credentials_updated(&self, account_id: &str, generation: u64) {
        let Some(entry) = self.registry.entry(account_id).await else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        match entry.handle.persist_credentials().await {
            Ok(()) => debug!(account_id, "credentials persisted"),
            Err(e) => warn!(account_id, error = %e, "failed to persist credentials"),
        }
    }

    /// Remove the account if `generation` still owns it and close its handle.
    async fn retire(&self, account_id: &str, generation: u64) {
        if let Some(entry) = self.registry.remove_if_current(account_id, generation).await {
            entry.handle.close().await;
        }
    }
}
