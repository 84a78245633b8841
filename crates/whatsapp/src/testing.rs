//! In-process fakes for exercising the lifecycle without a sidecar.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    tokio::{
        sync::{Notify, mpsc},
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
};

use crate::{
    session::{Session, SessionConnector, SessionEvent, SessionHandle},
    webhook::{EventNotifier, WebhookEvent},
};

const WAIT_STEP: Duration = Duration::from_millis(5);
const WAIT_STEPS: usize = 1000;

/// Poll `check` until it returns true, for up to five seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..WAIT_STEPS {
        if check().await {
            return true;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    false
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session handle that records what it was asked to do.
#[derive(Default)]
pub struct FakeHandle {
    sent: Mutex<Vec<(String, String)>>,
    send_error: Mutex<Option<String>>,
    credential_saves: AtomicUsize,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl FakeHandle {
    /// `(jid, text)` pairs sent so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    /// Make every following send fail with `error`.
    pub fn fail_sends(&self, error: &str) {
        *lock(&self.send_error) = Some(error.to_string());
    }

    pub fn credential_saves(&self) -> usize {
        self.credential_saves.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionHandle for FakeHandle {
    async fn send_text(&self, jid: &str, text: &str) -> Result<()> {
        let send_error = lock(&self.send_error).clone();
        if let Some(error) = send_error {
            bail!(error);
        }
        lock(&self.sent).push((jid.to_string(), text.to_string()));
        Ok(())
    }

    async fn persist_credentials(&self) -> Result<()> {
        self.credential_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Test-side end of an opened fake session.
///
/// Dropping it ends the session's event stream, like a lost socket.
pub struct FakeSession {
    pub account_id: String,
    pub handle: Arc<FakeHandle>,
    events: mpsc::Sender<SessionEvent>,
}

impl FakeSession {
    /// Push an event into the session. Ignored once the session is closed.
    pub async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Connector handing out [`FakeHandle`] sessions.
pub struct FakeConnector {
    opened_tx: mpsc::UnboundedSender<FakeSession>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeSession>>,
    open_times: Mutex<Vec<Instant>>,
    fail_next: Mutex<Option<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
            open_times: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: &str) {
        *lock(&self.fail_next) = Some(error.to_string());
    }

    /// Number of `open` calls, failed ones included.
    pub fn open_count(&self) -> usize {
        lock(&self.open_times).len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        lock(&self.open_times).clone()
    }

    /// Wait for the next successfully opened session.
    pub async fn next_session(&self) -> FakeSession {
        let mut rx = self.opened_rx.lock().await;
        match rx.recv().await {
            Some(session) => session,
            None => unreachable!("connector keeps its own sender alive"),
        }
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn open(&self, account_id: &str) -> Result<Session> {
        lock(&self.open_times).push(Instant::now());
        let fail = lock(&self.fail_next).take();
        if let Some(error) = fail {
            bail!(error);
        }

        let handle = Arc::new(FakeHandle::default());
        let (test_tx, mut test_rx) = mpsc::channel::<SessionEvent>(64);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);

        // Forward until the handle is closed or the test drops its end.
        let cancel = handle.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = test_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let _ = self.opened_tx.send(FakeSession {
            account_id: account_id.to_string(),
            handle: Arc::clone(&handle),
            events: test_tx,
        });

        Ok(Session {
            handle,
            events: event_rx,
        })
    }
}

/// Notifier that keeps every event it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<WebhookEvent>>,
    changed: Notify,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WebhookEvent> {
        lock(&self.events).clone()
    }

    /// Wait until at least `count` events arrived, for up to five seconds.
    pub async fn wait_for(&self, count: usize) -> Vec<WebhookEvent> {
        let deadline = Instant::now() + WAIT_STEP * WAIT_STEPS as u32;
        loop {
            let changed = self.changed.notified();
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.events();
            }
        }
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn notify(&self, event: WebhookEvent) {
        lock(&self.events).push(event);
        self.changed.notify_waiters();
    }
}
