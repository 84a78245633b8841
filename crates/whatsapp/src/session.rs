//! Protocol session abstraction.
//!
//! A [`SessionConnector`] opens one protocol session per account and hands
//! back a [`Session`]: the handle used to act on the session plus the ordered
//! stream of events it produces. The relay never sees the WhatsApp wire
//! protocol; it only consumes these events.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The account was explicitly logged out. Terminal.
    LoggedOut,
    /// Network-level or engine-level disconnect. Worth reconnecting.
    Recoverable(String),
}

/// An inbound message as reported by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: Option<String>,
    /// JID of the chat the message arrived in.
    pub remote_jid: String,
    /// Sent by the logged-in account itself.
    pub from_me: bool,
    /// Plain text body, if the message carries one.
    pub text: Option<String>,
}

impl InboundMessage {
    /// Text to forward, or `None` if the message should be skipped.
    pub fn forwardable_text(&self) -> Option<&str> {
        if self.from_me {
            return None;
        }
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Events produced by a protocol session, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A pairing challenge to render as a QR code.
    Qr(String),
    Connected {
        phone_number: Option<String>,
    },
    Closed(CloseReason),
    Messages(Vec<InboundMessage>),
    /// The engine's credentials changed and should be persisted.
    CredentialsUpdated,
}

/// Live reference to one protocol session.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Send a plain text message to `jid`.
    async fn send_text(&self, jid: &str, text: &str) -> Result<()>;

    /// Ask the engine to persist the account's current credentials.
    async fn persist_credentials(&self) -> Result<()>;

    /// Tear the session down without logging the account out.
    async fn close(&self);
}

/// A freshly opened session.
pub struct Session {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Opens protocol sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, account_id: &str) -> Result<Session>;
}
