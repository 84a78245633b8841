//! Wire types for the WhatsApp protocol sidecar.

use serde::{Deserialize, Serialize};

use crate::session::{CloseReason, InboundMessage, SessionEvent};

/// Status code the protocol engine reports for an explicit logout.
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Messages sent from the relay to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Login {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "authDir")]
        auth_dir: String,
    },
    SendText {
        #[serde(rename = "accountId")]
        account_id: String,
        to: String,
        text: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SaveCreds {
        #[serde(rename = "accountId")]
        account_id: String,
    },
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        #[serde(rename = "accountId")]
        account_id: String,
        qr: String,
    },
    Connected {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "phoneNumber", default)]
        phone_number: Option<String>,
    },
    Disconnected {
        #[serde(rename = "accountId")]
        account_id: String,
        reason: String,
        #[serde(rename = "statusCode", default)]
        status_code: Option<u16>,
    },
    LoggedOut {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    MessagesUpsert {
        #[serde(rename = "accountId")]
        account_id: String,
        messages: Vec<WireMessage>,
    },
    CredsUpdate {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    SendResult {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(rename = "messageId", default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(rename = "accountId", default)]
        account_id: Option<String>,
        error: String,
    },
}

impl SidecarMessage {
    /// Account the message belongs to, if it is account-scoped.
    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Qr { account_id, .. }
            | Self::Connected { account_id, .. }
            | Self::Disconnected { account_id, .. }
            | Self::LoggedOut { account_id }
            | Self::MessagesUpsert { account_id, .. }
            | Self::CredsUpdate { account_id } => Some(account_id),
            Self::Error { account_id, .. } => account_id.as_deref(),
            Self::SendResult { .. } => None,
        }
    }

    /// Translate into a session event. Returns `None` for messages that are
    /// not part of the event stream (send results and errors).
    pub fn into_event(self) -> Option<SessionEvent> {
        match self {
            Self::Qr { qr, .. } => Some(SessionEvent::Qr(qr)),
            Self::Connected { phone_number, .. } => Some(SessionEvent::Connected { phone_number }),
            Self::Disconnected {
                reason,
                status_code,
                ..
            } => {
                let reason = if status_code == Some(LOGGED_OUT_STATUS) {
                    CloseReason::LoggedOut
                } else {
                    CloseReason::Recoverable(reason)
                };
                Some(SessionEvent::Closed(reason))
            },
            Self::LoggedOut { .. } => Some(SessionEvent::Closed(CloseReason::LoggedOut)),
            Self::MessagesUpsert { messages, .. } => Some(SessionEvent::Messages(
                messages.into_iter().map(InboundMessage::from).collect(),
            )),
            Self::CredsUpdate { .. } => Some(SessionEvent::CredentialsUpdated),
            Self::SendResult { .. } | Self::Error { .. } => None,
        }
    }
}

/// One message inside a `messages_upsert` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    #[serde(rename = "remoteJid")]
    pub remote_jid: String,
    #[serde(rename = "fromMe", default)]
    pub from_me: bool,
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(rename = "extendedText", default)]
    pub extended_text: Option<String>,
}

impl From<WireMessage> for InboundMessage {
    fn from(msg: WireMessage) -> Self {
        Self {
            message_id: msg.message_id,
            remote_jid: msg.remote_jid,
            from_me: msg.from_me,
            text: msg
                .conversation
                .filter(|text| !text.is_empty())
                .or(msg.extended_text),
        }
    }
}
