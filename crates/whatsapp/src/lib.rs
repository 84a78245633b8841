//! WhatsApp session relay core.
//!
//! Keeps WhatsApp Web sessions alive through a protocol sidecar (a Baileys
//! process reached over WebSocket) and forwards their events to a webhook.

pub mod lifecycle;
pub mod outbound;
pub mod qr;
pub mod session;
pub mod sidecar;
pub mod state;
pub mod types;
pub mod webhook;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    lifecycle::ConnectionManager,
    outbound::{OutboundError, normalize_recipient},
    session::{CloseReason, InboundMessage, Session, SessionConnector, SessionEvent, SessionHandle},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarConnector},
    state::{ConnectionState, SessionRegistry},
    webhook::{EventNotifier, WebhookDeliveryError, WebhookEvent, WebhookNotifier},
};
