//! Outbound message sending and WhatsApp addressing.

use {thiserror::Error, tracing::debug};

use crate::state::SessionRegistry;

/// Domain appended to bare phone numbers.
pub const USER_JID_SUFFIX: &str = "@s.whatsapp.net";

/// Errors from sending through a registered session.
#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("account {0} is not connected")]
    NotConnected(String),

    #[error(transparent)]
    Send(anyhow::Error),
}

/// Turn a phone number into an addressable JID. Anything that already
/// contains a domain is passed through.
pub fn normalize_recipient(to: &str) -> String {
    if to.contains('@') {
        to.to_string()
    } else {
        format!("{to}{USER_JID_SUFFIX}")
    }
}

/// Sender id as reported to the webhook: the JID without the user domain.
pub fn sender_id(jid: &str) -> String {
    jid.replacen(USER_JID_SUFFIX, "", 1)
}

/// Send `text` to `to` through the session registered for `account_id`.
///
/// Returns the normalized recipient JID.
pub async fn send_text(
    registry: &SessionRegistry,
    account_id: &str,
    to: &str,
    text: &str,
) -> Result<String, OutboundError> {
    let handle = registry
        .get(account_id)
        .await
        .ok_or_else(|| OutboundError::NotConnected(account_id.to_string()))?;

    let jid = normalize_recipient(to);
    debug!(account_id, to = %jid, "sending text message");
    handle
        .send_text(&jid, text)
        .await
        .map_err(OutboundError::Send)?;
    Ok(jid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_appends_user_domain() {
        assert_eq!(
            normalize_recipient("5551234567"),
            "5551234567@s.whatsapp.net"
        );
    }

    #[test]
    fn normalize_keeps_existing_domain() {
        assert_eq!(
            normalize_recipient("5551234567@s.whatsapp.net"),
            "5551234567@s.whatsapp.net"
        );
        assert_eq!(
            normalize_recipient("120363000000000000@g.us"),
            "120363000000000000@g.us"
        );
    }

    #[test]
    fn sender_id_strips_user_domain_only() {
        assert_eq!(sender_id("5551234567@s.whatsapp.net"), "5551234567");
        assert_eq!(sender_id("120363000000000000@g.us"), "120363000000000000@g.us");
    }

    #[test]
    fn send_error_surfaces_underlying_message() {
        let err = OutboundError::Send(anyhow::anyhow!("not on whatsapp"));
        assert_eq!(err.to_string(), "not on whatsapp");
    }
}
