//! HTTP control routes.

use {
    axum::{
        Json, Router,
        extract::{Path, State, rejection::JsonRejection},
        routing::{get, post},
    },
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info},
};

use warelay_whatsapp::ConnectionState;

use crate::{error::ApiError, server::AppState};

/// Liveness response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub status: String,
    pub message: String,
    pub connections: usize,
}

/// Request to start a session.
#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,
}

/// Request to send a text message.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::Validation(format!("{field} is required"))),
    }
}

/// Account ids name a credential directory, so they must stay a single path
/// component.
fn valid_account_id(value: Option<String>) -> Result<String, ApiError> {
    let id = required(value, "account_id")?;
    if id.contains(['/', '\\']) || id.contains("..") {
        return Err(ApiError::Validation(
            "account_id must not contain path separators or '..'".into(),
        ));
    }
    Ok(id)
}

/// Liveness and current session count.
async fn root_handler(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        status: "running".into(),
        message: "WhatsApp relay".into(),
        connections: state.manager.registry().size().await,
    })
}

/// Start a session. Returns before the session reaches `open`.
async fn connect_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let Json(req) = payload?;
    let account_id = valid_account_id(req.account_id)?;

    info!(account_id, "connection requested");
    state.manager.connect(&account_id).await.map_err(|e| {
        error!(account_id, error = %e, "failed to start connection");
        ApiError::Internal(format!("{e:#}"))
    })?;

    Ok(Json(ConnectResponse {
        success: true,
        message: "connection started, scan the QR code".into(),
    }))
}

/// Whether the account has a registered session.
async fn status_handler(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Json<StatusResponse> {
    let state = state.manager.registry().state(&account_id).await;
    debug!(account_id, ?state, "status requested");
    Json(StatusResponse {
        connected: state.is_some(),
        state,
    })
}

/// Send a text message through a registered session.
async fn send_message_handler(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(req) = payload?;
    let account_id = required(req.account_id, "account_id")?;

    if !state.manager.registry().contains(&account_id).await {
        return Err(ApiError::account_not_connected());
    }

    let to = required(req.to, "to")?;
    let message = required(req.message, "message")?;

    let jid = state
        .manager
        .send_text(&account_id, &to, &message)
        .await
        .map_err(|e| {
            error!(account_id, to, error = %e, "failed to send message");
            ApiError::from(e)
        })?;
    debug!(account_id, to = %jid, "message sent");

    Ok(Json(SendMessageResponse { success: true }))
}

/// Create the control router.
pub fn control_router() -> Router<AppState> {
    Router::new()
        .route("/", get(root_handler))
        .route("/connect", post(connect_handler))
        .route("/status/{account_id}", get(status_handler))
        .route("/send-message", post(send_message_handler))
}
