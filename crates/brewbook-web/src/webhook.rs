//! CMS webhook intake: signature check, then a background story sync.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use brewbook_sync::StoryWebhookEvent;
use hmac::{Hmac, Mac};
use serde_json::{json, Value as JsonValue};
use sha2::Sha256;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::AppState;

pub const SIGNATURE_HEADER: &str = "webhook-signature";

const MAX_BODY_BYTES: usize = 1024 * 1024;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing webhook-signature header")]
    MissingSignature,
    #[error("webhook secret is not configured")]
    SecretNotConfigured,
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("unreadable body")]
    Body,
    #[error("body is not JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid signature" }))).into_response()
    }
}

/// Lowercase hex HMAC-SHA256 of `body`.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    // HMAC takes keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks `signature` against the body in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), WebhookError> {
    let expected = hex::decode(signature.trim()).map_err(|_| WebhookError::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| WebhookError::InvalidSignature)
}

/// First `x-forwarded-for` entry, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) async fn storyblok_webhook_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    match accept_webhook(&state, request).await {
        Ok(payload) => {
            let action = payload.get("action").and_then(JsonValue::as_str).unwrap_or("unknown");
            info!(%ip, action, "webhook received");
            dispatch_sync(&state, payload);
            Json(json!({ "ok": true })).into_response()
        }
        Err(err) => {
            warn!(%ip, reason = %err, "webhook rejected");
            err.into_response()
        }
    }
}

async fn accept_webhook(state: &AppState, request: Request) -> Result<JsonValue, WebhookError> {
    let signature = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or(WebhookError::MissingSignature)?;
    let secret = state
        .webhook_secret
        .as_ref()
        .ok_or(WebhookError::SecretNotConfigured)?;
    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| WebhookError::Body)?;
    verify_signature(secret.expose(), &body, &signature)?;
    Ok(serde_json::from_slice(&body)?)
}

fn dispatch_sync(state: &AppState, payload: JsonValue) {
    let Some(indexer) = state.indexer.clone() else {
        return;
    };
    let event: StoryWebhookEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "webhook payload is not a story event");
            return;
        }
    };
    tokio::spawn(async move {
        if let Err(err) = indexer.sync_story_event(&event).await {
            error!(story_id = ?event.story_id, error = ?err, "story sync failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_verify_only_with_matching_secret() {
        let body = br#"{"action":"published","story_id":1001}"#;
        let signature = sign_body("hook-secret", body);
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert!(verify_signature("hook-secret", body, &signature).is_ok());
        assert!(verify_signature("other-secret", body, &signature).is_err());
        assert!(verify_signature("hook-secret", b"{}", &signature).is_err());
        assert!(verify_signature("hook-secret", body, "not-hex").is_err());
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let peer: SocketAddr = "10.0.0.9:4410".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None), "unknown");
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.9");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }
}
