use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};

use super::super::AppState;
use super::{ApiResponse, error_response, ok, store_error};
use crate::core::triggers::{Event, TriggerMatch};

type HmacSha256 = Hmac<Sha256>;

/// Inbound webhook delivery. Signed deliveries are required when the trigger has a secret.
pub async fn webhook_endpoint(
    Path(path): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResponse {
    let path = path.trim_matches('/').to_string();
    let trigger = match state.runtime.store.find_webhook_trigger(&path).await {
        Ok(Some(trigger)) => trigger,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "No webhook registered for this path");
        }
        Err(e) => return store_error(e),
    };

    if !trigger.enabled {
        return ok(serde_json::json!({
            "success": false,
            "error": "Webhook is currently disabled",
            "matched": [],
        }));
    }

    if let Some(secret) = trigger.config.secret.as_deref().filter(|s| !s.is_empty())
        && !verify_webhook_signature(&headers, &body, secret)
    {
        warn!("Rejected unsigned or mis-signed delivery on webhook '{}'", path);
        return error_response(StatusCode::UNAUTHORIZED, "Signature verification failed");
    }

    let payload = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
    let event = Event::webhook(&path, payload);
    match state
        .runtime
        .triggers
        .dispatch(&event, state.runtime.directory())
        .await
    {
        Ok(runs) => {
            let matched: Vec<TriggerMatch> = runs.into_iter().map(|run| run.matched).collect();
            info!("Webhook '{}' started {} run(s)", path, matched.len());
            ok(serde_json::json!({ "success": true, "matched": matched }))
        }
        Err(e) => store_error(e),
    }
}

fn hmac_hex(secret: &str, payload: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Supports GitHub (`X-Hub-Signature-256`), Stripe (`Stripe-Signature`) and a
/// generic `X-Signature` hex digest. No recognised header fails closed.
pub(crate) fn verify_webhook_signature(headers: &HeaderMap, body: &str, secret: &str) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(sig) = header("x-hub-signature-256")
        && let Some(hex_sig) = sig.strip_prefix("sha256=")
    {
        return hmac_hex(secret, body)
            .is_some_and(|expected| constant_time_eq(hex_sig.as_bytes(), expected.as_bytes()));
    }

    if let Some(sig) = header("stripe-signature") {
        let parts: std::collections::HashMap<&str, &str> =
            sig.split(',').filter_map(|p| p.split_once('=')).collect();
        if let (Some(timestamp), Some(v1_sig)) = (parts.get("t"), parts.get("v1")) {
            let signed_payload = format!("{}.{}", timestamp, body);
            return hmac_hex(secret, &signed_payload)
                .is_some_and(|expected| constant_time_eq(v1_sig.as_bytes(), expected.as_bytes()));
        }
    }

    if let Some(sig) = header("x-signature") {
        return hmac_hex(secret, body)
            .is_some_and(|expected| constant_time_eq(sig.as_bytes(), expected.as_bytes()));
    }

    false
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
