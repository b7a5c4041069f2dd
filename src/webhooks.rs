use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Extension, Json, Router};
use serde::Deserialize;

use crate::config::XENDIT_WEBHOOK_TOKEN;
use crate::packages::{SettlementOutcome, SettlementService};

pub fn routes() -> Router {
    Router::new().route("/api/webhooks/xendit", post(xendit_webhook))
}

/// The subset of the invoice callback we act on; providers add fields freely.
/// `external_id` only matters for payment successes, so its absence on other
/// statuses is not an error.
#[derive(Debug, Deserialize)]
struct InvoiceCallback {
    status: String,
    #[serde(default)]
    external_id: Option<String>,
}

/// Payment provider callback. The shared token in `x-callback-token` is the
/// only authentication; the check applies only when a token is configured.
///
/// The body is parsed by hand so a malformed payload surfaces as a plain 500
/// the provider will retry, not a client error.
async fn xendit_webhook(
    Extension(settlement): Extension<Arc<SettlementService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let presented = headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok());
    let authorized = match (XENDIT_WEBHOOK_TOKEN.as_deref(), presented) {
        (Some(expected), Some(presented)) => expected == presented,
        (Some(_), None) => false,
        (None, _) => true,
    };
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "Invalid webhook token").into_response();
    }

    let callback: InvoiceCallback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(error) => {
            tracing::error!(%error, "failed to parse invoice callback body");
            return internal_error();
        }
    };

    match settlement
        .settle_invoice(
            &callback.status,
            callback.external_id.as_deref().unwrap_or_default(),
        )
        .await
    {
        Ok(SettlementOutcome::Settled) | Ok(SettlementOutcome::Ignored) => {
            Json(serde_json::json!({ "received": true })).into_response()
        }
        Ok(SettlementOutcome::PurchaseMissing) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Purchase not found" })),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(?error, "settlement failed");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal server error" })),
    )
        .into_response()
}
