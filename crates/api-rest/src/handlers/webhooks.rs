//! Provider webhooks and the ingestion log.
//!
//! The ingestion routes are called by HeyFlow and Stripe, not by staff, so they authenticate
//! with a shared token or a payload signature instead of an Auth0 token. The raw body is passed
//! through untouched because the Stripe signature covers the exact bytes received.

use crate::auth::AuthUser;
use crate::error::{ApiResult, ErrorBody};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use clinic_core::models::{WebhookEvent, WebhookEventFilter, WebhookProvider};
use clinic_core::IngestOutcome;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

pub const HEYFLOW_TOKEN_HEADER: &str = "x-webhook-token";
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct WebhookEventQuery {
    /// Only events that have not been processed successfully.
    #[serde(default)]
    pub unprocessed: bool,
    pub provider: Option<WebhookProvider>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[utoipa::path(
    post,
    path = "/api/v1/webhooks/heyflow",
    request_body(content = serde_json::Value, description = "HeyFlow form submission"),
    params(("X-Webhook-Token" = Option<String>, Header, description = "Shared webhook token")),
    responses(
        (status = 200, description = "Delivery recorded", body = IngestOutcome),
        (status = 400, description = "Body is not JSON", body = ErrorBody),
        (status = 401, description = "Wrong or missing token", body = ErrorBody),
        (status = 409, description = "Same event is being processed or was changed concurrently; retry", body = ErrorBody),
        (status = 500, description = "Delivery could not be recorded; retry", body = ErrorBody)
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn heyflow_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IngestOutcome>> {
    let outcome = state
        .services
        .webhooks
        .ingest_heyflow(&body, header(&headers, HEYFLOW_TOKEN_HEADER))
        .await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body(content = serde_json::Value, description = "Stripe event"),
    params(("Stripe-Signature" = String, Header, description = "Stripe webhook signature")),
    responses(
        (status = 200, description = "Delivery recorded", body = IngestOutcome),
        (status = 400, description = "Bad signature or payload", body = ErrorBody),
        (status = 401, description = "No signing secret configured", body = ErrorBody),
        (status = 409, description = "Same event is being processed or was changed concurrently; retry", body = ErrorBody),
        (status = 500, description = "Delivery could not be recorded; retry", body = ErrorBody)
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IngestOutcome>> {
    let outcome = state
        .services
        .webhooks
        .ingest_stripe(&body, header(&headers, STRIPE_SIGNATURE_HEADER))
        .await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    get,
    path = "/api/v1/webhooks/events",
    params(WebhookEventQuery),
    responses(
        (status = 200, description = "Recorded deliveries, newest first (oldest first with `unprocessed`)", body = [WebhookEvent])
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_webhook_events(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Query(query): Query<WebhookEventQuery>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    let filter = WebhookEventFilter {
        unprocessed: query.unprocessed,
        provider: query.provider,
        limit: query.limit,
        offset: query.offset,
    };
    Ok(Json(state.services.webhooks.list_events(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/webhooks/events/{id}",
    params(("id" = Uuid, Path, description = "Webhook event id")),
    responses(
        (status = 200, description = "Recorded delivery", body = WebhookEvent),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn get_webhook_event(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookEvent>> {
    Ok(Json(state.services.webhooks.get_event(id).await?))
}
