//! Webhook delivery log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProvider {
    Heyflow,
    Stripe,
}

impl WebhookProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookProvider::Heyflow => "heyflow",
            WebhookProvider::Stripe => "stripe",
        }
    }
}

impl fmt::Display for WebhookProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heyflow" => Ok(WebhookProvider::Heyflow),
            "stripe" => Ok(WebhookProvider::Stripe),
            other => Err(format!("unknown webhook provider: {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: WebhookProvider,
    /// Provider-assigned delivery id (`evt_...` for Stripe, submission id or body digest for
    /// HeyFlow).
    pub provider_event_id: String,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct NewWebhookEvent {
    pub provider: WebhookProvider,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Result of trying to claim a delivery for processing.
#[derive(Clone, Debug)]
pub enum WebhookClaim {
    /// First delivery, or a redelivery of an event whose earlier processing failed.
    Claimed(WebhookEvent),
    /// The event was already processed successfully; nothing to do.
    AlreadyProcessed(WebhookEvent),
    /// Another delivery of the same event holds the claim.
    InProgress(WebhookEvent),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookEventFilter {
    #[serde(default)]
    pub unprocessed: bool,
    pub provider: Option<WebhookProvider>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl WebhookEventFilter {
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        !(self.unprocessed && event.processed)
            && self.provider.map_or(true, |p| p == event.provider)
    }
}
