//! Webhook ingestion.
//!
//! Every delivery is authenticated, parsed, and claimed in the `webhook_events` log under its
//! `(provider, provider_event_id)` key before any side effect runs. A delivery of an event that
//! was already processed is acknowledged as a duplicate and does nothing.
//!
//! Processing failures are recorded on the event (`error_message`) and acknowledged so the
//! provider stops retrying; the operator re-runs them with [`WebhookService::reprocess_pending`].
//! Store failures and lost write races are returned to the caller so the provider redelivers.
//!
//! A claim is exclusive for a lease period. A delivery that arrives while another one is
//! processing the same event is refused with `Conflict`, and the provider's retry then sees
//! either the finished event or a free claim.

use super::intake::{apply_intake, assess_intake};
use super::reconcile::StripeReconciler;
use super::{Disposition, SharedStore};
use crate::config::CoreConfig;
use crate::models::{
    NewWebhookEvent, WebhookClaim, WebhookEvent, WebhookEventFilter, WebhookProvider,
};
use crate::{ClinicError, ClinicResult};
use chrono::Utc;
use providers::{IntakeSubmission, ProviderError, StripeEvent};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

const HEYFLOW_EVENT_TYPE: &str = "intake.submitted";

/// Result of ingesting one delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Processed { event_id: Uuid },
    /// Recorded, but nothing to do for this event type or state.
    Ignored { event_id: Uuid, reason: String },
    /// The event was already processed by an earlier delivery.
    Duplicate { event_id: Uuid },
    /// Processing failed; the error is stored on the event for reprocessing.
    Failed { event_id: Uuid, error: String },
}

/// Counts from a reprocessing run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReprocessSummary {
    pub processed: usize,
    pub ignored: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct WebhookService {
    cfg: Arc<CoreConfig>,
    store: SharedStore,
    reconciler: StripeReconciler,
}

/// Compare secrets without short-circuiting on the first differing byte.
fn secrets_match(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len()
        && expected
            .bytes()
            .zip(provided.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

impl WebhookService {
    pub fn new(cfg: Arc<CoreConfig>, store: SharedStore) -> Self {
        let reconciler = StripeReconciler::new(store.clone());
        Self {
            cfg,
            store,
            reconciler,
        }
    }

    /// Ingest a HeyFlow form submission.
    ///
    /// `token` is the `X-Webhook-Token` header. It is only checked when a token is configured.
    ///
    /// # Errors
    /// `Unauthorized` for a wrong or missing token, `Provider` when the body is not JSON,
    /// `Conflict` or `StaleWrite` when a concurrent delivery won, and `Database` when the
    /// delivery could not be recorded.
    pub async fn ingest_heyflow(
        &self,
        body: &[u8],
        token: Option<&str>,
    ) -> ClinicResult<IngestOutcome> {
        if let Some(expected) = self.cfg.heyflow_webhook_token() {
            if !token.is_some_and(|t| secrets_match(expected, t)) {
                return Err(ClinicError::Unauthorized("invalid HeyFlow webhook token".into()));
            }
        }

        let payload: serde_json::Value =
            serde_json::from_slice(body).map_err(ProviderError::from)?;
        let provider_event_id = providers::delivery_key(&payload, body);

        self.ingest(NewWebhookEvent {
            provider: WebhookProvider::Heyflow,
            provider_event_id,
            event_type: HEYFLOW_EVENT_TYPE.to_string(),
            payload,
        })
        .await
    }

    /// Ingest a Stripe event after verifying its `Stripe-Signature` header.
    ///
    /// # Errors
    /// `Unauthorized` when no signing secret is configured, `Provider` for a bad signature or
    /// payload, `Conflict` or `StaleWrite` when a concurrent delivery won, and `Database` when
    /// the delivery could not be recorded.
    pub async fn ingest_stripe(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> ClinicResult<IngestOutcome> {
        let secret = self.cfg.stripe_webhook_secret().ok_or_else(|| {
            ClinicError::Unauthorized("Stripe webhook secret is not configured".into())
        })?;
        let signature =
            signature.ok_or(ProviderError::MalformedSignature("missing Stripe-Signature header"))?;
        providers::verify_signature(
            body,
            signature,
            secret,
            self.cfg.stripe_tolerance_secs(),
            Utc::now().timestamp(),
        )?;

        let event = StripeEvent::parse(body)?;
        let payload: serde_json::Value =
            serde_json::from_slice(body).map_err(ProviderError::from)?;

        self.ingest(NewWebhookEvent {
            provider: WebhookProvider::Stripe,
            provider_event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            payload,
        })
        .await
    }

    pub async fn list_events(&self, filter: &WebhookEventFilter) -> ClinicResult<Vec<WebhookEvent>> {
        self.store.list_webhook_events(filter).await
    }

    pub async fn get_event(&self, id: Uuid) -> ClinicResult<WebhookEvent> {
        self.store
            .get_webhook_event(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("webhook event", id))
    }

    /// Re-run unprocessed events, oldest first.
    ///
    /// # Errors
    /// Stops at the first store failure.
    pub async fn reprocess_pending(&self, limit: i64) -> ClinicResult<ReprocessSummary> {
        let pending = self
            .store
            .list_webhook_events(&WebhookEventFilter {
                unprocessed: true,
                provider: None,
                limit: Some(limit),
                offset: None,
            })
            .await?;

        let mut summary = ReprocessSummary::default();
        for event in pending {
            if !self.store.reclaim_webhook_event(event.id).await? {
                tracing::debug!(event_id = %event.id, "webhook taken by another worker, skipping");
                continue;
            }
            match self.run(&event).await? {
                IngestOutcome::Processed { .. } => summary.processed += 1,
                IngestOutcome::Ignored { .. } => summary.ignored += 1,
                IngestOutcome::Failed { .. } => summary.failed += 1,
                IngestOutcome::Duplicate { .. } => {}
            }
        }
        tracing::info!(
            processed = summary.processed,
            ignored = summary.ignored,
            failed = summary.failed,
            "webhook reprocessing finished"
        );
        Ok(summary)
    }

    async fn ingest(&self, new: NewWebhookEvent) -> ClinicResult<IngestOutcome> {
        let event = match self.store.claim_webhook_event(new).await? {
            WebhookClaim::Claimed(event) => event,
            WebhookClaim::AlreadyProcessed(event) => {
                tracing::info!(
                    event_id = %event.id,
                    provider = %event.provider,
                    provider_event_id = %event.provider_event_id,
                    "duplicate webhook delivery"
                );
                return Ok(IngestOutcome::Duplicate { event_id: event.id });
            }
            WebhookClaim::InProgress(event) => {
                tracing::info!(
                    event_id = %event.id,
                    provider = %event.provider,
                    provider_event_id = %event.provider_event_id,
                    "webhook delivery already being processed"
                );
                return Err(ClinicError::Conflict(format!(
                    "webhook event {} is already being processed",
                    event.provider_event_id
                )));
            }
        };
        tracing::info!(
            event_id = %event.id,
            provider = %event.provider,
            event_type = %event.event_type,
            attempts = event.attempts,
            "webhook claimed"
        );
        self.run(&event).await
    }

    /// Process a claimed event and record the result on it.
    async fn run(&self, event: &WebhookEvent) -> ClinicResult<IngestOutcome> {
        match self.process(event).await {
            Ok(disposition) => {
                self.store.mark_webhook_processed(event.id).await?;
                Ok(match disposition {
                    Disposition::Applied => IngestOutcome::Processed { event_id: event.id },
                    Disposition::Ignored(reason) => {
                        tracing::info!(event_id = %event.id, %reason, "webhook ignored");
                        IngestOutcome::Ignored {
                            event_id: event.id,
                            reason,
                        }
                    }
                })
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(
                    event_id = %event.id,
                    provider = %event.provider,
                    event_type = %event.event_type,
                    "webhook processing failed: {message}"
                );
                if let Err(mark_err) = self.store.mark_webhook_failed(event.id, &message).await {
                    tracing::error!(event_id = %event.id, "failed to record webhook error: {mark_err}");
                }
                if err.is_transient() {
                    return Err(err);
                }
                Ok(IngestOutcome::Failed {
                    event_id: event.id,
                    error: message,
                })
            }
        }
    }

    async fn process(&self, event: &WebhookEvent) -> ClinicResult<Disposition> {
        match event.provider {
            WebhookProvider::Heyflow => {
                let submission = IntakeSubmission::from_json(&event.payload)?;
                let assessment = assess_intake(
                    &submission,
                    Utc::now().date_naive(),
                    self.cfg.bmi_qualify_threshold(),
                );
                let patient = apply_intake(&self.store, &submission, assessment).await?;
                tracing::info!(
                    event_id = %event.id,
                    patient_id = %patient.patient_id,
                    ?assessment,
                    status = %patient.status,
                    "intake applied"
                );
                Ok(Disposition::Applied)
            }
            WebhookProvider::Stripe => {
                let stripe_event: StripeEvent = serde_json::from_value(event.payload.clone())?;
                self.reconciler.handle(&stripe_event).await
            }
        }
    }
}
