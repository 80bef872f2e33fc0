//! # API REST
//!
//! REST API for the clinic backend.
//!
//! Provides HTTP endpoints with OpenAPI/Swagger documentation using axum and utoipa. Admin
//! routes live under `/api/v1` and require an Auth0 bearer token; the provider webhook routes
//! authenticate with their own shared token or signature.
//!
//! Business logic lives in `clinic-core`; handlers here only extract, delegate and map errors.

pub mod auth;
pub mod error;
pub mod handlers;

pub use auth::AuthUser;
pub use error::{ApiError, ApiResult, ErrorBody};

use api_shared::{AuthVerifier, HealthRes};
use axum::routing::{delete, get, post};
use axum::Router;
use clinic_core::models::{
    Address, Invoice, InvoiceItem, InvoicePayment, InvoiceStatus, NewInvoice, NewInvoiceItem,
    NewPatient, NewPayment, NewSoapNote, Patient, PatientStatus, PatientUpdate, PaymentMethod,
    SoapNote, SoapNoteStatus, SoapNoteUpdate, WebhookEvent, WebhookProvider,
};
use clinic_core::{IngestOutcome, Services};
use handlers::{health, invoices, patients, soap_notes, webhooks};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub auth: AuthVerifier,
}

impl AppState {
    pub fn new(services: Services, auth: AuthVerifier) -> Self {
        Self { services, auth }
    }
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        patients::list_patients,
        patients::create_patient,
        patients::get_patient,
        patients::update_patient,
        patients::delete_patient,
        patients::set_status,
        patients::add_hashtag,
        patients::remove_hashtag,
        invoices::list_invoices,
        invoices::create_invoice,
        invoices::get_invoice,
        invoices::finalize_invoice,
        invoices::void_invoice,
        invoices::record_payment,
        soap_notes::list_soap_notes,
        soap_notes::create_soap_note,
        soap_notes::get_soap_note,
        soap_notes::update_soap_note,
        soap_notes::submit_soap_note,
        soap_notes::approve_soap_note,
        soap_notes::reject_soap_note,
        webhooks::heyflow_webhook,
        webhooks::stripe_webhook,
        webhooks::list_webhook_events,
        webhooks::get_webhook_event,
    ),
    components(schemas(
        HealthRes,
        ErrorBody,
        Address,
        Patient,
        PatientStatus,
        NewPatient,
        PatientUpdate,
        patients::SetStatusReq,
        patients::AddHashtagReq,
        Invoice,
        InvoiceItem,
        InvoicePayment,
        InvoiceStatus,
        PaymentMethod,
        NewInvoice,
        NewInvoiceItem,
        NewPayment,
        SoapNote,
        SoapNoteStatus,
        NewSoapNote,
        SoapNoteUpdate,
        soap_notes::RejectSoapNoteReq,
        WebhookEvent,
        WebhookProvider,
        IngestOutcome,
    )),
    modifiers(&BearerAuth),
    tags((name = "clinic", description = "Clinic patient and billing API"))
)]
pub struct ApiDoc;

/// Build the REST router with Swagger UI, CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/patients/:patient_id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route("/patients/:patient_id/status", post(patients::set_status))
        .route("/patients/:patient_id/hashtags", post(patients::add_hashtag))
        .route(
            "/patients/:patient_id/hashtags/:tag",
            delete(patients::remove_hashtag),
        )
        .route(
            "/patients/:patient_id/soap-notes",
            get(soap_notes::list_soap_notes).post(soap_notes::create_soap_note),
        )
        .route(
            "/invoices",
            get(invoices::list_invoices).post(invoices::create_invoice),
        )
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/invoices/:id/finalize", post(invoices::finalize_invoice))
        .route("/invoices/:id/void", post(invoices::void_invoice))
        .route("/invoices/:id/payments", post(invoices::record_payment))
        .route(
            "/soap-notes/:id",
            get(soap_notes::get_soap_note).put(soap_notes::update_soap_note),
        )
        .route("/soap-notes/:id/submit", post(soap_notes::submit_soap_note))
        .route("/soap-notes/:id/approve", post(soap_notes::approve_soap_note))
        .route("/soap-notes/:id/reject", post(soap_notes::reject_soap_note))
        .route("/webhooks/events", get(webhooks::list_webhook_events))
        .route("/webhooks/events/:id", get(webhooks::get_webhook_event))
        .route("/webhooks/heyflow", post(webhooks::heyflow_webhook))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
