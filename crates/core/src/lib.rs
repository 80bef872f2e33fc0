//! # Clinic Core
//!
//! Core business logic for the clinic patient and billing backend.
//!
//! This crate contains the domain and its persistence:
//! - Patient records, the status state machine and membership hashtags
//! - Invoices, line items and payments
//! - SOAP notes and their approval workflow
//! - Idempotent ingestion of HeyFlow and Stripe webhooks, and Stripe reconciliation
//! - Postgres storage with embedded migrations, plus an in-memory store for tests
//!
//! **No API concerns**: Authentication and HTTP servers belong in `api-shared` and `api-rest`.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use config::CoreConfig;
pub use error::{ClinicError, ClinicResult};
pub use services::{
    Actor, IngestOutcome, InvoiceService, PatientService, ReprocessSummary, SoapNoteService,
    WebhookService,
};
pub use store::{ClinicStore, InvoiceFilter, MemoryStore, PgStore};

use std::sync::Arc;

/// The full set of services, wired to one store.
#[derive(Clone)]
pub struct Services {
    pub patients: PatientService,
    pub invoices: InvoiceService,
    pub soap_notes: SoapNoteService,
    pub webhooks: WebhookService,
    pub store: services::SharedStore,
}

impl Services {
    pub fn new(cfg: Arc<CoreConfig>, store: services::SharedStore) -> Self {
        Self {
            patients: PatientService::new(store.clone()),
            invoices: InvoiceService::new(store.clone()),
            soap_notes: SoapNoteService::new(store.clone()),
            webhooks: WebhookService::new(cfg, store.clone()),
            store,
        }
    }
}

/// Connect to Postgres and apply pending migrations.
///
/// Called once at startup by the server and by `clinic migrate`.
pub async fn connect_and_migrate(cfg: &CoreConfig) -> ClinicResult<PgStore> {
    let store = PgStore::connect(cfg).await?;
    store.migrate().await?;
    tracing::info!("database migrations applied");
    Ok(store)
}
