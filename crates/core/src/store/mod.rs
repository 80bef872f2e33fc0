//! Persistence.
//!
//! [`ClinicStore`] is the single seam between services and storage. [`PgStore`] is the
//! production implementation; [`MemoryStore`] backs tests and local tooling and mirrors the
//! Postgres constraints (unique email, unique Stripe ids, restricted deletes).
//!
//! Each method is one unit of work: implementations make multi-row writes (invoice with items,
//! payment plus invoice totals, webhook claim) atomic.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{
    Invoice, InvoiceDraft, InvoicePayment, InvoiceStatus, NewPatient, NewPayment, NewSoapNote,
    NewWebhookEvent, Patient, PatientFilter, SoapNote, WebhookClaim, WebhookEvent,
    WebhookEventFilter,
};
use crate::ClinicResult;
use async_trait::async_trait;
use clinic_types::EmailAddress;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct InvoiceFilter {
    pub patient_id: Option<String>,
    pub status: Option<InvoiceStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.patient_id
            .as_deref()
            .map_or(true, |p| p == invoice.patient_id)
            && self.status.map_or(true, |s| s == invoice.status)
    }
}

#[async_trait]
pub trait ClinicStore: Send + Sync {
    // Patients

    /// Insert a patient, allocating the next patient id. Fails with `Conflict` when the email
    /// or Stripe customer id is already used.
    async fn insert_patient(&self, new: NewPatient) -> ClinicResult<Patient>;
    async fn get_patient(&self, patient_id: &str) -> ClinicResult<Option<Patient>>;
    async fn find_patient_by_email(&self, email: &EmailAddress) -> ClinicResult<Option<Patient>>;
    async fn find_patient_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> ClinicResult<Option<Patient>>;
    async fn list_patients(&self, filter: &PatientFilter) -> ClinicResult<Vec<Patient>>;
    /// Persist every mutable field of `patient` and bump `updated_at`.
    ///
    /// `patient.updated_at` must be the value that was read. If the row has changed since, the
    /// write is refused with `StaleWrite`.
    async fn save_patient(&self, patient: &Patient) -> ClinicResult<Patient>;
    /// Delete a patient. Fails with `Conflict` while invoices or SOAP notes reference it.
    async fn delete_patient(&self, patient_id: &str) -> ClinicResult<bool>;

    // Invoices

    /// Insert an invoice and its items, allocating the invoice number.
    async fn insert_invoice(&self, draft: InvoiceDraft) -> ClinicResult<Invoice>;
    async fn get_invoice(&self, id: Uuid) -> ClinicResult<Option<Invoice>>;
    async fn find_invoice_by_stripe_id(&self, stripe_invoice_id: &str)
        -> ClinicResult<Option<Invoice>>;
    async fn list_invoices(&self, filter: &InvoiceFilter) -> ClinicResult<Vec<Invoice>>;
    /// Move an invoice from `expected` to `status`. `Conflict` if it is no longer `expected`.
    async fn update_invoice_status(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        status: InvoiceStatus,
    ) -> ClinicResult<Invoice>;
    /// Void an invoice unless it holds payments. Voiding a void invoice is a no-op.
    async fn void_invoice(&self, id: Uuid) -> ClinicResult<Invoice>;
    /// Record a payment and recompute `amount_paid_cents` and status. The invoice status is
    /// re-checked atomically with the insert.
    async fn insert_payment(&self, invoice_id: Uuid, payment: NewPayment) -> ClinicResult<Invoice>;
    async fn find_payment_by_stripe_id(
        &self,
        stripe_payment_id: &str,
    ) -> ClinicResult<Option<InvoicePayment>>;

    // SOAP notes

    async fn insert_soap_note(
        &self,
        patient_id: &str,
        created_by: &str,
        new: NewSoapNote,
    ) -> ClinicResult<SoapNote>;
    async fn get_soap_note(&self, id: Uuid) -> ClinicResult<Option<SoapNote>>;
    async fn list_soap_notes(&self, patient_id: &str) -> ClinicResult<Vec<SoapNote>>;
    /// Same version check as [`ClinicStore::save_patient`], on `note.updated_at`.
    async fn save_soap_note(&self, note: &SoapNote) -> ClinicResult<SoapNote>;

    // Webhook events

    /// Record a delivery, or re-claim an earlier delivery of the same event that has not been
    /// processed. Each claim increments `attempts` and holds a lease on the event until it is
    /// marked processed or failed, or the lease runs out. While the lease is held, other
    /// deliveries get [`WebhookClaim::InProgress`].
    async fn claim_webhook_event(&self, new: NewWebhookEvent) -> ClinicResult<WebhookClaim>;
    async fn get_webhook_event(&self, id: Uuid) -> ClinicResult<Option<WebhookEvent>>;
    async fn list_webhook_events(
        &self,
        filter: &WebhookEventFilter,
    ) -> ClinicResult<Vec<WebhookEvent>>;
    /// Mark an event processed and release its lease.
    async fn mark_webhook_processed(&self, id: Uuid) -> ClinicResult<()>;
    /// Record an error and release the lease. An event that is already processed is left as it
    /// is.
    async fn mark_webhook_failed(&self, id: Uuid, error_message: &str) -> ClinicResult<()>;
    /// Claim a stored event for a manual retry. Returns `false` when it was processed or is
    /// leased to another worker in the meantime.
    async fn reclaim_webhook_event(&self, id: Uuid) -> ClinicResult<bool>;

    async fn ping(&self) -> ClinicResult<()>;
}

/// Clamp client-supplied paging to sane bounds.
pub(crate) fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    use crate::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
    (
        limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}
