//! Invoice service.

use super::SharedStore;
use crate::models::patient::parse_patient_id;
use crate::models::{Invoice, InvoiceDraft, InvoiceStatus, NewInvoice, NewPayment};
use crate::store::InvoiceFilter;
use crate::{ClinicError, ClinicResult};
use uuid::Uuid;

#[derive(Clone)]
pub struct InvoiceService {
    store: SharedStore,
}

impl InvoiceService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Create an invoice for an existing patient. Items are required; the number is assigned
    /// by the store.
    pub async fn create(&self, request: NewInvoice) -> ClinicResult<Invoice> {
        let patient_id = parse_patient_id(&request.patient_id)?;
        if self.store.get_patient(&patient_id).await?.is_none() {
            return Err(ClinicError::not_found("patient", patient_id));
        }

        let draft = InvoiceDraft::from_request(patient_id, request)?;
        let invoice = self.store.insert_invoice(draft).await?;
        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            patient_id = %invoice.patient_id,
            total_cents = invoice.total_cents,
            "invoice created"
        );
        Ok(invoice)
    }

    pub async fn get(&self, id: Uuid) -> ClinicResult<Invoice> {
        self.store
            .get_invoice(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("invoice", id))
    }

    pub async fn list(&self, mut filter: InvoiceFilter) -> ClinicResult<Vec<Invoice>> {
        if let Some(patient_id) = filter.patient_id.take() {
            filter.patient_id = Some(parse_patient_id(&patient_id)?);
        }
        self.store.list_invoices(&filter).await
    }

    /// Record a payment. The invoice becomes `partially_paid` or `paid` depending on the
    /// running total.
    ///
    /// # Errors
    /// `Conflict` for draft, void or fully paid invoices and for a Stripe payment id that is
    /// already recorded.
    pub async fn record_payment(&self, id: Uuid, payment: NewPayment) -> ClinicResult<Invoice> {
        let invoice = self.get(id).await?;
        invoice.ensure_accepts_payment(payment.amount_cents)?;

        let amount_cents = payment.amount_cents;
        let invoice = self.store.insert_payment(id, payment).await?;
        tracing::info!(
            invoice_id = %invoice.id,
            amount_cents,
            status = %invoice.status,
            "payment recorded"
        );
        Ok(invoice)
    }

    /// Move a draft invoice to `open`.
    pub async fn finalize(&self, id: Uuid) -> ClinicResult<Invoice> {
        let invoice = self
            .store
            .update_invoice_status(id, InvoiceStatus::Draft, InvoiceStatus::Open)
            .await?;
        tracing::info!(invoice_id = %invoice.id, "invoice finalized");
        Ok(invoice)
    }

    /// Void an invoice that has no payments. Voiding a void invoice is a no-op.
    pub async fn void(&self, id: Uuid) -> ClinicResult<Invoice> {
        let invoice = self.store.void_invoice(id).await?;
        tracing::info!(invoice_id = %invoice.id, "invoice voided");
        Ok(invoice)
    }
}
