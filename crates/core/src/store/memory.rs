//! In-memory [`ClinicStore`].
//!
//! Enforces the same uniqueness and referential rules as the Postgres schema so that service
//! tests exercise real conflict paths.

use super::{page, ClinicStore, InvoiceFilter};
use crate::constants::WEBHOOK_CLAIM_LEASE_SECS;
use crate::models::invoice::{ensure_accepts_payment, format_invoice_number};
use crate::models::patient::format_patient_id;
use crate::models::{
    Invoice, InvoiceDraft, InvoicePayment, InvoiceStatus, NewPatient, NewPayment, NewSoapNote,
    NewWebhookEvent, Patient, PatientFilter, PatientStatus, SoapNote, SoapNoteStatus,
    WebhookClaim, WebhookEvent, WebhookEventFilter,
};
use crate::{ClinicError, ClinicResult};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::HashMap;
use clinic_types::EmailAddress;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    patient_seq: i64,
    invoice_seq: i64,
    patients: Vec<Patient>,
    invoices: Vec<Invoice>,
    soap_notes: Vec<SoapNote>,
    webhook_events: Vec<WebhookEvent>,
    webhook_leases: HashMap<Uuid, DateTime<Utc>>,
}

impl State {
    fn patient_mut(&mut self, patient_id: &str) -> ClinicResult<&mut Patient> {
        self.patients
            .iter_mut()
            .find(|p| p.patient_id == patient_id)
            .ok_or_else(|| ClinicError::not_found("patient", patient_id))
    }

    fn invoice_mut(&mut self, id: Uuid) -> ClinicResult<&mut Invoice> {
        self.invoices
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ClinicError::not_found("invoice", id))
    }

    fn webhook_mut(&mut self, id: Uuid) -> ClinicResult<&mut WebhookEvent> {
        self.webhook_events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ClinicError::not_found("webhook event", id))
    }

    fn lease_held(&self, id: Uuid) -> bool {
        self.webhook_leases
            .get(&id)
            .is_some_and(|until| *until > Utc::now())
    }

    fn ensure_unique_patient(
        &self,
        patient_id: Option<&str>,
        email: &EmailAddress,
        stripe_customer_id: Option<&str>,
    ) -> ClinicResult<()> {
        let others = self
            .patients
            .iter()
            .filter(|p| Some(p.patient_id.as_str()) != patient_id);
        for other in others {
            if &other.email == email {
                return Err(ClinicError::Conflict(format!(
                    "email already belongs to patient {}",
                    other.patient_id
                )));
            }
            if stripe_customer_id.is_some() && other.stripe_customer_id.as_deref() == stripe_customer_id {
                return Err(ClinicError::Conflict(format!(
                    "stripe customer already linked to patient {}",
                    other.patient_id
                )));
            }
        }
        Ok(())
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    claim_lease: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            claim_lease: Duration::seconds(WEBHOOK_CLAIM_LEASE_SECS),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different webhook claim lease, e.g. zero to let a test take over a claim.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }
}

#[async_trait]
impl ClinicStore for MemoryStore {
    async fn insert_patient(&self, new: NewPatient) -> ClinicResult<Patient> {
        let mut state = self.state.lock().await;
        state.ensure_unique_patient(None, &new.email, new.stripe_customer_id.as_deref())?;

        state.patient_seq += 1;
        let now = Utc::now();
        let patient = Patient {
            patient_id: format_patient_id(state.patient_seq),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
            date_of_birth: new.date_of_birth,
            gender: new.gender,
            address: new.address,
            membership_hashtags: new.membership_hashtags,
            stripe_customer_id: new.stripe_customer_id,
            status: PatientStatus::Pending,
            intake: new.intake,
            created_at: now,
            updated_at: now,
        };
        state.patients.push(patient.clone());
        Ok(patient)
    }

    async fn get_patient(&self, patient_id: &str) -> ClinicResult<Option<Patient>> {
        let state = self.state.lock().await;
        Ok(state
            .patients
            .iter()
            .find(|p| p.patient_id == patient_id)
            .cloned())
    }

    async fn find_patient_by_email(&self, email: &EmailAddress) -> ClinicResult<Option<Patient>> {
        let state = self.state.lock().await;
        Ok(state.patients.iter().find(|p| &p.email == email).cloned())
    }

    async fn find_patient_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> ClinicResult<Option<Patient>> {
        let state = self.state.lock().await;
        Ok(state
            .patients
            .iter()
            .find(|p| p.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn list_patients(&self, filter: &PatientFilter) -> ClinicResult<Vec<Patient>> {
        let (limit, offset) = page(filter.limit, filter.offset);
        let state = self.state.lock().await;
        Ok(state
            .patients
            .iter()
            .rev()
            .filter(|p| filter.matches(p))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn save_patient(&self, patient: &Patient) -> ClinicResult<Patient> {
        let mut state = self.state.lock().await;
        state.ensure_unique_patient(
            Some(&patient.patient_id),
            &patient.email,
            patient.stripe_customer_id.as_deref(),
        )?;

        let stored = state.patient_mut(&patient.patient_id)?;
        if stored.updated_at != patient.updated_at {
            return Err(ClinicError::stale("patient", &patient.patient_id));
        }
        let created_at = stored.created_at;
        *stored = Patient {
            created_at,
            updated_at: Utc::now(),
            ..patient.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_patient(&self, patient_id: &str) -> ClinicResult<bool> {
        let mut state = self.state.lock().await;
        let referenced = state.invoices.iter().any(|i| i.patient_id == patient_id)
            || state.soap_notes.iter().any(|n| n.patient_id == patient_id);
        if referenced {
            return Err(ClinicError::Conflict(format!(
                "patient {patient_id} still has invoices or SOAP notes"
            )));
        }
        let before = state.patients.len();
        state.patients.retain(|p| p.patient_id != patient_id);
        Ok(state.patients.len() != before)
    }

    async fn insert_invoice(&self, draft: InvoiceDraft) -> ClinicResult<Invoice> {
        let mut state = self.state.lock().await;
        if !state.patients.iter().any(|p| p.patient_id == draft.patient_id) {
            return Err(ClinicError::not_found("patient", &draft.patient_id));
        }
        if let Some(stripe_id) = draft.stripe_invoice_id.as_deref() {
            if state
                .invoices
                .iter()
                .any(|i| i.stripe_invoice_id.as_deref() == Some(stripe_id))
            {
                return Err(ClinicError::Conflict(format!(
                    "stripe invoice {stripe_id} already recorded"
                )));
            }
        }

        state.invoice_seq += 1;
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            invoice_number: format_invoice_number(now.year(), state.invoice_seq),
            patient_id: draft.patient_id,
            status: draft.status,
            currency: draft.currency,
            total_cents: draft.total_cents,
            amount_paid_cents: 0,
            due_date: draft.due_date,
            stripe_invoice_id: draft.stripe_invoice_id,
            notes: draft.notes,
            items: draft.items,
            payments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, id: Uuid) -> ClinicResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state.invoices.iter().find(|i| i.id == id).cloned())
    }

    async fn find_invoice_by_stripe_id(
        &self,
        stripe_invoice_id: &str,
    ) -> ClinicResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .find(|i| i.stripe_invoice_id.as_deref() == Some(stripe_invoice_id))
            .cloned())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> ClinicResult<Vec<Invoice>> {
        let (limit, offset) = page(filter.limit, filter.offset);
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .rev()
            .filter(|i| filter.matches(i))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update_invoice_status(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        status: InvoiceStatus,
    ) -> ClinicResult<Invoice> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(id)?;
        if invoice.status != expected {
            return Err(ClinicError::Conflict(format!(
                "invoice {} is {}, expected {expected}",
                invoice.invoice_number, invoice.status
            )));
        }
        invoice.status = status;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    async fn void_invoice(&self, id: Uuid) -> ClinicResult<Invoice> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(id)?;
        if invoice.status == InvoiceStatus::Void {
            return Ok(invoice.clone());
        }
        if !invoice.payments.is_empty() {
            return Err(ClinicError::Conflict(format!(
                "invoice {} has payments and cannot be voided",
                invoice.invoice_number
            )));
        }
        invoice.status = InvoiceStatus::Void;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    async fn insert_payment(&self, invoice_id: Uuid, payment: NewPayment) -> ClinicResult<Invoice> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(invoice_id)?;
        ensure_accepts_payment(
            &invoice.invoice_number,
            invoice.status,
            invoice.total_cents,
            payment.amount_cents,
        )?;
        if let Some(stripe_id) = payment.stripe_payment_id.as_deref() {
            let duplicate = state.invoices.iter().any(|i| {
                i.payments
                    .iter()
                    .any(|p| p.stripe_payment_id.as_deref() == Some(stripe_id))
            });
            if duplicate {
                return Err(ClinicError::Conflict(format!(
                    "stripe payment {stripe_id} already recorded"
                )));
            }
        }

        let invoice = state.invoice_mut(invoice_id)?;
        let now = Utc::now();
        invoice.payments.push(InvoicePayment {
            id: Uuid::new_v4(),
            invoice_id,
            amount_cents: payment.amount_cents,
            method: payment.method,
            stripe_payment_id: payment.stripe_payment_id,
            paid_at: payment.paid_at.unwrap_or(now),
        });
        invoice.amount_paid_cents = invoice.payments.iter().map(|p| p.amount_cents).sum();
        invoice.status = InvoiceStatus::after_payment(invoice.total_cents, invoice.amount_paid_cents);
        invoice.updated_at = now;
        Ok(invoice.clone())
    }

    async fn find_payment_by_stripe_id(
        &self,
        stripe_payment_id: &str,
    ) -> ClinicResult<Option<InvoicePayment>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .flat_map(|i| i.payments.iter())
            .find(|p| p.stripe_payment_id.as_deref() == Some(stripe_payment_id))
            .cloned())
    }

    async fn insert_soap_note(
        &self,
        patient_id: &str,
        created_by: &str,
        new: NewSoapNote,
    ) -> ClinicResult<SoapNote> {
        let mut state = self.state.lock().await;
        state.patient_mut(patient_id)?;

        let now = Utc::now();
        let note = SoapNote {
            id: Uuid::new_v4(),
            patient_id: patient_id.to_string(),
            subjective: new.subjective,
            objective: new.objective,
            assessment: new.assessment,
            plan: new.plan,
            ai_generated: new.ai_generated,
            status: SoapNoteStatus::Draft,
            created_by: created_by.to_string(),
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.soap_notes.push(note.clone());
        Ok(note)
    }

    async fn get_soap_note(&self, id: Uuid) -> ClinicResult<Option<SoapNote>> {
        let state = self.state.lock().await;
        Ok(state.soap_notes.iter().find(|n| n.id == id).cloned())
    }

    async fn list_soap_notes(&self, patient_id: &str) -> ClinicResult<Vec<SoapNote>> {
        let state = self.state.lock().await;
        Ok(state
            .soap_notes
            .iter()
            .rev()
            .filter(|n| n.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn save_soap_note(&self, note: &SoapNote) -> ClinicResult<SoapNote> {
        let mut state = self.state.lock().await;
        let stored = state
            .soap_notes
            .iter_mut()
            .find(|n| n.id == note.id)
            .ok_or_else(|| ClinicError::not_found("SOAP note", note.id))?;
        if stored.updated_at != note.updated_at {
            return Err(ClinicError::stale("SOAP note", note.id));
        }
        *stored = SoapNote {
            updated_at: Utc::now(),
            ..note.clone()
        };
        Ok(stored.clone())
    }

    async fn claim_webhook_event(&self, new: NewWebhookEvent) -> ClinicResult<WebhookClaim> {
        let mut state = self.state.lock().await;
        let lease_until = Utc::now() + self.claim_lease;
        let existing = state
            .webhook_events
            .iter()
            .position(|e| e.provider == new.provider && e.provider_event_id == new.provider_event_id);

        if let Some(index) = existing {
            let id = state.webhook_events[index].id;
            if state.webhook_events[index].processed {
                return Ok(WebhookClaim::AlreadyProcessed(state.webhook_events[index].clone()));
            }
            if state.lease_held(id) {
                return Ok(WebhookClaim::InProgress(state.webhook_events[index].clone()));
            }
            state.webhook_leases.insert(id, lease_until);
            let event = &mut state.webhook_events[index];
            event.attempts += 1;
            return Ok(WebhookClaim::Claimed(event.clone()));
        }

        let event = WebhookEvent {
            id: Uuid::new_v4(),
            provider: new.provider,
            provider_event_id: new.provider_event_id,
            event_type: new.event_type,
            payload: new.payload,
            processed: false,
            error_message: None,
            attempts: 1,
            received_at: Utc::now(),
            processed_at: None,
        };
        state.webhook_leases.insert(event.id, lease_until);
        state.webhook_events.push(event.clone());
        Ok(WebhookClaim::Claimed(event))
    }

    async fn get_webhook_event(&self, id: Uuid) -> ClinicResult<Option<WebhookEvent>> {
        let state = self.state.lock().await;
        Ok(state.webhook_events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_webhook_events(
        &self,
        filter: &WebhookEventFilter,
    ) -> ClinicResult<Vec<WebhookEvent>> {
        let (limit, offset) = page(filter.limit, filter.offset);
        let state = self.state.lock().await;
        let matching = state.webhook_events.iter().filter(|e| filter.matches(e));
        let events: Vec<&WebhookEvent> = if filter.unprocessed {
            matching.collect()
        } else {
            matching.rev().collect()
        };
        Ok(events
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_webhook_processed(&self, id: Uuid) -> ClinicResult<()> {
        let mut state = self.state.lock().await;
        let event = state.webhook_mut(id)?;
        event.processed = true;
        event.error_message = None;
        event.processed_at = Some(Utc::now());
        state.webhook_leases.remove(&id);
        Ok(())
    }

    async fn mark_webhook_failed(&self, id: Uuid, error_message: &str) -> ClinicResult<()> {
        let mut state = self.state.lock().await;
        let event = state.webhook_mut(id)?;
        if !event.processed {
            event.error_message = Some(error_message.to_string());
            state.webhook_leases.remove(&id);
        }
        Ok(())
    }

    async fn reclaim_webhook_event(&self, id: Uuid) -> ClinicResult<bool> {
        let mut state = self.state.lock().await;
        let lease_until = Utc::now() + self.claim_lease;
        let held = state.lease_held(id);
        let event = state.webhook_mut(id)?;
        if event.processed || held {
            return Ok(false);
        }
        event.attempts += 1;
        state.webhook_leases.insert(id, lease_until);
        Ok(true)
    }

    async fn ping(&self) -> ClinicResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewInvoice, NewInvoiceItem, PaymentMethod, WebhookProvider};

    fn new_patient(email: &str) -> NewPatient {
        NewPatient::with_email(EmailAddress::parse(email).unwrap())
    }

    #[tokio::test]
    async fn patient_ids_are_sequential() {
        let store = MemoryStore::new();
        let a = store.insert_patient(new_patient("a@example.com")).await.unwrap();
        let b = store.insert_patient(new_patient("b@example.com")).await.unwrap();
        assert_eq!(a.patient_id, "P0001");
        assert_eq!(b.patient_id, "P0002");
        assert_eq!(a.status, PatientStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store.insert_patient(new_patient("a@example.com")).await.unwrap();
        let err = store
            .insert_patient(new_patient("A@Example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_restricted_by_invoices() {
        let store = MemoryStore::new();
        let p = store.insert_patient(new_patient("a@example.com")).await.unwrap();
        let draft = InvoiceDraft::from_request(
            p.patient_id.clone(),
            NewInvoice {
                patient_id: p.patient_id.clone(),
                currency: None,
                due_date: None,
                notes: None,
                stripe_invoice_id: None,
                finalize: true,
                items: vec![NewInvoiceItem {
                    description: "Consult".into(),
                    quantity: 1,
                    unit_amount_cents: 1000,
                }],
            },
        )
        .unwrap();
        let invoice = store.insert_invoice(draft).await.unwrap();
        assert!(invoice.invoice_number.ends_with("-000001"));

        assert!(matches!(
            store.delete_patient(&p.patient_id).await,
            Err(ClinicError::Conflict(_))
        ));

        let paid = store
            .insert_payment(
                invoice.id,
                NewPayment {
                    amount_cents: 1000,
                    method: PaymentMethod::Cash,
                    stripe_payment_id: None,
                    paid_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.amount_paid_cents, 1000);
    }

    #[tokio::test]
    async fn webhook_claims_are_idempotent() {
        let store = MemoryStore::new();
        let new = || NewWebhookEvent {
            provider: WebhookProvider::Stripe,
            provider_event_id: "evt_1".into(),
            event_type: "invoice.paid".into(),
            payload: serde_json::json!({}),
        };

        let WebhookClaim::Claimed(first) = store.claim_webhook_event(new()).await.unwrap() else {
            panic!("first delivery should be claimed");
        };
        store.mark_webhook_failed(first.id, "boom").await.unwrap();

        let WebhookClaim::Claimed(retry) = store.claim_webhook_event(new()).await.unwrap() else {
            panic!("failed delivery should be re-claimed");
        };
        assert_eq!(retry.id, first.id);
        assert_eq!(retry.attempts, 2);

        store.mark_webhook_processed(first.id).await.unwrap();
        assert!(matches!(
            store.claim_webhook_event(new()).await.unwrap(),
            WebhookClaim::AlreadyProcessed(_)
        ));
    }

    fn stripe_event(id: &str) -> NewWebhookEvent {
        NewWebhookEvent {
            provider: WebhookProvider::Stripe,
            provider_event_id: id.into(),
            event_type: "invoice.paid".into(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn concurrent_deliveries_cannot_both_claim() {
        let store = MemoryStore::new();
        let WebhookClaim::Claimed(winner) =
            store.claim_webhook_event(stripe_event("evt_1")).await.unwrap()
        else {
            panic!("first delivery should be claimed");
        };
        assert!(matches!(
            store.claim_webhook_event(stripe_event("evt_1")).await.unwrap(),
            WebhookClaim::InProgress(_)
        ));
        assert!(!store.reclaim_webhook_event(winner.id).await.unwrap());

        // A late failure report must not undo a success.
        store.mark_webhook_processed(winner.id).await.unwrap();
        store.mark_webhook_failed(winner.id, "duplicate payment").await.unwrap();
        let stored = store.get_webhook_event(winner.id).await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.error_message, None);
        assert!(store
            .list_webhook_events(&WebhookEventFilter {
                unprocessed: true,
                ..Default::default()
            })
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn expired_claim_can_be_taken_over() {
        let store = MemoryStore::new().with_claim_lease(Duration::zero());
        let WebhookClaim::Claimed(first) =
            store.claim_webhook_event(stripe_event("evt_2")).await.unwrap()
        else {
            panic!("first delivery should be claimed");
        };
        let WebhookClaim::Claimed(again) =
            store.claim_webhook_event(stripe_event("evt_2")).await.unwrap()
        else {
            panic!("lapsed claim should be re-granted");
        };
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempts, 2);
        assert!(store.reclaim_webhook_event(first.id).await.unwrap());
    }

    #[tokio::test]
    async fn webhook_log_reads_newest_first_with_offset() {
        let store = MemoryStore::new();
        for id in ["evt_a", "evt_b", "evt_c"] {
            store.claim_webhook_event(stripe_event(id)).await.unwrap();
        }
        let page = |offset| WebhookEventFilter {
            limit: Some(2),
            offset: Some(offset),
            ..Default::default()
        };
        let first: Vec<_> = store
            .list_webhook_events(&page(0))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.provider_event_id)
            .collect();
        assert_eq!(first, ["evt_c", "evt_b"]);
        let second = store.list_webhook_events(&page(2)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].provider_event_id, "evt_a");

        let backlog = store
            .list_webhook_events(&WebhookEventFilter {
                unprocessed: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(backlog[0].provider_event_id, "evt_a");
    }

    #[tokio::test]
    async fn stale_patient_save_is_refused() {
        let store = MemoryStore::new();
        let read = store.insert_patient(new_patient("race@example.com")).await.unwrap();

        let mut paid = read.clone();
        paid.status = PatientStatus::Client;
        paid.membership_hashtags.push("#activemember".into());
        store.save_patient(&paid).await.unwrap();

        let mut intake = read.clone();
        intake.status = PatientStatus::Qualified;
        assert!(matches!(
            store.save_patient(&intake).await,
            Err(ClinicError::StaleWrite { .. })
        ));
        let stored = store.get_patient(&read.patient_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PatientStatus::Client);
        assert_eq!(stored.membership_hashtags, ["#activemember"]);
    }

    #[tokio::test]
    async fn void_and_payment_are_mutually_exclusive() {
        let store = MemoryStore::new();
        let p = store.insert_patient(new_patient("void@example.com")).await.unwrap();
        let draft = |finalize| {
            InvoiceDraft::from_request(
                p.patient_id.clone(),
                NewInvoice {
                    patient_id: p.patient_id.clone(),
                    currency: None,
                    due_date: None,
                    notes: None,
                    stripe_invoice_id: None,
                    finalize,
                    items: vec![NewInvoiceItem {
                        description: "Consult".into(),
                        quantity: 1,
                        unit_amount_cents: 1000,
                    }],
                },
            )
            .unwrap()
        };
        let cash = |amount_cents| NewPayment {
            amount_cents,
            method: PaymentMethod::Cash,
            stripe_payment_id: None,
            paid_at: None,
        };

        let voided = store.insert_invoice(draft(true)).await.unwrap();
        store.void_invoice(voided.id).await.unwrap();
        assert!(matches!(
            store.insert_payment(voided.id, cash(500)).await,
            Err(ClinicError::Conflict(_))
        ));
        assert!(store.get_invoice(voided.id).await.unwrap().unwrap().payments.is_empty());

        let paid = store.insert_invoice(draft(true)).await.unwrap();
        store.insert_payment(paid.id, cash(1000)).await.unwrap();
        assert!(matches!(
            store.insert_payment(paid.id, cash(1000)).await,
            Err(ClinicError::Conflict(_))
        ));
        assert!(matches!(
            store.void_invoice(paid.id).await,
            Err(ClinicError::Conflict(_))
        ));
        assert!(matches!(
            store
                .update_invoice_status(voided.id, InvoiceStatus::Draft, InvoiceStatus::Open)
                .await,
            Err(ClinicError::Conflict(_))
        ));
    }
}
