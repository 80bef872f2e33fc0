//! Stripe reconciliation.
//!
//! Maps Stripe events onto patients, invoices, payments and membership hashtags. Every handler
//! is safe to run more than once for the same event: invoices are matched by Stripe invoice id
//! and payments by payment reference before anything is written.

use super::patients::transition_or_warn;
use super::{Disposition, SharedStore};
use crate::constants::{ACTIVE_MEMBER_HASHTAG, PAYMENT_FAILED_HASHTAG};
use crate::models::hashtag::{add_hashtag, remove_hashtag};
use crate::models::patient::parse_patient_id;
use crate::models::{
    Invoice, InvoiceDraft, MembershipHashtag, NewInvoice, NewInvoiceItem, NewPatient, NewPayment,
    Patient, PaymentMethod, StatusEvent,
};
use crate::{ClinicError, ClinicResult};
use clinic_types::EmailAddress;
use providers::stripe::{CheckoutSession, Charge, Invoice as StripeInvoice, Subscription};
use providers::{StripeEvent, StripeObject};

#[derive(Clone)]
pub struct StripeReconciler {
    store: SharedStore,
}

fn hashtag(tag: &str) -> ClinicResult<MembershipHashtag> {
    MembershipHashtag::parse(tag)
}

fn split_name(full: Option<&str>) -> (Option<String>, Option<String>) {
    let mut parts = full.unwrap_or_default().split_whitespace();
    let first = parts.next().map(str::to_string);
    let rest: Vec<&str> = parts.collect();
    (first, (!rest.is_empty()).then(|| rest.join(" ")))
}

impl StripeReconciler {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn handle(&self, event: &StripeEvent) -> ClinicResult<Disposition> {
        match event.object()? {
            StripeObject::CheckoutSession(session) => self.checkout_completed(&session).await,
            StripeObject::Invoice(invoice) if event.event_type == "invoice.payment_failed" => {
                self.invoice_payment_failed(&invoice).await
            }
            StripeObject::Invoice(invoice) => self.invoice_paid(&invoice).await,
            StripeObject::Charge(charge) => self.charge_succeeded(&charge).await,
            StripeObject::Subscription(subscription)
                if event.event_type == "customer.subscription.deleted" =>
            {
                self.subscription_ended(&subscription).await
            }
            StripeObject::Subscription(subscription) => {
                self.subscription_changed(&subscription).await
            }
            StripeObject::Unhandled => Ok(Disposition::Ignored(format!(
                "unhandled event type {}",
                event.event_type
            ))),
        }
    }

    /// Patient for a Stripe customer, falling back to email. Links the customer id when the
    /// patient was found by email.
    async fn patient_for_customer(
        &self,
        customer: Option<&str>,
        email: Option<&str>,
    ) -> ClinicResult<Patient> {
        if let Some(customer) = customer {
            if let Some(patient) = self.store.find_patient_by_stripe_customer(customer).await? {
                return Ok(patient);
            }
        }
        if let Some(email) = email.and_then(|e| EmailAddress::parse(e).ok()) {
            if let Some(mut patient) = self.store.find_patient_by_email(&email).await? {
                link_customer(&mut patient, customer);
                return Ok(patient);
            }
        }
        Err(ClinicError::not_found(
            "patient",
            customer.unwrap_or("unknown customer"),
        ))
    }

    async fn checkout_completed(&self, session: &CheckoutSession) -> ClinicResult<Disposition> {
        let mut patient = match self.checkout_patient(session).await? {
            Some(patient) => patient,
            None => {
                let email = session.email().ok_or_else(|| {
                    ClinicError::InvalidInput(format!(
                        "checkout session {} has no customer email",
                        session.id
                    ))
                })?;
                let details = session.customer_details.clone().unwrap_or_default();
                let (first_name, last_name) = split_name(details.name.as_deref());
                let mut new = NewPatient::with_email(EmailAddress::parse(email)?);
                new.first_name = first_name;
                new.last_name = last_name;
                new.phone = details.phone;
                new.stripe_customer_id = session.customer.clone();
                let created = self.store.insert_patient(new).await?;
                tracing::info!(patient_id = %created.patient_id, "patient created from checkout");
                created
            }
        };
        link_customer(&mut patient, session.customer.as_deref());

        if session.is_paid() {
            // Subscription checkouts settle through a Stripe invoice; invoice.paid records it.
            if session.invoice.is_none() {
                let amount_cents = session.amount_total.unwrap_or_default();
                let reference = session.payment_intent.as_deref().unwrap_or(&session.id);
                self.record_standalone_payment(
                    &patient,
                    "Online checkout",
                    amount_cents,
                    session.currency.as_deref(),
                    reference,
                )
                .await?;
            }
            transition_or_warn(&mut patient, StatusEvent::PaymentReceived);
        }
        if session.is_subscription() {
            add_hashtag(&mut patient.membership_hashtags, &hashtag(ACTIVE_MEMBER_HASHTAG)?);
        }

        self.store.save_patient(&patient).await?;
        Ok(Disposition::Applied)
    }

    async fn checkout_patient(&self, session: &CheckoutSession) -> ClinicResult<Option<Patient>> {
        if let Some(patient_id) = session
            .client_reference_id
            .as_deref()
            .and_then(|r| parse_patient_id(r).ok())
        {
            if let Some(patient) = self.store.get_patient(&patient_id).await? {
                return Ok(Some(patient));
            }
        }
        match self.patient_for_customer(session.customer.as_deref(), session.email()).await {
            Ok(patient) => Ok(Some(patient)),
            Err(ClinicError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn invoice_paid(&self, stripe_invoice: &StripeInvoice) -> ClinicResult<Disposition> {
        let mut patient = self
            .patient_for_customer(
                stripe_invoice.customer.as_deref(),
                stripe_invoice.customer_email.as_deref(),
            )
            .await?;

        let invoice = match self.store.find_invoice_by_stripe_id(&stripe_invoice.id).await? {
            Some(invoice) => invoice,
            None => self.import_invoice(&patient, stripe_invoice).await?,
        };

        if stripe_invoice.amount_paid > 0 {
            let reference = stripe_invoice
                .payment_reference()
                .unwrap_or(&stripe_invoice.id);
            let already_recorded = self.store.find_payment_by_stripe_id(reference).await?.is_some();
            if already_recorded || invoice.balance_cents() == 0 {
                tracing::debug!(invoice_id = %invoice.id, "stripe payment already reconciled");
            } else {
                invoice.ensure_accepts_payment(stripe_invoice.amount_paid)?;
                self.store
                    .insert_payment(
                        invoice.id,
                        NewPayment {
                            amount_cents: stripe_invoice.amount_paid,
                            method: PaymentMethod::Stripe,
                            stripe_payment_id: Some(reference.to_string()),
                            paid_at: None,
                        },
                    )
                    .await?;
            }
        }

        transition_or_warn(&mut patient, StatusEvent::PaymentReceived);
        add_hashtag(&mut patient.membership_hashtags, &hashtag(ACTIVE_MEMBER_HASHTAG)?);
        remove_hashtag(&mut patient.membership_hashtags, &hashtag(PAYMENT_FAILED_HASHTAG)?);
        self.store.save_patient(&patient).await?;
        Ok(Disposition::Applied)
    }

    /// Create a local open invoice mirroring a Stripe invoice.
    async fn import_invoice(
        &self,
        patient: &Patient,
        stripe_invoice: &StripeInvoice,
    ) -> ClinicResult<Invoice> {
        let lines = &stripe_invoice.lines.data;
        let mut items: Vec<NewInvoiceItem> = lines
            .iter()
            .map(|line| {
                let quantity = line
                    .quantity
                    .and_then(|q| i32::try_from(q).ok())
                    .filter(|q| *q > 0)
                    .unwrap_or(1);
                let (quantity, unit) = if line.amount % i64::from(quantity) == 0 {
                    (quantity, line.amount / i64::from(quantity))
                } else {
                    (1, line.amount)
                };
                NewInvoiceItem {
                    description: line
                        .description
                        .clone()
                        .filter(|d| !d.trim().is_empty())
                        .unwrap_or_else(|| "Stripe invoice line".into()),
                    quantity,
                    unit_amount_cents: unit,
                }
            })
            .collect();

        // Discounts and prorations arrive as negative lines; collapse to the billed total.
        if items.is_empty() || items.iter().any(|i| i.unit_amount_cents < 0) {
            items = vec![NewInvoiceItem {
                description: format!(
                    "Stripe invoice {}",
                    stripe_invoice.number.as_deref().unwrap_or(&stripe_invoice.id)
                ),
                quantity: 1,
                unit_amount_cents: stripe_invoice.amount_due.max(stripe_invoice.amount_paid),
            }];
        }

        let draft = InvoiceDraft::from_request(
            patient.patient_id.clone(),
            NewInvoice {
                patient_id: patient.patient_id.clone(),
                currency: stripe_invoice.currency.clone(),
                due_date: None,
                notes: stripe_invoice.number.clone(),
                stripe_invoice_id: Some(stripe_invoice.id.clone()),
                finalize: true,
                items,
            },
        )?;
        let invoice = self.store.insert_invoice(draft).await?;
        tracing::info!(
            invoice_id = %invoice.id,
            patient_id = %patient.patient_id,
            stripe_invoice_id = %stripe_invoice.id,
            "imported stripe invoice"
        );
        Ok(invoice)
    }

    async fn invoice_payment_failed(
        &self,
        stripe_invoice: &StripeInvoice,
    ) -> ClinicResult<Disposition> {
        let mut patient = self
            .patient_for_customer(
                stripe_invoice.customer.as_deref(),
                stripe_invoice.customer_email.as_deref(),
            )
            .await?;
        add_hashtag(&mut patient.membership_hashtags, &hashtag(PAYMENT_FAILED_HASHTAG)?);
        tracing::warn!(
            patient_id = %patient.patient_id,
            stripe_invoice_id = %stripe_invoice.id,
            "stripe invoice payment failed"
        );
        self.store.save_patient(&patient).await?;
        Ok(Disposition::Applied)
    }

    async fn charge_succeeded(&self, charge: &Charge) -> ClinicResult<Disposition> {
        if charge.invoice.is_some() {
            return Ok(Disposition::Ignored(format!(
                "charge {} settles a stripe invoice",
                charge.id
            )));
        }
        if self
            .store
            .find_payment_by_stripe_id(charge.payment_reference())
            .await?
            .is_some()
        {
            return Ok(Disposition::Ignored(format!(
                "charge {} already recorded",
                charge.id
            )));
        }

        let mut patient = self
            .patient_for_customer(charge.customer.as_deref(), charge.email())
            .await?;
        self.record_standalone_payment(
            &patient,
            charge.description.as_deref().unwrap_or("Stripe charge"),
            charge.amount,
            charge.currency.as_deref(),
            charge.payment_reference(),
        )
        .await?;
        transition_or_warn(&mut patient, StatusEvent::PaymentReceived);
        self.store.save_patient(&patient).await?;
        Ok(Disposition::Applied)
    }

    async fn subscription_changed(&self, subscription: &Subscription) -> ClinicResult<Disposition> {
        if subscription.has_ended() {
            return self.subscription_ended(subscription).await;
        }
        if !subscription.is_active() {
            return Ok(Disposition::Ignored(format!(
                "subscription {} is {}",
                subscription.id,
                subscription.status.as_deref().unwrap_or("unknown")
            )));
        }

        let mut patient = self
            .patient_for_customer(subscription.customer.as_deref(), None)
            .await?;
        add_hashtag(&mut patient.membership_hashtags, &hashtag(ACTIVE_MEMBER_HASHTAG)?);
        transition_or_warn(&mut patient, StatusEvent::PaymentReceived);
        self.store.save_patient(&patient).await?;
        Ok(Disposition::Applied)
    }

    async fn subscription_ended(&self, subscription: &Subscription) -> ClinicResult<Disposition> {
        let mut patient = self
            .patient_for_customer(subscription.customer.as_deref(), None)
            .await?;
        remove_hashtag(&mut patient.membership_hashtags, &hashtag(ACTIVE_MEMBER_HASHTAG)?);
        transition_or_warn(&mut patient, StatusEvent::SubscriptionEnded);
        self.store.save_patient(&patient).await?;
        Ok(Disposition::Applied)
    }

    /// Record a one-off paid invoice unless the payment reference is already on file.
    async fn record_standalone_payment(
        &self,
        patient: &Patient,
        description: &str,
        amount_cents: i64,
        currency: Option<&str>,
        reference: &str,
    ) -> ClinicResult<()> {
        if amount_cents <= 0 {
            return Ok(());
        }
        if self.store.find_payment_by_stripe_id(reference).await?.is_some() {
            tracing::debug!(patient_id = %patient.patient_id, "stripe payment already recorded");
            return Ok(());
        }

        let draft = InvoiceDraft::from_request(
            patient.patient_id.clone(),
            NewInvoice {
                patient_id: patient.patient_id.clone(),
                currency: currency.map(str::to_string),
                due_date: None,
                notes: None,
                stripe_invoice_id: None,
                finalize: true,
                items: vec![NewInvoiceItem {
                    description: description.to_string(),
                    quantity: 1,
                    unit_amount_cents: amount_cents,
                }],
            },
        )?;
        let invoice = self.store.insert_invoice(draft).await?;
        let invoice = self
            .store
            .insert_payment(
                invoice.id,
                NewPayment {
                    amount_cents,
                    method: PaymentMethod::Stripe,
                    stripe_payment_id: Some(reference.to_string()),
                    paid_at: None,
                },
            )
            .await?;
        tracing::info!(
            invoice_id = %invoice.id,
            patient_id = %patient.patient_id,
            amount_cents,
            "recorded stripe payment"
        );
        Ok(())
    }
}

fn link_customer(patient: &mut Patient, customer: Option<&str>) {
    let Some(customer) = customer else {
        return;
    };
    match patient.stripe_customer_id.as_deref() {
        None => patient.stripe_customer_id = Some(customer.to_string()),
        Some(existing) if existing != customer => tracing::warn!(
            patient_id = %patient.patient_id,
            "patient already linked to a different stripe customer"
        ),
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvoiceStatus, PatientStatus};
    use crate::store::{ClinicStore, InvoiceFilter, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(json!({
            "id": format!("evt_{event_type}"),
            "type": event_type,
            "created": 1_767_225_600,
            "livemode": false,
            "data": { "object": object }
        }))
        .unwrap()
    }

    async fn setup() -> (Arc<MemoryStore>, StripeReconciler) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), StripeReconciler::new(store))
    }

    async fn patient(store: &MemoryStore, email: &str, customer: Option<&str>) -> Patient {
        let mut new = NewPatient::with_email(EmailAddress::parse(email).unwrap());
        new.stripe_customer_id = customer.map(str::to_string);
        store.insert_patient(new).await.unwrap()
    }

    #[tokio::test]
    async fn checkout_creates_patient_invoice_and_payment() {
        let (store, rec) = setup().await;
        let e = event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "customer_details": { "email": "new@example.com", "name": "Ana Maria Lopez" },
                "mode": "payment",
                "payment_status": "paid",
                "amount_total": 19_900,
                "currency": "usd",
                "payment_intent": "pi_1"
            }),
        );

        assert_eq!(rec.handle(&e).await.unwrap(), Disposition::Applied);
        let p = store
            .find_patient_by_stripe_customer("cus_1")
            .await
            .unwrap()
            .expect("patient should be created");
        assert_eq!(p.first_name.as_deref(), Some("Ana"));
        assert_eq!(p.last_name.as_deref(), Some("Maria Lopez"));
        assert_eq!(p.status, PatientStatus::Client);

        let invoices = store.list_invoices(&InvoiceFilter::default()).await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
        assert_eq!(invoices[0].total_cents, 19_900);

        // Redelivery does not double-bill.
        rec.handle(&e).await.unwrap();
        assert_eq!(store.list_invoices(&InvoiceFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checkout_matches_client_reference_and_tags_subscriptions() {
        let (store, rec) = setup().await;
        let existing = patient(&store, "ref@example.com", None).await;
        let e = event(
            "checkout.session.completed",
            json!({
                "id": "cs_2",
                "customer": "cus_2",
                "client_reference_id": existing.patient_id,
                "customer_details": { "email": "other@example.com" },
                "mode": "subscription",
                "payment_status": "paid",
                "amount_total": 29_900,
                "subscription": "sub_2",
                "invoice": "in_2"
            }),
        );
        rec.handle(&e).await.unwrap();

        let p = store.get_patient(&existing.patient_id).await.unwrap().unwrap();
        assert_eq!(p.stripe_customer_id.as_deref(), Some("cus_2"));
        assert_eq!(p.membership_hashtags, vec![ACTIVE_MEMBER_HASHTAG]);
        assert!(
            store.list_invoices(&InvoiceFilter::default()).await.unwrap().is_empty(),
            "subscription checkouts are billed through invoice.paid"
        );
    }

    #[tokio::test]
    async fn invoice_paid_imports_invoice_once() {
        let (store, rec) = setup().await;
        let p = patient(&store, "inv@example.com", Some("cus_3")).await;
        let e = event(
            "invoice.paid",
            json!({
                "id": "in_3",
                "customer": "cus_3",
                "number": "ABC-0001",
                "amount_due": 30_000,
                "amount_paid": 30_000,
                "currency": "usd",
                "payment_intent": "pi_3",
                "lines": { "data": [
                    { "description": "Semaglutide", "amount": 30_000, "quantity": 2 }
                ]}
            }),
        );
        rec.handle(&e).await.unwrap();
        rec.handle(&e).await.unwrap();

        let invoice = store.find_invoice_by_stripe_id("in_3").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.items[0].quantity, 2);
        assert_eq!(invoice.items[0].unit_amount_cents, 15_000);
        assert_eq!(invoice.payments.len(), 1);

        let p = store.get_patient(&p.patient_id).await.unwrap().unwrap();
        assert_eq!(p.status, PatientStatus::Client);
        assert!(p.membership_hashtags.contains(&ACTIVE_MEMBER_HASHTAG.to_string()));
    }

    #[tokio::test]
    async fn payment_failure_then_recovery_toggles_hashtag() {
        let (store, rec) = setup().await;
        let p = patient(&store, "late@example.com", Some("cus_4")).await;
        let object = json!({
            "id": "in_4", "customer": "cus_4", "amount_due": 5_000, "amount_paid": 0,
            "lines": { "data": [] }
        });
        rec.handle(&event("invoice.payment_failed", object)).await.unwrap();
        let tagged = store.get_patient(&p.patient_id).await.unwrap().unwrap();
        assert_eq!(tagged.membership_hashtags, vec![PAYMENT_FAILED_HASHTAG]);

        let paid = json!({
            "id": "in_4", "customer": "cus_4", "amount_due": 5_000, "amount_paid": 5_000,
            "charge": "ch_4", "lines": { "data": [] }
        });
        rec.handle(&event("invoice.paid", paid)).await.unwrap();
        let recovered = store.get_patient(&p.patient_id).await.unwrap().unwrap();
        assert_eq!(recovered.membership_hashtags, vec![ACTIVE_MEMBER_HASHTAG]);
    }

    #[tokio::test]
    async fn subscription_lifecycle_drives_status() {
        let (store, rec) = setup().await;
        let p = patient(&store, "sub@example.com", Some("cus_5")).await;

        rec.handle(&event(
            "customer.subscription.created",
            json!({"id": "sub_5", "customer": "cus_5", "status": "active"}),
        ))
        .await
        .unwrap();
        assert_eq!(
            store.get_patient(&p.patient_id).await.unwrap().unwrap().status,
            PatientStatus::Client
        );

        rec.handle(&event(
            "customer.subscription.deleted",
            json!({"id": "sub_5", "customer": "cus_5", "status": "canceled"}),
        ))
        .await
        .unwrap();
        let ended = store.get_patient(&p.patient_id).await.unwrap().unwrap();
        assert_eq!(ended.status, PatientStatus::Inactive);
        assert!(ended.membership_hashtags.is_empty());
    }

    #[tokio::test]
    async fn unknown_customer_is_not_found() {
        let (_, rec) = setup().await;
        let err = rec
            .handle(&event(
                "customer.subscription.updated",
                json!({"id": "sub_x", "customer": "cus_missing", "status": "active"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::NotFound { entity: "patient", .. }));
    }

    #[tokio::test]
    async fn charges_for_invoices_and_unknown_types_are_ignored() {
        let (_, rec) = setup().await;
        let charge = event(
            "charge.succeeded",
            json!({"id": "ch_6", "customer": "cus_6", "amount": 100, "invoice": "in_6"}),
        );
        assert!(matches!(rec.handle(&charge).await.unwrap(), Disposition::Ignored(_)));

        let other = event("customer.created", json!({"id": "cus_7"}));
        assert!(matches!(rec.handle(&other).await.unwrap(), Disposition::Ignored(_)));
    }
}
