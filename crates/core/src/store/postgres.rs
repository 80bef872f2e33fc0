//! Postgres-backed [`ClinicStore`].
//!
//! Queries are checked at runtime. Rows are read into private `*Row` structs and converted into
//! domain types, so a bad enum value in the database surfaces as [`ClinicError::CorruptRow`]
//! rather than a panic.

use super::{page, ClinicStore, InvoiceFilter};
use crate::config::CoreConfig;
use crate::constants::WEBHOOK_CLAIM_LEASE_SECS;
use crate::models::invoice::{ensure_accepts_payment, format_invoice_number};
use crate::models::patient::format_patient_id;
use crate::models::{
    Address, Invoice, InvoiceDraft, InvoiceItem, InvoicePayment, InvoiceStatus, NewPatient,
    NewPayment, NewSoapNote, NewWebhookEvent, Patient, PatientFilter, PatientStatus, SoapNote,
    WebhookClaim, WebhookEvent, WebhookEventFilter,
};
use crate::{ClinicError, ClinicResult};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use clinic_types::EmailAddress;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

const PATIENT_COLUMNS: &str = "patient_id, first_name, last_name, email, phone, date_of_birth, \
    gender, address_line1, address_line2, address_city, address_state, address_postal_code, \
    address_country, membership_hashtags, stripe_customer_id, status, intake, created_at, \
    updated_at";

const INVOICE_COLUMNS: &str = "id, invoice_number, patient_id, status, currency, total_cents, \
    amount_paid_cents, due_date, stripe_invoice_id, notes, created_at, updated_at";

const SOAP_NOTE_COLUMNS: &str = "id, patient_id, subjective, objective, assessment, plan, \
    ai_generated, status, created_by, approved_by, approved_at, rejection_reason, created_at, \
    updated_at";

const WEBHOOK_COLUMNS: &str = "id, provider, provider_event_id, event_type, payload, processed, \
    error_message, attempts, received_at, processed_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool sized from configuration.
    pub async fn connect(cfg: &CoreConfig) -> ClinicResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections())
            .connect(cfg.database_url())
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply any pending schema migrations.
    pub async fn migrate(&self) -> ClinicResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn patient_exists(&self, patient_id: &str) -> ClinicResult<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM patients WHERE patient_id = $1)")
                .bind(patient_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// `table` is always one of this module's literals, never caller input.
    async fn row_exists(&self, table: &'static str, id: Uuid) -> ClinicResult<bool> {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
        let (exists,): (bool,) = sqlx::query_as(&sql).bind(id).fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn load_invoices(&self, rows: Vec<InvoiceRow>) -> ClinicResult<Vec<Invoice>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let items: Vec<InvoiceItemRow> = sqlx::query_as(
            "SELECT id, invoice_id, description, quantity, unit_amount_cents, amount_cents \
             FROM invoice_items WHERE invoice_id = ANY($1) ORDER BY invoice_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let payments: Vec<PaymentRow> = sqlx::query_as(
            "SELECT id, invoice_id, amount_cents, method, stripe_payment_id, paid_at \
             FROM invoice_payments WHERE invoice_id = ANY($1) ORDER BY paid_at, id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items_by_invoice: HashMap<Uuid, Vec<InvoiceItem>> = HashMap::new();
        for row in items {
            items_by_invoice
                .entry(row.invoice_id)
                .or_default()
                .push(row.into());
        }
        let mut payments_by_invoice: HashMap<Uuid, Vec<InvoicePayment>> = HashMap::new();
        for row in payments {
            let invoice_id = row.invoice_id;
            payments_by_invoice
                .entry(invoice_id)
                .or_default()
                .push(row.try_into()?);
        }

        rows.into_iter()
            .map(|row| {
                let items = items_by_invoice.remove(&row.id).unwrap_or_default();
                let payments = payments_by_invoice.remove(&row.id).unwrap_or_default();
                row.into_invoice(items, payments)
            })
            .collect()
    }

    async fn load_invoice(&self, row: Option<InvoiceRow>) -> ClinicResult<Option<Invoice>> {
        match row {
            Some(row) => Ok(self.load_invoices(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

fn corrupt(column: &'static str, value: impl Into<String>) -> ClinicError {
    ClinicError::CorruptRow {
        column,
        value: value.into(),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Build an `ILIKE` pattern matching `term` anywhere, with wildcards in `term` escaped.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[derive(FromRow)]
struct PatientRow {
    patient_id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    email: String,
    phone: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    address_line1: Option<String>,
    address_line2: Option<String>,
    address_city: Option<String>,
    address_state: Option<String>,
    address_postal_code: Option<String>,
    address_country: Option<String>,
    membership_hashtags: Vec<String>,
    stripe_customer_id: Option<String>,
    status: String,
    intake: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PatientRow> for Patient {
    type Error = ClinicError;

    fn try_from(row: PatientRow) -> Result<Self, Self::Error> {
        let email = EmailAddress::parse(row.email.clone()).map_err(|_| corrupt("email", row.email))?;
        let status = PatientStatus::from_str(&row.status).map_err(|_| corrupt("status", row.status))?;
        Ok(Patient {
            patient_id: row.patient_id,
            first_name: row.first_name,
            last_name: row.last_name,
            email,
            phone: row.phone,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            address: Address {
                line1: row.address_line1,
                line2: row.address_line2,
                city: row.address_city,
                state: row.address_state,
                postal_code: row.address_postal_code,
                country: row.address_country,
            },
            membership_hashtags: row.membership_hashtags,
            stripe_customer_id: row.stripe_customer_id,
            status,
            intake: row.intake,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    patient_id: String,
    status: String,
    currency: String,
    total_cents: i64,
    amount_paid_cents: i64,
    due_date: Option<NaiveDate>,
    stripe_invoice_id: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn into_invoice(
        self,
        items: Vec<InvoiceItem>,
        payments: Vec<InvoicePayment>,
    ) -> ClinicResult<Invoice> {
        let status =
            InvoiceStatus::from_str(&self.status).map_err(|_| corrupt("invoices.status", self.status))?;
        Ok(Invoice {
            id: self.id,
            invoice_number: self.invoice_number,
            patient_id: self.patient_id,
            status,
            currency: self.currency,
            total_cents: self.total_cents,
            amount_paid_cents: self.amount_paid_cents,
            due_date: self.due_date,
            stripe_invoice_id: self.stripe_invoice_id,
            notes: self.notes,
            items,
            payments,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct InvoiceItemRow {
    id: Uuid,
    invoice_id: Uuid,
    description: String,
    quantity: i32,
    unit_amount_cents: i64,
    amount_cents: i64,
}

impl From<InvoiceItemRow> for InvoiceItem {
    fn from(row: InvoiceItemRow) -> Self {
        InvoiceItem {
            id: row.id,
            description: row.description,
            quantity: row.quantity,
            unit_amount_cents: row.unit_amount_cents,
            amount_cents: row.amount_cents,
        }
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    invoice_id: Uuid,
    amount_cents: i64,
    method: String,
    stripe_payment_id: Option<String>,
    paid_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for InvoicePayment {
    type Error = ClinicError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(InvoicePayment {
            id: row.id,
            invoice_id: row.invoice_id,
            amount_cents: row.amount_cents,
            method: row.method.parse().map_err(|_| corrupt("method", row.method))?,
            stripe_payment_id: row.stripe_payment_id,
            paid_at: row.paid_at,
        })
    }
}

#[derive(FromRow)]
struct SoapNoteRow {
    id: Uuid,
    patient_id: String,
    subjective: String,
    objective: String,
    assessment: String,
    plan: String,
    ai_generated: bool,
    status: String,
    created_by: String,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SoapNoteRow> for SoapNote {
    type Error = ClinicError;

    fn try_from(row: SoapNoteRow) -> Result<Self, Self::Error> {
        Ok(SoapNote {
            id: row.id,
            patient_id: row.patient_id,
            subjective: row.subjective,
            objective: row.objective,
            assessment: row.assessment,
            plan: row.plan,
            ai_generated: row.ai_generated,
            status: row
                .status
                .parse()
                .map_err(|_| corrupt("soap_notes.status", row.status))?,
            created_by: row.created_by,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct WebhookRow {
    id: Uuid,
    provider: String,
    provider_event_id: String,
    event_type: String,
    payload: serde_json::Value,
    processed: bool,
    error_message: Option<String>,
    attempts: i32,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookRow> for WebhookEvent {
    type Error = ClinicError;

    fn try_from(row: WebhookRow) -> Result<Self, Self::Error> {
        Ok(WebhookEvent {
            id: row.id,
            provider: row
                .provider
                .parse()
                .map_err(|_| corrupt("provider", row.provider))?,
            provider_event_id: row.provider_event_id,
            event_type: row.event_type,
            payload: row.payload,
            processed: row.processed,
            error_message: row.error_message,
            attempts: row.attempts,
            received_at: row.received_at,
            processed_at: row.processed_at,
        })
    }
}

fn patient_conflict(err: sqlx::Error) -> ClinicError {
    if is_unique_violation(&err) {
        ClinicError::Conflict("email or Stripe customer id already belongs to another patient".into())
    } else {
        err.into()
    }
}

#[async_trait]
impl ClinicStore for PgStore {
    async fn insert_patient(&self, new: NewPatient) -> ClinicResult<Patient> {
        let mut tx = self.pool.begin().await?;

        let (sequence,): (i64,) = sqlx::query_as("SELECT nextval('patient_number_seq')")
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            "INSERT INTO patients (patient_id, first_name, last_name, email, phone, date_of_birth, \
             gender, address_line1, address_line2, address_city, address_state, \
             address_postal_code, address_country, membership_hashtags, stripe_customer_id, \
             status, intake) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {PATIENT_COLUMNS}"
        );
        let row: PatientRow = sqlx::query_as(&sql)
            .bind(format_patient_id(sequence))
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(new.email.as_str())
            .bind(&new.phone)
            .bind(new.date_of_birth)
            .bind(&new.gender)
            .bind(&new.address.line1)
            .bind(&new.address.line2)
            .bind(&new.address.city)
            .bind(&new.address.state)
            .bind(&new.address.postal_code)
            .bind(&new.address.country)
            .bind(&new.membership_hashtags)
            .bind(&new.stripe_customer_id)
            .bind(PatientStatus::Pending.as_str())
            .bind(&new.intake)
            .fetch_one(&mut *tx)
            .await
            .map_err(patient_conflict)?;

        tx.commit().await?;
        row.try_into()
    }

    async fn get_patient(&self, patient_id: &str) -> ClinicResult<Option<Patient>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE patient_id = $1");
        sqlx::query_as::<_, PatientRow>(&sql)
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Patient::try_from)
            .transpose()
    }

    async fn find_patient_by_email(&self, email: &EmailAddress) -> ClinicResult<Option<Patient>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE lower(email) = $1");
        sqlx::query_as::<_, PatientRow>(&sql)
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Patient::try_from)
            .transpose()
    }

    async fn find_patient_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> ClinicResult<Option<Patient>> {
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE stripe_customer_id = $1");
        sqlx::query_as::<_, PatientRow>(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Patient::try_from)
            .transpose()
    }

    async fn list_patients(&self, filter: &PatientFilter) -> ClinicResult<Vec<Patient>> {
        let (limit, offset) = page(filter.limit, filter.offset);
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients \
             WHERE ($1::text IS NULL OR status = $1) \
               AND ($2::text IS NULL OR $2 = ANY(membership_hashtags)) \
               AND ($3::text IS NULL OR patient_id ILIKE $3 OR email ILIKE $3 \
                    OR first_name ILIKE $3 OR last_name ILIKE $3) \
             ORDER BY created_at DESC, patient_id DESC \
             LIMIT $4 OFFSET $5"
        );
        let rows: Vec<PatientRow> = sqlx::query_as(&sql)
            .bind(filter.status.map(PatientStatus::as_str))
            .bind(&filter.hashtag)
            .bind(filter.search.as_deref().map(contains_pattern))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Patient::try_from).collect()
    }

    async fn save_patient(&self, patient: &Patient) -> ClinicResult<Patient> {
        let sql = format!(
            "UPDATE patients SET first_name = $2, last_name = $3, email = $4, phone = $5, \
             date_of_birth = $6, gender = $7, address_line1 = $8, address_line2 = $9, \
             address_city = $10, address_state = $11, address_postal_code = $12, \
             address_country = $13, membership_hashtags = $14, stripe_customer_id = $15, \
             status = $16, intake = $17, updated_at = now() \
             WHERE patient_id = $1 AND updated_at = $18 RETURNING {PATIENT_COLUMNS}"
        );
        let row: Option<PatientRow> = sqlx::query_as(&sql)
            .bind(&patient.patient_id)
            .bind(&patient.first_name)
            .bind(&patient.last_name)
            .bind(patient.email.as_str())
            .bind(&patient.phone)
            .bind(patient.date_of_birth)
            .bind(&patient.gender)
            .bind(&patient.address.line1)
            .bind(&patient.address.line2)
            .bind(&patient.address.city)
            .bind(&patient.address.state)
            .bind(&patient.address.postal_code)
            .bind(&patient.address.country)
            .bind(&patient.membership_hashtags)
            .bind(&patient.stripe_customer_id)
            .bind(patient.status.as_str())
            .bind(&patient.intake)
            .bind(patient.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(patient_conflict)?;

        match row {
            Some(row) => row.try_into(),
            None if self.patient_exists(&patient.patient_id).await? => {
                Err(ClinicError::stale("patient", &patient.patient_id))
            }
            None => Err(ClinicError::not_found("patient", &patient.patient_id)),
        }
    }

    async fn delete_patient(&self, patient_id: &str) -> ClinicResult<bool> {
        let result = sqlx::query("DELETE FROM patients WHERE patient_id = $1")
            .bind(patient_id)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    ClinicError::Conflict(format!(
                        "patient {patient_id} still has invoices or SOAP notes"
                    ))
                } else {
                    err.into()
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_invoice(&self, draft: InvoiceDraft) -> ClinicResult<Invoice> {
        let mut tx = self.pool.begin().await?;

        let (sequence,): (i64,) = sqlx::query_as("SELECT nextval('invoice_number_seq')")
            .fetch_one(&mut *tx)
            .await?;
        let id = Uuid::new_v4();
        let invoice_number = format_invoice_number(Utc::now().year(), sequence);

        sqlx::query(
            "INSERT INTO invoices (id, invoice_number, patient_id, status, currency, total_cents, \
             due_date, stripe_invoice_id, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id)
        .bind(&invoice_number)
        .bind(&draft.patient_id)
        .bind(draft.status.as_str())
        .bind(&draft.currency)
        .bind(draft.total_cents)
        .bind(draft.due_date)
        .bind(&draft.stripe_invoice_id)
        .bind(&draft.notes)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                ClinicError::not_found("patient", &draft.patient_id)
            } else if is_unique_violation(&err) {
                ClinicError::Conflict(format!(
                    "stripe invoice {} already recorded",
                    draft.stripe_invoice_id.as_deref().unwrap_or_default()
                ))
            } else {
                err.into()
            }
        })?;

        for (position, item) in draft.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO invoice_items (id, invoice_id, position, description, quantity, \
                 unit_amount_cents, amount_cents) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(item.id)
            .bind(id)
            .bind(position as i32)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_amount_cents)
            .bind(item.amount_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_invoice(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("invoice", id))
    }

    async fn get_invoice(&self, id: Uuid) -> ClinicResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let row: Option<InvoiceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.load_invoice(row).await
    }

    async fn find_invoice_by_stripe_id(
        &self,
        stripe_invoice_id: &str,
    ) -> ClinicResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE stripe_invoice_id = $1");
        let row: Option<InvoiceRow> = sqlx::query_as(&sql)
            .bind(stripe_invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        self.load_invoice(row).await
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> ClinicResult<Vec<Invoice>> {
        let (limit, offset) = page(filter.limit, filter.offset);
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE ($1::text IS NULL OR patient_id = $1) \
               AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC, invoice_number DESC \
             LIMIT $3 OFFSET $4"
        );
        let rows: Vec<InvoiceRow> = sqlx::query_as(&sql)
            .bind(&filter.patient_id)
            .bind(filter.status.map(InvoiceStatus::as_str))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        self.load_invoices(rows).await
    }

    async fn update_invoice_status(
        &self,
        id: Uuid,
        expected: InvoiceStatus,
        status: InvoiceStatus,
    ) -> ClinicResult<Invoice> {
        let result = sqlx::query(
            "UPDATE invoices SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        let invoice = self
            .get_invoice(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("invoice", id))?;
        if result.rows_affected() == 0 {
            return Err(ClinicError::Conflict(format!(
                "invoice {} is {}, expected {expected}",
                invoice.invoice_number, invoice.status
            )));
        }
        Ok(invoice)
    }

    async fn void_invoice(&self, id: Uuid) -> ClinicResult<Invoice> {
        let mut tx = self.pool.begin().await?;

        // Same lock as insert_payment, so a payment cannot land between the check and the update.
        let locked: Option<(String, String)> =
            sqlx::query_as("SELECT invoice_number, status FROM invoices WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let (invoice_number, status) =
            locked.ok_or_else(|| ClinicError::not_found("invoice", id))?;

        if status != InvoiceStatus::Void.as_str() {
            let (has_payments,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM invoice_payments WHERE invoice_id = $1)",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            if has_payments {
                return Err(ClinicError::Conflict(format!(
                    "invoice {invoice_number} has payments and cannot be voided"
                )));
            }
            sqlx::query("UPDATE invoices SET status = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(InvoiceStatus::Void.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.get_invoice(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("invoice", id))
    }

    async fn insert_payment(&self, invoice_id: Uuid, payment: NewPayment) -> ClinicResult<Invoice> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises payments and voids against the same invoice; the status read
        // under it is the one the payment is checked against.
        let locked: Option<(String, String, i64)> = sqlx::query_as(
            "SELECT invoice_number, status, total_cents FROM invoices WHERE id = $1 FOR UPDATE",
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (invoice_number, status, total_cents) =
            locked.ok_or_else(|| ClinicError::not_found("invoice", invoice_id))?;
        let status: InvoiceStatus = status
            .parse()
            .map_err(|_| corrupt("invoices.status", status))?;
        ensure_accepts_payment(&invoice_number, status, total_cents, payment.amount_cents)?;

        sqlx::query(
            "INSERT INTO invoice_payments (id, invoice_id, amount_cents, method, \
             stripe_payment_id, paid_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(payment.amount_cents)
        .bind(payment.method.as_str())
        .bind(&payment.stripe_payment_id)
        .bind(payment.paid_at.unwrap_or_else(Utc::now))
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ClinicError::Conflict(format!(
                    "stripe payment {} already recorded",
                    payment.stripe_payment_id.as_deref().unwrap_or_default()
                ))
            } else {
                err.into()
            }
        })?;

        let (amount_paid_cents,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM invoice_payments \
             WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE invoices SET amount_paid_cents = $2, status = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(invoice_id)
        .bind(amount_paid_cents)
        .bind(InvoiceStatus::after_payment(total_cents, amount_paid_cents).as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_invoice(invoice_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("invoice", invoice_id))
    }

    async fn find_payment_by_stripe_id(
        &self,
        stripe_payment_id: &str,
    ) -> ClinicResult<Option<InvoicePayment>> {
        sqlx::query_as::<_, PaymentRow>(
            "SELECT id, invoice_id, amount_cents, method, stripe_payment_id, paid_at \
             FROM invoice_payments WHERE stripe_payment_id = $1",
        )
        .bind(stripe_payment_id)
        .fetch_optional(&self.pool)
        .await?
        .map(InvoicePayment::try_from)
        .transpose()
    }

    async fn insert_soap_note(
        &self,
        patient_id: &str,
        created_by: &str,
        new: NewSoapNote,
    ) -> ClinicResult<SoapNote> {
        let sql = format!(
            "INSERT INTO soap_notes (id, patient_id, subjective, objective, assessment, plan, \
             ai_generated, created_by) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {SOAP_NOTE_COLUMNS}"
        );
        let row: SoapNoteRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(patient_id)
            .bind(&new.subjective)
            .bind(&new.objective)
            .bind(&new.assessment)
            .bind(&new.plan)
            .bind(new.ai_generated)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    ClinicError::not_found("patient", patient_id)
                } else {
                    err.into()
                }
            })?;
        row.try_into()
    }

    async fn get_soap_note(&self, id: Uuid) -> ClinicResult<Option<SoapNote>> {
        let sql = format!("SELECT {SOAP_NOTE_COLUMNS} FROM soap_notes WHERE id = $1");
        sqlx::query_as::<_, SoapNoteRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(SoapNote::try_from)
            .transpose()
    }

    async fn list_soap_notes(&self, patient_id: &str) -> ClinicResult<Vec<SoapNote>> {
        let sql = format!(
            "SELECT {SOAP_NOTE_COLUMNS} FROM soap_notes WHERE patient_id = $1 \
             ORDER BY created_at DESC"
        );
        let rows: Vec<SoapNoteRow> = sqlx::query_as(&sql)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SoapNote::try_from).collect()
    }

    async fn save_soap_note(&self, note: &SoapNote) -> ClinicResult<SoapNote> {
        let sql = format!(
            "UPDATE soap_notes SET subjective = $2, objective = $3, assessment = $4, plan = $5, \
             status = $6, approved_by = $7, approved_at = $8, rejection_reason = $9, \
             updated_at = now() WHERE id = $1 AND updated_at = $10 RETURNING {SOAP_NOTE_COLUMNS}"
        );
        let row: Option<SoapNoteRow> = sqlx::query_as(&sql)
            .bind(note.id)
            .bind(&note.subjective)
            .bind(&note.objective)
            .bind(&note.assessment)
            .bind(&note.plan)
            .bind(note.status.as_str())
            .bind(&note.approved_by)
            .bind(note.approved_at)
            .bind(&note.rejection_reason)
            .bind(note.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None if self.row_exists("soap_notes", note.id).await? => {
                Err(ClinicError::stale("SOAP note", note.id))
            }
            None => Err(ClinicError::not_found("SOAP note", note.id)),
        }
    }

    async fn claim_webhook_event(&self, new: NewWebhookEvent) -> ClinicResult<WebhookClaim> {
        // A redelivery re-claims the row only while it is unprocessed and its lease has run
        // out. Otherwise the conflict matches but the WHERE does not, and nothing returns.
        let sql = format!(
            "INSERT INTO webhook_events (id, provider, provider_event_id, event_type, payload, \
             claimed_until) \
             VALUES ($1, $2, $3, $4, $5, now() + make_interval(secs => $6)) \
             ON CONFLICT (provider, provider_event_id) DO UPDATE \
                 SET attempts = webhook_events.attempts + 1, claimed_until = EXCLUDED.claimed_until \
                 WHERE NOT webhook_events.processed \
                   AND (webhook_events.claimed_until IS NULL OR webhook_events.claimed_until < now()) \
             RETURNING {WEBHOOK_COLUMNS}"
        );
        let claimed: Option<WebhookRow> = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(new.provider.as_str())
            .bind(&new.provider_event_id)
            .bind(&new.event_type)
            .bind(&new.payload)
            .bind(WEBHOOK_CLAIM_LEASE_SECS as f64)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = claimed {
            return Ok(WebhookClaim::Claimed(row.try_into()?));
        }

        let sql = format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhook_events \
             WHERE provider = $1 AND provider_event_id = $2"
        );
        let existing: WebhookEvent = sqlx::query_as::<_, WebhookRow>(&sql)
            .bind(new.provider.as_str())
            .bind(&new.provider_event_id)
            .fetch_one(&self.pool)
            .await?
            .try_into()?;
        if existing.processed {
            Ok(WebhookClaim::AlreadyProcessed(existing))
        } else {
            Ok(WebhookClaim::InProgress(existing))
        }
    }

    async fn get_webhook_event(&self, id: Uuid) -> ClinicResult<Option<WebhookEvent>> {
        let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_events WHERE id = $1");
        sqlx::query_as::<_, WebhookRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(WebhookEvent::try_from)
            .transpose()
    }

    async fn list_webhook_events(
        &self,
        filter: &WebhookEventFilter,
    ) -> ClinicResult<Vec<WebhookEvent>> {
        let (limit, offset) = page(filter.limit, filter.offset);
        // The unprocessed backlog is worked oldest first; the full log reads newest first.
        let order = if filter.unprocessed { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhook_events \
             WHERE (NOT $1 OR NOT processed) \
               AND ($2::text IS NULL OR provider = $2) \
             ORDER BY received_at {order}, id {order} \
             LIMIT $3 OFFSET $4"
        );
        let rows: Vec<WebhookRow> = sqlx::query_as(&sql)
            .bind(filter.unprocessed)
            .bind(filter.provider.map(|p| p.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WebhookEvent::try_from).collect()
    }

    async fn mark_webhook_processed(&self, id: Uuid) -> ClinicResult<()> {
        let result = sqlx::query(
            "UPDATE webhook_events SET processed = true, error_message = NULL, \
             processed_at = now(), claimed_until = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ClinicError::not_found("webhook event", id));
        }
        Ok(())
    }

    async fn mark_webhook_failed(&self, id: Uuid, error_message: &str) -> ClinicResult<()> {
        let result = sqlx::query(
            "UPDATE webhook_events SET error_message = $2, claimed_until = NULL \
             WHERE id = $1 AND NOT processed",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && !self.row_exists("webhook_events", id).await? {
            return Err(ClinicError::not_found("webhook event", id));
        }
        Ok(())
    }

    async fn reclaim_webhook_event(&self, id: Uuid) -> ClinicResult<bool> {
        let result = sqlx::query(
            "UPDATE webhook_events SET attempts = attempts + 1, \
             claimed_until = now() + make_interval(secs => $2) \
             WHERE id = $1 AND NOT processed \
               AND (claimed_until IS NULL OR claimed_until < now())",
        )
        .bind(id)
        .bind(WEBHOOK_CLAIM_LEASE_SECS as f64)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 && !self.row_exists("webhook_events", id).await? {
            return Err(ClinicError::not_found("webhook event", id));
        }
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> ClinicResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("doe"), "%doe%");
        assert_eq!(contains_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }
}
