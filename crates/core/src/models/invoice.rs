//! Invoices, their line items and payments.
//!
//! Amounts are integer minor units (cents) throughout, matching Stripe.

use crate::constants::{DEFAULT_CURRENCY, INVOICE_NUMBER_PREFIX};
use crate::{ClinicError, ClinicResult};
use chrono::{DateTime, NaiveDate, Utc};
use clinic_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    PartiallyPaid,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    /// Status implied by the amounts after a payment has been recorded.
    pub fn after_payment(total_cents: i64, amount_paid_cents: i64) -> InvoiceStatus {
        if amount_paid_cents >= total_cents {
            InvoiceStatus::Paid
        } else if amount_paid_cents > 0 {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Open
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "open" => Ok(InvoiceStatus::Open),
            "partially_paid" => Ok(InvoiceStatus::PartiallyPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "void" => Ok(InvoiceStatus::Void),
            other => Err(format!("unknown invoice status: {other:?}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Stripe,
    Cash,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(PaymentMethod::Stripe),
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "other" => Ok(PaymentMethod::Other),
            other => Err(format!("unknown payment method: {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoicePayment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub stripe_payment_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Invoice {
    pub id: Uuid,
    /// Human-readable number, e.g. `INV-2026-000123`.
    pub invoice_number: String,
    pub patient_id: String,
    pub status: InvoiceStatus,
    pub currency: String,
    pub total_cents: i64,
    pub amount_paid_cents: i64,
    pub due_date: Option<NaiveDate>,
    pub stripe_invoice_id: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<InvoicePayment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn balance_cents(&self) -> i64 {
        (self.total_cents - self.amount_paid_cents).max(0)
    }

    /// Check that a payment may be recorded against this invoice.
    pub fn ensure_accepts_payment(&self, amount_cents: i64) -> ClinicResult<()> {
        ensure_accepts_payment(
            &self.invoice_number,
            self.status,
            self.total_cents,
            amount_cents,
        )
    }
}

/// Payment rule shared by the services and the stores, which re-check it under the row lock.
pub fn ensure_accepts_payment(
    invoice_number: &str,
    status: InvoiceStatus,
    total_cents: i64,
    amount_cents: i64,
) -> ClinicResult<()> {
    if amount_cents <= 0 {
        return Err(ClinicError::InvalidInput(
            "payment amount must be positive".into(),
        ));
    }
    match status {
        InvoiceStatus::Draft => Err(ClinicError::Conflict(format!(
            "invoice {invoice_number} is a draft and must be finalized first"
        ))),
        InvoiceStatus::Void => Err(ClinicError::Conflict(format!(
            "invoice {invoice_number} is void"
        ))),
        InvoiceStatus::Paid if total_cents > 0 => Err(ClinicError::Conflict(format!(
            "invoice {invoice_number} is already paid"
        ))),
        _ => Ok(()),
    }
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewInvoiceItem {
    pub description: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub unit_amount_cents: i64,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewInvoice {
    pub patient_id: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub stripe_invoice_id: Option<String>,
    /// Create the invoice already `open` rather than `draft`.
    #[serde(default)]
    pub finalize: bool,
    pub items: Vec<NewInvoiceItem>,
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewPayment {
    pub amount_cents: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub stripe_payment_id: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

/// A validated invoice ready to be persisted. Stores assign the id and number.
#[derive(Clone, Debug, PartialEq)]
pub struct InvoiceDraft {
    pub patient_id: String,
    pub status: InvoiceStatus,
    pub currency: String,
    pub total_cents: i64,
    pub due_date: Option<NaiveDate>,
    pub stripe_invoice_id: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceDraft {
    /// Validate a request and compute line and invoice totals.
    pub fn from_request(patient_id: String, req: NewInvoice) -> ClinicResult<Self> {
        if req.items.is_empty() {
            return Err(ClinicError::InvalidInput(
                "an invoice needs at least one item".into(),
            ));
        }

        let currency = normalise_currency(req.currency.as_deref())?;
        let mut items = Vec::with_capacity(req.items.len());
        let mut total_cents: i64 = 0;

        for item in req.items {
            let description = NonEmptyText::new(&item.description)?;
            if item.quantity <= 0 {
                return Err(ClinicError::InvalidInput(
                    "item quantity must be positive".into(),
                ));
            }
            if item.unit_amount_cents < 0 {
                return Err(ClinicError::InvalidInput(
                    "item unit amount cannot be negative".into(),
                ));
            }
            let amount_cents = item
                .unit_amount_cents
                .checked_mul(i64::from(item.quantity))
                .ok_or_else(|| ClinicError::InvalidInput("item amount overflows".into()))?;
            total_cents = total_cents
                .checked_add(amount_cents)
                .ok_or_else(|| ClinicError::InvalidInput("invoice total overflows".into()))?;

            items.push(InvoiceItem {
                id: Uuid::new_v4(),
                description: description.into_inner(),
                quantity: item.quantity,
                unit_amount_cents: item.unit_amount_cents,
                amount_cents,
            });
        }

        Ok(Self {
            patient_id,
            status: if req.finalize {
                InvoiceStatus::Open
            } else {
                InvoiceStatus::Draft
            },
            currency,
            total_cents,
            due_date: req.due_date,
            stripe_invoice_id: NonEmptyText::optional(req.stripe_invoice_id)
                .map(NonEmptyText::into_inner),
            notes: NonEmptyText::optional(req.notes).map(NonEmptyText::into_inner),
            items,
        })
    }
}

/// Lowercase three-letter currency code, defaulting to USD.
pub fn normalise_currency(input: Option<&str>) -> ClinicResult<String> {
    let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_CURRENCY.to_string());
    };
    if raw.len() != 3 || !raw.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ClinicError::InvalidInput(format!(
            "currency {raw:?} is not a three-letter ISO code"
        )));
    }
    Ok(raw.to_ascii_lowercase())
}

/// Format an invoice number: `INV-<year>-<6-digit sequence>`.
pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("{INVOICE_NUMBER_PREFIX}-{year}-{sequence:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(description: &str, quantity: i32, unit: i64) -> NewInvoiceItem {
        NewInvoiceItem {
            description: description.into(),
            quantity,
            unit_amount_cents: unit,
        }
    }

    fn request(items: Vec<NewInvoiceItem>) -> NewInvoice {
        NewInvoice {
            patient_id: "P0001".into(),
            currency: None,
            due_date: None,
            notes: Some("  ".into()),
            stripe_invoice_id: None,
            finalize: false,
            items,
        }
    }

    #[test]
    fn draft_totals_items() {
        let draft = InvoiceDraft::from_request(
            "P0001".into(),
            request(vec![item("Semaglutide", 2, 15_000), item("Consult", 1, 5_000)]),
        )
        .unwrap();

        assert_eq!(draft.total_cents, 35_000);
        assert_eq!(draft.items[0].amount_cents, 30_000);
        assert_eq!(draft.currency, "usd");
        assert_eq!(draft.status, InvoiceStatus::Draft);
        assert_eq!(draft.notes, None);
    }

    #[test]
    fn draft_rejects_bad_items() {
        for items in [
            vec![],
            vec![item(" ", 1, 100)],
            vec![item("x", 0, 100)],
            vec![item("x", 1, -1)],
            vec![item("x", 2, i64::MAX)],
        ] {
            assert!(InvoiceDraft::from_request("P0001".into(), request(items)).is_err());
        }
        assert!(matches!(
            InvoiceDraft::from_request("P0001".into(), request(vec![item("\t", 1, 100)])),
            Err(ClinicError::Text(clinic_types::TextError::Empty))
        ));
    }

    #[test]
    fn status_follows_amount_paid() {
        assert_eq!(InvoiceStatus::after_payment(1000, 0), InvoiceStatus::Open);
        assert_eq!(InvoiceStatus::after_payment(1000, 400), InvoiceStatus::PartiallyPaid);
        assert_eq!(InvoiceStatus::after_payment(1000, 1000), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::after_payment(1000, 1200), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::after_payment(0, 0), InvoiceStatus::Paid);
    }

    #[test]
    fn invoice_numbers_are_padded() {
        assert_eq!(format_invoice_number(2026, 7), "INV-2026-000007");
        assert_eq!(format_invoice_number(2026, 1_234_567), "INV-2026-1234567");
    }

    #[test]
    fn currency_is_validated() {
        assert_eq!(normalise_currency(Some("GBP")).unwrap(), "gbp");
        assert_eq!(normalise_currency(Some(" ")).unwrap(), "usd");
        assert!(normalise_currency(Some("dollars")).is_err());
        assert!(normalise_currency(Some("u$d")).is_err());
    }
}
