//! Stripe webhook event wire models.
//!
//! Only the fields the reconciler reads are modelled. Every field is optional or defaulted so
//! that Stripe API version drift degrades into missing data rather than parse failures; the
//! raw `data.object` is kept alongside for storage.

use crate::{ProviderError, ProviderResult};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Envelope of every Stripe webhook delivery.
#[derive(Clone, Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: EventData,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// Event types the reconciler acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StripeEventKind {
    CheckoutSessionCompleted,
    InvoicePaid,
    InvoicePaymentFailed,
    ChargeSucceeded,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    Other(String),
}

impl StripeEventKind {
    pub fn from_wire(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "invoice.paid" | "invoice.payment_succeeded" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "charge.succeeded" => Self::ChargeSucceeded,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Typed view of `data.object` for the handled event kinds.
#[derive(Clone, Debug)]
pub enum StripeObject {
    CheckoutSession(CheckoutSession),
    Invoice(Invoice),
    Charge(Charge),
    Subscription(Subscription),
    Unhandled,
}

impl StripeEvent {
    /// Parse a raw webhook body.
    pub fn parse(body: &[u8]) -> ProviderResult<Self> {
        let event: StripeEvent = serde_json::from_slice(body)?;
        if event.id.trim().is_empty() {
            return Err(ProviderError::MissingField("id"));
        }
        Ok(event)
    }

    pub fn kind(&self) -> StripeEventKind {
        StripeEventKind::from_wire(&self.event_type)
    }

    /// Decode `data.object` according to the event kind.
    pub fn object(&self) -> ProviderResult<StripeObject> {
        let object = self.data.object.clone();
        Ok(match self.kind() {
            StripeEventKind::CheckoutSessionCompleted => {
                StripeObject::CheckoutSession(serde_json::from_value(object)?)
            }
            StripeEventKind::InvoicePaid | StripeEventKind::InvoicePaymentFailed => {
                StripeObject::Invoice(serde_json::from_value(object)?)
            }
            StripeEventKind::ChargeSucceeded => StripeObject::Charge(serde_json::from_value(object)?),
            StripeEventKind::SubscriptionCreated
            | StripeEventKind::SubscriptionUpdated
            | StripeEventKind::SubscriptionDeleted => {
                StripeObject::Subscription(serde_json::from_value(object)?)
            }
            StripeEventKind::Other(_) => StripeObject::Unhandled,
        })
    }
}

/// Stripe "expandable" references arrive either as an id string or as the expanded object.
fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        Some(Value::Object(map)) => map
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub payment_intent: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub invoice: Option<String>,
}

impl CheckoutSession {
    /// Email supplied at checkout, preferring the collected customer details.
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
            .filter(|e| !e.trim().is_empty())
    }

    pub fn is_paid(&self) -> bool {
        matches!(self.payment_status.as_deref(), Some("paid" | "no_payment_required"))
    }

    pub fn is_subscription(&self) -> bool {
        self.mode.as_deref() == Some("subscription")
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct InvoiceLine {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InvoiceLines {
    #[serde(default)]
    pub data: Vec<InvoiceLine>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub payment_intent: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub charge: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    #[serde(default)]
    pub lines: InvoiceLines,
}

impl Invoice {
    /// Identifier of the payment that settled this invoice, if any.
    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_intent.as_deref().or(self.charge.as_deref())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub invoice: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub billing_details: Option<BillingDetails>,
    #[serde(default)]
    pub paid: bool,
}

impl Charge {
    pub fn email(&self) -> Option<&str> {
        self.billing_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .filter(|e| !e.trim().is_empty())
    }

    /// Payment reference shared with the invoice that this charge settled.
    pub fn payment_reference(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_deref(), Some("active" | "trialing"))
    }

    pub fn has_ended(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some("canceled" | "unpaid" | "incomplete_expired")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_123",
            "type": event_type,
            "created": 1_700_000_000,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn parses_checkout_session_with_expanded_customer() {
        let body = event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": { "id": "cus_9", "object": "customer" },
                "customer_details": { "email": "Pat@Example.com", "name": "Pat Doe" },
                "client_reference_id": "P0007",
                "mode": "subscription",
                "payment_status": "paid",
                "amount_total": 29900,
                "currency": "usd",
                "subscription": "sub_1"
            }),
        );

        let event = StripeEvent::parse(&body).expect("should parse");
        assert_eq!(event.kind(), StripeEventKind::CheckoutSessionCompleted);
        let StripeObject::CheckoutSession(session) = event.object().unwrap() else {
            panic!("expected checkout session");
        };
        assert_eq!(session.customer.as_deref(), Some("cus_9"));
        assert_eq!(session.email(), Some("Pat@Example.com"));
        assert!(session.is_paid());
        assert!(session.is_subscription());
        assert_eq!(session.amount_total, Some(29900));
    }

    #[test]
    fn parses_invoice_lines() {
        let body = event(
            "invoice.paid",
            json!({
                "id": "in_1",
                "customer": "cus_1",
                "amount_paid": 5000,
                "payment_intent": "pi_1",
                "lines": { "data": [
                    { "description": "Semaglutide monthly", "amount": 4000, "quantity": 1 },
                    { "description": "Consult", "amount": 1000 }
                ]}
            }),
        );

        let event = StripeEvent::parse(&body).unwrap();
        let StripeObject::Invoice(invoice) = event.object().unwrap() else {
            panic!("expected invoice");
        };
        assert_eq!(invoice.lines.data.len(), 2);
        assert_eq!(invoice.payment_reference(), Some("pi_1"));
        assert_eq!(invoice.lines.data[1].quantity, None);
    }

    #[test]
    fn unknown_event_types_are_unhandled() {
        let body = event("customer.created", json!({ "id": "cus_1" }));
        let event = StripeEvent::parse(&body).unwrap();
        assert_eq!(event.kind(), StripeEventKind::Other("customer.created".into()));
        assert!(matches!(event.object().unwrap(), StripeObject::Unhandled));
    }

    #[test]
    fn subscription_status_helpers() {
        let sub: Subscription =
            serde_json::from_value(json!({ "id": "sub_1", "status": "trialing" })).unwrap();
        assert!(sub.is_active());
        let sub: Subscription =
            serde_json::from_value(json!({ "id": "sub_1", "status": "canceled" })).unwrap();
        assert!(sub.has_ended());
        assert!(!sub.is_active());
    }

    #[test]
    fn rejects_event_without_id() {
        let body = br#"{"id":"","type":"charge.succeeded","data":{"object":{}}}"#;
        assert!(matches!(
            StripeEvent::parse(body),
            Err(ProviderError::MissingField("id"))
        ));
    }
}
