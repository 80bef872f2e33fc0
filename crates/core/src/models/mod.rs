//! Domain models.
//!
//! Plain data plus the pure rules that govern it (status transitions, invoice totals, SOAP
//! note workflow). Nothing here touches storage.

pub mod hashtag;
pub mod invoice;
pub mod patient;
pub mod soap_note;
pub mod status;
pub mod webhook_event;

pub use hashtag::MembershipHashtag;
pub use invoice::{
    Invoice, InvoiceDraft, InvoiceItem, InvoicePayment, InvoiceStatus, NewInvoice,
    NewInvoiceItem, NewPayment, PaymentMethod,
};
pub use patient::{Address, NewPatient, Patient, PatientFilter, PatientUpdate};
pub use soap_note::{NewSoapNote, SoapNote, SoapNoteStatus, SoapNoteUpdate};
pub use status::{PatientStatus, StatusEvent, TransitionError};
pub use webhook_event::{
    NewWebhookEvent, WebhookClaim, WebhookEvent, WebhookEventFilter, WebhookProvider,
};
