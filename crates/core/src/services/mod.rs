//! Service layer.
//!
//! Services own the business rules and talk to storage only through [`ClinicStore`]. They are
//! cheap to clone and shared across request handlers.

pub mod intake;
pub mod invoices;
pub mod patients;
pub mod reconcile;
pub mod soap_notes;
pub mod webhooks;

pub use intake::{assess_intake, bmi, IntakeAssessment};
pub use invoices::InvoiceService;
pub use patients::PatientService;
pub use reconcile::StripeReconciler;
pub use soap_notes::SoapNoteService;
pub use webhooks::{IngestOutcome, ReprocessSummary, WebhookService};

use crate::store::ClinicStore;
use std::sync::Arc;

/// Storage handle shared by all services.
pub type SharedStore = Arc<dyn ClinicStore>;

/// The authenticated user performing an operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Actor {
    /// Stable subject identifier (Auth0 `sub`).
    pub subject: String,
    pub permissions: Vec<String>,
}

impl Actor {
    pub fn new(subject: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            permissions,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// How a processed webhook affected local state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// Nothing to do for this event; the reason is logged.
    Ignored(String),
}
