//! Constants used throughout the clinic core crate.

/// Prefix of generated patient identifiers (`P0001`).
pub const PATIENT_ID_PREFIX: &str = "P";

/// Minimum zero-padded width of the numeric part of a patient identifier.
pub const PATIENT_ID_MIN_DIGITS: usize = 4;

/// Prefix of generated invoice numbers (`INV-2026-000001`).
pub const INVOICE_NUMBER_PREFIX: &str = "INV";

/// Currency used when an invoice does not specify one.
pub const DEFAULT_CURRENCY: &str = "usd";

/// Hashtag carried by patients with an active paid membership.
pub const ACTIVE_MEMBER_HASHTAG: &str = "#activemember";

/// Hashtag carried by patients whose latest Stripe invoice payment failed.
pub const PAYMENT_FAILED_HASHTAG: &str = "#paymentfailed";

/// Maximum length of a hashtag, excluding the leading `#`.
pub const MAX_HASHTAG_LEN: usize = 64;

/// BMI at or above which an intake qualifies when no explicit answer is given.
pub const DEFAULT_BMI_QUALIFY_THRESHOLD: f64 = 27.0;

/// Patients younger than this are never qualified.
pub const MINIMUM_PATIENT_AGE: u32 = 18;

/// Default allowed clock skew for Stripe signature timestamps.
pub const DEFAULT_STRIPE_TOLERANCE_SECS: i64 = 300;

/// Default page size for list endpoints.
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Upper bound on page size for list endpoints.
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Default size of the Postgres connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Permission an Auth0 access token must carry to approve or reject SOAP notes.
pub const APPROVE_SOAP_NOTES_PERMISSION: &str = "approve:soap_notes";

/// How long a webhook claim is held before another delivery may take the event over.
pub const WEBHOOK_CLAIM_LEASE_SECS: i64 = 300;
