//! Wire support for the third parties that push data into the clinic backend.
//!
//! This crate provides **wire models** and **parsing helpers** only:
//! - HeyFlow intake form submissions (several ad-hoc payload shapes)
//! - Stripe webhook events and the object views the reconciler needs
//! - Stripe webhook signature verification
//!
//! There is no I/O here. Persistence and reconciliation belong in `clinic-core`.

pub mod heyflow;
pub mod signature;
pub mod stripe;

pub use heyflow::{delivery_key, IntakeAddress, IntakeSubmission};
pub use signature::{signature_header, verify_signature};
pub use stripe::{StripeEvent, StripeEventKind, StripeObject};

/// Errors returned by the `providers` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed signature header: {0}")]
    MalformedSignature(&'static str),

    #[error("signature timestamp outside tolerance ({age_secs}s)")]
    SignatureExpired { age_secs: i64 },

    #[error("no matching signature found")]
    SignatureMismatch,
}

/// Type alias for Results that can fail with a [`ProviderError`].
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Hex SHA-256 digest of a raw payload.
///
/// Used as a stable delivery key for providers that do not send their own event id.
pub fn payload_digest(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(body))
}
