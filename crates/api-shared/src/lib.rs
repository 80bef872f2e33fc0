//! # API Shared
//!
//! Shared utilities and definitions for the clinic APIs.
//!
//! Contains:
//! - Shared services like `HealthService`
//! - Auth0 access token verification (transport-agnostic)
//!
//! Used by `api-rest` and the `clinic-run` binary.

pub mod auth;
pub mod health;

pub use auth::{AuthConfig, AuthError, AuthVerifier, Claims};
pub use health::{HealthRes, HealthService};
