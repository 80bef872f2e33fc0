//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::constants::{
    DEFAULT_BMI_QUALIFY_THRESHOLD, DEFAULT_MAX_CONNECTIONS, DEFAULT_STRIPE_TOLERANCE_SECS,
};
use crate::{ClinicError, ClinicResult};
use std::str::FromStr;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_url: String,
    max_connections: u32,
    stripe_webhook_secret: Option<String>,
    stripe_tolerance_secs: i64,
    heyflow_webhook_token: Option<String>,
    bmi_qualify_threshold: f64,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with defaults for everything but the database URL.
    pub fn new(database_url: impl Into<String>) -> ClinicResult<Self> {
        let database_url = database_url.into();
        if database_url.trim().is_empty() {
            return Err(ClinicError::InvalidInput(
                "database_url cannot be empty".into(),
            ));
        }

        Ok(Self {
            database_url,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            stripe_webhook_secret: None,
            stripe_tolerance_secs: DEFAULT_STRIPE_TOLERANCE_SECS,
            heyflow_webhook_token: None,
            bmi_qualify_threshold: DEFAULT_BMI_QUALIFY_THRESHOLD,
        })
    }

    /// Resolve configuration from the process environment.
    ///
    /// Call this once from a binary's `main`; services receive the resulting value.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `DATABASE_URL` is missing or a numeric variable does not parse.
    pub fn from_env() -> ClinicResult<Self> {
        let var = |name: &str| std::env::var(name).ok();

        let database_url = var("DATABASE_URL")
            .ok_or_else(|| ClinicError::InvalidInput("DATABASE_URL is not set".into()))?;

        let mut cfg = Self::new(database_url)?;
        cfg.max_connections = parse_env_value(
            "DATABASE_MAX_CONNECTIONS",
            var("DATABASE_MAX_CONNECTIONS"),
            DEFAULT_MAX_CONNECTIONS,
        )?;
        cfg.stripe_tolerance_secs = parse_env_value(
            "STRIPE_WEBHOOK_TOLERANCE_SECS",
            var("STRIPE_WEBHOOK_TOLERANCE_SECS"),
            DEFAULT_STRIPE_TOLERANCE_SECS,
        )?;
        cfg.bmi_qualify_threshold = parse_env_value(
            "BMI_QUALIFY_THRESHOLD",
            var("BMI_QUALIFY_THRESHOLD"),
            DEFAULT_BMI_QUALIFY_THRESHOLD,
        )?;
        cfg.stripe_webhook_secret = non_blank(var("STRIPE_WEBHOOK_SECRET"));
        cfg.heyflow_webhook_token = non_blank(var("HEYFLOW_WEBHOOK_TOKEN"));

        if cfg.stripe_webhook_secret.is_none() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET is not set; Stripe webhooks will be rejected");
        }

        Ok(cfg)
    }

    pub fn with_stripe_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.stripe_webhook_secret = Some(secret.into());
        self
    }

    pub fn with_heyflow_webhook_token(mut self, token: impl Into<String>) -> Self {
        self.heyflow_webhook_token = Some(token.into());
        self
    }

    pub fn with_bmi_qualify_threshold(mut self, threshold: f64) -> Self {
        self.bmi_qualify_threshold = threshold;
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn stripe_webhook_secret(&self) -> Option<&str> {
        self.stripe_webhook_secret.as_deref()
    }

    pub fn stripe_tolerance_secs(&self) -> i64 {
        self.stripe_tolerance_secs
    }

    pub fn heyflow_webhook_token(&self) -> Option<&str> {
        self.heyflow_webhook_token.as_deref()
    }

    pub fn bmi_qualify_threshold(&self) -> f64 {
        self.bmi_qualify_threshold
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional environment value, falling back to `default` when unset or blank.
pub fn parse_env_value<T>(name: &str, value: Option<String>, default: T) -> ClinicResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_blank(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ClinicError::InvalidInput(format!("{name}={raw:?}: {e}"))),
    }
}
