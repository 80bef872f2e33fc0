//! Auth0 access token verification.
//!
//! Production tokens are RS256 JWTs signed by the Auth0 tenant. Signing keys are fetched once
//! from `https://<domain>/.well-known/jwks.json` at startup. For local development and tests a
//! shared-secret HS256 mode (`AUTH_DEV_SECRET`) is available.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token signed with unknown key {0:?}")]
    UnknownKey(Option<String>),

    #[error("missing permission: {0}")]
    MissingPermission(String),

    #[error("failed to fetch signing keys: {0}")]
    Jwks(#[from] reqwest::Error),

    #[error("auth configuration error: {0}")]
    Config(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// How tokens are verified, resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthConfig {
    /// RS256 tokens from an Auth0 tenant.
    Auth0 { domain: String, audience: String },
    /// HS256 tokens signed with a shared secret. Never use in production.
    SharedSecret { secret: String, audience: String },
}

impl AuthConfig {
    /// Resolve from `AUTH0_DOMAIN`/`AUTH0_AUDIENCE`, falling back to `AUTH_DEV_SECRET`.
    pub fn from_env() -> AuthResult<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let audience = var("AUTH0_AUDIENCE")
            .ok_or_else(|| AuthError::Config("AUTH0_AUDIENCE is not set".into()))?;

        if let Some(domain) = var("AUTH0_DOMAIN") {
            return Ok(Self::Auth0 { domain, audience });
        }
        if let Some(secret) = var("AUTH_DEV_SECRET") {
            tracing::warn!("AUTH0_DOMAIN is not set; accepting HS256 tokens signed with AUTH_DEV_SECRET");
            return Ok(Self::SharedSecret { secret, audience });
        }
        Err(AuthError::Config(
            "set AUTH0_DOMAIN, or AUTH_DEV_SECRET for local development".into(),
        ))
    }
}

/// Claims read from an Auth0 access token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub exp: u64,
    /// RBAC permissions, present when "Add Permissions in the Access Token" is enabled.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Space-separated OAuth scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

impl Claims {
    /// Permissions from both the `permissions` claim and `scope`.
    pub fn all_permissions(&self) -> Vec<String> {
        let mut all = self.permissions.clone();
        for scope in self.scope.as_deref().unwrap_or_default().split_whitespace() {
            if !all.iter().any(|p| p == scope) {
                all.push(scope.to_string());
            }
        }
        all
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
            || self
                .scope
                .as_deref()
                .is_some_and(|s| s.split_whitespace().any(|p| p == permission))
    }
}

enum Keys {
    Rsa(HashMap<String, DecodingKey>),
    Secret(DecodingKey),
}

struct Inner {
    keys: Keys,
    issuer: Option<String>,
    audience: String,
}

/// Verifies bearer tokens. Cheap to clone.
#[derive(Clone)]
pub struct AuthVerifier {
    inner: Arc<Inner>,
}

impl AuthVerifier {
    /// Build a verifier, fetching the tenant's JWKS when configured for Auth0.
    pub async fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        match config {
            AuthConfig::Auth0 { domain, audience } => Self::from_jwks(domain, audience).await,
            AuthConfig::SharedSecret { secret, audience } => {
                Ok(Self::shared_secret(secret, audience))
            }
        }
    }

    pub async fn from_jwks(domain: &str, audience: &str) -> AuthResult<Self> {
        let domain = domain
            .trim_start_matches("https://")
            .trim_end_matches('/');
        let url = format!("https://{domain}/.well-known/jwks.json");
        let jwks: JwkSet = reqwest::get(&url).await?.error_for_status()?.json().await?;
        Self::from_jwk_set(&jwks, &format!("https://{domain}/"), audience)
    }

    /// Build an RS256 verifier from an already fetched key set.
    pub fn from_jwk_set(jwks: &JwkSet, issuer: &str, audience: &str) -> AuthResult<Self> {
        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => tracing::warn!(%kid, "skipping unusable JWK: {err}"),
            }
        }
        if keys.is_empty() {
            return Err(AuthError::Config("JWKS contains no usable signing keys".into()));
        }
        tracing::info!(keys = keys.len(), "loaded Auth0 signing keys");

        Ok(Self {
            inner: Arc::new(Inner {
                keys: Keys::Rsa(keys),
                issuer: Some(issuer.to_string()),
                audience: audience.to_string(),
            }),
        })
    }

    pub fn shared_secret(secret: &str, audience: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys: Keys::Secret(DecodingKey::from_secret(secret.as_bytes())),
                issuer: None,
                audience: audience.to_string(),
            }),
        }
    }

    /// Verify a token's signature, expiry, audience and (for Auth0) issuer.
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let (key, algorithm) = match &self.inner.keys {
            Keys::Secret(key) => (key, Algorithm::HS256),
            Keys::Rsa(keys) => {
                let header = decode_header(token)?;
                let key = header
                    .kid
                    .as_ref()
                    .and_then(|kid| keys.get(kid))
                    .ok_or(AuthError::UnknownKey(header.kid))?;
                (key, Algorithm::RS256)
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.inner.audience]);
        if let Some(issuer) = &self.inner.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(decode::<Claims>(token, key, &validation)?.claims)
    }

    /// Verify the value of an `Authorization` header (`Bearer <token>`).
    pub fn verify_bearer(&self, header: Option<&str>) -> AuthResult<Claims> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}
