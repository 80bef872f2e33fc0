//! Bearer token extractor for admin routes.

use crate::error::ApiError;
use crate::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use clinic_core::Actor;

/// The authenticated caller. Adding this to a handler's arguments makes the route require a
/// valid Auth0 access token.
#[derive(Clone, Debug)]
pub struct AuthUser(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let claims = state.auth.verify_bearer(header)?;
        let permissions = claims.all_permissions();
        Ok(AuthUser(Actor::new(claims.sub, permissions)))
    }
}
