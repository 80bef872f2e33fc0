//! Mapping from domain errors to HTTP responses.

use api_shared::AuthError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clinic_core::ClinicError;
use serde::Serialize;
use utoipa::ToSchema;

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Clinic(#[from] ClinicError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken(_) | AuthError::UnknownKey(_) => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::MissingPermission(_) => StatusCode::FORBIDDEN,
                AuthError::Jwks(_) | AuthError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Clinic(err) => match err {
                ClinicError::InvalidInput(_) | ClinicError::Text(_) | ClinicError::Provider(_) => {
                    StatusCode::BAD_REQUEST
                }
                ClinicError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                ClinicError::Forbidden(_) => StatusCode::FORBIDDEN,
                ClinicError::NotFound { .. } => StatusCode::NOT_FOUND,
                ClinicError::Conflict(_)
                | ClinicError::StaleWrite { .. }
                | ClinicError::InvalidTransition(_) => StatusCode::CONFLICT,
                ClinicError::Database(_)
                | ClinicError::Migration(_)
                | ClinicError::Serialization(_)
                | ClinicError::CorruptRow { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!("request failed: {self}");
            "Internal error".to_string()
        } else {
            tracing::debug!(status = status.as_u16(), "request rejected: {self}");
            self.to_string()
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
