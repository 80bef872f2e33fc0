use crate::AppState;
use api_shared::{HealthRes, HealthService};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are up", body = HealthRes),
        (status = 503, description = "Database unavailable", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Pings the database so load balancers stop routing to an instance that has lost it.
#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthRes>) {
    let database_ok = match state.services.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("health check database ping failed: {err}");
            false
        }
    };
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthService::with_database(database_ok)))
}
