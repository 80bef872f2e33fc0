use crate::auth::AuthUser;
use crate::error::{ApiResult, ErrorBody};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use clinic_core::models::{Invoice, InvoiceStatus, NewInvoice, NewPayment};
use clinic_core::InvoiceFilter;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct InvoiceQuery {
    pub patient_id: Option<String>,
    pub status: Option<InvoiceStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<InvoiceQuery> for InvoiceFilter {
    fn from(q: InvoiceQuery) -> Self {
        InvoiceFilter {
            patient_id: q.patient_id,
            status: q.status,
            limit: q.limit,
            offset: q.offset,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/invoices",
    params(InvoiceQuery),
    responses(
        (status = 200, description = "Matching invoices, newest first", body = [Invoice]),
        (status = 400, description = "Bad request", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_invoices(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Json<Vec<Invoice>>> {
    Ok(Json(state.services.invoices.list(query.into()).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/invoices",
    request_body = NewInvoice,
    responses(
        (status = 201, description = "Invoice created", body = Invoice),
        (status = 400, description = "Bad request", body = ErrorBody),
        (status = 404, description = "Patient not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn create_invoice(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Json(req): Json<NewInvoice>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let invoice = state.services.invoices.create(req).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

#[utoipa::path(
    get,
    path = "/api/v1/invoices/{id}",
    params(("id" = Uuid, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "Invoice with items and payments", body = Invoice),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn get_invoice(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(state.services.invoices.get(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/invoices/{id}/finalize",
    params(("id" = Uuid, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "Invoice opened", body = Invoice),
        (status = 409, description = "Invoice is not a draft", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn finalize_invoice(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(state.services.invoices.finalize(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/invoices/{id}/void",
    params(("id" = Uuid, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "Invoice voided", body = Invoice),
        (status = 409, description = "Invoice has payments", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn void_invoice(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(state.services.invoices.void(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/invoices/{id}/payments",
    params(("id" = Uuid, Path, description = "Invoice id")),
    request_body = NewPayment,
    responses(
        (status = 200, description = "Payment recorded", body = Invoice),
        (status = 400, description = "Bad request", body = ErrorBody),
        (status = 409, description = "Invoice does not accept payments", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn record_payment(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<NewPayment>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(state.services.invoices.record_payment(id, req).await?))
}
