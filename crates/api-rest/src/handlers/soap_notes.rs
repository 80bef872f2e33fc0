use crate::auth::AuthUser;
use crate::error::{ApiResult, ErrorBody};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use clinic_core::models::{NewSoapNote, SoapNote, SoapNoteUpdate};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectSoapNoteReq {
    pub reason: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/patients/{patient_id}/soap-notes",
    params(("patient_id" = String, Path, description = "Patient id, e.g. P0001")),
    responses(
        (status = 200, description = "The patient's notes, newest first", body = [SoapNote]),
        (status = 404, description = "Patient not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_soap_notes(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(patient_id): Path<String>,
) -> ApiResult<Json<Vec<SoapNote>>> {
    Ok(Json(
        state.services.soap_notes.list_for_patient(&patient_id).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/patients/{patient_id}/soap-notes",
    params(("patient_id" = String, Path, description = "Patient id, e.g. P0001")),
    request_body = NewSoapNote,
    responses(
        (status = 201, description = "Draft note created", body = SoapNote),
        (status = 400, description = "All sections empty", body = ErrorBody),
        (status = 404, description = "Patient not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn create_soap_note(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(patient_id): Path<String>,
    Json(req): Json<NewSoapNote>,
) -> ApiResult<(StatusCode, Json<SoapNote>)> {
    let note = state
        .services
        .soap_notes
        .create(&patient_id, &actor, req)
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

#[utoipa::path(
    get,
    path = "/api/v1/soap-notes/{id}",
    params(("id" = Uuid, Path, description = "SOAP note id")),
    responses(
        (status = 200, description = "SOAP note", body = SoapNote),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn get_soap_note(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SoapNote>> {
    Ok(Json(state.services.soap_notes.get(id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/soap-notes/{id}",
    params(("id" = Uuid, Path, description = "SOAP note id")),
    request_body = SoapNoteUpdate,
    responses(
        (status = 200, description = "SOAP note updated", body = SoapNote),
        (status = 409, description = "Note is not editable in its current status", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn update_soap_note(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SoapNoteUpdate>,
) -> ApiResult<Json<SoapNote>> {
    Ok(Json(state.services.soap_notes.update(id, req).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/soap-notes/{id}/submit",
    params(("id" = Uuid, Path, description = "SOAP note id")),
    responses(
        (status = 200, description = "Submitted for approval", body = SoapNote),
        (status = 409, description = "Note is not a draft", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn submit_soap_note(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SoapNote>> {
    Ok(Json(state.services.soap_notes.submit(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/soap-notes/{id}/approve",
    params(("id" = Uuid, Path, description = "SOAP note id")),
    responses(
        (status = 200, description = "Approved", body = SoapNote),
        (status = 403, description = "Missing approve:soap_notes permission", body = ErrorBody),
        (status = 409, description = "Note is not pending approval", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn approve_soap_note(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SoapNote>> {
    Ok(Json(state.services.soap_notes.approve(id, &actor).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/soap-notes/{id}/reject",
    params(("id" = Uuid, Path, description = "SOAP note id")),
    request_body = RejectSoapNoteReq,
    responses(
        (status = 200, description = "Rejected", body = SoapNote),
        (status = 403, description = "Missing approve:soap_notes permission", body = ErrorBody),
        (status = 409, description = "Note is not pending approval", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn reject_soap_note(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectSoapNoteReq>,
) -> ApiResult<Json<SoapNote>> {
    let note = state
        .services
        .soap_notes
        .reject(id, &actor, &req.reason)
        .await?;
    Ok(Json(note))
}
