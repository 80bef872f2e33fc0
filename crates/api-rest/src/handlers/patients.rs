use crate::auth::AuthUser;
use crate::error::{ApiResult, ErrorBody};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use clinic_core::models::{NewPatient, Patient, PatientFilter, PatientStatus, PatientUpdate};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Query parameters for listing patients.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PatientQuery {
    pub status: Option<PatientStatus>,
    /// Membership hashtag, with or without the leading `#`.
    pub hashtag: Option<String>,
    /// Case-insensitive match on name, email or patient id.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<PatientQuery> for PatientFilter {
    fn from(q: PatientQuery) -> Self {
        PatientFilter {
            status: q.status,
            hashtag: q.hashtag,
            search: q.search,
            limit: q.limit,
            offset: q.offset,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetStatusReq {
    pub status: PatientStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddHashtagReq {
    pub hashtag: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/patients",
    params(PatientQuery),
    responses(
        (status = 200, description = "Matching patients, newest first", body = [Patient]),
        (status = 400, description = "Bad request", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_patients(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Query(query): Query<PatientQuery>,
) -> ApiResult<Json<Vec<Patient>>> {
    let patients = state.services.patients.list(query.into()).await?;
    Ok(Json(patients))
}

#[utoipa::path(
    post,
    path = "/api/v1/patients",
    request_body = NewPatient,
    responses(
        (status = 201, description = "Patient created", body = Patient),
        (status = 400, description = "Bad request", body = ErrorBody),
        (status = 409, description = "Email or Stripe customer already on file", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn create_patient(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Json(req): Json<NewPatient>,
) -> ApiResult<(StatusCode, Json<Patient>)> {
    let patient = state.services.patients.create(req).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

#[utoipa::path(
    get,
    path = "/api/v1/patients/{patient_id}",
    params(("patient_id" = String, Path, description = "Patient id, e.g. P0001")),
    responses(
        (status = 200, description = "Patient", body = Patient),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn get_patient(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(patient_id): Path<String>,
) -> ApiResult<Json<Patient>> {
    Ok(Json(state.services.patients.get(&patient_id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/patients/{patient_id}",
    params(("patient_id" = String, Path, description = "Patient id, e.g. P0001")),
    request_body = PatientUpdate,
    responses(
        (status = 200, description = "Patient updated", body = Patient),
        (status = 400, description = "Bad request", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Email already on file", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn update_patient(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(patient_id): Path<String>,
    Json(req): Json<PatientUpdate>,
) -> ApiResult<Json<Patient>> {
    Ok(Json(state.services.patients.update(&patient_id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/patients/{patient_id}",
    params(("patient_id" = String, Path, description = "Patient id, e.g. P0001")),
    responses(
        (status = 204, description = "Patient deleted"),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Patient has invoices or SOAP notes", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn delete_patient(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(patient_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.services.patients.delete(&patient_id).await?;
    tracing::info!(%patient_id, actor = %actor.subject, "patient deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/patients/{patient_id}/status",
    params(("patient_id" = String, Path, description = "Patient id, e.g. P0001")),
    request_body = SetStatusReq,
    responses(
        (status = 200, description = "Status overridden", body = Patient),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn set_status(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(patient_id): Path<String>,
    Json(req): Json<SetStatusReq>,
) -> ApiResult<Json<Patient>> {
    let patient = state
        .services
        .patients
        .set_status(&patient_id, req.status, &actor.subject)
        .await?;
    Ok(Json(patient))
}

#[utoipa::path(
    post,
    path = "/api/v1/patients/{patient_id}/hashtags",
    params(("patient_id" = String, Path, description = "Patient id, e.g. P0001")),
    request_body = AddHashtagReq,
    responses(
        (status = 200, description = "Hashtag added", body = Patient),
        (status = 400, description = "Invalid hashtag", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn add_hashtag(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(patient_id): Path<String>,
    Json(req): Json<AddHashtagReq>,
) -> ApiResult<Json<Patient>> {
    let patient = state
        .services
        .patients
        .add_hashtag(&patient_id, &req.hashtag)
        .await?;
    Ok(Json(patient))
}

#[utoipa::path(
    delete,
    path = "/api/v1/patients/{patient_id}/hashtags/{tag}",
    params(
        ("patient_id" = String, Path, description = "Patient id, e.g. P0001"),
        ("tag" = String, Path, description = "Hashtag without the leading '#'")
    ),
    responses(
        (status = 200, description = "Hashtag removed", body = Patient),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler(state = AppState)]
pub async fn remove_hashtag(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path((patient_id, tag)): Path<(String, String)>,
) -> ApiResult<Json<Patient>> {
    let patient = state
        .services
        .patients
        .remove_hashtag(&patient_id, &tag)
        .await?;
    Ok(Json(patient))
}
