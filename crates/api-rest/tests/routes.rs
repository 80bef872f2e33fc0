use api_rest::{router, AppState};
use api_shared::AuthVerifier;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use clinic_core::{CoreConfig, MemoryStore, Services};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

const AUTH_SECRET: &str = "test-auth-secret";
const AUDIENCE: &str = "https://api.clinic.test";
const STRIPE_SECRET: &str = "whsec_routes";

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn app() -> Router {
    let cfg = CoreConfig::new("postgres://localhost/unused")
        .unwrap()
        .with_stripe_webhook_secret(STRIPE_SECRET);
    let services = Services::new(Arc::new(cfg), Arc::new(MemoryStore::new()));
    router(AppState::new(
        services,
        AuthVerifier::shared_secret(AUTH_SECRET, AUDIENCE),
    ))
}

fn token(permissions: &[&str]) -> String {
    encode(
        &Header::default(),
        &json!({
            "sub": "auth0|staff-1",
            "aud": AUDIENCE,
            "exp": now() + 600,
            "permissions": permissions,
        }),
        &EncodingKey::from_secret(AUTH_SECRET.as_bytes()),
    )
    .unwrap()
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_patient(app: &Router, t: &str, email: &str) -> String {
    let (status, body) = send(
        app,
        request(
            Method::POST,
            "/api/v1/patients",
            Some(t),
            Some(json!({"email": email, "first_name": "Ada", "membership_hashtags": ["ActiveMember"]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["patient_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let (status, body) = send(&app(), request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn admin_routes_require_a_valid_token() {
    let app = app();
    let (status, body) = send(&app, request(Method::GET, "/api/v1/patients", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/v1/patients", Some("not-a-jwt"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn patient_crud_and_hashtags() {
    let app = app();
    let t = token(&[]);
    let id = create_patient(&app, &t, "Ada@Example.com").await;
    assert_eq!(id, "P0001");

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/v1/patients/p0001", Some(&t), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["membership_hashtags"], json!(["#activemember"]));

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/patients",
            Some(&t),
            Some(json!({"email": "ada@example.com"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            "/api/v1/patients?hashtag=activemember",
            Some(&t),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        request(
            Method::DELETE,
            "/api/v1/patients/P0001/hashtags/activemember",
            Some(&t),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["membership_hashtags"], json!([]));

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/patients/P0001/status",
            Some(&t),
            Some(json!({"status": "client"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "client");

    let (status, _) = send(
        &app,
        request(Method::DELETE, "/api/v1/patients/P0001", Some(&t), None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/v1/patients/P0001", Some(&t), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/v1/patients/bogus", Some(&t), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invoice_lifecycle() {
    let app = app();
    let t = token(&[]);
    let patient_id = create_patient(&app, &t, "bill@example.com").await;

    let (status, invoice) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/invoices",
            Some(&t),
            Some(json!({
                "patient_id": patient_id,
                "items": [
                    {"description": "Consultation", "unit_amount_cents": 15000},
                    {"description": "Labs", "quantity": 2, "unit_amount_cents": 2500}
                ]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{invoice}");
    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["total_cents"], 20_000);
    let id = invoice["id"].as_str().unwrap().to_string();

    let payment = json!({"amount_cents": 5000, "method": "cash"});
    let (status, _) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/v1/invoices/{id}/payments"),
            Some(&t),
            Some(payment.clone()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "drafts do not take payments");

    let (status, body) = send(
        &app,
        request(Method::POST, &format!("/api/v1/invoices/{id}/finalize"), Some(&t), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "open");

    let (_, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/v1/invoices/{id}/payments"),
            Some(&t),
            Some(payment),
        ),
    )
    .await;
    assert_eq!(body["status"], "partially_paid");
    assert_eq!(body["amount_paid_cents"], 5000);

    let (status, _) = send(
        &app,
        request(Method::POST, &format!("/api/v1/invoices/{id}/void"), Some(&t), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/api/v1/invoices?patient_id={patient_id}&status=partially_paid"),
            Some(&t),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        request(
            Method::DELETE,
            &format!("/api/v1/patients/{patient_id}"),
            Some(&t),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "patients with invoices cannot be deleted");
}

#[tokio::test]
async fn soap_note_approval_requires_permission() {
    let app = app();
    let staff = token(&[]);
    let provider = token(&["approve:soap_notes"]);
    let patient_id = create_patient(&app, &staff, "soap@example.com").await;

    let (status, note) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/v1/patients/{patient_id}/soap-notes"),
            Some(&staff),
            Some(json!({"subjective": "Fatigue", "plan": "Labs", "ai_generated": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{note}");
    assert_eq!(note["status"], "draft");
    let id = note["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request(Method::POST, &format!("/api/v1/soap-notes/{id}/submit"), Some(&staff), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        request(Method::POST, &format!("/api/v1/soap-notes/{id}/approve"), Some(&staff), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/v1/soap-notes/{id}/approve"),
            Some(&provider),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["approved_by"], "auth0|staff-1");

    let (status, _) = send(
        &app,
        request(
            Method::PUT,
            &format!("/api/v1/soap-notes/{id}"),
            Some(&staff),
            Some(json!({"plan": "changed"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "approved notes are immutable");
}

#[tokio::test]
async fn heyflow_redelivery_is_a_duplicate() {
    let app = app();
    let payload = json!({
        "id": "hf_sub_9",
        "fields": {"Email": "intake@example.com", "Height": "66", "Weight": "200"}
    });
    let webhook = || {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/heyflow")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    };

    let (status, body) = send(&app, webhook()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");

    let (status, body) = send(&app, webhook()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    let t = token(&[]);
    let (_, events) = send(
        &app,
        request(Method::GET, "/api/v1/webhooks/events", Some(&t), None),
    )
    .await;
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["processed"], true);
}

#[tokio::test]
async fn stripe_webhook_checks_signature() {
    let app = app();
    let payload = json!({
        "id": "evt_routes_1",
        "type": "customer.created",
        "created": now(),
        "livemode": false,
        "data": {"object": {"id": "cus_routes"}}
    })
    .to_string();

    let stripe = |signature: String| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/stripe")
            .header("Stripe-Signature", signature)
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let forged = providers::signature_header(payload.as_bytes(), "whsec_other", now()).unwrap();
    let (status, _) = send(&app, stripe(forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let signed = providers::signature_header(payload.as_bytes(), STRIPE_SECRET, now()).unwrap();
    let (status, body) = send(&app, stripe(signed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (status, body) = send(
        &app(),
        request(Method::GET, "/api-docs/openapi.json", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/invoices"].is_object());
}
