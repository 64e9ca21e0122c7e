//! HTTP surface tests: routing, auth middleware, error mapping.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use codeops_core::config::VaultConfig;
use codeops_server::{router, AppState};

const MASTER: &str = "0123456789abcdef0123456789abcdef";
const SIGNING_KEY: &str = "a-shared-signing-key-of-32-bytes!";

fn config() -> VaultConfig {
    VaultConfig {
        master_key: MASTER.to_string(),
        token_signing_key: SIGNING_KEY.to_string(),
        auto_unseal: true,
        scheduler_enabled: false,
        ..VaultConfig::default()
    }
}

fn app() -> axum::Router {
    router(AppState::build(&config()).unwrap())
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    #[serde(rename = "teamId")]
    team_id: String,
    roles: Vec<String>,
    permissions: Vec<String>,
    exp: u64,
}

fn bearer(team_id: Uuid, roles: &[&str]) -> String {
    let claims = Claims {
        sub: Uuid::new_v4().to_string(),
        team_id: team_id.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        permissions: vec![],
        exp: (chrono::Utc::now().timestamp() + 600) as u64,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SIGNING_KEY.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn seal_status_is_open() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/v1/sys/seal-status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "UNSEALED");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/v1/secrets")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_and_read_a_secret_over_http() {
    let app = app();
    let team = Uuid::new_v4();
    let auth = bearer(team, &[]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/secrets")
                .header(header::AUTHORIZATION, &auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "path": "/db/password",
                        "name": "password",
                        "value": "hunter2"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let secret = body_json(response).await;
    let id = secret["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/secrets/{id}/value"))
                .header(header::AUTHORIZATION, &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["value"], "hunter2");
    assert_eq!(value["version"], 1);
}

#[tokio::test]
async fn unknown_ids_map_to_404_and_bad_input_to_400() {
    let app = app();
    let auth = bearer(Uuid::new_v4(), &[]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/secrets/{}", Uuid::new_v4()))
                .header(header::AUTHORIZATION, &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/secrets")
                .header(header::AUTHORIZATION, &auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "path": "missing-slash", "name": "x" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid-input");
}

#[tokio::test]
async fn seal_management_requires_the_admin_role() {
    let app = app();
    let team = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/sys/generate-shares")
                .header(header::AUTHORIZATION, bearer(team, &[]))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/sys/generate-shares")
                .header(header::AUTHORIZATION, bearer(team, &["vault-admin"]))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["shares"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn sealed_vault_returns_503_until_unsealed() {
    let mut config = config();
    config.auto_unseal = false;
    let app = router(AppState::build(&config).unwrap());
    let auth = bearer(Uuid::new_v4(), &[]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/secrets")
                .header(header::AUTHORIZATION, &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/sys/seal-status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "SEALED");
}

#[tokio::test]
async fn transit_round_trip_over_http() {
    let app = app();
    let team = Uuid::new_v4();
    let auth = bearer(team, &[]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/transit/keys")
                .header(header::AUTHORIZATION, &auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "name": "orders" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/transit/keys/orders/encrypt")
                .header(header::AUTHORIZATION, &auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "plaintext": BASE64.encode(b"card-4242") }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sealed = body_json(response).await;
    assert_eq!(sealed["key_version"], 1);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/transit/keys/orders/decrypt")
                .header(header::AUTHORIZATION, &auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "ciphertext": sealed["ciphertext"] }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let opened = body_json(response).await;
    assert_eq!(
        BASE64.decode(opened["plaintext"].as_str().unwrap()).unwrap(),
        b"card-4242"
    );
}
