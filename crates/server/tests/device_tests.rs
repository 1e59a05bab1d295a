// Device authorization grant from code request to token polling
mod common;

use axum_test::TestResponse;
use common::{TestApp, location, query_param, spawn_app};
use serde_json::{Value, json};

const DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

async fn tv_client(app: &TestApp) {
    app.create_client(json!({
        "client_id": "tv",
        "client_name": "Living Room TV",
        "scope": "openid offline_access",
        "token_endpoint_auth_method": "none",
        "grant_types": [DEVICE_CODE, "refresh_token"],
    }))
    .await;
}

async fn start_device(app: &TestApp, scope: &str) -> Value {
    let response = app
        .public
        .post("/oauth2/device/auth")
        .form(&[("client_id", "tv"), ("scope", scope)])
        .await;
    response.assert_status_ok();
    response.json()
}

async fn poll(app: &TestApp, device_code: &str) -> TestResponse {
    app.public
        .post("/oauth2/token")
        .form(&[
            ("grant_type", DEVICE_CODE),
            ("client_id", "tv"),
            ("device_code", device_code),
        ])
        .await
}

fn error_of(response: &TestResponse) -> String {
    response.json::<Value>()["error"].as_str().unwrap_or_default().to_string()
}

/// Enters `user_code` on the verification page and logs `subject` in.
/// Returns the consent challenge.
async fn verify_and_login(app: &TestApp, user_code: &str, subject: &str) -> String {
    let response = app
        .public
        .get("/oauth2/device/verify")
        .add_query_param("user_code", user_code)
        .await;
    response.assert_status_see_other();
    let login = location(&response);
    assert_eq!(login.path(), "/oauth2/fallbacks/login");
    let challenge = query_param(&login, "login_challenge").unwrap();

    let verifier_url = app.accept_login(&challenge, subject, false).await;
    let response = app.follow(&verifier_url, None).await;
    response.assert_status_see_other();
    query_param(&location(&response), "consent_challenge").expect("consent challenge")
}

#[tokio::test]
async fn test_device_authorization_response() {
    let app = spawn_app().await;
    tv_client(&app).await;

    let device = start_device(&app, "openid").await;

    assert_eq!(device["verification_uri"], "https://auth.example.com/oauth2/device/verify");
    let user_code = device["user_code"].as_str().unwrap();
    assert_eq!(user_code.len(), 8);
    assert_eq!(
        device["verification_uri_complete"],
        format!("https://auth.example.com/oauth2/device/verify?user_code={user_code}")
    );
    assert_eq!(device["expires_in"], 600);
    assert_eq!(device["interval"], 5);
    assert!(!device["device_code"].as_str().unwrap().is_empty());

    let response = app
        .public
        .post("/oauth2/device/auth")
        .form(&[("client_id", "tv"), ("scope", "admin")])
        .await;
    assert_eq!(error_of(&response), "invalid_scope");
}

#[tokio::test]
async fn test_device_requires_grant_type() {
    let app = spawn_app().await;
    app.create_client(json!({
        "client_id": "web-only",
        "token_endpoint_auth_method": "none",
        "redirect_uris": ["https://app.example.com/callback"],
    }))
    .await;

    let response = app
        .public
        .post("/oauth2/device/auth")
        .form(&[("client_id", "web-only")])
        .await;

    response.assert_status_bad_request();
    assert_eq!(error_of(&response), "unauthorized_client");
}

#[tokio::test]
async fn test_verification_page_renders_form() {
    let app = spawn_app().await;

    let response = app.public.get("/oauth2/device/verify").await;

    response.assert_status_ok();
    assert!(response.text().contains("user_code"));
}

#[tokio::test]
async fn test_unknown_user_code_goes_to_done_page() {
    let app = spawn_app().await;

    let response = app
        .public
        .get("/oauth2/device/verify")
        .add_query_param("user_code", "NOPE-NOPE")
        .await;

    let target = location(&response);
    assert_eq!(target.path(), "/oauth2/fallbacks/device/done");
    assert_eq!(query_param(&target, "error").as_deref(), Some("invalid_request"));
}

#[tokio::test]
async fn test_device_flow_polling_and_approval() {
    let app = spawn_app().await;
    tv_client(&app).await;
    let device = start_device(&app, "openid offline_access").await;
    let device_code = device["device_code"].as_str().unwrap();

    let response = poll(&app, device_code).await;
    response.assert_status_bad_request();
    assert_eq!(error_of(&response), "authorization_pending");
    assert_eq!(error_of(&poll(&app, device_code).await), "slow_down");

    // The user types the code in lower case with a separator.
    let user_code = device["user_code"].as_str().unwrap().to_lowercase();
    let typed = format!("{}-{}", &user_code[..4], &user_code[4..]);
    let consent_challenge = verify_and_login(&app, &typed, "alice").await;

    let request: Value = app
        .admin
        .get("/oauth2/auth/requests/consent")
        .add_query_param("consent_challenge", &consent_challenge)
        .await
        .json();
    assert_eq!(request["client"]["client_id"], "tv");
    assert_eq!(request["requested_scope"], json!(["openid", "offline_access"]));

    let verifier_url = app
        .accept_consent(
            &consent_challenge,
            json!({ "grant_scope": ["openid", "offline_access"] }),
        )
        .await;
    let response = app.follow(&verifier_url, None).await;
    response.assert_status_see_other();
    let done = location(&response);
    assert_eq!(done.path(), "/oauth2/fallbacks/device/done");
    assert!(query_param(&done, "error").is_none());

    // Approved requests are answered even when polled quickly.
    let response = poll(&app, device_code).await;
    response.assert_status_ok();
    let tokens: Value = response.json();
    assert_eq!(tokens["scope"], "openid offline_access");
    assert!(tokens["refresh_token"].is_string());
    assert!(tokens["id_token"].is_string());
    assert_eq!(app.introspect(tokens["access_token"].as_str().unwrap()).await["sub"], "alice");

    assert_eq!(error_of(&poll(&app, device_code).await), "invalid_grant");

    // The user code is spent as well.
    let response = app
        .public
        .get("/oauth2/device/verify")
        .add_query_param("user_code", device["user_code"].as_str().unwrap())
        .await;
    assert_eq!(location(&response).path(), "/oauth2/fallbacks/device/done");
}

#[tokio::test]
async fn test_denied_device_request() {
    let app = spawn_app().await;
    tv_client(&app).await;
    let device = start_device(&app, "openid").await;
    let device_code = device["device_code"].as_str().unwrap();

    let consent_challenge =
        verify_and_login(&app, device["user_code"].as_str().unwrap(), "alice").await;
    let response = app
        .admin
        .put("/oauth2/auth/requests/consent/reject")
        .add_query_param("consent_challenge", &consent_challenge)
        .json(&json!({ "error": "access_denied", "error_description": "Not on this TV" }))
        .await;
    let response = app.follow(&common::redirect_to(&response), None).await;
    let done = location(&response);
    assert_eq!(done.path(), "/oauth2/fallbacks/device/done");
    assert_eq!(query_param(&done, "error").as_deref(), Some("access_denied"));

    assert_eq!(error_of(&poll(&app, device_code).await), "access_denied");
}

#[tokio::test]
async fn test_device_code_bound_to_client() {
    let app = spawn_app().await;
    tv_client(&app).await;
    app.create_client(json!({
        "client_id": "radio",
        "token_endpoint_auth_method": "none",
        "grant_types": [DEVICE_CODE],
    }))
    .await;
    let device = start_device(&app, "openid").await;

    let response = app
        .public
        .post("/oauth2/token")
        .form(&[
            ("grant_type", DEVICE_CODE),
            ("client_id", "radio"),
            ("device_code", device["device_code"].as_str().unwrap()),
        ])
        .await;

    assert_eq!(error_of(&response), "invalid_grant");
}
