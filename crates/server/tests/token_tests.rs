// Token endpoint: code exchange, refresh rotation, client credentials, userinfo
mod common;

use axum::http::{HeaderValue, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{CALLBACK, ISSUER, basic, bearer, spawn_app, spawn_app_with};
use keyward::oauth2::jwt::{AccessTokenClaims, IdTokenClaims};
use keyward::oauth2::keys;
use serde_json::{Value, json};

const PKCE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const PKCE_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

#[tokio::test]
async fn test_code_exchange_issues_tokens_by_scope() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;

    // openid + offline_access: all three tokens
    let code = app.authorize_code("web", "openid offline_access", "alice").await.code;
    let response = app.exchange_code("web", &secret, &code).await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let tokens: Value = response.json();
    assert_eq!(tokens["token_type"], "bearer");
    assert_eq!(tokens["scope"], "openid offline_access");
    assert!(tokens["expires_in"].as_i64().unwrap() > 0);
    assert!(tokens["refresh_token"].is_string());
    assert!(tokens["id_token"].is_string());

    // profile only: access token alone
    let code = app.authorize_code("web", "profile", "alice").await.code;
    let tokens: Value = app.exchange_code("web", &secret, &code).await.json();
    assert!(tokens["access_token"].is_string());
    assert!(tokens.get("refresh_token").is_none());
    assert!(tokens.get("id_token").is_none());
}

#[tokio::test]
async fn test_id_token_carries_nonce_and_audience() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;
    let code = app.authorize_code("web", "openid", "alice").await.code;
    let tokens: Value = app.exchange_code("web", &secret, &code).await.json();

    let id_token = tokens["id_token"].as_str().unwrap();
    let claims: IdTokenClaims =
        keys::verify(app.state.db(), id_token, &keys::validation(ISSUER))
            .await
            .expect("valid id token");

    assert_eq!(claims.iss, ISSUER);
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.aud, vec!["web".to_string()]);
    assert_eq!(claims.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
    assert!(claims.auth_time.is_some());
    assert!(claims.sid.is_some());
    assert_eq!(
        claims.at_hash.as_deref(),
        Some(keyward::oauth2::jwt::at_hash(tokens["access_token"].as_str().unwrap()).as_str())
    );
}

#[tokio::test]
async fn test_pairwise_client_gets_hashed_subject() {
    let app = spawn_app().await;
    let client = app
        .create_client(json!({
            "client_id": "pairwise",
            "scope": "openid",
            "redirect_uris": [CALLBACK],
            "subject_type": "pairwise",
        }))
        .await;
    let secret = client["client_secret"].as_str().unwrap();
    let code = app.authorize_code("pairwise", "openid", "alice").await.code;
    let tokens: Value = app.exchange_code("pairwise", secret, &code).await.json();

    let claims: IdTokenClaims = keys::verify(
        app.state.db(),
        tokens["id_token"].as_str().unwrap(),
        &keys::validation(ISSUER),
    )
    .await
    .unwrap();
    assert_ne!(claims.sub, "alice");
    assert_eq!(claims.sub.len(), 64);

    let info: Value = app
        .public
        .get("/userinfo")
        .add_header(header::AUTHORIZATION, bearer(tokens["access_token"].as_str().unwrap()))
        .await
        .json();
    assert_eq!(info["sub"], claims.sub);
}

#[tokio::test]
async fn test_refresh_rotation_and_reuse_detection() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;
    let code = app.authorize_code("web", "openid offline_access", "alice").await.code;
    let first: Value = app.exchange_code("web", &secret, &code).await.json();
    let first_refresh = first["refresh_token"].as_str().unwrap().to_string();

    let response = app
        .token(
            "web",
            &secret,
            &[("grant_type", "refresh_token"), ("refresh_token", &first_refresh)],
        )
        .await;
    response.assert_status_ok();
    let second: Value = response.json();
    let second_refresh = second["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(second_refresh, first_refresh);
    assert!(second["id_token"].is_string());
    assert_eq!(app.introspect(first["access_token"].as_str().unwrap()).await["active"], false);
    assert_eq!(app.introspect(second["access_token"].as_str().unwrap()).await["active"], true);

    // Replaying the consumed token revokes everything issued from it.
    let response = app
        .token(
            "web",
            &secret,
            &[("grant_type", "refresh_token"), ("refresh_token", &first_refresh)],
        )
        .await;
    response.assert_status_bad_request();
    let error: Value = response.json();
    assert_eq!(error["error"], "invalid_grant");
    assert!(error["error_hint"].as_str().unwrap().starts_with("token_inactive"));

    assert_eq!(app.introspect(&second_refresh).await["active"], false);
    assert_eq!(app.introspect(second["access_token"].as_str().unwrap()).await["active"], false);
}

#[tokio::test]
async fn test_refresh_cannot_widen_scope() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;
    let code = app.authorize_code("web", "offline_access", "alice").await.code;
    let tokens: Value = app.exchange_code("web", &secret, &code).await.json();

    let response = app
        .token(
            "web",
            &secret,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
                ("scope", "offline_access profile"),
            ],
        )
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");
}

#[tokio::test]
async fn test_jwt_access_tokens_with_opaque_refresh_tokens() {
    let app = spawn_app_with(
        r#"
oauth2:
  access_token_strategy: jwt
"#,
    )
    .await;
    let secret = app.web_client("web").await;
    let code = app.authorize_code("web", "offline_access profile", "alice").await.code;
    let tokens: Value = app.exchange_code("web", &secret, &code).await.json();

    let access_token = tokens["access_token"].as_str().unwrap();
    assert_eq!(access_token.split('.').count(), 3);
    assert!(!tokens["refresh_token"].as_str().unwrap().contains('.'));

    let claims: AccessTokenClaims =
        keys::verify(app.state.db(), access_token, &keys::validation(ISSUER))
            .await
            .expect("valid access token");
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.client_id, "web");
    assert_eq!(claims.scp, vec!["offline_access".to_string(), "profile".to_string()]);

    let introspection = app.introspect(access_token).await;
    assert_eq!(introspection["active"], true);
    assert_eq!(introspection["sub"], "alice");
}

#[tokio::test]
async fn test_key_rotation_changes_signing_key() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;

    let code = app.authorize_code("web", "openid", "alice").await.code;
    let before: Value = app.exchange_code("web", &secret, &code).await.json();
    let old_kid = jsonwebtoken::decode_header(before["id_token"].as_str().unwrap())
        .unwrap()
        .kid
        .unwrap();

    let response = app.admin.post("/keys/openid.id-token/rotate").await;
    response.assert_status(StatusCode::CREATED);
    let new_key: Value = response.json();
    let new_kid = new_key["kid"].as_str().unwrap().to_string();
    assert_ne!(new_kid, old_kid);

    let code = app.authorize_code("web", "openid", "bob").await.code;
    let after: Value = app.exchange_code("web", &secret, &code).await.json();
    let kid = jsonwebtoken::decode_header(after["id_token"].as_str().unwrap())
        .unwrap()
        .kid
        .unwrap();
    assert_eq!(kid, new_kid);

    // Tokens signed before the rotation remain verifiable.
    let jwks: Value = app.public.get("/.well-known/jwks.json").await.json();
    let kids: Vec<&str> = jwks["keys"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|k| k["kid"].as_str())
        .collect();
    assert!(kids.contains(&old_kid.as_str()));
    assert!(kids.contains(&new_kid.as_str()));

    app.admin.get("/keys/unknown").await.assert_status_not_found();
    app.admin
        .post("/keys/unknown/rotate")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_client_credentials_grant() {
    let app = spawn_app().await;
    let client = app
        .create_client(json!({
            "client_id": "service",
            "scope": "orders.read orders.write offline_access openid",
            "audience": ["https://api.example.com"],
            "grant_types": ["client_credentials", "refresh_token"],
        }))
        .await;
    let secret = client["client_secret"].as_str().unwrap();

    let response = app
        .token(
            "service",
            secret,
            &[
                ("grant_type", "client_credentials"),
                ("scope", "orders.read offline_access openid"),
                ("audience", "https://api.example.com"),
            ],
        )
        .await;
    response.assert_status_ok();
    let tokens: Value = response.json();
    assert!(tokens.get("refresh_token").is_none());
    assert!(tokens.get("id_token").is_none());

    let introspection = app.introspect(tokens["access_token"].as_str().unwrap()).await;
    assert_eq!(introspection["sub"], "service");
    assert_eq!(introspection["client_id"], "service");
    assert_eq!(introspection["aud"], json!(["https://api.example.com"]));

    let response = app
        .token(
            "service",
            secret,
            &[("grant_type", "client_credentials"), ("scope", "admin")],
        )
        .await;
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");

    let response = app
        .token(
            "service",
            secret,
            &[
                ("grant_type", "client_credentials"),
                ("audience", "https://other.example.com"),
            ],
        )
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_public_client_cannot_use_client_credentials() {
    let app = spawn_app().await;
    app.create_client(json!({
        "client_id": "spa",
        "token_endpoint_auth_method": "none",
        "grant_types": ["client_credentials"],
    }))
    .await;

    let response = app
        .public
        .post("/oauth2/token")
        .form(&[("grant_type", "client_credentials"), ("client_id", "spa")])
        .await;

    assert_eq!(response.json::<Value>()["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_pkce_verifier_must_match() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;
    let params = [
        ("response_type", "code"),
        ("client_id", "web"),
        ("redirect_uri", CALLBACK),
        ("scope", "profile"),
        ("state", "pkce-state"),
        ("code_challenge", PKCE_CHALLENGE),
        ("code_challenge_method", "S256"),
    ];

    let code = app.authorize_code_with(&params, "alice").await.code;
    let response = app
        .token(
            "web",
            &secret,
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", CALLBACK),
                ("code_verifier", "not-the-verifier-that-was-hashed-for-this-code"),
            ],
        )
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");

    let code = app.authorize_code_with(&params, "alice").await.code;
    app.token(
        "web",
        &secret,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", CALLBACK),
            ("code_verifier", PKCE_VERIFIER),
        ],
    )
    .await
    .assert_status_ok();
}

#[tokio::test]
async fn test_code_reuse_revokes_issued_tokens() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;
    let code = app.authorize_code("web", "offline_access", "alice").await.code;
    let tokens: Value = app.exchange_code("web", &secret, &code).await.json();

    let response = app.exchange_code("web", &secret, &code).await;
    response.assert_status_bad_request();
    let error: Value = response.json();
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_hint"], "The authorization code has already been used.");

    assert_eq!(app.introspect(tokens["access_token"].as_str().unwrap()).await["active"], false);
    assert_eq!(app.introspect(tokens["refresh_token"].as_str().unwrap()).await["active"], false);
}

#[tokio::test]
async fn test_code_bound_to_redirect_uri_and_client() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;
    let other = app.web_client("other").await;

    let code = app.authorize_code("web", "profile", "alice").await.code;
    let response = app.exchange_code("other", &other, &code).await;
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");

    let code = app.authorize_code("web", "profile", "alice").await.code;
    let response = app
        .token(
            "web",
            &secret,
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "https://app.example.com/elsewhere"),
            ],
        )
        .await;
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_explicit_redirect_uri_required_at_exchange() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;

    let code = app.authorize_code("web", "profile", "alice").await.code;
    let response = app
        .token(
            "web",
            &secret,
            &[("grant_type", "authorization_code"), ("code", &code)],
        )
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");

    // Resolved from the single registered URI, so it may be left out again.
    let code = app
        .authorize_code_with(
            &[
                ("response_type", "code"),
                ("client_id", "web"),
                ("scope", "profile"),
                ("state", "af0ifjsldkj"),
            ],
            "alice",
        )
        .await
        .code;
    let response = app
        .token(
            "web",
            &secret,
            &[("grant_type", "authorization_code"), ("code", &code)],
        )
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["scope"], "profile");
}

#[tokio::test]
async fn test_client_authentication_failures() {
    let app = spawn_app().await;
    app.web_client("web").await;

    let response = app
        .token("web", "wrong-secret", &[("grant_type", "client_credentials")])
        .await;
    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
    assert!(response.headers().get(header::WWW_AUTHENTICATE).is_some());

    // Registered for client_secret_basic, so the secret may not travel in the body.
    let response = app
        .public
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "web"),
            ("client_secret", "whatever-secret"),
        ])
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_grant_type_checks() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;

    let response = app.token("web", &secret, &[("grant_type", "password")]).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "unsupported_grant_type");

    let response = app
        .token("web", &secret, &[("grant_type", "client_credentials")])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_malformed_form_bodies_are_oauth2_errors() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;

    let response = app.public.post("/oauth2/token").form(&[("client_id", "cc")]).await;
    response.assert_status_bad_request();
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
    assert!(body["error_description"].as_str().is_some());

    let response = app
        .public
        .post("/oauth2/revoke")
        .add_header(header::AUTHORIZATION, basic("web", &secret))
        .form(&[("token_type_hint", "access_token")])
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");

    let response = app.admin.post("/oauth2/introspect").form(&[("scope", "profile")]).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");

    let response = app
        .public
        .post("/oauth2/device/auth")
        .add_header(header::AUTHORIZATION, basic("web", &secret))
        .json(&json!({ "scope": "profile" }))
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");
}

#[tokio::test]
async fn test_basic_credentials_are_form_decoded() {
    let app = spawn_app().await;
    app.create_client(json!({
        "client_id": "cc",
        "client_secret": "s3cret+value/x",
        "grant_types": ["client_credentials"],
    }))
    .await;

    app.token("cc", "s3cret+value/x", &[("grant_type", "client_credentials")])
        .await
        .assert_status_ok();

    // Unencoded, the '+' reads as a space.
    let raw = STANDARD.encode("cc:s3cret+value/x");
    let response = app
        .public
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, format!("Basic {raw}").parse::<HeaderValue>().unwrap())
        .form(&[("grant_type", "client_credentials")])
        .await;
    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
}

#[tokio::test]
async fn test_userinfo_requires_active_token() {
    let app = spawn_app().await;
    let secret = app.web_client("web").await;
    let code = app.authorize_code("web", "openid profile", "alice").await.code;
    let tokens: Value = app.exchange_code("web", &secret, &code).await.json();
    let access_token = tokens["access_token"].as_str().unwrap();

    let response = app
        .public
        .get("/userinfo")
        .add_header(header::AUTHORIZATION, bearer(access_token))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["sub"], "alice");

    app.public.get("/userinfo").await.assert_status_unauthorized();

    app.public
        .post("/oauth2/revoke")
        .add_header(header::AUTHORIZATION, basic("web", &secret))
        .form(&[("token", access_token)])
        .await
        .assert_status_ok();

    let response = app
        .public
        .post("/userinfo")
        .add_header(header::AUTHORIZATION, bearer(access_token))
        .await;
    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_token");
}
