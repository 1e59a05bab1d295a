// Configuration loading and the discovery documents derived from it
mod common;

use common::{build_config, spawn_app, spawn_app_with};
use keyward::config::{AppConfig, TokenStrategy};
use keyward::oauth2::scope::ScopeStrategy;
use serde_json::{Value, json};

fn parse(yaml: &str) -> AppConfig {
    config::Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()
        .expect("build config")
        .try_deserialize()
        .expect("deserialize config")
}

#[test]
fn test_defaults() {
    let config = build_config("");

    assert_eq!(config.serve.public_bind, "0.0.0.0:4444");
    assert_eq!(config.serve.admin_bind, "0.0.0.0:4445");
    assert!(config.admin.api_key.is_none());
    assert_eq!(config.oauth2.access_token_strategy, TokenStrategy::Opaque);
    assert_eq!(config.oauth2.scope_strategy, ScopeStrategy::Wildcard);
    assert!(!config.oauth2.enforce_pkce_for_public_clients);
    assert!(!config.oauth2.dynamic_registration.enabled);
    assert_eq!(
        config.oauth2.dynamic_registration.default_scope,
        vec!["openid".to_string(), "offline_access".to_string()]
    );
    assert_eq!(config.oauth2.ttl.device_code, 600);
    assert_eq!(config.oauth2.device.poll_interval, 5);
    assert_eq!(config.oauth2.device.user_code_length, 8);
    assert_eq!(config.oauth2.jwt_bearer.max_assertion_lifetime, 86_400);
}

#[test]
fn test_ui_urls_override_fallbacks() {
    let config = build_config(
        r#"
oauth2:
  urls:
    login: "https://login.example.com/login"
    consent: "https://login.example.com/consent"
"#,
    );

    assert_eq!(config.oauth2.login_url(), "https://login.example.com/login");
    assert_eq!(config.oauth2.consent_url(), "https://login.example.com/consent");
    assert_eq!(
        config.oauth2.logout_url(),
        "https://auth.example.com/oauth2/fallbacks/logout"
    );
    assert_eq!(
        config.oauth2.error_url(),
        "https://auth.example.com/oauth2/fallbacks/error"
    );
}

#[test]
fn test_validation_errors() {
    let cases = [
        (
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "not a url"
"#,
            "oauth2.issuer_url",
        ),
        (
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "https://auth.example.com?tenant=1"
"#,
            "query or fragment",
        ),
        (
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "https://auth.example.com"
  device:
    user_code_length: 4
"#,
            "user_code_length",
        ),
        (
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "https://auth.example.com"
  subject_identifier_salt: "salt"
"#,
            "subject_identifier_salt",
        ),
        (
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "https://auth.example.com"
  jwt_bearer:
    max_assertion_lifetime: 0
"#,
            "max_assertion_lifetime",
        ),
    ];

    for (yaml, expected) in cases {
        let err = parse(yaml).validate().expect_err(expected);
        assert!(err.to_string().contains(expected), "{err}");
    }
}

#[test]
fn test_unknown_strategy_is_a_parse_error() {
    let result = config::Config::builder()
        .add_source(config::File::from_str(
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "https://auth.example.com"
  access_token_strategy: paseto
"#,
            config::FileFormat::Yaml,
        ))
        .build()
        .expect("build config")
        .try_deserialize::<AppConfig>();

    assert!(result.is_err());
}

#[tokio::test]
async fn test_discovery_document() {
    let app = spawn_app().await;

    let response = app.public.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();
    let document: Value = response.json();

    assert_eq!(document["issuer"], "https://auth.example.com");
    assert_eq!(document["authorization_endpoint"], "https://auth.example.com/oauth2/auth");
    assert_eq!(document["token_endpoint"], "https://auth.example.com/oauth2/token");
    assert_eq!(document["jwks_uri"], "https://auth.example.com/.well-known/jwks.json");
    assert_eq!(
        document["device_authorization_endpoint"],
        "https://auth.example.com/oauth2/device/auth"
    );
    assert!(document.get("registration_endpoint").is_none());
    assert_eq!(document["id_token_signing_alg_values_supported"], json!(["EdDSA"]));
    assert_eq!(document["subject_types_supported"], json!(["public", "pairwise"]));
    let grants = document["grant_types_supported"].as_array().unwrap();
    assert_eq!(grants.len(), 5);
    assert!(grants.contains(&json!("urn:ietf:params:oauth:grant-type:jwt-bearer")));
}

#[tokio::test]
async fn test_discovery_lists_registration_when_enabled() {
    let app = spawn_app_with(
        r#"
oauth2:
  dynamic_registration:
    enabled: true
"#,
    )
    .await;

    let document: Value = app.public.get("/.well-known/openid-configuration").await.json();

    assert_eq!(
        document["registration_endpoint"],
        "https://auth.example.com/oauth2/register"
    );
}

#[tokio::test]
async fn test_jwks_publishes_every_key_set() {
    let app = spawn_app().await;

    let jwks: Value = app.public.get("/.well-known/jwks.json").await.json();
    let keys = jwks["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 2);
    for key in keys {
        assert_eq!(key["kty"], "OKP");
        assert_eq!(key["crv"], "Ed25519");
        assert_eq!(key["alg"], "EdDSA");
        assert_eq!(key["use"], "sig");
        assert!(key.get("d").is_none());
    }

    let id_token_keys: Value = app.admin.get("/keys/openid.id-token").await.json();
    assert_eq!(id_token_keys["keys"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_exact_scope_strategy_disables_wildcards() {
    let client = json!({
        "client_id": "service",
        "scope": "orders.*",
        "grant_types": ["client_credentials"],
    });
    let request = [("grant_type", "client_credentials"), ("scope", "orders.read")];

    let app = spawn_app().await;
    let secret = app.create_client(client.clone()).await["client_secret"]
        .as_str()
        .unwrap()
        .to_string();
    app.token("service", &secret, &request).await.assert_status_ok();

    let app = spawn_app_with(
        r#"
oauth2:
  scope_strategy: exact
"#,
    )
    .await;
    let secret = app.create_client(client).await["client_secret"]
        .as_str()
        .unwrap()
        .to_string();
    let response = app.token("service", &secret, &request).await;
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");
}

#[tokio::test]
async fn test_health_on_both_listeners() {
    let app = spawn_app().await;

    for server in [&app.public, &app.admin] {
        let response = server.get("/healthz").await;
        response.assert_status_ok();
    }
}
