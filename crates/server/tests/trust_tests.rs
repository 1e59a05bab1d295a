// Trusted JWT-bearer issuers and the jwt-bearer grant
mod common;

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{TestApp, spawn_app};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use time::OffsetDateTime;

const JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const PARTNER: &str = "https://partner.example.com";
const TOKEN_ENDPOINT: &str = "https://auth.example.com/oauth2/token";
const KID: &str = "partner-key-1";

struct PartnerKey {
    encoding: EncodingKey,
    jwk: Value,
}

fn partner_key(seed: u8) -> PartnerKey {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let der = key.to_pkcs8_der().expect("pkcs8");
    PartnerKey {
        encoding: EncodingKey::from_ed_der(der.as_bytes()),
        jwk: json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes()),
            "kid": KID,
            "alg": "EdDSA",
            "use": "sig",
        }),
    }
}

fn sign(key: &PartnerKey, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(KID.to_string());
    jsonwebtoken::encode(&header, claims, &key.encoding).expect("sign assertion")
}

fn claims(subject: Option<&str>, jti: &str) -> Value {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let mut claims = json!({
        "iss": PARTNER,
        "aud": TOKEN_ENDPOINT,
        "iat": now,
        "exp": now + 300,
        "jti": jti,
    });
    if let Some(subject) = subject {
        claims["sub"] = json!(subject);
    }
    claims
}

async fn trust(app: &TestApp, body: Value) -> Value {
    let response = app
        .admin
        .post("/trust/grants/jwt-bearer/issuers")
        .json(&body)
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

async fn bearer_client(app: &TestApp) -> String {
    let client = app
        .create_client(json!({
            "client_id": "importer",
            "scope": "orders.read orders.write",
            "grant_types": [JWT_BEARER],
        }))
        .await;
    client["client_secret"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_trust_relationship_validation() {
    let app = spawn_app().await;
    let key = partner_key(1);

    let created = trust(
        &app,
        json!({
            "issuer": PARTNER,
            "subject": "alice@partner",
            "scope": ["orders.read"],
            "jwk": key.jwk,
            "expires_at": "2099-01-01T00:00:00Z",
        }),
    )
    .await;
    assert_eq!(created["key_id"], KID);
    assert_eq!(created["allow_any_subject"], false);
    assert_eq!(created["scope"], json!(["orders.read"]));

    let duplicate = app
        .admin
        .post("/trust/grants/jwt-bearer/issuers")
        .json(&json!({
            "issuer": PARTNER,
            "subject": "alice@partner",
            "jwk": key.jwk,
            "expires_at": "2099-01-01T00:00:00Z",
        }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);

    for invalid in [
        json!({ "issuer": PARTNER, "jwk": key.jwk, "expires_at": "2099-01-01T00:00:00Z" }),
        json!({
            "issuer": PARTNER,
            "subject": "bob",
            "allow_any_subject": true,
            "jwk": key.jwk,
            "expires_at": "2099-01-01T00:00:00Z",
        }),
        json!({ "issuer": PARTNER, "subject": "bob", "jwk": key.jwk }),
        json!({
            "issuer": PARTNER,
            "subject": "bob",
            "jwk": { "kty": "oct", "k": "c2VjcmV0" },
            "expires_at": "2099-01-01T00:00:00Z",
        }),
    ] {
        app.admin
            .post("/trust/grants/jwt-bearer/issuers")
            .json(&invalid)
            .await
            .assert_status_bad_request();
    }

    let id = created["id"].as_str().unwrap();
    let listed: Vec<Value> = app
        .admin
        .get("/trust/grants/jwt-bearer/issuers")
        .add_query_param("issuer", PARTNER)
        .await
        .json();
    assert_eq!(listed.len(), 1);

    let path = format!("/trust/grants/jwt-bearer/issuers/{id}");
    app.admin.get(&path).await.assert_status_ok();
    app.admin
        .delete(&path)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.admin.get(&path).await.assert_status_not_found();
}

#[tokio::test]
async fn test_assertion_grants_intersected_scope() {
    let app = spawn_app().await;
    let key = partner_key(2);
    trust(
        &app,
        json!({
            "issuer": PARTNER,
            "subject": "alice@partner",
            "scope": ["orders.read"],
            "jwk": key.jwk,
            "expires_at": "2099-01-01T00:00:00Z",
        }),
    )
    .await;
    let secret = bearer_client(&app).await;

    let assertion = sign(&key, &claims(Some("alice@partner"), "jti-1"));
    let response = app
        .token(
            "importer",
            &secret,
            &[
                ("grant_type", JWT_BEARER),
                ("assertion", &assertion),
                ("scope", "orders.read orders.write"),
            ],
        )
        .await;
    response.assert_status_ok();
    let tokens: Value = response.json();
    assert_eq!(tokens["scope"], "orders.read");
    assert!(tokens.get("refresh_token").is_none());
    assert!(tokens.get("id_token").is_none());

    let introspection = app.introspect(tokens["access_token"].as_str().unwrap()).await;
    assert_eq!(introspection["sub"], "alice@partner");
    assert_eq!(introspection["client_id"], "importer");

    // The same assertion cannot be presented twice.
    let response = app
        .token(
            "importer",
            &secret,
            &[("grant_type", JWT_BEARER), ("assertion", &assertion)],
        )
        .await;
    response.assert_status_bad_request();
    let error: Value = response.json();
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_hint"], "The jti was already used.");
}

#[tokio::test]
async fn test_any_subject_grant_accepts_missing_subject() {
    let app = spawn_app().await;
    let key = partner_key(3);
    trust(
        &app,
        json!({
            "issuer": PARTNER,
            "allow_any_subject": true,
            "scope": ["orders.read"],
            "jwk": key.jwk,
            "expires_at": "2099-01-01T00:00:00Z",
        }),
    )
    .await;
    let secret = bearer_client(&app).await;

    let tokens: Value = app
        .token(
            "importer",
            &secret,
            &[
                ("grant_type", JWT_BEARER),
                ("assertion", &sign(&key, &claims(Some("anyone"), "jti-a"))),
                ("scope", "orders.read"),
            ],
        )
        .await
        .json();
    assert_eq!(app.introspect(tokens["access_token"].as_str().unwrap()).await["sub"], "anyone");

    let tokens: Value = app
        .token(
            "importer",
            &secret,
            &[
                ("grant_type", JWT_BEARER),
                ("assertion", &sign(&key, &claims(None, "jti-b"))),
            ],
        )
        .await
        .json();
    let introspection = app.introspect(tokens["access_token"].as_str().unwrap()).await;
    assert_eq!(introspection["sub"], PARTNER);
    assert_eq!(introspection["scope"], "");
}

#[tokio::test]
async fn test_invalid_assertions_rejected() {
    let app = spawn_app().await;
    let key = partner_key(4);
    trust(
        &app,
        json!({
            "issuer": PARTNER,
            "subject": "alice@partner",
            "scope": ["orders.read"],
            "jwk": key.jwk,
            "expires_at": "2099-01-01T00:00:00Z",
        }),
    )
    .await;
    let secret = bearer_client(&app).await;
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let mut wrong_audience = claims(Some("alice@partner"), "jti-aud");
    wrong_audience["aud"] = json!("https://someone-else.example.com/token");

    let mut too_long = claims(Some("alice@partner"), "jti-long");
    too_long["exp"] = json!(now + 2 * 86_400);

    let mut future = claims(Some("alice@partner"), "jti-future");
    future["iat"] = json!(now + 600);
    future["exp"] = json!(now + 900);

    let mut no_jti = claims(Some("alice@partner"), "unused");
    no_jti.as_object_mut().unwrap().remove("jti");

    let unknown_subject = claims(Some("mallory"), "jti-mallory");

    let mut cases: Vec<(&str, String)> = [
        ("wrong audience", &wrong_audience),
        ("lifetime", &too_long),
        ("issued in the future", &future),
        ("missing jti", &no_jti),
        ("unknown subject", &unknown_subject),
    ]
    .into_iter()
    .map(|(name, claims)| (name, sign(&key, claims)))
    .collect();
    cases.push((
        "foreign key",
        sign(&partner_key(5), &claims(Some("alice@partner"), "jti-forged")),
    ));

    for (name, assertion) in cases {
        let response = app
            .token(
                "importer",
                &secret,
                &[("grant_type", JWT_BEARER), ("assertion", &assertion)],
            )
            .await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>()["error"], "invalid_grant", "case: {name}");
    }

    let mut expired = claims(Some("alice@partner"), "jti-expired");
    expired["iat"] = json!(now - 600);
    expired["exp"] = json!(now - 300);

    let mut not_yet_valid = claims(Some("alice@partner"), "jti-nbf");
    not_yet_valid["nbf"] = json!(now + 120);

    let mut no_iat = claims(Some("alice@partner"), "jti-no-iat");
    no_iat.as_object_mut().unwrap().remove("iat");

    for (name, claims, hint) in [
        ("expired", &expired, "ExpiredSignature"),
        ("not yet valid", &not_yet_valid, "ImmatureSignature"),
        ("missing iat", &no_iat, "MUST contain an 'iat'"),
    ] {
        let response = app
            .token(
                "importer",
                &secret,
                &[("grant_type", JWT_BEARER), ("assertion", &sign(&key, claims))],
            )
            .await;
        response.assert_status_bad_request();
        let error: Value = response.json();
        assert_eq!(error["error"], "invalid_grant", "case: {name}");
        let actual = error["error_hint"].as_str().unwrap_or_default();
        assert!(actual.contains(hint), "case: {name}: {actual}");
    }
}

#[tokio::test]
async fn test_expired_trust_relationship_rejected() {
    let app = spawn_app().await;
    let key = partner_key(6);
    trust(
        &app,
        json!({
            "issuer": PARTNER,
            "subject": "alice@partner",
            "jwk": key.jwk,
            "expires_at": "2000-01-01T00:00:00Z",
        }),
    )
    .await;
    let secret = bearer_client(&app).await;

    let response = app
        .token(
            "importer",
            &secret,
            &[
                ("grant_type", JWT_BEARER),
                ("assertion", &sign(&key, &claims(Some("alice@partner"), "jti-old"))),
            ],
        )
        .await;

    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}
