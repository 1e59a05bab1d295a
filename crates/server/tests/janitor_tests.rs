// Janitor passes over expired grant state
mod common;

use common::{spawn_app, spawn_app_with};
use keyward::entity::jwt_bearer_jti;
use keyward::janitor;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, PaginatorTrait};
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};

#[tokio::test]
async fn test_janitor_removes_expired_jti_only() {
    let app = spawn_app().await;
    let db = app.state.db();
    let now = OffsetDateTime::now_utc();
    for (signature, expires_at) in [
        ("expired", now - Duration::minutes(5)),
        ("current", now + Duration::minutes(5)),
    ] {
        jwt_bearer_jti::ActiveModel {
            signature: Set(signature.to_string()),
            expires_at: Set(expires_at),
        }
        .insert(db)
        .await
        .expect("insert jti");
    }

    let purged = janitor::run_once(db).await.expect("janitor pass");

    assert_eq!(purged.jti, 1);
    let remaining = jwt_bearer_jti::Entity::find().all(db).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].signature, "current");
}

#[tokio::test]
async fn test_janitor_noop_on_fresh_state() {
    let app = spawn_app().await;
    app.web_client("web").await;
    app.authorize_code("web", "openid", "alice").await;

    let purged = janitor::run_once(app.state.db()).await.expect("janitor pass");

    assert_eq!(purged.total(), 0);
}

#[tokio::test]
async fn test_janitor_removes_expired_tokens_and_requests() {
    let app = spawn_app_with(
        r#"
oauth2:
  ttl:
    access_token: 1
    login_consent_request: 1
"#,
    )
    .await;
    let client = app
        .create_client(json!({ "client_id": "service", "grant_types": ["client_credentials"] }))
        .await;
    let tokens: Value = app
        .token(
            "service",
            client["client_secret"].as_str().unwrap(),
            &[("grant_type", "client_credentials")],
        )
        .await
        .json();
    app.web_client("web").await;
    app.authorize(
        &[
            ("response_type", "code"),
            ("client_id", "web"),
            ("redirect_uri", common::CALLBACK),
            ("scope", "openid"),
        ],
        None,
    )
    .await
    .assert_status_see_other();

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
    assert_eq!(app.introspect(tokens["access_token"].as_str().unwrap()).await["active"], false);

    let purged = janitor::run_once(app.state.db()).await.expect("janitor pass");

    assert_eq!(purged.tokens, 1);
    assert_eq!(purged.flows, 1);
    assert_eq!(
        keyward::entity::oauth2_token::Entity::find()
            .count(app.state.db())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_janitor_keeps_used_consent_flows() {
    let app = spawn_app_with(
        r#"
oauth2:
  ttl:
    login_consent_request: 1
"#,
    )
    .await;
    let secret = app.web_client("web").await;
    let authorized = app.authorize_code("web", "openid offline_access", "alice").await;
    let tokens: Value = app.exchange_code("web", &secret, &authorized.code).await.json();

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
    let purged = janitor::run_once(app.state.db()).await.expect("janitor pass");
    assert_eq!(purged.flows, 0);

    app.admin
        .delete("/oauth2/auth/sessions/consent")
        .add_query_param("subject", "alice")
        .add_query_param("client", "web")
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);
    assert_eq!(app.introspect(tokens["refresh_token"].as_str().unwrap()).await["active"], false);
    assert_eq!(
        keyward::entity::oauth2_flow::Entity::find()
            .count(app.state.db())
            .await
            .unwrap(),
        0
    );
}
