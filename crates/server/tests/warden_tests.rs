// Warden: policy and role administration, access decisions
mod common;

use axum::http::StatusCode;
use common::{TestApp, spawn_app};
use serde_json::{Value, json};

async fn create_policy(app: &TestApp, policy: Value) -> Value {
    let response = app.admin.post("/policies").json(&policy).await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

async fn allowed(app: &TestApp, request: Value) -> bool {
    let response = app.admin.post("/warden/allowed").json(&request).await;
    response.assert_status_ok();
    response.json::<Value>()["allowed"].as_bool().unwrap()
}

fn article_policy(id: &str, subjects: &[&str], effect: &str) -> Value {
    json!({
        "id": id,
        "description": "Article access",
        "subjects": subjects,
        "actions": ["<get|update>"],
        "resources": ["articles:<[0-9]+>"],
        "effect": effect,
    })
}

#[tokio::test]
async fn test_default_deny_and_allow() {
    let app = spawn_app().await;
    let request = json!({ "subject": "alice", "action": "get", "resource": "articles:42" });

    assert!(!allowed(&app, request.clone()).await);

    create_policy(&app, article_policy("editors", &["alice", "bob"], "allow")).await;
    assert!(allowed(&app, request).await);

    // Patterns are anchored.
    assert!(
        !allowed(
            &app,
            json!({ "subject": "alice", "action": "get", "resource": "articles:42:comments" })
        )
        .await
    );
    assert!(
        !allowed(
            &app,
            json!({ "subject": "alice", "action": "delete", "resource": "articles:42" })
        )
        .await
    );
}

#[tokio::test]
async fn test_deny_overrides_allow() {
    let app = spawn_app().await;
    create_policy(&app, article_policy("everyone", &["<.*>"], "allow")).await;
    create_policy(&app, article_policy("banned", &["mallory"], "deny")).await;

    assert!(allowed(&app, json!({ "subject": "alice", "action": "update", "resource": "articles:1" })).await);
    assert!(!allowed(&app, json!({ "subject": "mallory", "action": "update", "resource": "articles:1" })).await);
}

#[tokio::test]
async fn test_roles_extend_subjects() {
    let app = spawn_app().await;
    create_policy(&app, article_policy("admins-edit", &["role:admins"], "allow")).await;
    let request = json!({ "subject": "carol", "action": "get", "resource": "articles:7" });

    let response = app
        .admin
        .post("/roles")
        .json(&json!({ "id": "role:admins", "members": ["dave"] }))
        .await;
    response.assert_status(StatusCode::CREATED);
    app.admin
        .post("/roles")
        .json(&json!({ "id": "role:admins" }))
        .await
        .assert_status(StatusCode::CONFLICT);
    assert!(!allowed(&app, request.clone()).await);

    let response = app
        .admin
        .post("/roles/role:admins/members")
        .json(&json!({ "members": ["carol", "dave"] }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["members"], json!(["dave", "carol"]));
    assert!(allowed(&app, request.clone()).await);

    let roles: Vec<Value> = app
        .admin
        .get("/roles")
        .add_query_param("member", "carol")
        .await
        .json();
    assert_eq!(roles.len(), 1);

    app.admin
        .delete("/roles/role:admins/members/carol")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.admin
        .delete("/roles/role:admins/members/carol")
        .await
        .assert_status_not_found();
    assert!(!allowed(&app, request).await);

    app.admin
        .delete("/roles/role:admins")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.admin.get("/roles/role:admins").await.assert_status_not_found();
}

#[tokio::test]
async fn test_policy_crud() {
    let app = spawn_app().await;

    let created = create_policy(
        &app,
        json!({
            "subjects": ["alice"],
            "actions": ["get"],
            "resources": ["reports"],
            "effect": "allow",
        }),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    create_policy(&app, article_policy("fixed-id", &["bob"], "allow")).await;
    app.admin
        .post("/policies")
        .json(&article_policy("fixed-id", &["bob"], "allow"))
        .await
        .assert_status(StatusCode::CONFLICT);

    let listed: Vec<Value> = app.admin.get("/policies").await.json();
    assert_eq!(listed.len(), 2);

    let path = format!("/policies/{id}");
    let fetched: Value = app.admin.get(&path).await.json();
    assert_eq!(fetched["resources"], json!(["reports"]));

    app.admin
        .put(&path)
        .json(&article_policy("another-id", &["alice"], "allow"))
        .await
        .assert_status_bad_request();

    let response = app
        .admin
        .put(&path)
        .json(&json!({
            "subjects": ["alice"],
            "actions": ["get"],
            "resources": ["reports"],
            "effect": "deny",
        }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["effect"], "deny");
    assert!(!allowed(&app, json!({ "subject": "alice", "action": "get", "resource": "reports" })).await);

    app.admin
        .delete(&path)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.admin.get(&path).await.assert_status_not_found();
    app.admin.delete(&path).await.assert_status_not_found();
    app.admin
        .put("/policies/missing")
        .json(&article_policy("missing", &["alice"], "allow"))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_malformed_policies_rejected() {
    let app = spawn_app().await;

    for invalid in [
        json!({ "subjects": ["<[a-z"], "actions": ["get"], "resources": ["r"], "effect": "allow" }),
        json!({ "subjects": ["<(>"], "actions": ["get"], "resources": ["r"], "effect": "allow" }),
        json!({
            "subjects": ["alice"],
            "actions": ["get"],
            "resources": ["r"],
            "effect": "allow",
            "conditions": { "ip": { "type": "CIDRCondition", "options": { "cidr": "10.0.0.0/33" } } },
        }),
        json!({
            "subjects": ["alice"],
            "actions": ["get"],
            "resources": ["r"],
            "effect": "allow",
            "conditions": { "x": { "type": "NoSuchCondition" } },
        }),
    ] {
        app.admin
            .post("/policies")
            .json(&invalid)
            .await
            .assert_status_bad_request();
    }

    app.admin
        .post("/policies")
        .json(&json!({ "subjects": ["alice"], "actions": ["get"], "resources": ["r"], "effect": "maybe" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_conditions_gate_policies() {
    let app = spawn_app().await;
    create_policy(
        &app,
        json!({
            "id": "owner-from-office",
            "subjects": ["<.*>"],
            "actions": ["update"],
            "resources": ["profiles:<.+>"],
            "effect": "allow",
            "conditions": {
                "owner": { "type": "EqualsSubjectCondition" },
                "remoteIPAddress": { "type": "CIDRCondition", "options": { "cidr": "10.0.0.0/8" } },
                "plan": { "type": "StringMatchCondition", "options": { "matches": "^(pro|team)$" } },
            },
        }),
    )
    .await;

    let request = |subject: &str, owner: &str, ip: &str, plan: &str| {
        json!({
            "subject": subject,
            "action": "update",
            "resource": "profiles:alice",
            "context": { "owner": owner, "remoteIPAddress": ip, "plan": plan },
        })
    };

    assert!(allowed(&app, request("alice", "alice", "10.1.2.3", "pro")).await);
    assert!(!allowed(&app, request("bob", "alice", "10.1.2.3", "pro")).await);
    assert!(!allowed(&app, request("alice", "alice", "192.168.1.1", "pro")).await);
    assert!(!allowed(&app, request("alice", "alice", "10.1.2.3", "free")).await);
    assert!(
        !allowed(
            &app,
            json!({ "subject": "alice", "action": "update", "resource": "profiles:alice" })
        )
        .await
    );
}

#[tokio::test]
async fn test_token_allowed_uses_token_subject() {
    let app = spawn_app().await;
    let client = app
        .create_client(json!({
            "client_id": "service",
            "scope": "articles.read",
            "grant_types": ["client_credentials"],
        }))
        .await;
    let tokens: Value = app
        .token(
            "service",
            client["client_secret"].as_str().unwrap(),
            &[("grant_type", "client_credentials"), ("scope", "articles.read")],
        )
        .await
        .json();
    let token = tokens["access_token"].as_str().unwrap();
    create_policy(&app, article_policy("service-read", &["service"], "allow")).await;

    let response = app
        .admin
        .post("/warden/token/allowed")
        .json(&json!({
            "token": token,
            "scopes": ["articles.read"],
            "action": "get",
            "resource": "articles:3",
        }))
        .await;
    response.assert_status_ok();
    let decision: Value = response.json();
    assert_eq!(decision["allowed"], true);
    assert_eq!(decision["subject"], "service");
    assert_eq!(decision["client_id"], "service");
    assert_eq!(decision["scope"], "articles.read");

    let decision: Value = app
        .admin
        .post("/warden/token/allowed")
        .json(&json!({
            "token": token,
            "scopes": ["articles.write"],
            "action": "get",
            "resource": "articles:3",
        }))
        .await
        .json();
    assert_eq!(decision, json!({ "allowed": false }));

    let decision: Value = app
        .admin
        .post("/warden/token/allowed")
        .json(&json!({ "token": "unknown", "action": "get", "resource": "articles:3" }))
        .await
        .json();
    assert_eq!(decision["allowed"], false);
}
