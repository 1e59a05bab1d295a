// Shared harness for the HTTP tests: both listeners on one in-memory database.
#![allow(dead_code)]

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use keyward::AppState;
use keyward::api::{admin_router, public_router};
use keyward::config::AppConfig;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::{Value, json};
use url::Url;

pub const ISSUER: &str = "https://auth.example.com";
pub const CALLBACK: &str = "https://app.example.com/callback";

const BASE_CONFIG: &str = r#"
database_url: "sqlite::memory:"
janitor:
  interval_secs: 0
oauth2:
  issuer_url: "https://auth.example.com"
  subject_identifier_salt: "pairwise-test-salt"
"#;

pub struct TestApp {
    pub public: TestServer,
    pub admin: TestServer,
    pub state: AppState,
}

/// Result of a completed authorization code flow.
pub struct Authorized {
    pub code: String,
    /// `name=value` of the login session cookie, when the login was remembered
    pub cookie: Option<String>,
    pub callback: Url,
}

pub fn build_config(overlay: &str) -> AppConfig {
    let mut builder = config::Config::builder().add_source(config::File::from_str(
        BASE_CONFIG,
        config::FileFormat::Yaml,
    ));
    if !overlay.trim().is_empty() {
        builder = builder.add_source(config::File::from_str(overlay, config::FileFormat::Yaml));
    }
    let config: AppConfig = builder
        .build()
        .expect("build config")
        .try_deserialize()
        .expect("deserialize config");
    config.validate().expect("valid config");
    config
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with("").await
}

pub async fn spawn_app_with(overlay: &str) -> TestApp {
    let config = Arc::new(build_config(overlay));
    let db = Database::connect(&config.database_url)
        .await
        .expect("connect");
    Migrator::up(&db, None).await.expect("migrate");

    let state = AppState::new(Arc::new(db), config).expect("state");
    let public = TestServer::new(public_router(state.clone())).expect("public server");
    let admin = TestServer::new(admin_router(state.clone())).expect("admin server");
    TestApp {
        public,
        admin,
        state,
    }
}

/// `client_secret_basic` header, with both halves form-encoded first.
pub fn basic(client_id: &str, secret: &str) -> HeaderValue {
    let encoded = STANDARD.encode(format!(
        "{}:{}",
        urlencoding::encode(client_id),
        urlencoding::encode(secret)
    ));
    HeaderValue::from_str(&format!("Basic {encoded}")).expect("header value")
}

pub fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).expect("header value")
}

pub fn location(response: &TestResponse) -> Url {
    let value = response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .expect("ascii location");
    Url::parse(value).expect("absolute location")
}

pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// `name=value` of the login session cookie set by `response`.
pub fn session_cookie(response: &TestResponse) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with("keyward_authentication_session=") && !pair.ends_with('='))
        .map(str::to_string)
}

impl TestApp {
    pub async fn create_client(&self, body: Value) -> Value {
        let response = self.admin.post("/clients").json(&body).await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()
    }

    /// Confidential client allowed to use the authorization code and refresh grants.
    pub async fn web_client(&self, client_id: &str) -> String {
        let client = self
            .create_client(json!({
                "client_id": client_id,
                "client_name": "Web App",
                "scope": "openid offline_access profile",
                "grant_types": ["authorization_code", "refresh_token"],
                "redirect_uris": [CALLBACK],
            }))
            .await;
        client["client_secret"]
            .as_str()
            .expect("generated secret")
            .to_string()
    }

    /// GETs an absolute URL of the issuer on the public listener.
    pub async fn follow(&self, url: &Url, cookie: Option<&str>) -> TestResponse {
        assert_eq!(url.origin().ascii_serialization(), ISSUER, "not an issuer URL: {url}");
        let mut request = self.public.get(url.path());
        for (key, value) in url.query_pairs() {
            request = request.add_query_param(&key, value.into_owned());
        }
        if let Some(cookie) = cookie {
            request = request.add_header(header::COOKIE, HeaderValue::from_str(cookie).expect("cookie"));
        }
        request.await
    }

    pub async fn authorize(&self, params: &[(&str, &str)], cookie: Option<&str>) -> TestResponse {
        let mut request = self.public.get("/oauth2/auth");
        for (key, value) in params {
            request = request.add_query_param(key, value);
        }
        if let Some(cookie) = cookie {
            request = request.add_header(header::COOKIE, HeaderValue::from_str(cookie).expect("cookie"));
        }
        request.await
    }

    pub async fn accept_login(&self, challenge: &str, subject: &str, remember: bool) -> Url {
        let response = self
            .admin
            .put("/oauth2/auth/requests/login/accept")
            .add_query_param("login_challenge", challenge)
            .json(&json!({ "subject": subject, "remember": remember, "remember_for": 3600 }))
            .await;
        response.assert_status_ok();
        redirect_to(&response)
    }

    pub async fn accept_consent(&self, challenge: &str, body: Value) -> Url {
        let response = self
            .admin
            .put("/oauth2/auth/requests/consent/accept")
            .add_query_param("consent_challenge", challenge)
            .json(&body)
            .await;
        response.assert_status_ok();
        redirect_to(&response)
    }

    /// Runs login and consent for `subject`, granting every requested scope.
    pub async fn authorize_code(&self, client_id: &str, scope: &str, subject: &str) -> Authorized {
        self.authorize_code_with(
            &[
                ("response_type", "code"),
                ("client_id", client_id),
                ("redirect_uri", CALLBACK),
                ("scope", scope),
                ("state", "af0ifjsldkj"),
                ("nonce", "n-0S6_WzA2Mj"),
            ],
            subject,
        )
        .await
    }

    pub async fn authorize_code_with(&self, params: &[(&str, &str)], subject: &str) -> Authorized {
        let response = self.authorize(params, None).await;
        response.assert_status_see_other();
        let login = location(&response);
        let login_challenge = query_param(&login, "login_challenge").expect("login challenge");

        let verifier_url = self.accept_login(&login_challenge, subject, true).await;
        let response = self.follow(&verifier_url, None).await;
        response.assert_status_see_other();
        let cookie = session_cookie(&response);
        let consent = location(&response);

        let callback = match query_param(&consent, "consent_challenge") {
            Some(challenge) => {
                let granted: Vec<String> = params
                    .iter()
                    .find(|(k, _)| *k == "scope")
                    .map(|(_, v)| v.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default();
                let verifier_url = self
                    .accept_consent(&challenge, json!({ "grant_scope": granted }))
                    .await;
                let response = self.follow(&verifier_url, cookie.as_deref()).await;
                response.assert_status_see_other();
                location(&response)
            }
            None => consent,
        };
        let code = query_param(&callback, "code").expect("authorization code");
        Authorized {
            code,
            cookie,
            callback,
        }
    }

    pub async fn token(&self, client_id: &str, secret: &str, form: &[(&str, &str)]) -> TestResponse {
        self.public
            .post("/oauth2/token")
            .add_header(header::AUTHORIZATION, basic(client_id, secret))
            .form(&form)
            .await
    }

    pub async fn exchange_code(&self, client_id: &str, secret: &str, code: &str) -> TestResponse {
        self.token(
            client_id,
            secret,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", CALLBACK),
            ],
        )
        .await
    }

    pub async fn introspect(&self, token: &str) -> Value {
        let response = self
            .admin
            .post("/oauth2/introspect")
            .form(&[("token", token)])
            .await;
        response.assert_status_ok();
        response.json::<Value>()
    }
}

pub fn redirect_to(response: &TestResponse) -> Url {
    let body: Value = response.json();
    Url::parse(body["redirect_to"].as_str().expect("redirect_to")).expect("absolute redirect_to")
}
