use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::oauth2::scope::ScopeStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    pub oauth2: OAuth2Config,
    #[serde(default)]
    pub janitor: JanitorConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_public_bind")]
    pub public_bind: String,
    #[serde(default = "default_admin_bind")]
    pub admin_bind: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            public_bind: default_public_bind(),
            admin_bind: default_admin_bind(),
        }
    }
}

/// Protection of the admin listener.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AdminConfig {
    /// When set, every admin request must carry `Authorization: Bearer <api_key>`.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Access token representation.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenStrategy {
    #[default]
    Opaque,
    Jwt,
}

impl TokenStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStrategy::Opaque => "opaque",
            TokenStrategy::Jwt => "jwt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "opaque" => Some(TokenStrategy::Opaque),
            "jwt" => Some(TokenStrategy::Jwt),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// Public issuer URL, also the base of every URL the server hands out.
    pub issuer_url: String,
    #[serde(default)]
    pub urls: UrlsConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub access_token_strategy: TokenStrategy,
    #[serde(default)]
    pub scope_strategy: ScopeStrategy,
    #[serde(default)]
    pub enforce_pkce_for_public_clients: bool,
    /// Salt for pairwise subject identifiers. Required once a pairwise client exists.
    #[serde(default)]
    pub subject_identifier_salt: String,
    #[serde(default)]
    pub jwt_bearer: JwtBearerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub dynamic_registration: DynamicRegistrationConfig,
    #[serde(default = "default_backchannel_logout_timeout")]
    pub backchannel_logout_timeout: u64,
}

impl OAuth2Config {
    pub fn issuer(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }

    /// Absolute URL of a public endpoint.
    pub fn public_url(&self, path: &str) -> String {
        format!("{}{}", self.issuer(), path)
    }

    pub fn token_endpoint(&self) -> String {
        self.public_url("/oauth2/token")
    }

    pub fn login_url(&self) -> String {
        self.urls
            .login
            .clone()
            .unwrap_or_else(|| self.public_url("/oauth2/fallbacks/login"))
    }

    pub fn consent_url(&self) -> String {
        self.urls
            .consent
            .clone()
            .unwrap_or_else(|| self.public_url("/oauth2/fallbacks/consent"))
    }

    pub fn logout_url(&self) -> String {
        self.urls
            .logout
            .clone()
            .unwrap_or_else(|| self.public_url("/oauth2/fallbacks/logout"))
    }

    pub fn error_url(&self) -> String {
        self.urls
            .error
            .clone()
            .unwrap_or_else(|| self.public_url("/oauth2/fallbacks/error"))
    }

    pub fn post_logout_redirect_url(&self) -> String {
        self.urls
            .post_logout_redirect
            .clone()
            .unwrap_or_else(|| self.public_url("/oauth2/fallbacks/logout/callback"))
    }

    pub fn device_done_url(&self) -> String {
        self.urls
            .device_done
            .clone()
            .unwrap_or_else(|| self.public_url("/oauth2/fallbacks/device/done"))
    }
}

/// Locations of the external login, consent and logout UIs. Unset entries fall
/// back to the built-in pages below `/oauth2/fallbacks`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UrlsConfig {
    pub login: Option<String>,
    pub consent: Option<String>,
    pub logout: Option<String>,
    pub error: Option<String>,
    pub post_logout_redirect: Option<String>,
    pub device_done: Option<String>,
}

/// Lifetimes in seconds.
#[derive(Clone, Debug, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_access_token_ttl")]
    pub access_token: i64,
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token: i64,
    #[serde(default = "default_id_token_ttl")]
    pub id_token: i64,
    #[serde(default = "default_authorization_code_ttl")]
    pub authorization_code: i64,
    #[serde(default = "default_login_consent_request_ttl")]
    pub login_consent_request: i64,
    #[serde(default = "default_device_code_ttl")]
    pub device_code: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            access_token: default_access_token_ttl(),
            refresh_token: default_refresh_token_ttl(),
            id_token: default_id_token_ttl(),
            authorization_code: default_authorization_code_ttl(),
            login_consent_request: default_login_consent_request_ttl(),
            device_code: default_device_code_ttl(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct JwtBearerConfig {
    /// Maximum accepted `exp - iat` of an assertion, in seconds.
    #[serde(default = "default_max_assertion_lifetime")]
    pub max_assertion_lifetime: i64,
}

impl Default for JwtBearerConfig {
    fn default() -> Self {
        Self {
            max_assertion_lifetime: default_max_assertion_lifetime(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: i64,
    #[serde(default = "default_user_code_length")]
    pub user_code_length: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            user_code_length: default_user_code_length(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DynamicRegistrationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Scope assigned to dynamically registered clients that request none.
    #[serde(default = "default_registration_scope")]
    pub default_scope: Vec<String>,
}

impl Default for DynamicRegistrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_scope: default_registration_scope(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct JanitorConfig {
    /// Seconds between cleanup runs, 0 disables the janitor.
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_janitor_interval(),
        }
    }
}

fn default_public_bind() -> String {
    "0.0.0.0:4444".into()
}

fn default_admin_bind() -> String {
    "0.0.0.0:4445".into()
}

fn default_access_token_ttl() -> i64 {
    3600
}

fn default_refresh_token_ttl() -> i64 {
    720 * 3600
}

fn default_id_token_ttl() -> i64 {
    3600
}

fn default_authorization_code_ttl() -> i64 {
    600
}

fn default_login_consent_request_ttl() -> i64 {
    1800
}

fn default_device_code_ttl() -> i64 {
    600
}

fn default_max_assertion_lifetime() -> i64 {
    24 * 3600
}

fn default_poll_interval() -> i64 {
    5
}

fn default_user_code_length() -> usize {
    8
}

fn default_registration_scope() -> Vec<String> {
    vec!["openid".into(), "offline_access".into()]
}

fn default_backchannel_logout_timeout() -> u64 {
    5
}

fn default_janitor_interval() -> u64 {
    300
}

impl AppConfig {
    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = Url::parse(&self.oauth2.issuer_url).map_err(|e| {
            ConfigError::Validation(format!("oauth2.issuer_url is not a valid URL: {e}"))
        })?;
        if issuer.fragment().is_some() || issuer.query().is_some() {
            return Err(ConfigError::Validation(
                "oauth2.issuer_url must not contain a query or fragment".into(),
            ));
        }

        let ttl = &self.oauth2.ttl;
        for (name, value) in [
            ("access_token", ttl.access_token),
            ("refresh_token", ttl.refresh_token),
            ("id_token", ttl.id_token),
            ("authorization_code", ttl.authorization_code),
            ("login_consent_request", ttl.login_consent_request),
            ("device_code", ttl.device_code),
        ] {
            if value <= 0 {
                return Err(ConfigError::Validation(format!(
                    "oauth2.ttl.{name} must be > 0"
                )));
            }
        }

        if self.oauth2.jwt_bearer.max_assertion_lifetime <= 0 {
            return Err(ConfigError::Validation(
                "oauth2.jwt_bearer.max_assertion_lifetime must be > 0".into(),
            ));
        }
        if self.oauth2.device.poll_interval <= 0 {
            return Err(ConfigError::Validation(
                "oauth2.device.poll_interval must be > 0".into(),
            ));
        }
        if !(6..=16).contains(&self.oauth2.device.user_code_length) {
            return Err(ConfigError::Validation(
                "oauth2.device.user_code_length must be between 6 and 16".into(),
            ));
        }
        if !self.oauth2.subject_identifier_salt.is_empty()
            && self.oauth2.subject_identifier_salt.len() < 8
        {
            return Err(ConfigError::Validation(
                "oauth2.subject_identifier_salt must be at least 8 characters".into(),
            ));
        }
        if let Some(key) = &self.admin.api_key
            && key.len() < 16
        {
            return Err(ConfigError::Validation(
                "admin.api_key must be at least 16 characters".into(),
            ));
        }

        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `OAUTH2__ISSUER_URL`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;

    Ok(app)
}

/// Convenience helper for binaries wanting the panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn fallback_urls_derive_from_issuer() {
        let cfg = parse(
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "https://auth.example.com/"
"#,
        );
        assert_eq!(
            cfg.oauth2.login_url(),
            "https://auth.example.com/oauth2/fallbacks/login"
        );
        assert_eq!(
            cfg.oauth2.token_endpoint(),
            "https://auth.example.com/oauth2/token"
        );
        assert_eq!(cfg.serve.admin_bind, "0.0.0.0:4445");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_ttl() {
        let cfg = parse(
            r#"
database_url: "sqlite::memory:"
oauth2:
  issuer_url: "https://auth.example.com"
  ttl:
    access_token: 0
"#,
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("oauth2.ttl.access_token"));
    }

    #[test]
    fn rejects_short_admin_key() {
        let cfg = parse(
            r#"
database_url: "sqlite::memory:"
admin:
  api_key: "short"
oauth2:
  issuer_url: "https://auth.example.com"
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn token_strategy_parses_known_values() {
        assert_eq!(TokenStrategy::parse("jwt"), Some(TokenStrategy::Jwt));
        assert_eq!(TokenStrategy::parse("opaque"), Some(TokenStrategy::Opaque));
        assert_eq!(TokenStrategy::parse("JWT"), None);
    }
}
