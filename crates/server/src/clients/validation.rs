//! Client metadata validation and normalization.

use sea_orm::ActiveValue::Set;
use thiserror::Error;
use url::Url;

use crate::clients::ClientRequest;
use crate::config::TokenStrategy;
use crate::entity::oauth2_client;
use crate::error::ApiError;
use crate::oauth2::{client_auth, grants, scope, secrets};

pub const RESPONSE_TYPES: [&str; 3] = ["code", "id_token", "token"];
pub const SUBJECT_TYPE_PUBLIC: &str = "public";
pub const SUBJECT_TYPE_PAIRWISE: &str = "pairwise";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Redirect URI '{0}' must be an absolute URL without a fragment")]
    InvalidRedirectUri(String),
    #[error("Field '{field}' must be an absolute URL, got '{value}'")]
    InvalidUri { field: &'static str, value: String },
    #[error("Unknown grant type '{0}'")]
    UnknownGrantType(String),
    #[error("Unknown response type '{0}'")]
    UnknownResponseType(String),
    #[error("Unknown token endpoint authentication method '{0}'")]
    UnknownAuthMethod(String),
    #[error("Unknown subject type '{0}'")]
    UnknownSubjectType(String),
    #[error("Unknown access token strategy '{0}'")]
    UnknownTokenStrategy(String),
    #[error("Pairwise clients need redirect URIs that all share one host")]
    PairwiseSectorMismatch,
    #[error("Client secret must be at least {} characters long", secrets::MIN_CLIENT_SECRET_LENGTH)]
    SecretTooShort,
    #[error("Clients with token endpoint authentication method 'none' must not have a secret")]
    PublicClientSecret,
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Validated metadata, ready to be written to a client record.
#[derive(Debug, Clone)]
pub struct ClientMetadata {
    pub client_name: String,
    pub scope: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<String>,
    pub audience: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub subject_type: String,
    pub access_token_strategy: String,
    pub backchannel_logout_uri: Option<String>,
    pub backchannel_logout_session_required: bool,
    pub frontchannel_logout_uri: Option<String>,
    pub frontchannel_logout_session_required: bool,
    pub post_logout_redirect_uris: Vec<String>,
    pub skip_consent: bool,
    pub owner: String,
    pub contacts: Vec<String>,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
}

impl ClientMetadata {
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_method == client_auth::METHOD_NONE
    }

    /// Writes every metadata field onto `model`.
    pub fn apply(self, model: &mut oauth2_client::ActiveModel) {
        model.client_name = Set(self.client_name);
        model.scope = Set(self.scope);
        model.grant_types = Set(self.grant_types.join(" "));
        model.response_types = Set(self.response_types.join(" "));
        model.redirect_uris = Set(json_list(&self.redirect_uris));
        model.audience = Set(self.audience.join(" "));
        model.token_endpoint_auth_method = Set(self.token_endpoint_auth_method);
        model.subject_type = Set(self.subject_type);
        model.access_token_strategy = Set(self.access_token_strategy);
        model.backchannel_logout_uri = Set(self.backchannel_logout_uri);
        model.backchannel_logout_session_required = Set(self.backchannel_logout_session_required);
        model.frontchannel_logout_uri = Set(self.frontchannel_logout_uri);
        model.frontchannel_logout_session_required = Set(self.frontchannel_logout_session_required);
        model.post_logout_redirect_uris = Set(json_list(&self.post_logout_redirect_uris));
        model.skip_consent = Set(self.skip_consent);
        model.owner = Set(self.owner);
        model.contacts = Set(json_list(&self.contacts));
        model.client_uri = Set(self.client_uri);
        model.logo_uri = Set(self.logo_uri);
    }
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}

fn check_redirect_uri(uri: &str) -> Result<(), ValidationError> {
    match Url::parse(uri) {
        Ok(url) if url.fragment().is_none() && !url.cannot_be_a_base() => Ok(()),
        _ => Err(ValidationError::InvalidRedirectUri(uri.to_string())),
    }
}

fn check_uri(field: &'static str, value: &Option<String>) -> Result<(), ValidationError> {
    match value {
        Some(uri) if Url::parse(uri).is_err() => Err(ValidationError::InvalidUri {
            field,
            value: uri.clone(),
        }),
        _ => Ok(()),
    }
}

/// Validates `request` and fills in defaults.
pub fn validate(
    request: &ClientRequest,
    default_strategy: TokenStrategy,
) -> Result<ClientMetadata, ValidationError> {
    let grant_types = dedup(
        request
            .grant_types
            .as_deref()
            .unwrap_or(&[grants::AUTHORIZATION_CODE.to_string()]),
    );
    if let Some(unknown) = grant_types.iter().find(|g| !grants::ALL.contains(&g.as_str())) {
        return Err(ValidationError::UnknownGrantType(unknown.clone()));
    }

    let response_types = dedup(request.response_types.as_deref().unwrap_or(&["code".to_string()]));
    if let Some(unknown) = response_types
        .iter()
        .find(|r| !RESPONSE_TYPES.contains(&r.as_str()))
    {
        return Err(ValidationError::UnknownResponseType(unknown.clone()));
    }

    let token_endpoint_auth_method =
        non_empty(&request.token_endpoint_auth_method).unwrap_or_else(|| client_auth::METHOD_BASIC.to_string());
    if !client_auth::METHODS.contains(&token_endpoint_auth_method.as_str()) {
        return Err(ValidationError::UnknownAuthMethod(token_endpoint_auth_method));
    }

    let subject_type = non_empty(&request.subject_type).unwrap_or_else(|| SUBJECT_TYPE_PUBLIC.to_string());
    if subject_type != SUBJECT_TYPE_PUBLIC && subject_type != SUBJECT_TYPE_PAIRWISE {
        return Err(ValidationError::UnknownSubjectType(subject_type));
    }

    let access_token_strategy = match non_empty(&request.access_token_strategy) {
        Some(value) => TokenStrategy::parse(&value)
            .ok_or(ValidationError::UnknownTokenStrategy(value))?,
        None => default_strategy,
    };

    let redirect_uris = dedup(request.redirect_uris.as_deref().unwrap_or_default());
    for uri in &redirect_uris {
        check_redirect_uri(uri)?;
    }
    let post_logout_redirect_uris = dedup(request.post_logout_redirect_uris.as_deref().unwrap_or_default());
    for uri in &post_logout_redirect_uris {
        check_redirect_uri(uri)?;
    }

    if subject_type == SUBJECT_TYPE_PAIRWISE {
        let hosts: Vec<Option<String>> = redirect_uris
            .iter()
            .map(|uri| Url::parse(uri).ok().and_then(|u| u.host_str().map(str::to_string)))
            .collect();
        let first = hosts.first().cloned().flatten();
        if first.is_none() || hosts.iter().any(|h| *h != first) {
            return Err(ValidationError::PairwiseSectorMismatch);
        }
    }

    let backchannel_logout_uri = non_empty(&request.backchannel_logout_uri);
    check_uri("backchannel_logout_uri", &backchannel_logout_uri)?;
    let frontchannel_logout_uri = non_empty(&request.frontchannel_logout_uri);
    check_uri("frontchannel_logout_uri", &frontchannel_logout_uri)?;
    let client_uri = non_empty(&request.client_uri);
    check_uri("client_uri", &client_uri)?;
    let logo_uri = non_empty(&request.logo_uri);
    check_uri("logo_uri", &logo_uri)?;

    Ok(ClientMetadata {
        client_name: request.client_name.clone().unwrap_or_default(),
        scope: scope::join(&scope::split(request.scope.as_deref().unwrap_or_default())),
        grant_types,
        response_types,
        redirect_uris,
        audience: dedup(request.audience.as_deref().unwrap_or_default()),
        token_endpoint_auth_method,
        subject_type,
        access_token_strategy: access_token_strategy.as_str().to_string(),
        backchannel_logout_uri,
        backchannel_logout_session_required: request.backchannel_logout_session_required.unwrap_or(false),
        frontchannel_logout_uri,
        frontchannel_logout_session_required: request.frontchannel_logout_session_required.unwrap_or(false),
        post_logout_redirect_uris,
        skip_consent: request.skip_consent.unwrap_or(false),
        owner: request.owner.clone().unwrap_or_default(),
        contacts: dedup(request.contacts.as_deref().unwrap_or_default()),
        client_uri,
        logo_uri,
    })
}

/// The plaintext secret a client ends up with: the supplied one, a generated
/// one for confidential clients, or none for public clients.
pub fn resolve_secret(metadata: &ClientMetadata, supplied: Option<&str>) -> Result<Option<String>, ValidationError> {
    let supplied = supplied.filter(|s| !s.is_empty());
    if metadata.is_public() {
        return match supplied {
            Some(_) => Err(ValidationError::PublicClientSecret),
            None => Ok(None),
        };
    }
    match supplied {
        Some(secret) if secret.len() < secrets::MIN_CLIENT_SECRET_LENGTH => Err(ValidationError::SecretTooShort),
        Some(secret) => Ok(Some(secret.to_string())),
        None => Ok(Some(secrets::generate_client_secret())),
    }
}

/// Argon2 hash of `secret`.
pub fn hash(secret: &str) -> Result<String, ApiError> {
    secrets::hash_secret(secret).map_err(|e| ApiError::Internal(format!("Failed to hash secret: {e}")))
}
