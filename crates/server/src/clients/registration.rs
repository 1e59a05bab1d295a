//! OpenID Connect Dynamic Client Registration.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use time::OffsetDateTime;

use crate::api::auth::bearer_token;
use crate::clients::validation::{self, ClientMetadata};
use crate::clients::{CLIENTS_TAG, ClientRequest, ClientResponse, admin};
use crate::entity::oauth2_client;
use crate::error::{ApiError, ErrorResponse, conflict_or_db};
use crate::oauth2::{scope, secrets};
use crate::state::AppState;

fn ensure_enabled(state: &AppState) -> Result<(), ApiError> {
    if state.config.oauth2.dynamic_registration.enabled {
        Ok(())
    } else {
        Err(ApiError::NotFound("Dynamic client registration is disabled".into()))
    }
}

/// Metadata a relying party may set for itself.
fn self_service_metadata(state: &AppState, request: &ClientRequest) -> Result<ClientMetadata, ApiError> {
    let config = &state.config.oauth2;
    let mut metadata = validation::validate(request, config.access_token_strategy)?;
    if metadata.scope.is_empty() {
        metadata.scope = scope::join(&config.dynamic_registration.default_scope);
    }
    metadata.skip_consent = false;
    metadata.owner = String::new();
    Ok(metadata)
}

fn registration_client_uri(state: &AppState, client_id: &str) -> String {
    state
        .config
        .oauth2
        .public_url(&format!("/oauth2/register/{client_id}"))
}

/// Loads the client `id` if `headers` carry its registration access token.
async fn authorize_registration(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<oauth2_client::Model, ApiError> {
    ensure_enabled(state)?;
    let unauthorized = || ApiError::Unauthorized("Invalid or missing registration access token".into());
    let token = bearer_token(headers).ok_or_else(unauthorized)?;
    let client = oauth2_client::Entity::find_by_id(id)
        .one(state.db())
        .await?
        .ok_or_else(unauthorized)?;
    match &client.registration_token_hash {
        Some(hash) if secrets::verify_secret(token, hash) => Ok(client),
        _ => {
            tracing::warn!(client_id = %id, "Rejected registration access token");
            Err(unauthorized())
        }
    }
}

#[tracing::instrument(skip(state, request))]
#[utoipa::path(
    post,
    path = "/oauth2/register",
    tag = CLIENTS_TAG,
    operation_id = "Register Client Dynamically",
    summary = "Dynamic client registration",
    description = "Registers a client without operator involvement. The response carries the \
                   client secret and a registration access token for managing the registration.\n\n\
                   A client-chosen `client_id` or `client_secret` is refused.",
    request_body(content = ClientRequest, description = "Client metadata"),
    responses(
        (status = 201, description = "Client registered", body = ClientResponse),
        (status = 400, description = "Invalid client metadata", body = ErrorResponse),
        (status = 403, description = "`client_id` or `client_secret` was supplied", body = ErrorResponse),
        (status = 404, description = "Dynamic registration is disabled", body = ErrorResponse),
    )
)]
pub async fn register_client(
    State(state): State<AppState>,
    Json(request): Json<ClientRequest>,
) -> Result<(StatusCode, Json<ClientResponse>), ApiError> {
    ensure_enabled(&state)?;
    if request.client_id.as_deref().is_some_and(|v| !v.is_empty()) {
        return Err(ApiError::Forbidden(
            "It is not allowed to choose your own OAuth 2.0 Client ID".into(),
        ));
    }
    if request.client_secret.as_deref().is_some_and(|v| !v.is_empty()) {
        return Err(ApiError::Forbidden(
            "It is not allowed to choose your own OAuth 2.0 Client secret".into(),
        ));
    }

    let metadata = self_service_metadata(&state, &request)?;
    let secret = validation::resolve_secret(&metadata, None)?;
    let registration_token = secrets::generate_token();
    let client_id = uuid::Uuid::new_v4().to_string();

    let now = OffsetDateTime::now_utc();
    let mut model = oauth2_client::ActiveModel {
        id: Set(client_id.clone()),
        secret_hash: Set(secret.as_deref().map(validation::hash).transpose()?),
        registration_token_hash: Set(Some(validation::hash(&registration_token)?)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    metadata.apply(&mut model);
    let client = model
        .insert(state.db())
        .await
        .map_err(|e| conflict_or_db(e, format!("Client '{client_id}' already exists")))?;

    tracing::info!(client_id = %client.id, "Client registered dynamically");
    let mut response = ClientResponse::from(&client);
    response.client_secret = secret;
    response.registration_access_token = Some(registration_token);
    response.registration_client_uri = Some(registration_client_uri(&state, &client.id));
    Ok((StatusCode::CREATED, Json(response)))
}

#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/oauth2/register/{id}",
    tag = CLIENTS_TAG,
    operation_id = "Get Dynamic Client",
    summary = "Read a dynamically registered client",
    params(("id" = String, Path, description = "Client ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The client", body = ClientResponse),
        (status = 401, description = "Missing or invalid registration access token", body = ErrorResponse),
    )
)]
pub async fn get_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = authorize_registration(&state, &headers, &id).await?;
    let mut response = ClientResponse::from(&client);
    response.registration_client_uri = Some(registration_client_uri(&state, &client.id));
    Ok(Json(response))
}

#[tracing::instrument(skip(state, headers, request))]
#[utoipa::path(
    put,
    path = "/oauth2/register/{id}",
    tag = CLIENTS_TAG,
    operation_id = "Update Dynamic Client",
    summary = "Update a dynamically registered client",
    description = "Replaces the client metadata and rotates the registration access token. \
                   The client secret cannot be set here.",
    params(("id" = String, Path, description = "Client ID")),
    request_body(content = ClientRequest, description = "Client metadata"),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Client updated", body = ClientResponse),
        (status = 400, description = "Invalid client metadata", body = ErrorResponse),
        (status = 401, description = "Missing or invalid registration access token", body = ErrorResponse),
        (status = 403, description = "`client_secret` was supplied", body = ErrorResponse),
    )
)]
pub async fn update_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ClientRequest>,
) -> Result<Json<ClientResponse>, ApiError> {
    let existing = authorize_registration(&state, &headers, &id).await?;
    if request.client_secret.as_deref().is_some_and(|v| !v.is_empty()) {
        return Err(ApiError::Forbidden(
            "It is not allowed to set the OAuth 2.0 Client secret through dynamic registration".into(),
        ));
    }
    if request.client_id.as_deref().is_some_and(|v| !v.is_empty() && v != id) {
        return Err(ApiError::BadRequest("The client id cannot be changed".into()));
    }

    let metadata = self_service_metadata(&state, &request)?;
    let (secret_hash, secret) = match &existing.secret_hash {
        Some(current) if !metadata.is_public() => (Some(current.clone()), None),
        _ => {
            let secret = validation::resolve_secret(&metadata, None)?;
            (secret.as_deref().map(validation::hash).transpose()?, secret)
        }
    };
    let registration_token = secrets::generate_token();

    let mut model: oauth2_client::ActiveModel = existing.into();
    metadata.apply(&mut model);
    model.secret_hash = Set(secret_hash);
    model.registration_token_hash = Set(Some(validation::hash(&registration_token)?));
    model.updated_at = Set(OffsetDateTime::now_utc());
    let client = model.update(state.db()).await?;

    tracing::info!(client_id = %client.id, "Dynamic client updated");
    let mut response = ClientResponse::from(&client);
    response.client_secret = secret;
    response.registration_access_token = Some(registration_token);
    response.registration_client_uri = Some(registration_client_uri(&state, &client.id));
    Ok(Json(response))
}

#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    delete,
    path = "/oauth2/register/{id}",
    tag = CLIENTS_TAG,
    operation_id = "Delete Dynamic Client",
    summary = "Delete a dynamically registered client",
    params(("id" = String, Path, description = "Client ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 401, description = "Missing or invalid registration access token", body = ErrorResponse),
    )
)]
pub async fn delete_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let client = authorize_registration(&state, &headers, &id).await?;
    admin::remove(&state, &client.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
