//! Client administration on the admin listener.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::IntoParams;

use crate::clients::validation;
use crate::clients::{CLIENTS_TAG, ClientRequest, ClientResponse};
use crate::entity::{consent_session, oauth2_client};
use crate::error::{ApiError, ErrorResponse, conflict_or_db};
use crate::oauth2::issuer;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ClientListQuery {
    /// Only clients of this owner
    pub owner: Option<String>,
    /// Only clients with exactly this name
    pub client_name: Option<String>,
}

async fn find_client(state: &AppState, id: &str) -> Result<oauth2_client::Model, ApiError> {
    oauth2_client::Entity::find_by_id(id)
        .one(state.db())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Client '{id}' does not exist")))
}

#[tracing::instrument(skip(state, request))]
#[utoipa::path(
    post,
    path = "/clients",
    tag = CLIENTS_TAG,
    operation_id = "Create Client",
    summary = "Register an OAuth 2.0 client",
    description = "Confidential clients without a `client_secret` get a generated 26 character \
                   secret, returned only in this response. Supplied secrets need at least 6 \
                   characters. Clients using `token_endpoint_auth_method=none` carry no secret.",
    request_body(content = ClientRequest, description = "Client metadata"),
    responses(
        (status = 201, description = "Client created", body = ClientResponse),
        (status = 400, description = "Invalid client metadata", body = ErrorResponse),
        (status = 409, description = "A client with this id already exists", body = ErrorResponse),
    )
)]
pub async fn create_client(
    State(state): State<AppState>,
    Json(request): Json<ClientRequest>,
) -> Result<(StatusCode, Json<ClientResponse>), ApiError> {
    let metadata = validation::validate(&request, state.config.oauth2.access_token_strategy)?;
    let secret = validation::resolve_secret(&metadata, request.client_secret.as_deref())?;
    let client_id = request
        .client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let now = OffsetDateTime::now_utc();
    let mut model = oauth2_client::ActiveModel {
        id: Set(client_id.clone()),
        secret_hash: Set(secret.as_deref().map(validation::hash).transpose()?),
        registration_token_hash: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    metadata.apply(&mut model);
    let client = model
        .insert(state.db())
        .await
        .map_err(|e| conflict_or_db(e, format!("Client '{client_id}' already exists")))?;

    tracing::info!(client_id = %client.id, "Client created");
    let mut response = ClientResponse::from(&client);
    response.client_secret = secret;
    Ok((StatusCode::CREATED, Json(response)))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/clients",
    tag = CLIENTS_TAG,
    operation_id = "List Clients",
    summary = "List OAuth 2.0 clients",
    params(ClientListQuery),
    responses(
        (status = 200, description = "Clients, oldest first", body = [ClientResponse]),
    )
)]
pub async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<ClientListQuery>,
) -> Result<Json<Vec<ClientResponse>>, ApiError> {
    let mut select = oauth2_client::Entity::find().order_by_asc(oauth2_client::Column::CreatedAt);
    if let Some(owner) = &query.owner {
        select = select.filter(oauth2_client::Column::Owner.eq(owner));
    }
    if let Some(name) = &query.client_name {
        select = select.filter(oauth2_client::Column::ClientName.eq(name));
    }
    let clients = select.all(state.db()).await?;
    Ok(Json(clients.iter().map(ClientResponse::from).collect()))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/clients/{id}",
    tag = CLIENTS_TAG,
    operation_id = "Get Client",
    summary = "Get an OAuth 2.0 client",
    params(("id" = String, Path, description = "Client ID")),
    responses(
        (status = 200, description = "The client", body = ClientResponse),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = find_client(&state, &id).await?;
    Ok(Json(ClientResponse::from(&client)))
}

#[tracing::instrument(skip(state, request))]
#[utoipa::path(
    put,
    path = "/clients/{id}",
    tag = CLIENTS_TAG,
    operation_id = "Update Client",
    summary = "Replace an OAuth 2.0 client",
    description = "Replaces every metadata field. The client id cannot change. A new \
                   `client_secret` may be supplied; otherwise the current secret is kept.",
    params(("id" = String, Path, description = "Client ID")),
    request_body(content = ClientRequest, description = "Client metadata"),
    responses(
        (status = 200, description = "Client updated", body = ClientResponse),
        (status = 400, description = "Invalid client metadata or a different client id", body = ErrorResponse),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn update_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ClientRequest>,
) -> Result<Json<ClientResponse>, ApiError> {
    let existing = find_client(&state, &id).await?;
    if let Some(body_id) = request.client_id.as_deref().filter(|b| !b.is_empty())
        && body_id != id
    {
        return Err(ApiError::BadRequest(format!(
            "The client id cannot be changed from '{id}' to '{body_id}'"
        )));
    }

    let metadata = validation::validate(&request, state.config.oauth2.access_token_strategy)?;
    let supplied = request.client_secret.as_deref().filter(|s| !s.is_empty());
    let (secret_hash, secret) = match (&existing.secret_hash, supplied) {
        (Some(current), None) if !metadata.is_public() => (Some(current.clone()), None),
        _ => {
            let secret = validation::resolve_secret(&metadata, supplied)?;
            (secret.as_deref().map(validation::hash).transpose()?, secret)
        }
    };

    let mut model: oauth2_client::ActiveModel = existing.into();
    metadata.apply(&mut model);
    model.secret_hash = Set(secret_hash);
    model.updated_at = Set(OffsetDateTime::now_utc());
    let client = model.update(state.db()).await?;

    tracing::info!(client_id = %client.id, secret_rotated = secret.is_some(), "Client updated");
    let mut response = ClientResponse::from(&client);
    response.client_secret = secret;
    Ok(Json(response))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/clients/{id}",
    tag = CLIENTS_TAG,
    operation_id = "Delete Client",
    summary = "Delete an OAuth 2.0 client",
    description = "Also deactivates every token issued to the client and removes its consent sessions.",
    params(("id" = String, Path, description = "Client ID")),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn delete_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    remove(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deletes a client together with its tokens and consent sessions.
pub(crate) async fn remove(state: &AppState, id: &str) -> Result<(), ApiError> {
    let deleted = oauth2_client::Entity::delete_by_id(id)
        .exec(state.db())
        .await?;
    if deleted.rows_affected == 0 {
        return Err(ApiError::NotFound(format!("Client '{id}' does not exist")));
    }
    let revoked = issuer::revoke_for_client(state.db(), id).await?;
    consent_session::Entity::delete_many()
        .filter(consent_session::Column::ClientId.eq(id))
        .exec(state.db())
        .await?;
    tracing::info!(client_id = %id, revoked, "Client deleted");
    Ok(())
}
