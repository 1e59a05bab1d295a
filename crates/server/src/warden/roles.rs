//! Role administration.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::entity::role;
use crate::error::{ApiError, ErrorResponse, conflict_or_db};
use crate::state::AppState;
use crate::warden::WARDEN_TAG;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleDocument {
    /// Role ID, referenced from policy subjects
    pub id: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl From<&role::Model> for RoleDocument {
    fn from(model: &role::Model) -> Self {
        Self {
            id: model.id.clone(),
            members: model.members_list(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MembersRequest {
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RoleListQuery {
    /// Only roles containing this member
    pub member: Option<String>,
}

fn encode_members(members: &[String]) -> Result<String, ApiError> {
    serde_json::to_string(members).map_err(|e| ApiError::Internal(format!("Failed to encode members: {e}")))
}

/// Members in first-seen order without duplicates or blanks.
fn normalize(members: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for member in members {
        let member = member.trim().to_string();
        if !member.is_empty() && !unique.contains(&member) {
            unique.push(member);
        }
    }
    unique
}

async fn find_role(state: &AppState, id: &str) -> Result<role::Model, ApiError> {
    role::Entity::find_by_id(id)
        .one(state.db())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Role '{id}' does not exist")))
}

async fn save_members(state: &AppState, model: role::Model, members: Vec<String>) -> Result<RoleDocument, ApiError> {
    let mut active: role::ActiveModel = model.into();
    active.members = Set(encode_members(&members)?);
    active.updated_at = Set(OffsetDateTime::now_utc());
    let saved = active.update(state.db()).await?;
    Ok(RoleDocument::from(&saved))
}

#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/roles",
    tag = WARDEN_TAG,
    operation_id = "Create Role",
    summary = "Create a role",
    request_body(content = RoleDocument, description = "The role and its initial members"),
    responses(
        (status = 201, description = "Role created", body = RoleDocument),
        (status = 400, description = "Malformed role", body = ErrorResponse),
        (status = 409, description = "A role with this id exists", body = ErrorResponse),
    )
)]
pub async fn create_role(
    State(state): State<AppState>,
    payload: Result<Json<RoleDocument>, JsonRejection>,
) -> Result<(StatusCode, Json<RoleDocument>), ApiError> {
    let Json(document) = payload?;
    let id = document.id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::BadRequest("Field 'id' must not be empty".into()));
    }
    let members = normalize(document.members);

    let now = OffsetDateTime::now_utc();
    let model = role::ActiveModel {
        id: Set(id.clone()),
        members: Set(encode_members(&members)?),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(state.db())
    .await
    .map_err(|e| conflict_or_db(e, format!("Role '{id}' already exists")))?;

    tracing::info!(role = %id, members = members.len(), "Role created");
    Ok((StatusCode::CREATED, Json(RoleDocument::from(&model))))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/roles",
    tag = WARDEN_TAG,
    operation_id = "List Roles",
    summary = "List roles",
    params(RoleListQuery),
    responses(
        (status = 200, description = "Roles, oldest first", body = [RoleDocument]),
    )
)]
pub async fn list_roles(
    State(state): State<AppState>,
    Query(query): Query<RoleListQuery>,
) -> Result<Json<Vec<RoleDocument>>, ApiError> {
    let roles = role::Entity::find()
        .order_by_asc(role::Column::CreatedAt)
        .all(state.db())
        .await?
        .iter()
        .filter(|model| query.member.as_deref().is_none_or(|member| model.has_member(member)))
        .map(RoleDocument::from)
        .collect();
    Ok(Json(roles))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/roles/{id}",
    tag = WARDEN_TAG,
    operation_id = "Get Role",
    summary = "Get a role",
    params(("id" = String, Path, description = "Role ID")),
    responses(
        (status = 200, description = "The role", body = RoleDocument),
        (status = 404, description = "Unknown role", body = ErrorResponse),
    )
)]
pub async fn get_role(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<RoleDocument>, ApiError> {
    let model = find_role(&state, &id).await?;
    Ok(Json(RoleDocument::from(&model)))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/roles/{id}",
    tag = WARDEN_TAG,
    operation_id = "Delete Role",
    summary = "Delete a role",
    params(("id" = String, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Unknown role", body = ErrorResponse),
    )
)]
pub async fn delete_role(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let deleted = role::Entity::delete_by_id(&id).exec(state.db()).await?;
    if deleted.rows_affected == 0 {
        return Err(ApiError::NotFound(format!("Role '{id}' does not exist")));
    }
    tracing::info!(role = %id, "Role deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/roles/{id}/members",
    tag = WARDEN_TAG,
    operation_id = "Add Role Members",
    summary = "Add members to a role",
    params(("id" = String, Path, description = "Role ID")),
    request_body(content = MembersRequest, description = "Subjects to add"),
    responses(
        (status = 200, description = "The updated role", body = RoleDocument),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 404, description = "Unknown role", body = ErrorResponse),
    )
)]
pub async fn add_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<MembersRequest>, JsonRejection>,
) -> Result<Json<RoleDocument>, ApiError> {
    let Json(request) = payload?;
    let model = find_role(&state, &id).await?;
    let members = normalize(model.members_list().into_iter().chain(request.members));
    let role = save_members(&state, model, members).await?;
    tracing::info!(role = %id, members = role.members.len(), "Role members added");
    Ok(Json(role))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/roles/{id}/members/{member}",
    tag = WARDEN_TAG,
    operation_id = "Remove Role Member",
    summary = "Remove a member from a role",
    params(
        ("id" = String, Path, description = "Role ID"),
        ("member" = String, Path, description = "Member subject"),
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 404, description = "Unknown role or not a member", body = ErrorResponse),
    )
)]
pub async fn remove_member(
    State(state): State<AppState>,
    Path((id, member)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let model = find_role(&state, &id).await?;
    if !model.has_member(&member) {
        return Err(ApiError::NotFound(format!("'{member}' is not a member of role '{id}'")));
    }
    let members = model.members_list().into_iter().filter(|m| m != &member).collect();
    save_members(&state, model, members).await?;
    tracing::info!(role = %id, member = %member, "Role member removed");
    Ok(StatusCode::NO_CONTENT)
}
