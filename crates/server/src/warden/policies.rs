//! Policy administration.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::entity::policy;
use crate::error::{ApiError, ErrorResponse, conflict_or_db};
use crate::state::AppState;
use crate::warden::WARDEN_TAG;
use crate::warden::condition::RawCondition;
use crate::warden::engine::{Effect, Policy, PolicyError};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PolicyDocument {
    /// Generated when omitted on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Subject or role patterns
    pub subjects: Vec<String>,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub effect: Effect,
    /// Context key to condition, e.g. `{"owner": {"type": "EqualsSubjectCondition"}}`
    #[serde(default)]
    #[schema(value_type = Object)]
    pub conditions: BTreeMap<String, RawCondition>,
}

#[derive(Debug, Error)]
pub enum StoredPolicyError {
    #[error("field '{0}' is not valid JSON")]
    Json(&'static str),
    #[error("unknown effect '{0}'")]
    Effect(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

fn json_field<T: serde::de::DeserializeOwned>(raw: &str, field: &'static str) -> Result<T, StoredPolicyError> {
    serde_json::from_str(raw).map_err(|_| StoredPolicyError::Json(field))
}

impl TryFrom<&policy::Model> for PolicyDocument {
    type Error = StoredPolicyError;

    fn try_from(model: &policy::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Some(model.id.clone()),
            description: model.description.clone(),
            subjects: json_field(&model.subjects, "subjects")?,
            actions: json_field(&model.actions, "actions")?,
            resources: json_field(&model.resources, "resources")?,
            effect: Effect::parse(&model.effect).ok_or_else(|| StoredPolicyError::Effect(model.effect.clone()))?,
            conditions: json_field(&model.conditions, "conditions")?,
        })
    }
}

impl PolicyDocument {
    fn compile(&self, id: &str) -> Result<Policy, PolicyError> {
        Policy::compile(
            id,
            &self.subjects,
            &self.actions,
            &self.resources,
            self.effect,
            &self.conditions,
        )
    }

    /// Rejects documents that could never match or do not compile.
    fn validate(&self, id: &str) -> Result<(), ApiError> {
        for (field, values) in [
            ("subjects", &self.subjects),
            ("actions", &self.actions),
            ("resources", &self.resources),
        ] {
            if values.is_empty() {
                return Err(ApiError::BadRequest(format!("Field '{field}' must not be empty")));
            }
        }
        self.compile(id)
            .map(|_| ())
            .map_err(|e| ApiError::BadRequest(e.to_string()))
    }

    fn write_to(&self, model: &mut policy::ActiveModel) -> Result<(), ApiError> {
        model.description = Set(self.description.clone());
        model.subjects = Set(encode(&self.subjects)?);
        model.actions = Set(encode(&self.actions)?);
        model.resources = Set(encode(&self.resources)?);
        model.effect = Set(self.effect.as_str().to_string());
        model.conditions = Set(encode(&self.conditions)?);
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string(value).map_err(|e| ApiError::Internal(format!("Failed to encode policy: {e}")))
}

/// Compiles a stored policy for evaluation.
pub fn compile_model(model: &policy::Model) -> Result<Policy, StoredPolicyError> {
    Ok(PolicyDocument::try_from(model)?.compile(&model.id)?)
}

fn to_document(model: &policy::Model) -> Result<PolicyDocument, ApiError> {
    PolicyDocument::try_from(model)
        .map_err(|e| ApiError::Internal(format!("Stored policy '{}' is unreadable: {e}", model.id)))
}

async fn find_policy(state: &AppState, id: &str) -> Result<policy::Model, ApiError> {
    policy::Entity::find_by_id(id)
        .one(state.db())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Policy '{id}' does not exist")))
}

#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/policies",
    tag = WARDEN_TAG,
    operation_id = "Create Policy",
    summary = "Create an access control policy",
    description = "Subjects, actions and resources are patterns: literal text with `<regex>` \
                   segments, matched against the whole value.",
    request_body(content = PolicyDocument, description = "The policy"),
    responses(
        (status = 201, description = "Policy created", body = PolicyDocument),
        (status = 400, description = "Malformed policy", body = ErrorResponse),
        (status = 409, description = "A policy with this id exists", body = ErrorResponse),
    )
)]
pub async fn create_policy(
    State(state): State<AppState>,
    payload: Result<Json<PolicyDocument>, JsonRejection>,
) -> Result<(StatusCode, Json<PolicyDocument>), ApiError> {
    let Json(mut document) = payload?;
    let id = document
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    document.validate(&id)?;

    let now = OffsetDateTime::now_utc();
    let mut model = policy::ActiveModel {
        id: Set(id.clone()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    document.write_to(&mut model)?;
    model
        .insert(state.db())
        .await
        .map_err(|e| conflict_or_db(e, format!("Policy '{id}' already exists")))?;

    tracing::info!(policy = %id, effect = document.effect.as_str(), "Policy created");
    document.id = Some(id);
    Ok((StatusCode::CREATED, Json(document)))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/policies",
    tag = WARDEN_TAG,
    operation_id = "List Policies",
    summary = "List access control policies",
    responses(
        (status = 200, description = "Policies, oldest first", body = [PolicyDocument]),
    )
)]
pub async fn list_policies(State(state): State<AppState>) -> Result<Json<Vec<PolicyDocument>>, ApiError> {
    let models = policy::Entity::find()
        .order_by_asc(policy::Column::CreatedAt)
        .all(state.db())
        .await?;
    Ok(Json(models.iter().map(to_document).collect::<Result<_, _>>()?))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/policies/{id}",
    tag = WARDEN_TAG,
    operation_id = "Get Policy",
    summary = "Get an access control policy",
    params(("id" = String, Path, description = "Policy ID")),
    responses(
        (status = 200, description = "The policy", body = PolicyDocument),
        (status = 404, description = "Unknown policy", body = ErrorResponse),
    )
)]
pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PolicyDocument>, ApiError> {
    let model = find_policy(&state, &id).await?;
    Ok(Json(to_document(&model)?))
}

#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    put,
    path = "/policies/{id}",
    tag = WARDEN_TAG,
    operation_id = "Update Policy",
    summary = "Replace an access control policy",
    params(("id" = String, Path, description = "Policy ID")),
    request_body(content = PolicyDocument, description = "The policy"),
    responses(
        (status = 200, description = "Policy updated", body = PolicyDocument),
        (status = 400, description = "Malformed policy or a different id", body = ErrorResponse),
        (status = 404, description = "Unknown policy", body = ErrorResponse),
    )
)]
pub async fn update_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<PolicyDocument>, JsonRejection>,
) -> Result<Json<PolicyDocument>, ApiError> {
    let Json(mut document) = payload?;
    if document.id.as_deref().is_some_and(|body_id| !body_id.is_empty() && body_id != id) {
        return Err(ApiError::BadRequest("The policy id cannot be changed".into()));
    }
    document.validate(&id)?;

    let mut model: policy::ActiveModel = find_policy(&state, &id).await?.into();
    document.write_to(&mut model)?;
    model.updated_at = Set(OffsetDateTime::now_utc());
    model.update(state.db()).await?;

    tracing::info!(policy = %id, "Policy updated");
    document.id = Some(id);
    Ok(Json(document))
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/policies/{id}",
    tag = WARDEN_TAG,
    operation_id = "Delete Policy",
    summary = "Delete an access control policy",
    params(("id" = String, Path, description = "Policy ID")),
    responses(
        (status = 204, description = "Policy deleted"),
        (status = 404, description = "Unknown policy", body = ErrorResponse),
    )
)]
pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = policy::Entity::delete_by_id(&id).exec(state.db()).await?;
    if deleted.rows_affected == 0 {
        return Err(ApiError::NotFound(format!("Policy '{id}' does not exist")));
    }
    tracing::info!(policy = %id, "Policy deleted");
    Ok(StatusCode::NO_CONTENT)
}
