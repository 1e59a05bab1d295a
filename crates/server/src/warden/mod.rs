//! Warden, the policy decision point.
//!
//! Policies grant or deny subjects actions on resources, optionally gated by
//! conditions on the request context. Roles group subjects so policies can
//! name a role instead of every member.

pub mod condition;
pub mod decisions;
pub mod engine;
pub mod pattern;
pub mod policies;
pub mod roles;

use sea_orm::{ConnectionTrait, DbErr, EntityTrait, QueryOrder};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::entity::{policy, role};
use crate::state::AppState;
use engine::{Policy, Role};

/// OpenAPI tag for access decisions and policy administration
pub const WARDEN_TAG: &str = "Warden";

pub fn admin_router(state: AppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(decisions::allowed))
        .routes(routes!(decisions::token_allowed))
        .routes(routes!(policies::create_policy, policies::list_policies))
        .routes(routes!(
            policies::get_policy,
            policies::update_policy,
            policies::delete_policy
        ))
        .routes(routes!(roles::create_role, roles::list_roles))
        .routes(routes!(roles::get_role, roles::delete_role))
        .routes(routes!(roles::add_members))
        .routes(routes!(roles::remove_member))
        .with_state(state)
}

/// Every stored policy and role, compiled for evaluation. Policies that no
/// longer compile are skipped.
pub async fn load<C: ConnectionTrait>(conn: &C) -> Result<(Vec<Policy>, Vec<Role>), DbErr> {
    let policies = policy::Entity::find()
        .order_by_asc(policy::Column::CreatedAt)
        .all(conn)
        .await?
        .iter()
        .filter_map(|model| match policies::compile_model(model) {
            Ok(policy) => Some(policy),
            Err(e) => {
                tracing::warn!(policy = %model.id, error = %e, "Skipping unreadable policy");
                None
            }
        })
        .collect();
    let roles = role::Entity::find()
        .all(conn)
        .await?
        .into_iter()
        .map(|model| Role {
            members: model.members_list(),
            id: model.id,
        })
        .collect();
    Ok((policies, roles))
}
