//! Periodic removal of expired grant state.

use std::time::Duration;

use sea_orm::{ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use time::OffsetDateTime;

use crate::entity::{
    jwt_bearer_jti, logout_request, oauth2_authorization_code, oauth2_device_request, oauth2_flow,
    oauth2_token,
};
use crate::oauth2::flow::FlowState;
use crate::state::AppState;

/// Rows removed by one janitor pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Purged {
    pub flows: u64,
    pub authorization_codes: u64,
    pub tokens: u64,
    pub device_requests: u64,
    pub logout_requests: u64,
    pub jti: u64,
}

impl Purged {
    pub fn total(&self) -> u64 {
        self.flows
            + self.authorization_codes
            + self.tokens
            + self.device_requests
            + self.logout_requests
            + self.jti
    }
}

/// Deletes everything that expired before now. Flows that ended in a used
/// consent are kept: consent revocation finds the tokens they minted through them.
pub async fn run_once<C: ConnectionTrait>(conn: &C) -> Result<Purged, DbErr> {
    let now = OffsetDateTime::now_utc();
    Ok(Purged {
        flows: oauth2_flow::Entity::delete_many()
            .filter(oauth2_flow::Column::ExpiresAt.lt(now))
            .filter(
                Condition::any()
                    .add(oauth2_flow::Column::State.ne(FlowState::ConsentUsed.as_str()))
                    .add(oauth2_flow::Column::Error.is_not_null()),
            )
            .exec(conn)
            .await?
            .rows_affected,
        authorization_codes: oauth2_authorization_code::Entity::delete_many()
            .filter(oauth2_authorization_code::Column::ExpiresAt.lt(now))
            .exec(conn)
            .await?
            .rows_affected,
        tokens: oauth2_token::Entity::delete_many()
            .filter(oauth2_token::Column::ExpiresAt.lt(now))
            .exec(conn)
            .await?
            .rows_affected,
        device_requests: oauth2_device_request::Entity::delete_many()
            .filter(oauth2_device_request::Column::ExpiresAt.lt(now))
            .exec(conn)
            .await?
            .rows_affected,
        logout_requests: logout_request::Entity::delete_many()
            .filter(logout_request::Column::ExpiresAt.lt(now))
            .exec(conn)
            .await?
            .rows_affected,
        jti: jwt_bearer_jti::Entity::delete_many()
            .filter(jwt_bearer_jti::Column::ExpiresAt.lt(now))
            .exec(conn)
            .await?
            .rows_affected,
    })
}

/// Runs [`run_once`] every `janitor.interval_secs`. An interval of 0 disables it.
#[tracing::instrument(skip(state))]
pub fn spawn(state: AppState) {
    let secs = state.config.janitor.interval_secs;
    if secs == 0 {
        tracing::info!("Janitor disabled");
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        loop {
            interval.tick().await;
            match run_once(state.db()).await {
                Ok(purged) if purged.total() > 0 => tracing::info!(
                    flows = purged.flows,
                    authorization_codes = purged.authorization_codes,
                    tokens = purged.tokens,
                    device_requests = purged.device_requests,
                    logout_requests = purged.logout_requests,
                    jti = purged.jti,
                    "Janitor removed expired records"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Janitor pass failed"),
            }
        }
    });
}
