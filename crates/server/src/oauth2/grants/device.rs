//! `urn:ietf:params:oauth:grant-type:device_code` grant (RFC 8628 section 3.4).

use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};
use time::{Duration, OffsetDateTime};

use crate::entity::{oauth2_client, oauth2_device_request};
use crate::error::{ErrorKind, OAuth2Error};
use crate::oauth2::issuer::{self, IssueRequest, TokenResponse};
use crate::oauth2::{scope, secrets, token::TokenRequest};
use crate::state::AppState;

pub async fn exchange(
    state: &AppState,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuth2Error> {
    let db = state.db();
    let device_code = params
        .device_code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OAuth2Error::invalid_request("The 'device_code' parameter is missing."))?;

    let record = oauth2_device_request::Entity::find()
        .filter(
            oauth2_device_request::Column::DeviceCodeSignature.eq(secrets::signature(device_code)),
        )
        .one(db)
        .await?
        .ok_or_else(|| OAuth2Error::invalid_grant("The device code could not be found."))?;

    if record.client_id != client.id {
        return Err(OAuth2Error::invalid_grant(
            "The device code was issued to another client.",
        ));
    }
    if record.is_expired() {
        return Err(OAuth2Error::new(ErrorKind::ExpiredToken));
    }

    let now = OffsetDateTime::now_utc();
    let polled_too_fast = record
        .last_polled_at
        .is_some_and(|last| now - last < Duration::seconds(record.interval_secs));
    let mut polled: oauth2_device_request::ActiveModel = record.clone().into();
    polled.last_polled_at = Set(Some(now));
    polled.update(db).await?;
    if polled_too_fast && record.status == oauth2_device_request::STATUS_PENDING {
        return Err(OAuth2Error::new(ErrorKind::SlowDown));
    }

    match record.status.as_str() {
        oauth2_device_request::STATUS_PENDING => {
            return Err(OAuth2Error::new(ErrorKind::AuthorizationPending));
        }
        oauth2_device_request::STATUS_DENIED => return Err(OAuth2Error::access_denied()),
        oauth2_device_request::STATUS_APPROVED => {}
        _ => {
            return Err(OAuth2Error::invalid_grant(
                "The device code has already been used.",
            ));
        }
    }

    let consumed = oauth2_device_request::Entity::update_many()
        .col_expr(
            oauth2_device_request::Column::Status,
            Expr::value(oauth2_device_request::STATUS_CONSUMED),
        )
        .filter(oauth2_device_request::Column::Id.eq(&record.id))
        .filter(oauth2_device_request::Column::Status.eq(oauth2_device_request::STATUS_APPROVED))
        .exec(db)
        .await?;
    if consumed.rows_affected != 1 {
        tracing::warn!(client_id = %client.id, device_request = %record.id, "Device code redeemed twice");
        return Err(OAuth2Error::invalid_grant(
            "The device code has already been used.",
        ));
    }

    issuer::issue(
        db,
        &state.config.oauth2,
        IssueRequest {
            client,
            request_id: record.id.clone(),
            subject: record.subject.clone().unwrap_or_default(),
            scope: scope::split(&record.granted_scope),
            audience: scope::split(&record.granted_audience),
            session_id: record.session_id.clone(),
            auth_time: record.auth_time,
            acr: record.acr.clone(),
            nonce: None,
            access_token_claims: issuer::parse_claims(&record.access_token_claims),
            id_token_claims: issuer::parse_claims(&record.id_token_claims),
            allow_refresh: true,
            allow_id_token: true,
        },
    )
    .await
}
