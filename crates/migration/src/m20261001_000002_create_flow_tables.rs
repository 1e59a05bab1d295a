//! Creates the login/consent flow tables:
//! - oauth2_flow: one row per authorization attempt
//! - login_session: remembered authentication sessions
//! - consent_session: remembered consent per (client, subject)
//! - logout_request: RP-initiated logout challenges

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. Authorization flows
        manager
            .create_table(
                Table::create()
                    .table(Oauth2Flow::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2Flow::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Oauth2Flow::ClientId).string().not_null())
                    .col(ColumnDef::new(Oauth2Flow::Request).text().not_null())
                    .col(ColumnDef::new(Oauth2Flow::RequestedScope).text().not_null())
                    .col(
                        ColumnDef::new(Oauth2Flow::RequestedAudience)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Oauth2Flow::State).string().not_null())
                    .col(
                        ColumnDef::new(Oauth2Flow::LoginSkip)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Oauth2Flow::Subject).string().null())
                    .col(
                        ColumnDef::new(Oauth2Flow::LoginRemember)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::LoginRememberFor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Oauth2Flow::Acr).string().null())
                    .col(ColumnDef::new(Oauth2Flow::LoginContext).text().null())
                    .col(ColumnDef::new(Oauth2Flow::SessionId).string().null())
                    .col(
                        ColumnDef::new(Oauth2Flow::AuthenticatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::LoginVerifier)
                            .string()
                            .null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::ConsentChallenge)
                            .string()
                            .null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::ConsentSkip)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::ConsentVerifier)
                            .string()
                            .null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::GrantedScope)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::GrantedAudience)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::ConsentRemember)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::ConsentRememberFor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::AccessTokenClaims)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::IdTokenClaims)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(ColumnDef::new(Oauth2Flow::Error).text().null())
                    .col(ColumnDef::new(Oauth2Flow::DeviceRequestId).string().null())
                    .col(
                        ColumnDef::new(Oauth2Flow::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Flow::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 2. Login sessions
        manager
            .create_table(
                Table::create()
                    .table(LoginSession::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LoginSession::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LoginSession::Subject).string().not_null())
                    .col(
                        ColumnDef::new(LoginSession::Remember)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(LoginSession::RememberFor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(LoginSession::AuthenticatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 3. Consent sessions
        manager
            .create_table(
                Table::create()
                    .table(ConsentSession::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConsentSession::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ConsentSession::ClientId).string().not_null())
                    .col(ColumnDef::new(ConsentSession::Subject).string().not_null())
                    .col(
                        ColumnDef::new(ConsentSession::GrantedScope)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConsentSession::GrantedAudience)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConsentSession::Remember)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ConsentSession::RememberFor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ConsentSession::SessionId).string().null())
                    .col(
                        ColumnDef::new(ConsentSession::AccessTokenClaims)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConsentSession::IdTokenClaims)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConsentSession::HandledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 4. Logout requests
        manager
            .create_table(
                Table::create()
                    .table(LogoutRequest::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LogoutRequest::Challenge)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LogoutRequest::Verifier)
                            .string()
                            .null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(LogoutRequest::Subject).string().not_null())
                    .col(ColumnDef::new(LogoutRequest::SessionId).string().not_null())
                    .col(ColumnDef::new(LogoutRequest::ClientId).string().null())
                    .col(
                        ColumnDef::new(LogoutRequest::PostLogoutRedirectUri)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(LogoutRequest::State).string().null())
                    .col(
                        ColumnDef::new(LogoutRequest::RpInitiated)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(LogoutRequest::Status).string().not_null())
                    .col(
                        ColumnDef::new(LogoutRequest::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LogoutRequest::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_flow_expires_at")
                    .table(Oauth2Flow::Table)
                    .col(Oauth2Flow::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_login_session_subject")
                    .table(LoginSession::Table)
                    .col(LoginSession::Subject)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_session_client_subject")
                    .table(ConsentSession::Table)
                    .col(ConsentSession::ClientId)
                    .col(ConsentSession::Subject)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_session_subject")
                    .table(ConsentSession::Table)
                    .col(ConsentSession::Subject)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_consent_session_subject").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_consent_session_client_subject")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_login_session_subject").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_oauth2_flow_expires_at").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LogoutRequest::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ConsentSession::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LoginSession::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2Flow::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Oauth2Flow {
    Table,
    Id,
    ClientId,
    Request,
    RequestedScope,
    RequestedAudience,
    State,
    LoginSkip,
    Subject,
    LoginRemember,
    LoginRememberFor,
    Acr,
    LoginContext,
    SessionId,
    AuthenticatedAt,
    LoginVerifier,
    ConsentChallenge,
    ConsentSkip,
    ConsentVerifier,
    GrantedScope,
    GrantedAudience,
    ConsentRemember,
    ConsentRememberFor,
    AccessTokenClaims,
    IdTokenClaims,
    Error,
    DeviceRequestId,
    CreatedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum LoginSession {
    Table,
    Id,
    Subject,
    Remember,
    RememberFor,
    AuthenticatedAt,
}

#[derive(DeriveIden)]
enum ConsentSession {
    Table,
    Id,
    ClientId,
    Subject,
    GrantedScope,
    GrantedAudience,
    Remember,
    RememberFor,
    SessionId,
    AccessTokenClaims,
    IdTokenClaims,
    HandledAt,
}

#[derive(DeriveIden)]
enum LogoutRequest {
    Table,
    Challenge,
    Verifier,
    Subject,
    SessionId,
    ClientId,
    PostLogoutRedirectUri,
    State,
    RpInitiated,
    Status,
    CreatedAt,
    ExpiresAt,
}
