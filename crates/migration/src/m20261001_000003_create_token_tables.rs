//! Creates the token storage tables. Only SHA-256 signatures of issued codes
//! and tokens are persisted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. Authorization codes
        manager
            .create_table(
                Table::create()
                    .table(Oauth2AuthorizationCode::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Signature)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::RequestId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Subject)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::RedirectUri)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::RedirectUriExplicit)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Scope)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Audience)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Nonce)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::CodeChallenge)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::CodeChallengeMethod)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::SessionId)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::AuthTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Oauth2AuthorizationCode::Acr).string().null())
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::AccessTokenClaims)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::IdTokenClaims)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2AuthorizationCode::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 2. Access and refresh tokens
        manager
            .create_table(
                Table::create()
                    .table(Oauth2Token::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2Token::Signature)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Oauth2Token::Kind).string().not_null())
                    .col(ColumnDef::new(Oauth2Token::RequestId).string().not_null())
                    .col(ColumnDef::new(Oauth2Token::ClientId).string().not_null())
                    .col(ColumnDef::new(Oauth2Token::Subject).string().not_null())
                    .col(ColumnDef::new(Oauth2Token::Scope).text().not_null())
                    .col(ColumnDef::new(Oauth2Token::Audience).text().not_null())
                    .col(ColumnDef::new(Oauth2Token::SessionId).string().null())
                    .col(
                        ColumnDef::new(Oauth2Token::AuthTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Oauth2Token::Acr).string().null())
                    .col(
                        ColumnDef::new(Oauth2Token::AccessTokenClaims)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Oauth2Token::IdTokenClaims).text().not_null())
                    .col(
                        ColumnDef::new(Oauth2Token::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Oauth2Token::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Token::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 3. Device authorization requests
        manager
            .create_table(
                Table::create()
                    .table(Oauth2DeviceRequest::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::DeviceCodeSignature)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::UserCode)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::RequestedScope)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::RequestedAudience)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::Status)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Oauth2DeviceRequest::Subject).string().null())
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::GrantedScope)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::GrantedAudience)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::SessionId)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::AuthTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Oauth2DeviceRequest::Acr).string().null())
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::AccessTokenClaims)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::IdTokenClaims)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::IntervalSecs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::LastPolledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2DeviceRequest::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 4. Signing keys
        manager
            .create_table(
                Table::create()
                    .table(SigningKey::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SigningKey::Kid)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SigningKey::KeySet).string().not_null())
                    .col(ColumnDef::new(SigningKey::Algorithm).string().not_null())
                    .col(ColumnDef::new(SigningKey::PrivateKey).text().not_null())
                    .col(ColumnDef::new(SigningKey::PublicKey).string().not_null())
                    .col(
                        ColumnDef::new(SigningKey::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(SigningKey::CreatedAt)
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
                    .name("idx_oauth2_authorization_code_request_id")
                    .table(Oauth2AuthorizationCode::Table)
                    .col(Oauth2AuthorizationCode::RequestId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_token_request_id")
                    .table(Oauth2Token::Table)
                    .col(Oauth2Token::RequestId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_token_client_subject")
                    .table(Oauth2Token::Table)
                    .col(Oauth2Token::ClientId)
                    .col(Oauth2Token::Subject)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_token_expires_at")
                    .table(Oauth2Token::Table)
                    .col(Oauth2Token::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_signing_key_key_set")
                    .table(SigningKey::Table)
                    .col(SigningKey::KeySet)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_signing_key_key_set").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_oauth2_token_expires_at").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_token_client_subject")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_oauth2_token_request_id").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_authorization_code_request_id")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(SigningKey::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2DeviceRequest::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2Token::Table).to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(Oauth2AuthorizationCode::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum Oauth2AuthorizationCode {
    Table,
    Signature,
    RequestId,
    ClientId,
    Subject,
    RedirectUri,
    RedirectUriExplicit,
    Scope,
    Audience,
    Nonce,
    CodeChallenge,
    CodeChallengeMethod,
    SessionId,
    AuthTime,
    Acr,
    AccessTokenClaims,
    IdTokenClaims,
    Active,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Oauth2Token {
    Table,
    Signature,
    Kind,
    RequestId,
    ClientId,
    Subject,
    Scope,
    Audience,
    SessionId,
    AuthTime,
    Acr,
    AccessTokenClaims,
    IdTokenClaims,
    Active,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Oauth2DeviceRequest {
    Table,
    Id,
    DeviceCodeSignature,
    UserCode,
    ClientId,
    RequestedScope,
    RequestedAudience,
    Status,
    Subject,
    GrantedScope,
    GrantedAudience,
    SessionId,
    AuthTime,
    Acr,
    AccessTokenClaims,
    IdTokenClaims,
    IntervalSecs,
    LastPolledAt,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SigningKey {
    Table,
    Kid,
    KeySet,
    Algorithm,
    PrivateKey,
    PublicKey,
    Active,
    CreatedAt,
}
