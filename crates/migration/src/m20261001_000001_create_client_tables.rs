//! Creates the OAuth2 client registry.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Oauth2Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Oauth2Client::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Oauth2Client::SecretHash).string().null())
                    .col(
                        ColumnDef::new(Oauth2Client::ClientName)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::Scope)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Oauth2Client::GrantTypes).text().not_null())
                    .col(
                        ColumnDef::new(Oauth2Client::ResponseTypes)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Oauth2Client::RedirectUris).text().not_null())
                    .col(
                        ColumnDef::new(Oauth2Client::Audience)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::TokenEndpointAuthMethod)
                            .string()
                            .not_null()
                            .default("client_secret_basic"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::SubjectType)
                            .string()
                            .not_null()
                            .default("public"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::AccessTokenStrategy)
                            .string()
                            .not_null()
                            .default("opaque"),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::BackchannelLogoutUri)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::BackchannelLogoutSessionRequired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::FrontchannelLogoutUri)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::FrontchannelLogoutSessionRequired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::PostLogoutRedirectUris)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::SkipConsent)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::Owner)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Oauth2Client::Contacts).text().not_null())
                    .col(ColumnDef::new(Oauth2Client::ClientUri).string().null())
                    .col(ColumnDef::new(Oauth2Client::LogoUri).string().null())
                    .col(
                        ColumnDef::new(Oauth2Client::RegistrationTokenHash)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Oauth2Client::UpdatedAt)
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
                    .name("idx_oauth2_client_owner")
                    .table(Oauth2Client::Table)
                    .col(Oauth2Client::Owner)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_oauth2_client_owner").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Oauth2Client::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Oauth2Client {
    Table,
    Id,
    SecretHash,
    ClientName,
    Scope,
    GrantTypes,
    ResponseTypes,
    RedirectUris,
    Audience,
    TokenEndpointAuthMethod,
    SubjectType,
    AccessTokenStrategy,
    BackchannelLogoutUri,
    BackchannelLogoutSessionRequired,
    FrontchannelLogoutUri,
    FrontchannelLogoutSessionRequired,
    PostLogoutRedirectUris,
    SkipConsent,
    Owner,
    Contacts,
    ClientUri,
    LogoUri,
    RegistrationTokenHash,
    CreatedAt,
    UpdatedAt,
}
