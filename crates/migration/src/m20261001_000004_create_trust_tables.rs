//! Creates the RFC 7523 trust relationship tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JwtBearerGrant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JwtBearerGrant::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JwtBearerGrant::Issuer).string().not_null())
                    .col(
                        ColumnDef::new(JwtBearerGrant::Subject)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(JwtBearerGrant::AllowAnySubject)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(JwtBearerGrant::Scope).text().not_null())
                    .col(ColumnDef::new(JwtBearerGrant::KeyId).string().not_null())
                    .col(ColumnDef::new(JwtBearerGrant::Jwk).text().not_null())
                    .col(
                        ColumnDef::new(JwtBearerGrant::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JwtBearerGrant::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(JwtBearerJti::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JwtBearerJti::Signature)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(JwtBearerJti::ExpiresAt)
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
                    .name("idx_jwt_bearer_grant_issuer_subject")
                    .table(JwtBearerGrant::Table)
                    .col(JwtBearerGrant::Issuer)
                    .col(JwtBearerGrant::Subject)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_jwt_bearer_grant_issuer_subject")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(JwtBearerJti::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(JwtBearerGrant::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JwtBearerGrant {
    Table,
    Id,
    Issuer,
    Subject,
    AllowAnySubject,
    Scope,
    KeyId,
    Jwk,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum JwtBearerJti {
    Table,
    Signature,
    ExpiresAt,
}
