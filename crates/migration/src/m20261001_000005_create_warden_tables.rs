//! Creates the policy decision point tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Policy::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Policy::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Policy::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Policy::Subjects).text().not_null())
                    .col(ColumnDef::new(Policy::Actions).text().not_null())
                    .col(ColumnDef::new(Policy::Resources).text().not_null())
                    .col(ColumnDef::new(Policy::Effect).string().not_null())
                    .col(ColumnDef::new(Policy::Conditions).text().not_null())
                    .col(
                        ColumnDef::new(Policy::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Policy::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Role::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Role::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Role::Members).text().not_null())
                    .col(
                        ColumnDef::new(Role::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Role::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Role::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Policy::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Policy {
    Table,
    Id,
    Description,
    Subjects,
    Actions,
    Resources,
    Effect,
    Conditions,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Role {
    Table,
    Id,
    Members,
    CreatedAt,
    UpdatedAt,
}
