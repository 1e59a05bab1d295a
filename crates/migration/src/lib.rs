pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_client_tables;
mod m20261001_000002_create_flow_tables;
mod m20261001_000003_create_token_tables;
mod m20261001_000004_create_trust_tables;
mod m20261001_000005_create_warden_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_client_tables::Migration),
            Box::new(m20261001_000002_create_flow_tables::Migration),
            Box::new(m20261001_000003_create_token_tables::Migration),
            Box::new(m20261001_000004_create_trust_tables::Migration),
            Box::new(m20261001_000005_create_warden_tables::Migration),
        ]
    }
}
