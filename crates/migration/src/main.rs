use config::{Config, Environment, File};
use sea_orm_migration::prelude::*;
use std::env;

/// `DATABASE_URL` wins; otherwise the `database_url` keyward itself would use.
fn configured_database_url() -> Option<String> {
    Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()
        .ok()?
        .get_string("database_url")
        .ok()
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if env::var("DATABASE_URL").is_err() {
        match configured_database_url() {
            Some(url) => env::set_var("DATABASE_URL", url),
            None => eprintln!("DATABASE_URL is not set and config.yaml has no database_url"),
        }
    }
    cli::run_cli(migration::Migrator).await;
}
