use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use keyward::api::start_webserver;
use keyward::config::load_config;
use keyward::oauth2::keys;
use keyward::{AppState, janitor};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "keyward=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_tracing();
    dotenvy::dotenv().ok();

    let config = Arc::new(load_config().wrap_err("Failed to load configuration")?);
    tracing::info!(
        issuer = %config.oauth2.issuer(),
        access_token_strategy = config.oauth2.access_token_strategy.as_str(),
        dynamic_registration = config.oauth2.dynamic_registration.enabled,
        admin_api_key_set = config.admin.api_key.is_some(),
        "Configuration loaded"
    );

    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .wrap_err("Failed to connect to database")?,
    );
    Migrator::up(db.as_ref(), None)
        .await
        .wrap_err("Failed to apply database migrations")?;

    for set in keys::KeySet::ALL {
        keys::active_key(db.as_ref(), set)
            .await
            .wrap_err_with(|| format!("Failed to prepare signing key set '{}'", set.as_str()))?;
    }

    let state = AppState::new(db, config).wrap_err("Failed to build HTTP client")?;
    janitor::spawn(state.clone());

    start_webserver(state).await
}
