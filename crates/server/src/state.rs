//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    /// Outbound client for back-channel logout notifications
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.oauth2.backchannel_logout_timeout))
            .build()?;
        Ok(Self { db, config, http })
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}
