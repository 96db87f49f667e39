use std::sync::Arc;

use tracing::error;

use qaaq_db::Database;
use qaaq_gateway::dispatcher::Dispatcher;

use crate::error::ApiError;
use crate::otp::OtpSender;
use crate::qbot::QbotClient;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub otp: OtpSender,
    pub qbot: QbotClient,
    pub google_maps_api_key: Option<String>,
    pub ais_enabled: bool,
}

/// Run a blocking database call off the async runtime.
pub async fn db_call<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("database task failed"))
        })?
        .map_err(ApiError::from)
}
