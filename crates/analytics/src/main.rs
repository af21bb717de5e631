//! Analytics service binary.

use analytics::config::AnalyticsConfig;
use analytics::server::{self, AppState};
use analytics::telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config = AnalyticsConfig::from_env();
    config.validate()?;

    info!(
        completion_configured = config.completion.api_key.is_some(),
        scorer_configured = config.detection.worker_endpoint.is_some(),
        history = %config.history.base_url,
        "starting analytics service"
    );

    let state = AppState::new(config);
    server::serve(state).await
}
