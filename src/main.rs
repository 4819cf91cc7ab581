mod analysis;
mod app;
mod auth;
mod config;
mod db;
mod error;
mod images;
mod meals;
mod state;
mod storage;

use crate::{app::build_app, config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "nutriveda=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let key_prefix: String = config.vision.api_key.chars().take(4).collect();
    tracing::info!(
        model = %config.vision.model,
        api_key = %format!("{key_prefix}…"),
        "vision model configured"
    );

    let state = AppState::init(config.clone()).await?;
    let app = build_app(state);
    app::serve(app, &config).await
}
