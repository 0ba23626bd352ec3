use lambda_http::{run, service_fn, Error};
use stack_api_lambda::function_handler;
use stack_shared::{config::Config, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // CloudWatch stamps each line already
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        table = %config.table_name,
        store = ?config.store,
        identity = ?config.identity_source,
        "Starting todo API"
    );

    let state = Arc::new(AppState::from_config(config).await);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { function_handler(event, state).await }
    }))
    .await
}
