use lambda_runtime::{Error, LambdaEvent, service_fn};
use serde_json::Value;
use std::sync::Arc;
use threadrelay::core::config::AppConfig;
use threadrelay::slack::EditTracker;
use threadrelay::worker::{WorkerContext, handler};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    threadrelay::setup_logging();

    let config = AppConfig::from_env().map_err(|e| {
        error!("Config error: {}", e);
        Error::from(e)
    })?;
    let tracker = Arc::new(EditTracker::new(config.tracker_config()));
    let ctx = Arc::new(WorkerContext::new(config, tracker));

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let ctx = Arc::clone(&ctx);
        async move { handler(event, &ctx).await }
    }))
    .await?;
    Ok(())
}
