/// threadrelay - A Slack chatbot that answers mentions, DMs and thread replies
/// with a streamed LLM response.
///
/// This crate implements a two-Lambda architecture:
/// 1. An API Lambda that verifies Slack Events API requests and queues reply tasks
/// 2. A Worker Lambda that reads the thread, streams a chat completion and keeps
///    the bot's reply in Slack in sync with the growing answer
///
/// # Architecture
///
/// The system uses:
/// - AWS Lambda for serverless execution
/// - SQS for task queuing between Lambdas
/// - slack-morphism and the Slack Web API for Slack interactions
/// - Server-sent events from an OpenAI-compatible chat completions endpoint
/// - Tokio for async runtime
///
/// Answers longer than one Slack message are split into chunks
/// ([`slack::chunk`]) posted as consecutive thread replies. The
/// [`slack::EditTracker`] remembers which message holds which chunk so each
/// streamed render edits only what changed.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use threadrelay::core::config::AppConfig;
/// use threadrelay::slack::{EditTracker, SlackClient, StreamingReplyUpdater};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     threadrelay::setup_logging();
///
///     let config = AppConfig::from_env()?;
///     let tracker = Arc::new(EditTracker::new(config.tracker_config()));
///     let slack = Arc::new(SlackClient::new(config.slack_bot_token.clone()));
///     let updater = StreamingReplyUpdater::new(slack, tracker, config.max_message_bytes);
///
///     let root_ts = updater
///         .post_initial("C12345678", "1700000000.000100", &config.loading_text, None)
///         .await?;
///     updater
///         .finish("C12345678", &root_ts, "Hello from threadrelay!", None)
///         .await?;
///     Ok(())
/// }
/// ```
// Module declarations
pub mod ai;
pub mod api;
pub mod core;
pub mod errors;
pub mod files;
pub mod slack;
pub mod worker;

/// Configure structured logging with JSON format for AWS Lambda environments.
///
/// This function sets up tracing-subscriber with a JSON formatter suitable for
/// `CloudWatch` Logs integration. The level filter comes from `RUST_LOG` and
/// defaults to `info`. Calling it more than once is harmless.
///
/// # Example
///
/// ```
/// // Initialize structured logging at the start of your Lambda handler
/// threadrelay::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
