//! API Lambda handler - validates Slack requests and routes Events API payloads.
//!
//! This module handles:
//! - Request validation (headers, body, signature)
//! - Slack retry deliveries (acknowledged without re-queueing)
//! - Event callbacks (delegated to `event_handler` module)

use super::{event_handler, helpers, signature};
use crate::core::config::AppConfig;
use lambda_runtime::{Error, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

pub use self::function_handler as handler;

/// Lambda handler for the API entrypoint.
///
/// # Errors
///
/// Returns an error only when configuration cannot be loaded. Malformed or
/// unsigned requests get an error response payload instead.
#[tracing::instrument(level = "info", skip(event))]
pub async fn function_handler(
    event: LambdaEvent<serde_json::Value>,
) -> Result<impl Serialize, Error> {
    let config = AppConfig::from_env().map_err(|e| {
        error!("Config error: {}", e);
        Error::from(e)
    })?;

    // ========================================================================
    // Extract and validate headers
    // ========================================================================

    let Some(headers) = event.payload.get("headers") else {
        error!("Request missing headers");
        return Ok(helpers::err_response(400, "Missing headers"));
    };

    let body = match extract_body(&event.payload) {
        Ok(b) => b,
        Err(response) => return Ok(response),
    };

    // ========================================================================
    // Verify Slack signature
    // ========================================================================

    if let Err(response) = verify_signature(body, headers, &config.slack_signing_secret) {
        return Ok(response);
    }

    info!("Slack signature verified successfully");

    // Slack re-delivers events it thinks timed out; the first delivery is already queued.
    if let Some(retry_num) = helpers::get_header_value(headers, "X-Slack-Retry-Num") {
        let reason = helpers::get_header_value(headers, "X-Slack-Retry-Reason").unwrap_or("");
        warn!(retry_num, reason, "Acknowledging Slack retry without processing");
        return Ok(helpers::ok_empty());
    }

    // ========================================================================
    // Route Events API payloads
    // ========================================================================

    match serde_json::from_str::<Value>(body) {
        Ok(json_body) => Ok(event_handler::handle_event_callback(&config, &json_body).await),
        Err(e) => {
            error!("Failed to parse Slack event: {}", e);
            Ok(helpers::err_response(400, &format!("Parse Error: {e}")))
        }
    }
}

// ============================================================================
// Request Validation Helpers
// ============================================================================

fn extract_body(payload: &Value) -> Result<&str, Value> {
    let Some(body) = payload.get("body") else {
        error!("Request missing body");
        return Err(helpers::err_response(400, "Missing body"));
    };

    let Some(body_str) = body.as_str() else {
        error!("Request body is not a string");
        return Err(helpers::err_response(400, "Invalid body format"));
    };

    Ok(body_str)
}

fn verify_signature(body: &str, headers: &Value, signing_secret: &str) -> Result<(), Value> {
    let Some(sig) = helpers::get_header_value(headers, "X-Slack-Signature") else {
        error!("Missing X-Slack-Signature header");
        return Err(helpers::err_response(
            401,
            "Missing X-Slack-Signature header",
        ));
    };

    let Some(timestamp) = helpers::get_header_value(headers, "X-Slack-Request-Timestamp") else {
        error!("Missing X-Slack-Request-Timestamp header");
        return Err(helpers::err_response(
            401,
            "Missing X-Slack-Request-Timestamp header",
        ));
    };

    if !signature::verify_slack_signature(body, timestamp, sig, signing_secret) {
        error!("Slack signature verification failed");
        return Err(helpers::err_response(401, "Invalid Slack signature"));
    }

    Ok(())
}
