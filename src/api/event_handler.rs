//! Handler for Slack Events API callbacks.
//!
//! This module processes `event_callback` payloads including:
//! - `app_mention` - the bot was mentioned in a channel or thread
//! - `message` - a DM to the bot, or a reply in a thread
//!
//! Accepted events are turned into a [`ReplyTask`] and queued for the worker,
//! which decides whether the bot actually answers.

use serde_json::{Value, json};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::helpers::{ok_empty, v_str};
use super::sqs;
use crate::core::config::AppConfig;
use crate::core::models::{ReplyTask, SlackFileRef, TaskTrigger};

/// Message subtypes that still carry a user's message.
const ACCEPTED_SUBTYPES: &[&str] = &["file_share", "thread_broadcast"];

fn parse_files(event: &Value) -> Vec<SlackFileRef> {
    event
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|f| {
                    Some(SlackFileRef {
                        name: f.get("name").and_then(Value::as_str)?.to_string(),
                        mimetype: f.get("mimetype").and_then(Value::as_str).map(str::to_string),
                        url_private: f
                            .get("url_private")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build the queued task for a Slack event, or `None` when the event is not
/// one the bot answers.
///
/// Messages from bots (including this one) and edits/deletions are dropped.
/// Plain channel messages outside a thread are dropped too; only mentions
/// start a conversation there.
#[must_use]
pub fn task_from_event(event: &Value, correlation_id: &str) -> Option<ReplyTask> {
    let trigger = match event.get("type").and_then(Value::as_str)? {
        "app_mention" => TaskTrigger::Mention,
        "message" => TaskTrigger::Message,
        _ => return None,
    };

    if event.get("bot_id").is_some() {
        debug!("Ignoring bot message");
        return None;
    }
    if let Some(subtype) = event.get("subtype").and_then(Value::as_str)
        && !ACCEPTED_SUBTYPES.contains(&subtype)
    {
        debug!(subtype, "Ignoring message subtype");
        return None;
    }

    let channel_id = v_str(event, &["channel"])?;
    let user_id = v_str(event, &["user"])?;
    let ts = v_str(event, &["ts"])?;
    let thread_ts = v_str(event, &["thread_ts"]).map(str::to_string);
    let channel_type = v_str(event, &["channel_type"]).map(str::to_string);

    if trigger == TaskTrigger::Message
        && channel_type.as_deref() != Some("im")
        && thread_ts.is_none()
    {
        return None;
    }

    Some(ReplyTask {
        correlation_id: correlation_id.to_string(),
        trigger,
        channel_id: channel_id.to_string(),
        channel_type,
        user_id: user_id.to_string(),
        ts: ts.to_string(),
        thread_ts,
        text: v_str(event, &["text"]).unwrap_or_default().to_string(),
        files: parse_files(event),
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Handle a JSON Events API payload from Slack.
///
/// Always acknowledges with 200 so Slack does not retry; queueing failures
/// are logged.
pub async fn handle_event_callback(config: &AppConfig, json_body: &Value) -> Value {
    match json_body.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = json_body
                .get("challenge")
                .and_then(Value::as_str)
                .unwrap_or("");
            return json!({
                "statusCode": 200,
                "body": challenge
            });
        }
        Some("event_callback") => {}
        _ => return ok_empty(),
    }

    let Some(event) = json_body.get("event") else {
        return ok_empty();
    };

    let correlation_id = Uuid::new_v4().to_string();
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
    info!(event_type = %event_type, correlation_id = %correlation_id, "Processing event callback");

    let Some(task) = task_from_event(event, &correlation_id) else {
        return ok_empty();
    };

    if let Err(e) = sqs::send_to_sqs(&task, config).await {
        error!(correlation_id = %correlation_id, "enqueue failed: {}", e);
    }

    ok_empty()
}
