#![allow(clippy::missing_errors_doc)]
use lambda_runtime::{Error, LambdaEvent};
use serde_json::Value;
use tracing::{error, info};

use super::reply::{WorkerContext, process_task};
use crate::core::models::ReplyTask;

/// Pull every queued [`ReplyTask`] out of an SQS event.
///
/// Records that cannot be parsed are logged and dropped so one bad message
/// cannot block the rest of the batch.
#[must_use]
pub fn tasks_from_sqs_event(payload: &Value) -> Vec<ReplyTask> {
    let Some(records) = payload.get("Records").and_then(Value::as_array) else {
        error!("SQS event has no Records array");
        return Vec::new();
    };

    records
        .iter()
        .filter_map(|record| {
            let Some(body) = record.get("body").and_then(Value::as_str) else {
                error!("Failed to extract SQS message body");
                return None;
            };
            serde_json::from_str::<ReplyTask>(body)
                .map_err(|e| error!("Failed to parse SQS message body into ReplyTask: {}", e))
                .ok()
        })
        .collect()
}

/// Lambda handler for the Worker entrypoint. Parses the SQS batch and replies
/// to each task in order.
pub async fn function_handler(event: LambdaEvent<Value>, ctx: &WorkerContext) -> Result<(), Error> {
    let tasks = tasks_from_sqs_event(&event.payload);
    info!("Worker Lambda received {} reply task(s)", tasks.len());

    for task in &tasks {
        info!(
            correlation_id = %task.correlation_id,
            channel = %task.channel_id,
            "Processing reply task"
        );
        if let Err(e) = process_task(ctx, task).await {
            error!(
                correlation_id = %task.correlation_id,
                "Failed to process reply task: {}",
                e
            );
        }
    }

    Ok(())
}

pub use self::function_handler as handler;
