//! Streaming delivery of an LLM answer into a Slack thread.
//!
//! Text deltas are accumulated and pushed through the
//! [`StreamingReplyUpdater`] at most once per update interval as progress
//! renders, which carry the updater's progress suffix ([`WORKING_INDICATOR`]
//! for the worker). The final render drops the suffix and hands the
//! conversation over to the tracker's grace window.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ai::{ChatStream, StreamEvent};
use crate::errors::SlackError;
use crate::slack::StreamingReplyUpdater;
use crate::slack::markdown::markdown_to_slack;

/// Appended to in-progress renders so readers can tell the answer is still growing.
pub const WORKING_INDICATOR: &str = " ... :writing_hand:";

/// Source of LLM stream events.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, SlackError>;
}

#[async_trait]
impl EventSource for ChatStream {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, SlackError> {
        ChatStream::next_event(self).await
    }
}

/// Where and how a reply is rendered.
#[derive(Debug, Clone, Copy)]
pub struct ReplyTarget<'a> {
    pub channel: &'a str,
    pub root_ts: &'a str,
    pub metadata: Option<&'a Value>,
    pub update_interval: Duration,
    pub translate_markdown: bool,
}

impl ReplyTarget<'_> {
    fn render(&self, text: &str) -> String {
        if self.translate_markdown {
            markdown_to_slack(text)
        } else {
            text.to_string()
        }
    }
}

/// Consume `events` into `answer`, editing the reply as it grows, then
/// render the final answer.
///
/// `answer` holds whatever text arrived even when this returns an error, so
/// the caller can keep it visible next to a failure notice.
///
/// # Errors
///
/// Returns the first stream or Slack error. A `Failed`/`Error` stream event
/// is reported as `OpenAIError`.
pub async fn stream_reply<E: EventSource + ?Sized>(
    updater: &StreamingReplyUpdater,
    target: &ReplyTarget<'_>,
    events: &mut E,
    answer: &mut String,
) -> Result<String, SlackError> {
    let mut last_render = Instant::now();

    while let Some(event) = events.next_event().await? {
        match event {
            StreamEvent::TextDelta(delta) => {
                if delta.is_empty() {
                    continue;
                }
                answer.push_str(&delta);

                if last_render.elapsed() >= target.update_interval {
                    updater
                        .apply_progress(
                            target.channel,
                            target.root_ts,
                            &target.render(answer),
                            target.metadata,
                        )
                        .await?;
                    last_render = Instant::now();
                }
            }
            StreamEvent::Completed => break,
            StreamEvent::Failed(msg) => {
                return Err(SlackError::OpenAIError(format!(
                    "OpenAI streaming failed: {msg}"
                )));
            }
            StreamEvent::Error(msg) => {
                return Err(SlackError::OpenAIError(format!(
                    "OpenAI streaming error: {msg}"
                )));
            }
        }
    }

    debug!(
        root_ts = target.root_ts,
        bytes = answer.len(),
        "LLM stream finished, rendering final answer"
    );
    updater
        .finish(
            target.channel,
            target.root_ts,
            &target.render(answer),
            target.metadata,
        )
        .await
}

/// Text shown when a reply fails: whatever was received, then a warning line.
#[must_use]
pub fn failure_text(partial: &str, error: &SlackError) -> String {
    let warning = format!(":warning: Failed to reply: {error}");
    if partial.trim().is_empty() {
        warning
    } else {
        format!("{partial}\n\n{warning}")
    }
}

/// Finish the reply with the failure notice. Errors are logged, not returned.
pub async fn finish_with_failure(
    updater: &StreamingReplyUpdater,
    target: &ReplyTarget<'_>,
    partial: &str,
    error: &SlackError,
) {
    let text = failure_text(&target.render(partial), error);
    if let Err(e) = updater
        .finish(target.channel, target.root_ts, &text, target.metadata)
        .await
    {
        warn!(root_ts = target.root_ts, "Failed to post failure notice: {}", e);
    }
}
