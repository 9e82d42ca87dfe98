//! Answer one queued Slack message: gather the thread, ask the LLM, stream
//! the answer back as chunked replies.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::streaming::{self, ReplyTarget, WORKING_INDICATOR};
use crate::ai::client::{MAX_CONTEXT_TOKENS, count_turns};
use crate::ai::{LlmClient, fit_context_window};
use crate::core::config::AppConfig;
use crate::core::models::{ChatMessage, ReplyTask, SlackFileRef, TaskTrigger};
use crate::errors::SlackError;
use crate::files;
use crate::slack::thread::{
    ContextMessage, build_conversation_messages, build_metadata, build_system_text,
    is_this_app_mentioned,
};
use crate::slack::{EditTracker, MessageSink, SlackClient, StreamingReplyUpdater, ThreadReply};

/// Largest attachment the worker will download.
const MAX_FILE_DOWNLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Long-lived state shared by every task a worker instance handles.
pub struct WorkerContext {
    config: AppConfig,
    slack: Arc<SlackClient>,
    llm: LlmClient,
    updater: StreamingReplyUpdater,
    bot_user_id: OnceCell<String>,
}

impl WorkerContext {
    #[must_use]
    pub fn new(config: AppConfig, tracker: Arc<EditTracker>) -> Self {
        let slack = Arc::new(SlackClient::new(config.slack_bot_token.clone()));
        let sink: Arc<dyn MessageSink> = slack.clone();
        let updater = StreamingReplyUpdater::new(sink, tracker, config.max_message_bytes)
            .with_progress_suffix(WORKING_INDICATOR);
        let llm = LlmClient::new(
            config.openai_api_key.clone(),
            config.openai_org_id.clone(),
            config.openai_model.clone(),
            config.openai_api_base.clone(),
            config.openai_temperature,
        );
        Self {
            config,
            slack,
            llm,
            updater,
            bot_user_id: OnceCell::new(),
        }
    }

    async fn bot_user_id(&self) -> Result<&str, SlackError> {
        self.bot_user_id
            .get_or_try_init(|| self.slack.get_bot_user_id())
            .await
            .map(String::as_str)
    }
}

/// Whether the bot should answer `task`.
///
/// `parent` is the thread's root message when the task is a thread reply.
/// A mention inside a thread the bot already owns is left to the plain
/// message event for the same text, so each message is answered once.
#[must_use]
pub fn should_reply(task: &ReplyTask, bot_user_id: &str, parent: Option<&ThreadReply>) -> bool {
    let parent_mentions_bot = parent.is_some_and(|p| is_this_app_mentioned(bot_user_id, &p.text));

    match task.trigger {
        TaskTrigger::Mention => task.thread_ts.is_none() || !parent_mentions_bot,
        TaskTrigger::Message if task.is_direct_message() => true,
        TaskTrigger::Message => task.thread_ts.is_some() && parent_mentions_bot,
    }
}

/// The triggering message as a thread entry, for tasks with no thread to read.
#[must_use]
pub fn task_as_reply(task: &ReplyTask) -> ThreadReply {
    ThreadReply {
        ts: task.ts.clone(),
        user: Some(task.user_id.clone()),
        username: None,
        bot_id: None,
        text: task.text.clone(),
        files: task.files.clone(),
    }
}

/// Text posted when even the newest message alone exceeds the context window.
#[must_use]
pub fn context_overflow_text(num_tokens: usize, max_tokens: usize) -> String {
    format!(":warning: The previous message is too long ({num_tokens}/{max_tokens} prompt tokens).")
}

/// Handle one task end to end.
///
/// # Errors
///
/// Returns an error only when nothing could be posted to Slack. Failures after
/// the placeholder exists are reported in the thread instead.
pub async fn process_task(ctx: &WorkerContext, task: &ReplyTask) -> Result<(), SlackError> {
    let bot_user_id = ctx.bot_user_id().await?.to_string();
    let channel = task.channel_id.as_str();

    let thread = match task.thread_ts.as_deref() {
        Some(thread_ts) => ctx.slack.list_replies(channel, thread_ts).await?,
        None => vec![task_as_reply(task)],
    };

    let parent = match task.thread_ts.as_deref() {
        Some(thread_ts) => match thread.iter().find(|m| m.ts == thread_ts) {
            Some(found) => Some(found.clone()),
            None => ctx.slack.find_parent_message(channel, thread_ts).await?,
        },
        None => None,
    };

    if !should_reply(task, &bot_user_id, parent.as_ref()) {
        info!(
            correlation_id = %task.correlation_id,
            trigger = ?task.trigger,
            "Message is not addressed to the bot, skipping"
        );
        return Ok(());
    }

    let mut history = Vec::with_capacity(thread.len());
    for reply in thread {
        let attachments = if ctx.config.file_access_enabled && reply.bot_id.is_none() {
            collect_attachments(ctx, &reply.files).await
        } else {
            Vec::new()
        };
        history.push(ContextMessage { reply, attachments });
    }

    let system_text = build_system_text(
        &ctx.config.system_text,
        &bot_user_id,
        ctx.config.translate_markdown,
    );
    let messages = build_conversation_messages(
        &system_text,
        &history,
        &bot_user_id,
        ctx.config.translate_markdown,
    );
    let metadata = build_metadata(&messages, &task.user_id);

    let root_ts = ctx
        .updater
        .post_initial(
            channel,
            task.reply_thread_ts(),
            &ctx.config.loading_text,
            Some(&metadata),
        )
        .await?;

    let target = ReplyTarget {
        channel,
        root_ts: &root_ts,
        metadata: Some(&metadata),
        update_interval: ctx.config.stream_update_interval(),
        translate_markdown: ctx.config.translate_markdown,
    };

    let (messages, num_tokens) = fit_context_window(messages, MAX_CONTEXT_TOKENS);
    if count_turns(&messages) == 0 {
        ctx.updater
            .finish(
                channel,
                &root_ts,
                &context_overflow_text(num_tokens, MAX_CONTEXT_TOKENS),
                Some(&metadata),
            )
            .await?;
        return Ok(());
    }

    let mut answer = String::new();
    if let Err(e) = answer_with_llm(ctx, &target, &messages, &task.user_id, &mut answer).await {
        warn!(
            correlation_id = %task.correlation_id,
            root_ts = %root_ts,
            "Reply failed: {}",
            e
        );
        streaming::finish_with_failure(&ctx.updater, &target, &answer, &e).await;
    }
    Ok(())
}

async fn answer_with_llm(
    ctx: &WorkerContext,
    target: &ReplyTarget<'_>,
    messages: &[ChatMessage],
    user_id: &str,
    answer: &mut String,
) -> Result<String, SlackError> {
    let mut stream = ctx.llm.stream_chat(messages, user_id).await?;
    streaming::stream_reply(&ctx.updater, target, &mut stream, answer).await
}

/// Download and extract every readable attachment. Failures are logged and
/// the file skipped.
async fn collect_attachments(ctx: &WorkerContext, files: &[SlackFileRef]) -> Vec<String> {
    let mut out = Vec::new();
    for file in files {
        let Some(url) = file.url_private.as_deref() else {
            continue;
        };
        if files::detect_kind(&file.name, file.mimetype.as_deref()).is_none() {
            continue;
        }
        match ctx
            .slack
            .download_file_content(url, MAX_FILE_DOWNLOAD_BYTES)
            .await
        {
            Ok(bytes) => {
                if let Some(text) = files::extract(
                    &bytes,
                    &file.name,
                    file.mimetype.as_deref(),
                    ctx.config.file_content_max_chars,
                ) {
                    out.push(text);
                }
            }
            Err(e) => warn!(filename = %file.name, "Skipping attachment: {}", e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(trigger: TaskTrigger, channel_type: Option<&str>, thread_ts: Option<&str>) -> ReplyTask {
        ReplyTask {
            correlation_id: "c".to_string(),
            trigger,
            channel_id: "C1".to_string(),
            channel_type: channel_type.map(str::to_string),
            user_id: "U1".to_string(),
            ts: "2.0".to_string(),
            thread_ts: thread_ts.map(str::to_string),
            text: "<@UBOT> hi".to_string(),
            files: Vec::new(),
        }
    }

    fn parent(text: &str) -> ThreadReply {
        ThreadReply {
            ts: "1.0".to_string(),
            text: text.to_string(),
            ..ThreadReply::default()
        }
    }

    #[test]
    fn test_top_level_mention_is_answered() {
        assert!(should_reply(&task(TaskTrigger::Mention, Some("channel"), None), "UBOT", None));
    }

    #[test]
    fn test_mention_in_bot_thread_is_left_to_message_event() {
        let t = task(TaskTrigger::Mention, Some("channel"), Some("1.0"));
        assert!(!should_reply(&t, "UBOT", Some(&parent("<@UBOT> start"))));
        assert!(should_reply(&t, "UBOT", Some(&parent("unrelated"))));
    }

    #[test]
    fn test_thread_message_needs_bot_parent() {
        let t = task(TaskTrigger::Message, Some("channel"), Some("1.0"));
        assert!(should_reply(&t, "UBOT", Some(&parent("<@UBOT> start"))));
        assert!(!should_reply(&t, "UBOT", Some(&parent("unrelated"))));
        assert!(!should_reply(&t, "UBOT", None));
    }

    #[test]
    fn test_direct_messages_are_always_answered() {
        assert!(should_reply(&task(TaskTrigger::Message, Some("im"), None), "UBOT", None));
        assert!(should_reply(
            &task(TaskTrigger::Message, Some("im"), Some("1.0")),
            "UBOT",
            Some(&parent("no mention"))
        ));
    }

    #[test]
    fn test_context_overflow_text() {
        assert_eq!(
            context_overflow_text(130_000, 120_000),
            ":warning: The previous message is too long (130000/120000 prompt tokens)."
        );
    }
}
