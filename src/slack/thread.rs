//! Turning a Slack thread into an LLM conversation.

use regex::Regex;
use serde_json::{Value, json};

use super::markdown::slack_to_markdown;
use super::sink::ThreadReply;
use crate::core::models::{ChatMessage, ChatRole};

/// `event_type` of the metadata attached to every bot reply.
pub const METADATA_EVENT_TYPE: &str = "chat-gpt-convo";

const MARKDOWN_HINT: &str = "\nYou can use Markdown formatting in your replies.";

#[must_use]
pub fn is_this_app_mentioned(bot_user_id: &str, text: &str) -> bool {
    text.contains(&format!("<@{bot_user_id}>"))
}

/// Remove every `<@BOT>` mention (and the whitespace after it) from `text`.
#[must_use]
pub fn strip_bot_mention(bot_user_id: &str, text: &str) -> String {
    let pattern = format!(r"<@{}>\s*", regex::escape(bot_user_id));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.replace(&format!("<@{bot_user_id}>"), ""),
    }
}

/// System prompt with the bot's user id filled in.
#[must_use]
pub fn build_system_text(template: &str, bot_user_id: &str, translate_markdown: bool) -> String {
    let mut text = template.replace("{bot_user_id}", bot_user_id);
    if translate_markdown {
        text.push_str(MARKDOWN_HINT);
    }
    text
}

/// Message text as the LLM should see it.
#[must_use]
pub fn format_message_content(text: &str, translate_markdown: bool) -> String {
    if translate_markdown {
        slack_to_markdown(text)
    } else {
        text.to_string()
    }
}

/// One thread message plus the text extracted from its attachments.
#[derive(Debug, Clone, Default)]
pub struct ContextMessage {
    pub reply: ThreadReply,
    pub attachments: Vec<String>,
}

impl From<ThreadReply> for ContextMessage {
    fn from(reply: ThreadReply) -> Self {
        Self {
            reply,
            attachments: Vec::new(),
        }
    }
}

/// Build the chat history sent to the LLM.
///
/// The bot's own replies become `assistant` turns. Everyone else's become
/// `user` turns prefixed with `<@author>: ` so the model can tell speakers
/// apart. Bot mentions are stripped and empty messages skipped.
#[must_use]
pub fn build_conversation_messages(
    system_text: &str,
    history: &[ContextMessage],
    bot_user_id: &str,
    translate_markdown: bool,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_text)];

    for item in history {
        let reply = &item.reply;
        let text = strip_bot_mention(bot_user_id, &reply.text);
        let mut content = format_message_content(text.trim(), translate_markdown);
        for attachment in &item.attachments {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(attachment);
        }
        if content.trim().is_empty() {
            continue;
        }

        if reply.user.as_deref() == Some(bot_user_id) {
            messages.push(ChatMessage::assistant(content));
        } else {
            messages.push(ChatMessage::user(format!("<@{}>: {content}", reply.author())));
        }
    }

    messages
}

/// Metadata attached to the bot's replies: only the system messages, so the
/// prompt can be recovered without echoing the whole conversation.
#[must_use]
pub fn build_metadata(messages: &[ChatMessage], user_id: &str) -> Value {
    let system_messages: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .collect();

    json!({
        "event_type": METADATA_EVENT_TYPE,
        "event_payload": {
            "messages": system_messages,
            "user": user_id,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bot_mention_removes_trailing_space() {
        assert_eq!(strip_bot_mention("UBOT", "<@UBOT>  hello <@UBOT>"), "hello ");
        assert_eq!(strip_bot_mention("UBOT", "<@UOTHER> hi"), "<@UOTHER> hi");
    }

    #[test]
    fn test_build_system_text_fills_placeholder() {
        let text = build_system_text("I am <@{bot_user_id}>.", "UBOT", true);
        assert!(text.starts_with("I am <@UBOT>."));
        assert!(text.ends_with(MARKDOWN_HINT));
    }
}
