use serde::{Deserialize, Serialize};

/// How the bot was reached; decides whether the worker answers at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTrigger {
    /// `app_mention` event.
    Mention,
    /// Plain `message` event (DM or thread reply).
    Message,
}

/// A file attached to the triggering Slack message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackFileRef {
    pub name: String,
    pub mimetype: Option<String>,
    pub url_private: Option<String>,
}

/// Queued unit of work handed from the API Lambda to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyTask {
    pub correlation_id: String,
    pub trigger: TaskTrigger,
    pub channel_id: String,
    pub channel_type: Option<String>,
    pub user_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub text: String,
    #[serde(default)]
    pub files: Vec<SlackFileRef>,
}

impl ReplyTask {
    /// The thread every reply for this task lives in.
    #[must_use]
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    #[must_use]
    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
    }
}

/// Identifies one streaming conversation: the channel plus the ts of the
/// bot message that holds the first chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    pub channel: String,
    pub root_ts: String,
}

impl ConversationKey {
    #[must_use]
    pub fn new(channel: impl Into<String>, root_ts: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            root_ts: root_ts.into(),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.channel, self.root_ts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Role-tagged chat message sent to the LLM and echoed into message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}
