//! The slice of the Slack Web API the reply pipeline depends on.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::models::SlackFileRef;
use crate::errors::SlackError;

/// One message returned by `conversations.replies`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadReply {
    pub ts: String,
    pub user: Option<String>,
    pub username: Option<String>,
    pub bot_id: Option<String>,
    pub text: String,
    pub files: Vec<SlackFileRef>,
}

impl ThreadReply {
    /// Display handle used when the reply is replayed to the LLM.
    #[must_use]
    pub fn author(&self) -> &str {
        self.user
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("unknown")
    }
}

/// Post/update/list operations on Slack messages.
///
/// Implementations own transport concerns (auth, retries, timeouts). Callers
/// only see the resulting message `ts` or an error.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Post `text` to `channel`, as a thread reply when `thread_ts` is given.
    /// Returns the new message's `ts`.
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError>;

    /// Replace the text of message `ts`. Returns the message's `ts`.
    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError>;

    /// All messages in the thread rooted at `thread_ts`, oldest first.
    async fn list_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadReply>, SlackError>;
}
