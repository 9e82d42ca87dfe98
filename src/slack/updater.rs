//! Streams a growing LLM answer into Slack by editing messages in place.
//!
//! Each call receives the full text rendered so far, not a delta. The text
//! is chunked to Slack's message size, and the chunks are reconciled against
//! the message ids already holding this conversation: changed chunks are
//! edited, new chunks are posted as thread replies. Calls for the same
//! conversation are serialised through its tracker guard, so Slack never sees
//! two edits for one conversation in flight at once.
//!
//! Progress renders carry a suffix (the worker's "still typing" marker) on
//! their last chunk. Its bytes are kept out of every render's chunk budget,
//! so a progress render and the final render of the same text split alike.
//! Messages left over when a render needs fewer chunks than were posted are
//! blanked to [`TRAILING_PLACEHOLDER`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::chunker;
use super::sink::MessageSink;
use super::tracker::{ChunkLedger, EditTracker};
use crate::core::models::ConversationKey;
use crate::errors::SlackError;

/// Sent instead of empty text, which Slack rejects.
pub const PROCESSING_PLACEHOLDER: &str = ":hourglass_flowing_sand: Processing...";

/// Text of a posted message the reply no longer reaches.
pub const TRAILING_PLACEHOLDER: &str = "_(end of reply)_";

#[must_use]
fn non_empty(text: &str) -> &str {
    if text.trim().is_empty() {
        PROCESSING_PLACEHOLDER
    } else {
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Progress,
    Update,
    Final,
}

pub struct StreamingReplyUpdater {
    sink: Arc<dyn MessageSink>,
    tracker: Arc<EditTracker>,
    max_message_bytes: usize,
    progress_suffix: String,
}

impl StreamingReplyUpdater {
    #[must_use]
    pub fn new(
        sink: Arc<dyn MessageSink>,
        tracker: Arc<EditTracker>,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            sink,
            tracker,
            max_message_bytes,
            progress_suffix: String::new(),
        }
    }

    /// Suffix appended to the last chunk of [`apply_progress`](Self::apply_progress)
    /// renders.
    #[must_use]
    pub fn with_progress_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.progress_suffix = suffix.into();
        self
    }

    fn chunk_budget(&self) -> usize {
        self.max_message_bytes
            .saturating_sub(self.progress_suffix.len())
            .max(1)
    }

    /// Post the placeholder reply into `thread_ts` and start tracking it as
    /// chunk 0 of a new conversation.
    ///
    /// # Errors
    ///
    /// Returns the sink's error when the post fails; nothing is tracked then.
    pub async fn post_initial(
        &self,
        channel: &str,
        thread_ts: &str,
        loading_text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        let text = non_empty(loading_text);
        let ts = self
            .sink
            .post_message(channel, Some(thread_ts), text, metadata)
            .await?;

        self.tracker.register(
            ConversationKey::new(channel, ts.as_str()),
            Some(thread_ts.to_string()),
            Some(text.to_string()),
        );
        info!(channel, thread_ts, ts = %ts, "Posted placeholder reply");
        Ok(ts)
    }

    /// Render `full_text` into the conversation rooted at `root_ts`.
    ///
    /// Returns the `ts` of the message holding the last chunk.
    ///
    /// # Errors
    ///
    /// Propagates the first failed post/update. Chunks already delivered in
    /// this call stay recorded; the failed one is retried by the next call.
    pub async fn apply_update(
        &self,
        channel: &str,
        root_ts: &str,
        full_text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        self.render(channel, root_ts, full_text, metadata, Pass::Update)
            .await
    }

    /// Like [`apply_update`](Self::apply_update), with the progress suffix
    /// appended to the last chunk.
    ///
    /// # Errors
    ///
    /// Same as [`apply_update`](Self::apply_update).
    pub async fn apply_progress(
        &self,
        channel: &str,
        root_ts: &str,
        full_text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        self.render(channel, root_ts, full_text, metadata, Pass::Progress)
            .await
    }

    /// Like [`apply_update`](Self::apply_update) for the final render. On
    /// success the tracker entry is kept only for the grace window.
    ///
    /// # Errors
    ///
    /// Same as [`apply_update`](Self::apply_update).
    pub async fn finish(
        &self,
        channel: &str,
        root_ts: &str,
        full_text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        self.render(channel, root_ts, full_text, metadata, Pass::Final)
            .await
    }

    async fn render(
        &self,
        channel: &str,
        root_ts: &str,
        full_text: &str,
        metadata: Option<&Value>,
        pass: Pass,
    ) -> Result<String, SlackError> {
        let text = non_empty(full_text);
        let mut chunks = chunker::chunk(text, self.chunk_budget());
        if pass == Pass::Progress {
            if let Some(last) = chunks.last_mut() {
                last.push_str(&self.progress_suffix);
            }
        }
        let key = ConversationKey::new(channel, root_ts);

        let mut state = self.tracker.get_or_create(&key);
        let result = loop {
            let mut ledger = state.lock().await;
            // The entry may have been evicted or replaced before we got the lock.
            if let Some(current) = self.tracker.reattach(&state) {
                drop(ledger);
                state = current;
                continue;
            }
            break self.reconcile(&key, &mut ledger, &chunks, metadata).await;
        };
        self.tracker.touch(&key);

        let ts = result?;
        if pass == Pass::Final {
            self.tracker.mark_completed(&key);
            debug!(conversation = %key, chunks = chunks.len(), "Finished streamed reply");
        }
        Ok(ts)
    }

    async fn reconcile(
        &self,
        key: &ConversationKey,
        ledger: &mut ChunkLedger,
        chunks: &[String],
        metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        let thread_ts = ledger
            .thread_ts()
            .unwrap_or(key.root_ts.as_str())
            .to_string();
        let mut last_ts = key.root_ts.clone();

        // Ascending order: a message is finalised before the next one exists.
        for (index, chunk) in chunks.iter().enumerate() {
            if let Some(ts) = ledger.message_ids().get(index).cloned() {
                if ledger.rendered(index) != Some(chunk.as_str()) {
                    self.sink
                        .update_message(&key.channel, &ts, chunk, metadata)
                        .await?;
                    ledger.record_render(index, chunk);
                }
                last_ts = ts;
            } else {
                let ts = self
                    .sink
                    .post_message(&key.channel, Some(&thread_ts), chunk, metadata)
                    .await?;
                debug!(conversation = %key, index, ts = %ts, "Posted overflow chunk");
                ledger.push_message(ts.clone(), chunk.clone());
                last_ts = ts;
            }
        }

        if ledger.len() > chunks.len() {
            warn!(
                conversation = %key,
                tracked = ledger.len(),
                rendered = chunks.len(),
                "Reply shrank below the number of posted chunks"
            );
            for index in chunks.len()..ledger.len() {
                if ledger.rendered(index) == Some(TRAILING_PLACEHOLDER) {
                    continue;
                }
                let ts = ledger.message_ids()[index].clone();
                self.sink
                    .update_message(&key.channel, &ts, TRAILING_PLACEHOLDER, metadata)
                    .await?;
                ledger.record_render(index, TRAILING_PLACEHOLDER);
            }
        }

        Ok(last_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_replaced_with_placeholder() {
        assert_eq!(non_empty(""), PROCESSING_PLACEHOLDER);
        assert_eq!(non_empty(" \n\t"), PROCESSING_PLACEHOLDER);
        assert_eq!(non_empty("hi"), "hi");
    }
}
