//! LLM (`OpenAI`) API client module
//!
//! Streams chat completions over SSE and trims conversations to the model's
//! context window.

use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::sse::{ParseResult, SseParser, StreamEvent};
use crate::core::models::{ChatMessage, ChatRole};
use crate::errors::SlackError;

/// Prompt budget, leaving room for the answer inside a 128k window.
pub const MAX_CONTEXT_TOKENS: usize = 120_000;
const STREAM_TIMEOUT_SECS: u64 = 810;

#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// Drop the oldest non-system messages until the estimated prompt size fits
/// `max_tokens`. Returns the kept messages and their estimated token count.
#[must_use]
pub fn fit_context_window(
    messages: Vec<ChatMessage>,
    max_tokens: usize,
) -> (Vec<ChatMessage>, usize) {
    let mut kept: VecDeque<ChatMessage> = messages.into();
    let mut total: usize = kept.iter().map(|m| estimate_tokens(&m.content)).sum();

    while total > max_tokens {
        let Some(oldest) = kept.iter().position(|m| m.role != ChatRole::System) else {
            break;
        };
        if let Some(removed) = kept.remove(oldest) {
            total = total.saturating_sub(estimate_tokens(&removed.content));
        }
    }

    (kept.into(), total)
}

/// Number of user/assistant turns in `messages`.
#[must_use]
pub fn count_turns(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .count()
}

/// LLM API client for streamed chat completions
pub struct LlmClient {
    api_key: String,
    org_id: Option<String>,
    model_name: String,
    api_base: String,
    temperature: f32,
}

impl LlmClient {
    #[must_use]
    pub fn new(
        api_key: String,
        org_id: Option<String>,
        model_name: String,
        api_base: String,
        temperature: f32,
    ) -> Self {
        Self {
            api_key,
            org_id,
            model_name,
            api_base,
            temperature,
        }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Request body for a streamed chat completion.
    #[must_use]
    pub fn build_request(&self, messages: &[ChatMessage], user: &str) -> Value {
        json!({
            "model": self.model_name,
            "messages": messages,
            "temperature": self.temperature,
            "user": user,
            "stream": true
        })
    }

    /// Start a streamed chat completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or `OpenAI` answers with
    /// a non-success status.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        user: &str,
    ) -> Result<ChatStream, SlackError> {
        #[cfg(feature = "debug-logs")]
        info!("Using ChatGPT streaming prompt:\n{:?}", messages);

        #[cfg(not(feature = "debug-logs"))]
        info!(
            "Starting chat completion stream with {} messages in prompt",
            messages.len()
        );

        let request_body = self.build_request(messages, user);

        let client = Client::builder()
            .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                SlackError::HttpError(format!(
                    "Failed to build OpenAI HTTP client (streaming): {e}"
                ))
            })?;

        let mut request = client
            .post(format!(
                "{}/chat/completions",
                self.api_base.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request_body);

        if let Some(org) = &self.org_id {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SlackError::HttpError(format!("OpenAI streaming request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|e| {
                format!("Failed to read error response body (status {status}): {e}")
            });
            return Err(SlackError::OpenAIError(format!(
                "OpenAI streaming API error (status {status}): {error_text}"
            )));
        }

        Ok(ChatStream::new(Box::pin(response.bytes_stream())))
    }
}

type ByteStream = Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// An in-flight streamed chat completion.
pub struct ChatStream {
    byte_stream: ByteStream,
    parser: SseParser,
    pending_results: VecDeque<ParseResult>,
    utf8_buffer: Vec<u8>,
    seen_labels: HashSet<String>,
    saw_completed_event: bool,
    saw_any_text: bool,
    completed: bool,
}

impl ChatStream {
    pub(crate) fn new(byte_stream: ByteStream) -> Self {
        Self {
            byte_stream,
            parser: SseParser::new(),
            pending_results: VecDeque::new(),
            utf8_buffer: Vec::new(),
            seen_labels: HashSet::new(),
            saw_completed_event: false,
            saw_any_text: false,
            completed: false,
        }
    }

    fn drain_pending_results(&mut self) -> Result<Option<StreamEvent>, SlackError> {
        while let Some(result) = self.pending_results.pop_front() {
            match result {
                ParseResult::Event(event) => match event {
                    StreamEvent::Completed => {
                        self.saw_completed_event = true;
                        return Ok(Some(StreamEvent::Completed));
                    }
                    StreamEvent::Failed(_) | StreamEvent::Error(_) => {
                        self.completed = true;
                        return Ok(Some(event));
                    }
                    StreamEvent::TextDelta(ref delta) => {
                        if !delta.is_empty() {
                            self.saw_any_text = true;
                        }
                        return Ok(Some(event));
                    }
                },
                ParseResult::Done => {
                    self.completed = true;
                    if self.saw_completed_event {
                        return Ok(None);
                    }
                    if self.saw_any_text {
                        warn!("OpenAI stream ended with [DONE] before a finish_reason; treating as completed");
                        self.saw_completed_event = true;
                        return Ok(Some(StreamEvent::Completed));
                    }
                    return Err(SlackError::OpenAIError(
                        "OpenAI stream ended before any content".to_string(),
                    ));
                }
                ParseResult::UnknownEvent(label) => {
                    if self.seen_labels.insert(label.clone()) {
                        debug!(label = %label, "Ignoring OpenAI SSE frame");
                    }
                }
            }
        }

        Ok(None)
    }

    /// Returns the next stream event, or `None` once the stream is over.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, invalid UTF-8, or when the stream
    /// ends without producing any content.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, SlackError> {
        if self.completed {
            return Ok(None);
        }

        loop {
            // Parsed results queue up when one HTTP chunk carries several frames.
            if let Some(event) = self.drain_pending_results()? {
                return Ok(Some(event));
            }
            if self.completed {
                return Ok(None);
            }

            match self.byte_stream.next().await {
                Some(Ok(bytes)) => {
                    // Keep a code point split across chunks buffered until the rest arrives.
                    self.utf8_buffer.extend_from_slice(&bytes);

                    match std::str::from_utf8(&self.utf8_buffer) {
                        Ok(valid_str) => {
                            self.pending_results.extend(self.parser.feed(valid_str));
                            self.utf8_buffer.clear();
                        }
                        Err(e) => {
                            let valid_up_to = e.valid_up_to();
                            if valid_up_to > 0 {
                                let valid_prefix =
                                    String::from_utf8_lossy(&self.utf8_buffer[..valid_up_to])
                                        .into_owned();
                                self.pending_results.extend(self.parser.feed(&valid_prefix));
                                self.utf8_buffer.drain(..valid_up_to);
                            }

                            if e.error_len().is_some() {
                                self.completed = true;
                                return Err(SlackError::OpenAIError(
                                    "Invalid UTF-8 in OpenAI streaming response".to_string(),
                                ));
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    self.completed = true;
                    return Err(SlackError::HttpError(format!(
                        "Error reading streaming response: {e}"
                    )));
                }
                None => {
                    self.completed = true;
                    if self.saw_completed_event {
                        return Ok(None);
                    }
                    if self.saw_any_text {
                        warn!("OpenAI stream closed without a finish_reason; treating as completed");
                        self.saw_completed_event = true;
                        return Ok(Some(StreamEvent::Completed));
                    }
                    return Err(SlackError::OpenAIError(
                        "OpenAI stream closed before any content".to_string(),
                    ));
                }
            }
        }
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Collects all remaining text deltas into a single string.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails.
    pub async fn collect_text(&mut self) -> Result<String, SlackError> {
        let mut collected = String::new();

        while let Some(event) = self.next_event().await? {
            match event {
                StreamEvent::TextDelta(delta) => collected.push_str(&delta),
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

        Ok(collected)
    }
}
