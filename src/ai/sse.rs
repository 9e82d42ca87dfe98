//! Server-Sent Events (SSE) parser for `OpenAI` Chat Completions streaming.
//!
//! This module provides an SSE parser that handles:
//! - Frames split across TCP chunks
//! - Multiple frames in one read
//! - Frames that carry nothing we act on (role-only deltas, usage frames)
//!
//! It emits strongly-typed events for `chat.completion.chunk` payloads.

use serde_json::Value;

/// Events emitted by the Chat Completions streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text from `choices[0].delta.content`.
    TextDelta(String),
    /// `finish_reason` was `stop` or `length`.
    Completed,
    /// `finish_reason` reported a refusal such as `content_filter`.
    Failed(String),
    /// The server sent an `error` object mid-stream.
    Error(String),
}

/// Result of parsing an SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete event was parsed.
    Event(StreamEvent),
    /// The frame parsed but carried nothing actionable; holds a short label.
    UnknownEvent(String),
    /// End of stream signal (`[DONE]`).
    Done,
}

/// Stateful SSE parser that buffers incomplete frames across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feeds a chunk of data to the parser and returns all complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParseResult> {
        self.buffer.push_str(chunk);
        let mut results = Vec::new();

        // SSE events are separated by blank lines
        while let Some(event_end) = self.find_event_boundary() {
            let event_text = self.buffer[..event_end].to_string();
            self.buffer = self.buffer[event_end..]
                .trim_start_matches(['\r', '\n'])
                .to_string();

            results.extend(Self::parse_event(&event_text));
        }

        results
    }

    fn find_event_boundary(&self) -> Option<usize> {
        let lf = self.buffer.find("\n\n").map(|pos| pos + 2);
        let crlf = self.buffer.find("\r\n\r\n").map(|pos| pos + 4);
        match (lf, crlf) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn parse_event(event_text: &str) -> Vec<ParseResult> {
        let data_lines: Vec<&str> = event_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with(':'))
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .filter(|data| !data.is_empty())
            .collect();

        if data_lines.is_empty() {
            return Vec::new();
        }

        let data = data_lines.join("\n");
        if data == "[DONE]" {
            return vec![ParseResult::Done];
        }

        Self::parse_json_event(&data)
    }

    /// One chunk can carry both the last piece of content and the
    /// `finish_reason`, so a frame may yield two results.
    fn parse_json_event(data: &str) -> Vec<ParseResult> {
        let Ok(json) = serde_json::from_str::<Value>(data) else {
            return vec![ParseResult::Event(StreamEvent::Error(format!(
                "Malformed stream frame: {data}"
            )))];
        };

        if json.get("error").is_some() {
            return vec![ParseResult::Event(StreamEvent::Error(
                extract_error_message(&json),
            ))];
        }

        let Some(choice) = json
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            let label = json
                .get("object")
                .and_then(Value::as_str)
                .unwrap_or("frame without choices");
            return vec![ParseResult::UnknownEvent(label.to_string())];
        };

        let mut results = Vec::new();

        if let Some(content) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            && !content.is_empty()
        {
            results.push(ParseResult::Event(StreamEvent::TextDelta(
                content.to_string(),
            )));
        }

        match choice.get("finish_reason").and_then(Value::as_str) {
            Some("stop" | "length") => results.push(ParseResult::Event(StreamEvent::Completed)),
            Some(reason) => results.push(ParseResult::Event(StreamEvent::Failed(format!(
                "finish_reason: {reason}"
            )))),
            None => {}
        }

        if results.is_empty() {
            results.push(ParseResult::UnknownEvent("delta".to_string()));
        }
        results
    }

    /// Returns any remaining buffered data (for debugging/testing).
    #[must_use]
    pub fn remaining_buffer(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn extract_error_message(json: &Value) -> String {
    if let Some(error) = json.get("error") {
        if let Some(msg) = error.get("message").and_then(Value::as_str) {
            return msg.to_string();
        }
        if let Some(msg) = error.as_str() {
            return msg.to_string();
        }
    }

    "Unknown error".to_string()
}
