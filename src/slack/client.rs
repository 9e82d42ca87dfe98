//! Slack API client module
//!
//! Encapsulates the Slack Web API calls the bot makes, with retry logic and
//! error handling. Message writes go through `chat.postMessage` and
//! `chat.update`; thread reads through `conversations.replies` and
//! `conversations.history`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use slack_morphism::hyper_tokio::{SlackClientHyperConnector, SlackHyperClient};
use slack_morphism::{SlackApiToken, SlackApiTokenValue};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

use super::sink::{MessageSink, ThreadReply};
use crate::core::models::SlackFileRef;
use crate::errors::SlackError;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Attempts made when Slack answers HTTP 429 before giving up.
const MAX_RATE_LIMIT_RETRIES: u32 = 5;

// Build the Slack client connector safely without panicking.
// If connector construction fails, store None and surface a SlackError at call sites.
static SLACK_CLIENT: std::sync::LazyLock<Option<SlackHyperClient>> =
    std::sync::LazyLock::new(|| match SlackClientHyperConnector::new() {
        Ok(connector) => Some(SlackHyperClient::new(connector)),
        Err(e) => {
            warn!("Failed to create Slack HTTP connector: {}", e);
            None
        }
    });

static HTTP_CLIENT: std::sync::LazyLock<Client> = std::sync::LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
});

// ============================================================================
// Payload builders
// ============================================================================

/// Build the JSON payload for `chat.postMessage`.
#[must_use]
pub fn build_post_message_payload(
    channel: &str,
    thread_ts: Option<&str>,
    text: &str,
    metadata: Option<&Value>,
) -> Value {
    let mut payload = json!({
        "channel": channel,
        "text": text,
    });

    if let Some(ts) = thread_ts {
        payload["thread_ts"] = Value::String(ts.to_string());
    }

    if let Some(m) = metadata {
        payload["metadata"] = m.clone();
    }

    payload
}

/// Build the JSON payload for `chat.update`.
#[must_use]
pub fn build_update_message_payload(
    channel: &str,
    ts: &str,
    text: &str,
    metadata: Option<&Value>,
) -> Value {
    let mut payload = json!({
        "channel": channel,
        "ts": ts,
        "text": text,
    });

    if let Some(m) = metadata {
        payload["metadata"] = m.clone();
    }

    payload
}

/// Map one entry of a `messages` array to a [`ThreadReply`].
#[must_use]
pub fn parse_thread_reply(msg: &Value) -> ThreadReply {
    let str_field = |name: &str| msg.get(name).and_then(Value::as_str).map(str::to_string);

    let files = msg
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .map(|f| SlackFileRef {
                    name: f
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    mimetype: f.get("mimetype").and_then(Value::as_str).map(str::to_string),
                    url_private: f
                        .get("url_private")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    ThreadReply {
        ts: str_field("ts").unwrap_or_default(),
        user: str_field("user"),
        username: str_field("username"),
        bot_id: str_field("bot_id"),
        text: str_field("text").unwrap_or_default(),
        files,
    }
}

fn is_retryable(err: &SlackError) -> bool {
    matches!(
        err,
        SlackError::TransportError(_) | SlackError::ConnectionError(_)
    )
}

/// Failures that leave no doubt the request was never delivered.
fn is_unsent(err: &SlackError) -> bool {
    matches!(err, SlackError::ConnectionError(_))
}

fn request_error(method: &str, e: &reqwest::Error) -> SlackError {
    if e.is_connect() {
        SlackError::ConnectionError(format!("{method}: {e}"))
    } else {
        SlackError::TransportError(format!("{method} request failed: {e}"))
    }
}

/// Slack API client with retry logic and error handling
pub struct SlackClient {
    token: SlackApiToken,
}

impl SlackClient {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            token: SlackApiToken::new(SlackApiTokenValue::new(token)),
        }
    }

    /// Retry transport failures only; Slack-level errors are final.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T, SlackError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, SlackError>> + Send,
        T: Send,
    {
        self.with_retry_if(operation, is_retryable).await
    }

    async fn with_retry_if<F, Fut, T>(
        &self,
        operation: F,
        condition: fn(&SlackError) -> bool,
    ) -> Result<T, SlackError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, SlackError>> + Send,
        T: Send,
    {
        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);

        RetryIf::spawn(strategy, operation, condition).await
    }

    /// POST a JSON body to a Web API method and return the decoded body.
    ///
    /// HTTP 429 is retried after `Retry-After`. Any other non-success status
    /// or an unreadable body is a `TransportError`; `ok: false` is an
    /// `ApiError` carrying Slack's error code.
    async fn call_json_api(&self, method: &str, payload: &Value) -> Result<Value, SlackError> {
        let url = format!("{SLACK_API_BASE}/{method}");
        let mut attempts = 0;

        loop {
            attempts += 1;

            let resp = HTTP_CLIENT
                .post(&url)
                .bearer_auth(&self.token.token_value.0)
                .json(payload)
                .send()
                .await
                .map_err(|e| request_error(method, &e))?;

            if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    return Err(SlackError::TransportError(format!(
                        "{method} rate limited after {MAX_RATE_LIMIT_RETRIES} attempts"
                    )));
                }
                let retry_after = Self::parse_retry_after(&resp);
                warn!(
                    "Slack rate limited {} (429), waiting {}s before retry (attempt {}/{})",
                    method,
                    retry_after.as_secs(),
                    attempts,
                    MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(retry_after).await;
                continue;
            }

            return Self::decode_body(method, resp).await;
        }
    }

    /// Form-encoded variant for the read methods, which do not accept JSON.
    async fn call_form_api(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<Value, SlackError> {
        let resp = HTTP_CLIENT
            .post(format!("{SLACK_API_BASE}/{method}"))
            .bearer_auth(&self.token.token_value.0)
            .form(params)
            .send()
            .await
            .map_err(|e| request_error(method, &e))?;

        Self::decode_body(method, resp).await
    }

    async fn decode_body(method: &str, resp: reqwest::Response) -> Result<Value, SlackError> {
        if !resp.status().is_success() {
            return Err(SlackError::TransportError(format!(
                "{method} HTTP {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| SlackError::TransportError(format!("{method} JSON parse error: {e}")))?;

        if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            return Err(SlackError::ApiError(format!(
                "{method} error: {}",
                body.get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
            )));
        }

        Ok(body)
    }

    /// Parse the `Retry-After` header from an HTTP 429 response.
    ///
    /// Falls back to a default of 1 second if the header is missing or invalid.
    fn parse_retry_after(resp: &reqwest::Response) -> Duration {
        resp.headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map_or(Duration::from_secs(1), Duration::from_secs)
    }

    /// # Errors
    ///
    /// Returns an error if the Slack HTTP connector is unavailable or `auth.test` fails.
    pub async fn get_bot_user_id(&self) -> Result<String, SlackError> {
        self.with_retry(|| async {
            let session = SLACK_CLIENT
                .as_ref()
                .ok_or_else(|| {
                    SlackError::TransportError("Slack HTTP connector not initialized".to_string())
                })?
                .open_session(&self.token);

            let test_resp = session.auth_test().await?;

            Ok(test_resp.user_id.0)
        })
        .await
    }

    /// Fetch the message a thread hangs off.
    ///
    /// # Errors
    ///
    /// Returns an error if `conversations.history` fails.
    pub async fn find_parent_message(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Option<ThreadReply>, SlackError> {
        let params = [
            ("channel", channel_id.to_string()),
            ("latest", thread_ts.to_string()),
            ("limit", "1".to_string()),
            ("inclusive", "true".to_string()),
        ];

        let body = self
            .with_retry(|| self.call_form_api("conversations.history", &params))
            .await?;

        Ok(body
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.first())
            .map(parse_thread_reply))
    }

    /// Download a private Slack file with bot auth, capped at `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error on HTTP failure, when Slack serves its HTML login page
    /// instead of the file (missing `files:read`), or when the file is too big.
    pub async fn download_file_content(
        &self,
        url: &str,
        max_bytes: usize,
    ) -> Result<Vec<u8>, SlackError> {
        let resp = HTTP_CLIENT
            .get(url)
            .bearer_auth(&self.token.token_value.0)
            .send()
            .await
            .map_err(|e| SlackError::HttpError(format!("Failed to download Slack file: {e}")))?;

        if !resp.status().is_success() {
            return Err(SlackError::ApiError(format!(
                "Request to {url} failed with status code {}",
                resp.status()
            )));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if content_type.starts_with("text/html") {
            return Err(SlackError::ApiError(format!(
                "You don't have the permission to download this file: {url}"
            )));
        }

        let mut out: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| {
                SlackError::HttpError(format!("Error reading Slack file download stream: {e}"))
            })?;
            if out.len().saturating_add(chunk.len()) > max_bytes {
                return Err(SlackError::GeneralError(format!(
                    "Slack file too large to read (exceeded {max_bytes}B cap)"
                )));
            }
            out.extend_from_slice(&chunk);
        }

        Ok(out)
    }
}

#[async_trait]
impl MessageSink for SlackClient {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        let payload = build_post_message_payload(channel, thread_ts, text, metadata);

        // A retried post that had already landed would duplicate the message.
        let body = self
            .with_retry_if(|| self.call_json_api("chat.postMessage", &payload), is_unsent)
            .await?;

        body.get("ts")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SlackError::TransportError("chat.postMessage: no ts in response".to_string())
            })
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        let payload = build_update_message_payload(channel, ts, text, metadata);

        let body = self
            .with_retry(|| self.call_json_api("chat.update", &payload))
            .await?;

        Ok(body
            .get("ts")
            .and_then(Value::as_str)
            .unwrap_or(ts)
            .to_string())
    }

    async fn list_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadReply>, SlackError> {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("channel", channel.to_string()),
                ("ts", thread_ts.to_string()),
                ("limit", "1000".to_string()),
                ("include_all_metadata", "true".to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let body = self
                .with_retry(|| self.call_form_api("conversations.replies", &params))
                .await?;

            if let Some(messages) = body.get("messages").and_then(Value::as_array) {
                replies.extend(messages.iter().map(parse_thread_reply));
            }

            cursor = body
                .get("response_metadata")
                .and_then(|m| m.get("next_cursor"))
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);

            if cursor.is_none() {
                break;
            }
            debug!(channel, thread_ts, "Fetching next page of thread replies");
        }

        Ok(replies)
    }
}
