use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// Requests older than this many seconds are rejected as replays.
pub const MAX_REQUEST_AGE_SECS: u64 = 300;
const MAX_CLOCK_SKEW_SECS: u64 = 60;

/// Verify Slack's `X-Slack-Signature` against the current clock.
#[must_use]
pub fn verify_slack_signature(
    request_body: &str,
    timestamp: &str,
    signature: &str,
    signing_secret: &str,
) -> bool {
    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    verify_slack_signature_at(request_body, timestamp, signature, signing_secret, now_secs)
}

/// Same as [`verify_slack_signature`] with an explicit `now_secs`.
#[must_use]
pub fn verify_slack_signature_at(
    request_body: &str,
    timestamp: &str,
    signature: &str,
    signing_secret: &str,
    now_secs: u64,
) -> bool {
    let Ok(ts) = timestamp.parse::<u64>() else {
        error!("Invalid Slack request timestamp: '{}'", timestamp);
        return false;
    };
    if now_secs.saturating_sub(ts) > MAX_REQUEST_AGE_SECS || ts > now_secs + MAX_CLOCK_SKEW_SECS {
        error!("Timestamp out of range, potential replay attack");
        return false;
    }

    let Some(received) = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        error!("Malformed Slack signature header");
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()) else {
        error!("Failed to create HMAC");
        return false;
    };
    mac.update(format!("v0:{timestamp}:{request_body}").as_bytes());

    if mac.verify_slice(&received).is_ok() {
        true
    } else {
        error!("Signature verification failed");
        false
    }
}

#[must_use]
pub fn compute_signature(timestamp: &str, request_body: &str, signing_secret: &str) -> String {
    let base_string = format!("v0:{timestamp}:{request_body}");
    let mut mac = match Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(e) => {
            error!("Failed to create HMAC: {}", e);
            return String::new();
        }
    };
    mac.update(base_string.as_bytes());
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &str = "token=xyz&team_id=T1&event=app_mention";

    #[test]
    fn test_accepts_fresh_valid_signature() {
        let sig = compute_signature("1700000000", BODY, SECRET);
        assert!(verify_slack_signature_at(BODY, "1700000000", &sig, SECRET, 1_700_000_010));
    }

    #[test]
    fn test_rejects_tampered_body() {
        let sig = compute_signature("1700000000", BODY, SECRET);
        assert!(!verify_slack_signature_at("other", "1700000000", &sig, SECRET, 1_700_000_010));
    }

    #[test]
    fn test_rejects_stale_and_future_timestamps() {
        let sig = compute_signature("1700000000", BODY, SECRET);
        assert!(!verify_slack_signature_at(BODY, "1700000000", &sig, SECRET, 1_700_000_301));
        assert!(!verify_slack_signature_at(BODY, "1700000000", &sig, SECRET, 1_699_999_000));
    }

    #[test]
    fn test_rejects_malformed_header_and_timestamp() {
        assert!(!verify_slack_signature_at(BODY, "1700000000", "v1=abc", SECRET, 1_700_000_000));
        assert!(!verify_slack_signature_at(BODY, "soon", "v0=00", SECRET, 1_700_000_000));
    }
}
