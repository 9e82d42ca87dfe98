//! Response builders and request accessors shared by the API handlers.

use serde_json::{Value, json};

// ============================================================================
// Response Builders
// ============================================================================

/// Returns a 200 OK response with an empty JSON body.
#[must_use]
pub fn ok_empty() -> Value {
    json!({ "statusCode": 200, "body": "{}" })
}

/// Returns an error response with the given status code and message.
#[must_use]
pub fn err_response(status_code: u16, message: &str) -> Value {
    json!({
        "statusCode": status_code,
        "body": json!({ "error": message }).to_string()
    })
}

// ============================================================================
// Request Accessors
// ============================================================================

/// Case-insensitive header lookup; API Gateway and Function URLs disagree on casing.
#[must_use]
pub fn get_header_value<'a>(headers: &'a Value, name: &str) -> Option<&'a str> {
    if let Some(v) = headers.get(name).and_then(Value::as_str) {
        return Some(v);
    }
    headers.as_object().and_then(|map| {
        map.iter().find_map(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                v.as_str()
            } else {
                None
            }
        })
    })
}

/// Borrow a string at a nested JSON path.
#[must_use]
pub fn v_str<'a>(root: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = root;
    for key in path {
        cur = cur.get(*key)?;
    }
    cur.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_header_value_ignores_case() {
        let headers = json!({ "x-slack-signature": "v0=abc" });
        assert_eq!(
            get_header_value(&headers, "X-Slack-Signature"),
            Some("v0=abc")
        );
        assert_eq!(get_header_value(&headers, "X-Missing"), None);
    }

    #[test]
    fn test_err_response_shape() {
        let resp = err_response(401, "Invalid Slack signature");
        assert_eq!(resp["statusCode"], 401);
        assert!(resp["body"].as_str().unwrap().contains("Invalid Slack signature"));
    }
}
