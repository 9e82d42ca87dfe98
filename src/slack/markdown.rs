//! Conversions between Slack mrkdwn and the Markdown dialect LLMs produce.
//!
//! Both directions leave fenced code blocks and inline code spans untouched.
//! Formatting: <https://api.slack.com/reference/surfaces/formatting#basics>

use regex::Regex;
use std::sync::LazyLock;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|_| Regex::new(r"$^").expect("fallback regex compiles"))
}

static CODE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s)```.+?```|`[^`\n]+?`"));

// Slack -> Markdown
static SLACK_BOLD_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\*([^*\n]+)\*"));
static SLACK_ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"_([^_\n]+)_"));
static SLACK_STRIKE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"~([^~\n]+)~"));

// Markdown -> Slack
static MD_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^#{1,6}\s+(.+)$"));
static MD_BULLET_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^[-*+]\s+(.+)$"));
static MD_NUMBERED_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^\d+\.\s+(.+)$"));
static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\[([^\]]+)\]\(([^)]+)\)"));
static MD_BOLD_ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\*\*\*([^*\n]+)\*\*\*"));
static MD_ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\*([^*\n]+)\*"));
static MD_BOLD_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\*\*([^*\n]+)\*\*"));
static MD_UNDERSCORE_BOLD_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"__([^_\n]+)__"));
static MD_STRIKE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"~~([^~\n]+)~~"));

/// Convert Slack mrkdwn (`*bold*`, `_italic_`, `~strike~`) to Markdown.
#[must_use]
pub fn slack_to_markdown(content: &str) -> String {
    map_outside_code(content, |part| {
        let part = emphasis(part, &SLACK_BOLD_RE, "**$1**", no_guard);
        let part = emphasis(&part, &SLACK_ITALIC_RE, "*$1*", no_guard);
        emphasis(&part, &SLACK_STRIKE_RE, "~~$1~~", no_guard)
    })
}

/// Convert LLM Markdown to Slack mrkdwn.
///
/// Headers become bold lines, list items become `•` bullets and
/// `[text](url)` links become `<url|text>`.
#[must_use]
pub fn markdown_to_slack(content: &str) -> String {
    map_outside_code(content, |part| {
        // headers go through the bold rule below
        let part = MD_HEADER_RE.replace_all(part, "**$1**");
        let part = MD_BULLET_RE.replace_all(&part, "• $1");
        let part = MD_NUMBERED_RE.replace_all(&part, "• $1");
        let part = MD_LINK_RE.replace_all(&part, "<$2|$1>");

        let part = emphasis(&part, &MD_BOLD_ITALIC_RE, "_*$1*_", no_guard);
        let part = emphasis(&part, &MD_ITALIC_RE, "_${1}_", not_beside_emphasis);
        let part = emphasis(&part, &MD_BOLD_RE, "*$1*", no_guard);
        let part = emphasis(&part, &MD_UNDERSCORE_BOLD_RE, "*$1*", no_guard);
        emphasis(&part, &MD_STRIKE_RE, "~$1~", no_guard)
    })
}

fn map_outside_code(content: &str, convert: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;

    for code in CODE_RE.find_iter(content) {
        out.push_str(&convert(&content[last..code.start()]));
        out.push_str(code.as_str());
        last = code.end();
    }
    out.push_str(&convert(&content[last..]));
    out
}

fn no_guard(_: &str, _: usize, _: usize) -> bool {
    true
}

/// Single `*` emphasis must not touch another `*` or `_`, so that `**bold**`
/// and `_*bold italic*_` are left for their own rules.
fn not_beside_emphasis(text: &str, start: usize, end: usize) -> bool {
    let is_marker = |c: char| c == '*' || c == '_';
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_marker) && !after.is_some_and(is_marker)
}

/// Replace every match of `re` whose inner text neither starts nor ends with
/// whitespace and which passes `guard`. A rejected match is retried one byte
/// further on, so an opening marker can still pair with a later one.
fn emphasis(
    text: &str,
    re: &Regex,
    template: &str,
    guard: fn(&str, usize, usize) -> bool,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut pos = 0;

    while let Some(caps) = re.captures_at(text, pos) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            break;
        };

        if trimmed(inner.as_str()) && guard(text, whole.start(), whole.end()) {
            out.push_str(&text[last..whole.start()]);
            caps.expand(template, &mut out);
            last = whole.end();
            pos = whole.end();
        } else {
            // markers are ASCII, so the next byte is a char boundary
            pos = whole.start() + 1;
        }

        if pos >= text.len() {
            break;
        }
    }

    out.push_str(&text[last..]);
    out
}

fn trimmed(inner: &str) -> bool {
    !inner.starts_with(char::is_whitespace) && !inner.ends_with(char::is_whitespace)
}
