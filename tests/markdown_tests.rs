use threadrelay::slack::markdown::{markdown_to_slack, slack_to_markdown};

#[test]
fn test_markdown_emphasis_becomes_slack_mrkdwn() {
    assert_eq!(markdown_to_slack("**bold** and *it*"), "*bold* and _it_");
    assert_eq!(markdown_to_slack("__bold__"), "*bold*");
    assert_eq!(markdown_to_slack("***both***"), "_*both*_");
    assert_eq!(markdown_to_slack("~~gone~~"), "~gone~");
}

#[test]
fn test_markdown_structure_becomes_slack_mrkdwn() {
    assert_eq!(markdown_to_slack("# Title"), "*Title*");
    assert_eq!(markdown_to_slack("- one\n- two"), "• one\n• two");
    assert_eq!(markdown_to_slack("1. first\n2. second"), "• first\n• second");
    assert_eq!(
        markdown_to_slack("see [the docs](https://example.com/a)"),
        "see <https://example.com/a|the docs>"
    );
}

#[test]
fn test_markdown_code_is_left_alone() {
    assert_eq!(
        markdown_to_slack("`**x**` and **y**"),
        "`**x**` and *y*"
    );
    let fenced = "```\n# not a header\n**x**\n```";
    assert_eq!(markdown_to_slack(fenced), fenced);
}

#[test]
fn test_markdown_ignores_spaced_asterisks() {
    assert_eq!(markdown_to_slack("2 * 3 * 4"), "2 * 3 * 4");
}

#[test]
fn test_slack_mrkdwn_becomes_markdown() {
    assert_eq!(
        slack_to_markdown("*bold* _it_ ~gone~"),
        "**bold** *it* ~~gone~~"
    );
    assert_eq!(slack_to_markdown("`*code*` *x*"), "`*code*` **x**");
    assert_eq!(slack_to_markdown("plain text"), "plain text");
}
