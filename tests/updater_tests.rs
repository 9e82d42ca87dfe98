use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use threadrelay::core::config::TrackerConfig;
use threadrelay::core::models::ConversationKey;
use threadrelay::errors::SlackError;
use threadrelay::slack::{
    EditTracker, MessageSink, PROCESSING_PLACEHOLDER, StreamingReplyUpdater, TRAILING_PLACEHOLDER,
    ThreadReply,
};

const CHANNEL: &str = "C123";
const THREAD: &str = "1699999999.000001";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Post {
        thread_ts: Option<String>,
        text: String,
        ts: String,
    },
    Update {
        ts: String,
        text: String,
    },
}

/// Records every Slack call; can be told to fail upcoming posts and to
/// linger inside updates so overlapping calls become observable.
#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<Call>>,
    issued: AtomicUsize,
    fail_posts: AtomicUsize,
    update_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingSink {
    fn with_update_delay(delay: Duration) -> Self {
        Self {
            update_delay: Some(delay),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn fail_next_posts(&self, n: usize) {
        self.fail_posts.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn post_message(
        &self,
        _channel: &str,
        thread_ts: Option<&str>,
        text: &str,
        _metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        if self
            .fail_posts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SlackError::TransportError("connection reset".to_string()));
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let ts = format!("1700000000.{n:06}");
        self.calls.lock().unwrap().push(Call::Post {
            thread_ts: thread_ts.map(str::to_string),
            text: text.to_string(),
            ts: ts.clone(),
        });
        Ok(ts)
    }

    async fn update_message(
        &self,
        _channel: &str,
        ts: &str,
        text: &str,
        _metadata: Option<&Value>,
    ) -> Result<String, SlackError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(Call::Update {
            ts: ts.to_string(),
            text: text.to_string(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ts.to_string())
    }

    async fn list_replies(
        &self,
        _channel: &str,
        _thread_ts: &str,
    ) -> Result<Vec<ThreadReply>, SlackError> {
        Ok(Vec::new())
    }
}

fn setup(
    sink: RecordingSink,
    max_bytes: usize,
) -> (Arc<RecordingSink>, Arc<EditTracker>, StreamingReplyUpdater) {
    let sink = Arc::new(sink);
    let tracker = Arc::new(EditTracker::new(TrackerConfig {
        capacity: 100,
        ttl: Duration::from_secs(3600),
        grace: Duration::from_secs(5),
    }));
    let updater = StreamingReplyUpdater::new(sink.clone(), Arc::clone(&tracker), max_bytes);
    (sink, tracker, updater)
}

fn update(ts: &str, text: &str) -> Call {
    Call::Update {
        ts: ts.to_string(),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_post_initial_replies_in_thread_and_tracks_root() {
    let (sink, tracker, updater) = setup(RecordingSink::default(), 4000);
    let metadata = json!({"event_type": "chat-gpt-convo"});

    let root = updater
        .post_initial(CHANNEL, THREAD, "Wait a second", Some(&metadata))
        .await
        .unwrap();

    assert_eq!(
        sink.calls(),
        vec![Call::Post {
            thread_ts: Some(THREAD.to_string()),
            text: "Wait a second".to_string(),
            ts: root.clone(),
        }]
    );
    let key = ConversationKey::new(CHANNEL, root.as_str());
    assert_eq!(tracker.message_ids(&key).await, Some(vec![root]));
}

#[tokio::test]
async fn test_growing_text_edits_the_root_message() {
    let (sink, _tracker, updater) = setup(RecordingSink::default(), 4000);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    sink.clear();

    let ts = updater.apply_update(CHANNEL, &root, "Hello", None).await.unwrap();
    assert_eq!(ts, root);
    updater
        .apply_update(CHANNEL, &root, "Hello world", None)
        .await
        .unwrap();

    assert_eq!(
        sink.calls(),
        vec![update(&root, "Hello"), update(&root, "Hello world")]
    );
}

#[tokio::test]
async fn test_growing_answer_under_cap_keeps_one_message() {
    let (sink, tracker, updater) = setup(RecordingSink::default(), 4000);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    sink.clear();

    for text in ["Hello", "Hello, world", "Hello, world!"] {
        let ts = updater.apply_update(CHANNEL, &root, text, None).await.unwrap();
        assert_eq!(ts, root);
    }

    assert_eq!(
        sink.calls(),
        vec![
            update(&root, "Hello"),
            update(&root, "Hello, world"),
            update(&root, "Hello, world!"),
        ]
    );
    let key = ConversationKey::new(CHANNEL, root.as_str());
    assert_eq!(tracker.message_ids(&key).await, Some(vec![root]));
}

#[tokio::test]
async fn test_crossing_the_cap_appends_exactly_one_message() {
    let (sink, tracker, updater) = setup(RecordingSink::default(), 20);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    let key = ConversationKey::new(CHANNEL, root.as_str());

    let steps = [
        "one two three",
        "one two three four",
        "one two three four five",
        "one two three four five six",
    ];
    let mut seen = 1;
    for text in steps {
        updater.apply_update(CHANNEL, &root, text, None).await.unwrap();
        let ids = tracker.message_ids(&key).await.unwrap();
        assert!(ids.len() >= seen, "message ids shrank");
        seen = ids.len();
    }
    assert_eq!(seen, 2);

    let root_updates: Vec<String> = sink
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Update { ts, text } if ts == root => Some(text),
            _ => None,
        })
        .collect();
    // the root's last edit is the first chunk of the overflowing text
    assert_eq!(root_updates.last().map(String::as_str), Some("one two three four"));
}

#[tokio::test]
async fn test_overflow_posts_into_thread_and_only_edits_changed_chunks() {
    let (sink, tracker, updater) = setup(RecordingSink::default(), 10);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    sink.clear();

    let last = updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc", None)
        .await
        .unwrap();
    assert_ne!(last, root);
    assert_eq!(
        sink.calls(),
        vec![
            update(&root, "aaaa bbbb"),
            Call::Post {
                thread_ts: Some(THREAD.to_string()),
                text: "cccc".to_string(),
                ts: last.clone(),
            },
        ]
    );

    sink.clear();
    let again = updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc dddd", None)
        .await
        .unwrap();
    assert_eq!(again, last);
    assert_eq!(sink.calls(), vec![update(&last, "cccc dddd")]);

    let key = ConversationKey::new(CHANNEL, root.as_str());
    assert_eq!(tracker.message_ids(&key).await, Some(vec![root, last]));
}

#[tokio::test]
async fn test_identical_update_makes_no_calls() {
    let (sink, _tracker, updater) = setup(RecordingSink::default(), 10);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc", None)
        .await
        .unwrap();
    sink.clear();

    updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc", None)
        .await
        .unwrap();

    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_failed_post_keeps_earlier_progress_and_catches_up() {
    let (sink, tracker, updater) = setup(RecordingSink::default(), 10);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    sink.clear();
    sink.fail_next_posts(1);

    let err = updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SlackError::TransportError(_)));
    assert_eq!(sink.calls(), vec![update(&root, "aaaa bbbb")]);

    let key = ConversationKey::new(CHANNEL, root.as_str());
    assert_eq!(tracker.message_ids(&key).await, Some(vec![root.clone()]));

    sink.clear();
    let last = updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc", None)
        .await
        .unwrap();
    assert_eq!(
        sink.calls(),
        vec![Call::Post {
            thread_ts: Some(THREAD.to_string()),
            text: "cccc".to_string(),
            ts: last.clone(),
        }]
    );
    assert_eq!(tracker.message_ids(&key).await, Some(vec![root, last]));
}

#[tokio::test]
async fn test_blank_text_renders_placeholder() {
    let (sink, _tracker, updater) = setup(RecordingSink::default(), 4000);
    let root = updater
        .post_initial(CHANNEL, THREAD, "", None)
        .await
        .unwrap();

    assert!(matches!(
        &sink.calls()[0],
        Call::Post { text, .. } if text == PROCESSING_PLACEHOLDER
    ));

    sink.clear();
    updater.apply_update(CHANNEL, &root, "  ", None).await.unwrap();
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_untracked_root_is_seeded_and_overflows_into_its_own_thread() {
    let (sink, tracker, updater) = setup(RecordingSink::default(), 10);
    let root = "1650000000.000001";

    let last = updater
        .apply_update(CHANNEL, root, "aaaa bbbb cccc", None)
        .await
        .unwrap();

    assert_eq!(
        sink.calls(),
        vec![
            update(root, "aaaa bbbb"),
            Call::Post {
                thread_ts: Some(root.to_string()),
                text: "cccc".to_string(),
                ts: last,
            },
        ]
    );
    assert!(tracker.contains(&ConversationKey::new(CHANNEL, root)));
}

#[tokio::test(start_paused = true)]
async fn test_finish_hands_entry_to_grace_window() {
    let (_sink, tracker, updater) = setup(RecordingSink::default(), 4000);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    let key = ConversationKey::new(CHANNEL, root.as_str());

    updater.finish(CHANNEL, &root, "Done.", None).await.unwrap();
    assert!(tracker.contains(&key));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(!tracker.contains(&key));
}

#[tokio::test(start_paused = true)]
async fn test_updates_to_one_conversation_are_serialized() {
    let (sink, _tracker, updater) =
        setup(RecordingSink::with_update_delay(Duration::from_millis(50)), 4000);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    sink.clear();

    let (first, second) = tokio::join!(
        updater.apply_update(CHANNEL, &root, "Hello", None),
        updater.apply_update(CHANNEL, &root, "Hello world", None),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(
        sink.calls(),
        vec![update(&root, "Hello"), update(&root, "Hello world")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_different_conversations_update_concurrently() {
    let (sink, _tracker, updater) =
        setup(RecordingSink::with_update_delay(Duration::from_millis(50)), 4000);
    let a = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    let b = updater
        .post_initial(CHANNEL, "1699999999.000002", "Loading", None)
        .await
        .unwrap();

    let (ra, rb) = tokio::join!(
        updater.apply_update(CHANNEL, &a, "first answer", None),
        updater.apply_update(CHANNEL, &b, "second answer", None),
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_progress_suffix_does_not_change_where_text_splits() {
    let (sink, tracker, _) = setup(RecordingSink::default(), 40);
    let updater = StreamingReplyUpdater::new(sink.clone(), Arc::clone(&tracker), 40)
        .with_progress_suffix(" ... :writing_hand:");
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    sink.clear();

    let text = "aaaaaaaaaa\nbbbbbbbbbbbbbbb";
    let second = updater
        .apply_progress(CHANNEL, &root, text, None)
        .await
        .unwrap();
    let last = updater.finish(CHANNEL, &root, text, None).await.unwrap();

    assert_eq!(last, second);
    assert_eq!(
        sink.calls(),
        vec![
            update(&root, "aaaaaaaaaa"),
            Call::Post {
                thread_ts: Some(THREAD.to_string()),
                text: "bbbbbbbbbbbbbbb ... :writing_hand:".to_string(),
                ts: second.clone(),
            },
            update(&second, "bbbbbbbbbbbbbbb"),
        ]
    );
    let key = ConversationKey::new(CHANNEL, root.as_str());
    assert_eq!(tracker.message_ids(&key).await, Some(vec![root, second]));
}

#[tokio::test]
async fn test_messages_past_a_shorter_final_render_are_blanked() {
    let (sink, tracker, updater) = setup(RecordingSink::default(), 10);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();
    let last = updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc", None)
        .await
        .unwrap();
    sink.clear();

    let ts = updater.finish(CHANNEL, &root, "aaaa", None).await.unwrap();
    assert_eq!(ts, root);
    assert_eq!(
        sink.calls(),
        vec![update(&root, "aaaa"), update(&last, TRAILING_PLACEHOLDER)]
    );

    sink.clear();
    updater.finish(CHANNEL, &root, "aaaa", None).await.unwrap();
    assert!(sink.calls().is_empty());

    let key = ConversationKey::new(CHANNEL, root.as_str());
    assert_eq!(tracker.message_ids(&key).await, Some(vec![root, last]));
}

#[tokio::test(start_paused = true)]
async fn test_entry_mid_update_survives_capacity_eviction() {
    let sink = Arc::new(RecordingSink::with_update_delay(Duration::from_millis(50)));
    let tracker = Arc::new(EditTracker::new(TrackerConfig {
        capacity: 1,
        ttl: Duration::from_secs(3600),
        grace: Duration::from_secs(5),
    }));
    let updater = StreamingReplyUpdater::new(sink.clone(), Arc::clone(&tracker), 10);
    let root = updater
        .post_initial(CHANNEL, THREAD, "Loading", None)
        .await
        .unwrap();

    let (first, other) = tokio::join!(
        updater.apply_update(CHANNEL, &root, "aaaa bbbb cccc", None),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            updater
                .apply_update(CHANNEL, "1650000000.000001", "hi", None)
                .await
        },
    );
    let last = first.unwrap();
    other.unwrap();
    sink.clear();

    updater
        .apply_update(CHANNEL, &root, "aaaa bbbb cccc dddd", None)
        .await
        .unwrap();
    assert_eq!(sink.calls(), vec![update(&last, "cccc dddd")]);
}
