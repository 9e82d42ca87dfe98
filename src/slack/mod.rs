//! All Slack-specific functionality

pub mod chunker;
pub mod client;
pub mod markdown;
pub mod sink;
pub mod thread;
pub mod tracker;
pub mod updater;

// Re-export main types for convenience
pub use chunker::chunk;
pub use client::SlackClient;
pub use sink::{MessageSink, ThreadReply};
pub use tracker::{ChunkLedger, ConversationEditState, EditTracker};
pub use updater::{PROCESSING_PLACEHOLDER, StreamingReplyUpdater, TRAILING_PLACEHOLDER};
