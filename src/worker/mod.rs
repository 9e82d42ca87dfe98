//! Worker Lambda handler and reply processing

pub mod handler;
pub mod reply;
pub mod streaming;

// Re-export the main handler for convenience
pub use handler::handler;
pub use reply::{WorkerContext, process_task};
