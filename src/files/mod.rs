//! Text extraction from Slack file attachments

pub mod documents;
pub mod extract;

pub use extract::{FileKind, detect_kind, extract, format_file_content};
