//! Turns a Slack file attachment into text the LLM can read.
//!
//! Dispatch is by MIME type first and file extension second. Output is
//! wrapped in a header/footer naming the file and its detected kind. Legacy
//! binary Word files (`.doc`) are not recognised, so they are never
//! downloaded.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::documents;
use crate::errors::SlackError;

/// Rows kept from a CSV file before the remainder is summarised.
pub const CSV_MAX_ROWS: usize = 1000;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "hpp", "cs", "rb", "go", "rs",
    "swift", "kt", "php", "sql", "sh", "bash", "yml", "yaml", "xml", "html", "css", "scss",
    "sass", "r", "scala", "lua", "pl", "pm", "dart", "vim", "dockerfile", "makefile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Word,
    Excel,
    Csv,
    Json,
    Text,
}

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

#[must_use]
pub fn is_code_file(filename: &str) -> bool {
    match extension(filename) {
        Some(ext) => CODE_EXTENSIONS.contains(&ext.as_str()),
        None => matches!(
            filename.to_ascii_lowercase().as_str(),
            "dockerfile" | "makefile"
        ),
    }
}

/// Classify a file, or `None` when it is not something we read.
///
/// A missing MIME type is guessed from the file name.
#[must_use]
pub fn detect_kind(filename: &str, mimetype: Option<&str>) -> Option<FileKind> {
    let mime = mimetype
        .filter(|m| !m.trim().is_empty())
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
        .or_else(|| {
            mime_guess::from_path(filename)
                .first()
                .map(|m| m.essence_str().to_string())
        })
        .unwrap_or_default();
    let ext = extension(filename).unwrap_or_default();

    let kind = if mime == "application/pdf" || ext == "pdf" {
        FileKind::Pdf
    } else if mime == "application/msword" || ext == "doc" {
        return None;
    } else if mime == "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        || ext == "docx"
    {
        FileKind::Word
    } else if matches!(
        mime.as_str(),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel"
            | "application/vnd.ms-excel.sheet.macroenabled.12"
            | "application/vnd.oasis.opendocument.spreadsheet"
    ) || matches!(ext.as_str(), "xlsx" | "xlsm" | "xls" | "ods")
    {
        FileKind::Excel
    } else if mime == "text/csv" || ext == "csv" {
        FileKind::Csv
    } else if mime == "application/json" || ext == "json" {
        FileKind::Json
    } else if mime.starts_with("text/") || is_code_file(filename) {
        FileKind::Text
    } else {
        return None;
    };

    Some(kind)
}

/// Extract readable text from `bytes`.
///
/// Returns `None` for unsupported or empty files, and for documents that
/// fail to decode.
#[must_use]
pub fn extract(
    bytes: &[u8],
    filename: &str,
    mimetype: Option<&str>,
    max_chars: usize,
) -> Option<String> {
    let Some(kind) = detect_kind(filename, mimetype) else {
        debug!(filename, ?mimetype, "Skipping file with unsupported type");
        return None;
    };

    let extracted = match kind {
        FileKind::Pdf => document(documents::pdf_text(bytes), filename, "PDF Document"),
        FileKind::Word => document(documents::docx_text(bytes), filename, "Word Document"),
        FileKind::Excel => document(
            documents::workbook_text(bytes),
            filename,
            "Excel Spreadsheet",
        ),
        FileKind::Csv => extract_csv(bytes, filename),
        FileKind::Json => Some(extract_json(bytes, filename)),
        FileKind::Text => Some((decode_text(bytes), text_label(filename))),
    };

    let (text, label) = extracted?;
    if text.trim().is_empty() {
        info!(filename, "No text content extracted");
        return None;
    }
    Some(format_file_content(&text, filename, &label, max_chars))
}

fn document(
    decoded: Result<String, SlackError>,
    filename: &str,
    label: &str,
) -> Option<(String, String)> {
    match decoded {
        Ok(text) => Some((text, label.to_string())),
        Err(e) => {
            warn!(filename, error = %e, "Failed to read document");
            None
        }
    }
}

/// Wrap `text` in a header/footer, truncating beyond `max_chars` characters.
#[must_use]
pub fn format_file_content(text: &str, filename: &str, file_type: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    let body = if total > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!(
            "{cut}\n\n[Content truncated - showing first {max_chars} characters of {total} total]"
        )
    } else {
        text.to_string()
    };

    format!("[{file_type}: {filename}]\n\n{body}\n\n[End of {file_type}: {filename}]")
}

/// UTF-8, falling back to Latin-1 (which accepts any byte sequence).
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().copied().map(char::from).collect(),
    }
}

fn text_label(filename: &str) -> String {
    if is_code_file(filename) {
        let ext = extension(filename).unwrap_or_else(|| filename.to_ascii_lowercase());
        format!("Code File ({ext})")
    } else if extension(filename).as_deref() == Some("md") {
        "Markdown File".to_string()
    } else {
        "Text File".to_string()
    }
}

fn extract_json(bytes: &[u8], filename: &str) -> (String, String) {
    let text = decode_text(bytes);
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or(text);
            (pretty, "JSON File".to_string())
        }
        Err(e) => {
            warn!(filename, error = %e, "Invalid JSON in file");
            (text, "JSON File (Invalid)".to_string())
        }
    }
}

fn extract_csv(bytes: &[u8], filename: &str) -> Option<(String, String)> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut lines = Vec::new();
    let mut more = 0;
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(filename, error = %e, "Stopped reading malformed CSV");
                break;
            }
        };
        if record.iter().all(str::is_empty) {
            continue;
        }
        if lines.len() < CSV_MAX_ROWS {
            lines.push(record.iter().collect::<Vec<_>>().join(" | "));
        } else {
            more += 1;
        }
    }

    if lines.is_empty() {
        return None;
    }
    if more > 0 {
        lines.push(format!("... ({more} more rows)"));
    }
    Some((lines.join("\n"), "CSV File".to_string()))
}
