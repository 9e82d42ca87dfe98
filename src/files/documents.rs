//! Text from binary office documents: PDF, Word (`.docx`) and Excel
//! workbooks (`.xlsx`, `.xlsm`, `.xls`, `.ods`).
//!
//! Each reader returns the plain text body; the caller adds the file header.

use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use quick_xml::events::Event;
use quick_xml::reader::Reader as XmlReader;
use tracing::warn;

use crate::errors::SlackError;

/// Rows read from the top of each worksheet.
pub const SHEET_SCAN_ROWS: usize = 1000;
/// Columns read from the left of each worksheet.
pub const SHEET_MAX_COLUMNS: usize = 50;
/// Non-empty rows kept per worksheet before the remainder is summarised.
pub const SHEET_MAX_ROWS: usize = 500;

fn decode_error(what: &str, e: impl std::fmt::Display) -> SlackError {
    SlackError::EncodingError(format!("{what}: {e}"))
}

// ============================================================================
// PDF
// ============================================================================

/// Page-by-page text of a PDF, each page headed `[Page i of n]`.
///
/// # Errors
///
/// Returns `EncodingError` when the document cannot be parsed.
pub fn pdf_text(bytes: &[u8]) -> Result<String, SlackError> {
    // pdf-extract panics on some malformed documents.
    let pages = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|_| decode_error("PDF", "parser aborted"))?
    .map_err(|e| decode_error("PDF", e))?;

    Ok(format_pages(&pages))
}

fn format_pages(pages: &[String]) -> String {
    let total = pages.len();
    let mut parts = Vec::new();
    for (i, page) in pages.iter().enumerate() {
        let text = page.trim();
        if text.is_empty() {
            continue;
        }
        parts.push(format!("[Page {} of {total}]", i + 1));
        parts.push(text.to_string());
        parts.push(String::new());
    }
    parts.join("\n")
}

// ============================================================================
// Word
// ============================================================================

/// Paragraphs of a `.docx` body followed by its tables.
///
/// # Errors
///
/// Returns `EncodingError` when the file is not a readable `.docx` archive.
pub fn docx_text(bytes: &[u8]) -> Result<String, SlackError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| decode_error("Word document", e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| decode_error("Word document", e))?
        .read_to_string(&mut xml)
        .map_err(|e| decode_error("Word document", e))?;

    parse_document_xml(&xml)
}

#[derive(Default)]
struct DocxText {
    paragraphs: Vec<String>,
    tables: Vec<String>,
    paragraph: String,
    in_run: bool,
    in_text: bool,
    table_depth: usize,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

impl DocxText {
    fn start(&mut self, name: &[u8]) {
        match name {
            b"tbl" => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.rows.clear();
                }
            }
            b"tr" if self.table_depth == 1 => self.row.clear(),
            b"tc" if self.table_depth == 1 => self.cell.clear(),
            b"p" => self.paragraph.clear(),
            b"r" => self.in_run = true,
            b"t" => self.in_text = true,
            _ => {}
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"tbl" => {
                self.table_depth = self.table_depth.saturating_sub(1);
                if self.table_depth == 0 {
                    if let Some(table) = format_table(&self.rows) {
                        self.tables.push(table);
                    }
                }
            }
            b"tr" if self.table_depth == 1 => {
                let row = std::mem::take(&mut self.row);
                self.rows.push(row);
            }
            b"tc" if self.table_depth == 1 => {
                let cell = std::mem::take(&mut self.cell);
                self.row.push(cell.trim().to_string());
            }
            b"p" => {
                let paragraph = std::mem::take(&mut self.paragraph);
                if self.table_depth > 0 {
                    if !self.cell.is_empty() {
                        self.cell.push('\n');
                    }
                    self.cell.push_str(&paragraph);
                } else if !paragraph.trim().is_empty() {
                    self.paragraphs.push(paragraph);
                }
            }
            b"r" => self.in_run = false,
            b"t" => self.in_text = false,
            _ => {}
        }
    }

    fn empty(&mut self, name: &[u8]) {
        if !self.in_run {
            return;
        }
        match name {
            b"tab" => self.paragraph.push('\t'),
            b"br" | b"cr" => self.paragraph.push('\n'),
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.in_text {
            self.paragraph.push_str(text);
        }
    }

    fn finish(mut self) -> String {
        self.paragraphs.append(&mut self.tables);
        self.paragraphs.join("\n\n")
    }
}

fn parse_document_xml(xml: &str) -> Result<String, SlackError> {
    let mut reader = XmlReader::from_str(xml);
    let mut doc = DocxText::default();

    loop {
        match reader
            .read_event()
            .map_err(|e| decode_error("Word document XML", e))?
        {
            Event::Start(e) => doc.start(e.local_name().as_ref()),
            Event::End(e) => doc.end(e.local_name().as_ref()),
            Event::Empty(e) => doc.empty(e.local_name().as_ref()),
            Event::Text(e) => {
                let text: Cow<'_, str> = e
                    .unescape()
                    .map_err(|e| decode_error("Word document XML", e))?;
                doc.text(&text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(doc.finish())
}

fn format_table(rows: &[Vec<String>]) -> Option<String> {
    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            row.iter()
                .filter(|cell| !cell.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return None;
    }
    Some(format!("\n[Table]\n{}\n[End Table]\n", lines.join("\n")))
}

// ============================================================================
// Excel
// ============================================================================

/// Every worksheet of a workbook, headed `[Sheet: name]`, one row per line.
///
/// # Errors
///
/// Returns `EncodingError` when the workbook cannot be opened. Unreadable
/// sheets are skipped.
pub fn workbook_text(bytes: &[u8]) -> Result<String, SlackError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| decode_error("spreadsheet", e))?;

    let mut parts = Vec::new();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                warn!(sheet = %name, error = %e, "Skipping unreadable worksheet");
                continue;
            }
        };
        let rows: Vec<String> = range
            .rows()
            .take(SHEET_SCAN_ROWS)
            .filter_map(sheet_row)
            .collect();
        push_sheet(&mut parts, &name, &rows);
    }

    Ok(parts.join("\n"))
}

fn sheet_row(cells: &[Data]) -> Option<String> {
    let cells = &cells[..cells.len().min(SHEET_MAX_COLUMNS)];
    if cells.iter().all(|cell| matches!(cell, Data::Empty)) {
        return None;
    }
    Some(
        cells
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | "),
    )
}

fn push_sheet(parts: &mut Vec<String>, name: &str, rows: &[String]) {
    if rows.is_empty() {
        return;
    }
    parts.push(format!("[Sheet: {name}]"));
    parts.extend(rows.iter().take(SHEET_MAX_ROWS).cloned());
    if rows.len() > SHEET_MAX_ROWS {
        parts.push(format!("... ({} more rows)", rows.len() - SHEET_MAX_ROWS));
    }
    parts.push(String::new());
}
