//! Raw bytes to ordered page texts

use tracing::debug;

use crate::error::{IngestError, Result};
use crate::types::Page;

/// Leading bytes that identify a PDF regardless of the declared MIME type
const PDF_MAGIC: &[u8] = b"%PDF";

/// Turn raw upload bytes into an ordered page list.
///
/// PDFs (declared via MIME or sniffed from the first bytes) are extracted
/// page by page with 1-based numbering; pages without extractable text become
/// empty strings. Everything else is treated as one page of UTF-8 text with
/// invalid sequences replaced. NUL characters are stripped from every page so
/// they never reach chunk text or the stores.
pub fn parse_pages(bytes: &[u8], content_type: &str) -> Result<Vec<Page>> {
    let pages = if is_pdf(bytes, content_type) {
        parse_pdf(bytes)?
    } else {
        vec![Page::new(1, String::from_utf8_lossy(bytes).into_owned())]
    };

    let pages: Vec<Page> = pages
        .into_iter()
        .map(|page| Page::new(page.number, page.text.replace('\0', "")))
        .collect();

    debug!("Parsed {} pages from {} bytes", pages.len(), bytes.len());
    Ok(pages)
}

/// PDF detection: case-insensitive MIME substring match, or a content sniff
/// of the leading bytes.
pub fn is_pdf(bytes: &[u8], content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("pdf") || bytes.starts_with(PDF_MAGIC)
}

fn parse_pdf(bytes: &[u8]) -> Result<Vec<Page>> {
    let page_texts = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| IngestError::Parse(format!("PDF extraction failed: {}", e)))?;

    Ok(page_texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page::new(i as u32 + 1, text))
        .collect())
}
