//! Plain-text extraction for fetched pages and uploaded documents.
//!
//! Callers supply bytes plus a [`ContentKind`]; this module returns
//! whitespace-normalized UTF-8 text. HTML goes through `scraper` with
//! script/style subtrees dropped; PDF goes through `pdf-extract` page by page.

use scraper::{Html, Node, Selector};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::warn;

pub const MIME_PDF: &str = "application/pdf";

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// The two shapes of content the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Pdf,
}

impl ContentKind {
    /// Picks a kind from a `Content-Type` header, falling back to the URL path.
    /// Anything that is not recognisably PDF is treated as HTML.
    pub fn detect(content_type: Option<&str>, path: &str) -> Self {
        let is_pdf_type = content_type
            .map(|ct| {
                ct.split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .eq_ignore_ascii_case(MIME_PDF)
            })
            .unwrap_or(false);
        if is_pdf_type || path.to_ascii_lowercase().ends_with(".pdf") {
            ContentKind::Pdf
        } else {
            ContentKind::Html
        }
    }
}

/// Text pulled from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub title: Option<String>,
    pub text: String,
    /// Number of PDF pages; zero for HTML.
    pub page_count: usize,
}

impl Extracted {
    /// Length in characters, the unit every cap and threshold uses.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn truncated(mut self, max_chars: usize) -> Self {
        let cut = truncate_chars(&self.text, max_chars).len();
        self.text.truncate(cut);
        self
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("no text could be extracted from the PDF")]
    EmptyPdf,
}

/// Extracts text and truncates it to `max_chars`.
pub fn extract_text(
    bytes: &[u8],
    kind: ContentKind,
    max_chars: usize,
) -> Result<Extracted, ExtractError> {
    let extracted = match kind {
        ContentKind::Html => extract_html(&String::from_utf8_lossy(bytes)),
        ContentKind::Pdf => extract_pdf(bytes)?,
    };
    Ok(extracted.truncated(max_chars))
}

/// [`extract_text`] on the blocking pool. A panic inside the PDF parser comes
/// back as [`ExtractError::Pdf`].
pub async fn extract_text_blocking(
    bytes: Vec<u8>,
    kind: ContentKind,
    max_chars: usize,
) -> Result<Extracted, ExtractError> {
    tokio::task::spawn_blocking(move || extract_text(&bytes, kind, max_chars))
        .await
        .map_err(join_failure)?
}

/// [`extract_pdf`] on the blocking pool, with the same panic handling.
pub async fn extract_pdf_blocking(bytes: Vec<u8>) -> Result<Extracted, ExtractError> {
    tokio::task::spawn_blocking(move || extract_pdf(&bytes))
        .await
        .map_err(join_failure)?
}

fn join_failure(err: JoinError) -> ExtractError {
    if err.is_panic() {
        warn!("PDF parser panicked");
        ExtractError::Pdf("the file could not be parsed".to_string())
    } else {
        ExtractError::Pdf(format!("extraction task failed: {}", err))
    }
}

/// Visible text of an HTML document with whitespace collapsed.
pub fn extract_html(html: &str) -> Extracted {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    });

    Extracted {
        title,
        text: visible_text(&document),
        page_count: 0,
    }
}

/// Reduces an HTML fragment (feed descriptions, mostly) to plain text.
pub fn html_fragment_to_text(fragment: &str) -> String {
    visible_text(&Html::parse_fragment(fragment))
}

fn visible_text(document: &Html) -> String {
    let mut pieces: Vec<&str> = Vec::new();
    for node in document.tree.root().descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
                Node::Element(el) => HIDDEN_ELEMENTS.contains(&el.name()),
                _ => false,
            });
            if !hidden {
                pieces.push(&**text);
            }
        }
    }
    normalize_whitespace(&pieces.join(" "))
}

/// Page-by-page PDF text, concatenated. Empty output is an error.
pub fn extract_pdf(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let page_count = pages.len();
    let text = normalize_whitespace(&pages.join("\n"));
    if text.is_empty() {
        return Err(ExtractError::EmptyPdf);
    }
    Ok(Extracted {
        title: None,
        text,
        page_count,
    })
}

/// Collapses every whitespace run into one space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
