//! PDF uploads and question answering over them.
//!
//! Uploads are validated before anything touches disk or the database, then
//! written under the upload directory with a random prefix. The full
//! extracted text lives on the [`Document`] row; prompts only ever see the
//! capped prefix. Documents and their Q&A history are visible to the owning
//! session only.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::summarizer_message;
use crate::config::{LimitsConfig, UploadsConfig};
use crate::extract::{extract_pdf_blocking, truncate_chars, ExtractError};
use crate::llm::{build_qa_prompt, SummarizeError, Summarizer};
use crate::models::{Document, QaSession, QA_CONFIDENCE};
use crate::stats;
use crate::store::SqliteStore;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("No file selected.")]
    NoFile,
    #[error("Only PDF files are allowed.")]
    NotPdf,
    #[error("File is too large (limit {} MB).", .0 / (1024 * 1024))]
    TooLarge(usize),
    #[error("The upload could not be read. Please try again.")]
    Unreadable,
    #[error("Could not read the PDF: {0}")]
    Extract(#[from] ExtractError),
    #[error("Please enter a question.")]
    EmptyQuestion,
    #[error("Document not found.")]
    NotFound,
    #[error("{}", summarizer_message(.0))]
    Summarizer(SummarizeError),
    #[error("could not save upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl DocumentError {
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, DocumentError::Io(_) | DocumentError::Storage(_))
    }
}

/// Rejects anything that is not a non-empty `.pdf` within the size limit.
pub fn validate_upload(filename: &str, size: usize, max_bytes: usize) -> Result<(), DocumentError> {
    if filename.trim().is_empty() {
        return Err(DocumentError::NoFile);
    }
    let is_pdf = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return Err(DocumentError::NotPdf);
    }
    if size > max_bytes {
        return Err(DocumentError::TooLarge(max_bytes));
    }
    Ok(())
}

/// Base name of `name` restricted to `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload.pdf".to_string()
    } else {
        cleaned
    }
}

/// Validates, writes and extracts an uploaded PDF and records it for
/// `token`. The file is removed again if extraction fails.
pub async fn store_upload(
    store: &SqliteStore,
    uploads: &UploadsConfig,
    token: &str,
    original_filename: &str,
    bytes: &[u8],
) -> Result<Document, DocumentError> {
    validate_upload(original_filename, bytes.len(), uploads.max_bytes)?;

    let stored_name = format!(
        "{}_{}",
        Uuid::new_v4().simple(),
        sanitize_filename(original_filename)
    );
    tokio::fs::create_dir_all(&uploads.dir).await?;
    let path: PathBuf = uploads.dir.join(&stored_name);
    tokio::fs::write(&path, bytes).await?;
    debug!(path = %path.display(), size = bytes.len(), "upload written");

    let extracted = match extract_pdf_blocking(bytes.to_vec()).await {
        Ok(extracted) => extracted,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %rm, "could not remove rejected upload");
            }
            return Err(e.into());
        }
    };

    let id = store
        .insert_document(
            token,
            &stored_name,
            original_filename,
            &path.to_string_lossy(),
            &extracted.text,
            bytes.len() as i64,
            extracted.page_count as i64,
        )
        .await?;
    stats::recompute_today(store).await?;

    info!(
        document_id = id,
        pages = extracted.page_count,
        chars = extracted.char_len(),
        "document stored"
    );
    store.get_document(id).await?.ok_or(DocumentError::NotFound)
}

/// Loads document `id` if it belongs to `token`.
pub async fn owned_document(
    store: &SqliteStore,
    token: &str,
    id: i64,
) -> Result<Document, DocumentError> {
    match store.get_document(id).await? {
        Some(doc) if doc.session_token == token => Ok(doc),
        _ => Err(DocumentError::NotFound),
    }
}

/// Answers `question` from document `document_id` and logs the exchange.
pub async fn ask_question(
    store: &SqliteStore,
    summarizer: &dyn Summarizer,
    limits: &LimitsConfig,
    token: &str,
    document_id: i64,
    question: &str,
) -> Result<QaSession, DocumentError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(DocumentError::EmptyQuestion);
    }
    let document = owned_document(store, token, document_id).await?;

    let context = truncate_chars(&document.content, limits.aggregate_chars);
    let answer = summarizer
        .generate(&build_qa_prompt(context, question))
        .await
        .map_err(DocumentError::Summarizer)?;

    let qa = store
        .insert_qa(token, document_id, question, &answer, QA_CONFIDENCE)
        .await?;
    stats::recompute_today(store).await?;

    info!(document_id, qa_id = qa.id, "question answered");
    Ok(qa)
}
