//! Core data models used throughout the research assistant.
//!
//! These mirror the SQLite rows written by [`crate::store`]. Timestamps are
//! Unix seconds.

use serde::Serialize;
use std::fmt;

/// Where a summary's material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Pdf,
    Rss,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Url => "url",
            SourceKind::Pdf => "pdf",
            SourceKind::Rss => "rss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url" => Some(SourceKind::Url),
            "pdf" => Some(SourceKind::Pdf),
            "rss" => Some(SourceKind::Rss),
            _ => None,
        }
    }

    /// Relevance score stamped on every citation of this kind. Constant per
    /// kind; nothing is computed.
    pub fn relevance_score(&self) -> f64 {
        match self {
            SourceKind::Url | SourceKind::Pdf => 0.8,
            SourceKind::Rss => 0.7,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence stamped on every Q&A answer.
pub const QA_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Serialize)]
pub struct ResearchSession {
    pub id: i64,
    pub token: String,
    pub user_ip: Option<String>,
    pub created_at: i64,
    pub summary_count: i64,
    pub sources_processed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub id: i64,
    pub session_token: String,
    pub content: String,
    pub source_kind: SourceKind,
    pub word_count: i64,
    pub key_takeaways: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub id: i64,
    pub session_token: String,
    pub summary_id: i64,
    pub source_url: Option<String>,
    pub source_title: Option<String>,
    pub source_kind: SourceKind,
    pub excerpt: Option<String>,
    pub relevance_score: f64,
    pub created_at: i64,
}

/// A citation before it has a parent summary id.
#[derive(Debug, Clone)]
pub struct NewCitation {
    pub source_url: Option<String>,
    pub source_title: Option<String>,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    #[serde(skip)]
    pub content: String,
    pub session_token: String,
    pub file_size: i64,
    pub page_count: i64,
    pub uploaded_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QaSession {
    pub id: i64,
    pub session_token: String,
    pub document_id: i64,
    pub question: String,
    pub answer: String,
    pub confidence_score: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RssFeed {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub last_updated: i64,
    pub is_active: bool,
    pub update_frequency: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RssEntry {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub published_at: Option<i64>,
    pub guid: String,
    pub is_processed: bool,
    pub created_at: i64,
}

/// A parsed feed item ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub published_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub day: String,
    pub total_sessions: i64,
    pub total_summaries: i64,
    pub total_documents: i64,
    pub total_qa_queries: i64,
    pub total_rss_entries: i64,
    pub avg_sources_per_session: f64,
}
