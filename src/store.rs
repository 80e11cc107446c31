//! SQLite persistence for sessions, summaries, documents and feeds.
//!
//! [`SqliteStore`] wraps a [`SqlitePool`] and owns every SQL statement the
//! request handlers need. It is cheap to clone. Methods return
//! [`sqlx::Result`]; storage failures are not handled here.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{
    Citation, Document, NewCitation, NewEntry, QaSession, ResearchSession, RssEntry, RssFeed,
    SourceKind, Summary,
};

/// Characters of summary text kept as "key takeaways".
pub const TAKEAWAYS_CHARS: usize = 500;
/// Characters of source text kept on a citation.
pub const CITATION_EXCERPT_CHARS: usize = 200;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn kind_column(row: &SqliteRow, column: &str) -> sqlx::Result<SourceKind> {
    let raw: String = row.try_get(column)?;
    SourceKind::parse(&raw).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unknown source kind '{}'", raw).into(),
    })
}

fn session_from_row(row: &SqliteRow) -> sqlx::Result<ResearchSession> {
    Ok(ResearchSession {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        user_ip: row.try_get("user_ip")?,
        created_at: row.try_get("created_at")?,
        summary_count: row.try_get("summary_count")?,
        sources_processed: row.try_get("sources_processed")?,
    })
}

fn summary_from_row(row: &SqliteRow) -> sqlx::Result<Summary> {
    Ok(Summary {
        id: row.try_get("id")?,
        session_token: row.try_get("session_token")?,
        content: row.try_get("content")?,
        source_kind: kind_column(row, "source_kind")?,
        word_count: row.try_get("word_count")?,
        key_takeaways: row.try_get("key_takeaways")?,
        created_at: row.try_get("created_at")?,
    })
}

fn citation_from_row(row: &SqliteRow) -> sqlx::Result<Citation> {
    Ok(Citation {
        id: row.try_get("id")?,
        session_token: row.try_get("session_token")?,
        summary_id: row.try_get("summary_id")?,
        source_url: row.try_get("source_url")?,
        source_title: row.try_get("source_title")?,
        source_kind: kind_column(row, "source_kind")?,
        excerpt: row.try_get("excerpt")?,
        relevance_score: row.try_get("relevance_score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn document_from_row(row: &SqliteRow) -> sqlx::Result<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        original_filename: row.try_get("original_filename")?,
        file_path: row.try_get("file_path")?,
        content: row.try_get("content")?,
        session_token: row.try_get("session_token")?,
        file_size: row.try_get("file_size")?,
        page_count: row.try_get("page_count")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn qa_from_row(row: &SqliteRow) -> sqlx::Result<QaSession> {
    Ok(QaSession {
        id: row.try_get("id")?,
        session_token: row.try_get("session_token")?,
        document_id: row.try_get("document_id")?,
        question: row.try_get("question")?,
        answer: row.try_get("answer")?,
        confidence_score: row.try_get("confidence_score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn feed_from_row(row: &SqliteRow) -> sqlx::Result<RssFeed> {
    Ok(RssFeed {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        last_updated: row.try_get("last_updated")?,
        is_active: row.try_get("is_active")?,
        update_frequency: row.try_get("update_frequency")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> sqlx::Result<RssEntry> {
    Ok(RssEntry {
        id: row.try_get("id")?,
        feed_id: row.try_get("feed_id")?,
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        description: row.try_get("description")?,
        published_at: row.try_get("published_at")?,
        guid: row.try_get("guid")?,
        is_processed: row.try_get("is_processed")?,
        created_at: row.try_get("created_at")?,
    })
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Sessions ============

    /// Creates the session row if it does not exist. Returns `true` when a
    /// row was inserted.
    pub async fn ensure_session(&self, token: &str, user_ip: Option<&str>) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO research_sessions (token, user_ip, created_at) VALUES (?, ?, ?)",
        )
        .bind(token)
        .bind(user_ip)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_session(&self, token: &str) -> sqlx::Result<Option<ResearchSession>> {
        let row = sqlx::query(
            "SELECT id, token, user_ip, created_at, summary_count, sources_processed FROM research_sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    // ============ Summaries & citations ============

    /// Inserts a summary, its citations and the session counter bump in one
    /// transaction, marking `processed_entries` in the same transaction.
    /// Returns the new summary id.
    pub async fn record_summary(
        &self,
        token: &str,
        kind: SourceKind,
        content: &str,
        citations: &[NewCitation],
        processed_entries: &[i64],
    ) -> sqlx::Result<i64> {
        let now = now_ts();
        let word_count = content.split_whitespace().count() as i64;
        let takeaways = crate::extract::truncate_chars(content, TAKEAWAYS_CHARS);

        let mut tx = self.pool.begin().await?;

        let summary_id = sqlx::query(
            r#"
            INSERT INTO summaries (session_token, content, source_kind, word_count, key_takeaways, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(token)
        .bind(content)
        .bind(kind.as_str())
        .bind(word_count)
        .bind(takeaways)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for citation in citations {
            sqlx::query(
                r#"
                INSERT INTO citations (session_token, summary_id, source_url, source_title, source_kind, excerpt, relevance_score, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token)
            .bind(summary_id)
            .bind(&citation.source_url)
            .bind(&citation.source_title)
            .bind(kind.as_str())
            .bind(crate::extract::truncate_chars(
                &citation.excerpt,
                CITATION_EXCERPT_CHARS,
            ))
            .bind(kind.relevance_score())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE research_sessions
            SET summary_count = summary_count + 1,
                sources_processed = sources_processed + ?
            WHERE token = ?
            "#,
        )
        .bind(citations.len() as i64)
        .bind(token)
        .execute(&mut *tx)
        .await?;

        for id in processed_entries {
            sqlx::query("UPDATE rss_entries SET is_processed = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(summary_id)
    }

    pub async fn recent_summaries(&self, token: &str, limit: i64) -> sqlx::Result<Vec<Summary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_token, content, source_kind, word_count, key_takeaways, created_at
            FROM summaries WHERE session_token = ?
            ORDER BY created_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(summary_from_row).collect()
    }

    pub async fn citations_for_summary(&self, summary_id: i64) -> sqlx::Result<Vec<Citation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_token, summary_id, source_url, source_title, source_kind, excerpt, relevance_score, created_at
            FROM citations WHERE summary_id = ? ORDER BY id ASC
            "#,
        )
        .bind(summary_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(citation_from_row).collect()
    }

    pub async fn recent_citations(&self, token: &str, limit: i64) -> sqlx::Result<Vec<Citation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_token, summary_id, source_url, source_title, source_kind, excerpt, relevance_score, created_at
            FROM citations WHERE session_token = ?
            ORDER BY created_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(citation_from_row).collect()
    }

    // ============ Documents & Q&A ============

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_document(
        &self,
        token: &str,
        filename: &str,
        original_filename: &str,
        file_path: &str,
        content: &str,
        file_size: i64,
        page_count: i64,
    ) -> sqlx::Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO documents (filename, original_filename, file_path, content, session_token, file_size, page_count, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(filename)
        .bind(original_filename)
        .bind(file_path)
        .bind(content)
        .bind(token)
        .bind(file_size)
        .bind(page_count)
        .bind(now_ts())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_document(&self, id: i64) -> sqlx::Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, filename, original_filename, file_path, content, session_token, file_size, page_count, uploaded_at
            FROM documents WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn documents_for_session(&self, token: &str) -> sqlx::Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, filename, original_filename, file_path, content, session_token, file_size, page_count, uploaded_at
            FROM documents WHERE session_token = ?
            ORDER BY uploaded_at DESC, id DESC
            "#,
        )
        .bind(token)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    pub async fn insert_qa(
        &self,
        token: &str,
        document_id: i64,
        question: &str,
        answer: &str,
        confidence: f64,
    ) -> sqlx::Result<QaSession> {
        let now = now_ts();
        let id = sqlx::query(
            r#"
            INSERT INTO qa_sessions (session_token, document_id, question, answer, confidence_score, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(token)
        .bind(document_id)
        .bind(question)
        .bind(answer)
        .bind(confidence)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(QaSession {
            id,
            session_token: token.to_string(),
            document_id,
            question: question.to_string(),
            answer: answer.to_string(),
            confidence_score: confidence,
            created_at: now,
        })
    }

    pub async fn qa_for_document(&self, document_id: i64) -> sqlx::Result<Vec<QaSession>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_token, document_id, question, answer, confidence_score, created_at
            FROM qa_sessions WHERE document_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(qa_from_row).collect()
    }

    // ============ Feeds ============

    pub async fn feed_exists(&self, url: &str) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM rss_feeds WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn insert_feed(
        &self,
        url: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> sqlx::Result<i64> {
        let id = sqlx::query(
            "INSERT INTO rss_feeds (url, title, description, last_updated) VALUES (?, ?, ?, ?)",
        )
        .bind(url)
        .bind(title)
        .bind(description)
        .bind(now_ts())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn list_feeds(&self) -> sqlx::Result<Vec<RssFeed>> {
        let rows = sqlx::query(
            "SELECT id, url, title, description, last_updated, is_active, update_frequency FROM rss_feeds ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(feed_from_row).collect()
    }

    pub async fn active_feeds(&self) -> sqlx::Result<Vec<RssFeed>> {
        let rows = sqlx::query(
            "SELECT id, url, title, description, last_updated, is_active, update_frequency FROM rss_feeds WHERE is_active = 1 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(feed_from_row).collect()
    }

    pub async fn touch_feed(&self, feed_id: i64) -> sqlx::Result<()> {
        sqlx::query("UPDATE rss_feeds SET last_updated = ? WHERE id = ?")
            .bind(now_ts())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn guid_exists(&self, guid: &str) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM rss_entries WHERE guid = ?")
            .bind(guid)
            .fetch_one(&self.pool)
            .await
    }

    /// Inserts an entry unless its guid is already stored. Returns `true`
    /// when a row was written.
    pub async fn insert_entry(&self, feed_id: i64, entry: &NewEntry) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO rss_entries (feed_id, title, link, description, published_at, guid, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(feed_id)
        .bind(&entry.title)
        .bind(&entry.link)
        .bind(&entry.description)
        .bind(entry.published_at)
        .bind(&entry.guid)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unprocessed entries, newest first.
    pub async fn pending_entries(&self, limit: i64) -> sqlx::Result<Vec<RssEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, feed_id, title, link, description, published_at, guid, is_processed, created_at
            FROM rss_entries WHERE is_processed = 0
            ORDER BY COALESCE(published_at, created_at) DESC, id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn recent_entries(&self, limit: i64) -> sqlx::Result<Vec<RssEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, feed_id, title, link, description, published_at, guid, is_processed, created_at
            FROM rss_entries
            ORDER BY COALESCE(published_at, created_at) DESC, id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use tempfile::TempDir;

    /// Fresh schema in a scratch directory. Keep the `TempDir` alive.
    pub(crate) async fn test_store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn citation(url: &str) -> NewCitation {
        NewCitation {
            source_url: Some(url.to_string()),
            source_title: Some("Title".to_string()),
            excerpt: "x".repeat(1000),
        }
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent() {
        let (_tmp, store) = test_store().await;
        assert!(store.ensure_session("tok", Some("1.2.3.4")).await.unwrap());
        assert!(!store.ensure_session("tok", Some("5.6.7.8")).await.unwrap());
        let session = store.get_session("tok").await.unwrap().unwrap();
        assert_eq!(session.user_ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(session.summary_count, 0);
    }

    #[tokio::test]
    async fn record_summary_writes_citations_and_counters() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();

        let content = "word ".repeat(200);
        let id = store
            .record_summary(
                "tok",
                SourceKind::Url,
                &content,
                &[citation("https://a.example"), citation("https://b.example")],
                &[],
            )
            .await
            .unwrap();

        let citations = store.citations_for_summary(id).await.unwrap();
        assert_eq!(citations.len(), 2);
        assert!(citations.iter().all(|c| c.relevance_score == 0.8));
        assert!(citations
            .iter()
            .all(|c| c.excerpt.as_ref().unwrap().chars().count() == CITATION_EXCERPT_CHARS));

        let summaries = store.recent_summaries("tok", 5).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].word_count, 200);
        assert_eq!(
            summaries[0].key_takeaways.as_ref().unwrap().chars().count(),
            TAKEAWAYS_CHARS
        );

        let session = store.get_session("tok").await.unwrap().unwrap();
        assert_eq!(session.summary_count, 1);
        assert_eq!(session.sources_processed, 2);
    }

    #[tokio::test]
    async fn citation_requires_existing_summary() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let result = sqlx::query(
            "INSERT INTO citations (session_token, summary_id, source_kind, created_at) VALUES ('tok', 999, 'url', 0)",
        )
        .execute(store.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_guid_is_ignored() {
        let (_tmp, store) = test_store().await;
        let feed_id = store
            .insert_feed("https://feeds.example/rss", Some("Feed"), None)
            .await
            .unwrap();
        let entry = NewEntry {
            guid: "guid-1".to_string(),
            title: "First".to_string(),
            link: "https://feeds.example/1".to_string(),
            description: None,
            published_at: None,
        };
        assert!(store.insert_entry(feed_id, &entry).await.unwrap());
        assert!(!store.insert_entry(feed_id, &entry).await.unwrap());
        assert!(store.guid_exists("guid-1").await.unwrap());
        assert_eq!(store.pending_entries(10).await.unwrap().len(), 1);
    }

    async fn three_entries(store: &SqliteStore) -> Vec<RssEntry> {
        let feed_id = store.insert_feed("https://f.example", None, None).await.unwrap();
        for i in 0..3 {
            store
                .insert_entry(
                    feed_id,
                    &NewEntry {
                        guid: format!("g{}", i),
                        title: format!("Entry {}", i),
                        link: format!("https://f.example/{}", i),
                        description: Some("body".to_string()),
                        published_at: Some(1_700_000_000 + i),
                    },
                )
                .await
                .unwrap();
        }
        store.pending_entries(10).await.unwrap()
    }

    #[tokio::test]
    async fn processed_entries_leave_the_pending_list() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let pending = three_entries(&store).await;
        assert_eq!(pending[0].guid, "g2");
        store
            .record_summary(
                "tok",
                SourceKind::Rss,
                "digest",
                &[citation("https://f.example/2")],
                &[pending[0].id, pending[1].id],
            )
            .await
            .unwrap();
        let left = store.pending_entries(10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].guid, "g0");
    }

    #[tokio::test]
    async fn failed_entry_update_rolls_back_the_summary() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let pending = three_entries(&store).await;

        sqlx::query("DROP TABLE rss_entries")
            .execute(store.pool())
            .await
            .unwrap();
        let result = store
            .record_summary(
                "tok",
                SourceKind::Rss,
                "digest",
                &[citation("https://f.example/2")],
                &[pending[0].id],
            )
            .await;
        assert!(result.is_err());

        assert!(store.recent_summaries("tok", 5).await.unwrap().is_empty());
        let session = store.get_session("tok").await.unwrap().unwrap();
        assert_eq!(session.summary_count, 0);
        assert_eq!(session.sources_processed, 0);
    }
}
