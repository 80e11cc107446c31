use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS research_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL UNIQUE,
            user_ip TEXT,
            created_at INTEGER NOT NULL,
            summary_count INTEGER NOT NULL DEFAULT 0,
            sources_processed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_token TEXT NOT NULL,
            content TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            word_count INTEGER NOT NULL DEFAULT 0,
            key_takeaways TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (session_token) REFERENCES research_sessions(token)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS citations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_token TEXT NOT NULL,
            summary_id INTEGER NOT NULL,
            source_url TEXT,
            source_title TEXT,
            source_kind TEXT NOT NULL,
            excerpt TEXT,
            relevance_score REAL NOT NULL DEFAULT 0.0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (summary_id) REFERENCES summaries(id),
            FOREIGN KEY (session_token) REFERENCES research_sessions(token)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            content TEXT NOT NULL,
            session_token TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            page_count INTEGER NOT NULL DEFAULT 0,
            uploaded_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qa_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_token TEXT NOT NULL,
            document_id INTEGER NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            confidence_score REAL NOT NULL DEFAULT 0.0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rss_feeds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            title TEXT,
            description TEXT,
            last_updated INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            update_frequency INTEGER NOT NULL DEFAULT 60
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rss_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            feed_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            link TEXT NOT NULL,
            description TEXT,
            published_at INTEGER,
            guid TEXT NOT NULL UNIQUE,
            is_processed INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (feed_id) REFERENCES rss_feeds(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_stats (
            day TEXT PRIMARY KEY,
            total_sessions INTEGER NOT NULL DEFAULT 0,
            total_summaries INTEGER NOT NULL DEFAULT 0,
            total_documents INTEGER NOT NULL DEFAULT 0,
            total_qa_queries INTEGER NOT NULL DEFAULT 0,
            total_rss_entries INTEGER NOT NULL DEFAULT 0,
            avg_sources_per_session REAL NOT NULL DEFAULT 0.0,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_summaries_session ON summaries(session_token, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_citations_summary ON citations(summary_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_session ON documents(session_token)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_qa_document ON qa_sessions(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_pending ON rss_entries(is_processed, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
