//! Daily usage rollups and the `research stats` report.
//!
//! The `usage_stats` table holds one row per UTC calendar day. The row is
//! recomputed from the source tables after every write rather than
//! incremented, so it can never drift from what is actually stored.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::models::UsageStats;
use crate::store::{now_ts, SqliteStore};

/// Unix-second bounds `[start, end)` of a UTC day.
fn day_bounds(day: NaiveDate) -> (i64, i64) {
    let start = day
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default();
    (start, start + 86_400)
}

async fn count_between(
    store: &SqliteStore,
    table: &str,
    column: &str,
    start: i64,
    end: i64,
) -> sqlx::Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} >= ? AND {} < ?",
        table, column, column
    );
    sqlx::query_scalar(&sql)
        .bind(start)
        .bind(end)
        .fetch_one(store.pool())
        .await
}

/// Recounts `day` and upserts its row.
pub async fn recompute_day(store: &SqliteStore, day: NaiveDate) -> sqlx::Result<UsageStats> {
    let pool = store.pool();
    let (start, end) = day_bounds(day);

    let total_sessions = count_between(store, "research_sessions", "created_at", start, end).await?;
    let total_summaries = count_between(store, "summaries", "created_at", start, end).await?;
    let total_documents = count_between(store, "documents", "uploaded_at", start, end).await?;
    let total_qa_queries = count_between(store, "qa_sessions", "created_at", start, end).await?;
    let total_rss_entries = count_between(store, "rss_entries", "created_at", start, end).await?;

    let avg_sources_per_session: f64 = sqlx::query_scalar(
        "SELECT COALESCE(AVG(sources_processed), 0.0) FROM research_sessions WHERE created_at >= ? AND created_at < ?",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    let stats = UsageStats {
        day: day.format("%Y-%m-%d").to_string(),
        total_sessions,
        total_summaries,
        total_documents,
        total_qa_queries,
        total_rss_entries,
        avg_sources_per_session,
    };

    sqlx::query(
        r#"
        INSERT INTO usage_stats (day, total_sessions, total_summaries, total_documents, total_qa_queries, total_rss_entries, avg_sources_per_session, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(day) DO UPDATE SET
            total_sessions = excluded.total_sessions,
            total_summaries = excluded.total_summaries,
            total_documents = excluded.total_documents,
            total_qa_queries = excluded.total_qa_queries,
            total_rss_entries = excluded.total_rss_entries,
            avg_sources_per_session = excluded.avg_sources_per_session,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&stats.day)
    .bind(stats.total_sessions)
    .bind(stats.total_summaries)
    .bind(stats.total_documents)
    .bind(stats.total_qa_queries)
    .bind(stats.total_rss_entries)
    .bind(stats.avg_sources_per_session)
    .bind(now_ts())
    .execute(pool)
    .await?;

    Ok(stats)
}

pub async fn recompute_today(store: &SqliteStore) -> sqlx::Result<UsageStats> {
    recompute_day(store, Utc::now().date_naive()).await
}

/// Stored rows for the most recent `days` days, newest first.
pub async fn recent_usage(store: &SqliteStore, days: i64) -> sqlx::Result<Vec<UsageStats>> {
    let rows = sqlx::query(
        r#"
        SELECT day, total_sessions, total_summaries, total_documents, total_qa_queries, total_rss_entries, avg_sources_per_session
        FROM usage_stats ORDER BY day DESC LIMIT ?
        "#,
    )
    .bind(days)
    .fetch_all(store.pool())
    .await?;

    rows.iter()
        .map(|row| {
            Ok(UsageStats {
                day: row.try_get("day")?,
                total_sessions: row.try_get("total_sessions")?,
                total_summaries: row.try_get("total_summaries")?,
                total_documents: row.try_get("total_documents")?,
                total_qa_queries: row.try_get("total_qa_queries")?,
                total_rss_entries: row.try_get("total_rss_entries")?,
                avg_sources_per_session: row.try_get("avg_sources_per_session")?,
            })
        })
        .collect()
}

/// Run the stats command: recompute today and print totals plus the last week.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    recompute_today(&store).await?;

    let mut totals = Vec::new();
    for table in [
        "research_sessions",
        "summaries",
        "citations",
        "documents",
        "qa_sessions",
        "rss_feeds",
        "rss_entries",
    ] {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await?;
        totals.push((table, n));
    }

    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rss_entries WHERE is_processed = 0")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Research Assistant — Usage Stats");
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    for (table, n) in &totals {
        println!("  {:<18} {}", table, n);
    }
    println!("  {:<18} {}", "pending entries", pending);

    let days = recent_usage(&store, 7).await?;
    if !days.is_empty() {
        println!();
        println!("  Last {} day(s):", days.len());
        println!(
            "  {:<12} {:>8} {:>9} {:>6} {:>5} {:>8} {:>12}",
            "DAY", "SESSIONS", "SUMMARIES", "DOCS", "Q&A", "ENTRIES", "SRC/SESSION"
        );
        println!("  {}", "-".repeat(66));
        for d in &days {
            println!(
                "  {:<12} {:>8} {:>9} {:>6} {:>5} {:>8} {:>12.2}",
                d.day,
                d.total_sessions,
                d.total_summaries,
                d.total_documents,
                d.total_qa_queries,
                d.total_rss_entries,
                d.avg_sources_per_session
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let now = Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewCitation, SourceKind};
    use crate::store::tests::test_store;

    #[tokio::test]
    async fn recompute_counts_todays_rows() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("a", None).await.unwrap();
        store.ensure_session("b", None).await.unwrap();
        store
            .record_summary(
                "a",
                SourceKind::Url,
                "text",
                &[
                    NewCitation {
                        source_url: Some("https://x.example".into()),
                        source_title: None,
                        excerpt: "e".into(),
                    },
                    NewCitation {
                        source_url: Some("https://y.example".into()),
                        source_title: None,
                        excerpt: "e".into(),
                    },
                ],
                &[],
            )
            .await
            .unwrap();

        let stats = recompute_today(&store).await.unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_summaries, 1);
        assert_eq!(stats.total_documents, 0);
        assert!((stats.avg_sources_per_session - 1.0).abs() < f64::EPSILON);

        // A second recompute overwrites rather than adds.
        let again = recompute_today(&store).await.unwrap();
        assert_eq!(again.total_sessions, 2);
        let rows = recent_usage(&store, 7).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_summaries, 1);
    }

    #[tokio::test]
    async fn other_days_are_not_counted() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("a", None).await.unwrap();
        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        let stats = recompute_day(&store, yesterday).await.unwrap();
        assert_eq!(stats.total_sessions, 0);
    }

    #[test]
    fn bytes_format() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
