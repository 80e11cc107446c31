//! RSS/Atom subscription and polling.
//!
//! Feeds are fetched through the guarded [`Fetcher`] and parsed with
//! `feed-rs`. Each refresh looks at the first few entries of every active
//! feed, skips guids that are already stored, and inserts the rest with
//! bounded field lengths. Refresh is strictly sequential.

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, LimitsConfig};
use crate::db;
use crate::extract::{html_fragment_to_text, normalize_whitespace, truncate_chars};
use crate::fetch::{normalize_url, FetchError, Fetcher};
use crate::models::NewEntry;
use crate::stats;
use crate::store::SqliteStore;

pub const MAX_TITLE_CHARS: usize = 300;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Please enter a feed URL.")]
    EmptyUrl,
    #[error("Feed already subscribed: {0}")]
    AlreadySubscribed(String),
    #[error("Error accessing {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("Invalid RSS feed at {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

/// A parsed feed document.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub entries: Vec<NewEntry>,
}

/// Parses RSS or Atom bytes. Any parser error means the feed is malformed.
pub fn parse_feed(bytes: &[u8]) -> std::result::Result<ParsedFeed, String> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| e.to_string())?;

    let title = feed
        .title
        .map(|t| normalize_whitespace(&t.content))
        .filter(|t| !t.is_empty());
    let description = feed
        .description
        .map(|d| html_fragment_to_text(&d.content))
        .filter(|d| !d.is_empty());
    let entries = feed.entries.into_iter().map(normalize_entry).collect();

    Ok(ParsedFeed {
        title,
        description,
        entries,
    })
}

fn normalize_entry(entry: feed_rs::model::Entry) -> NewEntry {
    let title = entry
        .title
        .map(|t| normalize_whitespace(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let link = entry
        .links
        .iter()
        .find_map(|l| web_link(&l.href))
        .unwrap_or_default();
    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|d| html_fragment_to_text(&d))
        .filter(|d| !d.is_empty())
        .map(|d| truncate_chars(&d, MAX_DESCRIPTION_CHARS).to_string());
    let published_at = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.timestamp());

    NewEntry {
        guid: entry.id,
        title: truncate_chars(&title, MAX_TITLE_CHARS).to_string(),
        link,
        description,
        published_at,
    }
}

/// `href` if it is an absolute http(s) URL. Anything else (`javascript:`,
/// `data:`, relative paths) is dropped before it can reach a page.
fn web_link(href: &str) -> Option<String> {
    let href = href.trim();
    let url = url::Url::parse(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| href.to_string())
}

/// Stores up to `limit` of `entries`, skipping known guids. Returns how many
/// rows were written.
pub async fn ingest_entries(
    store: &SqliteStore,
    feed_id: i64,
    entries: &[NewEntry],
    limit: usize,
) -> sqlx::Result<usize> {
    let mut inserted = 0;
    for entry in entries.iter().take(limit) {
        if entry.guid.is_empty() || store.guid_exists(&entry.guid).await? {
            debug!(guid = %entry.guid, "skipping known entry");
            continue;
        }
        if store.insert_entry(feed_id, entry).await? {
            inserted += 1;
        }
    }
    Ok(inserted)
}

async fn fetch_and_parse(fetcher: &Fetcher, url: &str) -> std::result::Result<ParsedFeed, FeedError> {
    let page = fetcher.fetch(url).await.map_err(|source| FeedError::Fetch {
        url: url.to_string(),
        source,
    })?;
    parse_feed(&page.bytes).map_err(|reason| FeedError::Malformed {
        url: url.to_string(),
        reason,
    })
}

/// Outcome of a successful subscription.
#[derive(Debug, Clone)]
pub struct AddedFeed {
    pub feed_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub new_entries: usize,
}

/// Validates, subscribes to and performs the first ingest of `raw_url`.
pub async fn add_feed(
    store: &SqliteStore,
    fetcher: &Fetcher,
    limits: &LimitsConfig,
    raw_url: &str,
) -> std::result::Result<AddedFeed, FeedError> {
    if raw_url.trim().is_empty() {
        return Err(FeedError::EmptyUrl);
    }
    let url = normalize_url(raw_url);
    if store.feed_exists(&url).await? {
        return Err(FeedError::AlreadySubscribed(url));
    }

    let parsed = fetch_and_parse(fetcher, &url).await?;
    let title = parsed
        .title
        .as_deref()
        .map(|t| truncate_chars(t, MAX_TITLE_CHARS).to_string());
    let feed_id = store
        .insert_feed(&url, title.as_deref(), parsed.description.as_deref())
        .await?;
    let new_entries =
        ingest_entries(store, feed_id, &parsed.entries, limits.feed_entries_per_refresh).await?;
    stats::recompute_today(store).await?;

    info!(feed_id, %url, new_entries, "feed added");
    Ok(AddedFeed {
        feed_id,
        url,
        title,
        new_entries,
    })
}

/// What a refresh pass did.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub feeds_checked: usize,
    pub new_entries: usize,
    pub errors: Vec<String>,
}

/// Polls every active feed once, in order. Fetch and parse problems are
/// recorded per feed; storage failures abort.
pub async fn refresh_feeds(
    store: &SqliteStore,
    fetcher: &Fetcher,
    limits: &LimitsConfig,
) -> std::result::Result<RefreshReport, FeedError> {
    let mut report = RefreshReport::default();

    for feed in store.active_feeds().await? {
        report.feeds_checked += 1;
        match fetch_and_parse(fetcher, &feed.url).await {
            Ok(parsed) => {
                let n = ingest_entries(
                    store,
                    feed.id,
                    &parsed.entries,
                    limits.feed_entries_per_refresh,
                )
                .await?;
                store.touch_feed(feed.id).await?;
                debug!(feed_id = feed.id, new_entries = n, "feed refreshed");
                report.new_entries += n;
            }
            Err(FeedError::Storage(e)) => return Err(FeedError::Storage(e)),
            Err(e) => {
                warn!(feed_id = feed.id, error = %e, "feed refresh failed");
                report.errors.push(e.to_string());
            }
        }
    }

    stats::recompute_today(store).await?;
    info!(
        feeds = report.feeds_checked,
        new_entries = report.new_entries,
        errors = report.errors.len(),
        "feed refresh complete"
    );
    Ok(report)
}

// ============ CLI ============

pub async fn run_feeds_add(config: &Config, url: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let fetcher = Fetcher::new(&config.fetch);

    let added = add_feed(&store, &fetcher, &config.limits, url).await?;
    println!("feed added");
    println!("  id:          {}", added.feed_id);
    println!("  url:         {}", added.url);
    println!(
        "  title:       {}",
        added.title.as_deref().unwrap_or("(untitled)")
    );
    println!("  new entries: {}", added.new_entries);

    pool.close().await;
    Ok(())
}

pub async fn run_feeds_refresh(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let fetcher = Fetcher::new(&config.fetch);

    let report = refresh_feeds(&store, &fetcher, &config.limits).await?;
    println!("refresh feeds");
    println!("  feeds checked: {}", report.feeds_checked);
    println!("  new entries:   {}", report.new_entries);
    for err in &report.errors {
        println!("  error: {}", err);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

pub async fn run_feeds_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let feeds = store.list_feeds().await?;
    if feeds.is_empty() {
        println!("No feeds subscribed.");
    } else {
        println!("{:<5} {:<8} {:<40} {}", "ID", "ACTIVE", "TITLE", "URL");
        for feed in &feeds {
            println!(
                "{:<5} {:<8} {:<40} {}",
                feed.id,
                if feed.is_active { "yes" } else { "no" },
                truncate_chars(feed.title.as_deref().unwrap_or("(untitled)"), 40),
                feed.url
            );
        }
    }

    pool.close().await;
    Ok(())
}
