//! Multi-source aggregation and summarization.
//!
//! One run walks a list of sources (submitted URLs, one uploaded PDF or the
//! pending feed entries), builds a combined text buffer plus a list of
//! per-source warnings, calls the [`Summarizer`] once and persists the
//! result. A run either stores a complete summary with all its citations or
//! stores nothing.
//!
//! ```text
//! sources ──► fetch/extract each ──► buffer + warnings
//!                                        │
//!                           empty? ──────┤──► AllSourcesFailed / NoSubstantialContent
//!                                        ▼
//!                  summarize(instruction + cap(buffer, 15000))
//!                                        │
//!                                        ▼
//!          record summary + citations, mark entries, recompute stats
//! ```

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, LimitsConfig};
use crate::db;
use crate::extract::{extract_text_blocking, truncate_chars, ExtractError};
use crate::fetch::{normalize_url, FetchError, Fetcher};
use crate::llm::{
    build_prompt, create_summarizer, SummarizeError, Summarizer, DIGEST_INSTRUCTION,
    PDF_SUMMARY_INSTRUCTION, URL_SUMMARY_INSTRUCTION,
};
use crate::models::{Document, NewCitation, SourceKind};
use crate::stats;
use crate::store::SqliteStore;
use crate::views::escape_html;

/// Session token used by terminal runs.
pub const CLI_SESSION: &str = "cli";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Please enter at least one URL.")]
    EmptyInput,
    #[error("Please enter valid URLs.")]
    NoValidInput,
    #[error("Could not extract content from any URLs. {}", .0.join("; "))]
    AllSourcesFailed(Vec<String>),
    #[error("No substantial content found in any of the URLs.")]
    NoSubstantialContent,
    #[error("No new RSS entries to summarize.")]
    NoPendingEntries,
    #[error("{}", summarizer_message(.0))]
    Summarizer(SummarizeError),
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl AggregateError {
    /// True for failures caused by the request or its sources rather than by
    /// the server itself.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, AggregateError::Storage(_))
    }
}

pub(crate) fn summarizer_message(err: &SummarizeError) -> String {
    match err {
        SummarizeError::EmptyResponse => "Failed to generate summary from Gemini API.".to_string(),
        other => format!("Error calling Gemini API: {}", other),
    }
}

/// Splits a newline-separated list, trimming lines and dropping blanks. At
/// least one line must parse as a URL with a host once a scheme is added;
/// the others are kept and fail individually when fetched.
pub fn parse_url_list(input: &str) -> Result<Vec<String>, AggregateError> {
    if input.trim().is_empty() {
        return Err(AggregateError::EmptyInput);
    }
    let urls: Vec<String> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    let any_usable = urls.iter().any(|raw| {
        Url::parse(&normalize_url(raw))
            .map(|u| u.host_str().is_some())
            .unwrap_or(false)
    });
    if !any_usable {
        return Err(AggregateError::NoValidInput);
    }
    Ok(urls)
}

#[derive(Debug, Error)]
enum SourceFailure {
    #[error(transparent)]
    Fetch(FetchError),
    #[error(transparent)]
    Extract(ExtractError),
}

impl SourceFailure {
    fn describe(&self, url: &str) -> String {
        match self {
            SourceFailure::Fetch(e) => format!("Error accessing {}: {}", url, e),
            SourceFailure::Extract(e) => format!("Error processing {}: {}", url, e),
        }
    }
}

/// Combined text and bookkeeping for one run.
#[derive(Debug, Default)]
struct Collected {
    buffer: String,
    citations: Vec<NewCitation>,
    warnings: Vec<String>,
}

impl Collected {
    fn push_source(&mut self, label: &str, url: Option<String>, title: Option<String>, text: &str) {
        self.buffer.push_str("\n\nContent from ");
        self.buffer.push_str(label);
        self.buffer.push_str(":\n");
        self.buffer.push_str(text);
        self.citations.push(NewCitation {
            source_url: url,
            source_title: title,
            excerpt: text.to_string(),
        });
    }
}

/// A persisted summary, ready to render.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary_id: i64,
    pub kind: SourceKind,
    /// Model output as returned.
    pub text: String,
    pub citations: Vec<NewCitation>,
    pub warnings: Vec<String>,
}

impl SummaryOutcome {
    /// Escaped summary with line breaks and the trailing warnings note.
    pub fn html(&self) -> String {
        render_summary_html(&self.text, &self.warnings, self.kind)
    }
}

/// Escapes `text`, turns newlines into `<br>` and appends a note listing
/// `warnings` when there are any.
pub fn render_summary_html(text: &str, warnings: &[String], kind: SourceKind) -> String {
    let mut html = escape_html(text).replace('\n', "<br>");
    if !warnings.is_empty() {
        let what = match kind {
            SourceKind::Rss => "entries",
            SourceKind::Pdf => "pages",
            SourceKind::Url => "URLs",
        };
        html.push_str(&format!(
            "<br><br><em>Note: Some {} had issues: {}</em>",
            what,
            escape_html(&warnings.join("; "))
        ));
    }
    html
}

/// Runs aggregations against one store, fetcher and summarizer.
pub struct Aggregator<'a> {
    store: &'a SqliteStore,
    fetcher: &'a Fetcher,
    summarizer: &'a dyn Summarizer,
    limits: &'a LimitsConfig,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        store: &'a SqliteStore,
        fetcher: &'a Fetcher,
        summarizer: &'a dyn Summarizer,
        limits: &'a LimitsConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            summarizer,
            limits,
        }
    }

    /// Summarizes every URL in the newline-separated `input`.
    pub async fn summarize_urls(
        &self,
        token: &str,
        input: &str,
    ) -> Result<SummaryOutcome, AggregateError> {
        let urls = parse_url_list(input)?;
        let mut collected = Collected::default();
        let mut failures = 0usize;

        for raw in &urls {
            let url = normalize_url(raw);
            match self.read_url(&url).await {
                Ok((title, text)) => {
                    if text.chars().count() > self.limits.min_content_chars {
                        debug!(%url, chars = text.chars().count(), "source accepted");
                        collected.push_source(&url, Some(url.clone()), title.or(Some(url.clone())), &text);
                    } else {
                        debug!(%url, "source too short");
                        collected.warnings.push(format!("Little content found at {}", url));
                    }
                }
                Err(failure) => {
                    warn!(%url, error = %failure, "source failed");
                    failures += 1;
                    collected.warnings.push(failure.describe(&url));
                }
            }
        }

        if collected.citations.is_empty() {
            if failures > 0 {
                return Err(AggregateError::AllSourcesFailed(collected.warnings));
            }
            return Err(AggregateError::NoSubstantialContent);
        }

        self.finish(token, SourceKind::Url, URL_SUMMARY_INSTRUCTION, collected, &[])
            .await
    }

    async fn read_url(&self, url: &str) -> Result<(Option<String>, String), SourceFailure> {
        let page = self.fetcher.fetch(url).await.map_err(SourceFailure::Fetch)?;
        let extracted = extract_text_blocking(page.bytes, page.kind, self.limits.per_source_chars)
            .await
            .map_err(SourceFailure::Extract)?;
        Ok((extracted.title, extracted.text))
    }

    /// Summarizes an uploaded document.
    pub async fn summarize_pdf(
        &self,
        token: &str,
        document: &Document,
    ) -> Result<SummaryOutcome, AggregateError> {
        let text = truncate_chars(&document.content, self.limits.per_source_chars);
        if text.trim().is_empty() {
            return Err(AggregateError::NoSubstantialContent);
        }

        let mut collected = Collected::default();
        collected.push_source(
            &document.original_filename,
            None,
            Some(document.original_filename.clone()),
            text,
        );
        self.finish(token, SourceKind::Pdf, PDF_SUMMARY_INSTRUCTION, collected, &[])
            .await
    }

    /// Digests the pending feed entries and marks them processed.
    pub async fn summarize_digest(&self, token: &str) -> Result<SummaryOutcome, AggregateError> {
        let entries = self.store.pending_entries(self.limits.digest_entries).await?;
        if entries.is_empty() {
            return Err(AggregateError::NoPendingEntries);
        }

        let mut collected = Collected::default();
        for entry in &entries {
            let text = match entry.description.as_deref() {
                Some(desc) if !desc.trim().is_empty() => format!("{}. {}", entry.title, desc),
                _ => entry.title.clone(),
            };
            let text = truncate_chars(&text, self.limits.per_source_chars);
            if entry.link.is_empty() {
                collected
                    .warnings
                    .push(format!("Entry \"{}\" has no link", entry.title));
            }
            let label = if entry.link.is_empty() {
                entry.title.clone()
            } else {
                format!("{} ({})", entry.title, entry.link)
            };
            let url = (!entry.link.is_empty()).then(|| entry.link.clone());
            collected.push_source(&label, url, Some(entry.title.clone()), text);
        }

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        self.finish(token, SourceKind::Rss, DIGEST_INSTRUCTION, collected, &ids)
            .await
    }

    async fn finish(
        &self,
        token: &str,
        kind: SourceKind,
        instruction: &str,
        collected: Collected,
        entry_ids: &[i64],
    ) -> Result<SummaryOutcome, AggregateError> {
        let content = truncate_chars(&collected.buffer, self.limits.aggregate_chars);
        let prompt = build_prompt(instruction, content);

        let text = self
            .summarizer
            .generate(&prompt)
            .await
            .map_err(AggregateError::Summarizer)?;

        let summary_id = self
            .store
            .record_summary(token, kind, &text, &collected.citations, entry_ids)
            .await?;
        stats::recompute_today(self.store).await?;

        info!(
            summary_id,
            kind = %kind,
            sources = collected.citations.len(),
            warnings = collected.warnings.len(),
            model = self.summarizer.model_name(),
            "summary recorded"
        );

        Ok(SummaryOutcome {
            summary_id,
            kind,
            text,
            citations: collected.citations,
            warnings: collected.warnings,
        })
    }
}

// ============ CLI ============

fn print_outcome(outcome: &SummaryOutcome) {
    println!("{}", outcome.text.trim_end());
    println!();
    println!("Sources ({}):", outcome.citations.len());
    for citation in &outcome.citations {
        println!(
            "  - {}",
            citation
                .source_url
                .as_deref()
                .or(citation.source_title.as_deref())
                .unwrap_or("(unknown)")
        );
    }
    if !outcome.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &outcome.warnings {
            println!("  - {}", warning);
        }
    }
}

/// `research summarize <URL>...`
pub async fn run_summarize(config: &Config, urls: &[String]) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let fetcher = Fetcher::new(&config.fetch);
    let summarizer = create_summarizer(config)?;

    store.ensure_session(CLI_SESSION, None).await?;
    let aggregator = Aggregator::new(&store, &fetcher, summarizer.as_ref(), &config.limits);
    let outcome = aggregator.summarize_urls(CLI_SESSION, &urls.join("\n")).await?;
    print_outcome(&outcome);

    pool.close().await;
    Ok(())
}

/// `research digest`
pub async fn run_digest(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let fetcher = Fetcher::new(&config.fetch);
    let summarizer = create_summarizer(config)?;

    store.ensure_session(CLI_SESSION, None).await?;
    let aggregator = Aggregator::new(&store, &fetcher, summarizer.as_ref(), &config.limits);
    let outcome = aggregator.summarize_digest(CLI_SESSION).await?;
    print_outcome(&outcome);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::llm::tests::FakeSummarizer;
    use crate::models::NewEntry;
    use crate::store::tests::test_store;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page(title: &str, body_chars: usize) -> String {
        format!(
            "<html><head><title>{}</title><script>var hidden = 1;</script></head>\
             <body><p>{}</p></body></html>",
            title,
            "word ".repeat(body_chars / 5)
        )
    }

    fn open_fetcher() -> Fetcher {
        Fetcher::new(&FetchConfig {
            allow_private_networks: true,
            ..FetchConfig::default()
        })
    }

    async fn mount_page(server: &MockServer, at: &str, html: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(server)
            .await;
    }

    #[test]
    fn url_list_parsing() {
        assert!(matches!(parse_url_list(""), Err(AggregateError::EmptyInput)));
        assert!(matches!(
            parse_url_list("  \n \n"),
            Err(AggregateError::EmptyInput)
        ));
        assert!(matches!(
            parse_url_list("has spaces in it\n"),
            Err(AggregateError::NoValidInput)
        ));
        assert_eq!(
            parse_url_list(" a.example \n\nb.example\r\n").unwrap(),
            vec!["a.example", "b.example"]
        );
    }

    #[test]
    fn error_messages() {
        let all = AggregateError::AllSourcesFailed(vec!["e1".into(), "e2".into()]);
        assert_eq!(
            all.to_string(),
            "Could not extract content from any URLs. e1; e2"
        );
        assert_eq!(
            AggregateError::Summarizer(SummarizeError::EmptyResponse).to_string(),
            "Failed to generate summary from Gemini API."
        );
        assert!(AggregateError::Summarizer(SummarizeError::Disabled)
            .to_string()
            .starts_with("Error calling Gemini API: "));
    }

    #[test]
    fn rendering_escapes_model_output() {
        let html = render_summary_html(
            "* <b>bold</b>\n* next",
            &["Little content found at https://a.example".to_string()],
            SourceKind::Url,
        );
        assert!(html.starts_with("* &lt;b&gt;bold&lt;/b&gt;<br>* next"));
        assert!(html.ends_with(
            "<br><br><em>Note: Some URLs had issues: Little content found at https://a.example</em>"
        ));
        let digest = render_summary_html("x", &["w".to_string()], SourceKind::Rss);
        assert!(digest.contains("Some entries had issues"));
        assert_eq!(render_summary_html("a\nb", &[], SourceKind::Url), "a<br>b");
    }

    #[tokio::test]
    async fn mixed_sources_cite_only_the_good_ones() {
        let server = MockServer::start().await;
        mount_page(&server, "/long", page("Long Read", 2000)).await;
        mount_page(&server, "/short", page("Short", 20)).await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = open_fetcher();
        let fake = FakeSummarizer::replying("* summary point");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let input = format!(
            "{base}/long\n{base}/short\n{base}/missing",
            base = server.uri()
        );
        let outcome = aggregator.summarize_urls("tok", &input).await.unwrap();

        assert_eq!(outcome.citations.len(), 1);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings[0].starts_with("Little content found at "));
        assert!(outcome.warnings[1].starts_with(&format!("Error accessing {}/missing", server.uri())));

        let stored = store.citations_for_summary(outcome.summary_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_title.as_deref(), Some("Long Read"));
        assert_eq!(stored[0].excerpt.as_ref().unwrap().chars().count(), 200);
        assert!((stored[0].relevance_score - 0.8).abs() < f64::EPSILON);

        let prompts = fake.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with(URL_SUMMARY_INSTRUCTION));
        assert!(prompts[0].contains(&format!("Content from {}/long:\n", server.uri())));
        assert!(!prompts[0].contains("hidden"));

        let session = store.get_session("tok").await.unwrap().unwrap();
        assert_eq!(session.summary_count, 1);
        assert_eq!(session.sources_processed, 1);
    }

    #[tokio::test]
    async fn prompt_never_exceeds_aggregate_cap() {
        let server = MockServer::start().await;
        for p in ["/a", "/b", "/c", "/d"] {
            mount_page(&server, p, page("Big", 9000)).await;
        }

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = open_fetcher();
        let fake = FakeSummarizer::replying("ok");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let input = ["/a", "/b", "/c", "/d"]
            .iter()
            .map(|p| format!("{}{}", server.uri(), p))
            .collect::<Vec<_>>()
            .join("\n");
        let outcome = aggregator.summarize_urls("tok", &input).await.unwrap();
        assert_eq!(outcome.citations.len(), 4);

        let prompt = &fake.prompts()[0];
        let overhead = URL_SUMMARY_INSTRUCTION.chars().count() + 2;
        assert_eq!(prompt.chars().count(), overhead + limits.aggregate_chars);
    }

    #[tokio::test]
    async fn all_failures_store_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = open_fetcher();
        let fake = FakeSummarizer::replying("unused");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let input = format!("{0}/one\n{0}/two", server.uri());
        let err = aggregator.summarize_urls("tok", &input).await.unwrap_err();
        match &err {
            AggregateError::AllSourcesFailed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("; "));
        assert!(fake.prompts().is_empty());
        assert!(store.recent_summaries("tok", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_pages_only_is_no_substantial_content() {
        let server = MockServer::start().await;
        mount_page(&server, "/tiny", page("Tiny", 10)).await;

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = open_fetcher();
        let fake = FakeSummarizer::replying("unused");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let err = aggregator
            .summarize_urls("tok", &format!("{}/tiny", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, AggregateError::NoSubstantialContent));
    }

    #[tokio::test]
    async fn short_page_and_error_lists_every_problem() {
        let server = MockServer::start().await;
        mount_page(&server, "/short", page("Short", 20)).await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = open_fetcher();
        let fake = FakeSummarizer::replying("unused");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let input = format!("{0}/short\n{0}/missing", server.uri());
        let err = aggregator.summarize_urls("tok", &input).await.unwrap_err();
        match &err {
            AggregateError::AllSourcesFailed(problems) => assert_eq!(problems.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
        let message = err.to_string();
        assert!(message.starts_with("Could not extract content from any URLs. "));
        assert!(message.contains(&format!("Little content found at {}/short", server.uri())));
        assert!(message.contains(&format!("Error accessing {}/missing", server.uri())));
        assert!(fake.prompts().is_empty());
        assert!(store.recent_summaries("tok", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_address_is_never_contacted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page("Internal", 2000)))
            .expect(0)
            .mount(&server)
            .await;

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = Fetcher::new(&FetchConfig::default());
        let fake = FakeSummarizer::replying("unused");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let err = aggregator
            .summarize_urls("tok", &format!("{}/admin", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, AggregateError::AllSourcesFailed(_)));
        assert!(err.to_string().contains("non-public address"));
    }

    #[tokio::test]
    async fn unresolvable_host_becomes_a_note() {
        let server = MockServer::start().await;
        mount_page(&server, "/", page("Example Domain", 2000)).await;

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = open_fetcher();
        let fake = FakeSummarizer::replying("* point");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let input = format!("{}/\nnotarealdomain.invalid", server.uri());
        let outcome = aggregator.summarize_urls("tok", &input).await.unwrap();
        assert_eq!(outcome.citations.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("Error accessing https://notarealdomain.invalid: "));
        assert!(outcome
            .html()
            .contains("<em>Note: Some URLs had issues: Error accessing https://notarealdomain.invalid: "));
    }

    #[tokio::test]
    async fn summarizer_failure_persists_nothing() {
        let server = MockServer::start().await;
        mount_page(&server, "/long", page("Long", 2000)).await;

        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let fetcher = open_fetcher();
        let fake = FakeSummarizer::failing();
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let err = aggregator
            .summarize_urls("tok", &format!("{}/long", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to generate summary from Gemini API.");
        assert!(store.recent_summaries("tok", 10).await.unwrap().is_empty());
        let session = store.get_session("tok").await.unwrap().unwrap();
        assert_eq!(session.summary_count, 0);
    }

    #[tokio::test]
    async fn digest_marks_entries_processed() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let feed_id = store.insert_feed("https://news.example/rss", None, None).await.unwrap();
        for i in 0..3 {
            store
                .insert_entry(
                    feed_id,
                    &NewEntry {
                        guid: format!("g{}", i),
                        title: format!("Story {}", i),
                        link: format!("https://news.example/{}", i),
                        description: Some("Something happened.".into()),
                        published_at: None,
                    },
                )
                .await
                .unwrap();
        }

        let fetcher = open_fetcher();
        let fake = FakeSummarizer::replying("* digest");
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        let outcome = aggregator.summarize_digest("tok").await.unwrap();
        assert_eq!(outcome.kind, SourceKind::Rss);
        assert_eq!(outcome.citations.len(), 3);
        assert!(fake.prompts()[0].starts_with(DIGEST_INSTRUCTION));
        assert!(store.pending_entries(20).await.unwrap().is_empty());

        let again = aggregator.summarize_digest("tok").await.unwrap_err();
        assert!(matches!(again, AggregateError::NoPendingEntries));
    }

    #[tokio::test]
    async fn failed_digest_leaves_entries_pending() {
        let (_tmp, store) = test_store().await;
        store.ensure_session("tok", None).await.unwrap();
        let feed_id = store.insert_feed("https://news.example/rss", None, None).await.unwrap();
        store
            .insert_entry(
                feed_id,
                &NewEntry {
                    guid: "only".into(),
                    title: "Only story".into(),
                    link: "https://news.example/only".into(),
                    description: None,
                    published_at: None,
                },
            )
            .await
            .unwrap();

        let fetcher = open_fetcher();
        let fake = FakeSummarizer::failing();
        let limits = LimitsConfig::default();
        let aggregator = Aggregator::new(&store, &fetcher, &fake, &limits);

        assert!(aggregator.summarize_digest("tok").await.is_err());
        assert_eq!(store.pending_entries(20).await.unwrap().len(), 1);
    }
}
