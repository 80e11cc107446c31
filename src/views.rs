//! Server-rendered HTML pages.
//!
//! Every page is a plain `String` built with `format!`. Anything that came
//! from a visitor, a fetched page, a feed or the model goes through
//! [`escape_html`] first; the only pre-rendered fragment accepted is the
//! summary HTML produced by [`crate::aggregate::render_summary_html`], which
//! is itself escaped.

use crate::extract::truncate_chars;
use crate::models::{Citation, Document, NewCitation, QaSession, ResearchSession, RssEntry, RssFeed, Summary, UsageStats};
use crate::stats::{format_bytes, format_ts_iso, format_ts_relative};

/// Escapes the five HTML-significant characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:860px;margin:2rem auto;padding:0 1rem;color:#222}\
nav a{margin-right:1rem}textarea,input[type=text],input[type=url]{width:100%;box-sizing:border-box;padding:.5rem}\
.error{background:#fdecea;border:1px solid #f5c2c0;padding:.75rem;margin:1rem 0}\
.notice{background:#eef6ee;border:1px solid #c3e0c3;padding:.75rem;margin:1rem 0}\
.summary{background:#f7f7f9;border:1px solid #ddd;padding:1rem;margin:1rem 0}\
.muted{color:#777;font-size:.9em}table{border-collapse:collapse;width:100%}td,th{text-align:left;padding:.3rem;border-bottom:1px solid #eee}";

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title} · Research Assistant</title><style>{style}</style></head>\
         <body><nav><a href=\"/\">Summarize</a><a href=\"/upload\">Documents</a>\
         <a href=\"/feeds\">Feeds</a><a href=\"/dashboard\">Dashboard</a></nav>\
         <h1>{title}</h1>{body}</body></html>",
        title = escape_html(title),
        style = STYLE,
        body = body
    )
}

fn error_box(error: Option<&str>) -> String {
    error
        .map(|e| format!("<div class=\"error\">{}</div>", escape_html(e)))
        .unwrap_or_default()
}

fn notice_box(message: Option<&str>) -> String {
    message
        .map(|m| format!("<div class=\"notice\">{}</div>", escape_html(m)))
        .unwrap_or_default()
}

fn summary_list(summaries: &[Summary]) -> String {
    if summaries.is_empty() {
        return "<p class=\"muted\">No summaries yet.</p>".to_string();
    }
    let items: String = summaries
        .iter()
        .map(|s| {
            format!(
                "<li><strong>{kind}</strong> · {words} words · <span class=\"muted\">{when}</span><br>{excerpt}</li>",
                kind = s.source_kind,
                words = s.word_count,
                when = format_ts_relative(s.created_at),
                excerpt = escape_html(truncate_chars(
                    s.key_takeaways.as_deref().unwrap_or(&s.content),
                    200
                )),
            )
        })
        .collect();
    format!("<ul>{}</ul>", items)
}

/// Landing page: the URL form, an optional inline error and this session's
/// recent summaries.
pub fn index_page(recent: &[Summary], error: Option<&str>, original_urls: &str) -> String {
    let body = format!(
        "{error}<form method=\"post\" action=\"/summarize\">\
         <p><label for=\"urls\">URLs to summarize, one per line</label></p>\
         <textarea id=\"urls\" name=\"urls\" rows=\"6\" placeholder=\"https://example.com\">{urls}</textarea>\
         <p><button type=\"submit\">Summarize</button></p></form>\
         <h2>Recent summaries</h2>{recent}",
        error = error_box(error),
        urls = escape_html(original_urls),
        recent = summary_list(recent),
    );
    layout("Summarize", &body)
}

/// A freshly generated summary. `summary_html` must already be escaped.
pub fn summary_page(heading: &str, summary_html: &str, sources: &[NewCitation]) -> String {
    let items: String = sources
        .iter()
        .map(|c| match (&c.source_url, &c.source_title) {
            (Some(url), title) => format!(
                "<li><a href=\"{href}\" rel=\"noopener noreferrer\">{label}</a></li>",
                href = escape_html(url),
                label = escape_html(title.as_deref().unwrap_or(url)),
            ),
            (None, Some(title)) => format!("<li>{}</li>", escape_html(title)),
            (None, None) => String::new(),
        })
        .collect();
    let body = format!(
        "<div class=\"summary\">{summary}</div><h2>Sources</h2><ul>{items}</ul>\
         <p><a href=\"/\">Summarize more</a></p>",
        summary = summary_html,
        items = items,
    );
    layout(heading, &body)
}

/// Upload form plus the session's documents.
pub fn upload_page(documents: &[Document], error: Option<&str>, max_bytes: usize) -> String {
    let rows: String = documents
        .iter()
        .map(|d| {
            format!(
                "<tr><td><a href=\"/qa/{id}\">{name}</a></td><td>{pages}</td><td>{size}</td><td class=\"muted\">{when}</td></tr>",
                id = d.id,
                name = escape_html(&d.original_filename),
                pages = d.page_count,
                size = format_bytes(d.file_size as u64),
                when = format_ts_relative(d.uploaded_at),
            )
        })
        .collect();
    let table = if documents.is_empty() {
        "<p class=\"muted\">No documents uploaded yet.</p>".to_string()
    } else {
        format!(
            "<table><tr><th>File</th><th>Pages</th><th>Size</th><th>Uploaded</th></tr>{}</table>",
            rows
        )
    };
    let body = format!(
        "{error}<form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\
         <p><input type=\"file\" name=\"file\" accept=\"application/pdf,.pdf\"></p>\
         <p class=\"muted\">PDF only, up to {limit}.</p>\
         <p><button type=\"submit\">Upload and summarize</button></p></form>\
         <h2>Your documents</h2>{table}",
        error = error_box(error),
        limit = format_bytes(max_bytes as u64),
        table = table,
    );
    layout("Documents", &body)
}

const QA_SCRIPT: &str = r#"<script>
document.getElementById('ask').addEventListener('submit', async function (ev) {
  ev.preventDefault();
  const form = ev.target;
  const out = document.getElementById('answer');
  out.textContent = 'Thinking...';
  const res = await fetch('/ask_question', { method: 'POST', body: new URLSearchParams(new FormData(form)) });
  const data = await res.json();
  out.textContent = data.error ? data.error : data.answer;
});
</script>"#;

/// Question form for one document with its previous Q&A.
pub fn qa_page(document: &Document, history: &[QaSession]) -> String {
    let items: String = history
        .iter()
        .map(|qa| {
            format!(
                "<li><strong>Q:</strong> {q}<br><strong>A:</strong> {a}<br>\
                 <span class=\"muted\">{when} · confidence {conf:.2}</span></li>",
                q = escape_html(&qa.question),
                a = escape_html(&qa.answer).replace('\n', "<br>"),
                when = format_ts_iso(qa.created_at),
                conf = qa.confidence_score,
            )
        })
        .collect();
    let body = format!(
        "<p class=\"muted\">{pages} page(s) · {size}</p>\
         <form id=\"ask\"><input type=\"hidden\" name=\"doc_id\" value=\"{id}\">\
         <p><input type=\"text\" name=\"question\" placeholder=\"Ask a question about this document\"></p>\
         <p><button type=\"submit\">Ask</button></p></form>\
         <div id=\"answer\" class=\"summary\"></div>\
         <h2>Previous questions</h2><ul>{items}</ul>{script}",
        pages = document.page_count,
        size = format_bytes(document.file_size as u64),
        id = document.id,
        items = items,
        script = QA_SCRIPT,
    );
    layout(&document.original_filename, &body)
}

/// Subscribed feeds, recent entries and the result of the last action.
pub fn feeds_page(
    feeds: &[RssFeed],
    entries: &[RssEntry],
    message: Option<&str>,
    error: Option<&str>,
) -> String {
    let feed_rows: String = feeds
        .iter()
        .map(|f| {
            format!(
                "<tr><td>{title}</td><td><a href=\"{url}\">{url}</a></td><td class=\"muted\">{when}</td></tr>",
                title = escape_html(f.title.as_deref().unwrap_or("(untitled)")),
                url = escape_html(&f.url),
                when = format_ts_relative(f.last_updated),
            )
        })
        .collect();
    let entry_items: String = entries
        .iter()
        .map(|e| {
            let title = if e.link.is_empty() {
                escape_html(&e.title)
            } else {
                format!(
                    "<a href=\"{}\" rel=\"noopener noreferrer\">{}</a>",
                    escape_html(&e.link),
                    escape_html(&e.title)
                )
            };
            format!(
                "<li>{title}{flag}<br><span class=\"muted\">{desc}</span></li>",
                title = title,
                flag = if e.is_processed { "" } else { " <em>(new)</em>" },
                desc = escape_html(truncate_chars(e.description.as_deref().unwrap_or(""), 200)),
            )
        })
        .collect();
    let body = format!(
        "{notice}{error}<form method=\"post\" action=\"/add_feed\">\
         <p><input type=\"url\" name=\"feed_url\" placeholder=\"https://example.com/feed.xml\"></p>\
         <p><button type=\"submit\">Subscribe</button></p></form>\
         <p><a href=\"/refresh_feeds\">Refresh all feeds</a> · <a href=\"/live_summary\">Summarize new entries</a></p>\
         <h2>Feeds</h2><table><tr><th>Title</th><th>URL</th><th>Updated</th></tr>{feeds}</table>\
         <h2>Recent entries</h2><ul>{entries}</ul>",
        notice = notice_box(message),
        error = error_box(error),
        feeds = feed_rows,
        entries = entry_items,
    );
    layout("Feeds", &body)
}

/// What the dashboard shows for one visitor.
pub struct DashboardView<'a> {
    pub session: Option<&'a ResearchSession>,
    pub summaries: &'a [Summary],
    pub citations: &'a [Citation],
    pub documents: &'a [Document],
    pub today: &'a UsageStats,
}

pub fn dashboard_page(view: &DashboardView<'_>) -> String {
    let (summary_count, sources) = view
        .session
        .map(|s| (s.summary_count, s.sources_processed))
        .unwrap_or((0, 0));
    let citations: String = view
        .citations
        .iter()
        .map(|c| {
            let label = c
                .source_title
                .as_deref()
                .or(c.source_url.as_deref())
                .unwrap_or("(unknown)");
            format!(
                "<li>{label} <span class=\"muted\">{kind} · relevance {score:.1}</span></li>",
                label = escape_html(label),
                kind = c.source_kind,
                score = c.relevance_score,
            )
        })
        .collect();
    let documents: String = view
        .documents
        .iter()
        .map(|d| {
            format!(
                "<li><a href=\"/qa/{}\">{}</a></li>",
                d.id,
                escape_html(&d.original_filename)
            )
        })
        .collect();
    let t = view.today;
    let body = format!(
        "<h2>Your session</h2><p>{summary_count} summaries from {sources} sources.</p>\
         <h2>Recent summaries</h2>{summaries}\
         <h2>Recent sources</h2><ul>{citations}</ul>\
         <h2>Documents</h2><ul>{documents}</ul>\
         <h2>Today ({day})</h2><table>\
         <tr><td>Sessions</td><td>{s}</td></tr><tr><td>Summaries</td><td>{sm}</td></tr>\
         <tr><td>Documents</td><td>{d}</td></tr><tr><td>Questions</td><td>{q}</td></tr>\
         <tr><td>Feed entries</td><td>{e}</td></tr><tr><td>Sources per session</td><td>{avg:.2}</td></tr></table>",
        summary_count = summary_count,
        sources = sources,
        summaries = summary_list(view.summaries),
        citations = citations,
        documents = documents,
        day = escape_html(&t.day),
        s = t.total_sessions,
        sm = t.total_summaries,
        d = t.total_documents,
        q = t.total_qa_queries,
        e = t.total_rss_entries,
        avg = t.avg_sources_per_session,
    );
    layout("Dashboard", &body)
}

/// Standalone error page.
pub fn error_page(title: &str, message: &str) -> String {
    layout(
        title,
        &format!("{}<p><a href=\"/\">Back</a></p>", error_box(Some(message))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn index_echoes_input_escaped() {
        let html = index_page(&[], Some("Please enter valid URLs."), "<script>");
        assert!(html.contains("<div class=\"error\">Please enter valid URLs.</div>"));
        assert!(html.contains("&lt;script&gt;</textarea>"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn summary_sources_are_linked() {
        let html = summary_page(
            "Summary",
            "* point",
            &[NewCitation {
                source_url: Some("https://example.com".into()),
                source_title: Some("Example <Domain>".into()),
                excerpt: String::new(),
            }],
        );
        assert!(html.contains("<a href=\"https://example.com\" rel=\"noopener noreferrer\">Example &lt;Domain&gt;</a>"));
    }

    #[test]
    fn recent_summaries_render_kind() {
        let summary = Summary {
            id: 1,
            session_token: "t".into(),
            content: "full".into(),
            source_kind: SourceKind::Rss,
            word_count: 1,
            key_takeaways: Some("takeaway".into()),
            created_at: 0,
        };
        let html = index_page(&[summary], None, "");
        assert!(html.contains("<strong>rss</strong>"));
        assert!(html.contains("takeaway"));
    }

    #[test]
    fn linkless_entry_renders_plain_title() {
        let entry = RssEntry {
            id: 1,
            feed_id: 1,
            title: "Click".into(),
            link: String::new(),
            description: None,
            published_at: None,
            guid: "j".into(),
            is_processed: false,
            created_at: 0,
        };
        let html = feeds_page(&[], &[entry], None, None);
        assert!(html.contains("<li>Click <em>(new)</em>"));
        assert!(!html.contains("href=\"\""));
    }
}
