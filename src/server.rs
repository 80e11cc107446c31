//! HTTP front end.
//!
//! Serves the HTML forms and the small JSON endpoints over axum. Every page
//! handler takes a [`Visitor`], which resolves (or mints) the signed session
//! cookie and makes sure the session row exists before the handler runs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | URL form and recent summaries |
//! | `POST` | `/summarize` | Summarize newline-separated `urls` |
//! | `GET`  | `/upload` | Upload form and the session's documents |
//! | `POST` | `/upload` | Multipart `file` (PDF) → document + summary |
//! | `GET`  | `/qa/{doc_id}` | Q&A page for an owned document |
//! | `POST` | `/ask_question` | `doc_id`, `question` → JSON answer |
//! | `GET`  | `/feeds` | Subscriptions and recent entries |
//! | `POST` | `/add_feed` | Subscribe to `feed_url` |
//! | `GET`  | `/refresh_feeds` | Poll every active feed |
//! | `GET`  | `/live_summary` | Digest of pending entries |
//! | `GET`  | `/dashboard` | Session counters and today's usage |
//! | `GET`  | `/health` | Health check |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartError, ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart,
        Path, State,
    },
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::aggregate::{AggregateError, Aggregator};
use crate::config::Config;
use crate::db;
use crate::documents::{self, DocumentError};
use crate::feeds::{self, FeedError};
use crate::fetch::Fetcher;
use crate::llm::{create_summarizer, Summarizer};
use crate::migrate::apply_schema;
use crate::session::{cookie_value, SessionSigner, COOKIE_NAME};
use crate::stats;
use crate::store::SqliteStore;
use crate::views::{self, DashboardView};

/// Entries listed on the feeds page.
const RECENT_ENTRIES: i64 = 20;
/// Citations listed on the dashboard.
const RECENT_CITATIONS: i64 = 10;
/// Room for multipart framing on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SqliteStore,
    pub fetcher: Arc<Fetcher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub signer: SessionSigner,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, summarizer: Arc<dyn Summarizer>, secret: &str) -> Self {
        let fetcher = Arc::new(Fetcher::new(&config.fetch));
        Self {
            config: Arc::new(config),
            store: SqliteStore::new(pool),
            fetcher,
            summarizer,
            signer: SessionSigner::new(secret),
        }
    }

    fn aggregator(&self) -> Aggregator<'_> {
        Aggregator::new(
            &self.store,
            &self.fetcher,
            self.summarizer.as_ref(),
            &self.config.limits,
        )
    }
}

/// Starts the server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let secret = config.require_session_secret()?.to_string();
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;

    let summarizer = create_summarizer(config)?;
    let bind_addr = config.server.bind.clone();
    info!(model = summarizer.model_name(), "summarizer ready");

    let state = AppState::new(config.clone(), pool.clone(), summarizer, &secret);
    if state.fetcher.allows_private_networks() {
        warn!("fetch.allow_private_networks is on; private and loopback addresses are reachable");
    }
    if !config.fetch.trusted_hosts.is_empty() {
        info!(hosts = ?config.fetch.trusted_hosts, "fetch guard trusts these hosts");
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Research assistant listening on http://{}", bind_addr);
    info!(%bind_addr, "server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    pool.close().await;
    info!("server stopped");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.uploads.max_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(handle_index))
        .route("/summarize", post(handle_summarize))
        .route(
            "/upload",
            get(handle_upload_form)
                .post(handle_upload)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/qa/{doc_id}", get(handle_qa))
        .route("/ask_question", post(handle_ask_question))
        .route("/feeds", get(handle_feeds))
        .route("/add_feed", post(handle_add_feed))
        .route("/refresh_feeds", get(handle_refresh_feeds))
        .route("/live_summary", get(handle_live_summary))
        .route("/dashboard", get(handle_dashboard))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Session extractor ============

/// The visitor behind a request, identified by the signed session cookie.
pub struct Visitor {
    pub token: String,
    /// Set when the request carried no valid cookie.
    set_cookie: Option<String>,
}

impl Visitor {
    /// Converts `inner` into a response, attaching the session cookie when
    /// this visitor is new.
    fn respond(&self, inner: impl IntoResponse) -> Response {
        let mut response = inner.into_response();
        if let Some(cookie) = &self.set_cookie {
            if let Ok(value) = HeaderValue::from_str(cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

fn client_ip(parts: &Parts) -> Option<String> {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    forwarded.or_else(|| {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
}

impl FromRequestParts<AppState> for Visitor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let existing = parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|h| cookie_value(h, COOKIE_NAME))
            .and_then(|value| state.signer.verify(value));

        let (token, set_cookie) = match existing {
            Some(token) => (token, None),
            None => {
                let token = SessionSigner::new_token();
                let cookie = state.signer.set_cookie_header(&token);
                (token, Some(cookie))
            }
        };

        let ip = client_ip(parts);
        if state.store.ensure_session(&token, ip.as_deref()).await? {
            stats::recompute_today(&state.store).await?;
        }

        Ok(Visitor { token, set_cookie })
    }
}

// ============ Errors ============

/// A failure rendered as an HTML error page.
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Something went wrong. Please try again.".to_string(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let title = self
            .status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string();
        (self.status, Html(views::error_page(&title, &self.message))).into_response()
    }
}

fn aggregate_status(err: &AggregateError) -> StatusCode {
    match err {
        AggregateError::EmptyInput | AggregateError::NoValidInput => StatusCode::BAD_REQUEST,
        AggregateError::AllSourcesFailed(_) | AggregateError::NoSubstantialContent => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AggregateError::NoPendingEntries => StatusCode::OK,
        AggregateError::Summarizer(_) => StatusCode::BAD_GATEWAY,
        AggregateError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn document_status(err: &DocumentError) -> StatusCode {
    match err {
        DocumentError::NotFound => StatusCode::NOT_FOUND,
        DocumentError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        DocumentError::Summarizer(_) => StatusCode::BAD_GATEWAY,
        DocumentError::Io(_) | DocumentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn feed_status(err: &FeedError) -> StatusCode {
    match err {
        FeedError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        FeedError::Fetch { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::BAD_REQUEST,
    }
}

// ============ Summaries ============

async fn handle_index(
    State(state): State<AppState>,
    visitor: Visitor,
) -> Result<Response, AppError> {
    let recent = state
        .store
        .recent_summaries(&visitor.token, state.config.server.recent_limit)
        .await?;
    Ok(visitor.respond(Html(views::index_page(&recent, None, ""))))
}

#[derive(Deserialize)]
struct SummarizeForm {
    #[serde(default)]
    urls: String,
}

async fn handle_summarize(
    State(state): State<AppState>,
    visitor: Visitor,
    Form(form): Form<SummarizeForm>,
) -> Result<Response, AppError> {
    match state.aggregator().summarize_urls(&visitor.token, &form.urls).await {
        Ok(outcome) => Ok(visitor.respond(Html(views::summary_page(
            "Summary",
            &outcome.html(),
            &outcome.citations,
        )))),
        Err(e) if e.is_user_facing() => {
            let recent = state
                .store
                .recent_summaries(&visitor.token, state.config.server.recent_limit)
                .await?;
            let page = views::index_page(&recent, Some(&e.to_string()), form.urls.trim());
            Ok(visitor.respond((aggregate_status(&e), Html(page))))
        }
        Err(e) => Err(AppError::internal(e)),
    }
}

// ============ Documents ============

async fn upload_error_page(
    state: &AppState,
    visitor: &Visitor,
    err: &DocumentError,
) -> Result<Response, AppError> {
    let documents = state.store.documents_for_session(&visitor.token).await?;
    let page = views::upload_page(&documents, Some(&err.to_string()), state.config.uploads.max_bytes);
    Ok(visitor.respond((document_status(err), Html(page))))
}

async fn handle_upload_form(
    State(state): State<AppState>,
    visitor: Visitor,
) -> Result<Response, AppError> {
    let documents = state.store.documents_for_session(&visitor.token).await?;
    Ok(visitor.respond(Html(views::upload_page(
        &documents,
        None,
        state.config.uploads.max_bytes,
    ))))
}

/// Only a hit on the body limit means the file was too large.
fn multipart_failure(err: &MultipartError, max_bytes: usize) -> DocumentError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DocumentError::TooLarge(max_bytes)
    } else {
        warn!(error = %err, "unreadable multipart upload");
        DocumentError::Unreadable
    }
}

async fn handle_upload(
    State(state): State<AppState>,
    visitor: Visitor,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let max_bytes = state.config.uploads.max_bytes;
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return upload_error_page(&state, &visitor, &multipart_failure(&e, max_bytes)).await
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        // Reject by name before reading the body.
        if let Err(e) = documents::validate_upload(&filename, 0, max_bytes) {
            return upload_error_page(&state, &visitor, &e).await;
        }
        match field.bytes().await {
            Ok(bytes) => upload = Some((filename, bytes.to_vec())),
            Err(e) => {
                return upload_error_page(&state, &visitor, &multipart_failure(&e, max_bytes)).await
            }
        }
        break;
    }

    let Some((filename, bytes)) = upload else {
        return upload_error_page(&state, &visitor, &DocumentError::NoFile).await;
    };

    let document = match documents::store_upload(
        &state.store,
        &state.config.uploads,
        &visitor.token,
        &filename,
        &bytes,
    )
    .await
    {
        Ok(doc) => doc,
        Err(e) if e.is_user_facing() => return upload_error_page(&state, &visitor, &e).await,
        Err(e) => return Err(AppError::internal(e)),
    };

    match state.aggregator().summarize_pdf(&visitor.token, &document).await {
        Ok(outcome) => Ok(visitor.respond(Html(views::summary_page(
            &document.original_filename,
            &outcome.html(),
            &outcome.citations,
        )))),
        Err(e) if e.is_user_facing() => {
            let documents = state.store.documents_for_session(&visitor.token).await?;
            let message = format!("{} was saved, but could not be summarized: {}", document.original_filename, e);
            let page = views::upload_page(&documents, Some(&message), max_bytes);
            Ok(visitor.respond((aggregate_status(&e), Html(page))))
        }
        Err(e) => Err(AppError::internal(e)),
    }
}

async fn handle_qa(
    State(state): State<AppState>,
    visitor: Visitor,
    Path(doc_id): Path<i64>,
) -> Result<Response, AppError> {
    let document = match documents::owned_document(&state.store, &visitor.token, doc_id).await {
        Ok(doc) => doc,
        Err(DocumentError::NotFound) => {
            return Ok(visitor.respond(AppError::not_found("Document not found.")))
        }
        Err(e) => return Err(AppError::internal(e)),
    };
    let history = state.store.qa_for_document(document.id).await?;
    Ok(visitor.respond(Html(views::qa_page(&document, &history))))
}

#[derive(Deserialize)]
struct AskForm {
    #[serde(default)]
    doc_id: String,
    #[serde(default)]
    question: String,
}

#[derive(Serialize)]
struct AnswerBody {
    answer: String,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn handle_ask_question(
    State(state): State<AppState>,
    visitor: Visitor,
    Form(form): Form<AskForm>,
) -> Response {
    let Ok(doc_id) = form.doc_id.trim().parse::<i64>() else {
        return visitor.respond(json_error(StatusCode::BAD_REQUEST, "Invalid document id."));
    };

    let result = documents::ask_question(
        &state.store,
        state.summarizer.as_ref(),
        &state.config.limits,
        &visitor.token,
        doc_id,
        &form.question,
    )
    .await;

    let response = match result {
        Ok(qa) => Json(AnswerBody {
            answer: qa.answer,
            timestamp: chrono::DateTime::from_timestamp(qa.created_at, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        })
        .into_response(),
        Err(e) if e.is_user_facing() => json_error(document_status(&e), e.to_string()),
        Err(e) => {
            error!(error = %e, "question failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong. Please try again.")
        }
    };
    visitor.respond(response)
}

// ============ Feeds ============

async fn feeds_response(
    state: &AppState,
    visitor: &Visitor,
    status: StatusCode,
    message: Option<&str>,
    error: Option<&str>,
) -> Result<Response, AppError> {
    let feeds = state.store.list_feeds().await?;
    let entries = state.store.recent_entries(RECENT_ENTRIES).await?;
    let page = views::feeds_page(&feeds, &entries, message, error);
    Ok(visitor.respond((status, Html(page))))
}

async fn handle_feeds(
    State(state): State<AppState>,
    visitor: Visitor,
) -> Result<Response, AppError> {
    feeds_response(&state, &visitor, StatusCode::OK, None, None).await
}

#[derive(Deserialize)]
struct AddFeedForm {
    #[serde(default)]
    feed_url: String,
}

async fn handle_add_feed(
    State(state): State<AppState>,
    visitor: Visitor,
    Form(form): Form<AddFeedForm>,
) -> Result<Response, AppError> {
    match feeds::add_feed(&state.store, &state.fetcher, &state.config.limits, &form.feed_url).await {
        Ok(added) => {
            let message = format!(
                "Subscribed to {} ({} new entries).",
                added.title.as_deref().unwrap_or(&added.url),
                added.new_entries
            );
            feeds_response(&state, &visitor, StatusCode::OK, Some(&message), None).await
        }
        Err(FeedError::Storage(e)) => Err(AppError::internal(e)),
        Err(e) => {
            feeds_response(&state, &visitor, feed_status(&e), None, Some(&e.to_string())).await
        }
    }
}

async fn handle_refresh_feeds(
    State(state): State<AppState>,
    visitor: Visitor,
) -> Result<Response, AppError> {
    let report = feeds::refresh_feeds(&state.store, &state.fetcher, &state.config.limits)
        .await
        .map_err(AppError::internal)?;
    let message = format!(
        "Checked {} feeds, {} new entries.",
        report.feeds_checked, report.new_entries
    );
    let errors = (!report.errors.is_empty()).then(|| report.errors.join("; "));
    feeds_response(&state, &visitor, StatusCode::OK, Some(&message), errors.as_deref()).await
}

async fn handle_live_summary(
    State(state): State<AppState>,
    visitor: Visitor,
) -> Result<Response, AppError> {
    match state.aggregator().summarize_digest(&visitor.token).await {
        Ok(outcome) => Ok(visitor.respond(Html(views::summary_page(
            "Live summary",
            &outcome.html(),
            &outcome.citations,
        )))),
        Err(e @ AggregateError::NoPendingEntries) => {
            feeds_response(&state, &visitor, aggregate_status(&e), Some(&e.to_string()), None).await
        }
        Err(e) if e.is_user_facing() => {
            feeds_response(&state, &visitor, aggregate_status(&e), None, Some(&e.to_string())).await
        }
        Err(e) => Err(AppError::internal(e)),
    }
}

// ============ Dashboard ============

async fn handle_dashboard(
    State(state): State<AppState>,
    visitor: Visitor,
) -> Result<Response, AppError> {
    let store = &state.store;
    let session = store.get_session(&visitor.token).await?;
    let summaries = store
        .recent_summaries(&visitor.token, state.config.server.recent_limit)
        .await?;
    let citations = store.recent_citations(&visitor.token, RECENT_CITATIONS).await?;
    let documents = store.documents_for_session(&visitor.token).await?;
    let today = stats::recompute_today(store).await?;

    let page = views::dashboard_page(&DashboardView {
        session: session.as_ref(),
        summaries: &summaries,
        citations: &citations,
        documents: &documents,
        today: &today,
    });
    Ok(visitor.respond(Html(page)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
