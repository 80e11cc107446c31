//! # Research Assistant
//!
//! A small web application that scrapes URLs, extracts their text and
//! summarizes it with an LLM, answers questions against uploaded PDFs, and
//! turns RSS entries into digest summaries. Everything is stored in SQLite
//! and served as plain HTML forms.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  Fetcher │──▶│ Extractor │──▶│ Aggregator │──▶│  SQLite  │
//! │ (guarded)│   │ HTML/PDF  │   │  + LLM     │   │  store   │
//! └──────────┘   └───────────┘   └─────┬──────┘   └────┬─────┘
//!       ▲                              │               │
//! ┌─────┴─────┐                        ▼               ▼
//! │Feed poller│                  ┌──────────┐    ┌──────────┐
//! └───────────┘                  │   CLI    │    │   HTTP   │
//!                                │(research)│    │  (axum)  │
//!                                └──────────┘    └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`models`] | Row types |
//! | [`store`] | Queries over the SQLite pool |
//! | [`fetch`] | SSRF-guarded HTTP fetching |
//! | [`extract`] | HTML and PDF text extraction |
//! | [`feeds`] | RSS/Atom subscription and polling |
//! | [`llm`] | Summarizer trait and Gemini client |
//! | [`aggregate`] | Multi-source summarization runs |
//! | [`documents`] | PDF uploads and Q&A |
//! | [`session`] | Signed session cookies |
//! | [`stats`] | Daily usage rollups |
//! | [`views`] | HTML pages |
//! | [`server`] | HTTP routes |

pub mod aggregate;
pub mod config;
pub mod db;
pub mod documents;
pub mod extract;
pub mod feeds;
pub mod fetch;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
pub mod views;
