//! # Syndex
//!
//! Feed ingestion, embedding, and semantic retrieval over versioned
//! dataset shards.
//!
//! Syndex fetches RSS/Atom feeds, normalizes their entries into clean
//! documents, embeds them, and writes each ingestion run as an immutable
//! per-source shard in a blob store (local filesystem or S3). Queries are
//! embedded once and scored against every committed shard, with per-shard
//! failures isolated so one corrupt shard never takes down search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌────────────┐
//! │  Feeds   │──▶│     Pipeline      │──▶│ Shard store │
//! │ RSS/Atom │   │ Normalize + Embed │   │  fs / S3    │
//! └──────────┘   └───────────────────┘   └─────┬──────┘
//!                                              │
//!                            ┌─────────────────┤
//!                            ▼                 ▼
//!                      ┌──────────┐      ┌──────────┐
//!                      │   CLI    │      │   HTTP   │
//!                      │ (syndex) │      │  (JSON)  │
//!                      └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! syndex ingest https://example.com/rss      # fetch, embed, shard
//! syndex sources                             # list committed shards
//! syndex search "rust async runtimes"        # semantic query
//! syndex serve                               # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`feed`] | Feed fetching and RSS/Atom parsing |
//! | [`normalize`] | Article cleanup and field fallbacks |
//! | [`embedding`] | Embedding backend abstraction |
//! | [`blob`] | Blob store backends (fs, S3, memory) |
//! | [`store`] | Immutable shard storage |
//! | [`retrieval`] | Query embedding and ranking |
//! | [`ingest`] | Per-feed ingestion pipeline |
//! | [`sources`] | Source listing command |
//! | [`server`] | JSON HTTP server |

pub mod blob;
pub mod config;
pub mod embedding;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod retrieval;
pub mod server;
pub mod sources;
pub mod store;

pub use error::{Error, Result};
