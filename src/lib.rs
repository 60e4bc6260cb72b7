//! # KnowFlow client
//!
//! Command-line client for a KnowFlow knowledge-base backend: manage
//! knowledge bases, documents, users and teams, upload files, edit chunking
//! settings, dispatch parse jobs and follow their progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────────┐
//! │   CLI    │──▶│ ApiClient │──▶│ admin API      │
//! │  (kf)    │   │ + cache   │   │ KnowFlow parse │
//! └────┬─────┘   └─────▲─────┘   └────────────────┘
//!      │               │
//!      ▼               │
//! ┌──────────┐   ┌─────┴─────┐   ┌──────────┐
//! │  parse   │──▶│  Poller   │──▶│  status  │
//! │ dispatch │   │  + board  │   │  server  │
//! └──────────┘   └───────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kf kb list                         # list knowledge bases
//! kf doc upload <kb-id> ./papers     # upload a directory in batches
//! kf doc parse <doc-id> --watch      # parse and follow progress
//! kf chunking set <doc-id> --strategy smart --chunk-tokens 512
//! kf serve                           # local status API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`api`] | HTTP client and response envelopes |
//! | [`cache`] | Query cache with prefix invalidation |
//! | [`chunking`] | Chunking config types and validation |
//! | [`poller`] | Parse-progress polling |
//! | [`parse`] | Parse dispatch by parser type |
//! | [`upload`] | Batched file upload |
//! | [`progress`] | Progress reporting on stderr |
//! | [`server`] | Local status HTTP server |
//! | [`commands`] | CLI command implementations |
//! | [`error`] | Library error types |

pub mod api;
pub mod cache;
pub mod chunking;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod parse;
pub mod poller;
pub mod progress;
pub mod server;
pub mod upload;
