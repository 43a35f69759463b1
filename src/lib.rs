//! # MBEE
//!
//! A model-based engineering data server. Organizations hold projects,
//! projects hold branches and every branch holds a tree of elements. A JSON
//! API exposes CRUD over the hierarchy, gated by per-org and per-project
//! role maps.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! mbee = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use mbee::config::Config;
//! use mbee::server::{AppState, create_router};
//! use mbee::store::{SqliteStore, Store};
//!
//! let config = Config::load(Path::new("./data"))?;
//! let store = SqliteStore::new(config.server.db_path())?;
//! store.initialize()?;
//!
//! let artifacts = mbee::artifact::from_config(&config).await?;
//! let state = Arc::new(AppState::new(Arc::new(store), artifacts, config)?);
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): the `mbee` binary. Disable with `default-features = false`.
//! - `s3`: S3-compatible blob storage.

pub mod artifact;
pub mod auth;
pub mod config;
pub mod controllers;
pub mod error;
pub mod id;
pub mod permissions;
pub mod server;
pub mod store;
pub mod types;
pub mod validators;
pub mod webhooks;
