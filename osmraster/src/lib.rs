//! osmraster - OpenStreetMap category rasterization for Earth Engine
//!
//! This library drives a fan-out/fan-in pipeline of slow, asynchronous remote
//! jobs: OSM features are filtered to a fixed table of `(attribute, tag)`
//! categories, imported as one vector table per category, rasterized into one
//! image per category, and optionally merged into a roads table and a
//! multi-band composite image.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            Pipeline                                │
//! │                                                                    │
//! │  prepare ──► source / convert ──► per-category CSVs                │
//! │                                                                    │
//! │  run ──► Dispatcher ──► JobRegistry ──► Poller ──► Rasterizer      │
//! │                                           │            │           │
//! │                                           │      JobRegistry       │
//! │                                           │            │           │
//! │                                           └──► Poller ◄┘           │
//! │                                                                    │
//! │          roads (TableMerge) ──► merge (Composite)                  │
//! │                                                                    │
//! │  cleanup ──► CleanupCoordinator (always runs)                      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Remote work is delegated to a [`remote::RemoteService`]; staging files go
//! through a [`storage::BlobStore`]. Both are traits so the whole pipeline can
//! run against in-memory fakes.

pub mod asset;
pub mod auth;
pub mod category;
pub mod cleanup;
pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod poller;
pub mod rasterize;
pub mod remote;
pub mod roads;
pub mod source;
pub mod storage;

use std::future::Future;
use std::pin::Pin;

/// Crate version, as reported by the CLI banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
