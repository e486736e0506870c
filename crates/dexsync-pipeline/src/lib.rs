//! Publishing side of dexsync.
//!
//! Crawls configured sources for the requested species, skips everything
//! whose source pages have not changed, enriches the rest, diffs the result
//! against the durable [`registry::SourceRegistry`], and publishes payload
//! files plus a manifest to a distribution root.
//!
//! ```text
//! Crawler ─▶ CrawlPlanner ─▶ Enricher ─▶ SpeciesIndexer ─▶ ManifestBuilder
//!                ▲                              │
//!                └──────── SourceRegistry ◀─────┘ (save = commit point)
//! ```

pub mod cache;
pub mod circuit;
pub mod config;
pub mod enriched;
pub mod error;
pub mod indexer;
pub mod lock;
pub mod manifest;
pub mod pipeline;
pub mod planner;
pub mod rate_limit;
pub mod registry;

mod fsutil;

pub use error::{Error, Result};
pub use pipeline::{Crawler, Enricher, Pipeline, PipelineOptions, PipelineOutcome, PublishReport};
