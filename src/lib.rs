//! Showtime ingestion for independent cinemas: scrape venue listings,
//! canonicalize and deduplicate them into one store, then enrich the
//! stored films with TMDB metadata under a request budget.
pub mod canonical;
pub mod cli;
pub mod database_ops;
pub mod enrichment;
pub mod error;
pub mod model;
pub mod normalization;
pub mod orchestrator;
pub mod sources;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}
