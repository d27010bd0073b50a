//! Metadata enrichment: TMDB client, candidate matching, request budgeting
//! and the batch runner tying them to a `Store`.
pub mod matcher;
pub mod rate_limit;
pub mod runner;
pub mod tmdb;

pub use rate_limit::RequestBudget;
pub use runner::{EnrichOptions, EnrichmentRunner, EnrichmentSummary, Selection};
pub use tmdb::{MetadataProvider, TmdbClient, TmdbConfig};
