//! Source fetching, article extraction, and source identity.
//!
//! This crate provides:
//! - [`Fetcher`], the document retrieval seam, and [`HttpFetcher`], its HTTP implementation
//! - [`adapters`], source-specific article extractors (Wikipedia, Britannica, generic)
//! - [`SourceCatalog`] and [`source_key`], for candidate URLs and used-source tracking

pub mod adapters;
pub mod engine;
pub mod sources;

pub use adapters::{
    AdapterRegistry, BritannicaAdapter, ExtractedContent, GenericAdapter, SourceAdapter,
    WikipediaAdapter,
};
pub use engine::{FetchedDocument, Fetcher, HttpFetcher, is_ssrf_target};
pub use sources::{SourceCandidate, SourceCatalog, source_key};
