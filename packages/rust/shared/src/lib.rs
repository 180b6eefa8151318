//! Shared types, error model, and configuration for Chronicler.
//!
//! This crate is the foundation depended on by all other Chronicler crates.
//! It provides:
//! - [`ChroniclerError`], the unified error type
//! - Domain types ([`ChronologyEvent`], [`CategorizedKnowledge`], [`Chunk`], [`RunId`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FetchConfig, ModelConfig, PipelineConfig, ResearchConfig, SourceTemplate,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{ChroniclerError, Result};
pub use types::{
    CategorizedKnowledge, Category, ChronologyDate, ChronologyEvent, Chunk, ChunkClassification,
    ResearchRequest, RunId, bullet_lines,
};
