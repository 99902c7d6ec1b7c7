//! Shared types, error model, and configuration for the copilot.
//!
//! This crate is the foundation depended on by all other copilot crates.
//! It provides:
//! - The unified error type, [`CopilotError`]
//! - Domain types ([`PipelineState`], [`StateUpdate`], [`ResearchNote`], [`ActionItem`],
//!   [`StageMetrics`], [`Chunk`])
//! - Configuration ([`AppConfig`], config loading, environment overrides)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, LlmConfig, LogsConfig, RetrievalConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_api_key,
};
pub use error::{CopilotError, Result};
pub use types::{
    ActionItem, Chunk, Confidence, Deliverable, IssueCategory, NO_CITATION, OutputMode,
    PLACEHOLDER_MARKERS, PipelineState, ResearchNote, RetrievedChunk, Stage, StageMetrics,
    StateUpdate, citation_tag, null_as_default,
};
