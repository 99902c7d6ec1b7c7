//! Pipeline orchestration and domain logic for the copilot.
//!
//! This crate ties the input guard, the structured-output extractor, the
//! evidence gate, and the four stages into one run (`pipeline::run`), and
//! carries the ingestion, run-log, and evaluation workflows around it.

pub mod eval;
pub mod evidence;
pub mod extract;
pub mod guard;
pub mod ingest;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod run_log;
pub mod stages;

#[cfg(test)]
pub(crate) mod test_support;

pub use pipeline::{PipelineInput, ProgressReporter, SilentProgress, run, run_guarded};
pub use retrieval::{CollectionRetriever, Retriever};
pub use stages::{StageContext, StageOutcome};
