//! The four pipeline stages.
//!
//! Every stage is total: it reads what it needs from [`PipelineState`],
//! makes at most one backend call, and always returns a [`StageOutcome`].
//! Failures are recovered inside the stage and surface only as a non-empty
//! `metrics.error`.

pub mod draft;
pub mod plan;
pub mod research;
pub mod verify;

use std::fmt;
use std::time::Instant;

use chrono::NaiveDate;
use copilot_llm::{BackendProvider, Generation, Sampling};
use copilot_shared::{Result, Stage, StageMetrics, StateUpdate};

use crate::retrieval::Retriever;

/// Collaborators and per-run settings every stage may use.
pub struct StageContext<'a> {
    pub backends: &'a dyn BackendProvider,
    pub retriever: &'a dyn Retriever,
    /// Fragments requested from the retriever per run.
    pub top_k: usize,
    /// Date given to the Draft stage for due-date planning.
    pub today: NaiveDate,
}

/// What a stage hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub update: StateUpdate,
    pub metrics: StageMetrics,
}

/// Wall-clock and token bookkeeping for one stage execution.
pub(crate) struct StageTimer {
    metrics: StageMetrics,
    started: Instant,
}

impl StageTimer {
    pub(crate) fn start(stage: Stage) -> Self {
        Self {
            metrics: StageMetrics::new(stage),
            started: Instant::now(),
        }
    }

    pub(crate) fn usage(&mut self, generation: &Generation) {
        self.metrics.input_tokens += generation.input_tokens;
        self.metrics.output_tokens += generation.output_tokens;
    }

    pub(crate) fn succeed(mut self, update: StateUpdate) -> StageOutcome {
        self.metrics.latency_s = self.started.elapsed().as_secs_f64();
        StageOutcome {
            update,
            metrics: self.metrics,
        }
    }

    pub(crate) fn fail(mut self, error: impl fmt::Display, update: StateUpdate) -> StageOutcome {
        self.metrics.error = error.to_string();
        self.succeed(update)
    }
}

/// One backend call with the given sampling, recording token usage on success.
pub(crate) async fn generate(
    ctx: &StageContext<'_>,
    timer: &mut StageTimer,
    sampling: Sampling,
    system: &str,
    user: &str,
) -> Result<Generation> {
    let backend = ctx.backends.backend(sampling)?;
    let generation = backend.invoke(system, user).await?;
    timer.usage(&generation);
    Ok(generation)
}

/// Flatten a generated sources value into display text: strings as-is,
/// lists one entry per line, maps as `- key: value` lines.
pub(crate) fn normalize_sources(value: &serde_json::Value) -> String {
    use serde_json::Value;

    fn scalar(v: &Value) -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join("\n"),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("- {k}: {}", scalar(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
