//! End-to-end run: input guard → plan → research → draft → (verify) → done.

use std::time::Instant;

use copilot_shared::{OutputMode, PipelineState, Result, Stage, StageMetrics};
use tracing::{info, instrument};

use crate::guard;
use crate::stages::{self, StageContext, StageOutcome};

/// User input for one run.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub task: String,
    /// Empty means "same as the task".
    pub goal: String,
    pub output_mode: OutputMode,
}

impl PipelineInput {
    pub fn new(task: impl Into<String>, goal: impl Into<String>, output_mode: OutputMode) -> Self {
        Self {
            task: task.into(),
            goal: goal.into(),
            output_mode,
        }
    }
}

/// Progress callback for reporting stage transitions.
pub trait ProgressReporter: Send + Sync {
    /// Called before a stage runs.
    fn stage_started(&self, stage: Stage);
    /// Called with the stage's metrics once it returns.
    fn stage_finished(&self, stage: Stage, metrics: &StageMetrics);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _stage: Stage, _metrics: &StageMetrics) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Plan,
    Research,
    Draft,
    Verify,
    Done,
}

/// Run every applicable stage and return the final state.
///
/// Stages are total, so this never fails. Verify is skipped entirely (no
/// metrics record) when Draft produced neither a summary nor an email.
#[instrument(skip_all, fields(mode = %input.output_mode))]
pub async fn run(
    input: &PipelineInput,
    ctx: &StageContext<'_>,
    progress: &dyn ProgressReporter,
) -> PipelineState {
    let start = Instant::now();
    let mut state = PipelineState::new(input.task.clone(), input.goal.clone(), input.output_mode);
    let mut step = Step::Plan;

    info!("starting pipeline run");

    while step != Step::Done {
        step = match step {
            Step::Plan => {
                progress.stage_started(Stage::Plan);
                let outcome = stages::plan::run(&state, ctx).await;
                absorb(&mut state, outcome, progress);
                Step::Research
            }
            Step::Research => {
                progress.stage_started(Stage::Research);
                let outcome = stages::research::run(&state, ctx).await;
                absorb(&mut state, outcome, progress);
                Step::Draft
            }
            Step::Draft => {
                progress.stage_started(Stage::Draft);
                let outcome = stages::draft::run(&state, ctx).await;
                let has_content = outcome.update.has_draft_content();
                absorb(&mut state, outcome, progress);
                if has_content {
                    Step::Verify
                } else {
                    info!("draft is empty; skipping verification");
                    Step::Done
                }
            }
            Step::Verify => {
                progress.stage_started(Stage::Verify);
                let outcome = stages::verify::run(&state, ctx).await;
                absorb(&mut state, outcome, progress);
                Step::Done
            }
            Step::Done => Step::Done,
        };
    }

    info!(
        stages = state.agent_metrics.len(),
        verified = ?state.verification_passed,
        input_tokens = state.total_input_tokens(),
        output_tokens = state.total_output_tokens(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "pipeline run complete"
    );
    state
}

/// Apply the input guard, then run. A rejected input fails before any stage runs.
pub async fn run_guarded(
    input: &PipelineInput,
    ctx: &StageContext<'_>,
    progress: &dyn ProgressReporter,
) -> Result<PipelineState> {
    let (task, goal) = guard::validate_and_sanitize(&input.task, &input.goal)?;
    let clean = PipelineInput::new(task, goal, input.output_mode);
    Ok(run(&clean, ctx, progress).await)
}

fn absorb(state: &mut PipelineState, outcome: StageOutcome, progress: &dyn ProgressReporter) {
    let StageOutcome { update, metrics } = outcome;
    progress.stage_finished(metrics.stage, &metrics);
    state.merge(update);
    state.record(metrics);
}
