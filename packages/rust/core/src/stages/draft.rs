//! Draft stage: turn grounded research notes into the four-part deliverable.

use copilot_llm::Sampling;
use copilot_shared::{ActionItem, PipelineState, Result, Stage, StateUpdate, null_as_default};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{StageContext, StageOutcome, StageTimer, generate, normalize_sources};
use crate::extract::parse_as;
use crate::prompts;

pub const SAMPLING: Sampling = Sampling::new(0.3, Some(1500));

/// Sources section of the out-of-scope response.
pub const OUT_OF_SCOPE_SOURCES: &str =
    "No matching content was found in the indexed documents for this request.";

#[derive(Debug, Deserialize)]
struct DraftRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    executive_summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    client_email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    action_items: Vec<ActionItem>,
    #[serde(default)]
    sources_section: Value,
}

/// Write the deliverable, or the fixed out-of-scope response when nothing is grounded.
/// A backend or parse failure yields an empty update.
#[instrument(skip_all, fields(stage = "draft", mode = %state.output_mode))]
pub async fn run(state: &PipelineState, ctx: &StageContext<'_>) -> StageOutcome {
    let mut timer = StageTimer::start(Stage::Draft);

    if state.research_notes.is_empty() || !state.is_grounded() {
        info!("no grounded evidence; returning out-of-scope response");
        return timer.succeed(out_of_scope());
    }

    match attempt(state, ctx, &mut timer).await {
        Ok(update) => {
            info!(
                action_items = update.action_items.as_ref().map_or(0, Vec::len),
                "deliverable drafted"
            );
            timer.succeed(update)
        }
        Err(e) => {
            warn!(error = %e, "drafting failed");
            timer.fail(e, StateUpdate::default())
        }
    }
}

/// The deliverable returned without a backend call when no evidence exists.
pub fn out_of_scope() -> StateUpdate {
    StateUpdate {
        executive_summary: Some(String::new()),
        client_email: Some(String::new()),
        action_items: Some(Vec::new()),
        sources_section: Some(OUT_OF_SCOPE_SOURCES.to_string()),
        ..Default::default()
    }
}

async fn attempt(
    state: &PipelineState,
    ctx: &StageContext<'_>,
    timer: &mut StageTimer,
) -> Result<StateUpdate> {
    let system = prompts::draft_system(state.output_mode);
    let user = prompts::draft_user(
        state.output_mode,
        &state.task,
        &state.goal,
        ctx.today,
        &state.research_notes,
    );
    let generation = generate(ctx, timer, SAMPLING, system, &user).await?;
    let record: DraftRecord = parse_as(&generation.text)?;

    Ok(StateUpdate {
        executive_summary: Some(record.executive_summary),
        client_email: Some(record.client_email),
        action_items: Some(record.action_items),
        sources_section: Some(normalize_sources(&record.sources_section)),
        ..Default::default()
    })
}
