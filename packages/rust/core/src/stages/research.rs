//! Research stage: one retrieval call for the whole plan, then one backend
//! call that writes a cited note per sub-question.

use std::collections::HashSet;

use copilot_llm::Sampling;
use copilot_shared::{
    NO_CITATION, PipelineState, ResearchNote, Result, RetrievedChunk, Stage, StateUpdate,
};
use copilot_storage::content_hash;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{StageContext, StageOutcome, StageTimer, generate};
use crate::evidence::has_real_evidence;
use crate::extract::parse_as;
use crate::prompts;

pub const SAMPLING: Sampling = Sampling::new(0.1, Some(1500));

#[derive(Debug, Deserialize)]
struct NoteRecord {
    sub_question: String,
    note: String,
    #[serde(default)]
    citations: Option<Vec<String>>,
}

impl From<NoteRecord> for ResearchNote {
    fn from(record: NoteRecord) -> Self {
        let citation = match record.citations {
            Some(citations) if !citations.is_empty() => citations.join("; "),
            _ => NO_CITATION.to_string(),
        };
        ResearchNote {
            content: format!("{}\n{}", record.sub_question, record.note),
            citation,
        }
    }
}

/// Produce research notes and the run's evidence gate. Failures yield no notes.
#[instrument(skip_all, fields(stage = "research", sub_questions = state.plan.len()))]
pub async fn run(state: &PipelineState, ctx: &StageContext<'_>) -> StageOutcome {
    let mut timer = StageTimer::start(Stage::Research);

    if state.plan.is_empty() {
        warn!("no plan provided; skipping research");
        return timer.fail("no plan provided", empty_update());
    }

    match attempt(state, ctx, &mut timer).await {
        Ok(notes) => {
            let grounded = has_real_evidence(&notes);
            info!(notes = notes.len(), grounded, "research notes produced");
            timer.succeed(StateUpdate {
                research_notes: Some(notes),
                grounded: Some(grounded),
                ..Default::default()
            })
        }
        Err(e) => {
            warn!(error = %e, "research failed");
            timer.fail(e, empty_update())
        }
    }
}

fn empty_update() -> StateUpdate {
    StateUpdate {
        research_notes: Some(Vec::new()),
        grounded: Some(false),
        ..Default::default()
    }
}

async fn attempt(
    state: &PipelineState,
    ctx: &StageContext<'_>,
    timer: &mut StageTimer,
) -> Result<Vec<ResearchNote>> {
    let query = state.plan.join(" ");
    let fragments = dedupe(ctx.retriever.retrieve(&query, ctx.top_k).await?);
    debug!(fragments = fragments.len(), "evidence gathered");

    let user = prompts::research_user(&state.plan, &prompts::format_evidence(&fragments));
    let generation = generate(ctx, timer, SAMPLING, prompts::RESEARCH_SYSTEM, &user).await?;

    let records: Vec<NoteRecord> = parse_as(&generation.text)?;
    Ok(records.into_iter().map(ResearchNote::from).collect())
}

/// Drop repeated fragments, keyed by citation tag or, when uncited, by content hash.
fn dedupe(fragments: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();
    fragments
        .into_iter()
        .filter(|fragment| {
            let key = match fragment.citation.as_deref().filter(|c| !c.trim().is_empty()) {
                Some(citation) => format!("citation:{citation}"),
                None => format!("sha256:{}", content_hash(&fragment.content)),
            };
            seen.insert(key)
        })
        .collect()
}
