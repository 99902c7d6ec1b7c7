//! Verify stage: fact-check the draft against the research notes and return a
//! corrected deliverable.
//!
//! Fail-closed: if the check itself cannot run, the draft is passed through
//! marked as not verified.

use copilot_llm::Sampling;
use copilot_shared::{ActionItem, PipelineState, Result, Stage, StateUpdate, null_as_default};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{StageContext, StageOutcome, StageTimer, generate, normalize_sources};
use crate::extract::parse_as;
use crate::prompts;

pub const SAMPLING: Sampling = Sampling::new(0.0, Some(1500));

#[derive(Debug, Deserialize)]
struct VerifyRecord {
    #[serde(default)]
    verification_passed: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    issues: Vec<String>,
    #[serde(default)]
    verified_summary: Option<String>,
    #[serde(default)]
    verified_email: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    verified_action_items: Vec<ActionItem>,
    #[serde(default)]
    verified_sources: Option<Value>,
}

/// Verify the draft. Ungrounded runs pass through as verified without a backend call.
#[instrument(skip_all, fields(stage = "verify"))]
pub async fn run(state: &PipelineState, ctx: &StageContext<'_>) -> StageOutcome {
    let mut timer = StageTimer::start(Stage::Verify);

    if !state.is_grounded() {
        info!("no grounded evidence; passing draft through unchecked");
        let mut update = pass_through(state, true, Vec::new());
        update.verified_email = Some(String::new());
        return timer.succeed(update);
    }

    match attempt(state, ctx, &mut timer).await {
        Ok(update) => {
            info!(
                passed = ?update.verification_passed,
                issues = update.verification_issues.as_ref().map_or(0, Vec::len),
                "verification complete"
            );
            timer.succeed(update)
        }
        Err(e) => {
            warn!(error = %e, "verification failed; marking deliverable as not verified");
            let issue = format!("Verifier error: {e}");
            timer.fail(e, pass_through(state, false, vec![issue]))
        }
    }
}

/// Draft fields copied into the verified slots.
fn pass_through(state: &PipelineState, passed: bool, issues: Vec<String>) -> StateUpdate {
    StateUpdate {
        verification_passed: Some(passed),
        verification_issues: Some(issues),
        verified_summary: Some(state.executive_summary.clone()),
        verified_email: Some(state.client_email.clone()),
        verified_action_items: Some(state.action_items.clone()),
        verified_sources: Some(state.sources_section.clone()),
        ..Default::default()
    }
}

async fn attempt(
    state: &PipelineState,
    ctx: &StageContext<'_>,
    timer: &mut StageTimer,
) -> Result<StateUpdate> {
    let user = prompts::verify_user(
        &state.task,
        &state.research_notes,
        &state.executive_summary,
        &state.client_email,
        &state.action_items,
        &state.sources_section,
    );
    let generation = generate(ctx, timer, SAMPLING, prompts::VERIFY_SYSTEM, &user).await?;
    let record: VerifyRecord = parse_as(&generation.text)?;

    let passed = record
        .verification_passed
        .unwrap_or(record.issues.is_empty());
    let action_items = if record.verified_action_items.is_empty() {
        state.action_items.clone()
    } else {
        record.verified_action_items
    };
    let sources = match record.verified_sources {
        Some(value) if !value.is_null() => normalize_sources(&value),
        _ => state.sources_section.clone(),
    };

    Ok(StateUpdate {
        verification_passed: Some(passed),
        verification_issues: Some(record.issues),
        verified_summary: Some(
            record
                .verified_summary
                .unwrap_or_else(|| state.executive_summary.clone()),
        ),
        verified_email: Some(
            record
                .verified_email
                .unwrap_or_else(|| state.client_email.clone()),
        ),
        verified_action_items: Some(action_items),
        verified_sources: Some(sources),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use copilot_shared::{Confidence, NO_CITATION, OutputMode, ResearchNote};

    use super::*;
    use crate::test_support::{FixedRetriever, ScriptedBackends, context};

    fn drafted(note: &str) -> PipelineState {
        let mut state = PipelineState::new("Assess DCT savings", "", OutputMode::Executive);
        state.research_notes = vec![ResearchNote {
            content: note.into(),
            citation: NO_CITATION.into(),
        }];
        state.executive_summary = "DCTs cut site costs by 40%.".into();
        state.client_email = "Dear Stakeholders,".into();
        state.action_items = vec![ActionItem {
            action: "Pilot a hybrid trial".into(),
            owner: "Clinical Ops".into(),
            due_date: "2025-09-01".into(),
            confidence: Confidence::Medium,
        }];
        state.sources_section = "1. [dct.txt | Chunk #1]".into();
        state
    }

    const GROUNDED: &str = "What do DCTs save?\nDCTs reduce site visits [dct.txt | Chunk #1]";

    #[tokio::test]
    async fn ungrounded_run_passes_through_without_backend() {
        let backends = ScriptedBackends::new();
        let retriever = FixedRetriever::default();
        let state = drafted("Q\nNot found in sources.");
        let outcome = run(&state, &context(&backends, &retriever)).await;

        assert_eq!(backends.calls(), 0);
        assert!(outcome.metrics.succeeded());
        assert_eq!(outcome.update.verification_passed, Some(true));
        assert_eq!(outcome.update.verification_issues, Some(Vec::new()));
        assert_eq!(outcome.update.verified_summary.as_deref(), Some("DCTs cut site costs by 40%."));
        assert_eq!(outcome.update.verified_email.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn corrected_deliverable_replaces_draft() {
        let backends = ScriptedBackends::new().reply(
            r#"Here is my audit:
            {
                "verification_passed": false,
                "issues": ["[Hallucination] 40% is not in the notes; removed."],
                "verified_summary": "DCTs reduce site visits.",
                "verified_email": "Dear Stakeholders, corrected.",
                "verified_action_items": [{"action": "Run a cost model", "owner": "Finance", "due_date": "2025-08-01", "confidence": "Low"}],
                "verified_sources": {"dct.txt": "site visit data"}
            }"#,
        );
        let retriever = FixedRetriever::default();
        let outcome = run(&drafted(GROUNDED), &context(&backends, &retriever)).await;

        assert!(outcome.metrics.succeeded());
        assert_eq!(backends.samplings(), vec![SAMPLING]);
        let update = outcome.update;
        assert_eq!(update.verification_passed, Some(false));
        assert_eq!(update.verification_issues.unwrap().len(), 1);
        assert_eq!(update.verified_summary.as_deref(), Some("DCTs reduce site visits."));
        assert_eq!(update.verified_action_items.unwrap()[0].owner, "Finance");
        assert_eq!(update.verified_sources.as_deref(), Some("- dct.txt: site visit data"));
    }

    #[tokio::test]
    async fn missing_fields_fall_back_to_draft() {
        let backends =
            ScriptedBackends::new().reply(r#"{"issues": [], "verified_action_items": []}"#);
        let retriever = FixedRetriever::default();
        let state = drafted(GROUNDED);
        let outcome = run(&state, &context(&backends, &retriever)).await;

        let update = outcome.update;
        assert_eq!(update.verification_passed, Some(true));
        assert_eq!(update.verified_summary, Some(state.executive_summary.clone()));
        assert_eq!(update.verified_email, Some(state.client_email.clone()));
        assert_eq!(update.verified_action_items, Some(state.action_items.clone()));
        assert_eq!(update.verified_sources, Some(state.sources_section.clone()));
    }

    #[tokio::test]
    async fn omitted_pass_flag_follows_issues() {
        let backends = ScriptedBackends::new()
            .reply(r#"{"issues": ["[Missing Evidence] no data on partners"]}"#);
        let retriever = FixedRetriever::default();
        let outcome = run(&drafted(GROUNDED), &context(&backends, &retriever)).await;
        assert_eq!(outcome.update.verification_passed, Some(false));
    }

    #[tokio::test]
    async fn null_fields_are_treated_as_missing() {
        let backends = ScriptedBackends::new().reply(
            r#"{
                "verification_passed": null,
                "issues": null,
                "verified_summary": null,
                "verified_email": null,
                "verified_action_items": null,
                "verified_sources": null
            }"#,
        );
        let retriever = FixedRetriever::default();
        let state = drafted(GROUNDED);
        let outcome = run(&state, &context(&backends, &retriever)).await;

        assert!(outcome.metrics.succeeded());
        let update = outcome.update;
        assert_eq!(update.verification_passed, Some(true));
        assert_eq!(update.verification_issues, Some(Vec::new()));
        assert_eq!(update.verified_summary, Some(state.executive_summary.clone()));
        assert_eq!(update.verified_email, Some(state.client_email.clone()));
        assert_eq!(update.verified_action_items, Some(state.action_items.clone()));
        assert_eq!(update.verified_sources, Some(state.sources_section.clone()));
    }

    #[tokio::test]
    async fn failure_is_fail_closed() {
        let backends = ScriptedBackends::new().fail("upstream timeout");
        let retriever = FixedRetriever::default();
        let state = drafted(GROUNDED);
        let outcome = run(&state, &context(&backends, &retriever)).await;

        assert!(outcome.metrics.error.contains("upstream timeout"));
        let update = outcome.update;
        assert_eq!(update.verification_passed, Some(false));
        let issues = update.verification_issues.unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("Verifier error:"));
        assert_eq!(update.verified_summary, Some(state.executive_summary.clone()));
        assert_eq!(update.verified_action_items, Some(state.action_items.clone()));
    }

    #[tokio::test]
    async fn full_notes_reach_the_prompt() {
        let long_note = format!("{GROUNDED} {}", "detail ".repeat(100));
        let backends =
            ScriptedBackends::new().reply(r#"{"verification_passed": true, "issues": []}"#);
        let retriever = FixedRetriever::default();
        run(&drafted(&long_note), &context(&backends, &retriever)).await;
        assert!(backends.prompts()[0].contains(&long_note));
    }
}
