//! Plan stage: decompose the task into sub-questions.

use copilot_llm::Sampling;
use copilot_shared::{CopilotError, PipelineState, Result, Stage, StateUpdate};
use tracing::{info, instrument, warn};

use super::{StageContext, StageOutcome, StageTimer, generate};
use crate::extract::parse_as;
use crate::prompts;

pub const SAMPLING: Sampling = Sampling::new(0.2, None);

/// Produce a non-empty plan. Any failure falls back to `[task]`.
#[instrument(skip_all, fields(stage = "plan"))]
pub async fn run(state: &PipelineState, ctx: &StageContext<'_>) -> StageOutcome {
    let mut timer = StageTimer::start(Stage::Plan);

    match attempt(state, ctx, &mut timer).await {
        Ok(plan) => {
            info!(sub_questions = plan.len(), "plan created");
            timer.succeed(StateUpdate {
                plan: Some(plan),
                ..Default::default()
            })
        }
        Err(e) => {
            warn!(error = %e, "planning failed; using the task as the only sub-question");
            timer.fail(
                e,
                StateUpdate {
                    plan: Some(vec![state.task.clone()]),
                    ..Default::default()
                },
            )
        }
    }
}

async fn attempt(
    state: &PipelineState,
    ctx: &StageContext<'_>,
    timer: &mut StageTimer,
) -> Result<Vec<String>> {
    let user = prompts::plan_user(&state.task, &state.goal);
    let generation = generate(ctx, timer, SAMPLING, prompts::PLAN_SYSTEM, &user).await?;

    let plan: Vec<String> = parse_as::<Vec<String>>(&generation.text)?
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    if plan.is_empty() {
        return Err(CopilotError::malformed(
            "plan contained no sub-questions",
            generation.text,
        ));
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use copilot_shared::OutputMode;

    use super::*;
    use crate::test_support::{FixedRetriever, ScriptedBackends, context};

    fn state() -> PipelineState {
        PipelineState::new("Assess DCT savings", "Build a business case", OutputMode::Executive)
    }

    #[tokio::test]
    async fn parses_fenced_plan() {
        let backends = ScriptedBackends::new()
            .reply("```json\n[\"What do DCTs cost?\", \"What do site visits cost?\",]\n```");
        let retriever = FixedRetriever::default();
        let outcome = run(&state(), &context(&backends, &retriever)).await;

        assert_eq!(
            outcome.update.plan.unwrap(),
            vec!["What do DCTs cost?", "What do site visits cost?"]
        );
        assert!(outcome.metrics.succeeded());
        assert_eq!(outcome.metrics.stage, Stage::Plan);
        assert_eq!(outcome.metrics.input_tokens, crate::test_support::INPUT_TOKENS);
        assert_eq!(backends.samplings(), vec![SAMPLING]);
        assert!(backends.prompts()[0].contains("Goal: Build a business case"));
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_task() {
        let backends = ScriptedBackends::new().fail("connection reset");
        let retriever = FixedRetriever::default();
        let outcome = run(&state(), &context(&backends, &retriever)).await;

        assert_eq!(outcome.update.plan.unwrap(), vec!["Assess DCT savings"]);
        assert!(outcome.metrics.error.contains("connection reset"));
        assert_eq!(outcome.metrics.input_tokens, 0);
    }

    #[tokio::test]
    async fn malformed_or_empty_plan_falls_back_to_task() {
        for reply in ["I think you should look at costs.", "[]", "[\"  \"]", "{\"a\": 1}"] {
            let backends = ScriptedBackends::new().reply(reply);
            let retriever = FixedRetriever::default();
            let outcome = run(&state(), &context(&backends, &retriever)).await;

            assert_eq!(outcome.update.plan.unwrap(), vec!["Assess DCT savings"], "reply: {reply}");
            assert!(outcome.metrics.error.contains("malformed output"), "reply: {reply}");
        }
    }
}
