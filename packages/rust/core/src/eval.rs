//! Acceptance evaluation: run a fixture of business prompts through the
//! pipeline and score each final deliverable against fixed checks.

use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use copilot_shared::{CopilotError, OutputMode, PipelineState, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::pipeline::{PipelineInput, ProgressReporter, run_guarded};
use crate::stages::StageContext;

/// Word-count floor for a summary with substance.
pub const SUMMARY_MIN_WORDS: usize = 40;

/// Word-count ceiling for a summary: 150 words plus a small tolerance.
pub const SUMMARY_MAX_WORDS: usize = 160;

const GREETINGS: [&str; 5] = ["dear", "hi ", "hello", "good morning", "good afternoon"];
const SIGN_OFFS: [&str; 5] = ["regards", "sincerely", "best", "thank you", "thanks"];

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.+?\|.+?\]").expect("valid regex"));

/// One prompt from an evaluation fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalPrompt {
    pub task: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Topics a good answer should touch. Informational only.
    #[serde(default)]
    pub expected_topics: Vec<String>,
}

/// Read a JSON array of prompts.
pub fn load_prompts(path: &Path) -> Result<Vec<EvalPrompt>> {
    let text = std::fs::read_to_string(path).map_err(|e| CopilotError::io(path, e))?;
    let prompts: Vec<EvalPrompt> = serde_json::from_str(&text).map_err(|e| {
        CopilotError::validation(format!("invalid prompt fixture {}: {e}", path.display()))
    })?;
    if prompts.is_empty() {
        return Err(CopilotError::validation(format!(
            "prompt fixture {} is empty",
            path.display()
        )));
    }
    Ok(prompts)
}

/// Acceptance checks applied to every finished run, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    HasSummary,
    SummaryWithinLimit,
    SummaryHasSubstance,
    HasEmail,
    EmailIsProfessional,
    HasActionItems,
    ActionItemsComplete,
    HasCitations,
    VerifierRan,
    NoEmptySections,
}

impl Check {
    pub const ALL: [Check; 10] = [
        Check::HasSummary,
        Check::SummaryWithinLimit,
        Check::SummaryHasSubstance,
        Check::HasEmail,
        Check::EmailIsProfessional,
        Check::HasActionItems,
        Check::ActionItemsComplete,
        Check::HasCitations,
        Check::VerifierRan,
        Check::NoEmptySections,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::HasSummary => "Has executive summary",
            Self::SummaryWithinLimit => "Summary <= 150 words",
            Self::SummaryHasSubstance => "Summary >= 40 words",
            Self::HasEmail => "Has client email",
            Self::EmailIsProfessional => "Email is professional",
            Self::HasActionItems => "Has action items",
            Self::ActionItemsComplete => "Action items complete",
            Self::HasCitations => "Has citations",
            Self::VerifierRan => "Verifier ran",
            Self::NoEmptySections => "No empty sections",
        }
    }

    pub fn passes(&self, state: &PipelineState) -> bool {
        let d = state.deliverable();
        let words = d.summary.split_whitespace().count();
        match self {
            Self::HasSummary => !d.summary.trim().is_empty(),
            Self::SummaryWithinLimit => words <= SUMMARY_MAX_WORDS,
            Self::SummaryHasSubstance => words >= SUMMARY_MIN_WORDS,
            Self::HasEmail => !d.email.trim().is_empty(),
            Self::EmailIsProfessional => {
                let email = d.email.to_lowercase();
                !email.trim().is_empty()
                    && GREETINGS.iter().any(|g| email.contains(g))
                    && SIGN_OFFS.iter().any(|s| email.contains(s))
            }
            Self::HasActionItems => !d.action_items.is_empty(),
            Self::ActionItemsComplete => {
                let filled = |v: &str| {
                    let v = v.trim();
                    !v.is_empty() && !v.eq_ignore_ascii_case("tbd")
                };
                !d.action_items.is_empty()
                    && d.action_items
                        .iter()
                        .all(|item| filled(&item.owner) && filled(&item.due_date))
            }
            Self::HasCitations => CITATION_RE.is_match(&d.sources),
            Self::VerifierRan => state.was_verified(),
            Self::NoEmptySections => [&d.summary, &d.email, &d.sources]
                .iter()
                .all(|s| !s.trim().is_empty()),
        }
    }
}

/// Outcome of one check on one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub check: Check,
    pub label: &'static str,
    pub passed: bool,
}

/// Run every check against a finished run.
pub fn score(state: &PipelineState) -> Vec<CheckResult> {
    Check::ALL
        .iter()
        .map(|check| CheckResult {
            check: *check,
            label: check.label(),
            passed: check.passes(state),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pass,
    Fail,
    /// The run never started, e.g. the input guard rejected the prompt.
    Error,
}

/// Result for one fixture prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseOutcome {
    /// 1-indexed position in the fixture.
    pub index: usize,
    pub task: String,
    pub status: CaseStatus,
    pub checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_s: f64,
}

impl CaseOutcome {
    fn scored(index: usize, task: &str, state: &PipelineState, elapsed: Duration) -> Self {
        let checks = score(state);
        let status = if checks.iter().all(|c| c.passed) {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        };
        Self {
            index,
            task: task.to_string(),
            status,
            checks,
            error: None,
            elapsed_s: elapsed.as_secs_f64(),
        }
    }

    fn errored(index: usize, task: &str, error: &CopilotError, elapsed: Duration) -> Self {
        Self {
            index,
            task: task.to_string(),
            status: CaseStatus::Error,
            checks: Vec::new(),
            error: Some(error.to_string()),
            elapsed_s: elapsed.as_secs_f64(),
        }
    }
}

/// All case outcomes of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvalReport {
    pub cases: Vec<CaseOutcome>,
}

impl EvalReport {
    fn count(&self, status: CaseStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(CaseStatus::Pass)
    }

    pub fn failed(&self) -> usize {
        self.count(CaseStatus::Fail)
    }

    pub fn errors(&self) -> usize {
        self.count(CaseStatus::Error)
    }

    pub fn total_elapsed_s(&self) -> f64 {
        self.cases.iter().map(|c| c.elapsed_s).sum()
    }

    /// Write the report as pretty-printed JSON, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CopilotError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CopilotError::validation(format!("eval report serialization: {e}")))?;
        std::fs::write(path, json).map_err(|e| CopilotError::io(path, e))
    }
}

/// Run each prompt through the guarded pipeline, one after another, and score it.
#[instrument(skip_all, fields(prompts = prompts.len()))]
pub async fn run_suite(
    prompts: &[EvalPrompt],
    ctx: &StageContext<'_>,
    progress: &dyn ProgressReporter,
) -> EvalReport {
    let mut report = EvalReport::default();

    for (i, prompt) in prompts.iter().enumerate() {
        let index = i + 1;
        let input = PipelineInput::new(&prompt.task, &prompt.goal, prompt.output_mode);
        let start = Instant::now();

        let outcome = match run_guarded(&input, ctx, progress).await {
            Ok(state) => CaseOutcome::scored(index, &prompt.task, &state, start.elapsed()),
            Err(e) => {
                warn!(index, error = %e, "evaluation case did not run");
                CaseOutcome::errored(index, &prompt.task, &e, start.elapsed())
            }
        };
        info!(index, status = ?outcome.status, "evaluation case finished");
        report.cases.push(outcome);
    }

    info!(
        passed = report.passed(),
        failed = report.failed(),
        errors = report.errors(),
        "evaluation complete"
    );
    report
}
