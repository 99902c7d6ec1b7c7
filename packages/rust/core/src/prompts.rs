//! Instruction text for each stage.
//!
//! System instructions are constants; user instructions are built from the
//! fields each stage reads from pipeline state.

use chrono::NaiveDate;
use copilot_shared::{ActionItem, NO_CITATION, OutputMode, ResearchNote, RetrievedChunk};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

pub const PLAN_SYSTEM: &str = "\
You are the planning step of a business research assistant.

Break the user's task into 3-5 specific sub-questions that can each be answered
from an internal document collection. Put prerequisite questions first.

Rules:
- Each sub-question must stand on its own.
- Do not answer the questions.
- Respond with a JSON array of strings and nothing else.
";

pub fn plan_user(task: &str, goal: &str) -> String {
    format!(
        "Task: {task}\nGoal: {goal}\n\n\
         Return a JSON array of sub-questions, for example:\n\
         [\"What do current guidelines say about X?\", \"What data supports Y?\"]\n"
    )
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

pub const RESEARCH_SYSTEM: &str = "\
You are the research step of a business research assistant. You receive
sub-questions and excerpts retrieved from the document collection, each headed
by its citation tag.

For every sub-question:
1. Find the most relevant evidence in the excerpts.
2. Write a 2-4 sentence note that uses only that evidence.
3. List the exact citation tags you used, in the form [document.txt | Chunk #N].
4. If the excerpts do not answer it, write:
   \"Not found in sources. Additional information needed: <what is missing>.\"

Never state facts that are not in the excerpts.
";

pub fn research_user(plan: &[String], evidence: &str) -> String {
    let sub_questions = serde_json::to_string_pretty(plan).unwrap_or_default();
    format!(
        "Sub-questions:\n{sub_questions}\n\n\
         Retrieved excerpts:\n{evidence}\n\n\
         Return a JSON array with one object per sub-question:\n\
         [\n  {{\"sub_question\": \"...\", \"note\": \"...\", \"citations\": [\"[doc.txt | Chunk #1]\"]}}\n]\n"
    )
}

/// Render deduplicated retrieval results, one headed block per fragment.
pub fn format_evidence(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            let tag = chunk.citation.as_deref().unwrap_or(NO_CITATION);
            format!("--- {tag} ---\n{}\n", chunk.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

const DRAFT_SYSTEM_EXECUTIVE: &str = "\
You are the writing step of a business research assistant, writing for senior
decision makers. Produce four sections from the research notes you are given:

1. executive_summary: 40-150 words. Lead with the most important finding, then
   the supporting evidence, then one concrete recommendation.
2. client_email: a professional email that opens with \"Dear Stakeholders,\",
   states the key findings in plain language without citation tags, lists
   numbered next steps, and signs off as \"Enterprise Copilot Team\".
3. action_items: 4-6 items, each with action, owner (a functional team),
   due_date (YYYY-MM-DD) and confidence (High, Medium or Low, by how well the
   action is grounded in the notes).
4. sources_section: every citation used, one per line.

Rules:
- Only make claims a research note supports.
- Never copy \"Not found in sources\" into the summary or email.
- Only use figures that appear verbatim in the notes.
";

const DRAFT_SYSTEM_ANALYST: &str = "\
You are the writing step of a business research assistant, writing for
analysts who want detail. Produce four sections from the research notes you
are given:

1. executive_summary: 40-150 words. Lead with specific findings and their
   implications, then a data-driven recommendation.
2. client_email: a detailed email that opens with \"Dear Stakeholders,\",
   states the findings in plain language without citation tags, notes
   methodology and evidence gaps, lists structured next steps, and signs off
   as \"Enterprise Copilot Team\".
3. action_items: 5-8 specific, measurable items, each with action, owner,
   due_date (YYYY-MM-DD) and confidence (High, Medium or Low).
4. sources_section: every citation used with what it contributed, one per line.

Rules:
- Only make claims a research note supports.
- Never copy \"Not found in sources\" into the summary or email.
- Only use figures that appear verbatim in the notes.
";

pub fn draft_system(mode: OutputMode) -> &'static str {
    match mode {
        OutputMode::Executive => DRAFT_SYSTEM_EXECUTIVE,
        OutputMode::Analyst => DRAFT_SYSTEM_ANALYST,
    }
}

pub fn draft_user(
    mode: OutputMode,
    task: &str,
    goal: &str,
    today: NaiveDate,
    notes: &[ResearchNote],
) -> String {
    let today = today.format("%B %d, %Y");
    let mode_line = match mode {
        OutputMode::Executive => String::new(),
        OutputMode::Analyst => "Output mode: analyst (detailed, data-rich)\n".to_string(),
    };
    format!(
        "Task: {task}\nGoal: {goal}\nToday's date: {today}\n{mode_line}\n\
         Research notes:\n{notes}\n\n\
         Return a JSON object:\n\
         {{\n  \"executive_summary\": \"...\",\n  \"client_email\": \"...\",\n  \
         \"action_items\": [{{\"action\": \"...\", \"owner\": \"...\", \"due_date\": \"YYYY-MM-DD\", \"confidence\": \"High|Medium|Low\"}}],\n  \
         \"sources_section\": \"1. [document.txt | Chunk #N] - description\"\n}}\n",
        notes = format_notes(notes),
    )
}

/// Numbered notes with their citations, blank-line separated.
pub fn format_notes(notes: &[ResearchNote]) -> String {
    notes
        .iter()
        .enumerate()
        .map(|(i, n)| format!("Note {}: {}\n  Citation: {}", i + 1, n.content, n.citation))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ---------------------------------------------------------------------------
// Verify
// ---------------------------------------------------------------------------

pub const VERIFY_SYSTEM: &str = "\
You are the final quality check of a business research assistant. Audit the
draft deliverable against the research notes, which are the ground truth.

Look for:
- Hallucination: any number, percentage or claim not in the notes. Remove it or
  restate it qualitatively.
- Missing Evidence: parts of the task the draft leaves unaddressed. Flag the gap.
- Contradiction: statements that conflict with each other or with the notes.

Rules:
- Start every issue with its category in brackets, e.g. \"[Hallucination] ...\".
- Always return a fully corrected deliverable, not just a list of problems.
- verified_summary must be 40-150 words.
- verified_email opens with \"Dear Stakeholders,\", signs off as
  \"Enterprise Copilot Team\", and contains no citation tags.
- Every due_date is YYYY-MM-DD.
- Set verification_passed to false if you found any hallucination, even one
  you corrected.
";

pub fn verify_user(
    task: &str,
    notes: &[ResearchNote],
    summary: &str,
    email: &str,
    action_items: &[ActionItem],
    sources: &str,
) -> String {
    let notes = notes
        .iter()
        .enumerate()
        .map(|(i, n)| format!("Note {}: {} | Citation: {}", i + 1, n.content, n.citation))
        .collect::<Vec<_>>()
        .join("\n");
    let action_items = serde_json::to_string_pretty(action_items).unwrap_or_default();
    format!(
        "Original task: {task}\n\n\
         Research notes (ground truth):\n{notes}\n\n\
         Draft deliverable:\n\
         - Executive summary: {summary}\n\
         - Client email: {email}\n\
         - Action items: {action_items}\n\
         - Sources: {sources}\n\n\
         Return only a JSON object:\n\
         {{\n  \"verification_passed\": true,\n  \"issues\": [\"[Category] explanation\"],\n  \
         \"verified_summary\": \"...\",\n  \"verified_email\": \"...\",\n  \
         \"verified_action_items\": [{{\"action\": \"...\", \"owner\": \"...\", \"due_date\": \"YYYY-MM-DD\", \"confidence\": \"...\"}}],\n  \
         \"verified_sources\": \"...\"\n}}\n"
    )
}
