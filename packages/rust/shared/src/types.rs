//! Core domain types: pipeline state, stage updates, metrics, and corpus chunks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CopilotError;

/// Placeholder markers a research note carries when no grounding evidence exists.
pub const PLACEHOLDER_MARKERS: [&str; 2] =
    ["not found in sources", "additional information needed"];

/// Citation recorded on a research note that came back without any.
pub const NO_CITATION: &str = "No citation";

// ---------------------------------------------------------------------------
// OutputMode
// ---------------------------------------------------------------------------

/// Audience the Draft stage writes for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Concise, decision-oriented output.
    #[default]
    Executive,
    /// Detailed, data-rich output.
    Analyst,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Analyst => "analyst",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "executive" => Ok(Self::Executive),
            "analyst" => Ok(Self::Analyst),
            other => Err(CopilotError::validation(format!(
                "unknown output mode '{other}': expected 'executive' or 'analyst'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Research notes and action items
// ---------------------------------------------------------------------------

/// A single research finding with its citation tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchNote {
    /// Sub-question followed by the note text, newline separated.
    pub content: String,
    /// `"; "`-joined citation tags, or [`NO_CITATION`].
    pub citation: String,
}

impl ResearchNote {
    /// Whether this note is a not-found placeholder rather than grounded evidence.
    pub fn is_placeholder(&self) -> bool {
        let text = self.content.to_lowercase();
        PLACEHOLDER_MARKERS.iter().any(|m| text.contains(m))
    }
}

/// How well an action item is grounded in evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown confidence '{other}'")),
        }
    }
}

impl TryFrom<String> for Confidence {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One row in the action list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub action: String,
    #[serde(default = "tbd", deserialize_with = "null_as_tbd")]
    pub owner: String,
    /// `YYYY-MM-DD`, or `TBD` when the generator omitted it.
    #[serde(default = "tbd", deserialize_with = "null_as_tbd")]
    pub due_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence: Confidence,
}

fn tbd() -> String {
    "TBD".into()
}

fn null_as_tbd<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(tbd))
}

/// Read an explicit `null` as the type's default, the same as a missing key.
/// Use together with `#[serde(default)]`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Verification issues
// ---------------------------------------------------------------------------

/// Category tag a verification issue starts with, e.g. `[Hallucination] ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    Hallucination,
    MissingEvidence,
    Contradiction,
}

impl IssueCategory {
    /// Parse the bracketed prefix of an issue string. Untagged issues yield `None`.
    pub fn of_issue(issue: &str) -> Option<Self> {
        let rest = issue.trim_start().strip_prefix('[')?;
        let (tag, _) = rest.split_once(']')?;
        match tag.trim().to_ascii_lowercase().as_str() {
            "hallucination" => Some(Self::Hallucination),
            "missing evidence" => Some(Self::MissingEvidence),
            "contradiction" => Some(Self::Contradiction),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Hallucination => "Hallucination",
            Self::MissingEvidence => "Missing Evidence",
            Self::Contradiction => "Contradiction",
        }
    }
}

// ---------------------------------------------------------------------------
// Stage metrics
// ---------------------------------------------------------------------------

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Plan,
    Research,
    Draft,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Research => "research",
            Self::Draft => "draft",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency, token usage, and error tracking for one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: Stage,
    /// Wall-clock seconds.
    pub latency_s: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Empty on success.
    #[serde(default)]
    pub error: String,
}

impl StageMetrics {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            latency_s: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            error: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pipeline state
// ---------------------------------------------------------------------------

/// Accumulated state threaded through the four stages of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    // Input
    pub task: String,
    pub goal: String,
    pub output_mode: OutputMode,

    // Plan
    #[serde(default)]
    pub plan: Vec<String>,

    // Research
    #[serde(default)]
    pub research_notes: Vec<ResearchNote>,
    /// Evidence gate computed once over `research_notes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounded: Option<bool>,

    // Draft
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub action_items: Vec<ActionItem>,
    #[serde(default)]
    pub sources_section: String,

    // Verify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_passed: Option<bool>,
    #[serde(default)]
    pub verification_issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_action_items: Option<Vec<ActionItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_sources: Option<String>,

    // Observability
    #[serde(default)]
    pub agent_metrics: Vec<StageMetrics>,
}

impl PipelineState {
    /// Fresh state with only the input fields populated. An empty goal defaults to the task.
    pub fn new(task: impl Into<String>, goal: impl Into<String>, output_mode: OutputMode) -> Self {
        let task = task.into();
        let goal = goal.into();
        let goal = if goal.trim().is_empty() { task.clone() } else { goal };
        Self {
            task,
            goal,
            output_mode,
            ..Default::default()
        }
    }

    /// Merge a stage's partial update: set fields overwrite, metrics append.
    pub fn merge(&mut self, update: StateUpdate) {
        let StateUpdate {
            plan,
            research_notes,
            grounded,
            executive_summary,
            client_email,
            action_items,
            sources_section,
            verification_passed,
            verification_issues,
            verified_summary,
            verified_email,
            verified_action_items,
            verified_sources,
        } = update;

        if let Some(v) = plan {
            self.plan = v;
        }
        if let Some(v) = research_notes {
            self.research_notes = v;
        }
        if grounded.is_some() {
            self.grounded = grounded;
        }
        if let Some(v) = executive_summary {
            self.executive_summary = v;
        }
        if let Some(v) = client_email {
            self.client_email = v;
        }
        if let Some(v) = action_items {
            self.action_items = v;
        }
        if let Some(v) = sources_section {
            self.sources_section = v;
        }
        if verification_passed.is_some() {
            self.verification_passed = verification_passed;
        }
        if let Some(v) = verification_issues {
            self.verification_issues = v;
        }
        if verified_summary.is_some() {
            self.verified_summary = verified_summary;
        }
        if verified_email.is_some() {
            self.verified_email = verified_email;
        }
        if verified_action_items.is_some() {
            self.verified_action_items = verified_action_items;
        }
        if verified_sources.is_some() {
            self.verified_sources = verified_sources;
        }
    }

    /// Append one stage's metrics record.
    pub fn record(&mut self, metrics: StageMetrics) {
        self.agent_metrics.push(metrics);
    }

    /// The evidence gate for Draft and Verify. Uses the value Research recorded,
    /// or classifies the notes directly when Research never ran.
    pub fn is_grounded(&self) -> bool {
        self.grounded
            .unwrap_or_else(|| self.research_notes.iter().any(|n| !n.is_placeholder()))
    }

    /// Whether Verify ran (or was evidence-skipped) for this run.
    pub fn was_verified(&self) -> bool {
        self.verification_passed.is_some()
    }

    /// The authoritative deliverable: verified fields when present, Draft output otherwise.
    pub fn deliverable(&self) -> Deliverable {
        Deliverable {
            summary: self
                .verified_summary
                .clone()
                .unwrap_or_else(|| self.executive_summary.clone()),
            email: self
                .verified_email
                .clone()
                .unwrap_or_else(|| self.client_email.clone()),
            action_items: self
                .verified_action_items
                .clone()
                .unwrap_or_else(|| self.action_items.clone()),
            sources: self
                .verified_sources
                .clone()
                .unwrap_or_else(|| self.sources_section.clone()),
            verification_passed: self.verification_passed,
            issues: self.verification_issues.clone(),
        }
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.agent_metrics.iter().map(|m| m.input_tokens).sum()
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.agent_metrics.iter().map(|m| m.output_tokens).sum()
    }
}

/// Partial update returned by a stage. `None` leaves the state field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub plan: Option<Vec<String>>,
    pub research_notes: Option<Vec<ResearchNote>>,
    pub grounded: Option<bool>,
    pub executive_summary: Option<String>,
    pub client_email: Option<String>,
    pub action_items: Option<Vec<ActionItem>>,
    pub sources_section: Option<String>,
    pub verification_passed: Option<bool>,
    pub verification_issues: Option<Vec<String>>,
    pub verified_summary: Option<String>,
    pub verified_email: Option<String>,
    pub verified_action_items: Option<Vec<ActionItem>>,
    pub verified_sources: Option<String>,
}

impl StateUpdate {
    /// Whether the Draft fields of this update contain anything worth verifying.
    pub fn has_draft_content(&self) -> bool {
        let non_empty = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());
        non_empty(&self.executive_summary) || non_empty(&self.client_email)
    }
}

/// The user-facing view of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deliverable {
    pub summary: String,
    pub email: String,
    pub action_items: Vec<ActionItem>,
    pub sources: String,
    pub verification_passed: Option<bool>,
    pub issues: Vec<String>,
}

// ---------------------------------------------------------------------------
// Corpus chunks
// ---------------------------------------------------------------------------

/// A chunk of a source document, ready to be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Source file name.
    pub source: String,
    /// 1-indexed position within the source.
    pub chunk_id: u32,
    /// `[<source> | Chunk #<chunk_id>]`.
    pub citation: String,
    pub content: String,
}

impl Chunk {
    pub fn new(source: impl Into<String>, chunk_id: u32, content: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            citation: citation_tag(&source, chunk_id),
            source,
            chunk_id,
            content: content.into(),
        }
    }
}

/// Format the citation tag for a chunk.
pub fn citation_tag(source: &str, chunk_id: u32) -> String {
    format!("[{source} | Chunk #{chunk_id}]")
}

/// A fragment returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}
