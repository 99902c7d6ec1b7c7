//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use copilot_core::eval::{self, CaseStatus, EvalReport};
use copilot_core::ingest;
use copilot_core::run_log::{self, AggregatedMetrics, RunLog, RunLogStore};
use copilot_core::{CollectionRetriever, PipelineInput, ProgressReporter, StageContext};
use copilot_llm::{ClientCache, OpenAiSettings};
use copilot_shared::{
    AppConfig, CopilotError, IssueCategory, OutputMode, PipelineState, Stage, StageMetrics,
    init_config, load_config,
};
use copilot_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Copilot: cited, fact-checked answers to business questions.
#[derive(Parser)]
#[command(
    name = "copilot",
    version,
    about = "Turn a business question into a cited, fact-checked deliverable.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Answer a business question from the indexed documents.
    Ask {
        /// The question or task.
        task: String,

        /// What the answer should achieve (defaults to the task).
        #[arg(short, long, default_value = "")]
        goal: String,

        /// Output mode: executive or analyst.
        #[arg(short, long, default_value = "executive")]
        mode: String,

        /// Print the full pipeline state as JSON.
        #[arg(long)]
        json: bool,

        /// Do not write a run log.
        #[arg(long)]
        no_log: bool,
    },

    /// Chunk and index the `.txt` documents in the data directory.
    Ingest {
        /// Directory to ingest (overrides the configured data_dir).
        #[arg(short, long)]
        data_dir: Option<String>,
    },

    /// Run a prompt fixture through the pipeline and score each deliverable.
    Eval {
        /// JSON array of prompts ({task, goal, output_mode, expected_topics}).
        #[arg(short, long, default_value = "eval/prompts.json")]
        prompts: String,

        /// Where to write the JSON report (defaults to <logs.dir>/eval_results.json).
        #[arg(short, long)]
        output: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show metrics aggregated across all run logs.
    Metrics {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "copilot=info",
        1 => "copilot=debug",
        _ => "copilot=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ask {
            task,
            goal,
            mode,
            json,
            no_log,
        } => cmd_ask(&task, &goal, &mode, json, no_log).await,
        Command::Ingest { data_dir } => cmd_ingest(data_dir).await,
        Command::Eval {
            prompts,
            output,
            json,
        } => cmd_eval(&prompts, output, json).await,
        Command::Metrics { json } => cmd_metrics(json),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// ask
// ---------------------------------------------------------------------------

async fn cmd_ask(task: &str, goal: &str, mode: &str, json: bool, no_log: bool) -> Result<()> {
    let output_mode: OutputMode = mode.parse()?;
    let config = load_config()?;
    let (backends, retriever) = connect(&config).await?;
    let ctx = stage_context(&config, &backends, &retriever);
    let input = PipelineInput::new(task, goal, output_mode);

    info!(mode = %output_mode, model = %config.llm.model, "running pipeline");

    let progress = CliProgress::new();
    let start = Instant::now();
    let result = copilot_core::run_guarded(&input, &ctx, &progress).await;
    let elapsed = start.elapsed();
    progress.finish();

    let state = match result {
        Ok(state) => state,
        Err(CopilotError::InjectionDetected { field, reason }) => {
            return Err(eyre!("Input rejected ({field}): {reason}"));
        }
        Err(e) => return Err(e.into()),
    };

    if !no_log {
        let store = RunLogStore::new(&config.logs.dir);
        match store.save(&RunLog::from_state(&state, elapsed)) {
            Ok(path) => info!(path = %path.display(), "run log written"),
            Err(e) => warn!(error = %e, "could not write run log"),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_deliverable(&state, elapsed.as_secs_f64());
    }
    Ok(())
}

/// Open the index and build the OpenAI client cache for a pipeline run.
async fn connect(config: &AppConfig) -> Result<(ClientCache, CollectionRetriever)> {
    let storage = open_index(config).await?;
    let backends = ClientCache::openai(OpenAiSettings::from_config(config)?);
    let retriever =
        CollectionRetriever::new(Arc::new(storage), config.retrieval.collection.clone());
    Ok((backends, retriever))
}

fn stage_context<'a>(
    config: &AppConfig,
    backends: &'a ClientCache,
    retriever: &'a CollectionRetriever,
) -> StageContext<'a> {
    StageContext {
        backends,
        retriever,
        top_k: config.retrieval.top_k,
        today: chrono::Local::now().date_naive(),
    }
}

/// Open the chunk index read-only and check the collection was built for
/// the configured ranker.
async fn open_index(config: &AppConfig) -> Result<Storage> {
    let storage = Storage::open_readonly(Path::new(&config.retrieval.index_path)).await?;

    match storage.get_collection(&config.retrieval.collection).await? {
        Some(meta) => {
            if meta.embedding_model != config.retrieval.embedding_model {
                warn!(
                    indexed = %meta.embedding_model,
                    configured = %config.retrieval.embedding_model,
                    "collection was built with a different ranker; re-run `copilot ingest`"
                );
            }
        }
        None => {
            return Err(eyre!(
                "collection '{}' not found in {}; run `copilot ingest` first",
                config.retrieval.collection,
                config.retrieval.index_path
            ));
        }
    }
    Ok(storage)
}

fn print_deliverable(state: &PipelineState, elapsed_s: f64) {
    let deliverable = state.deliverable();

    println!();
    println!("== Executive Summary ==");
    println!("{}", or_none(&deliverable.summary));
    println!();
    println!("== Client Email ==");
    println!("{}", or_none(&deliverable.email));
    println!();
    println!("== Action Items ==");
    if deliverable.action_items.is_empty() {
        println!("(none)");
    }
    for item in &deliverable.action_items {
        println!(
            "- {} | {} | {} | {}",
            item.action, item.owner, item.due_date, item.confidence
        );
    }
    println!();
    println!("== Sources ==");
    println!("{}", or_none(&deliverable.sources));
    println!();

    let status = match deliverable.verification_passed {
        Some(true) => "passed",
        Some(false) => "NOT VERIFIED",
        None => "skipped",
    };
    println!("== Verification: {status} ==");
    for category in [
        Some(IssueCategory::Hallucination),
        Some(IssueCategory::MissingEvidence),
        Some(IssueCategory::Contradiction),
        None,
    ] {
        let issues: Vec<&String> = deliverable
            .issues
            .iter()
            .filter(|i| IssueCategory::of_issue(i) == category)
            .collect();
        if issues.is_empty() {
            continue;
        }
        println!("  {}:", category.map_or("Other", |c| c.label()));
        for issue in issues {
            println!("    - {issue}");
        }
    }
    println!();

    println!("== Stages ==");
    for m in &state.agent_metrics {
        let status = if m.succeeded() {
            "ok".to_string()
        } else {
            format!("error: {}", m.error)
        };
        println!(
            "  {:<9} {:>6.2}s  in={:<6} out={:<6} {status}",
            m.stage.as_str(),
            m.latency_s,
            m.input_tokens,
            m.output_tokens
        );
    }
    println!(
        "  total     {elapsed_s:>6.2}s  in={:<6} out={:<6}",
        state.total_input_tokens(),
        state.total_output_tokens()
    );
    println!();
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() { "(none)" } else { text }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: Stage) {
        let message = match stage {
            Stage::Plan => "Planning sub-questions",
            Stage::Research => "Researching the document collection",
            Stage::Draft => "Drafting the deliverable",
            Stage::Verify => "Verifying against the evidence",
        };
        self.spinner.set_message(message);
    }

    fn stage_finished(&self, stage: Stage, metrics: &StageMetrics) {
        if metrics.succeeded() {
            self.spinner
                .println(format!("  ✓ {stage} ({:.1}s)", metrics.latency_s));
        } else {
            self.spinner
                .println(format!("  ✗ {stage}: {}", metrics.error));
        }
    }
}

// ---------------------------------------------------------------------------
// eval
// ---------------------------------------------------------------------------

async fn cmd_eval(prompts_path: &str, output: Option<String>, json: bool) -> Result<()> {
    let prompts = eval::load_prompts(Path::new(prompts_path))?;
    let config = load_config()?;
    let (backends, retriever) = connect(&config).await?;
    let ctx = stage_context(&config, &backends, &retriever);

    info!(prompts = prompts.len(), path = %prompts_path, "running evaluation");

    let progress = CliProgress::new();
    let report = eval::run_suite(&prompts, &ctx, &progress).await;
    progress.finish();

    let output = output
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(&config.logs.dir).join("eval_results.json"));
    report.save(&output)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_eval(&report);
        println!("  Results saved to {}", output.display());
        println!();
    }
    Ok(())
}

fn print_eval(report: &EvalReport) {
    for case in &report.cases {
        println!();
        println!("Test {}: {}", case.index, case.task);
        match case.status {
            CaseStatus::Error => {
                println!("  ERROR {}", case.error.as_deref().unwrap_or("unknown error"));
            }
            CaseStatus::Pass | CaseStatus::Fail => {
                for check in &case.checks {
                    let mark = if check.passed { "PASS" } else { "FAIL" };
                    println!("  {mark} {}", check.label);
                }
            }
        }
        println!("  Time: {:.1}s", case.elapsed_s);
    }

    let total = report.cases.len();
    println!();
    println!("== Evaluation summary ==");
    println!("  Passed:  {}/{total}", report.passed());
    println!("  Failed:  {}/{total}", report.failed());
    println!("  Errors:  {}/{total}", report.errors());
    println!("  Total:   {:.1}s", report.total_elapsed_s());
}

// ---------------------------------------------------------------------------
// ingest / metrics / config
// ---------------------------------------------------------------------------

async fn cmd_ingest(data_dir: Option<String>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(dir) = data_dir {
        config.retrieval.data_dir = dir;
    }

    info!(
        data_dir = %config.retrieval.data_dir,
        index = %config.retrieval.index_path,
        "ingesting documents"
    );

    let storage = Storage::open(Path::new(&config.retrieval.index_path)).await?;
    let report = ingest::ingest(&config.retrieval, &storage).await?;

    println!();
    println!("  Ingest complete");
    println!("  Collection: {}", config.retrieval.collection);
    println!("  Documents:  {}", report.documents);
    println!("  Chunks:     {}", report.chunks);
    println!("  Index:      {}", config.retrieval.index_path);
    println!();
    Ok(())
}

fn cmd_metrics(json: bool) -> Result<()> {
    let config = load_config()?;
    let logs = RunLogStore::new(&config.logs.dir).load_all()?;
    let metrics = run_log::aggregate(&logs);

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_metrics(&metrics);
    }
    Ok(())
}

fn print_metrics(m: &AggregatedMetrics) {
    if m.total_runs == 0 {
        println!("No runs recorded yet.");
        return;
    }

    println!();
    println!(
        "  Runs:          {} ({} successful, {:.1}%)",
        m.total_runs, m.successful_runs, m.success_rate_pct
    );
    println!(
        "  Verification:  {} passed, {} failed ({:.1}% passed)",
        m.verification_passed, m.verification_failed, m.verification_rate_pct
    );
    println!(
        "  Elapsed:       avg {:.2}s, min {:.2}s, max {:.2}s",
        m.avg_elapsed_s, m.min_elapsed_s, m.max_elapsed_s
    );
    println!(
        "  Tokens:        {} in / {} out (avg {} / {} per run)",
        m.total_tokens_in, m.total_tokens_out, m.avg_tokens_in_per_run, m.avg_tokens_out_per_run
    );
    println!();
    println!(
        "  {:<9} {:>5} {:>9} {:>8} {:>8} {:>7}",
        "stage", "runs", "latency", "in", "out", "errors"
    );
    for (stage, s) in &m.per_stage {
        println!(
            "  {:<9} {:>5} {:>8.2}s {:>8} {:>8} {:>6.1}%",
            stage.as_str(),
            s.runs,
            s.avg_latency_s,
            s.avg_tokens_in,
            s.avg_tokens_out,
            s.error_rate_pct
        );
    }
    println!();
    let modes: Vec<String> = m
        .mode_distribution
        .iter()
        .map(|(mode, n)| format!("{mode}={n}"))
        .collect();
    println!("  Modes: {}", modes.join(", "));
    let hours: Vec<String> = m
        .hourly_distribution
        .iter()
        .map(|(hour, n)| format!("{hour:02}h={n}"))
        .collect();
    println!("  Hours: {}", hours.join(", "));
    println!();
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
