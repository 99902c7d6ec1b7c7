//! Per-run JSON logs and metrics aggregated across them.
//!
//! Each finished run is written as `<run_id>.json` under the logs directory.
//! [`aggregate`] reads those records back into system-level figures: success
//! and verification rates, latency and token usage, per-stage breakdowns, and
//! usage by output mode and hour of day.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Timelike};
use copilot_shared::{CopilotError, OutputMode, PipelineState, Result, Stage, StageMetrics};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// The persisted record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    /// `YYYYmmdd_HHMMSS_<8 hex>`.
    pub run_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub task: String,
    pub goal: String,
    pub output_mode: OutputMode,
    pub elapsed_s: f64,
    pub stages: Vec<StageMetrics>,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub total_latency_s: f64,
    pub verification_passed: Option<bool>,
    #[serde(default)]
    pub verification_issues: Vec<String>,
    pub stage_count: usize,
    pub all_stages_passed: bool,
}

impl RunLog {
    /// Build the record for a run that just finished.
    pub fn from_state(state: &PipelineState, elapsed: Duration) -> Self {
        Self::at(state, elapsed, Local::now().fixed_offset())
    }

    fn at(state: &PipelineState, elapsed: Duration, now: DateTime<FixedOffset>) -> Self {
        let suffix = Uuid::now_v7().simple().to_string();
        let run_id = format!(
            "{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            &suffix[suffix.len() - 8..]
        );
        let total_latency: f64 = state.agent_metrics.iter().map(|m| m.latency_s).sum();

        Self {
            run_id,
            timestamp: now,
            task: state.task.clone(),
            goal: state.goal.clone(),
            output_mode: state.output_mode,
            elapsed_s: round_to(elapsed.as_secs_f64(), 2),
            stages: state.agent_metrics.clone(),
            total_tokens_in: state.total_input_tokens(),
            total_tokens_out: state.total_output_tokens(),
            total_latency_s: round_to(total_latency, 2),
            verification_passed: state.verification_passed,
            verification_issues: state.verification_issues.clone(),
            stage_count: state.agent_metrics.len(),
            all_stages_passed: state.agent_metrics.iter().all(StageMetrics::succeeded),
        }
    }
}

/// Directory of run log files.
#[derive(Debug, Clone)]
pub struct RunLogStore {
    dir: PathBuf,
}

impl RunLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `log` as pretty-printed JSON, creating the directory if needed.
    pub fn save(&self, log: &RunLog) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CopilotError::io(&self.dir, e))?;

        let path = self.dir.join(format!("{}.json", log.run_id));
        let json = serde_json::to_string_pretty(log)
            .map_err(|e| CopilotError::validation(format!("run log serialization: {e}")))?;
        std::fs::write(&path, json).map_err(|e| CopilotError::io(&path, e))?;

        debug!(path = %path.display(), "run log saved");
        Ok(path)
    }

    /// Read every `*.json` record in name order. Unreadable or corrupt files
    /// are skipped; a missing directory yields no records.
    pub fn load_all(&self) -> Result<Vec<RunLog>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|e| CopilotError::io(&self.dir, e))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut logs = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<RunLog>(&text).map_err(|e| e.to_string()));
            match parsed {
                Ok(log) => logs.push(log),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable run log"),
            }
        }
        Ok(logs)
    }
}

/// Figures for one stage across all runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageAggregate {
    pub runs: usize,
    pub avg_latency_s: f64,
    pub avg_tokens_in: u64,
    pub avg_tokens_out: u64,
    pub error_count: usize,
    pub error_rate_pct: f64,
}

/// System-level figures across all recorded runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub total_runs: usize,
    /// Runs in which every stage finished without error.
    pub successful_runs: usize,
    pub success_rate_pct: f64,
    pub verification_passed: usize,
    pub verification_failed: usize,
    pub verification_rate_pct: f64,
    pub avg_elapsed_s: f64,
    pub min_elapsed_s: f64,
    pub max_elapsed_s: f64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub avg_tokens_in_per_run: u64,
    pub avg_tokens_out_per_run: u64,
    pub per_stage: BTreeMap<Stage, StageAggregate>,
    pub mode_distribution: BTreeMap<String, usize>,
    /// Runs per hour of day (0-23), in each run's recorded offset.
    pub hourly_distribution: BTreeMap<u32, usize>,
}

pub fn aggregate(logs: &[RunLog]) -> AggregatedMetrics {
    if logs.is_empty() {
        return AggregatedMetrics::default();
    }
    let total = logs.len();

    let successful = logs.iter().filter(|l| l.all_stages_passed).count();
    let verified = logs.iter().filter(|l| l.verification_passed == Some(true)).count();
    let verify_failed = logs.iter().filter(|l| l.verification_passed == Some(false)).count();

    let elapsed: Vec<f64> = logs.iter().map(|l| l.elapsed_s).collect();
    let min_elapsed = elapsed.iter().copied().fold(f64::INFINITY, f64::min);
    let max_elapsed = elapsed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let tokens_in: u64 = logs.iter().map(|l| l.total_tokens_in).sum();
    let tokens_out: u64 = logs.iter().map(|l| l.total_tokens_out).sum();

    #[derive(Default)]
    struct Totals {
        runs: usize,
        latency: f64,
        tokens_in: u64,
        tokens_out: u64,
        errors: usize,
    }
    let mut totals: BTreeMap<Stage, Totals> = BTreeMap::new();
    for metrics in logs.iter().flat_map(|l| &l.stages) {
        let t = totals.entry(metrics.stage).or_default();
        t.runs += 1;
        t.latency += metrics.latency_s;
        t.tokens_in += metrics.input_tokens;
        t.tokens_out += metrics.output_tokens;
        if !metrics.succeeded() {
            t.errors += 1;
        }
    }
    let per_stage = totals
        .into_iter()
        .map(|(stage, t)| {
            let n = t.runs as f64;
            let aggregate = StageAggregate {
                runs: t.runs,
                avg_latency_s: round_to(t.latency / n, 2),
                avg_tokens_in: (t.tokens_in as f64 / n).round() as u64,
                avg_tokens_out: (t.tokens_out as f64 / n).round() as u64,
                error_count: t.errors,
                error_rate_pct: pct(t.errors, t.runs),
            };
            (stage, aggregate)
        })
        .collect();

    let mut mode_distribution = BTreeMap::new();
    let mut hourly_distribution = BTreeMap::new();
    for log in logs {
        *mode_distribution
            .entry(log.output_mode.as_str().to_string())
            .or_insert(0) += 1;
        *hourly_distribution.entry(log.timestamp.hour()).or_insert(0) += 1;
    }

    AggregatedMetrics {
        total_runs: total,
        successful_runs: successful,
        success_rate_pct: pct(successful, total),
        verification_passed: verified,
        verification_failed: verify_failed,
        verification_rate_pct: pct(verified, total),
        avg_elapsed_s: round_to(elapsed.iter().sum::<f64>() / total as f64, 2),
        min_elapsed_s: round_to(min_elapsed, 2),
        max_elapsed_s: round_to(max_elapsed, 2),
        total_tokens_in: tokens_in,
        total_tokens_out: tokens_out,
        avg_tokens_in_per_run: (tokens_in as f64 / total as f64).round() as u64,
        avg_tokens_out_per_run: (tokens_out as f64 / total as f64).round() as u64,
        per_stage,
        mode_distribution,
        hourly_distribution,
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_to(part as f64 / whole as f64 * 100.0, 1)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn metrics(stage: Stage, latency_s: f64, tokens: (u64, u64), error: &str) -> StageMetrics {
        StageMetrics {
            stage,
            latency_s,
            input_tokens: tokens.0,
            output_tokens: tokens.1,
            error: error.into(),
        }
    }

    fn at_hour(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 2, hour, 15, 0)
            .unwrap()
    }

    fn finished_state(mode: OutputMode, verify_error: bool) -> PipelineState {
        let mut state = PipelineState::new("Assess DCT savings", "", mode);
        state.record(metrics(Stage::Plan, 1.0, (100, 20), ""));
        state.record(metrics(Stage::Research, 2.0, (300, 80), ""));
        state.record(metrics(Stage::Draft, 3.0, (500, 400), ""));
        let error = if verify_error { "backend error: timeout" } else { "" };
        state.record(metrics(Stage::Verify, 1.5, (700, 300), error));
        state.verification_passed = Some(!verify_error);
        state
    }

    fn temp_store() -> RunLogStore {
        RunLogStore::new(std::env::temp_dir().join(format!("copilot_logs_{}", Uuid::now_v7())))
    }

    #[test]
    fn record_totals_and_run_id() {
        let state = finished_state(OutputMode::Executive, true);
        let log = RunLog::at(&state, Duration::from_millis(7_512), at_hour(9));

        assert!(log.run_id.starts_with("20250602_091500_"));
        assert_eq!(log.run_id.len(), "20250602_091500_".len() + 8);
        assert_eq!(log.elapsed_s, 7.51);
        assert_eq!(log.total_tokens_in, 1600);
        assert_eq!(log.total_tokens_out, 800);
        assert_eq!(log.total_latency_s, 7.5);
        assert_eq!(log.stage_count, 4);
        assert!(!log.all_stages_passed);
        assert_eq!(log.verification_passed, Some(false));
    }

    #[test]
    fn save_and_load_round_trip() {
        let store = temp_store();
        let log = RunLog::from_state(
            &finished_state(OutputMode::Analyst, false),
            Duration::from_secs(8),
        );
        let path = store.save(&log).unwrap();
        assert!(path.ends_with(format!("{}.json", log.run_id)));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"output_mode\": \"analyst\""));
        assert!(text.contains("\"stage\": \"verify\""));

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![log]);
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let store = temp_store();
        let log = RunLog::from_state(
            &finished_state(OutputMode::Executive, false),
            Duration::from_secs(3),
        );
        store.save(&log).unwrap();
        std::fs::write(store.dir().join("broken.json"), "{not json").unwrap();
        std::fs::write(store.dir().join("readme.txt"), "ignored").unwrap();

        assert_eq!(store.load_all().unwrap().len(), 1);
        assert!(RunLogStore::new(store.dir().join("missing")).load_all().unwrap().is_empty());
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        assert_eq!(aggregate(&[]), AggregatedMetrics::default());
    }

    #[test]
    fn aggregate_across_runs() {
        let logs = vec![
            RunLog::at(
                &finished_state(OutputMode::Executive, false),
                Duration::from_secs(8),
                at_hour(9),
            ),
            RunLog::at(
                &finished_state(OutputMode::Executive, true),
                Duration::from_secs(10),
                at_hour(9),
            ),
            RunLog::at(
                &finished_state(OutputMode::Analyst, false),
                Duration::from_secs(12),
                at_hour(14),
            ),
        ];
        let m = aggregate(&logs);

        assert_eq!(m.total_runs, 3);
        assert_eq!(m.successful_runs, 2);
        assert_eq!(m.success_rate_pct, 66.7);
        assert_eq!(m.verification_passed, 2);
        assert_eq!(m.verification_failed, 1);
        assert_eq!(m.verification_rate_pct, 66.7);
        assert_eq!(m.avg_elapsed_s, 10.0);
        assert_eq!(m.min_elapsed_s, 8.0);
        assert_eq!(m.max_elapsed_s, 12.0);
        assert_eq!(m.total_tokens_in, 4800);
        assert_eq!(m.avg_tokens_out_per_run, 800);

        let verify = &m.per_stage[&Stage::Verify];
        assert_eq!(verify.runs, 3);
        assert_eq!(verify.error_count, 1);
        assert_eq!(verify.error_rate_pct, 33.3);
        assert_eq!(verify.avg_latency_s, 1.5);
        assert_eq!(m.per_stage[&Stage::Draft].avg_tokens_in, 500);

        assert_eq!(m.mode_distribution["executive"], 2);
        assert_eq!(m.mode_distribution["analyst"], 1);
        assert_eq!(m.hourly_distribution[&9], 2);
        assert_eq!(m.hourly_distribution[&14], 1);

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["per_stage"]["verify"]["error_count"], 1);
    }
}
