//! Build result types.
//!
//! Contains types for representing the outcome of stage runs and whole
//! pipeline runs.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::paths::AssetCategory;

use super::graph::TaskOutcome;

/// A per-file compilation error.
///
/// Logged and reported; the file's output is withheld while the rest of the
/// stage continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{}: {message}", .file.display(), .line.map(|l| format!(":{}", l)).unwrap_or_default())]
pub struct CompileError {
    /// File that failed
    pub file: PathBuf,
    /// Line number if the collaborator reported one
    pub line: Option<usize>,
    /// Error message
    pub message: String,
}

impl CompileError {
    pub fn new(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        let message = message.into();
        let line = extract_line_number(&message);
        Self { file: file.into(), line, message }
    }
}

/// Pull a line number out of a collaborator message (`line 12`, `:12:5`).
fn extract_line_number(message: &str) -> Option<usize> {
    if let Some(idx) = message.find("line ") {
        let digits: String =
            message[idx + 5..].chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse() {
            return Some(n);
        }
    }
    message.split(':').skip(1).find_map(|part| part.trim().parse().ok())
}

/// Status of a single stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    /// Every file processed
    Success,
    /// Some files failed to compile; the rest were written
    Partial,
    /// The stage could not run (configuration or I/O problem)
    Failed(String),
    /// Not started because a dependency failed
    Blocked(String),
}

impl StageStatus {
    /// Check if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success)
    }

    /// Check if the status indicates failure.
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Success => write!(f, "success"),
            StageStatus::Partial => write!(f, "completed with errors"),
            StageStatus::Failed(err) => write!(f, "failed: {}", err),
            StageStatus::Blocked(dep) => write!(f, "blocked by {}", dep),
        }
    }
}

/// Result of running one task (a stage or the clean step).
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Task name
    pub task: String,
    /// Category for stage tasks
    pub category: Option<AssetCategory>,
    pub status: StageStatus,
    /// Output files written
    pub outputs: Vec<PathBuf>,
    /// Per-file compile errors
    pub errors: Vec<CompileError>,
    /// Warning messages (if any)
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub started_at: Instant,
    pub finished_at: Instant,
    /// Roots served from the incremental cache
    pub cache_hits: usize,
    /// Roots handed to a compiler
    pub compiled: usize,
}

impl StageReport {
    fn new(task: String, category: Option<AssetCategory>, status: StageStatus, started_at: Instant) -> Self {
        let finished_at = Instant::now();
        Self {
            task,
            category,
            status,
            outputs: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            duration: finished_at.saturating_duration_since(started_at),
            started_at,
            finished_at,
            cache_hits: 0,
            compiled: 0,
        }
    }

    /// Report for a finished stage: `Partial` when any file failed.
    pub fn finished(
        category: AssetCategory,
        started_at: Instant,
        outputs: Vec<PathBuf>,
        errors: Vec<CompileError>,
    ) -> Self {
        let status = if errors.is_empty() { StageStatus::Success } else { StageStatus::Partial };
        let mut report = Self::new(category.name().to_string(), Some(category), status, started_at);
        report.outputs = outputs;
        report.errors = errors;
        report
    }

    /// Report for a stage that could not run.
    pub fn failed(category: AssetCategory, started_at: Instant, error: String) -> Self {
        Self::new(category.name().to_string(), Some(category), StageStatus::Failed(error), started_at)
    }

    /// Report for a task that is not a stage (clean, vcs steps).
    pub fn task(name: impl Into<String>, started_at: Instant, result: Result<(), String>) -> Self {
        let status = match result {
            Ok(()) => StageStatus::Success,
            Err(e) => StageStatus::Failed(e),
        };
        Self::new(name.into(), None, status, started_at)
    }

    /// Add warnings to the result.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Record cache statistics.
    pub fn with_cache_stats(mut self, cache_hits: usize, compiled: usize) -> Self {
        self.cache_hits = cache_hits;
        self.compiled = compiled;
        self
    }

    /// Check if this result is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl TaskOutcome for StageReport {
    fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    fn blocked(task: &str, cause: &str) -> Self {
        let now = Instant::now();
        Self::new(task.to_string(), None, StageStatus::Blocked(cause.to_string()), now)
    }

    fn crashed(task: &str, message: String) -> Self {
        Self::new(task.to_string(), None, StageStatus::Failed(message), Instant::now())
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Default)]
pub struct BuildResult {
    /// Reports in plan order
    pub stages: Vec<StageReport>,
    /// Total build duration
    pub total_duration: Duration,
}

impl BuildResult {
    /// Create a new empty build result.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reports(stages: Vec<StageReport>, total_duration: Duration) -> Self {
        Self { stages, total_duration }
    }

    /// Report for a task by name.
    pub fn stage(&self, task: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.task == task)
    }

    /// Get the number of successful stages.
    pub fn success_count(&self) -> usize {
        self.stages.iter().filter(|r| r.is_success()).count()
    }

    /// Get the number of failed stages.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|r| r.status.is_failure()).count()
    }

    /// Check if the overall build succeeded (no failures, no compile errors).
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Get all outputs produced.
    pub fn all_outputs(&self) -> Vec<&PathBuf> {
        self.stages.iter().flat_map(|r| r.outputs.iter()).collect()
    }

    /// Get all compile errors.
    pub fn all_errors(&self) -> Vec<&CompileError> {
        self.stages.iter().flat_map(|r| r.errors.iter()).collect()
    }

    /// Get all warnings.
    pub fn all_warnings(&self) -> Vec<&String> {
        self.stages.iter().flat_map(|r| r.warnings.iter()).collect()
    }

    /// Get failed stage results.
    pub fn failures(&self) -> Vec<&StageReport> {
        self.stages.iter().filter(|r| r.status.is_failure()).collect()
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let success = self.success_count();
        let failed = self.failed_count();
        let total = self.stages.len();
        let files = self.all_outputs().len();

        if failed > 0 {
            lines.push(format!(
                "Build failed: {} succeeded, {} failed ({} total)",
                success, failed, total
            ));
            for stage in self.failures() {
                lines.push(format!("  - {}: {}", stage.task, stage.status));
                for error in &stage.errors {
                    lines.push(format!("      {}", error));
                }
            }
        } else {
            lines.push(format!(
                "Build succeeded: {} tasks, {} files written in {:?}",
                total, files, self.total_duration
            ));
        }

        let warnings = self.all_warnings();
        if !warnings.is_empty() {
            lines.push(format!("Warnings ({}): ", warnings.len()));
            for warning in warnings.iter().take(5) {
                lines.push(format!("  - {}", warning));
            }
            if warnings.len() > 5 {
                lines.push(format!("  ... and {} more", warnings.len() - 5));
            }
        }

        lines.join("\n")
    }
}
