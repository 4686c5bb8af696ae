//! Watch mode for category-scoped rebuilds on file changes
//!
//! A debounced filesystem watcher feeds [`PathChanged`] messages into a single
//! consumer loop. Each change is classified against the path table and only
//! the matching category's stage is run. Stage runs for different categories
//! overlap; a change arriving for a category that is already running is
//! coalesced into one re-run once the current run completes.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::build::incremental::lock_cache;
use crate::build::{run_stage, StageContext, StageReport};
use crate::paths::AssetCategory;

/// Error during watch mode
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch {path}: {source}")]
    WatchPath { path: PathBuf, source: notify::Error },
    #[error("No existing directories to watch")]
    NothingToWatch,
}

/// A debounced change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChanged {
    pub path: PathBuf,
}

impl PathChanged {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Where the watch loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No stage running
    Idle,
    /// At least one stage running
    Running,
    /// Handling an event
    Dispatching,
}

/// Tracks files with errors across stage runs for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    /// Files that had errors in each category's previous run
    files_with_errors: HashMap<AssetCategory, HashSet<PathBuf>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with a stage report, returns files that no longer fail
    pub fn update(&mut self, report: &StageReport) -> Vec<PathBuf> {
        let Some(category) = report.category else {
            return Vec::new();
        };
        let current: HashSet<PathBuf> = report.errors.iter().map(|e| e.file.clone()).collect();
        let previous = self.files_with_errors.insert(category, current).unwrap_or_default();

        let now = &self.files_with_errors[&category];
        let mut fixed: Vec<PathBuf> = previous.difference(now).cloned().collect();
        fixed.sort();
        fixed
    }

    pub fn has_errors(&self) -> bool {
        self.files_with_errors.values().any(|files| !files.is_empty())
    }

    /// Number of files with errors across all categories
    pub fn error_count(&self) -> usize {
        self.files_with_errors.values().map(HashSet::len).sum()
    }
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Routes changes to stages and tracks what is running.
pub struct Dispatcher {
    ctx: StageContext,
    running: HashSet<AssetCategory>,
    pending: HashSet<AssetCategory>,
    tasks: JoinSet<StageReport>,
    errors: ErrorTracker,
    state: WatchState,
}

impl Dispatcher {
    pub fn new(ctx: StageContext) -> Self {
        Self {
            ctx,
            running: HashSet::new(),
            pending: HashSet::new(),
            tasks: JoinSet::new(),
            errors: ErrorTracker::new(),
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn is_running(&self, category: AssetCategory) -> bool {
        self.running.contains(&category)
    }

    pub fn is_pending(&self, category: AssetCategory) -> bool {
        self.pending.contains(&category)
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    /// Classify a change and start (or queue) the matching stage.
    ///
    /// Stylesheet changes invalidate the incremental cache before the stage
    /// is started. Returns the category the change was routed to.
    pub fn handle(&mut self, event: PathChanged) -> Option<AssetCategory> {
        self.state = WatchState::Dispatching;
        let category = self.ctx.paths().category_for(&event.path);

        match category {
            Some(category) => {
                tracing::info!("Changed: {} ({})", self.display_path(&event.path), category);
                if category == AssetCategory::Stylesheet {
                    if let Some(cache) = self.ctx.cache() {
                        let removed = lock_cache(cache).invalidate(&event.path);
                        tracing::debug!("{} cached stylesheet(s) invalidated", removed.len());
                    }
                }
                self.dispatch(category);
            }
            None => tracing::debug!("ignoring change to {}", event.path.display()),
        }

        self.settle();
        category
    }

    /// Wait for the next stage run to finish.
    ///
    /// A category with a queued change is restarted immediately. Returns
    /// `None` when nothing is running.
    pub async fn next_completion(&mut self) -> Option<StageReport> {
        let joined = self.tasks.join_next().await?;
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                // Each run is itself a nested task, so only a cancelled
                // outer task lands here.
                tracing::error!("stage task lost: {}", e);
                self.settle();
                return None;
            }
        };

        if let Some(category) = report.category {
            self.running.remove(&category);
            if self.pending.remove(&category) {
                tracing::debug!("re-running '{}' for changes during the last run", category);
                self.spawn(category);
            }
        }

        for fixed in self.errors.update(&report) {
            tracing::info!("Fixed: {}", self.display_path(&fixed));
        }
        self.settle();
        Some(report)
    }

    /// Wait for every running and queued stage run.
    pub async fn drain(&mut self) -> Vec<StageReport> {
        let mut reports = Vec::new();
        while !self.tasks.is_empty() {
            if let Some(report) = self.next_completion().await {
                reports.push(report);
            }
        }
        reports
    }

    fn dispatch(&mut self, category: AssetCategory) {
        if self.running.contains(&category) {
            tracing::debug!("'{}' already running, queued", category);
            self.pending.insert(category);
        } else {
            self.spawn(category);
        }
    }

    fn spawn(&mut self, category: AssetCategory) {
        self.running.insert(category);
        let ctx = self.ctx.clone();
        self.tasks.spawn(async move {
            let started = Instant::now();
            let run = tokio::spawn(async move { run_stage(category, &ctx).await });
            match run.await {
                Ok(report) => report,
                Err(e) => StageReport::failed(category, started, format!("stage crashed: {}", e)),
            }
        });
    }

    fn settle(&mut self) {
        self.state = if self.running.is_empty() { WatchState::Idle } else { WatchState::Running };
    }

    fn display_path(&self, path: &std::path::Path) -> String {
        path.strip_prefix(self.ctx.paths().project_root())
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Consume changes until the sender side closes, then wait for running
/// stages. Returns every report produced.
pub async fn run_loop(
    dispatcher: &mut Dispatcher,
    mut changes: mpsc::UnboundedReceiver<PathChanged>,
) -> Vec<StageReport> {
    let mut reports = Vec::new();
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Some(change) => {
                    dispatcher.handle(change);
                }
                None => break,
            },
            Some(report) = dispatcher.next_completion(), if dispatcher.state() != WatchState::Idle => {
                reports.push(report);
            }
        }
    }
    reports.extend(dispatcher.drain().await);
    reports
}

/// Watch the configured source directories and rebuild on change.
///
/// Runs until the process exits.
pub async fn watch(ctx: StageContext, debounce: Duration) -> Result<(), WatchError> {
    let roots = ctx.paths().watch_roots();
    if roots.is_empty() {
        return Err(WatchError::NothingToWatch);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(debounce, move |result: notify_debouncer_mini::DebounceEventResult| {
        match result {
            Ok(events) => {
                for event in events {
                    if matches!(event.kind, DebouncedEventKind::Any) {
                        // The receiver only closes on shutdown.
                        let _ = tx.send(PathChanged::new(event.path));
                    }
                }
            }
            Err(error) => tracing::warn!("Watch error: {}", error),
        }
    })
    .map_err(WatchError::WatcherInit)?;

    for root in &roots {
        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchPath { path: root.clone(), source })?;
        tracing::info!("Watching {}", root.display());
    }

    let mut dispatcher = Dispatcher::new(ctx);
    run_loop(&mut dispatcher, rx).await;
    drop(debouncer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{shared_cache, CacheEntry, CompileError, StageStatus};
    use crate::config::SiteConfig;
    use crate::tools::{TemplateCompiler, ToolError, Toolchain};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl TemplateCompiler for Counting {
        async fn compile(&self, _path: &Path, source: &str) -> Result<String, ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(source.to_string())
        }
    }

    fn setup() -> (TempDir, StageContext, Counting) {
        let temp = TempDir::new().unwrap();
        for dir in ["src/pug", "src/js", "src/sass", "src/img", "src/fonts", "src/favicon"] {
            fs::create_dir_all(temp.path().join(dir)).unwrap();
        }
        fs::write(temp.path().join("src/pug/index.pug"), "p index").unwrap();
        fs::write(temp.path().join("src/fonts/a.woff"), "font").unwrap();

        let counter = Counting::default();
        let config = SiteConfig::default();
        let tools = Toolchain::from_config(&config).with_templates(counter.clone());
        let ctx = StageContext::new(config, temp.path())
            .unwrap()
            .with_tools(tools)
            .with_cache(shared_cache());
        (temp, ctx, counter)
    }

    fn report(category: AssetCategory, errors: &[&str]) -> StageReport {
        let errors = errors.iter().map(|f| CompileError::new(*f, "bad")).collect();
        StageReport::finished(category, Instant::now(), Vec::new(), errors)
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn test_error_tracker_reports_fixed_files() {
        let mut tracker = ErrorTracker::new();
        assert!(tracker.update(&report(AssetCategory::Markup, &["a.pug", "b.pug"])).is_empty());
        assert_eq!(tracker.error_count(), 2);

        let fixed = tracker.update(&report(AssetCategory::Markup, &["b.pug"]));
        assert_eq!(fixed, vec![PathBuf::from("a.pug")]);

        // Other categories are tracked separately.
        assert!(tracker.update(&report(AssetCategory::Script, &[])).is_empty());
        assert!(tracker.has_errors());

        assert_eq!(tracker.update(&report(AssetCategory::Markup, &[])), vec![PathBuf::from("b.pug")]);
        assert!(!tracker.has_errors());
    }

    #[tokio::test]
    async fn test_dispatch_runs_only_matching_category() {
        let (temp, ctx, counter) = setup();
        let mut dispatcher = Dispatcher::new(ctx);

        let routed = dispatcher.handle(PathChanged::new(temp.path().join("src/fonts/a.woff")));
        assert_eq!(routed, Some(AssetCategory::Font));
        assert_eq!(dispatcher.state(), WatchState::Running);

        let reports = dispatcher.drain().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].category, Some(AssetCategory::Font));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.state(), WatchState::Idle);
    }

    #[tokio::test]
    async fn test_unmatched_change_is_ignored() {
        let (temp, ctx, _counter) = setup();
        let mut dispatcher = Dispatcher::new(ctx);

        assert_eq!(dispatcher.handle(PathChanged::new(temp.path().join("README.md"))), None);
        assert_eq!(dispatcher.state(), WatchState::Idle);
        assert!(dispatcher.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_changes_during_run_are_coalesced() {
        let (temp, ctx, counter) = setup();
        let mut dispatcher = Dispatcher::new(ctx);
        let page = temp.path().join("src/pug/index.pug");

        dispatcher.handle(PathChanged::new(&page));
        dispatcher.handle(PathChanged::new(&page));
        dispatcher.handle(PathChanged::new(&page));
        assert!(dispatcher.is_running(AssetCategory::Markup));
        assert!(dispatcher.is_pending(AssetCategory::Markup));

        let reports = dispatcher.drain().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.status == StageStatus::Success));
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert!(!dispatcher.is_pending(AssetCategory::Markup));
    }

    #[tokio::test]
    async fn test_stylesheet_change_invalidates_before_dispatch() {
        let (temp, ctx, _counter) = setup();
        let main = temp.path().join("src/sass/main.scss");
        let partial = temp.path().join("src/sass/_base.scss");
        fs::write(&main, "a { color: red; }").unwrap();
        fs::write(&partial, "b { color: blue; }").unwrap();

        let main = main.canonicalize().unwrap();
        let partial = partial.canonicalize().unwrap();
        let cache = ctx.cache().unwrap().clone();
        {
            let mut guard = lock_cache(&cache);
            guard.record_dependency(&main, &partial);
            let entry = CacheEntry { source_hash: "x".into(), css: "a{}".into(), includes: BTreeMap::new() };
            guard.put(&main, entry);
        }

        let mut dispatcher = Dispatcher::new(ctx);
        assert_eq!(dispatcher.handle(PathChanged::new(&partial)), Some(AssetCategory::Stylesheet));
        assert!(lock_cache(&cache).get(&main).is_none());
        dispatcher.drain().await;
    }

    #[tokio::test]
    async fn test_run_loop_drains_after_close() {
        let (temp, ctx, _counter) = setup();
        let mut dispatcher = Dispatcher::new(ctx);
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(PathChanged::new(temp.path().join("src/fonts/a.woff"))).unwrap();
        tx.send(PathChanged::new(temp.path().join("src/pug/index.pug"))).unwrap();
        drop(tx);

        let reports = run_loop(&mut dispatcher, rx).await;
        let mut categories: Vec<_> = reports.iter().filter_map(|r| r.category).collect();
        categories.sort_by_key(|c| c.name());
        assert_eq!(categories, vec![AssetCategory::Font, AssetCategory::Markup]);
    }
}
