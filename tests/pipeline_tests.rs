//! Pipeline integration tests
//!
//! Exercise whole builds against a scratch project with fake collaborators:
//! - Build plan over every category
//! - Production plan (clean first, cache bypass)
//! - Incremental stylesheet cache and include invalidation
//! - Per-file and per-stage failure isolation
//! - Category-scoped watch dispatch

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use assetline::build::{
    content_hash, lock_cache, shared_cache, BuildMode, CacheEntry, Pipeline, SharedCache,
    StageContext, StageStatus, CLEAN_TASK,
};
use assetline::config::SiteConfig;
use assetline::paths::AssetCategory;
use assetline::tools::{
    ChannelError, CssPostProcessor, PreviewChannel, ScriptMinifier, StylesheetCompiler,
    TemplateCompiler, ToolError, Toolchain,
};
use assetline::watch::{Dispatcher, PathChanged};

// ============================================================================
// Test Utilities
// ============================================================================

#[derive(Clone, Default)]
struct Counter(Arc<AtomicUsize>);

impl Counter {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wraps each page in a paragraph; fails on pages containing "error".
struct FakeTemplates(Counter);

#[async_trait]
impl TemplateCompiler for FakeTemplates {
    async fn compile(&self, _path: &Path, source: &str) -> Result<String, ToolError> {
        self.0.bump();
        if source.contains("error") {
            return Err(ToolError::Message("unexpected token on line 1".to_string()));
        }
        Ok(format!("<p>{}</p>\n", source.trim()))
    }
}

/// Passes expanded stylesheet text through unchanged.
struct FakeStylesheets(Counter);

#[async_trait]
impl StylesheetCompiler for FakeStylesheets {
    async fn compile(&self, _path: &Path, source: &str) -> Result<String, ToolError> {
        self.0.bump();
        Ok(source.to_string())
    }
}

struct IdentityCss;

impl CssPostProcessor for IdentityCss {
    fn prefix(&self, css: &str) -> Result<String, ToolError> {
        Ok(css.to_string())
    }
    fn merge_media(&self, css: &str) -> Result<String, ToolError> {
        Ok(css.to_string())
    }
    fn collapse_shorthands(&self, css: &str) -> Result<String, ToolError> {
        Ok(css.to_string())
    }
    fn minify(&self, css: &str) -> Result<String, ToolError> {
        Ok(css.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}

struct TrimMinifier;

#[async_trait]
impl ScriptMinifier for TrimMinifier {
    async fn minify(&self, _path: &Path, source: &str) -> Result<String, ToolError> {
        Ok(source.trim().to_string())
    }
}

#[derive(Clone, Default)]
struct RecordingPreview(Arc<Mutex<Vec<PathBuf>>>);

impl RecordingPreview {
    fn take(&self) -> Vec<PathBuf> {
        let mut paths = std::mem::take(&mut *self.0.lock().unwrap());
        paths.sort();
        paths
    }
}

#[async_trait]
impl PreviewChannel for RecordingPreview {
    async fn notify(&self, changed: &[PathBuf]) -> Result<(), ChannelError> {
        self.0.lock().unwrap().extend_from_slice(changed);
        Ok(())
    }
}

struct Fixture {
    temp: TempDir,
    ctx: StageContext,
    templates: Counter,
    stylesheets: Counter,
    preview: RecordingPreview,
}

impl Fixture {
    fn src(&self, rel: &str) -> PathBuf {
        self.ctx.paths().src_root().join(rel)
    }

    fn out(&self, rel: &str) -> PathBuf {
        self.ctx.paths().build_root().join(rel)
    }

    fn read_out(&self, rel: &str) -> String {
        fs::read_to_string(self.out(rel)).unwrap()
    }
}

/// Create a test file with content.
fn create_test_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// A small site using the default layout.
fn create_site() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    create_test_file(root, "src/pug/index.pug", "index page");
    create_test_file(root, "src/pug/about.pug", "about page");
    create_test_file(root, "src/pug/_layout.pug", "shared layout");
    create_test_file(root, "src/js/script.js", "console.log('app');\n");
    create_test_file(root, "src/js/vendor.js", "var vendor = 1;\n");
    create_test_file(root, "src/sass/main.scss", "@import \"mid\";\nmain { color: red; }\n");
    create_test_file(root, "src/sass/_mid.scss", "@import \"base\";\nmid { color: green; }\n");
    create_test_file(root, "src/sass/_base.scss", "base { color: blue; }\n");
    create_test_file(root, "src/fonts/inter.woff2", "font");
    create_test_file(root, "src/favicon/favicon.ico", "icon");
    fs::create_dir_all(root.join("src/img")).unwrap();
    temp
}

fn fixture_with(temp: TempDir, cache: Option<SharedCache>) -> Fixture {
    let templates = Counter::default();
    let stylesheets = Counter::default();
    let preview = RecordingPreview::default();

    let config = SiteConfig::default();
    let tools = Toolchain::from_config(&config)
        .with_templates(FakeTemplates(templates.clone()))
        .with_stylesheets(FakeStylesheets(stylesheets.clone()))
        .with_css(IdentityCss)
        .with_scripts(TrimMinifier);
    let mut ctx = StageContext::new(config, temp.path())
        .unwrap()
        .with_tools(tools)
        .with_preview(Arc::new(preview.clone()));
    if let Some(cache) = cache {
        ctx = ctx.with_cache(cache);
    }

    Fixture { temp, ctx, templates, stylesheets, preview }
}

fn fixture() -> Fixture {
    fixture_with(create_site(), Some(shared_cache()))
}

// ============================================================================
// Build Plan
// ============================================================================

#[tokio::test]
async fn test_build_writes_every_category() {
    let f = fixture();
    let result = Pipeline::new(f.ctx.clone()).build().await.unwrap();

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.stages.len(), 7);
    assert_eq!(f.read_out("index.html"), "<p>index page</p>\n");
    assert_eq!(f.read_out("about.html"), "<p>about page</p>\n");
    assert_eq!(f.read_out("js/script.js"), "console.log('app');\n");
    assert_eq!(f.read_out("js/vendor.js"), "var vendor = 1;\n");
    assert_eq!(f.read_out("css/fonts/inter.woff2"), "font");
    assert_eq!(f.read_out("favicon/favicon.ico"), "icon");

    let css = f.read_out("css/main.css");
    assert!(css.contains("base { color: blue; }"));
    assert!(css.contains("mid { color: green; }"));
    assert!(css.contains("main { color: red; }"));
    assert!(css.ends_with("/*# sourceMappingURL=main.css.map */\n"));
    assert!(f.out("css/main.css.map").is_file());
}

#[tokio::test]
async fn test_layout_partial_produces_no_output() {
    let f = fixture();
    Pipeline::new(f.ctx.clone()).build().await.unwrap();

    assert!(!f.out("_layout.html").exists());
    assert!(!f.out("layout.html").exists());
    assert_eq!(f.templates.get(), 2);
}

#[tokio::test]
async fn test_markup_error_is_isolated() {
    let f = fixture();
    create_test_file(f.temp.path(), "src/pug/about.pug", "syntax error here");

    let result = Pipeline::new(f.ctx.clone()).build().await.unwrap();
    assert!(!result.is_success());

    let markup = result.stage("markup").unwrap();
    assert_eq!(markup.status, StageStatus::Partial);
    assert_eq!(markup.errors.len(), 1);
    assert!(markup.errors[0].file.ends_with("about.pug"));
    assert_eq!(markup.errors[0].line, Some(1));

    assert!(f.out("index.html").exists());
    assert!(!f.out("about.html").exists());
    assert!(result.stage("stylesheet").unwrap().is_success());
}

#[tokio::test]
async fn test_missing_script_entry_fails_only_its_stage() {
    let f = fixture();
    fs::remove_file(f.temp.path().join("src/js/script.js")).unwrap();

    let result = Pipeline::new(f.ctx.clone()).build().await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.failures().len(), 1);

    let script = result.stage("script").unwrap();
    assert!(matches!(script.status, StageStatus::Failed(_)));
    assert!(script.status.to_string().contains("script.js"));

    assert!(result.stage("vendor-script").unwrap().is_success());
    assert!(f.out("js/vendor.js").exists());
    assert!(f.out("index.html").exists());
}

// ============================================================================
// Incremental Cache
// ============================================================================

#[tokio::test]
async fn test_cache_reuse_without_recompilation() {
    let f = fixture();
    let pipeline = Pipeline::new(f.ctx.clone());

    let first = pipeline.build().await.unwrap();
    let css = f.read_out("css/main.css");
    assert_eq!(f.stylesheets.get(), 1);
    assert_eq!(first.stage("stylesheet").unwrap().compiled, 1);

    let second = pipeline.build().await.unwrap();
    let report = second.stage("stylesheet").unwrap();
    assert_eq!(f.stylesheets.get(), 1);
    assert_eq!(report.cache_hits, 1);
    assert_eq!(report.compiled, 0);
    assert_eq!(f.read_out("css/main.css"), css);
}

#[tokio::test]
async fn test_root_edit_is_recompiled() {
    let f = fixture();
    let pipeline = Pipeline::new(f.ctx.clone());
    pipeline.build().await.unwrap();

    create_test_file(f.temp.path(), "src/sass/main.scss", "@import \"mid\";\nmain { color: black; }\n");
    pipeline.build().await.unwrap();

    assert_eq!(f.stylesheets.get(), 2);
    assert!(f.read_out("css/main.css").contains("main { color: black; }"));
}

#[tokio::test]
async fn test_partial_edit_invalidates_through_includes() {
    let f = fixture();
    Pipeline::new(f.ctx.clone()).build().await.unwrap();

    let cache = f.ctx.cache().unwrap().clone();
    let main = f.src("sass/main.scss");
    let base = f.src("sass/_base.scss");
    assert!(lock_cache(&cache).get(&main).is_some());
    assert_eq!(
        lock_cache(&cache).dependencies().transitive_dependents(&base),
        vec![f.src("sass/_mid.scss"), main.clone()]
    );

    create_test_file(f.temp.path(), "src/sass/_base.scss", "base { color: purple; }\n");
    let mut dispatcher = Dispatcher::new(f.ctx.clone());
    assert_eq!(dispatcher.handle(PathChanged::new(&base)), Some(AssetCategory::Stylesheet));
    assert!(lock_cache(&cache).get(&main).is_none());

    let reports = dispatcher.drain().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_success());
    assert_eq!(f.stylesheets.get(), 2);

    let css = f.read_out("css/main.css");
    assert!(css.contains("base { color: purple; }"));
    assert!(!css.contains("blue"));
}

#[tokio::test]
async fn test_partial_edit_without_watch_event_is_recompiled() {
    let f = fixture();
    let pipeline = Pipeline::new(f.ctx.clone());
    pipeline.build().await.unwrap();
    assert_eq!(f.stylesheets.get(), 1);

    // Edited behind the cache's back: nothing calls invalidate.
    create_test_file(f.temp.path(), "src/sass/_base.scss", "base { color: purple; }\n");
    let result = pipeline.build().await.unwrap();

    let report = result.stage("stylesheet").unwrap();
    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.compiled, 1);
    assert_eq!(f.stylesheets.get(), 2);
    let css = f.read_out("css/main.css");
    assert!(css.contains("base { color: purple; }"));
    assert!(!css.contains("blue"));

    // The refreshed entry is trusted again.
    let result = pipeline.build().await.unwrap();
    assert_eq!(result.stage("stylesheet").unwrap().cache_hits, 1);
    assert_eq!(f.stylesheets.get(), 2);
}

// ============================================================================
// Production Plan
// ============================================================================

#[tokio::test]
async fn test_production_cleans_first() {
    let f = fixture();
    let stale = create_test_file(f.ctx.paths().build_root(), "old.html", "stale");

    let result = Pipeline::new(f.ctx.clone()).production().await.unwrap();
    assert!(result.is_success(), "{}", result.summary());
    assert!(!stale.exists());

    let clean = result.stage(CLEAN_TASK).unwrap();
    for report in result.stages.iter().filter(|r| r.task != CLEAN_TASK) {
        assert!(report.started_at >= clean.finished_at, "'{}' started before clean", report.task);
    }
    for output in result.all_outputs() {
        assert!(output.exists(), "{} missing", output.display());
    }
}

#[tokio::test]
async fn test_production_minifies() {
    let f = fixture();
    Pipeline::new(f.ctx.clone()).production().await.unwrap();

    assert_eq!(f.read_out("js/script.js"), "console.log('app');\n");
    let css = f.read_out("css/main.css");
    assert!(css.starts_with("base { color: blue; } mid { color: green; } main { color: red; }"));
}

#[tokio::test]
async fn test_production_bypasses_cache() {
    let cold = fixture_with(create_site(), None);
    Pipeline::new(cold.ctx.clone()).production().await.unwrap();
    let expected = fs::read(cold.out("css/main.css")).unwrap();

    // Poison the cache with an entry that matches main.scss's current hash.
    let warm = fixture();
    let main = warm.src("sass/main.scss");
    let cache = warm.ctx.cache().unwrap().clone();
    lock_cache(&cache).put(
        &main,
        CacheEntry {
            source_hash: content_hash(&fs::read(&main).unwrap()),
            css: "poisoned { color: red; }".to_string(),
            includes: BTreeMap::new(),
        },
    );

    // Development builds trust the entry...
    Pipeline::new(warm.ctx.clone()).build().await.unwrap();
    assert!(warm.read_out("css/main.css").contains("poisoned"));

    // ...production never reads it.
    let prod = warm.ctx.clone().with_mode(BuildMode::Production);
    assert!(prod.cache().is_none());
    Pipeline::new(warm.ctx.clone()).production().await.unwrap();
    assert_eq!(fs::read(warm.out("css/main.css")).unwrap(), expected);
    assert!(lock_cache(&cache).get(&main).is_some());
}

// ============================================================================
// Watch Dispatch
// ============================================================================

#[tokio::test]
async fn test_watch_dispatch_is_category_scoped() {
    let f = fixture();
    Pipeline::new(f.ctx.clone()).build().await.unwrap();
    f.preview.take();
    let (templates, stylesheets) = (f.templates.get(), f.stylesheets.get());

    let mut dispatcher = Dispatcher::new(f.ctx.clone());
    let routed = dispatcher.handle(PathChanged::new(f.src("pug/index.pug")));
    assert_eq!(routed, Some(AssetCategory::Markup));
    dispatcher.drain().await;

    assert_eq!(f.templates.get(), templates + 2);
    assert_eq!(f.stylesheets.get(), stylesheets);
    assert_eq!(f.preview.take(), vec![f.out("about.html"), f.out("index.html")]);

    dispatcher.handle(PathChanged::new(f.src("sass/_mid.scss")));
    dispatcher.drain().await;

    assert_eq!(f.templates.get(), templates + 2);
    assert_eq!(f.stylesheets.get(), stylesheets + 1);
    assert_eq!(f.preview.take(), vec![f.out("css/main.css"), f.out("css/main.css.map")]);
}

#[tokio::test]
async fn test_script_change_runs_only_script_stage() {
    let f = fixture();
    Pipeline::new(f.ctx.clone()).build().await.unwrap();
    f.preview.take();
    let (templates, stylesheets) = (f.templates.get(), f.stylesheets.get());

    create_test_file(f.temp.path(), "src/js/script.js", "console.log('changed');\n");
    let mut dispatcher = Dispatcher::new(f.ctx.clone());
    let routed = dispatcher.handle(PathChanged::new(f.src("js/script.js")));
    assert_eq!(routed, Some(AssetCategory::Script));

    let reports = dispatcher.drain().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].category, Some(AssetCategory::Script));
    assert!(reports[0].is_success());

    assert_eq!(f.templates.get(), templates);
    assert_eq!(f.stylesheets.get(), stylesheets);
    assert_eq!(f.preview.take(), vec![f.out("js/script.js")]);
    assert_eq!(f.read_out("js/script.js"), "console.log('changed');\n");
}

#[tokio::test]
async fn test_layout_change_rebuilds_pages() {
    let f = fixture();
    let mut dispatcher = Dispatcher::new(f.ctx.clone());

    dispatcher.handle(PathChanged::new(f.src("pug/_layout.pug")));
    let reports = dispatcher.drain().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].category, Some(AssetCategory::Markup));
    assert_eq!(f.templates.get(), 2);
    assert!(!f.out("_layout.html").exists());
}
