//! Stylesheet stage.
//!
//! For each root (non-partial) stylesheet:
//!
//! 1. Development runs with a cache return the cached CSS when the root and
//!    every file it included still hash the same
//! 2. Otherwise resolve includes, compile, add vendor prefixes, and in
//!    production merge media rules, collapse shorthands and minify
//! 3. Record the include edges and store the result in the cache
//!
//! The roots are then merged in path order into one bundle, followed by its
//! source map and, when enabled, a mirrored right-to-left bundle. Production
//! never reads or writes the cache.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{into_report, write_output, StageError, TransformStage};
use crate::build::incremental::{content_hash, lock_cache, CacheEntry, SharedCache};
use crate::build::{CompileError, StageContext, StageReport};
use crate::include::{resolve_includes, Syntax};
use crate::paths::{AssetCategory, CategoryPaths};
use crate::tools::sourcemap::{css_mapping_comment, relative_path, SourceMapBuilder};

const CATEGORY: AssetCategory = AssetCategory::Stylesheet;

/// One compiled root.
#[derive(Debug, Clone)]
struct CompiledRoot {
    path: PathBuf,
    source: String,
    css: String,
    cache_hit: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StylesheetStage;

impl StylesheetStage {
    async fn execute(&self, ctx: &StageContext, started: Instant) -> Result<StageReport, StageError> {
        let paths = ctx.paths().lookup(CATEGORY);
        let bundle_path = paths.bundle_path().ok_or(StageError::NoBundle(CATEGORY))?;
        let files = paths.discover()?;
        let roots: Vec<PathBuf> = files.into_iter().filter(|f| !f.partial).map(|f| f.path).collect();

        let cache = ctx.cache();
        if let Some(cache) = cache {
            lock_cache(cache).retain_roots(&roots);
        }

        let mut compiled = Vec::with_capacity(roots.len());
        let mut errors = Vec::new();
        for root in &roots {
            match compile_root(ctx, root, cache).await {
                Ok(result) => compiled.push(result),
                Err(e) => errors.push(e),
            }
        }

        let hits = compiled.iter().filter(|c| c.cache_hit).count();
        let misses = compiled.len() - hits;
        tracing::debug!("stylesheet roots: {} cached, {} compiled", hits, misses);

        if !errors.is_empty() {
            return Ok(StageReport::finished(CATEGORY, started, Vec::new(), errors)
                .with_cache_stats(hits, misses));
        }

        let outputs = write_bundle(ctx, paths, &bundle_path, &compiled).await?;
        Ok(StageReport::finished(CATEGORY, started, outputs, errors).with_cache_stats(hits, misses))
    }
}

#[async_trait]
impl TransformStage for StylesheetStage {
    fn category(&self) -> AssetCategory {
        CATEGORY
    }

    async fn run(&self, ctx: &StageContext) -> StageReport {
        let started = Instant::now();
        into_report(CATEGORY, started, self.execute(ctx, started).await)
    }
}

/// The candidate entry for `path` and the epoch to store a fresh result under.
fn consult_cache(cache: &SharedCache, path: &Path, hash: &str) -> (Option<CacheEntry>, u64) {
    let guard = lock_cache(cache);
    (guard.lookup(path, hash).cloned(), guard.epoch())
}

async fn compile_root(
    ctx: &StageContext,
    path: &Path,
    cache: Option<&SharedCache>,
) -> Result<CompiledRoot, CompileError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| CompileError::new(path, e.to_string()))?;
    let source = String::from_utf8_lossy(&bytes).into_owned();
    let hash = content_hash(&bytes);

    let mut epoch = None;
    if let Some(cache) = cache {
        let (candidate, current) = consult_cache(cache, path, &hash);
        match candidate {
            Some(entry) => {
                if entry.includes_unchanged().await {
                    tracing::debug!("cache hit: {}", path.display());
                    let css = entry.css;
                    return Ok(CompiledRoot { path: path.to_path_buf(), source, css, cache_hit: true });
                }
                tracing::debug!("cache stale: {}", path.display());
            }
            None => tracing::debug!("cache miss: {}", path.display()),
        }
        epoch = Some(current);
    }

    let resolved = resolve_includes(path, Syntax::Stylesheet)
        .map_err(|e| CompileError::new(path, e.to_string()))?;

    let tools = ctx.tools();
    let to_error = |e: crate::tools::ToolError| CompileError::new(path, e.to_string());
    let mut css = tools.stylesheets.compile(path, &resolved.text).await.map_err(to_error)?;
    css = tools.css.prefix(&css).map_err(to_error)?;
    if ctx.mode().is_production() {
        css = tools.css.merge_media(&css).map_err(to_error)?;
        css = tools.css.collapse_shorthands(&css).map_err(to_error)?;
        css = tools.css.minify(&css).map_err(to_error)?;
    }

    if let (Some(cache), Some(epoch)) = (cache, epoch) {
        let mut guard = lock_cache(cache);
        let includers: BTreeSet<&PathBuf> = resolved.edges.iter().map(|(from, _)| from).collect();
        guard.clear_dependencies(path);
        for includer in includers {
            guard.clear_dependencies(includer);
        }
        for (includer, included) in &resolved.edges {
            guard.record_dependency(includer, included);
        }
        let entry = CacheEntry {
            source_hash: hash,
            css: css.clone(),
            includes: resolved.digests.clone(),
        };
        guard.put_if_current(path, entry, epoch);
    }

    Ok(CompiledRoot { path: path.to_path_buf(), source, css, cache_hit: false })
}

/// Merge compiled roots into the bundle and write the derived artifacts.
async fn write_bundle(
    ctx: &StageContext,
    paths: &CategoryPaths,
    bundle_path: &Path,
    compiled: &[CompiledRoot],
) -> Result<Vec<PathBuf>, StageError> {
    let settings = &ctx.config().stylesheet;
    let mut outputs = Vec::new();

    let mut merged = String::new();
    let mut map = SourceMapBuilder::new();
    for root in compiled {
        let mut css = root.css.clone();
        if !css.is_empty() && !css.ends_with('\n') {
            css.push('\n');
        }
        map.add_chunk(relative_path(&paths.out, &root.path), root.source.clone(), &css);
        merged.push_str(&css);
    }

    let mut bundle = merged.clone();
    if settings.source_map {
        let map_path = map_path_for(bundle_path);
        let map_name = file_name(&map_path);
        let json = map
            .to_json(&file_name(bundle_path))
            .map_err(|e| StageError::Io(map_path.clone(), e.into()))?;
        bundle.push_str(&css_mapping_comment(&map_name));
        write_output(&map_path, json).await?;
        outputs.push(map_path);
    }

    write_output(bundle_path, &bundle).await?;
    outputs.insert(0, bundle_path.to_path_buf());

    if settings.rtl {
        let rtl_path = rtl_path_for(bundle_path, &settings.rtl_suffix);
        write_output(&rtl_path, ctx.tools().mirror.mirror(&merged)).await?;
        outputs.push(rtl_path);
    }

    Ok(outputs)
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// `main.css` -> `main.css.map`
pub fn map_path_for(bundle: &Path) -> PathBuf {
    let mut name = bundle.as_os_str().to_owned();
    name.push(".map");
    PathBuf::from(name)
}

/// `main.css` -> `main-rtl.css`
pub fn rtl_path_for(bundle: &Path, suffix: &str) -> PathBuf {
    let stem = bundle.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = bundle.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    bundle.with_file_name(format!("{}{}{}", stem, suffix, ext))
}

/// Mirror the existing bundle into its right-to-left variant.
///
/// Used by the `rtl` command; the bundle must already be built.
pub async fn write_mirrored(ctx: &StageContext) -> Result<PathBuf, StageError> {
    let paths = ctx.paths().lookup(CATEGORY);
    let bundle_path = paths.bundle_path().ok_or(StageError::NoBundle(CATEGORY))?;
    let css = tokio::fs::read_to_string(&bundle_path)
        .await
        .map_err(|e| StageError::Io(bundle_path.clone(), e))?;

    let without_map: String = css
        .lines()
        .filter(|l| !l.trim_start().starts_with("/*# sourceMappingURL="))
        .flat_map(|l| [l, "\n"])
        .collect();

    let rtl_path = rtl_path_for(&bundle_path, &ctx.config().stylesheet.rtl_suffix);
    write_output(&rtl_path, ctx.tools().mirror.mirror(&without_map)).await?;
    Ok(rtl_path)
}
