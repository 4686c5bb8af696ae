//! Transform stages, one per asset category.
//!
//! A stage discovers its sources through the path table, hands each file to
//! its collaborator and writes the results into the category's output
//! directory. Per-file failures are collected as [`CompileError`]s and never
//! stop the other files; only configuration and output I/O problems fail a
//! whole stage.

pub mod copy;
pub mod image;
pub mod markup;
pub mod script;
pub mod stylesheet;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::build::{CompileError, StageContext, StageReport};
use crate::config::ConfigError;
use crate::paths::AssetCategory;

pub use copy::CopyStage;
pub use image::ImageStage;
pub use markup::MarkupStage;
pub use script::ScriptStage;
pub use stylesheet::StylesheetStage;

/// Error that fails a whole stage run.
#[derive(Debug)]
pub enum StageError {
    /// Bad glob, missing source directory
    Config(ConfigError),
    /// Writing an output failed
    Io(PathBuf, std::io::Error),
    /// A bundling category has no bundle name
    NoBundle(AssetCategory),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Config(e) => write!(f, "{}", e),
            StageError::Io(path, e) => write!(f, "Failed to write {}: {}", path.display(), e),
            StageError::NoBundle(category) => {
                write!(f, "No bundle file configured for '{}'", category)
            }
        }
    }
}

impl std::error::Error for StageError {}

impl From<ConfigError> for StageError {
    fn from(e: ConfigError) -> Self {
        StageError::Config(e)
    }
}

/// Common contract for every transform stage.
#[async_trait]
pub trait TransformStage: Send + Sync {
    fn category(&self) -> AssetCategory;

    /// Run the stage over every source in its category.
    async fn run(&self, ctx: &StageContext) -> StageReport;
}

/// The stage responsible for a category.
pub fn stage_for(category: AssetCategory) -> Box<dyn TransformStage> {
    match category {
        AssetCategory::Markup => Box::new(MarkupStage),
        AssetCategory::Script | AssetCategory::VendorScript => Box::new(ScriptStage::new(category)),
        AssetCategory::Stylesheet => Box::new(StylesheetStage),
        AssetCategory::Image => Box::new(ImageStage),
        AssetCategory::Font | AssetCategory::Favicon => Box::new(CopyStage::new(category)),
    }
}

/// Run one category's stage, log the outcome and notify the preview.
pub async fn run_stage(category: AssetCategory, ctx: &StageContext) -> StageReport {
    tracing::info!("Starting '{}' ({})", category, ctx.mode());
    let mut report = stage_for(category).run(ctx).await;

    for error in &report.errors {
        tracing::warn!("{}", error);
    }

    if !report.outputs.is_empty() {
        if let Err(e) = ctx.preview().notify(&report.outputs).await {
            tracing::warn!("'{}': {}", category, e);
            report = report.with_warnings(vec![e.to_string()]);
        }
    }

    match &report.status {
        status if status.is_success() => tracing::info!(
            "Finished '{}' after {} ({} file(s))",
            category,
            crate::watch::format_duration(report.duration),
            report.outputs.len()
        ),
        status => tracing::error!("'{}' {}", category, status),
    }
    report
}

/// Turn a stage body's result into a report.
pub(crate) fn into_report(
    category: AssetCategory,
    started: Instant,
    result: Result<StageReport, StageError>,
) -> StageReport {
    result.unwrap_or_else(|e| StageReport::failed(category, started, e.to_string()))
}

/// Write an output file, creating parent directories.
pub(crate) async fn write_output(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StageError::Io(parent.to_path_buf(), e))?;
    }
    tokio::fs::write(path, contents).await.map_err(|e| StageError::Io(path.to_path_buf(), e))
}

/// Read a source file as text, mapping failure to a per-file error.
pub(crate) async fn read_source(path: &Path) -> Result<String, CompileError> {
    tokio::fs::read_to_string(path).await.map_err(|e| CompileError::new(path, e.to_string()))
}
