//! Build pipeline orchestration.
//!
//! The pipeline composes stages into task graphs:
//!
//! - **build plan**: the seven stages, no edges
//! - **production plan**: `clean`, then every stage depending on it
//! - **single stage**: what the watch loop dispatches

use std::path::Path;
use std::time::Instant;
use thiserror::Error;

use crate::build::graph::{GraphError, TaskGraph};
use crate::build::stages::run_stage;
use crate::build::{BuildMode, BuildResult, StageContext, StageReport};
use crate::config::ConfigError;
use crate::paths::{AssetCategory, PathTable};

/// Name of the clean task in the production plan.
pub const CLEAN_TASK: &str = "clean";

/// Error during build execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// Plan could not be assembled
    #[error("Build plan error: {0}")]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build pipeline for executing builds.
#[derive(Debug, Clone)]
pub struct Pipeline {
    ctx: StageContext,
}

impl Pipeline {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Every stage, no edges.
    pub fn build_plan(&self) -> Result<TaskGraph<StageReport>, GraphError> {
        let mut graph = TaskGraph::new();
        for category in AssetCategory::ALL {
            let ctx = self.ctx.clone();
            graph.add_task(category.name(), &[], move || async move { run_stage(category, &ctx).await })?;
        }
        Ok(graph)
    }

    /// `clean`, then every stage in production mode.
    pub fn production_plan(&self) -> Result<TaskGraph<StageReport>, GraphError> {
        let ctx = self.ctx.clone().with_mode(BuildMode::Production);
        let mut graph = TaskGraph::new();

        let paths = ctx.clone();
        graph.add_task(CLEAN_TASK, &[], move || async move {
            let started = Instant::now();
            let result = clean_output(paths.paths()).await.map_err(|e| e.to_string());
            StageReport::task(CLEAN_TASK, started, result)
        })?;

        for category in AssetCategory::ALL {
            let ctx = ctx.clone();
            graph.add_task(category.name(), &[CLEAN_TASK], move || async move {
                run_stage(category, &ctx).await
            })?;
        }
        Ok(graph)
    }

    /// Run the build plan in the context's mode.
    pub async fn build(&self) -> Result<BuildResult, BuildError> {
        tracing::info!("Building {} ({})", self.ctx.config().project.name, self.ctx.mode());
        Self::execute(self.build_plan()?).await
    }

    /// Run the production plan.
    pub async fn production(&self) -> Result<BuildResult, BuildError> {
        tracing::info!("Building {} (production)", self.ctx.config().project.name);
        Self::execute(self.production_plan()?).await
    }

    /// Run one category's stage.
    pub async fn run_stage(&self, category: AssetCategory) -> StageReport {
        run_stage(category, &self.ctx).await
    }

    async fn execute(graph: TaskGraph<StageReport>) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let reports = graph.execute().await?;
        Ok(BuildResult::from_reports(reports, start.elapsed()))
    }
}

/// Remove the whole build tree and recreate an empty build root.
///
/// Refuses when the build root is, or contains, the project or source root.
pub async fn clean_output(paths: &PathTable) -> Result<(), BuildError> {
    let build_root = paths.build_root();
    check_clean_target(build_root, paths.project_root(), paths.src_root())?;

    match tokio::fs::remove_dir_all(build_root).await {
        Ok(()) => tracing::info!("Removed {}", build_root.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(build_root).await?;
    Ok(())
}

fn check_clean_target(build_root: &Path, project_root: &Path, src_root: &Path) -> Result<(), ConfigError> {
    if project_root.starts_with(build_root) || src_root.starts_with(build_root) {
        return Err(ConfigError::UnsafeClean(build_root.to_path_buf()));
    }
    Ok(())
}
