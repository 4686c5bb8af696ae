//! Passthrough copy for fonts and favicons.

use async_trait::async_trait;
use std::time::Instant;

use super::{into_report, StageError, TransformStage};
use crate::build::{CompileError, StageContext, StageReport};
use crate::paths::AssetCategory;

#[derive(Debug, Clone, Copy)]
pub struct CopyStage {
    category: AssetCategory,
}

impl CopyStage {
    pub fn new(category: AssetCategory) -> Self {
        Self { category }
    }

    async fn execute(&self, ctx: &StageContext, started: Instant) -> Result<StageReport, StageError> {
        let paths = ctx.paths().lookup(self.category);
        let files = paths.discover()?;

        tokio::fs::create_dir_all(&paths.out).await.map_err(|e| StageError::Io(paths.out.clone(), e))?;

        let mut outputs = Vec::new();
        let mut errors = Vec::new();
        for file in &files {
            let out = file.output_in(&paths.out);
            if let Some(parent) = out.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StageError::Io(parent.to_path_buf(), e))?;
            }
            match tokio::fs::copy(&file.path, &out).await {
                Ok(_) => outputs.push(out),
                Err(e) => errors.push(CompileError::new(&file.path, e.to_string())),
            }
        }

        Ok(StageReport::finished(self.category, started, outputs, errors))
    }
}

#[async_trait]
impl TransformStage for CopyStage {
    fn category(&self) -> AssetCategory {
        self.category
    }

    async fn run(&self, ctx: &StageContext) -> StageReport {
        let started = Instant::now();
        into_report(self.category, started, self.execute(ctx, started).await)
    }
}
