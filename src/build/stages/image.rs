//! Image stage: copy in development, optimize in production.

use async_trait::async_trait;
use std::time::Instant;

use super::{into_report, write_output, StageError, TransformStage};
use crate::build::{CompileError, StageContext, StageReport};
use crate::paths::AssetCategory;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageStage;

impl ImageStage {
    async fn execute(&self, ctx: &StageContext, started: Instant) -> Result<StageReport, StageError> {
        let paths = ctx.paths().lookup(AssetCategory::Image);
        let files = paths.discover()?;

        let mut outputs = Vec::new();
        let mut errors = Vec::new();

        for file in &files {
            let bytes = match tokio::fs::read(&file.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    errors.push(CompileError::new(&file.path, e.to_string()));
                    continue;
                }
            };

            let data = if ctx.mode().is_production() {
                let optimizer = ctx.tools().images.clone();
                let path = file.path.clone();
                let original = bytes.len();
                // Re-encoding is CPU bound.
                match tokio::task::spawn_blocking(move || optimizer.optimize(&path, &bytes)).await {
                    Ok(Ok(data)) => {
                        tracing::debug!(
                            "{}: {} -> {} bytes",
                            file.relative.display(),
                            original,
                            data.len()
                        );
                        data
                    }
                    Ok(Err(e)) => {
                        errors.push(CompileError::new(&file.path, e.to_string()));
                        continue;
                    }
                    Err(e) => {
                        errors.push(CompileError::new(&file.path, e.to_string()));
                        continue;
                    }
                }
            } else {
                bytes
            };

            let out = file.output_in(&paths.out);
            write_output(&out, data).await?;
            outputs.push(out);
        }

        Ok(StageReport::finished(AssetCategory::Image, started, outputs, errors))
    }
}

#[async_trait]
impl TransformStage for ImageStage {
    fn category(&self) -> AssetCategory {
        AssetCategory::Image
    }

    async fn run(&self, ctx: &StageContext) -> StageReport {
        let started = Instant::now();
        into_report(AssetCategory::Image, started, self.execute(ctx, started).await)
    }
}
